//! Shared headless-browser session with reference-counted pages.
//!
//! One browser process per worker, launched lazily on the first page request.
//! Concurrent callers that arrive during the launch await the same in-flight
//! future. When the last open page is released an idle timer is armed; if no
//! page is acquired before it fires the browser is closed and the next
//! acquisition launches a fresh one.

use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::error::AppError;
use crate::traits::{Browser, BrowserLauncher, Page};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36";

/// Baseline configuration applied to every new page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageProfile {
    pub user_agent: String,
    pub extra_headers: Vec<(String, String)>,
}

impl Default for PageProfile {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            extra_headers: vec![
                ("Accept-Language".into(), "en-GB,en;q=0.9".into()),
                ("sec-ch-ua-platform".into(), "Windows".into()),
                (
                    "sec-ch-ua".into(),
                    r#""Not?A_Brand";v="8", "Chromium";v="108", "Google Chrome";v="108""#.into(),
                ),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long the browser may sit with zero open pages before it is closed.
    pub idle_timeout: Duration,
    pub profile: PageProfile,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60 * 60),
            profile: PageProfile::default(),
        }
    }
}

type LaunchFuture = Shared<BoxFuture<'static, Result<Arc<dyn Browser>, String>>>;

#[derive(Default)]
struct SessionState {
    browser: Option<Arc<dyn Browser>>,
    launching: Option<LaunchFuture>,
    open_pages: usize,
    idle_timer: Option<AbortHandle>,
    /// Bumped whenever the idle timer is armed or cancelled, so a timer that
    /// already woke up can tell it has been superseded.
    timer_epoch: u64,
}

impl SessionState {
    fn cancel_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
        self.timer_epoch += 1;
    }
}

struct SessionInner {
    launcher: Arc<dyn BrowserLauncher>,
    config: SessionConfig,
    state: Mutex<SessionState>,
}

impl SessionInner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned session mutex");
            poisoned.into_inner()
        })
    }

    /// Give back one page slot, arming the idle timer on the last one.
    fn release_slot(self: &Arc<Self>, handle: &Handle) {
        let mut state = self.lock_state();
        state.open_pages = state.open_pages.saturating_sub(1);
        tracing::debug!(open_pages = state.open_pages, "Page released");
        if state.open_pages == 0 && state.browser.is_some() {
            self.arm_idle_timer(&mut state, handle);
        }
    }

    fn arm_idle_timer(self: &Arc<Self>, state: &mut SessionState, handle: &Handle) {
        state.cancel_idle_timer();
        let epoch = state.timer_epoch;
        let delay = self.config.idle_timeout;
        let session = Arc::downgrade(self);

        let task = handle.spawn(idle_shutdown(session, epoch, delay));
        state.idle_timer = Some(task.abort_handle());
    }
}

async fn idle_shutdown(session: Weak<SessionInner>, epoch: u64, delay: Duration) {
    tokio::time::sleep(delay).await;

    let Some(inner) = session.upgrade() else {
        return;
    };
    let browser = {
        let mut state = inner.lock_state();
        if state.timer_epoch != epoch || state.open_pages > 0 {
            return;
        }
        state.idle_timer = None;
        state.browser.take()
    };

    if let Some(browser) = browser {
        tracing::info!(idle_secs = delay.as_secs(), "Closing idle browser");
        if let Err(e) = browser.close().await {
            tracing::warn!(error = %e, "Failed to close idle browser");
        }
    }
}

/// Handle to the per-process browser session. Cheap to clone.
#[derive(Clone)]
pub struct BrowserSession {
    inner: Arc<SessionInner>,
}

impl BrowserSession {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                launcher,
                config,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Number of pages currently checked out.
    pub fn open_pages(&self) -> usize {
        self.inner.lock_state().open_pages
    }

    /// Whether a browser process is currently up.
    pub fn is_running(&self) -> bool {
        self.inner.lock_state().browser.is_some()
    }

    /// Launch the browser eagerly. With no pages open the idle timer starts
    /// immediately.
    pub async fn start(&self) -> Result<(), AppError> {
        let handle = current_handle()?;
        self.browser().await?;

        let mut state = self.inner.lock_state();
        if state.open_pages == 0 && state.idle_timer.is_none() {
            self.inner.arm_idle_timer(&mut state, &handle);
        }
        Ok(())
    }

    /// Return the running browser, joining or starting a launch if needed.
    async fn browser(&self) -> Result<Arc<dyn Browser>, AppError> {
        let launch = {
            let mut state = self.inner.lock_state();
            if let Some(browser) = &state.browser {
                return Ok(browser.clone());
            }
            match &state.launching {
                Some(launch) => launch.clone(),
                None => {
                    let launch = self.launch_future();
                    state.launching = Some(launch.clone());
                    launch
                }
            }
        };

        let result = launch.clone().await;

        let mut state = self.inner.lock_state();
        if state.launching.as_ref().is_some_and(|l| l.ptr_eq(&launch)) {
            state.launching = None;
            if let Ok(browser) = &result {
                state.browser = Some(browser.clone());
            }
            return result.map_err(AppError::LaunchFailure);
        }

        // Another waiter already settled this launch, or `shutdown` took it
        // over. Only the stored browser may be handed out.
        let browser = result.map_err(AppError::LaunchFailure)?;
        match &state.browser {
            Some(current) if Arc::ptr_eq(current, &browser) => Ok(browser),
            _ => Err(AppError::LaunchFailure(
                "browser session shut down during launch".into(),
            )),
        }
    }

    fn launch_future(&self) -> LaunchFuture {
        let launcher = self.inner.launcher.clone();
        async move {
            tracing::info!("Launching browser");
            let started = Instant::now();
            match launcher.launch().await {
                Ok(browser) => {
                    tracing::info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Browser launched"
                    );
                    Ok(browser)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Browser launch failed");
                    Err(match e {
                        AppError::LaunchFailure(message) => message,
                        other => other.to_string(),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Check out a fresh page with the baseline profile applied.
    ///
    /// The page slot is reserved before the browser is touched, so an idle
    /// shutdown can never race an acquisition in progress.
    pub async fn acquire(&self) -> Result<PageLease, AppError> {
        let handle = current_handle()?;
        let slot = {
            let mut state = self.inner.lock_state();
            state.cancel_idle_timer();
            state.open_pages += 1;
            PageSlot {
                session: self.inner.clone(),
                handle,
            }
        };

        let browser = self.browser().await?;
        let page = browser.new_page().await?;

        let profile = &self.inner.config.profile;
        let applied = futures::try_join!(
            page.set_user_agent(&profile.user_agent),
            page.set_extra_headers(&profile.extra_headers),
        );
        if let Err(e) = applied {
            close_page(page.as_ref()).await;
            return Err(e);
        }

        tracing::debug!(open_pages = self.open_pages(), "Page acquired");
        Ok(PageLease {
            page,
            slot: Some(slot),
        })
    }

    /// Run `f` against a freshly acquired page, releasing it on every exit
    /// path. Errors from `f` are returned after the release.
    pub async fn with_page<F, Fut, T>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(Arc<dyn Page>) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let lease = self.acquire().await?;
        let result = f(lease.page().clone()).await;
        if let Err(e) = lease.release().await {
            tracing::warn!(error = %e, "Failed to close page");
        }
        result
    }

    /// Cancel the idle timer and close the browser now. Pages still checked
    /// out become unusable. A launch in progress is awaited and its browser
    /// closed; callers waiting on it get a `LaunchFailure`.
    pub async fn shutdown(&self) -> Result<(), AppError> {
        let (browser, launching) = {
            let mut state = self.inner.lock_state();
            state.cancel_idle_timer();
            (state.browser.take(), state.launching.take())
        };
        let browser = match (browser, launching) {
            (Some(browser), _) => Some(browser),
            (None, Some(launch)) => launch.await.ok(),
            (None, None) => None,
        };

        if let Some(browser) = browser {
            tracing::info!("Shutting down browser");
            browser.close().await?;
        }
        Ok(())
    }
}

fn current_handle() -> Result<Handle, AppError> {
    Handle::try_current().map_err(|e| AppError::Generic(format!("No tokio runtime: {e}")))
}

async fn close_page(page: &dyn Page) {
    if let Err(e) = page.close().await {
        tracing::warn!(error = %e, "Failed to close page");
    }
}

/// One unit of the open-page count. Dropping it gives the unit back.
struct PageSlot {
    session: Arc<SessionInner>,
    handle: Handle,
}

impl Drop for PageSlot {
    fn drop(&mut self) {
        self.session.release_slot(&self.handle);
    }
}

/// A checked-out page.
///
/// Prefer [`PageLease::release`]. A lease dropped without it (for example
/// when the request future is cancelled) closes the page in the background
/// and still gives back its slot.
pub struct PageLease {
    page: Arc<dyn Page>,
    slot: Option<PageSlot>,
}

impl PageLease {
    pub fn page(&self) -> &Arc<dyn Page> {
        &self.page
    }

    /// Close the page, then give back its slot.
    pub async fn release(mut self) -> Result<(), AppError> {
        let closed = self.page.close().await;
        self.slot.take();
        closed
    }
}

impl Deref for PageLease {
    type Target = dyn Page;

    fn deref(&self) -> &Self::Target {
        self.page.as_ref()
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            let page = self.page.clone();
            let handle = slot.handle.clone();
            handle.spawn(async move {
                close_page(page.as_ref()).await;
                drop(slot);
            });
        }
    }
}
