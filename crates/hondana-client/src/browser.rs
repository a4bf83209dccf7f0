use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{BrowserConfig, Page as CdpPage};
use futures::StreamExt;
use hondana_core::error::AppError;
use hondana_core::traits::{Browser, BrowserLauncher, Page};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// How often a readiness selector is polled.
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Well-known Chrome/Chromium install locations, in order of preference.
const CHROME_CANDIDATES: &[&str] = &[
    "/snap/chromium/current/usr/lib/chromium-browser/chrome",
    "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
];

/// Launches Chromium over the Chrome DevTools Protocol.
///
/// Requires a Chromium / Chrome binary: the one given to
/// [`ChromiumLauncher::with_chrome_bin`], one of the well-known install
/// locations, or whatever `chromiumoxide` finds on its own.
///
/// Navigation waits for the page load to settle. A hard limit on top of that
/// is opt-in through [`ChromiumLauncher::with_navigation_timeout`].
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    headful: bool,
    chrome_bin: Option<PathBuf>,
    navigation_timeout: Option<Duration>,
}

impl ChromiumLauncher {
    /// Headless launcher without a navigation time limit.
    pub fn new() -> Self {
        Self {
            headful: false,
            chrome_bin: None,
            navigation_timeout: None,
        }
    }

    /// Show the browser window (debugging).
    pub fn headful(mut self, headful: bool) -> Self {
        self.headful = headful;
        self
    }

    pub fn with_chrome_bin(mut self, bin: Option<PathBuf>) -> Self {
        self.chrome_bin = bin;
        self
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = Some(timeout);
        self
    }

    /// Tries to locate the real Chrome/Chromium binary.
    ///
    /// On systems where Chromium is installed via **snap**, the wrapper at
    /// `/snap/bin/chromium` strips unknown CLI flags, breaking headless mode,
    /// so the real binary inside the snap is preferred.
    fn find_chrome_binary(&self) -> Option<PathBuf> {
        if let Some(bin) = &self.chrome_bin
            && bin.exists()
        {
            return Some(bin.clone());
        }

        CHROME_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
    }

    fn config(&self) -> Result<BrowserConfig, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        if let Some(bin) = self.find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        if self.headful {
            builder = builder.with_head();
        } else {
            builder = builder.arg("--headless=new");
        }

        builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::LaunchFailure(format!("Browser config error: {e}")))
    }
}

impl Default for ChromiumLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn Browser>, AppError> {
        let config = self.config()?;
        let (browser, mut handler) = chromiumoxide::Browser::launch(config)
            .await
            .map_err(|e| AppError::LaunchFailure(e.to_string()))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Arc::new(ChromiumBrowser {
            browser: Mutex::new(browser),
            handler,
            navigation_timeout: self.navigation_timeout,
        }))
    }
}

/// A running Chromium process.
pub struct ChromiumBrowser {
    browser: Mutex<chromiumoxide::Browser>,
    handler: JoinHandle<()>,
    navigation_timeout: Option<Duration>,
}

#[async_trait]
impl Browser for ChromiumBrowser {
    async fn new_page(&self) -> Result<Arc<dyn Page>, AppError> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::Generic(format!("Failed to open page: {e}")))?;

        Ok(Arc::new(ChromiumPage {
            page,
            navigation_timeout: self.navigation_timeout,
        }))
    }

    async fn close(&self) -> Result<(), AppError> {
        let mut browser = self.browser.lock().await;
        let closed = browser
            .close()
            .await
            .map_err(|e| AppError::Generic(format!("Failed to close browser: {e}")));
        if let Err(e) = browser.wait().await {
            tracing::warn!(error = %e, "Failed to reap browser process");
        }
        self.handler.abort();
        closed.map(|_| ())
    }
}

/// One Chromium tab.
pub struct ChromiumPage {
    page: CdpPage,
    navigation_timeout: Option<Duration>,
}

impl ChromiumPage {
    async fn current_url(&self) -> String {
        match self.page.url().await {
            Ok(Some(url)) => url,
            _ => "about:blank".to_string(),
        }
    }
}

#[async_trait]
impl Page for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<(), AppError> {
        let navigation = self.page.goto(url);
        let outcome = match self.navigation_timeout {
            Some(limit) => match tokio::time::timeout(limit, navigation).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(AppError::NavigationFailure {
                        url: url.to_string(),
                        message: format!("timed out after {} seconds", limit.as_secs()),
                    });
                }
            },
            None => navigation.await,
        };

        outcome
            .map(|_| ())
            .map_err(|e| AppError::NavigationFailure {
                url: url.to_string(),
                message: e.to_string(),
            })
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), AppError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::NavigationFailure {
                    url: self.current_url().await,
                    message: format!(
                        "selector '{selector}' did not appear within {} seconds",
                        timeout.as_secs()
                    ),
                });
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    async fn content(&self) -> Result<String, AppError> {
        self.page
            .content()
            .await
            .map_err(|e| AppError::Generic(format!("Failed to read page content: {e}")))
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, AppError> {
        let result = self
            .page
            .evaluate(expression)
            .await
            .map_err(|e| AppError::Generic(format!("Evaluation failed: {e}")))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AppError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        self.page
            .screenshot(params)
            .await
            .map_err(|e| AppError::Generic(format!("Screenshot failed: {e}")))
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), AppError> {
        self.page
            .execute(SetUserAgentOverrideParams::new(user_agent))
            .await
            .map_err(|e| AppError::Generic(format!("Failed to set user agent: {e}")))?;
        Ok(())
    }

    async fn set_extra_headers(&self, headers: &[(String, String)]) -> Result<(), AppError> {
        let map: serde_json::Map<String, serde_json::Value> = headers
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        self.page
            .execute(SetExtraHttpHeadersParams::new(Headers::new(
                serde_json::Value::Object(map),
            )))
            .await
            .map_err(|e| AppError::Generic(format!("Failed to set headers: {e}")))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| AppError::Generic(format!("Failed to close page: {e}")))
    }
}
