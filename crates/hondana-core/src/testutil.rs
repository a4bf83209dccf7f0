//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests. State is shared
//! through `Arc` so a test keeps a clone for assertions after handing the
//! mock to the code under test.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::{ApiImage, Chapter, ItemKind, Manga, NavigationTarget, SearchResults};
use crate::traits::{Browser, BrowserLauncher, ItemCache, Page, Source};

// ---------------------------------------------------------------------------
// MockPage
// ---------------------------------------------------------------------------

/// Page that records what was done to it.
pub struct MockPage {
    navigations: Mutex<Vec<String>>,
    user_agent: Mutex<Option<String>>,
    extra_headers: Mutex<Vec<(String, String)>>,
    missing_selectors: Vec<String>,
    closed: AtomicBool,
}

impl MockPage {
    fn new(missing_selectors: Vec<String>) -> Self {
        Self {
            navigations: Mutex::new(Vec::new()),
            user_agent: Mutex::new(None),
            extra_headers: Mutex::new(Vec::new()),
            missing_selectors,
            closed: AtomicBool::new(false),
        }
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn user_agent(&self) -> Option<String> {
        self.user_agent.lock().unwrap().clone()
    }

    pub fn extra_headers(&self) -> Vec<(String, String)> {
        self.extra_headers.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Page for MockPage {
    async fn goto(&self, url: &str) -> Result<(), AppError> {
        self.navigations.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), AppError> {
        if self.missing_selectors.iter().any(|s| s == selector) {
            return Err(AppError::Timeout(timeout.as_secs()));
        }
        Ok(())
    }

    async fn content(&self) -> Result<String, AppError> {
        Ok("<html><body><div class=\"ready\"></div></body></html>".to_string())
    }

    async fn evaluate(&self, _expression: &str) -> Result<serde_json::Value, AppError> {
        Ok(serde_json::Value::Null)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AppError> {
        Ok(b"\x89PNG".to_vec())
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), AppError> {
        *self.user_agent.lock().unwrap() = Some(user_agent.to_string());
        Ok(())
    }

    async fn set_extra_headers(&self, headers: &[(String, String)]) -> Result<(), AppError> {
        *self.extra_headers.lock().unwrap() = headers.to_vec();
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockBrowser
// ---------------------------------------------------------------------------

pub struct MockBrowser {
    pages: Mutex<Vec<Arc<MockPage>>>,
    missing_selectors: Vec<String>,
    closed: AtomicBool,
}

impl MockBrowser {
    pub fn pages_opened(&self) -> usize {
        self.pages.lock().unwrap().len()
    }

    pub fn page(&self, index: usize) -> Arc<MockPage> {
        self.pages.lock().unwrap()[index].clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Browser for MockBrowser {
    async fn new_page(&self) -> Result<Arc<dyn Page>, AppError> {
        if self.is_closed() {
            return Err(AppError::Generic("browser is closed".into()));
        }
        let page = Arc::new(MockPage::new(self.missing_selectors.clone()));
        self.pages.lock().unwrap().push(page.clone());
        Ok(page)
    }

    async fn close(&self) -> Result<(), AppError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockLauncher
// ---------------------------------------------------------------------------

/// Launcher that counts launches and keeps every browser it created.
#[derive(Clone, Default)]
pub struct MockLauncher {
    launches: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
    delay: Duration,
    missing_selectors: Vec<String>,
    browsers: Arc<Mutex<Vec<Arc<MockBrowser>>>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each launch takes this long.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The first `n` launches fail.
    pub fn failing(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Pages never match this selector.
    pub fn with_missing_selector(mut self, selector: &str) -> Self {
        self.missing_selectors.push(selector.to_string());
        self
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn browsers(&self) -> Vec<Arc<MockBrowser>> {
        self.browsers.lock().unwrap().clone()
    }

    /// Every URL navigated to, across all browsers and pages.
    pub fn navigations(&self) -> Vec<String> {
        self.browsers()
            .iter()
            .flat_map(|b| b.pages.lock().unwrap().clone())
            .flat_map(|p| p.navigations())
            .collect()
    }

    /// Pages opened and not yet closed.
    pub fn open_page_count(&self) -> usize {
        self.browsers()
            .iter()
            .flat_map(|b| b.pages.lock().unwrap().clone())
            .filter(|p| !p.is_closed())
            .count()
    }
}

#[async_trait]
impl BrowserLauncher for MockLauncher {
    async fn launch(&self) -> Result<Arc<dyn Browser>, AppError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(AppError::LaunchFailure("chrome not found".into()));
        }

        let browser = Arc::new(MockBrowser {
            pages: Mutex::new(Vec::new()),
            missing_selectors: self.missing_selectors.clone(),
            closed: AtomicBool::new(false),
        });
        self.browsers.lock().unwrap().push(browser.clone());
        Ok(browser)
    }
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

/// Source adapter with canned results.
///
/// Without [`MockSource::navigating`] every operation extracts directly;
/// with it, every operation navigates under the given base URL and waits
/// for [`MockSource::READY_SELECTOR`].
#[derive(Clone)]
pub struct MockSource {
    id: String,
    name: String,
    nsfw: bool,
    base_url: Option<String>,
    supports_search: bool,
    search: SearchResults,
    manga: Option<Manga>,
    chapters: Vec<Chapter>,
    pages: Vec<ApiImage>,
    error: Arc<Mutex<Option<AppError>>>,
    extractions: Arc<AtomicUsize>,
    saw_page: Arc<AtomicBool>,
    last_argument: Arc<Mutex<Option<String>>>,
}

impl MockSource {
    pub const READY_SELECTOR: &'static str = ".ready";

    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            nsfw: false,
            base_url: None,
            supports_search: true,
            search: SearchResults::default(),
            manga: None,
            chapters: Vec::new(),
            pages: Vec::new(),
            error: Arc::new(Mutex::new(None)),
            extractions: Arc::new(AtomicUsize::new(0)),
            saw_page: Arc::new(AtomicBool::new(false)),
            last_argument: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_nsfw(mut self) -> Self {
        self.nsfw = true;
        self
    }

    pub fn navigating(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.to_string());
        self
    }

    pub fn without_search(mut self) -> Self {
        self.supports_search = false;
        self
    }

    pub fn with_search(mut self, results: SearchResults) -> Self {
        self.search = results;
        self
    }

    pub fn with_manga(mut self, manga: Manga) -> Self {
        self.manga = Some(manga);
        self
    }

    pub fn with_chapters(mut self, chapters: Vec<Chapter>) -> Self {
        self.chapters = chapters;
        self
    }

    pub fn with_pages(mut self, pages: Vec<ApiImage>) -> Self {
        self.pages = pages;
        self
    }

    /// The next extraction fails with `error`.
    pub fn with_error(self, error: AppError) -> Self {
        *self.error.lock().unwrap() = Some(error);
        self
    }

    pub fn extract_count(&self) -> usize {
        self.extractions.load(Ordering::SeqCst)
    }

    /// Whether any extraction was handed a page.
    pub fn saw_page(&self) -> bool {
        self.saw_page.load(Ordering::SeqCst)
    }

    /// First argument of the most recent extraction.
    pub fn last_argument(&self) -> Option<String> {
        self.last_argument.lock().unwrap().clone()
    }

    fn target(&self, path: String) -> Option<NavigationTarget> {
        self.base_url
            .as_ref()
            .map(|base| NavigationTarget::new(format!("{base}/{path}"), Self::READY_SELECTOR))
    }

    fn record(&self, argument: &str, page: Option<&dyn Page>) -> Result<(), AppError> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        if page.is_some() {
            self.saw_page.store(true, Ordering::SeqCst);
        }
        *self.last_argument.lock().unwrap() = Some(argument.to_string());
        match self.error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Source for MockSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn nsfw(&self) -> bool {
        self.nsfw
    }

    async fn search_target(&self, query: &str) -> Result<Option<NavigationTarget>, AppError> {
        if !self.supports_search {
            return Err(self.not_implemented("Search"));
        }
        Ok(self.target(format!("search/{query}")))
    }

    async fn search(&self, query: &str, page: Option<&dyn Page>) -> Result<SearchResults, AppError> {
        self.record(query, page)?;
        Ok(self.search.clone())
    }

    async fn manga_target(&self, manga: &str) -> Result<Option<NavigationTarget>, AppError> {
        Ok(self.target(format!("manga/{manga}")))
    }

    async fn manga(&self, manga: &str, page: Option<&dyn Page>) -> Result<Option<Manga>, AppError> {
        self.record(manga, page)?;
        Ok(self.manga.clone())
    }

    async fn chapters_target(&self, manga: &str) -> Result<Option<NavigationTarget>, AppError> {
        Ok(self.target(format!("manga/{manga}/chapters")))
    }

    async fn chapters(&self, manga: &str, page: Option<&dyn Page>) -> Result<Vec<Chapter>, AppError> {
        self.record(manga, page)?;
        Ok(self.chapters.clone())
    }

    async fn chapter_target(
        &self,
        manga: &str,
        chapter: &str,
    ) -> Result<Option<NavigationTarget>, AppError> {
        Ok(self.target(format!("manga/{manga}/{chapter}")))
    }

    async fn chapter_pages(
        &self,
        manga: &str,
        _chapter: &str,
        page: Option<&dyn Page>,
    ) -> Result<Vec<ApiImage>, AppError> {
        self.record(manga, page)?;
        Ok(self.pages.clone())
    }
}

// ---------------------------------------------------------------------------
// MockItemCache
// ---------------------------------------------------------------------------

type ItemKey = (String, String, ItemKind);

/// In-memory item cache. Ignores TTLs; records every get and put.
#[derive(Clone, Default)]
pub struct MockItemCache {
    entries: Arc<Mutex<HashMap<ItemKey, String>>>,
    gets: Arc<Mutex<Vec<(String, String, ItemKind, Duration)>>>,
    puts: Arc<Mutex<Vec<(String, String, ItemKind, String)>>>,
    get_error: Arc<Mutex<Option<AppError>>>,
    put_error: Arc<Mutex<Option<AppError>>>,
}

impl MockItemCache {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The next `get` fails.
    pub fn with_get_error(error: AppError) -> Self {
        let cache = Self::default();
        *cache.get_error.lock().unwrap() = Some(error);
        cache
    }

    /// The next `put` fails.
    pub fn with_put_error(error: AppError) -> Self {
        let cache = Self::default();
        *cache.put_error.lock().unwrap() = Some(error);
        cache
    }

    pub fn insert(&self, source: &str, id: &str, kind: ItemKind, payload: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert((source.to_string(), id.to_string(), kind), payload.to_string());
    }

    pub fn gets(&self) -> Vec<(String, String, ItemKind, Duration)> {
        self.gets.lock().unwrap().clone()
    }

    pub fn puts(&self) -> Vec<(String, String, ItemKind, String)> {
        self.puts.lock().unwrap().clone()
    }
}

impl ItemCache for MockItemCache {
    async fn get(
        &self,
        source: &str,
        id: &str,
        kind: ItemKind,
        ttl: Duration,
    ) -> Result<Option<String>, AppError> {
        self.gets
            .lock()
            .unwrap()
            .push((source.to_string(), id.to_string(), kind, ttl));
        if let Some(e) = self.get_error.lock().unwrap().take() {
            return Err(e);
        }
        let key = (source.to_string(), id.to_string(), kind);
        Ok(self.entries.lock().unwrap().get(&key).cloned())
    }

    async fn put(
        &self,
        source: &str,
        id: &str,
        kind: ItemKind,
        payload: &str,
    ) -> Result<(), AppError> {
        if let Some(e) = self.put_error.lock().unwrap().take() {
            return Err(e);
        }
        self.puts.lock().unwrap().push((
            source.to_string(),
            id.to_string(),
            kind,
            payload.to_string(),
        ));
        self.insert(source, id, kind, payload);
        Ok(())
    }
}
