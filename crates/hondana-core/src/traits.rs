use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::AppError;
use crate::models::{ApiImage, Chapter, ItemKind, Manga, NavigationTarget, SearchResults};

/// A single browser tab.
///
/// Pages are handed out by [`crate::session::BrowserSession`] and must never be
/// retained past the scoped operation that acquired them.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate and wait until the network is mostly idle.
    async fn goto(&self, url: &str) -> Result<(), AppError>;

    /// Wait for `selector` to match an element, giving up after `timeout`.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), AppError>;

    /// Fully rendered DOM.
    async fn content(&self) -> Result<String, AppError>;

    /// Evaluate a JavaScript expression and return its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, AppError>;

    /// PNG screenshot of the whole page.
    async fn screenshot(&self) -> Result<Vec<u8>, AppError>;

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), AppError>;

    async fn set_extra_headers(&self, headers: &[(String, String)]) -> Result<(), AppError>;

    async fn close(&self) -> Result<(), AppError>;
}

/// A running browser process that can open pages.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_page(&self) -> Result<Arc<dyn Page>, AppError>;

    /// Terminate the browser process.
    async fn close(&self) -> Result<(), AppError>;
}

/// Starts browser processes. The slow, one-time part of a session.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn Browser>, AppError>;
}

/// A source adapter: the site-specific half of the retrieval contract.
///
/// Each operation comes as a pair. The `*_target` method returns where the
/// browser should navigate (or `None` when the adapter fetches content
/// itself), and the extraction method turns the loaded page (if any) into a
/// result. Operations a source does not support keep the default
/// "not implemented" failure.
#[async_trait]
pub trait Source: Send + Sync {
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn nsfw(&self) -> bool {
        false
    }

    async fn search_target(&self, _query: &str) -> Result<Option<NavigationTarget>, AppError> {
        Err(self.not_implemented("Search"))
    }

    async fn search(&self, _query: &str, _page: Option<&dyn Page>) -> Result<SearchResults, AppError> {
        Err(self.not_implemented("Search"))
    }

    async fn manga_target(&self, _manga: &str) -> Result<Option<NavigationTarget>, AppError> {
        Err(self.not_implemented("Manga"))
    }

    async fn manga(&self, _manga: &str, _page: Option<&dyn Page>) -> Result<Option<Manga>, AppError> {
        Err(self.not_implemented("Manga"))
    }

    async fn chapters_target(&self, _manga: &str) -> Result<Option<NavigationTarget>, AppError> {
        Err(self.not_implemented("Chapters"))
    }

    async fn chapters(&self, _manga: &str, _page: Option<&dyn Page>) -> Result<Vec<Chapter>, AppError> {
        Err(self.not_implemented("Chapters"))
    }

    async fn chapter_target(
        &self,
        _manga: &str,
        _chapter: &str,
    ) -> Result<Option<NavigationTarget>, AppError> {
        Err(self.not_implemented("Chapter"))
    }

    async fn chapter_pages(
        &self,
        _manga: &str,
        _chapter: &str,
        _page: Option<&dyn Page>,
    ) -> Result<Vec<ApiImage>, AppError> {
        Err(self.not_implemented("Chapter"))
    }

    fn not_implemented(&self, operation: &'static str) -> AppError {
        AppError::NotImplemented {
            source_id: self.id().to_string(),
            operation,
        }
    }
}

/// Response body streamed straight into a file cache.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Plain HTTP access, for adapters that extract without a browser and for
/// mirroring upstream images.
pub trait Fetcher: Send + Sync + Clone + 'static {
    /// GET `url` with extra request headers and return the body as text.
    fn fetch(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> impl Future<Output = Result<String, AppError>> + Send;

    /// GET `url` with extra request headers and stream the body.
    fn fetch_stream(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> impl Future<Output = Result<ByteStream, AppError>> + Send;
}

/// Persistent, cross-process cache of extracted results keyed by
/// `(source, id, kind)`.
pub trait ItemCache: Send + Sync + Clone + 'static {
    /// Drop entries of this `(source, kind)` older than `ttl`, then look up
    /// the exact key. Returns the stored JSON payload.
    fn get(
        &self,
        source: &str,
        id: &str,
        kind: ItemKind,
        ttl: Duration,
    ) -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    /// Insert or replace the payload stored under `(source, id, kind)`.
    fn put(
        &self,
        source: &str,
        id: &str,
        kind: ItemKind,
        payload: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A no-op ItemCache for use when persistence is not needed.
#[derive(Debug, Clone)]
pub struct NullItemCache;

impl ItemCache for NullItemCache {
    async fn get(
        &self,
        _source: &str,
        _id: &str,
        _kind: ItemKind,
        _ttl: Duration,
    ) -> Result<Option<String>, AppError> {
        Ok(None)
    }

    async fn put(
        &self,
        _source: &str,
        _id: &str,
        _kind: ItemKind,
        _payload: &str,
    ) -> Result<(), AppError> {
        Ok(())
    }
}
