//! Cache-aside retrieval: persistent cache → navigate (or extract directly)
//! → adapter extraction → deferred cache write.
//!
//! Failures abort only the request at hand and are never retried here. The
//! page acquired for a navigation is released on every exit path, and a
//! failed cache write is logged without affecting the response.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::task::TaskTracker;

use crate::error::AppError;
use crate::file_cache::{ContentCaches, RESPONSE_TTL, to_pretty_json};
use crate::models::{
    ApiImage, Cacheable, Chapter, ItemKind, Manga, NavigationTarget, ResponseEnvelope,
    SearchResults, SourceInfo, TtlPolicy, chapter_key, normalize_chapter_id, normalize_query,
    response_cache_key,
};
use crate::registry::SourceRegistry;
use crate::session::BrowserSession;
use crate::traits::{ItemCache, Page, Source};

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub ttl: TtlPolicy,
    /// Upper bound on waiting for a readiness selector after navigation.
    pub selector_timeout: Duration,
    /// Freshness of full chapter responses in the JSON file cache.
    pub response_ttl: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            ttl: TtlPolicy::default(),
            selector_timeout: Duration::from_secs(30),
            response_ttl: RESPONSE_TTL,
        }
    }
}

/// A full chapter response body, either already on disk or freshly built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterResponse {
    Cached(PathBuf),
    Fresh(Vec<u8>),
}

/// One of the four adapter operations, bound to its request arguments.
#[async_trait]
trait Operation: Send + Sync {
    type Output: Serialize + DeserializeOwned + Cacheable + Send;

    const KIND: ItemKind;

    /// Key of the result in the persistent cache.
    fn cache_key(&self) -> String;

    async fn target(&self, source: &dyn Source) -> Result<Option<NavigationTarget>, AppError>;

    async fn extract(
        &self,
        source: &dyn Source,
        page: Option<&dyn Page>,
    ) -> Result<Self::Output, AppError>;
}

struct SearchOp {
    query: String,
}

#[async_trait]
impl Operation for SearchOp {
    type Output = SearchResults;
    const KIND: ItemKind = ItemKind::Search;

    fn cache_key(&self) -> String {
        self.query.clone()
    }

    async fn target(&self, source: &dyn Source) -> Result<Option<NavigationTarget>, AppError> {
        source.search_target(&self.query).await
    }

    async fn extract(
        &self,
        source: &dyn Source,
        page: Option<&dyn Page>,
    ) -> Result<SearchResults, AppError> {
        source.search(&self.query, page).await
    }
}

struct MangaOp {
    manga: String,
}

#[async_trait]
impl Operation for MangaOp {
    type Output = Option<Manga>;
    const KIND: ItemKind = ItemKind::Manga;

    fn cache_key(&self) -> String {
        self.manga.clone()
    }

    async fn target(&self, source: &dyn Source) -> Result<Option<NavigationTarget>, AppError> {
        source.manga_target(&self.manga).await
    }

    async fn extract(
        &self,
        source: &dyn Source,
        page: Option<&dyn Page>,
    ) -> Result<Option<Manga>, AppError> {
        source.manga(&self.manga, page).await
    }
}

struct ChaptersOp {
    manga: String,
}

#[async_trait]
impl Operation for ChaptersOp {
    type Output = Vec<Chapter>;
    const KIND: ItemKind = ItemKind::Chapters;

    fn cache_key(&self) -> String {
        self.manga.clone()
    }

    async fn target(&self, source: &dyn Source) -> Result<Option<NavigationTarget>, AppError> {
        source.chapters_target(&self.manga).await
    }

    async fn extract(
        &self,
        source: &dyn Source,
        page: Option<&dyn Page>,
    ) -> Result<Vec<Chapter>, AppError> {
        source.chapters(&self.manga, page).await
    }
}

struct ChapterOp {
    manga: String,
    chapter: String,
}

#[async_trait]
impl Operation for ChapterOp {
    type Output = Vec<ApiImage>;
    const KIND: ItemKind = ItemKind::Chapter;

    fn cache_key(&self) -> String {
        chapter_key(&self.manga, &self.chapter)
    }

    async fn target(&self, source: &dyn Source) -> Result<Option<NavigationTarget>, AppError> {
        source.chapter_target(&self.manga, &self.chapter).await
    }

    async fn extract(
        &self,
        source: &dyn Source,
        page: Option<&dyn Page>,
    ) -> Result<Vec<ApiImage>, AppError> {
        source.chapter_pages(&self.manga, &self.chapter, page).await
    }
}

/// Uniform retrieval over every registered source.
///
/// Generic over the persistent cache so tests can run against an in-memory
/// store and deployments without persistence can use
/// [`NullItemCache`](crate::traits::NullItemCache).
pub struct RetrievalService<S: ItemCache> {
    registry: SourceRegistry,
    session: BrowserSession,
    store: S,
    files: Option<ContentCaches>,
    config: RetrievalConfig,
    pending_writes: TaskTracker,
}

impl<S: ItemCache> RetrievalService<S> {
    pub fn new(registry: SourceRegistry, session: BrowserSession, store: S) -> Self {
        Self {
            registry,
            session,
            store,
            files: None,
            config: RetrievalConfig::default(),
            pending_writes: TaskTracker::new(),
        }
    }

    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable full-response caching for [`RetrievalService::chapter_response`].
    pub fn with_file_caches(mut self, files: ContentCaches) -> Self {
        self.files = Some(files);
        self
    }

    pub fn session(&self) -> &BrowserSession {
        &self.session
    }

    /// Registered sources, sorted by display name.
    pub fn sources(&self) -> Vec<SourceInfo> {
        self.registry.list()
    }

    pub async fn search(&self, source: &str, query: &str) -> Result<SearchResults, AppError> {
        let op = SearchOp {
            query: normalize_query(query),
        };
        self.retrieve(source, op).await
    }

    pub async fn manga(&self, source: &str, manga: &str) -> Result<Option<Manga>, AppError> {
        let op = MangaOp {
            manga: manga.trim().to_string(),
        };
        self.retrieve(source, op).await
    }

    pub async fn chapters(&self, source: &str, manga: &str) -> Result<Vec<Chapter>, AppError> {
        let op = ChaptersOp {
            manga: manga.trim().to_string(),
        };
        self.retrieve(source, op).await
    }

    /// Page images of one chapter. An empty chapter id means the first chapter.
    pub async fn chapter_pages(
        &self,
        source: &str,
        manga: &str,
        chapter: &str,
    ) -> Result<Vec<ApiImage>, AppError> {
        let op = ChapterOp {
            manga: manga.trim().to_string(),
            chapter: normalize_chapter_id(chapter),
        };
        self.retrieve(source, op).await
    }

    /// Full `{data, error}` body for a chapter, served from the JSON file
    /// cache when fresh. Bodies are only written back when the page list is
    /// non-empty.
    pub async fn chapter_response(
        &self,
        source: &str,
        manga: &str,
        chapter: &str,
    ) -> Result<ChapterResponse, AppError> {
        let manga = manga.trim();
        let chapter = normalize_chapter_id(chapter);
        let key = response_cache_key(source, manga, &chapter);

        if let Some(files) = &self.files
            && let Some(path) = files.cached_json(&key, self.config.response_ttl).await?
        {
            tracing::debug!(%key, "Response cache hit");
            return Ok(ChapterResponse::Cached(path));
        }

        let pages = self.chapter_pages(source, manga, &chapter).await?;
        let cacheable = pages.is_cacheable();
        let body = to_pretty_json(&ResponseEnvelope::ok(pages))?;

        if cacheable && let Some(files) = &self.files {
            if let Err(e) = files.requests.put(&key, &body, true).await {
                tracing::warn!(%key, error = %e, "Failed to cache response body");
            }
        }
        Ok(ChapterResponse::Fresh(body))
    }

    /// Wait for every deferred cache write issued so far.
    pub async fn flush(&self) {
        self.pending_writes.close();
        self.pending_writes.wait().await;
        self.pending_writes.reopen();
    }

    async fn retrieve<O: Operation>(&self, source_id: &str, op: O) -> Result<O::Output, AppError> {
        let source = self.registry.get(source_id)?;
        let kind = O::KIND;
        let key = op.cache_key();
        let ttl = self.config.ttl.for_kind(kind);

        if let Some(payload) = self.store.get(source_id, &key, kind, ttl).await? {
            match serde_json::from_str::<O::Output>(&payload) {
                Ok(value) => {
                    tracing::debug!(source = source_id, %kind, %key, "Cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(
                        source = source_id, %kind, %key, error = %e,
                        "Corrupt cached payload, fetching fresh"
                    );
                }
            }
        } else {
            tracing::debug!(source = source_id, %kind, %key, "Cache miss");
        }

        let target = op
            .target(source.as_ref())
            .await
            .map_err(|e| extraction_failure(source_id, &key, e))?;

        let result = match target {
            Some(target) => {
                let timeout = self.config.selector_timeout;
                let op = &op;
                let source = source.as_ref();
                self.session
                    .with_page(|page| async move {
                        navigate(page.as_ref(), &target, timeout).await?;
                        op.extract(source, Some(page.as_ref()))
                            .await
                            .map_err(|e| extraction_failure(source_id, &target.url, e))
                    })
                    .await
            }
            None => op
                .extract(source.as_ref(), None)
                .await
                .map_err(|e| extraction_failure(source_id, &key, e)),
        };

        let value = result.inspect_err(|e| {
            tracing::warn!(source = source_id, %kind, %key, error = %e, "Retrieval failed");
        })?;

        if value.is_cacheable() {
            self.store_deferred(source_id, key, kind, &value);
        }
        Ok(value)
    }

    /// Write a result to the persistent cache without delaying the response.
    fn store_deferred<T: Serialize>(&self, source_id: &str, key: String, kind: ItemKind, value: &T) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(source = source_id, %kind, %key, error = %e, "Failed to serialize result");
                return;
            }
        };

        let store = self.store.clone();
        let source_id = source_id.to_string();
        self.pending_writes.spawn(async move {
            if let Err(e) = store.put(&source_id, &key, kind, &payload).await {
                tracing::warn!(source = %source_id, %kind, %key, error = %e, "Failed to cache result");
            }
        });
    }
}

async fn navigate(page: &dyn Page, target: &NavigationTarget, timeout: Duration) -> Result<(), AppError> {
    tracing::debug!(url = %target.url, selector = %target.selector, "Navigating");
    page.goto(&target.url)
        .await
        .map_err(|e| navigation_failure(&target.url, e))?;
    page.wait_for_selector(&target.selector, timeout)
        .await
        .map_err(|e| navigation_failure(&target.url, e))
}

fn navigation_failure(url: &str, err: AppError) -> AppError {
    match err {
        AppError::NavigationFailure { .. } => err,
        other => AppError::NavigationFailure {
            url: url.to_string(),
            message: other.to_string(),
        },
    }
}

/// Attach source and target context to an adapter error.
fn extraction_failure(source_id: &str, target: &str, err: AppError) -> AppError {
    match err {
        AppError::NotImplemented { .. }
        | AppError::NavigationFailure { .. }
        | AppError::ExtractionFailure { .. } => err,
        other => AppError::ExtractionFailure {
            source_id: source_id.to_string(),
            target: target.to_string(),
            message: other.to_string(),
        },
    }
}
