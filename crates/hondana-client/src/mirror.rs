use std::path::PathBuf;

use hondana_core::error::AppError;
use hondana_core::file_cache::ContentCaches;
use hondana_core::models::ProxyData;
use hondana_core::traits::Fetcher;

/// Serves page images from the local page cache, pulling them from the
/// upstream location recorded in the proxy cache on first request.
#[derive(Clone)]
pub struct PageMirror<F: Fetcher> {
    caches: ContentCaches,
    fetcher: F,
}

impl<F: Fetcher> PageMirror<F> {
    pub fn new(caches: ContentCaches, fetcher: F) -> Self {
        Self { caches, fetcher }
    }

    /// Record where the image for `id` lives upstream.
    pub async fn register(&self, id: &str, proxy: &ProxyData) -> Result<(), AppError> {
        self.caches.store_proxy(id, proxy).await?;
        Ok(())
    }

    /// Local path of the image for `id`, mirroring it first if only its
    /// proxy record exists. `None` when neither is known.
    pub async fn resolve(&self, id: &str) -> Result<Option<PathBuf>, AppError> {
        if let Some(path) = self.caches.cached_blob(id).await? {
            return Ok(Some(path));
        }

        let Some(proxy) = self.caches.load_proxy(id).await? else {
            return Ok(None);
        };

        tracing::info!(%id, url = %proxy.url, "Mirroring page image");
        let headers: Vec<(String, String)> = proxy.headers.into_iter().collect();
        let body = self.fetcher.fetch_stream(&proxy.url, &headers).await?;
        self.caches.pages.put_stream(id, body, false).await?;

        self.caches.cached_blob(id).await
    }
}
