use std::time::Duration;

use futures::TryStreamExt;
use hondana_core::error::AppError;
use hondana_core::session::DEFAULT_USER_AGENT;
use hondana_core::traits::{ByteStream, Fetcher};
use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use tokio_util::io::StreamReader;

/// HTTP fetcher using reqwest.
///
/// Presents itself as the same desktop Chrome the browser session uses, so
/// sources that check user agents treat both paths alike.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-GB,en;q=0.9"));

        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }

    async fn send(&self, url: &str, headers: &[(String, String)]) -> Result<Response, AppError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }
        Ok(response)
    }

    fn map_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else {
            AppError::HttpError(e.to_string())
        }
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, headers: &[(String, String)]) -> Result<String, AppError> {
        self.send(url, headers)
            .await?
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))
    }

    async fn fetch_stream(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<ByteStream, AppError> {
        let response = self.send(url, headers).await?;
        tracing::debug!(%url, length = ?response.content_length(), "Streaming response");

        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }
}
