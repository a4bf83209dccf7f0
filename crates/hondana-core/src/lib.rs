pub mod config;
pub mod error;
pub mod file_cache;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::RuntimeConfig;
pub use error::AppError;
pub use file_cache::{ContentCache, ContentCaches};
pub use models::{ItemKind, NavigationTarget, TtlPolicy};
pub use pipeline::{ChapterResponse, RetrievalConfig, RetrievalService};
pub use registry::SourceRegistry;
pub use session::{BrowserSession, PageLease, PageProfile, SessionConfig};
pub use traits::{
    Browser, BrowserLauncher, ByteStream, Fetcher, ItemCache, NullItemCache, Page, Source,
};
