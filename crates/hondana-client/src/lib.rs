#[cfg(feature = "browser")]
pub mod browser;
pub mod fetcher;
pub mod mirror;

#[cfg(feature = "browser")]
pub use browser::{ChromiumBrowser, ChromiumLauncher, ChromiumPage};
pub use fetcher::ReqwestFetcher;
pub use mirror::PageMirror;
