/// Smoke-test for the browser session with a real Chromium.
///
/// Acquires a page through `BrowserSession`, renders <https://example.com>,
/// waits for its `<h1>`, and verifies the rendered HTML and a screenshot.
///
/// Run with:
///   cargo run -p hondana-client --example session_smoke --features browser
use std::sync::Arc;
use std::time::Duration;

use hondana_client::ChromiumLauncher;
use hondana_core::{AppError, BrowserSession, RuntimeConfig, SessionConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let runtime = RuntimeConfig::from_env()?;
    let launcher = ChromiumLauncher::new()
        .headful(runtime.headful)
        .with_chrome_bin(runtime.chrome_bin);
    let session = BrowserSession::new(Arc::new(launcher), SessionConfig::default());

    let url = "https://example.com";
    println!("Rendering {url}...");
    let (html, png) = session
        .with_page(|page| async move {
            page.goto(url).await?;
            page.wait_for_selector("h1", Duration::from_secs(10)).await?;
            Ok::<_, AppError>((page.content().await?, page.screenshot().await?))
        })
        .await?;

    assert!(
        html.contains("Example Domain"),
        "Expected heading not found in rendered HTML"
    );
    assert!(png.starts_with(b"\x89PNG"), "Screenshot is not a PNG");
    assert_eq!(session.open_pages(), 0);

    println!("OK: got {} bytes of rendered HTML, {} byte screenshot", html.len(), png.len());
    session.shutdown().await?;
    Ok(())
}
