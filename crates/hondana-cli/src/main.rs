use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hondana_client::{PageMirror, ReqwestFetcher};
use hondana_core::file_cache::{ContentCaches, RESPONSE_TTL};
use hondana_core::models::{ItemKind, TtlPolicy, normalize_chapter_id, response_cache_key};
use hondana_core::traits::ItemCache;
use hondana_core::RuntimeConfig;
use hondana_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "hondana", version, about = "Manga aggregator cache and browser tooling")]
struct Cli {
    /// SQLite file of the structured cache
    #[arg(long, env = "HONDANA_DB_PATH", global = true)]
    db_path: Option<PathBuf>,

    /// Root of the file caches
    #[arg(long, env = "HONDANA_CACHE_DIR", global = true)]
    cache_dir: Option<PathBuf>,

    /// Disable structured-cache writes (same as HONDANA_NO_CACHE=true)
    #[arg(long, global = true, default_value_t = false)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Primary bootstrap: create the schema, checkpoint, prepare cache directories
    Init {
        /// Keep running the WAL checkpoint monitor until Ctrl-C
        #[arg(long, default_value_t = false)]
        watch: bool,
    },

    /// Read or write structured-cache entries
    Item {
        #[command(subcommand)]
        action: ItemAction,
    },

    /// Delete every structured-cache entry older than its kind's TTL
    Prune,

    /// Force a WAL checkpoint
    Checkpoint,

    /// Print the path of a cached page image
    Blob {
        /// Opaque image id
        id: String,
    },

    /// Print the path of a cached chapter response
    Json {
        source: String,
        manga: String,
        /// Chapter id (defaults to the first chapter)
        #[arg(default_value = "")]
        chapter: String,

        /// Freshness window in seconds
        #[arg(long, default_value_t = RESPONSE_TTL.as_secs())]
        ttl_secs: u64,
    },

    /// Resolve a page image, mirroring it from its proxy record if needed
    Mirror {
        /// Opaque image id
        id: String,
    },

    /// Render a URL through the browser session and print the HTML
    #[cfg(feature = "browser")]
    Render {
        url: String,

        /// Readiness selector to wait for
        #[arg(default_value = "body")]
        selector: String,

        /// Selector timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,

        /// Also store a full-page screenshot in the page cache
        #[arg(long, default_value_t = false)]
        screenshot: bool,
    },
}

#[derive(Subcommand)]
enum ItemAction {
    /// Look up an entry (expired entries of the same source and kind are dropped first)
    Get {
        source: String,
        id: String,
        /// search, manga, chapters or chapter
        kind: ItemKind,

        /// Freshness window in seconds (defaults to the kind's TTL)
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Insert or replace an entry
    Put {
        source: String,
        id: String,
        kind: ItemKind,
        /// JSON payload
        payload: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hondana=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut runtime = RuntimeConfig::from_env()?;
    if let Some(dir) = &cli.cache_dir {
        runtime.cache_dir = dir.clone();
    }
    let mut db_config = DatabaseConfig::from_env()?;
    if let Some(path) = &cli.db_path {
        db_config.path = path.clone();
    }
    if cli.no_cache {
        db_config.writes_enabled = false;
    }

    match cli.command {
        Commands::Init { watch } => cmd_init(db_config, &runtime, watch).await?,
        Commands::Item { action } => {
            let db = open_db(&db_config).await?;
            match action {
                ItemAction::Get {
                    source,
                    id,
                    kind,
                    ttl_secs,
                } => cmd_item_get(&db, &source, &id, kind, ttl_secs).await?,
                ItemAction::Put {
                    source,
                    id,
                    kind,
                    payload,
                } => cmd_item_put(&db, &source, &id, kind, &payload).await?,
            }
        }
        Commands::Prune => {
            let db = open_db(&db_config).await?;
            let removed = db.item_repo().prune(&TtlPolicy::default()).await?;
            println!("Pruned {removed} expired entries");
        }
        Commands::Checkpoint => cmd_checkpoint(&open_db(&db_config).await?).await?,
        Commands::Blob { id } => {
            let caches = open_caches(&runtime)?;
            print_path(caches.cached_blob(&id).await?, &id);
        }
        Commands::Json {
            source,
            manga,
            chapter,
            ttl_secs,
        } => {
            let caches = open_caches(&runtime)?;
            let key = response_cache_key(&source, manga.trim(), &normalize_chapter_id(&chapter));
            let path = caches
                .cached_json(&key, Duration::from_secs(ttl_secs))
                .await?;
            print_path(path, &key);
        }
        Commands::Mirror { id } => {
            let caches = open_caches(&runtime)?;
            let fetcher = ReqwestFetcher::new().context("Failed to create HTTP client")?;
            let mirror = PageMirror::new(caches, fetcher);
            print_path(mirror.resolve(&id).await?, &id);
        }
        #[cfg(feature = "browser")]
        Commands::Render {
            url,
            selector,
            timeout_secs,
            screenshot,
        } => {
            let caches = if screenshot {
                Some(open_caches(&runtime)?)
            } else {
                None
            };
            cmd_render(&runtime, &url, &selector, timeout_secs, caches).await?;
        }
    }

    Ok(())
}

async fn open_db(config: &DatabaseConfig) -> Result<Database> {
    Database::open(config)
        .await
        .with_context(|| format!("Failed to open {}", config.path.display()))
}

fn open_caches(runtime: &RuntimeConfig) -> Result<ContentCaches> {
    ContentCaches::open(&runtime.cache_dir)
        .with_context(|| format!("Failed to open caches in {}", runtime.cache_dir.display()))
}

fn print_path(path: Option<PathBuf>, key: &str) {
    match path {
        Some(path) => println!("{}", path.display()),
        None => eprintln!("Not cached: {key}"),
    }
}

async fn cmd_init(mut config: DatabaseConfig, runtime: &RuntimeConfig, watch: bool) -> Result<()> {
    config.primary = true;
    let db = open_db(&config).await?;
    open_caches(runtime)?;

    println!("Structured cache: {}", db.path().display());
    println!("File caches:      {}", runtime.cache_dir.display());
    println!("Workers:          {}", runtime.worker_count());
    if !config.writes_enabled {
        println!("Cache writes are disabled");
    }

    if watch {
        let cancel = tokio_util::sync::CancellationToken::new();
        let monitor = db.spawn_checkpoint_monitor(cancel.clone());

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        tracing::info!("Shutdown signal received");
        cancel.cancel();
        monitor.await.context("Checkpoint monitor panicked")?;
    }

    db.close().await;
    Ok(())
}

async fn cmd_item_get(
    db: &Database,
    source: &str,
    id: &str,
    kind: ItemKind,
    ttl_secs: Option<u64>,
) -> Result<()> {
    let ttl = ttl_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| TtlPolicy::default().for_kind(kind));

    match db.item_repo().get(source, id, kind, ttl).await? {
        Some(payload) => {
            // Pretty-print when the payload is valid JSON
            match serde_json::from_str::<serde_json::Value>(&payload) {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(_) => println!("{payload}"),
            }
        }
        None => eprintln!("No fresh {kind} entry for {source}/{id}"),
    }
    Ok(())
}

async fn cmd_item_put(
    db: &Database,
    source: &str,
    id: &str,
    kind: ItemKind,
    payload: &str,
) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(payload).context("Payload is not valid JSON")?;

    let repo = db.item_repo();
    if !repo.writes_enabled() {
        anyhow::bail!("Cache writes are disabled");
    }
    repo.put(source, id, kind, &value.to_string()).await?;
    println!("Stored {kind} entry for {source}/{id}");
    Ok(())
}

async fn cmd_checkpoint(db: &Database) -> Result<()> {
    let before = db.wal_size().await?;
    let stats = db.checkpoint().await?;
    let after = db.wal_size().await?;

    println!("WAL before:   {before} bytes");
    println!("WAL after:    {after} bytes");
    println!("Log frames:   {}", stats.log_frames);
    println!("Checkpointed: {}", stats.checkpointed_frames);
    if stats.busy {
        println!("Checkpoint could not complete: database busy");
    }
    Ok(())
}

#[cfg(feature = "browser")]
async fn cmd_render(
    runtime: &RuntimeConfig,
    url: &str,
    selector: &str,
    timeout_secs: u64,
    caches: Option<ContentCaches>,
) -> Result<()> {
    use std::sync::Arc;

    use hondana_client::ChromiumLauncher;
    use hondana_core::error::AppError;
    use hondana_core::{BrowserSession, SessionConfig};

    let launcher = ChromiumLauncher::new()
        .headful(runtime.headful)
        .with_chrome_bin(runtime.chrome_bin.clone());
    let session = BrowserSession::new(Arc::new(launcher), SessionConfig::default());
    let timeout = Duration::from_secs(timeout_secs);
    let want_screenshot = caches.is_some();

    let rendered = session
        .with_page(|page| async move {
            page.goto(url).await?;
            page.wait_for_selector(selector, timeout).await?;
            let html = page.content().await?;
            let png = if want_screenshot {
                Some(page.screenshot().await?)
            } else {
                None
            };
            Ok::<_, AppError>((html, png))
        })
        .await;

    if let Err(e) = session.shutdown().await {
        tracing::warn!(error = %e, "Failed to close browser");
    }
    let (html, png) = rendered?;

    if let (Some(caches), Some(png)) = (caches, png) {
        let id = caches.store_blob(url, &png).await?;
        eprintln!("Screenshot stored as {id}");
    }
    println!("{html}");
    Ok(())
}
