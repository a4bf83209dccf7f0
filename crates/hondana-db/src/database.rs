use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hondana_core::AppError;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::DatabaseConfig;
use crate::repository::ItemRepository;

/// Schema statements, executed one at a time by the primary process.
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS cache (
        src TEXT NOT NULL,
        id TEXT NOT NULL,
        type TEXT NOT NULL,
        data TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        PRIMARY KEY (src, id, type)
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_cache_src_type_timestamp
        ON cache(src, type, timestamp)"#,
];

/// Result of a `PRAGMA wal_checkpoint(RESTART)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointStats {
    /// Another connection prevented the checkpoint from completing.
    pub busy: bool,
    pub log_frames: i64,
    pub checkpointed_frames: i64,
}

/// Central database facade: owns the pool, sets up the schema on the
/// primary process, manages the write-ahead log and vends repositories.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    config: DatabaseConfig,
}

impl Database {
    /// Open (creating if needed) the database file.
    ///
    /// On the primary process this also creates the schema and runs a
    /// startup checkpoint. Secondary processes rely on the primary having
    /// finished that before they start.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, AppError> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::DatabaseError(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        let options = base_options().filename(&config.path).create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        let db = Self {
            pool,
            config: config.clone(),
        };

        if config.primary {
            db.setup_schema().await?;
            let stats = db.checkpoint().await?;
            tracing::info!(
                path = %config.path.display(),
                busy = stats.busy,
                log_frames = stats.log_frames,
                checkpointed = stats.checkpointed_frames,
                "Structured cache ready"
            );
        }

        Ok(db)
    }

    /// Idempotent schema setup.
    pub async fn setup_schema(&self) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Schema setup failed: {e}")))?;
        }
        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Merge the write-ahead log into the main file and start a fresh log.
    pub async fn checkpoint(&self) -> Result<CheckpointStats, AppError> {
        let (busy, log_frames, checkpointed_frames): (i64, i64, i64) =
            sqlx::query_as("PRAGMA wal_checkpoint(RESTART)")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Checkpoint failed: {e}")))?;

        Ok(CheckpointStats {
            busy: busy != 0,
            log_frames,
            checkpointed_frames,
        })
    }

    /// Current size of the `-wal` file in bytes; 0 if there is none.
    pub async fn wal_size(&self) -> Result<u64, AppError> {
        let wal = self.wal_path();
        match tokio::fs::metadata(&wal).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(AppError::DatabaseError(format!(
                "Failed to stat {}: {e}",
                wal.display()
            ))),
        }
    }

    /// Check the WAL size every `checkpoint_interval` and force a checkpoint
    /// once it exceeds `wal_limit_bytes`. Stops when `cancel` fires.
    pub fn spawn_checkpoint_monitor(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let db = self.clone();
        let interval = self.config.checkpoint_interval;
        let limit = self.config.wal_limit_bytes;

        tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval.as_secs(),
                limit_bytes = limit,
                "Checkpoint monitor started"
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => db.checkpoint_if_needed(limit).await,
                }
            }
            tracing::info!("Checkpoint monitor stopped");
        })
    }

    async fn checkpoint_if_needed(&self, limit: u64) {
        let size = match self.wal_size().await {
            Ok(size) => size,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read WAL size");
                return;
            }
        };
        if size <= limit {
            return;
        }

        match self.checkpoint().await {
            Ok(stats) => tracing::info!(
                wal_bytes = size,
                busy = stats.busy,
                checkpointed = stats.checkpointed_frames,
                "WAL checkpointed"
            ),
            Err(e) => tracing::error!(wal_bytes = size, error = %e, "WAL checkpoint failed"),
        }
    }

    /// Get an [`ItemRepository`] backed by this pool.
    pub fn item_repo(&self) -> ItemRepository {
        ItemRepository::new(self.pool.clone(), self.config.writes_enabled)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn wal_path(&self) -> PathBuf {
        let mut wal = self.config.path.clone().into_os_string();
        wal.push("-wal");
        PathBuf::from(wal)
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn base_options() -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        // Several worker processes write to the same file.
        .busy_timeout(Duration::from_secs(5))
}
