use std::path::PathBuf;
use std::time::Duration;

use hondana_core::AppError;
use hondana_core::config::{env_flag, env_parse};

/// Configuration for the structured cache database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    /// This process creates the schema and runs the checkpoint monitor.
    pub primary: bool,
    /// When false, `put` is a no-op and reads keep working.
    pub writes_enabled: bool,
    /// WAL size (bytes) above which a `RESTART` checkpoint is forced.
    pub wal_limit_bytes: u64,
    pub checkpoint_interval: Duration,
}

impl DatabaseConfig {
    /// Read configuration from environment variables.
    ///
    /// - `HONDANA_DB_PATH` (defaults to `db/cache.db`)
    /// - `HONDANA_DB_MAX_CONNECTIONS` (defaults to 5)
    /// - `HONDANA_PRIMARY`, `HONDANA_NO_CACHE` (flags)
    /// - `HONDANA_WAL_LIMIT_MB` (defaults to 50)
    /// - `HONDANA_CHECKPOINT_INTERVAL_SECS` (defaults to 5)
    pub fn from_env() -> Result<Self, AppError> {
        let path = std::env::var("HONDANA_DB_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("db/cache.db"));

        let max_connections: u32 = env_parse("HONDANA_DB_MAX_CONNECTIONS", 5)?;
        if max_connections == 0 {
            return Err(AppError::ConfigError(
                "HONDANA_DB_MAX_CONNECTIONS must be at least 1".into(),
            ));
        }

        let wal_limit_mb: u64 = env_parse("HONDANA_WAL_LIMIT_MB", 50)?;
        let interval_secs: u64 = env_parse("HONDANA_CHECKPOINT_INTERVAL_SECS", 5)?;
        if interval_secs == 0 {
            return Err(AppError::ConfigError(
                "HONDANA_CHECKPOINT_INTERVAL_SECS must be at least 1".into(),
            ));
        }

        Ok(Self {
            path,
            max_connections,
            primary: env_flag("HONDANA_PRIMARY")?,
            writes_enabled: !env_flag("HONDANA_NO_CACHE")?,
            wal_limit_bytes: megabytes(wal_limit_mb, "HONDANA_WAL_LIMIT_MB")?,
            checkpoint_interval: Duration::from_secs(interval_secs),
        })
    }

    /// Defaults for a database file at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("db/cache.db"),
            max_connections: 5,
            primary: false,
            writes_enabled: true,
            wal_limit_bytes: 50 * 1024 * 1024,
            checkpoint_interval: Duration::from_secs(5),
        }
    }
}

fn megabytes(mb: u64, name: &str) -> Result<u64, AppError> {
    mb.checked_mul(1024 * 1024)
        .ok_or_else(|| AppError::ConfigError(format!("{name} is too large: {mb}")))
}
