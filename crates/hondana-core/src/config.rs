use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

/// Read a boolean flag. Unset or empty means `false`.
pub fn env_flag(name: &str) -> Result<bool, AppError> {
    match std::env::var(name) {
        Err(_) => Ok(false),
        Ok(raw) => parse_flag(name, &raw),
    }
}

/// Read and parse a variable, using `default` when it is unset.
pub fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!("Invalid {name} '{raw}'"))
        }),
    }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Ok(false),
        "1" | "true" | "yes" | "on" => Ok(true),
        _ => Err(AppError::ConfigError(format!(
            "Invalid {name} '{raw}': expected true or false"
        ))),
    }
}

/// Process-level settings outside the structured cache.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Root of the page, request and proxy file caches.
    pub cache_dir: PathBuf,
    /// Launch the browser with a visible window.
    pub headful: bool,
    /// Run a single worker instead of one per core.
    pub no_cluster: bool,
    pub chrome_bin: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Read configuration from environment variables.
    ///
    /// - `HONDANA_CACHE_DIR` (defaults to `caches`)
    /// - `HONDANA_HEADFUL`, `HONDANA_NO_CLUSTER` (flags)
    /// - `CHROME_BIN` (optional)
    pub fn from_env() -> Result<Self, AppError> {
        let cache_dir = std::env::var("HONDANA_CACHE_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "caches".to_string());

        Ok(Self {
            cache_dir: PathBuf::from(cache_dir),
            headful: env_flag("HONDANA_HEADFUL")?,
            no_cluster: env_flag("HONDANA_NO_CLUSTER")?,
            chrome_bin: std::env::var_os("CHROME_BIN").map(PathBuf::from),
        })
    }

    /// Worker processes the supervisor should run on this machine.
    pub fn worker_count(&self) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        worker_count_for(self.no_cluster, cpus)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("caches"),
            headful: false,
            no_cluster: false,
            chrome_bin: None,
        }
    }
}

fn worker_count_for(no_cluster: bool, cpus: usize) -> usize {
    if no_cluster { 1 } else { cpus.max(4) }
}
