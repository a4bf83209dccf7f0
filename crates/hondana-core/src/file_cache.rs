//! Content-addressable blob cache on the local filesystem.
//!
//! Keys are hashed with XXH64 into file names under a root directory. Every
//! write lands in a uniquely named temporary file first and is then renamed
//! into place, so a reader sees either the previous complete file, nothing,
//! or the new complete file. Freshness is judged from the file's
//! modification time; stale files are reported as misses but left on disk.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use moka::sync::Cache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use uuid::Uuid;
use xxhash_rust::xxh64::xxh64;

use crate::error::AppError;
use crate::models::ProxyData;

/// Upper bound on memoized key digests per cache instance.
const DIGEST_MEMO_CAPACITY: u64 = 100_000;

/// Full chapter responses stay fresh for 5 hours.
pub const RESPONSE_TTL: Duration = Duration::from_secs(5 * 60 * 60);

/// A single cache directory holding `<id>.<ext>` files.
#[derive(Clone)]
pub struct ContentCache {
    root: PathBuf,
    ext: String,
    digests: Cache<String, String>,
}

impl ContentCache {
    /// Open (and create if needed) a cache rooted at `root`.
    pub fn new(root: impl AsRef<Path>, ext: impl Into<String>) -> Result<Self, AppError> {
        let root = std::path::absolute(root.as_ref())
            .map_err(|e| AppError::cache_io(root.as_ref(), e))?;
        // Runs once per cache at startup.
        std::fs::create_dir_all(&root).map_err(|e| AppError::cache_io(&root, e))?;

        Ok(Self {
            root,
            ext: ext.into(),
            digests: Cache::new(DIGEST_MEMO_CAPACITY),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.ext
    }

    /// 64-bit XXH64 digest of `key` as 16 hex characters, memoized per process.
    pub fn digest(&self, key: &str) -> String {
        self.digests
            .get_with_by_ref(key, || format!("{:016x}", xxh64(key.as_bytes(), 0)))
    }

    /// The id a key is stored under.
    pub fn cache_id(&self, key: &str, hash_key: bool) -> String {
        if hash_key {
            self.digest(key)
        } else {
            key.to_string()
        }
    }

    /// Path of the entry for `id`, or `None` if `id` could escape the root.
    fn entry_path(&self, id: &str) -> Option<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return None;
        }
        Some(self.root.join(format!("{id}.{}", self.ext)))
    }

    fn temp_path(&self) -> PathBuf {
        self.root
            .join(format!(".{}.{}.tmp", Uuid::new_v4().simple(), self.ext))
    }

    fn writable_path(&self, id: &str) -> Result<PathBuf, AppError> {
        self.entry_path(id)
            .ok_or_else(|| AppError::CacheIo(format!("Invalid cache id: {id:?}")))
    }

    /// Store an in-memory payload. Returns the cache id.
    pub async fn put(&self, key: &str, data: &[u8], hash_key: bool) -> Result<String, AppError> {
        let id = self.cache_id(key, hash_key);
        let path = self.writable_path(&id)?;
        let temp = self.temp_path();

        if let Err(e) = fs::write(&temp, data).await {
            let _ = fs::remove_file(&temp).await;
            return Err(AppError::cache_io(&temp, e));
        }
        self.commit(&temp, &path).await?;

        tracing::debug!(%id, bytes = data.len(), "Cached blob");
        Ok(id)
    }

    /// Store a streamed payload. Returns the cache id.
    pub async fn put_stream<R>(&self, key: &str, mut reader: R, hash_key: bool) -> Result<String, AppError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let id = self.cache_id(key, hash_key);
        let path = self.writable_path(&id)?;
        let temp = self.temp_path();

        tracing::debug!(%id, "Starting to save stream");
        let written = async {
            let mut file = fs::File::create(&temp).await?;
            let n = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<u64, std::io::Error>(n)
        }
        .await;

        let bytes = match written {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                return Err(AppError::cache_io(&temp, e));
            }
        };
        self.commit(&temp, &path).await?;

        tracing::debug!(%id, bytes, "Done saving stream");
        Ok(id)
    }

    async fn commit(&self, temp: &Path, path: &Path) -> Result<(), AppError> {
        if let Err(e) = fs::rename(temp, path).await {
            let _ = fs::remove_file(temp).await;
            return Err(AppError::cache_io(path, e));
        }
        Ok(())
    }

    /// Path of a fresh entry for `key`, or `None` on a miss.
    ///
    /// `ttl = None` means entries never go stale.
    pub async fn get(
        &self,
        key: &str,
        ttl: Option<Duration>,
        hash_key: bool,
    ) -> Result<Option<PathBuf>, AppError> {
        let id = self.cache_id(key, hash_key);
        let Some(path) = self.entry_path(&id) else {
            return Ok(None);
        };

        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::cache_io(&path, e)),
        };
        let written = metadata.modified().map_err(|e| AppError::cache_io(&path, e))?;

        if is_fresh(written, ttl, SystemTime::now()) {
            Ok(Some(path))
        } else {
            tracing::debug!(%id, "Stale cache entry");
            Ok(None)
        }
    }
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("root", &self.root)
            .field("ext", &self.ext)
            .finish()
    }
}

/// An entry written at `written` is fresh while `now < written + ttl`.
fn is_fresh(written: SystemTime, ttl: Option<Duration>, now: SystemTime) -> bool {
    match ttl {
        None => true,
        Some(ttl) => match written.checked_add(ttl) {
            Some(expires) => now < expires,
            None => true,
        },
    }
}

/// The three file caches: rendered page images, full JSON responses, and
/// upstream proxy metadata. Same algorithm, different directory and extension.
#[derive(Debug, Clone)]
pub struct ContentCaches {
    pub pages: ContentCache,
    pub requests: ContentCache,
    pub proxies: ContentCache,
}

impl ContentCaches {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, AppError> {
        let root = root.as_ref();
        Ok(Self {
            pages: ContentCache::new(root.join("pages"), "png")?,
            requests: ContentCache::new(root.join("requests"), "json")?,
            proxies: ContentCache::new(root.join("proxies"), "proxy")?,
        })
    }

    /// Rendered page image by opaque id. Ids are not hashed and never expire.
    pub async fn cached_blob(&self, id: &str) -> Result<Option<PathBuf>, AppError> {
        self.pages.get(id, None, false).await
    }

    /// Store a rendered page image; returns the opaque id to serve it by.
    pub async fn store_blob(&self, key: &str, data: &[u8]) -> Result<String, AppError> {
        self.pages.put(key, data, true).await
    }

    /// Full response body by composite key.
    pub async fn cached_json(&self, key: &str, ttl: Duration) -> Result<Option<PathBuf>, AppError> {
        self.requests.get(key, Some(ttl), true).await
    }

    /// Store a response body pretty-printed with 4-space indentation.
    pub async fn store_json<T: Serialize>(&self, key: &str, value: &T) -> Result<String, AppError> {
        let body = to_pretty_json(value)?;
        self.requests.put(key, &body, true).await
    }

    pub async fn load_proxy(&self, id: &str) -> Result<Option<ProxyData>, AppError> {
        let Some(path) = self.proxies.get(id, None, false).await? else {
            return Ok(None);
        };
        read_json(&path).await
    }

    pub async fn store_proxy(&self, id: &str, data: &ProxyData) -> Result<String, AppError> {
        let body = serde_json::to_vec(data)?;
        self.proxies.put(id, &body, false).await
    }
}

pub(crate) fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>, AppError> {
    let mut body = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut body, formatter);
    value.serialize(&mut serializer)?;
    Ok(body)
}

/// Read a JSON cache file; a corrupt file is a miss, not an error.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, AppError> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(AppError::cache_io(path, e)),
    };
    match serde_json::from_slice(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt cache file");
            Ok(None)
        }
    }
}
