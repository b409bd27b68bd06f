//! URL-addressed artifact cache
//!
//! Maps a remote artifact URL to a local file so repeated requests are
//! idempotent and cheap. Keys are derived from the URL's filename when it
//! has a recognizable extension, otherwise from a SHA-256 hash of the URL.
//!
//! Consistency contract:
//! - At most one in-flight download per key cache-wide (within this
//!   process); concurrent requesters for the same key share one download.
//! - Across processes, a benign duplicate download is tolerated instead of
//!   taking a cross-process lock: entries are written to a temp file and
//!   atomically renamed into place after a final existence check.
//! - Entries are write-once; eviction is external to this subsystem.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};
use crate::transport::Transport;

/// File extensions that make a URL filename usable as a cache key directly
const RECOGNIZED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "exr", "hdr", "mp4", "zip"];

/// On-disk cache of downloaded artifacts, keyed by remote URL
pub struct ArtifactCache {
    dir: PathBuf,
    // Per-key download guards; lock order is always map, then guard.
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArtifactCache {
    /// Open (creating if needed) a cache rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::CreateDir {
            path: dir.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            dir,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// The cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Derive the cache key (local filename) for a remote URL
    ///
    /// Uses the URL's last path segment when it carries a recognized image,
    /// archive or video extension; otherwise falls back to the SHA-256 hex
    /// digest of the full URL.
    pub fn key_for_url(url: &str) -> Result<String> {
        let parsed =
            url::Url::parse(url).map_err(|_| CacheError::InvalidKey(url.to_string()))?;

        if let Some(segments) = parsed.path_segments()
            && let Some(last) = segments.filter(|s| !s.is_empty()).next_back()
        {
            let decoded = urlencoding::decode(last)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| last.to_string());
            let name = sanitize_filename(&decoded);
            if let Some(ext) = Path::new(&name).extension().and_then(|e| e.to_str())
                && RECOGNIZED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
            {
                return Ok(name);
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Path a given URL would be cached at (whether or not it exists yet)
    pub fn path_for_url(&self, url: &str) -> Result<PathBuf> {
        Ok(self.dir.join(Self::key_for_url(url)?))
    }

    /// Look up a cached entry for a URL without downloading
    ///
    /// Presence is checked by direct filesystem lookup; any I/O or key
    /// derivation failure degrades to a miss.
    pub fn try_resolve(&self, url: &str) -> Option<PathBuf> {
        match self.path_for_url(url) {
            Ok(path) if path.is_file() => Some(path),
            Ok(_) => None,
            Err(e) => {
                warn!(%url, error = %e, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Write bytes as the cached entry for a URL
    ///
    /// No-op if the entry already exists. The write goes to a temp file in
    /// the cache directory followed by an atomic rename, so a concurrent
    /// writer for the same key cannot corrupt the entry.
    pub async fn write(&self, url: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for_url(url)?;
        if path.is_file() {
            return Ok(path);
        }

        let tmp = self.temp_path(&path);
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| CacheError::WriteFailed {
                path: tmp.clone(),
                reason: e.to_string(),
            })?;
        self.commit(tmp, path).await
    }

    /// Resolve a URL to a cached file, downloading it if absent
    ///
    /// Concurrent callers for the same URL share one download; the winner
    /// populates the entry and the rest observe it as a hit.
    pub async fn fetch(
        &self,
        transport: &Transport,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let key = Self::key_for_url(url)?;
        let guard = self.guard_for(&key).await;
        let _locked = guard.lock().await;

        let path = self.dir.join(&key);
        let result = if path.is_file() {
            debug!(%url, ?path, "artifact cache hit");
            Ok(path)
        } else {
            debug!(%url, ?path, "artifact cache miss, downloading");
            let tmp = self.temp_path(&path);
            match transport.download_to_file(url, tmp.clone(), cancel).await {
                Ok(tmp) => self.commit(tmp, path).await,
                Err(e) => {
                    let _ = tokio::fs::remove_file(&tmp).await;
                    Err(e)
                }
            }
        };

        drop(_locked);
        self.release_guard(&key, guard).await;
        result
    }

    /// Address a cached entry as a `file://` URI
    ///
    /// Lets downstream code treat cache entries uniformly with remote URLs
    /// (e.g. archive unpacking operates on a cached zip like a fresh one).
    pub fn file_uri(path: &Path) -> Option<url::Url> {
        let absolute = path.canonicalize().ok()?;
        url::Url::from_file_path(absolute).ok()
    }

    fn temp_path(&self, final_path: &Path) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "entry".to_string());
        self.dir
            .join(format!(".{}.tmp-{}-{}", name, std::process::id(), nanos))
    }

    /// Final existence check then atomic rename into place
    async fn commit(&self, tmp: PathBuf, path: PathBuf) -> Result<PathBuf> {
        if path.is_file() {
            // Another writer (possibly another process) won the race.
            let _ = tokio::fs::remove_file(&tmp).await;
            return Ok(path);
        }
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CacheError::WriteFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        Ok(path)
    }

    async fn guard_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.in_flight.lock().await;
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn release_guard(&self, key: &str, guard: Arc<Mutex<()>>) {
        drop(guard);
        let mut map = self.in_flight.lock().await;
        if let Some(entry) = map.get(key)
            && Arc::strong_count(entry) == 1
        {
            map.remove(key);
        }
    }
}

/// Strip path separators and other unsafe characters from a derived filename
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect()
}
