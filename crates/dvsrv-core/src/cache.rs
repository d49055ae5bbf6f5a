//! Content-addressed cache of remote modules.
//!
//! Every artifact lives at `<dir>/<sha256-hex(url)>` with a JSON sidecar at
//! `<dir>/<sha256-hex(url)>.meta.json`. Entries are never invalidated: a URL
//! that has been fetched once is served from disk forever.
//!
//! Writes go through a temp file and a rename, bytes first and sidecar last,
//! and a reader only trusts an entry when both files are present. Concurrent
//! fetches of the same URL are collapsed onto a single network request.

use crate::error::codes;
use crate::version::USER_AGENT;
use bytes::Bytes;
use dashmap::DashMap;
use dvsrv_util::fs::atomic_write;
use dvsrv_util::hash::sha256_hex;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

/// Statuses that are worth asking again for.
pub const RETRY_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Suffix of the metadata sidecar next to each artifact.
pub const META_SUFFIX: &str = ".meta.json";

/// Remote module cache error.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The server answered with a status other than 200.
    #[error("Request failed: {url} (status {status})")]
    Fetch { url: String, status: u16 },

    /// No usable response after every attempt.
    #[error("Request failed after {attempts} attempt(s): {url}: {source}")]
    Transport {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    /// The HTTP client could not be built.
    #[error("Failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Cache IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid cache metadata for {url}: {source}")]
    Metadata {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => codes::CACHE_FETCH_FAILED,
            Self::Transport { .. } | Self::Client(_) => codes::CACHE_TRANSPORT_ERROR,
            Self::Io { .. } => codes::CACHE_IO_ERROR,
            Self::Metadata { .. } => codes::CACHE_METADATA_INVALID,
        }
    }
}

/// Bounded retry with linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Attempt `n` that fails retryably waits `n * base_delay` before the next.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given 1-based attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// A remote module as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    pub url: String,
    pub content_type: Option<String>,
    pub contents: Bytes,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Meta {
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
}

enum Attempt {
    Done(Bytes, Option<String>),
    Status(StatusCode),
}

/// On-disk cache of remote modules with retrying fetch.
///
/// Cheap to clone; clones share the HTTP client and the in-flight registry.
#[derive(Debug, Clone)]
pub struct ContentCache {
    dir: PathBuf,
    http: Client,
    retry: RetryPolicy,
    inflight: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ContentCache {
    /// Create a cache rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(CacheError::Client)?;

        Ok(Self {
            dir: dir.into(),
            http,
            retry: RetryPolicy::default(),
            inflight: Arc::new(DashMap::new()),
        })
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache key of a URL: the hex SHA-256 of its serialized form.
    #[must_use]
    pub fn key_for(url: &Url) -> String {
        sha256_hex(url.as_str().as_bytes())
    }

    /// Path of the artifact bytes for a URL.
    #[must_use]
    pub fn artifact_path(&self, url: &Url) -> PathBuf {
        self.dir.join(Self::key_for(url))
    }

    /// Path of the metadata sidecar for a URL.
    #[must_use]
    pub fn meta_path(&self, url: &Url) -> PathBuf {
        self.dir.join(format!("{}{META_SUFFIX}", Self::key_for(url)))
    }

    /// Return the artifact for `url`, from disk when present, otherwise from
    /// the network (and then persisted).
    pub async fn fetch(&self, url: &Url) -> Result<CachedArtifact, CacheError> {
        if let Some(artifact) = self.read_from_disk(url).await {
            debug!(%url, "loaded from cache on disk");
            return Ok(artifact);
        }

        let key = Self::key_for(url);
        let lock = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;

        // Another task may have finished the same fetch while we waited.
        let result = match self.read_from_disk(url).await {
            Some(artifact) => {
                debug!(%url, "loaded from cache on disk");
                Ok(artifact)
            }
            None => self.fetch_and_store(url).await,
        };

        // Unregister only when nobody else is queued on this lock, so a
        // caller arriving now still lines up behind the waiters.
        self.inflight.remove_if(&key, |_, registered| {
            Arc::ptr_eq(registered, &lock) && Arc::strong_count(registered) <= 2
        });
        drop(guard);
        result
    }

    async fn read_from_disk(&self, url: &Url) -> Option<CachedArtifact> {
        let contents = tokio::fs::read(self.artifact_path(url)).await.ok()?;
        let meta = tokio::fs::read(self.meta_path(url)).await.ok()?;
        let meta: Meta = serde_json::from_slice(&meta).ok()?;

        Some(CachedArtifact {
            url: meta.url,
            content_type: meta.content_type,
            contents: Bytes::from(contents),
        })
    }

    async fn fetch_and_store(&self, url: &Url) -> Result<CachedArtifact, CacheError> {
        debug!(%url, "fetching from remote");
        let (contents, content_type) = self.fetch_with_retry(url).await?;

        let artifact = CachedArtifact {
            url: url.to_string(),
            content_type,
            contents,
        };
        self.store(url, &artifact).await?;
        Ok(artifact)
    }

    async fn store(&self, url: &Url, artifact: &CachedArtifact) -> Result<(), CacheError> {
        let meta = Meta {
            url: artifact.url.clone(),
            content_type: artifact.content_type.clone(),
        };
        let meta_bytes = serde_json::to_vec(&meta).map_err(|source| CacheError::Metadata {
            url: artifact.url.clone(),
            source,
        })?;

        let artifact_path = self.artifact_path(url);
        let meta_path = self.meta_path(url);
        let contents = artifact.contents.clone();
        let dir = self.dir.clone();

        tokio::task::spawn_blocking(move || {
            write_entry(&artifact_path, &contents, &meta_path, &meta_bytes)
        })
        .await
        .map_err(|e| CacheError::Io {
            path: dir,
            source: std::io::Error::other(e),
        })?
    }

    async fn fetch_with_retry(&self, url: &Url) -> Result<(Bytes, Option<String>), CacheError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.attempt(url).await {
                Ok(Attempt::Done(bytes, content_type)) => return Ok((bytes, content_type)),
                Ok(Attempt::Status(status)) => {
                    let retryable = RETRY_STATUSES.contains(&status.as_u16());
                    if !retryable || attempt >= max_attempts {
                        return Err(CacheError::Fetch {
                            url: url.to_string(),
                            status: status.as_u16(),
                        });
                    }
                    warn!(%url, attempt, status = status.as_u16(), "retrying remote fetch");
                }
                Err(source) => {
                    if attempt >= max_attempts {
                        return Err(CacheError::Transport {
                            url: url.to_string(),
                            attempts: attempt,
                            source,
                        });
                    }
                    warn!(%url, attempt, error = %source, "retrying remote fetch");
                }
            }

            tokio::time::sleep(self.retry.delay_for(attempt)).await;
        }
    }

    async fn attempt(&self, url: &Url) -> Result<Attempt, reqwest::Error> {
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Ok(Attempt::Status(status));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        Ok(Attempt::Done(bytes, content_type))
    }
}

/// Write artifact bytes, then the sidecar. The sidecar's presence marks the
/// entry complete.
fn write_entry(
    artifact_path: &Path,
    contents: &[u8],
    meta_path: &Path,
    meta_bytes: &[u8],
) -> Result<(), CacheError> {
    atomic_write(artifact_path, contents).map_err(|source| CacheError::Io {
        path: artifact_path.to_path_buf(),
        source,
    })?;
    atomic_write(meta_path, meta_bytes).map_err(|source| CacheError::Io {
        path: meta_path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::State,
        http::{header, StatusCode as AxumStatus},
        response::IntoResponse,
        routing::get,
        Router,
    };
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct Script {
        hits: Arc<AtomicUsize>,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
        statuses: Arc<StdMutex<VecDeque<u16>>>,
        delay: Duration,
    }

    async fn scripted(State(script): State<Script>) -> impl IntoResponse {
        script.hits.fetch_add(1, Ordering::SeqCst);
        let active = script.active.fetch_add(1, Ordering::SeqCst) + 1;
        script.max_active.fetch_max(active, Ordering::SeqCst);
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        script.active.fetch_sub(1, Ordering::SeqCst);

        let status = script.statuses.lock().unwrap().pop_front().unwrap_or(200);
        let status = AxumStatus::from_u16(status).unwrap();
        (
            status,
            [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
            "export default 1;\n",
        )
    }

    fn app(script: &Script) -> Router {
        Router::new()
            .route("/*path", get(scripted))
            .with_state(script.clone())
    }

    async fn serve_script(script: Script, statuses: &[u16]) -> (SocketAddr, Script) {
        script.statuses.lock().unwrap().extend(statuses.iter().copied());

        let app = app(&script);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, script)
    }

    async fn start_server(statuses: &[u16]) -> (SocketAddr, Script) {
        serve_script(Script::default(), statuses).await
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_key_is_sha256_of_url() {
        let url = Url::parse("https://esm.sh/smallest").unwrap();
        assert_eq!(
            ContentCache::key_for(&url),
            sha256_hex(b"https://esm.sh/smallest")
        );
    }

    #[test]
    fn test_delay_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn test_error_codes() {
        let err = CacheError::Fetch {
            url: "https://x/".to_string(),
            status: 404,
        };
        assert_eq!(err.code(), "CACHE_FETCH_FAILED");
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_cold_fetch_then_disk_hit() {
        let (addr, script) = start_server(&[]).await;
        let dir = tempdir().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap().with_retry(fast_retry());
        let url = Url::parse(&format!("http://{addr}/mod.js")).unwrap();

        let first = cache.fetch(&url).await.unwrap();
        let second = cache.fetch(&url).await.unwrap();

        assert_eq!(script.hits.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(&first.contents[..], b"export default 1;\n");
        assert_eq!(
            first.content_type.as_deref(),
            Some("application/javascript; charset=utf-8")
        );
        assert!(cache.artifact_path(&url).is_file());
        assert!(cache.meta_path(&url).is_file());

        let meta: serde_json::Value =
            serde_json::from_slice(&std::fs::read(cache.meta_path(&url)).unwrap()).unwrap();
        assert_eq!(meta["url"], url.as_str());
        assert_eq!(meta["contentType"], "application/javascript; charset=utf-8");
    }

    #[tokio::test]
    async fn test_retries_transient_statuses() {
        let (addr, script) = start_server(&[503, 503, 200]).await;
        let dir = tempdir().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap().with_retry(fast_retry());
        let url = Url::parse(&format!("http://{addr}/flaky.js")).unwrap();

        let artifact = cache.fetch(&url).await.unwrap();
        assert_eq!(script.hits.load(Ordering::SeqCst), 3);
        assert_eq!(&artifact.contents[..], b"export default 1;\n");
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let (addr, script) = start_server(&[500, 500, 500, 500, 500]).await;
        let dir = tempdir().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap().with_retry(fast_retry());
        let url = Url::parse(&format!("http://{addr}/down.js")).unwrap();

        let err = cache.fetch(&url).await.unwrap_err();
        assert!(matches!(err, CacheError::Fetch { status: 500, .. }));
        assert_eq!(script.hits.load(Ordering::SeqCst), 5);
        assert!(!cache.artifact_path(&url).exists());
        assert!(!cache.meta_path(&url).exists());
    }

    #[tokio::test]
    async fn test_non_retryable_status_fails_fast() {
        let (addr, script) = start_server(&[404]).await;
        let dir = tempdir().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap().with_retry(fast_retry());
        let url = Url::parse(&format!("http://{addr}/missing.js")).unwrap();

        let err = cache.fetch(&url).await.unwrap_err();
        assert_eq!(err.code(), "CACHE_FETCH_FAILED");
        assert_eq!(script.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transport_error_after_budget() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dir = tempdir().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap().with_retry(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        });
        let url = Url::parse(&format!("http://{addr}/nobody.js")).unwrap();

        let err = cache.fetch(&url).await.unwrap_err();
        assert!(matches!(err, CacheError::Transport { attempts: 2, .. }));
        assert_eq!(err.code(), "CACHE_TRANSPORT_ERROR");
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_request() {
        let (addr, script) = start_server(&[]).await;
        let dir = tempdir().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap().with_retry(fast_retry());
        let url = Url::parse(&format!("http://{addr}/shared.js")).unwrap();

        let fetches = (0..8).map(|_| {
            let cache = cache.clone();
            let url = url.clone();
            tokio::spawn(async move { cache.fetch(&url).await })
        });
        for handle in futures::future::join_all(fetches).await {
            handle.unwrap().unwrap();
        }

        assert_eq!(script.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_one_request_per_key() {
        let slow = Script {
            delay: Duration::from_millis(200),
            ..Script::default()
        };
        let (addr, script) = serve_script(slow, &[404]).await;
        let dir = tempdir().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap().with_retry(fast_retry());
        let url = Url::parse(&format!("http://{addr}/contended.js")).unwrap();

        let spawn_fetch = || {
            let cache = cache.clone();
            let url = url.clone();
            tokio::spawn(async move { cache.fetch(&url).await })
        };

        // First caller gets the 404, the second queues behind it, the third
        // arrives after the failure while the second is still fetching.
        let first = spawn_fetch();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = spawn_fetch();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let third = spawn_fetch();

        assert!(first.await.unwrap().is_err());
        assert!(second.await.unwrap().is_ok());
        assert!(third.await.unwrap().is_ok());

        assert_eq!(script.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(script.hits.load(Ordering::SeqCst), 2);
        assert!(cache.inflight.is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_then_success() {
        let script = Script::default();
        let app = app(&script);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dropped = Arc::new(AtomicUsize::new(0));
        let dropped_in_server = Arc::clone(&dropped);
        tokio::spawn(async move {
            let (first, _) = listener.accept().await.unwrap();
            drop(first);
            dropped_in_server.fetch_add(1, Ordering::SeqCst);
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempdir().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap().with_retry(fast_retry());
        let url = Url::parse(&format!("http://{addr}/reset.js")).unwrap();

        let artifact = cache.fetch(&url).await.unwrap();
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(script.hits.load(Ordering::SeqCst), 1);
        assert_eq!(&artifact.contents[..], b"export default 1;\n");
        assert!(cache.meta_path(&url).is_file());
    }

    #[tokio::test]
    async fn test_bytes_without_sidecar_is_a_miss() {
        let (addr, script) = start_server(&[]).await;
        let dir = tempdir().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap().with_retry(fast_retry());
        let url = Url::parse(&format!("http://{addr}/half.js")).unwrap();

        std::fs::write(cache.artifact_path(&url), b"stale").unwrap();
        let artifact = cache.fetch(&url).await.unwrap();

        assert_eq!(script.hits.load(Ordering::SeqCst), 1);
        assert_eq!(&artifact.contents[..], b"export default 1;\n");
    }
}
