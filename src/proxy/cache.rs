//! Response cache
//!
//! Successful `GET` responses are kept for `cacheAge` and replayed without
//! touching the router, so cache hits are never throttled. With `cachePath`
//! set, entries are also written to disk as JSON and survive restarts:
//!
//! ```text
//! <cachePath>/http/<sha256 of key>.json
//! <cachePath>/https/<sha256 of key>.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::http::body::BodyFraming;
use crate::http::exchange::Capture;
use crate::http::request::{Method, RequestHead};
use crate::http::response::ResponseHead;
use crate::routing::Scheme;

/// Largest body kept in the cache; bigger responses are only relayed.
pub const MAX_CACHED_BODY: usize = 8 * 1024 * 1024;

/// Identity of a cacheable request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    scheme: Scheme,
    text: String,
}

impl CacheKey {
    /// Key for `head` received over `scheme`, `None` for non-GET requests.
    ///
    /// The key covers scheme, effective host, site name and request target,
    /// so two sites behind one proxy never share entries.
    pub fn for_request(head: &RequestHead, scheme: Scheme) -> Option<Self> {
        if head.method != Method::GET {
            return None;
        }

        let text = format!(
            "{} {} {} {}",
            scheme,
            head.effective_host().to_ascii_lowercase(),
            head.site_name().unwrap_or("-"),
            head.path
        );
        Some(Self { scheme, text })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    fn file_path(&self, dir: &Path) -> PathBuf {
        let digest = hex::encode(Sha256::digest(self.text.as_bytes()));
        dir.join(self.scheme.as_str()).join(format!("{digest}.json"))
    }
}

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub head: ResponseHead,
    pub body: Bytes,
    pub stored_at: SystemTime,
}

impl CachedResponse {
    /// Turns a relayed response into an entry, if it is cacheable.
    pub fn from_capture(capture: Capture, stored_at: SystemTime) -> Option<Self> {
        if !capture.complete || capture.overflowed {
            return None;
        }
        let mut head = capture.head?;
        if head.status != 200 {
            return None;
        }

        if head.body_framing(&Method::GET) == BodyFraming::UntilClose {
            head.headers.set("Content-Length", capture.body.len().to_string());
        }

        Some(Self {
            head,
            body: Bytes::from(capture.body),
            stored_at,
        })
    }

    /// Clocks stepping backwards keep an entry fresh rather than expire it.
    pub fn is_fresh(&self, max_age: Duration, now: SystemTime) -> bool {
        now.duration_since(self.stored_at)
            .map(|age| age < max_age)
            .unwrap_or(true)
    }
}

/// On-disk form of a [`CachedResponse`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredResponse {
    key: String,
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
    /// Base64 of the raw body bytes
    body: String,
    stored_at_ms: u64,
}

impl StoredResponse {
    fn new(key: &CacheKey, entry: &CachedResponse) -> Self {
        Self {
            key: key.as_str().to_string(),
            status: entry.head.status,
            reason: entry.head.reason.clone(),
            headers: entry
                .head
                .headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            body: STANDARD.encode(&entry.body),
            stored_at_ms: entry
                .stored_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        }
    }

    fn into_entry(self) -> anyhow::Result<CachedResponse> {
        let body = STANDARD.decode(&self.body).context("cached body is not valid base64")?;
        Ok(CachedResponse {
            head: ResponseHead {
                version: "HTTP/1.1".to_string(),
                status: self.status,
                reason: self.reason,
                headers: self.headers.into_iter().collect(),
            },
            body: Bytes::from(body),
            stored_at: UNIX_EPOCH + Duration::from_millis(self.stored_at_ms),
        })
    }
}

#[derive(Debug)]
pub struct ResponseCache {
    max_age: Duration,
    dir: Option<PathBuf>,
    entries: DashMap<CacheKey, CachedResponse>,
    last_sweep: Mutex<SystemTime>,
}

impl ResponseCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            dir: None,
            entries: DashMap::new(),
            last_sweep: Mutex::new(SystemTime::now()),
        }
    }

    /// Persist entries under `dir`. The per-scheme subdirectories must exist.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Builds the cache described by the configuration, `None` when caching
    /// is off. Creates the cache directories.
    pub async fn from_config(config: &Config) -> anyhow::Result<Option<Self>> {
        let Some(max_age) = config.cache_age() else {
            return Ok(None);
        };

        let mut cache = Self::new(max_age);
        if let Some(dir) = &config.cache_path {
            for scheme in [Scheme::Http, Scheme::Https] {
                let path = dir.join(scheme.as_str());
                tokio::fs::create_dir_all(&path)
                    .await
                    .with_context(|| format!("failed to create cache directory {}", path.display()))?;
            }
            cache = cache.with_dir(dir.clone());
        }

        tracing::info!(
            max_age_ms = max_age.as_millis() as u64,
            dir = ?cache.dir,
            "Response cache enabled"
        );
        Ok(Some(cache))
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Number of entries held in memory.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a fresh entry for `key`, consulting disk on a memory miss.
    /// Expired entries are evicted.
    pub async fn lookup(&self, key: &CacheKey) -> Option<CachedResponse> {
        let now = SystemTime::now();

        let in_memory = self.entries.get(key).map(|e| e.value().clone());
        let entry = match in_memory {
            Some(entry) => entry,
            None => {
                let entry = self.load(key).await?;
                self.entries.insert(key.clone(), entry.clone());
                entry
            }
        };

        if entry.is_fresh(self.max_age, now) {
            tracing::debug!(key = key.as_str(), "Cache hit");
            return Some(entry);
        }

        tracing::debug!(key = key.as_str(), "Evicting expired cache entry");
        self.entries.remove(key);
        if let Some(dir) = &self.dir {
            let _ = tokio::fs::remove_file(key.file_path(dir)).await;
        }
        None
    }

    /// Stores a relayed response if it is cacheable. Returns whether it was.
    pub async fn store(&self, key: CacheKey, capture: Capture) -> bool {
        let Some(entry) = CachedResponse::from_capture(capture, SystemTime::now()) else {
            return false;
        };

        self.sweep_expired(entry.stored_at).await;

        if let Some(dir) = &self.dir {
            self.persist(dir, &key, &entry).await;
        }

        tracing::debug!(key = key.as_str(), bytes = entry.body.len(), "Cached response");
        self.entries.insert(key, entry);
        true
    }

    /// Drops every expired entry, at most once per `max_age`.
    async fn sweep_expired(&self, now: SystemTime) {
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            if !now.duration_since(*last).is_ok_and(|since| since >= self.max_age) {
                return;
            }
            *last = now;
        }

        let mut expired = Vec::new();
        self.entries.retain(|key, entry| {
            let fresh = entry.is_fresh(self.max_age, now);
            if !fresh {
                expired.push(key.clone());
            }
            fresh
        });

        if expired.is_empty() {
            return;
        }
        tracing::debug!(count = expired.len(), "Swept expired cache entries");

        if let Some(dir) = &self.dir {
            for key in &expired {
                let _ = tokio::fs::remove_file(key.file_path(dir)).await;
            }
        }
    }

    async fn persist(&self, dir: &Path, key: &CacheKey, entry: &CachedResponse) {
        let path = key.file_path(dir);
        let result = match serde_json::to_vec(&StoredResponse::new(key, entry)) {
            Ok(json) => tokio::fs::write(&path, json).await.map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "Failed to persist cache entry");
        }
    }

    async fn load(&self, key: &CacheKey) -> Option<CachedResponse> {
        let path = key.file_path(self.dir.as_deref()?);

        let json = match tokio::fs::read(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read cache entry");
                return None;
            }
        };

        let stored = serde_json::from_slice::<StoredResponse>(&json)
            .map_err(anyhow::Error::from)
            .and_then(|stored| {
                anyhow::ensure!(stored.key == key.as_str(), "cache file belongs to another key");
                stored.into_entry()
            });

        match stored {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable cache entry");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestBuilder;

    fn get(host: &str, path: &str) -> RequestHead {
        RequestBuilder::new()
            .method(Method::GET)
            .path(path)
            .header("Host", host)
            .build()
            .unwrap()
    }

    fn capture(status: u16, headers: &[(&str, &str)], body: &[u8]) -> Capture {
        let mut capture = Capture::new(MAX_CACHED_BODY);
        capture.head = Some(ResponseHead {
            version: "HTTP/1.1".to_string(),
            status,
            reason: "X".to_string(),
            headers: headers.iter().copied().collect(),
        });
        capture.body = body.to_vec();
        capture.complete = true;
        capture
    }

    #[test]
    fn only_get_requests_have_keys() {
        let post = RequestBuilder::new().method(Method::POST).path("/").build().unwrap();
        assert!(CacheKey::for_request(&post, Scheme::Http).is_none());

        let key = CacheKey::for_request(&get("A.test", "/x?y=1"), Scheme::Https).unwrap();
        assert_eq!(key.as_str(), "https a.test - /x?y=1");
    }

    #[test]
    fn different_hosts_do_not_share_keys() {
        let a = CacheKey::for_request(&get("a.test", "/"), Scheme::Http);
        let b = CacheKey::for_request(&get("b.test", "/"), Scheme::Http);
        assert_ne!(a, b);
    }

    #[test]
    fn only_complete_ok_responses_are_cacheable() {
        let now = SystemTime::now();
        assert!(CachedResponse::from_capture(capture(200, &[("Content-Length", "2")], b"ok"), now).is_some());
        assert!(CachedResponse::from_capture(capture(404, &[("Content-Length", "2")], b"no"), now).is_none());

        let mut partial = capture(200, &[("Content-Length", "2")], b"o");
        partial.complete = false;
        assert!(CachedResponse::from_capture(partial, now).is_none());
    }

    #[test]
    fn close_delimited_body_gets_content_length() {
        let entry = CachedResponse::from_capture(capture(200, &[], b"hello"), SystemTime::now()).unwrap();
        assert_eq!(entry.head.headers.get("Content-Length"), Some("5"));
        assert_eq!(entry.head.body_framing(&Method::GET), BodyFraming::Length(5));
    }

    #[test]
    fn entries_expire_after_max_age() {
        let stored_at = SystemTime::now();
        let entry = CachedResponse::from_capture(capture(200, &[("Content-Length", "2")], b"ok"), stored_at).unwrap();

        let max_age = Duration::from_secs(60);
        assert!(entry.is_fresh(max_age, stored_at + Duration::from_secs(59)));
        assert!(!entry.is_fresh(max_age, stored_at + Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn store_then_lookup_in_memory() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let key = CacheKey::for_request(&get("a.test", "/"), Scheme::Http).unwrap();

        assert!(cache.lookup(&key).await.is_none());
        assert!(cache.store(key.clone(), capture(200, &[("Content-Length", "2")], b"ok")).await);

        let hit = cache.lookup(&key).await.unwrap();
        assert_eq!(&hit.body[..], b"ok");
        assert_eq!(cache.len(), 1);
    }
}
