//! Cache API: named stores of request → response entries.
//!
//! A [`CacheStorage`] is either purely in memory or backed by a directory. The
//! directory holds a single `caches.json` document that is rewritten through a
//! temp file and a rename, so a crash never leaves a half-written store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::try_join_all;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use offline_net::{Fetcher, Request, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, trace};
use url::Url;

use crate::handlers::{CacheMatcher, CacheOpener, PrecacheTarget};
use crate::SwError;

const STORAGE_FILE: &str = "caches.json";

/// Key a request is stored under: its URL without the fragment.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

// ==================== Cache Entry ====================

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (the cache key).
    pub url: String,

    /// Final response URL, after redirects.
    pub response_url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response status text.
    pub status_text: String,

    /// Response headers, in order, duplicates preserved.
    pub headers: Vec<(String, String)>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture a response for storage under `request_url`.
    pub fn from_response(request_url: &Url, response: &Response) -> Self {
        Self {
            url: cache_key(request_url),
            response_url: response.url.to_string(),
            method: "GET".to_string(),
            status: response.status.as_u16(),
            status_text: response.status_text.clone(),
            headers: response
                .headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect(),
            body: response.body.to_vec(),
            cached_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }

    /// Rebuild the stored response.
    pub fn to_response(&self) -> Result<Response, SwError> {
        let url = Url::parse(&self.response_url)
            .map_err(|e| SwError::CacheError(format!("corrupt entry url {:?}: {e}", self.response_url)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| SwError::CacheError(format!("corrupt entry status {}: {e}", self.status)))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SwError::CacheError(format!("corrupt header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SwError::CacheError(format!("corrupt header value {value:?}: {e}")))?;
            headers.append(name, value);
        }

        Ok(Response {
            url,
            status,
            status_text: self.status_text.clone(),
            headers,
            body: Bytes::from(self.body.clone()),
        })
    }
}

mod body_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ==================== Cache ====================

/// A cache instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request URL.
    pub fn match_url(&self, url: &Url) -> Option<&CacheEntry> {
        self.entries.get(&cache_key(url))
    }

    /// Store an entry under its own key.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.url.clone(), entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, url: &Url) -> bool {
        self.entries.remove(&cache_key(url)).is_some()
    }

    /// All keys (URLs), sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// Caches in creation order; this is also the on-disk document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StorageState {
    caches: Vec<Cache>,
}

impl StorageState {
    fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.iter().find(|c| c.name == name)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.caches.iter().position(|c| c.name == name)
    }
}

/// Cache storage (the `caches` global).
#[derive(Debug, Clone, Default)]
pub struct CacheStorage {
    state: Arc<RwLock<StorageState>>,
    dir: Option<PathBuf>,
}

impl CacheStorage {
    /// Create storage that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open storage persisted under `dir`, creating the directory if needed.
    pub async fn open_dir(dir: impl Into<PathBuf>) -> Result<Self, SwError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(STORAGE_FILE);
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<StorageState>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StorageState::default(),
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            caches = state.caches.len(),
            "Cache storage loaded"
        );

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            dir: Some(dir),
        })
    }

    /// Directory backing this storage, if any.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Open a cache, creating (and persisting) it if it doesn't exist.
    pub async fn open(&self, name: &str) -> Result<CacheHandle, SwError> {
        let mut state = self.state.write().await;
        if state.get(name).is_none() {
            state.caches.push(Cache::new(name));
            if let Err(e) = self.persist(&state).await {
                state.caches.pop();
                return Err(e);
            }
            debug!(cache = name, "Cache created");
        }

        Ok(CacheHandle {
            storage: self.clone(),
            name: name.to_string(),
        })
    }

    /// Check if cache exists.
    pub async fn has(&self, name: &str) -> bool {
        self.state.read().await.get(name).is_some()
    }

    /// Delete a cache.
    pub async fn delete(&self, name: &str) -> Result<bool, SwError> {
        let mut state = self.state.write().await;
        let Some(index) = state.position(name) else {
            return Ok(false);
        };

        let removed = state.caches.remove(index);
        if let Err(e) = self.persist(&state).await {
            state.caches.insert(index, removed);
            return Err(e);
        }
        Ok(true)
    }

    /// Get all cache names, in creation order.
    pub async fn keys(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .caches
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Snapshot of a cache's contents.
    pub async fn snapshot(&self, name: &str) -> Option<Cache> {
        self.state.read().await.get(name).cloned()
    }

    /// Match across all caches, oldest cache first.
    pub async fn match_request(&self, request: &Request) -> Result<Option<Response>, SwError> {
        let state = self.state.read().await;
        for cache in &state.caches {
            if let Some(entry) = cache.match_url(&request.url) {
                trace!(cache = %cache.name, url = %request.url, "Cache hit");
                return entry.to_response().map(Some);
            }
        }
        Ok(None)
    }

    async fn persist(&self, state: &StorageState) -> Result<(), SwError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };

        let json = serde_json::to_vec(state)?;
        let tmp = dir.join(format!("{STORAGE_FILE}.tmp"));
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, dir.join(STORAGE_FILE)).await?;

        trace!(bytes = json.len(), "Cache storage persisted");
        Ok(())
    }
}

// ==================== Cache Handle ====================

/// An opened cache, bound to its storage.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    storage: CacheStorage,
    name: String,
}

impl CacheHandle {
    /// Cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch every URL and store all responses, or store nothing.
    ///
    /// Fails on duplicate URLs, non-http(s) URLs, network errors, non-2xx
    /// statuses, 206 partial content and `Vary: *` responses.
    pub async fn add_all(&self, fetcher: &dyn Fetcher, urls: &[Url]) -> Result<(), SwError> {
        let mut seen = HashSet::with_capacity(urls.len());
        for url in urls {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(SwError::UnsupportedScheme(url.to_string()));
            }
            if !seen.insert(cache_key(url)) {
                return Err(SwError::DuplicateRequest(url.to_string()));
            }
        }

        let entries = try_join_all(urls.iter().map(|url| fetch_for_cache(fetcher, url))).await?;

        let mut state = self.storage.state.write().await;
        let index = match state.position(&self.name) {
            Some(index) => index,
            None => {
                state.caches.push(Cache::new(&self.name));
                state.caches.len() - 1
            }
        };

        let previous = state.caches[index].clone();
        for entry in entries {
            state.caches[index].put(entry);
        }

        if let Err(e) = self.storage.persist(&state).await {
            state.caches[index] = previous;
            return Err(e);
        }

        debug!(cache = %self.name, added = urls.len(), "Entries committed");
        Ok(())
    }

    /// Match a request against this cache only.
    pub async fn match_request(&self, request: &Request) -> Result<Option<Response>, SwError> {
        let state = self.storage.state.read().await;
        match state.get(&self.name).and_then(|c| c.match_url(&request.url)) {
            Some(entry) => entry.to_response().map(Some),
            None => Ok(None),
        }
    }

    /// Get all keys (URLs).
    pub async fn keys(&self) -> Vec<String> {
        self.storage
            .state
            .read()
            .await
            .get(&self.name)
            .map(Cache::keys)
            .unwrap_or_default()
    }

    /// Delete entry.
    pub async fn delete(&self, url: &Url) -> Result<bool, SwError> {
        let mut state = self.storage.state.write().await;
        let Some(index) = state.position(&self.name) else {
            return Ok(false);
        };

        let previous = state.caches[index].clone();
        if !state.caches[index].delete(url) {
            return Ok(false);
        }
        if let Err(e) = self.storage.persist(&state).await {
            state.caches[index] = previous;
            return Err(e);
        }
        Ok(true)
    }
}

async fn fetch_for_cache(fetcher: &dyn Fetcher, url: &Url) -> Result<CacheEntry, SwError> {
    let response = fetcher
        .fetch(Request::get(url.clone()))
        .await
        .map_err(|source| SwError::Network {
            url: url.to_string(),
            source,
        })?;

    if !response.ok() || response.status == StatusCode::PARTIAL_CONTENT {
        return Err(SwError::BadResponse {
            url: url.to_string(),
            status: response.status.as_u16(),
        });
    }

    let vary_star = response
        .headers
        .get_all("vary")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim() == "*");
    if vary_star {
        return Err(SwError::CacheError(format!(
            "response for {url} has Vary: * and cannot be cached"
        )));
    }

    Ok(CacheEntry::from_response(url, &response))
}

// ==================== Trait seams ====================

#[async_trait]
impl CacheOpener for CacheStorage {
    type Cache = CacheHandle;

    async fn open(&self, name: &str) -> Result<CacheHandle, SwError> {
        CacheStorage::open(self, name).await
    }
}

#[async_trait]
impl CacheMatcher for CacheStorage {
    async fn match_request(&self, request: &Request) -> Result<Option<Response>, SwError> {
        CacheStorage::match_request(self, request).await
    }
}

#[async_trait]
impl PrecacheTarget for CacheHandle {
    async fn add_all(&self, fetcher: &dyn Fetcher, urls: &[Url]) -> Result<(), SwError> {
        CacheHandle::add_all(self, fetcher, urls).await
    }
}

#[async_trait]
impl CacheMatcher for CacheHandle {
    async fn match_request(&self, request: &Request) -> Result<Option<Response>, SwError> {
        CacheHandle::match_request(self, request).await
    }
}
