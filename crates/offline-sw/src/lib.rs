//! # Offline Service Worker
//!
//! Install-time precache and cache-first fetch handling for the
//! "Distance calculator" web app.
//!
//! ## Features
//!
//! - **Precache**: `handle_install()` opens a named cache and bulk-adds the manifest
//! - **Fetch Interception**: `handle_fetch()` serves cache-first with network fallback
//! - **Cache API**: `CacheStorage::open()`, `add_all()`, `match_request()`
//! - **Lifecycle**: `ServiceWorkerHost` drives install and fetch events
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerHost (event registration)
//!     │
//!     ├── handle_install(opener, fetcher, config)
//!     │       └── CacheStorage::open(name) → CacheHandle::add_all(urls)
//!     │
//!     └── handle_fetch(matcher, fetcher, request)
//!             └── CacheStorage::match_request → hit | Fetcher::fetch
//!
//! CacheStorage (caches)
//!     └── Cache
//!             └── Request URL → CacheEntry
//! ```

use offline_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod config;
pub mod handlers;
pub mod host;

pub use cache::{Cache, CacheEntry, CacheHandle, CacheStorage};
pub use config::PrecacheConfig;
pub use handlers::{
    handle_fetch, handle_install, CacheMatcher, CacheOpener, FetchResponse, PrecacheTarget,
};
pub use host::{ServiceWorker, ServiceWorkerEvent, ServiceWorkerHost, ServiceWorkerId, ServiceWorkerState};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum SwError {
    #[error("Invalid manifest entry {entry:?}: {reason}")]
    InvalidManifestEntry { entry: String, reason: String },

    #[error("Duplicate request in precache list: {0}")]
    DuplicateRequest(String),

    #[error("Unsupported scheme for cache request: {0}")]
    UnsupportedScheme(String),

    #[error("Bad response for {url}: status {status}")]
    BadResponse { url: String, status: u16 },

    #[error("Network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: NetError,
    },

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    StateError(String),
}
