//! Install and fetch handlers.
//!
//! Both are plain async functions over the cache and network seams; the
//! host decides when to call them.

use async_trait::async_trait;
use offline_net::{Fetcher, Request, Response};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::PrecacheConfig;
use crate::SwError;

/// Opens (or creates) a named cache store.
#[async_trait]
pub trait CacheOpener: Send + Sync {
    type Cache: PrecacheTarget;

    async fn open(&self, name: &str) -> Result<Self::Cache, SwError>;
}

/// A cache that can be bulk-populated from the network.
#[async_trait]
pub trait PrecacheTarget: Send + Sync {
    /// Fetch and store every URL, or store nothing.
    async fn add_all(&self, fetcher: &dyn Fetcher, urls: &[Url]) -> Result<(), SwError>;
}

/// Looks up a stored response for a request.
#[async_trait]
pub trait CacheMatcher: Send + Sync {
    async fn match_request(&self, request: &Request) -> Result<Option<Response>, SwError>;
}

/// The response handed back for an intercepted request.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Response, exactly as stored or as returned by the network.
    pub response: Response,

    /// Whether it was served from cache.
    pub from_cache: bool,
}

/// Precache the configured manifest into the configured cache.
///
/// Resolves once every manifest entry is stored. Any failure rejects the
/// whole install and nothing from this attempt is committed.
pub async fn handle_install<O, F>(
    opener: &O,
    fetcher: &F,
    config: &PrecacheConfig,
) -> Result<(), SwError>
where
    O: CacheOpener + ?Sized,
    F: Fetcher,
{
    let urls = config.resolved_manifest()?;
    info!(cache = %config.cache_name, entries = urls.len(), "Precaching manifest");

    let cache = opener.open(&config.cache_name).await?;
    match cache.add_all(fetcher, &urls).await {
        Ok(()) => {
            info!(cache = %config.cache_name, "Precache complete");
            Ok(())
        }
        Err(e) => {
            warn!(cache = %config.cache_name, error = %e, "Precache failed");
            Err(e)
        }
    }
}

/// Answer a request cache-first, falling back to one network fetch.
pub async fn handle_fetch<M, F>(
    matcher: &M,
    fetcher: &F,
    request: Request,
) -> Result<FetchResponse, SwError>
where
    M: CacheMatcher + ?Sized,
    F: Fetcher + ?Sized,
{
    if let Some(response) = matcher.match_request(&request).await? {
        debug!(url = %request.url, "Serving from cache");
        return Ok(FetchResponse {
            response,
            from_cache: true,
        });
    }

    debug!(url = %request.url, "Cache miss, fetching from network");
    let response = network_fetch(fetcher, request).await?;
    Ok(FetchResponse {
        response,
        from_cache: false,
    })
}

pub(crate) async fn network_fetch<F: Fetcher + ?Sized>(
    fetcher: &F,
    request: Request,
) -> Result<Response, SwError> {
    let url = request.url.to_string();
    fetcher
        .fetch(request)
        .await
        .map_err(|source| SwError::Network { url, source })
}
