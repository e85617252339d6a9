//! Precache configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::SwError;

/// Name of the cache store the app precaches into.
pub const DEFAULT_CACHE_NAME: &str = "Distance calculator";

/// Location of the worker script; manifest entries resolve against it.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5173/service-worker.js";

/// The app shell: root page, stylesheet, script bundle and icon.
pub const DEFAULT_MANIFEST: [&str; 4] = [
    "/",
    "../src/routes/style.css",
    "../src/lib/index.js",
    "/ICON_192X192.png",
];

/// What to precache and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecacheConfig {
    /// Name of the cache store populated at install time.
    pub cache_name: String,

    /// URL the manifest entries are resolved against.
    pub base_url: String,

    /// Ordered list of resources to precache.
    pub manifest: Vec<String>,
}

impl Default for PrecacheConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl PrecacheConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, SwError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SwError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Set the cache name.
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Replace the manifest.
    pub fn with_manifest<I, S>(mut self, manifest: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest = manifest.into_iter().map(Into::into).collect();
        self
    }

    /// Parsed base URL.
    pub fn base(&self) -> Result<Url, SwError> {
        Url::parse(&self.base_url)
            .map_err(|e| SwError::Config(format!("invalid base_url {:?}: {e}", self.base_url)))
    }

    /// Resolve every manifest entry to an absolute http(s) URL, in order.
    ///
    /// Entries use URL-relative semantics, so `../src/lib/index.js` against
    /// `http://host/service-worker.js` becomes `http://host/src/lib/index.js`.
    pub fn resolved_manifest(&self) -> Result<Vec<Url>, SwError> {
        let base = self.base()?;

        self.manifest
            .iter()
            .map(|entry| {
                let mut url = base.join(entry).map_err(|e| SwError::InvalidManifestEntry {
                    entry: entry.clone(),
                    reason: e.to_string(),
                })?;

                if !matches!(url.scheme(), "http" | "https") {
                    return Err(SwError::InvalidManifestEntry {
                        entry: entry.clone(),
                        reason: format!("unsupported scheme {:?}", url.scheme()),
                    });
                }

                url.set_fragment(None);
                Ok(url)
            })
            .collect()
    }

    /// Check the configuration without touching the network.
    pub fn validate(&self) -> Result<(), SwError> {
        if self.cache_name.trim().is_empty() {
            return Err(SwError::Config("cache_name must not be empty".to_string()));
        }
        self.resolved_manifest()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PrecacheConfig::default();
        assert_eq!(config.cache_name, "Distance calculator");
        assert_eq!(config.manifest.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_manifest_resolution() {
        let urls = PrecacheConfig::default().resolved_manifest().unwrap();
        let urls: Vec<&str> = urls.iter().map(Url::as_str).collect();

        assert_eq!(
            urls,
            vec![
                "http://localhost:5173/",
                "http://localhost:5173/src/routes/style.css",
                "http://localhost:5173/src/lib/index.js",
                "http://localhost:5173/ICON_192X192.png",
            ]
        );
    }

    #[test]
    fn test_relative_entries_follow_base_directory() {
        let config = PrecacheConfig::default()
            .with_base_url("https://maps.example/app/sw.js")
            .with_manifest(["./", "style.css", "../shared/icon.png", "/abs.js#top"]);

        let urls = config.resolved_manifest().unwrap();
        let urls: Vec<&str> = urls.iter().map(Url::as_str).collect();

        assert_eq!(
            urls,
            vec![
                "https://maps.example/app/",
                "https://maps.example/app/style.css",
                "https://maps.example/shared/icon.png",
                "https://maps.example/abs.js",
            ]
        );
    }

    #[test]
    fn test_rejects_non_http_entries() {
        let config = PrecacheConfig::default().with_manifest(["/", "data:text/plain,hi"]);

        assert!(matches!(
            config.resolved_manifest(),
            Err(SwError::InvalidManifestEntry { entry, .. }) if entry == "data:text/plain,hi"
        ));
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let config = PrecacheConfig::default().with_base_url("not a url");
        assert!(matches!(config.validate(), Err(SwError::Config(_))));
    }

    #[test]
    fn test_rejects_empty_cache_name() {
        let config = PrecacheConfig::default().with_cache_name("  ");
        assert!(matches!(config.validate(), Err(SwError::Config(_))));
    }

    #[test]
    fn test_from_json_partial() {
        let config = PrecacheConfig::from_json_str(
            r#"{ "base_url": "https://distance.example/", "manifest": ["/", "/index.js"] }"#,
        )
        .unwrap();

        assert_eq!(config.cache_name, DEFAULT_CACHE_NAME);
        assert_eq!(config.base_url, "https://distance.example/");
        assert_eq!(config.manifest, vec!["/", "/index.js"]);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("precache.json");
        std::fs::write(&path, r#"{ "cache_name": "v2" }"#).unwrap();

        let config = PrecacheConfig::from_json_file(&path).unwrap();
        assert_eq!(config.cache_name, "v2");
        assert_eq!(config.manifest.len(), 4);
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(matches!(
            PrecacheConfig::from_json_str("{ manifest: "),
            Err(SwError::Serialization(_))
        ));
    }
}
