//! Host tool for the offline precache worker.
//!
//! Provides commands for:
//! - Running the install event against a live origin
//! - Answering a request cache-first with network fallback
//! - Listing what the persistent cache storage holds
//!
//! ## Usage
//!
//! ```bash
//! # Precache the app shell served by the dev server
//! precache --base-url http://localhost:5173/service-worker.js install
//!
//! # Serve the root page (from cache once installed)
//! precache fetch / --output index.html
//!
//! # Show cache stores and their keys
//! precache list
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use offline_common::{init_logging, LogConfig, LogFormat, OfflineError, OptionExt, ResultExt};
use offline_net::{FetcherConfig, HttpFetcher, Request, Url};
use offline_sw::{CacheStorage, PrecacheConfig, ServiceWorkerHost, SwError};
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "precache")]
#[command(about = "Install the offline precache and serve requests cache-first")]
struct Cli {
    /// Precache configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Base URL manifest entries and request paths resolve against
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Directory for persistent cache storage
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Network timeout in seconds
    #[arg(long, global = true, default_value = "30")]
    timeout: u64,

    /// Log format (pretty, compact, json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    /// Log filter directives (e.g. "offline_sw=debug,reqwest=warn")
    #[arg(long, global = true)]
    log_filter: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Precache every manifest entry into the cache store
    Install,

    /// Answer a request cache-first, falling back to the network
    Fetch {
        /// Absolute URL, or a path resolved against the base URL
        url: String,
        /// Write the response body to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List cache stores and their entries
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(log_config(&cli));

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(category = e.category(), error = %e, "precache failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> offline_common::Result<()> {
    let config = load_config(cli.config.as_deref(), cli.base_url.as_deref())?;

    let cache_dir = match cli.cache_dir {
        Some(dir) => dir,
        None => dirs::cache_dir()
            .ok_or_not_found("platform cache directory")?
            .join("offline-sw"),
    };
    let caches = CacheStorage::open_dir(&cache_dir)
        .await
        .map_err(|e| sw_error(format!("opening cache storage at {}", cache_dir.display()), e))?;

    let fetcher = HttpFetcher::new(FetcherConfig {
        default_timeout: Duration::from_secs(cli.timeout),
        ..Default::default()
    })
    .map_err(|e| OfflineError::network_with_source("building HTTP client", e))?;

    let (host, mut events) = ServiceWorkerHost::new(config, caches, fetcher);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(?event, "Lifecycle event");
        }
    });

    match cli.command {
        Commands::Install => {
            host.install()
                .await
                .map_err(|e| sw_error("install failed", e))?;

            let name = &host.config().cache_name;
            let stored = host
                .caches()
                .snapshot(name)
                .await
                .map(|c| c.len())
                .unwrap_or_default();
            println!("Installed {stored} entries into cache {name:?}");
        }

        Commands::Fetch { url, output } => {
            if !host.restore().await {
                info!("No complete precache found; request is uncontrolled");
            }

            let url = resolve_request_url(host.config(), &url)?;
            let served = host
                .fetch(Request::get(url.clone()))
                .await
                .map_err(|e| sw_error(format!("fetching {url}"), e))?;

            let source = if served.from_cache { "cache" } else { "network" };
            println!(
                "{} {} ({source}, {} bytes)",
                served.response.status.as_u16(),
                served.response.status_text,
                served.response.body.len()
            );

            if let Some(path) = output {
                std::fs::write(&path, &served.response.body)?;
                println!("Body written to: {}", path.display());
            }
        }

        Commands::List => {
            for name in host.caches().keys().await {
                let keys = host
                    .caches()
                    .snapshot(&name)
                    .await
                    .map(|c| c.keys())
                    .unwrap_or_default();
                println!("{name} ({} entries)", keys.len());
                for key in keys {
                    println!("  {key}");
                }
            }
        }
    }

    Ok(())
}

fn log_config(cli: &Cli) -> LogConfig {
    let config = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    let config = config.with_format(cli.log_format);

    match &cli.log_filter {
        Some(filter) => config.with_filter(filter.clone()),
        None => config,
    }
}

/// Load the precache configuration, applying the command-line base URL.
fn load_config(path: Option<&Path>, base_url: Option<&str>) -> offline_common::Result<PrecacheConfig> {
    let mut config = match path {
        Some(path) => PrecacheConfig::from_json_file(path).map_err(|e| {
            OfflineError::config_with_source(format!("loading {}", path.display()), e)
        })?,
        None => PrecacheConfig::default(),
    };

    if let Some(base_url) = base_url {
        config = config.with_base_url(base_url);
    }

    config
        .validate()
        .map_err(|e| OfflineError::config_with_source("invalid precache configuration", e))?;
    Ok(config)
}

/// Resolve a request argument against the configured base URL.
fn resolve_request_url(config: &PrecacheConfig, url: &str) -> offline_common::Result<Url> {
    let base = config
        .base()
        .map_err(|e| OfflineError::config_with_source("invalid base URL", e))?;
    base.join(url).context(format!("resolving request URL {url:?}"))
}

fn sw_error(context: impl Into<String>, e: SwError) -> OfflineError {
    match e {
        SwError::Network { .. } => OfflineError::network_with_source(context, e),
        SwError::Config(_) | SwError::InvalidManifestEntry { .. } => {
            OfflineError::config_with_source(context, e)
        }
        _ => OfflineError::cache_with_source(context, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fetch_with_globals() {
        let cli = Cli::try_parse_from([
            "precache",
            "fetch",
            "/",
            "--cache-dir",
            "/tmp/offline",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/offline")));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Commands::Fetch { ref url, .. } if url == "/"));
    }

    #[test]
    fn test_log_config_from_flags() {
        let cli = Cli::try_parse_from([
            "precache",
            "-v",
            "--log-filter",
            "offline_sw=trace",
            "list",
        ])
        .unwrap();

        let config = log_config(&cli);
        assert!(config.include_location);
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.filter.as_deref(), Some("offline_sw=trace"));

        let cli = Cli::try_parse_from(["precache", "list"]).unwrap();
        assert_eq!(log_config(&cli).filter, None);
    }

    #[test]
    fn test_load_config_defaults_and_override() {
        let config = load_config(None, Some("https://distance.example/sw.js")).unwrap();
        assert_eq!(config.cache_name, "Distance calculator");
        assert_eq!(config.base_url, "https://distance.example/sw.js");
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("precache.json");
        std::fs::write(
            &path,
            r#"{ "cache_name": "calc-v1", "manifest": ["/", "/index.js"] }"#,
        )
        .unwrap();

        let config = load_config(Some(&path), None).unwrap();
        assert_eq!(config.cache_name, "calc-v1");
        assert_eq!(config.manifest.len(), 2);
    }

    #[test]
    fn test_load_config_missing_file_is_config_error() {
        let err = load_config(Some(Path::new("/nonexistent/precache.json")), None).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_load_config_rejects_bad_base_url() {
        let err = load_config(None, Some("::not a url")).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_resolve_request_url() {
        let config = PrecacheConfig::default().with_base_url("https://distance.example/app/sw.js");

        assert_eq!(
            resolve_request_url(&config, "/").unwrap().as_str(),
            "https://distance.example/"
        );
        assert_eq!(
            resolve_request_url(&config, "style.css").unwrap().as_str(),
            "https://distance.example/app/style.css"
        );
        assert_eq!(
            resolve_request_url(&config, "https://cdn.example/x.js").unwrap().as_str(),
            "https://cdn.example/x.js"
        );
    }

    #[test]
    fn test_network_errors_keep_their_category() {
        let err = sw_error(
            "fetching /",
            SwError::Network {
                url: "https://distance.example/".to_string(),
                source: offline_net::NetError::RequestFailed("refused".to_string()),
            },
        );
        assert_eq!(err.category(), "network");

        let err = sw_error("install failed", SwError::DuplicateRequest("/".to_string()));
        assert_eq!(err.category(), "cache");
    }
}
