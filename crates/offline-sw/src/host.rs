//! Lifecycle host: binds the handlers to install and fetch events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use offline_net::{Fetcher, Request};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::config::PrecacheConfig;
use crate::handlers::{handle_fetch, handle_install, network_fetch, FetchResponse};
use crate::SwError;

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Install event in flight (precache running).
    Installing,
    /// Precache finished; the worker controls fetches.
    Installed,
    /// Install failed or a newer worker replaced this one.
    Redundant,
}

/// A service worker instance.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Error message if install failed.
    pub error: Option<String>,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    fn new() -> Self {
        Self {
            id: ServiceWorkerId::new(),
            state: ServiceWorkerState::Parsed,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if installed.
    pub fn is_installed(&self) -> bool {
        self.state == ServiceWorkerState::Installed
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

/// Service worker events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
}

#[derive(Debug, Default)]
struct Registration {
    installing: Option<ServiceWorker>,
    installed: Option<ServiceWorker>,
}

// ==================== Host ====================

/// Drives a worker through install and routes fetches through it.
pub struct ServiceWorkerHost<F> {
    config: PrecacheConfig,
    caches: CacheStorage,
    fetcher: F,
    registration: RwLock<Registration>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl<F: Fetcher> ServiceWorkerHost<F> {
    /// Create a new host.
    pub fn new(
        config: PrecacheConfig,
        caches: CacheStorage,
        fetcher: F,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                config,
                caches,
                fetcher,
                registration: RwLock::new(Registration::default()),
                event_tx,
            },
            event_rx,
        )
    }

    /// Precache configuration.
    pub fn config(&self) -> &PrecacheConfig {
        &self.config
    }

    /// Cache storage.
    pub fn caches(&self) -> &CacheStorage {
        &self.caches
    }

    /// Network fetcher.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// The worker currently controlling fetches.
    pub async fn installed_worker(&self) -> Option<ServiceWorker> {
        self.registration.read().await.installed.clone()
    }

    /// Run the install event for a fresh worker.
    ///
    /// Resolves once precaching is done. A worker whose precache fails, or
    /// that is superseded by a later `install()`, becomes redundant.
    pub async fn install(&self) -> Result<ServiceWorkerId, SwError> {
        let mut worker = ServiceWorker::new();
        let id = worker.id;
        worker.set_state(ServiceWorkerState::Installing);

        {
            let mut registration = self.registration.write().await;
            if let Some(mut previous) = registration.installing.replace(worker) {
                previous.set_state(ServiceWorkerState::Redundant);
                self.emit(previous.id, ServiceWorkerState::Redundant);
            }
        }
        self.emit(id, ServiceWorkerState::Installing);

        let result = handle_install(&self.caches, &self.fetcher, &self.config).await;

        let mut registration = self.registration.write().await;
        let still_current = registration.installing.as_ref().map(|w| w.id) == Some(id);
        if !still_current {
            debug!(?id, "Install finished for superseded worker");
            return match result {
                Ok(()) => Err(SwError::StateError(
                    "install superseded by a newer worker".to_string(),
                )),
                Err(e) => Err(e),
            };
        }

        let Some(mut worker) = registration.installing.take() else {
            return Err(SwError::StateError("installing worker vanished".to_string()));
        };

        match result {
            Ok(()) => {
                worker.set_state(ServiceWorkerState::Installed);
                if let Some(mut old) = registration.installed.replace(worker) {
                    old.set_state(ServiceWorkerState::Redundant);
                    self.emit(old.id, ServiceWorkerState::Redundant);
                }
                info!(?id, cache = %self.config.cache_name, "Service worker installed");
                self.emit(id, ServiceWorkerState::Installed);
                Ok(id)
            }
            Err(e) => {
                worker.error = Some(e.to_string());
                worker.set_state(ServiceWorkerState::Redundant);
                warn!(?id, error = %e, "Service worker install failed");
                self.emit(id, ServiceWorkerState::Redundant);
                Err(e)
            }
        }
    }

    /// Take control on startup if a previous run already precached.
    ///
    /// Only a cache holding every manifest entry counts: a failed install
    /// leaves its cache behind, empty. Returns whether a worker is now
    /// installed.
    pub async fn restore(&self) -> bool {
        let Ok(urls) = self.config.resolved_manifest() else {
            return false;
        };
        let Some(cache) = self.caches.snapshot(&self.config.cache_name).await else {
            return false;
        };
        if let Some(missing) = urls.iter().find(|url| cache.match_url(url).is_none()) {
            debug!(cache = %self.config.cache_name, %missing, "Precache incomplete, not restoring");
            return false;
        }

        let mut registration = self.registration.write().await;
        if registration.installed.is_none() {
            let mut worker = ServiceWorker::new();
            worker.set_state(ServiceWorkerState::Installed);
            debug!(id = ?worker.id, cache = %self.config.cache_name, "Restored installed worker");
            self.emit(worker.id, ServiceWorkerState::Installed);
            registration.installed = Some(worker);
        }
        true
    }

    /// Handle a fetch event.
    ///
    /// Without an installed worker the request is uncontrolled and goes
    /// straight to the network.
    pub async fn fetch(&self, request: Request) -> Result<FetchResponse, SwError> {
        let controlled = self.registration.read().await.installed.is_some();
        if !controlled {
            debug!(url = %request.url, "Uncontrolled fetch");
            let response = network_fetch(&self.fetcher, request).await?;
            return Ok(FetchResponse {
                response,
                from_cache: false,
            });
        }

        handle_fetch(&self.caches, &self.fetcher, request).await
    }

    fn emit(&self, worker_id: ServiceWorkerId, new_state: ServiceWorkerState) {
        let _ = self.event_tx.send(ServiceWorkerEvent::StateChange {
            worker_id,
            new_state,
        });
    }
}
