use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use registry::{AdmissionController, Registry, ResourceMonitor, Selector};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::dispatch::Dispatcher;
use crate::provider_ollama::OllamaBackend;

pub type SharedState = Arc<AppState>;

/// Everything a request or a background task needs, built once in `main`.
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<Registry>,
    pub monitor: Arc<ResourceMonitor>,
    pub admission: AdmissionController,
    pub selector: Selector,
    pub dispatcher: Dispatcher,
    pub local: Option<Arc<OllamaBackend>>,
    /// Result of the last local runtime probe.
    local_reachable: AtomicBool,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        registry: Arc<Registry>,
        monitor: Arc<ResourceMonitor>,
        dispatcher: Dispatcher,
        local: Option<Arc<OllamaBackend>>,
    ) -> Self {
        let admission = AdmissionController::new(monitor.clone(), config.limits());
        let selector = Selector::new(registry.clone(), config.memory_reserve_mb);
        Self {
            config,
            registry,
            monitor,
            admission,
            selector,
            dispatcher,
            local,
            // assume reachable until the first probe says otherwise
            local_reachable: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn local_reachable(&self) -> bool {
        self.local.is_some() && self.local_reachable.load(Ordering::Relaxed)
    }

    pub fn set_local_reachable(&self, reachable: bool) {
        self.local_reachable.store(reachable, Ordering::Relaxed);
    }
}
