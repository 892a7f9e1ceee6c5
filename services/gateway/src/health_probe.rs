use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::state::SharedState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run_health_probe(state: SharedState) {
    let mut tick = tokio::time::interval(state.config.health_probe_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(every=?state.config.health_probe_interval, "health_probe: started");

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = tick.tick() => {}
        }
        probe_once(&state).await;
    }
    info!("health_probe: stopped");
}

/// Refreshes local reachability and the resident model set, then the
/// health flag of every credentialed remote provider.
pub async fn probe_once(state: &SharedState) {
    probe_local(state).await;

    let credentialed: HashSet<String> = state
        .registry
        .providers()
        .await
        .into_iter()
        .filter(|p| p.has_credentials)
        .map(|p| p.name)
        .collect();

    let targets: Vec<(String, Arc<dyn Backend>)> = state
        .dispatcher
        .remote_backends()
        .filter(|(name, _)| credentialed.contains(*name))
        .map(|(name, backend)| (name.to_string(), backend.clone()))
        .collect();

    for (name, backend) in targets {
        let healthy = matches!(tokio::time::timeout(PROBE_TIMEOUT, backend.ping()).await, Ok(Ok(())));
        if !healthy {
            warn!(backend=%name, "health_probe: provider unhealthy");
        }
        if let Err(e) = state.registry.set_provider_health(&name, healthy).await {
            warn!(backend=%name, "health_probe: {e}");
        }
    }
}

async fn probe_local(state: &SharedState) {
    let Some(local) = &state.local else {
        return;
    };
    match tokio::time::timeout(PROBE_TIMEOUT, local.loaded_models()).await {
        Ok(Ok(resident)) => {
            if !state.local_reachable() {
                info!(url=%local.base_url(), "health_probe: local runtime reachable");
            }
            state.set_local_reachable(true);
            debug!(resident=?resident, "health_probe: resident models");
            state.registry.reconcile_loaded(&resident).await;
            state.monitor.record_loaded_models(resident).await;
        }
        Ok(Err(e)) => {
            warn!("health_probe: local runtime error: {e:#}");
            state.set_local_reachable(false);
        }
        Err(_) => {
            warn!(url=%local.base_url(), "health_probe: local runtime timed out");
            state.set_local_reachable(false);
        }
    }
}
