use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::state::SharedState;

/// Periodic host sampling. Under memory pressure, drops the lowest-priority
/// loaded model, one per tick.
pub async fn run_monitor_loop(state: SharedState) {
    let mut tick = tokio::time::interval(state.config.monitor_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(every=?state.config.monitor_interval, "monitor_loop: started");

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = tick.tick() => {}
        }
        sample_and_relieve(&state).await;
    }
    info!("monitor_loop: stopped");
}

/// Returns the evicted model, if memory pressure forced one out.
pub async fn sample_and_relieve(state: &SharedState) -> Option<String> {
    let snap = state.monitor.sample().await;
    debug!(
        cpu=snap.cpu_percent,
        mem=snap.memory_percent,
        active_models=snap.active_model_count,
        stale=snap.stale,
        "monitor_loop: sample"
    );
    if snap.stale || snap.memory_percent <= state.config.mem_max {
        return None;
    }

    let victim = state.registry.evict_lowest_priority().await?;
    warn!(
        model=%victim,
        mem=snap.memory_percent,
        limit=state.config.mem_max,
        "monitor_loop: memory pressure, evicting"
    );
    if let Some(local) = &state.local {
        if let Err(e) = local.unload(&victim).await {
            warn!(model=%victim, "monitor_loop: runtime unload failed: {e:#}");
        }
    }
    Some(victim)
}

/// Asks the local runtime to drop models the registry already evicted.
/// Runs detached so the request path never waits on it.
pub fn release_evicted(state: &SharedState, names: Vec<String>) {
    if names.is_empty() {
        return;
    }
    let Some(local) = state.local.clone() else {
        return;
    };
    tokio::spawn(async move {
        for name in names {
            match local.unload(&name).await {
                Ok(()) => info!(model=%name, "runtime: unloaded"),
                Err(e) => warn!(model=%name, "runtime: unload failed: {e:#}"),
            }
        }
    });
}
