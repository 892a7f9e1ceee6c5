use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct HealthResp {
    pub status: &'static str,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub active_models: usize,
    pub timestamp: DateTime<Utc>,
}

/// `degraded` when the host is over an admission limit, the host reading is
/// stale, or the local runtime did not answer its last probe.
pub async fn get_health(State(st): State<SharedState>) -> Json<HealthResp> {
    let snap = match st.monitor.last().await {
        Some(s) => s,
        None => st.monitor.sample().await,
    };

    let over_limit = st.admission.limits().check(&snap).is_err();
    let local_down = st.local.is_some() && !st.local_reachable();
    let status = if over_limit || snap.stale || local_down { "degraded" } else { "healthy" };

    Json(HealthResp {
        status,
        cpu_percent: snap.cpu_percent,
        memory_percent: snap.memory_percent,
        active_models: st.registry.loaded_count().await,
        timestamp: snap.timestamp,
    })
}
