//! Admission control: the single backpressure gate in front of every backend.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::context::RequestContext;
use crate::monitor::ResourceMonitor;
use crate::schema::ResourceSnapshot;

pub const DEFAULT_CPU_MAX: f64 = 85.0;
pub const DEFAULT_MEM_MAX: f64 = 85.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cpu,
    Memory,
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Cpu => f.write_str("cpu"),
            Metric::Memory => f.write_str("memory"),
        }
    }
}

/// `resource_overload`: the request was refused before any backend was touched.
#[derive(Clone, Debug, Error, PartialEq, Serialize)]
#[error("resource overload: {metric} at {value:.1}% exceeds {limit:.1}%")]
pub struct Rejection {
    pub metric: Metric,
    pub value: f64,
    pub limit: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct Limits {
    pub cpu_max: f64,
    pub mem_max: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            cpu_max: DEFAULT_CPU_MAX,
            mem_max: DEFAULT_MEM_MAX,
        }
    }
}

impl Limits {
    /// CPU is checked before memory, so an overloaded host reports cpu first.
    pub fn check(&self, snapshot: &ResourceSnapshot) -> Result<(), Rejection> {
        if snapshot.cpu_percent > self.cpu_max {
            return Err(Rejection {
                metric: Metric::Cpu,
                value: snapshot.cpu_percent,
                limit: self.cpu_max,
            });
        }
        if snapshot.memory_percent > self.mem_max {
            return Err(Rejection {
                metric: Metric::Memory,
                value: snapshot.memory_percent,
                limit: self.mem_max,
            });
        }
        Ok(())
    }
}

/// Proof of admission, carrying the snapshot the decision was made on so the
/// selector does not have to sample again.
#[derive(Clone, Debug)]
pub struct Admitted {
    pub snapshot: ResourceSnapshot,
}

pub struct AdmissionController {
    monitor: Arc<ResourceMonitor>,
    limits: Limits,
}

impl AdmissionController {
    pub fn new(monitor: Arc<ResourceMonitor>, limits: Limits) -> Self {
        Self { monitor, limits }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// One monitor read, no network I/O.
    pub async fn admit(&self, ctx: &RequestContext) -> Result<Admitted, Rejection> {
        let snapshot = self.monitor.sample().await;
        match self.limits.check(&snapshot) {
            Ok(()) => Ok(Admitted { snapshot }),
            Err(rejection) => {
                warn!(
                    request_id=%ctx.request_id,
                    metric=%rejection.metric,
                    value=rejection.value,
                    limit=rejection.limit,
                    "admission: rejected"
                );
                Err(rejection)
            }
        }
    }
}
