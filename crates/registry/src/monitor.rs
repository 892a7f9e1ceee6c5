//! Host resource sampling.
//!
//! The monitor owns the only handle to the OS query and caches the last good
//! reading, so callers on the request path never wait longer than the sample
//! bound and never see an error.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use sysinfo::System;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

use crate::schema::ResourceSnapshot;

pub const DEFAULT_SAMPLE_BOUND: Duration = Duration::from_secs(2);
pub const DEFAULT_SMOOTHING_WINDOW: usize = 3;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("host query unavailable: {0}")]
    Unavailable(String),
    #[error("host query timed out after {0:?}")]
    TimedOut(Duration),
    #[error("probe task failed: {0}")]
    Join(String),
    #[error("probe lock poisoned")]
    Poisoned,
}

/// Raw host usage as reported by the OS.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HostUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub total_memory_mb: u64,
}

/// Blocking OS query. Runs on a blocking thread.
pub trait ResourceProbe: Send {
    fn probe(&mut self) -> Result<HostUsage, ProbeError>;

    /// Readings taken closer together than this are not meaningful; the
    /// monitor serves its cached snapshot instead.
    fn min_interval(&self) -> Duration {
        Duration::ZERO
    }
}

pub struct SysinfoProbe {
    sys: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut sys = System::new();
        // cpu usage is a delta between refreshes; prime the first one
        sys.refresh_cpu();
        sys.refresh_memory();
        Self { sys }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn probe(&mut self) -> Result<HostUsage, ProbeError> {
        self.sys.refresh_cpu();
        self.sys.refresh_memory();

        let total = self.sys.total_memory();
        if total == 0 {
            return Err(ProbeError::Unavailable("total memory reported as 0".to_string()));
        }
        let used = self.sys.used_memory();

        Ok(HostUsage {
            cpu_percent: f64::from(self.sys.global_cpu_info().cpu_usage()),
            memory_percent: used as f64 / total as f64 * 100.0,
            total_memory_mb: total / (1024 * 1024),
        })
    }

    // cpu usage is the delta since the previous refresh
    fn min_interval(&self) -> Duration {
        sysinfo::MINIMUM_CPU_UPDATE_INTERVAL
    }
}

/// Fixed reading, for tests and dry runs without host sampling.
pub struct StaticProbe(pub HostUsage);

impl ResourceProbe for StaticProbe {
    fn probe(&mut self) -> Result<HostUsage, ProbeError> {
        Ok(self.0)
    }
}

#[derive(Default)]
struct MonitorState {
    readings: VecDeque<HostUsage>,
    last: Option<ResourceSnapshot>,
    sampled_at: Option<Instant>,
    loaded_models: Vec<String>,
}

pub struct ResourceMonitor {
    probe: Arc<Mutex<Box<dyn ResourceProbe>>>,
    state: RwLock<MonitorState>,
    window: usize,
    bound: Duration,
    min_interval: Duration,
}

impl ResourceMonitor {
    pub fn new(probe: Box<dyn ResourceProbe>) -> Self {
        Self::with_settings(probe, DEFAULT_SMOOTHING_WINDOW, DEFAULT_SAMPLE_BOUND)
    }

    pub fn with_settings(probe: Box<dyn ResourceProbe>, window: usize, bound: Duration) -> Self {
        let min_interval = probe.min_interval();
        Self {
            probe: Arc::new(Mutex::new(probe)),
            state: RwLock::new(MonitorState::default()),
            window: window.max(1),
            bound,
            min_interval,
        }
    }

    /// Takes a fresh reading, smoothed over the last `window` samples. When the
    /// host query fails, returns the previous snapshot marked stale. A good
    /// reading younger than the probe's minimum interval is served as is.
    pub async fn sample(&self) -> ResourceSnapshot {
        if let Some(snap) = self.recent().await {
            return snap;
        }
        match self.read_host().await {
            Ok(usage) => {
                let mut st = self.state.write().await;
                st.readings.push_back(usage);
                while st.readings.len() > self.window {
                    st.readings.pop_front();
                }
                let snap = smoothed(&st.readings, st.loaded_models.len());
                st.last = Some(snap.clone());
                st.sampled_at = Some(Instant::now());
                snap
            }
            Err(e) => {
                warn!(error=%e, "resource monitor: host query failed, serving last snapshot");
                let st = self.state.read().await;
                match &st.last {
                    Some(last) => ResourceSnapshot {
                        active_model_count: st.loaded_models.len(),
                        stale: true,
                        ..last.clone()
                    },
                    None => ResourceSnapshot {
                        cpu_percent: 0.0,
                        memory_percent: 0.0,
                        total_memory_mb: 0,
                        active_model_count: st.loaded_models.len(),
                        timestamp: Utc::now(),
                        stale: true,
                    },
                }
            }
        }
    }

    /// Last snapshot produced by `sample`, without touching the host.
    pub async fn last(&self) -> Option<ResourceSnapshot> {
        self.state.read().await.last.clone()
    }

    /// Records the set of models the local runtime currently holds in memory.
    pub async fn record_loaded_models(&self, names: Vec<String>) {
        self.state.write().await.loaded_models = names;
    }

    pub async fn loaded_models(&self) -> Vec<String> {
        self.state.read().await.loaded_models.clone()
    }

    async fn recent(&self) -> Option<ResourceSnapshot> {
        if self.min_interval.is_zero() {
            return None;
        }
        let st = self.state.read().await;
        let at = st.sampled_at?;
        if at.elapsed() >= self.min_interval {
            return None;
        }
        let last = st.last.as_ref()?;
        Some(ResourceSnapshot { active_model_count: st.loaded_models.len(), ..last.clone() })
    }

    async fn read_host(&self) -> Result<HostUsage, ProbeError> {
        let probe = self.probe.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = probe.lock().map_err(|_| ProbeError::Poisoned)?;
            guard.probe()
        });

        match tokio::time::timeout(self.bound, task).await {
            Ok(Ok(res)) => res,
            Ok(Err(e)) => Err(ProbeError::Join(e.to_string())),
            Err(_) => Err(ProbeError::TimedOut(self.bound)),
        }
    }
}

fn smoothed(readings: &VecDeque<HostUsage>, active_model_count: usize) -> ResourceSnapshot {
    let n = readings.len().max(1) as f64;
    let cpu = readings.iter().map(|r| r.cpu_percent).sum::<f64>() / n;
    let mem = readings.iter().map(|r| r.memory_percent).sum::<f64>() / n;
    let total = readings.back().map(|r| r.total_memory_mb).unwrap_or(0);

    ResourceSnapshot {
        cpu_percent: cpu,
        memory_percent: mem,
        total_memory_mb: total,
        active_model_count,
        timestamp: Utc::now(),
        stale: false,
    }
}
