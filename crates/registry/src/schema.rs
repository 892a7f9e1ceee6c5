use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Floor applied to the rolling response time before it is used as a divisor.
pub const MIN_RESPONSE_SECS: f64 = 0.001;

/// Response time assumed for a backend that has not answered yet.
pub const INITIAL_RESPONSE_SECS: f64 = 1.0;

/// Which client-facing protocol a request speaks. Doubles as the capability
/// a backend needs in order to serve it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    ChatCompletion,
    Embedding,
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolKind::ChatCompletion => f.write_str("chat_completion"),
            ProtocolKind::Embedding => f.write_str("embedding"),
        }
    }
}

/// Exponentially weighted call statistics for one backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RollingStats {
    pub avg_response_secs: f64,
    pub success_rate: f64,
    pub attempts: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

impl Default for RollingStats {
    fn default() -> Self {
        Self {
            avg_response_secs: INITIAL_RESPONSE_SECS,
            success_rate: 1.0,
            attempts: 0,
            last_used: None,
            last_success: None,
        }
    }
}

impl RollingStats {
    /// Folds one attempt into the averages. `weight` is the share given to the
    /// newest sample. Latency only moves the response-time average on success,
    /// so fast connection refusals do not make a dead backend look quick.
    pub fn record(&mut self, weight: f64, succeeded: bool, latency_secs: f64, now: DateTime<Utc>) {
        let outcome = if succeeded { 1.0 } else { 0.0 };
        self.success_rate = (1.0 - weight) * self.success_rate + weight * outcome;
        if succeeded {
            let latency = latency_secs.max(0.0);
            self.avg_response_secs = (1.0 - weight) * self.avg_response_secs + weight * latency;
            self.last_success = Some(now);
        }
        self.last_used = Some(now);
        self.attempts += 1;
    }

    /// success_rate / response_time, higher is better.
    pub fn score(&self) -> f64 {
        self.success_rate / self.avg_response_secs.max(MIN_RESPONSE_SECS)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub memory_cost_mb: u64,
    /// Lower is preferred.
    pub priority: i32,
    pub embeddings: bool,
    pub loaded: bool,
    pub stats: RollingStats,
}

impl ModelDescriptor {
    pub fn serves(&self, kind: ProtocolKind) -> bool {
        match kind {
            ProtocolKind::ChatCompletion => true,
            ProtocolKind::Embedding => self.embeddings,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub endpoint: String,
    pub has_credentials: bool,
    pub embeddings: bool,
    pub healthy: bool,
    pub stats: RollingStats,
}

impl ProviderDescriptor {
    pub fn score(&self) -> f64 {
        self.stats.score()
    }

    pub fn serves(&self, kind: ProtocolKind) -> bool {
        match kind {
            ProtocolKind::ChatCompletion => true,
            ProtocolKind::Embedding => self.embeddings,
        }
    }
}

/// One host reading. Superseded by the next sample, never mutated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub total_memory_mb: u64,
    pub active_model_count: usize,
    pub timestamp: DateTime<Utc>,
    /// Set when the host query failed and this is the last good reading.
    pub stale: bool,
}

impl ResourceSnapshot {
    /// Free memory in MB, derived from the used percentage of total RAM.
    pub fn headroom_mb(&self) -> u64 {
        let free_percent = (100.0 - self.memory_percent).clamp(0.0, 100.0);
        (self.total_memory_mb as f64 * free_percent / 100.0).floor() as u64
    }
}
