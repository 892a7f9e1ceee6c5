//! Backend registry: the one lock-guarded table of local models and remote
//! providers. Every mutation and the provider score ordering live behind the
//! same `RwLock`, and no I/O ever happens while it is held.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::catalog::{Catalog, ProviderSpec};
use crate::schema::{ModelDescriptor, ProtocolKind, ProviderDescriptor, ResourceSnapshot};

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("unknown backend: {0}")]
    UnknownBackend(String),
    #[error("capacity reached: {loaded} of {max} models loaded")]
    CapacityReached { loaded: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Clone, Copy, Debug)]
pub struct RegistrySettings {
    pub max_concurrent_models: usize,
    /// Weight of the newest sample in the rolling averages.
    pub ema_weight: f64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            max_concurrent_models: 2,
            ema_weight: 0.3,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ProviderView {
    #[serde(flatten)]
    pub descriptor: ProviderDescriptor,
    pub score: f64,
}

/// Point-in-time copy of the registry, for inspection endpoints.
#[derive(Clone, Debug, Serialize)]
pub struct RegistryView {
    pub max_concurrent_models: usize,
    pub models: Vec<ModelDescriptor>,
    pub providers: Vec<ProviderView>,
}

struct Tables {
    /// Kept sorted by priority, best first.
    models: Vec<ModelDescriptor>,
    /// Catalog order, never reordered.
    providers: Vec<ProviderDescriptor>,
    /// Indices into `providers`, best first. Valid only when `order_dirty` is false.
    order: Vec<usize>,
    order_dirty: bool,
}

impl Tables {
    fn loaded_count(&self) -> usize {
        self.models.iter().filter(|m| m.loaded).count()
    }

    fn model_mut(&mut self, name: &str) -> Option<&mut ModelDescriptor> {
        self.models.iter_mut().find(|m| m.name == name)
    }

    /// Lowest-priority loaded model other than `except`.
    fn eviction_candidate(&self, except: Option<&str>) -> Option<usize> {
        self.models
            .iter()
            .enumerate()
            .filter(|(_, m)| m.loaded && Some(m.name.as_str()) != except)
            .max_by_key(|(_, m)| m.priority)
            .map(|(i, _)| i)
    }

    fn resort(&mut self) {
        let providers = &self.providers;
        let mut order: Vec<usize> = (0..providers.len()).collect();
        order.sort_by(|&a, &b| compare_providers(&providers[a], &providers[b]).then(a.cmp(&b)));
        self.order = order;
        self.order_dirty = false;
    }

    fn ordered(&self, kind: Option<ProtocolKind>) -> Vec<ProviderDescriptor> {
        self.order
            .iter()
            .map(|&i| &self.providers[i])
            .filter(|p| p.has_credentials)
            .filter(|p| kind.map_or(true, |k| p.serves(k)))
            .cloned()
            .collect()
    }
}

/// Healthy first, then score descending, then most recent success.
fn compare_providers(a: &ProviderDescriptor, b: &ProviderDescriptor) -> Ordering {
    b.healthy
        .cmp(&a.healthy)
        .then_with(|| b.score().total_cmp(&a.score()))
        .then_with(|| b.stats.last_success.cmp(&a.stats.last_success))
}

pub struct Registry {
    inner: RwLock<Tables>,
    settings: RegistrySettings,
}

impl Registry {
    pub fn new(
        mut models: Vec<ModelDescriptor>,
        providers: Vec<ProviderDescriptor>,
        settings: RegistrySettings,
    ) -> Self {
        models.sort_by_key(|m| m.priority);
        // descriptors from config start unloaded; never trust more than the cap
        let mut loaded = 0;
        for m in models.iter_mut() {
            if m.loaded {
                loaded += 1;
                m.loaded = loaded <= settings.max_concurrent_models;
            }
        }

        let mut tables = Tables {
            models,
            providers,
            order: Vec::new(),
            order_dirty: true,
        };
        tables.resort();

        Self {
            inner: RwLock::new(tables),
            settings,
        }
    }

    pub fn from_catalog<F>(catalog: &Catalog, settings: RegistrySettings, has_credentials: F) -> Self
    where
        F: Fn(&ProviderSpec) -> bool,
    {
        Self::new(
            catalog.model_descriptors(),
            catalog.provider_descriptors(has_credentials),
            settings,
        )
    }

    pub fn settings(&self) -> RegistrySettings {
        self.settings
    }

    /// Highest-priority model able to serve `kind` that is either loaded already
    /// or whose memory cost plus `required_mb` fits in the snapshot's free memory.
    pub async fn get_loadable_model(
        &self,
        snapshot: &ResourceSnapshot,
        required_mb: u64,
        kind: ProtocolKind,
    ) -> Option<ModelDescriptor> {
        let headroom = snapshot.headroom_mb();
        let t = self.inner.read().await;
        t.models
            .iter()
            .filter(|m| m.serves(kind))
            .find(|m| m.loaded || m.memory_cost_mb.saturating_add(required_mb) <= headroom)
            .cloned()
    }

    pub async fn mark_loaded(&self, name: &str) -> Result<()> {
        let mut t = self.inner.write().await;
        let loaded = t.loaded_count();
        let max = self.settings.max_concurrent_models;
        let model = t
            .model_mut(name)
            .ok_or_else(|| RegistryError::UnknownBackend(name.to_string()))?;
        if model.loaded {
            return Ok(());
        }
        if loaded >= max {
            return Err(RegistryError::CapacityReached { loaded, max });
        }
        model.loaded = true;
        Ok(())
    }

    /// Returns whether the model was loaded before the call.
    pub async fn mark_unloaded(&self, name: &str) -> Result<bool> {
        let mut t = self.inner.write().await;
        let model = t
            .model_mut(name)
            .ok_or_else(|| RegistryError::UnknownBackend(name.to_string()))?;
        Ok(std::mem::replace(&mut model.loaded, false))
    }

    /// Marks `name` loaded, first evicting the lowest-priority loaded models
    /// while the cap is reached. Eviction and load happen under one lock hold.
    /// Returns the evicted model names.
    pub async fn load_evicting(&self, name: &str) -> Result<Vec<String>> {
        let mut t = self.inner.write().await;
        let max = self.settings.max_concurrent_models;
        let idx = t
            .models
            .iter()
            .position(|m| m.name == name)
            .ok_or_else(|| RegistryError::UnknownBackend(name.to_string()))?;
        if t.models[idx].loaded {
            return Ok(Vec::new());
        }

        let mut evicted = Vec::new();
        while t.loaded_count() >= max {
            let Some(victim) = t.eviction_candidate(Some(name)) else {
                return Err(RegistryError::CapacityReached { loaded: t.loaded_count(), max });
            };
            t.models[victim].loaded = false;
            evicted.push(t.models[victim].name.clone());
        }
        t.models[idx].loaded = true;

        if !evicted.is_empty() {
            info!(model=%name, evicted=?evicted, "registry: evicted to make room");
        }
        Ok(evicted)
    }

    /// Unloads the lowest-priority loaded model, if any.
    pub async fn evict_lowest_priority(&self) -> Option<String> {
        let mut t = self.inner.write().await;
        let victim = t.eviction_candidate(None)?;
        t.models[victim].loaded = false;
        Some(t.models[victim].name.clone())
    }

    /// Folds one call attempt into the backend's rolling stats. Works for both
    /// remote providers and local models.
    pub async fn record_attempt(&self, name: &str, succeeded: bool, latency_secs: f64) -> Result<()> {
        let weight = self.settings.ema_weight;
        let now = Utc::now();
        let mut guard = self.inner.write().await;
        let t = &mut *guard;

        if let Some(p) = t.providers.iter_mut().find(|p| p.name == name) {
            p.stats.record(weight, succeeded, latency_secs, now);
            t.order_dirty = true;
            debug!(backend=%name, succeeded, latency_secs, "registry: attempt recorded");
            return Ok(());
        }
        if let Some(m) = t.model_mut(name) {
            m.stats.record(weight, succeeded, latency_secs, now);
            debug!(backend=%name, succeeded, latency_secs, "registry: attempt recorded");
            return Ok(());
        }
        Err(RegistryError::UnknownBackend(name.to_string()))
    }

    /// Credentialed providers, best score first.
    pub async fn ordered_providers(&self) -> Vec<ProviderDescriptor> {
        self.ordered(None).await
    }

    /// Like `ordered_providers`, restricted to providers that can serve `kind`.
    pub async fn ordered_providers_for(&self, kind: ProtocolKind) -> Vec<ProviderDescriptor> {
        self.ordered(Some(kind)).await
    }

    async fn ordered(&self, kind: Option<ProtocolKind>) -> Vec<ProviderDescriptor> {
        {
            let t = self.inner.read().await;
            if !t.order_dirty {
                return t.ordered(kind);
            }
        }
        let mut t = self.inner.write().await;
        if t.order_dirty {
            t.resort();
        }
        t.ordered(kind)
    }

    /// All providers in catalog order, including those without credentials.
    pub async fn providers(&self) -> Vec<ProviderDescriptor> {
        self.inner.read().await.providers.clone()
    }

    pub async fn set_provider_health(&self, name: &str, healthy: bool) -> Result<()> {
        let mut guard = self.inner.write().await;
        let t = &mut *guard;
        let p = t
            .providers
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| RegistryError::UnknownBackend(name.to_string()))?;
        if p.healthy != healthy {
            p.healthy = healthy;
            t.order_dirty = true;
        }
        Ok(())
    }

    /// Adopts the local runtime's view of which models are resident. Names
    /// outside the catalog are ignored; the cap still holds, keeping the
    /// best-priority ones.
    pub async fn reconcile_loaded(&self, resident: &[String]) {
        let resident: HashSet<&str> = resident.iter().map(String::as_str).collect();
        let max = self.settings.max_concurrent_models;
        let mut t = self.inner.write().await;
        let mut kept = 0;
        for m in t.models.iter_mut() {
            let want = resident.contains(m.name.as_str()) && kept < max;
            if want {
                kept += 1;
            }
            if m.loaded != want {
                debug!(model=%m.name, loaded=want, "registry: reconciled with local runtime");
                m.loaded = want;
            }
        }
    }

    pub async fn loaded_models(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .models
            .iter()
            .filter(|m| m.loaded)
            .map(|m| m.name.clone())
            .collect()
    }

    pub async fn loaded_count(&self) -> usize {
        self.inner.read().await.loaded_count()
    }

    pub async fn model(&self, name: &str) -> Option<ModelDescriptor> {
        self.inner.read().await.models.iter().find(|m| m.name == name).cloned()
    }

    pub async fn is_local_model(&self, name: &str) -> bool {
        self.inner.read().await.models.iter().any(|m| m.name == name)
    }

    pub async fn view(&self) -> RegistryView {
        let t = self.inner.read().await;
        RegistryView {
            max_concurrent_models: self.settings.max_concurrent_models,
            models: t.models.clone(),
            providers: t
                .providers
                .iter()
                .map(|p| ProviderView { descriptor: p.clone(), score: p.score() })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RollingStats;

    fn model(name: &str, cost: u64, priority: i32) -> ModelDescriptor {
        ModelDescriptor {
            name: name.into(),
            memory_cost_mb: cost,
            priority,
            embeddings: false,
            loaded: false,
            stats: RollingStats::default(),
        }
    }

    fn snapshot(memory_percent: f64) -> ResourceSnapshot {
        ResourceSnapshot {
            cpu_percent: 5.0,
            memory_percent,
            total_memory_mb: 10_000,
            active_model_count: 0,
            timestamp: Utc::now(),
            stale: false,
        }
    }

    fn registry(max: usize) -> Registry {
        Registry::new(
            vec![model("big", 6_000, 1), model("mid", 3_000, 2), model("small", 500, 3)],
            Vec::new(),
            RegistrySettings { max_concurrent_models: max, ema_weight: 0.3 },
        )
    }

    #[tokio::test]
    async fn test_loadable_prefers_priority_within_headroom() {
        let reg = registry(2);
        // 40% used of 10 GB => 6000 MB free
        let pick = reg.get_loadable_model(&snapshot(40.0), 0, ProtocolKind::ChatCompletion).await;
        assert_eq!(pick.unwrap().name, "big");

        // reserve pushes big out, mid still fits
        let pick = reg.get_loadable_model(&snapshot(40.0), 512, ProtocolKind::ChatCompletion).await;
        assert_eq!(pick.unwrap().name, "mid");

        let pick = reg.get_loadable_model(&snapshot(99.0), 0, ProtocolKind::ChatCompletion).await;
        assert!(pick.is_none());
    }

    #[tokio::test]
    async fn test_loaded_model_needs_no_headroom() {
        let reg = registry(2);
        reg.mark_loaded("big").await.unwrap();
        let pick = reg.get_loadable_model(&snapshot(99.0), 0, ProtocolKind::ChatCompletion).await;
        assert_eq!(pick.unwrap().name, "big");
    }

    #[tokio::test]
    async fn test_embedding_requests_skip_chat_only_models() {
        let reg = registry(2);
        let pick = reg.get_loadable_model(&snapshot(0.0), 0, ProtocolKind::Embedding).await;
        assert!(pick.is_none());
    }

    #[tokio::test]
    async fn test_mark_loaded_refuses_beyond_cap() {
        let reg = registry(1);
        reg.mark_loaded("small").await.unwrap();
        let err = reg.mark_loaded("big").await.unwrap_err();
        assert_eq!(err, RegistryError::CapacityReached { loaded: 1, max: 1 });
        // idempotent for an already loaded model
        reg.mark_loaded("small").await.unwrap();
    }

    #[tokio::test]
    async fn test_load_evicting_drops_lowest_priority_first() {
        let reg = registry(2);
        reg.mark_loaded("mid").await.unwrap();
        reg.mark_loaded("small").await.unwrap();

        let evicted = reg.load_evicting("big").await.unwrap();
        assert_eq!(evicted, vec!["small".to_string()]);
        let mut loaded = reg.loaded_models().await;
        loaded.sort();
        assert_eq!(loaded, vec!["big".to_string(), "mid".to_string()]);
    }

    #[tokio::test]
    async fn test_zero_cap_disables_local_tier() {
        let reg = registry(0);
        assert!(matches!(
            reg.load_evicting("small").await,
            Err(RegistryError::CapacityReached { max: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_mark_unloaded_reports_previous_state() {
        let reg = registry(2);
        reg.mark_loaded("mid").await.unwrap();
        assert!(reg.mark_unloaded("mid").await.unwrap());
        assert!(!reg.mark_unloaded("mid").await.unwrap());
        assert!(reg.mark_unloaded("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_reconcile_respects_cap_and_catalog() {
        let reg = registry(2);
        reg.reconcile_loaded(&["small".into(), "mid".into(), "big".into(), "stranger".into()]).await;
        let mut loaded = reg.loaded_models().await;
        loaded.sort();
        assert_eq!(loaded, vec!["big".to_string(), "mid".to_string()]);

        reg.reconcile_loaded(&[]).await;
        assert_eq!(reg.loaded_count().await, 0);
    }

    #[tokio::test]
    async fn test_record_attempt_on_local_model() {
        let reg = registry(2);
        reg.record_attempt("mid", false, 30.0).await.unwrap();
        let m = reg.model("mid").await.unwrap();
        assert_eq!(m.stats.attempts, 1);
        assert!(m.stats.success_rate < 1.0);
        assert!(reg.record_attempt("ghost", true, 1.0).await.is_err());
    }
}
