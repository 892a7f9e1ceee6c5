//! Backend selection: local first, then remote providers by score.
//!
//! The plan is built once per request. Local inference is preferred for
//! latency, cost and privacy; remote providers follow in score order. A tier
//! is never dropped silently: each skip lands in the plan and in the log.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::admission::Admitted;
use crate::context::RequestContext;
use crate::registry::{Registry, RegistryError};
use crate::schema::ProtocolKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Local,
    Remote,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub name: String,
    pub tier: Tier,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipCause {
    /// Not enough memory headroom or the loaded-model cap could not be met.
    Capacity,
    MissingCredentials,
    /// The backend cannot serve this request kind.
    Unsupported,
}

impl std::fmt::Display for SkipCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipCause::Capacity => f.write_str("capacity"),
            SkipCause::MissingCredentials => f.write_str("missing_credentials"),
            SkipCause::Unsupported => f.write_str("unsupported"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Skip {
    pub backend: String,
    pub cause: SkipCause,
}

/// Ordered fallback chain for one request. The first candidate is the primary
/// attempt.
#[derive(Clone, Debug, Default)]
pub struct Plan {
    pub candidates: Vec<Candidate>,
    pub skipped: Vec<Skip>,
    /// Models unloaded to make room for the local candidate.
    pub evicted: Vec<String>,
    /// Local model marked loaded for this request ahead of its first call.
    pub reserved: Option<String>,
}

/// `no_backend_available`: fatal for the request, not retried.
#[derive(Clone, Debug, Error)]
#[error("no backend available for {kind}")]
pub struct NoBackendAvailable {
    pub kind: ProtocolKind,
    pub skipped: Vec<Skip>,
}

pub struct Selector {
    registry: Arc<Registry>,
    /// Memory kept free on top of a model's cost when picking it.
    reserve_mb: u64,
}

impl Selector {
    pub fn new(registry: Arc<Registry>, reserve_mb: u64) -> Self {
        Self { registry, reserve_mb }
    }

    pub async fn select(
        &self,
        ctx: &RequestContext,
        admitted: &Admitted,
    ) -> Result<Plan, NoBackendAvailable> {
        let mut plan = Plan::default();

        if let Some(local) = self.pick_local(ctx, admitted, &mut plan).await {
            plan.candidates.push(Candidate { name: local, tier: Tier::Local });
        }

        for p in self.registry.providers().await {
            if !p.has_credentials {
                plan.skipped.push(Skip { backend: p.name, cause: SkipCause::MissingCredentials });
            } else if !p.serves(ctx.kind) {
                plan.skipped.push(Skip { backend: p.name, cause: SkipCause::Unsupported });
            }
        }
        for p in self.registry.ordered_providers_for(ctx.kind).await {
            plan.candidates.push(Candidate { name: p.name, tier: Tier::Remote });
        }

        for skip in &plan.skipped {
            info!(request_id=%ctx.request_id, backend=%skip.backend, cause=%skip.cause, "selector: skipped");
        }

        if plan.candidates.is_empty() {
            return Err(NoBackendAvailable { kind: ctx.kind, skipped: plan.skipped });
        }

        debug!(
            request_id=%ctx.request_id,
            chain=?plan.candidates.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "selector: plan ready"
        );
        Ok(plan)
    }

    async fn pick_local(
        &self,
        ctx: &RequestContext,
        admitted: &Admitted,
        plan: &mut Plan,
    ) -> Option<String> {
        // fast path: hinted model already resident, no eviction
        if let Some(hint) = ctx.requested_model.as_deref() {
            if let Some(m) = self.registry.model(hint).await {
                if m.loaded && m.serves(ctx.kind) {
                    return Some(m.name);
                }
            }
        }

        let pick = self
            .registry
            .get_loadable_model(&admitted.snapshot, self.reserve_mb, ctx.kind)
            .await;

        match pick {
            Some(m) if m.loaded => Some(m.name),
            Some(m) => match self.registry.load_evicting(&m.name).await {
                Ok(evicted) => {
                    plan.evicted = evicted;
                    plan.reserved = Some(m.name.clone());
                    Some(m.name)
                }
                Err(RegistryError::CapacityReached { .. }) | Err(RegistryError::UnknownBackend(_)) => {
                    plan.skipped.push(Skip { backend: m.name, cause: SkipCause::Capacity });
                    None
                }
            },
            None => {
                for m in self.registry.view().await.models {
                    let cause = if m.serves(ctx.kind) { SkipCause::Capacity } else { SkipCause::Unsupported };
                    plan.skipped.push(Skip { backend: m.name, cause });
                }
                None
            }
        }
    }
}
