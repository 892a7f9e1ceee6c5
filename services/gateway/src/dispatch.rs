//! Runs a selection plan: one backend call at a time, in plan order, until
//! one succeeds or the plan is exhausted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use registry::{Candidate, Plan, ProtocolKind, Registry, RegistryError, RequestContext, Tier};
use wire::{
    ChatCompletionRequest, ChatCompletionResponse, DecodeContext, EmbeddingRequest,
    EmbeddingResponse, Flavor, FormatError, NativeRequest, SyntheticIds,
};

use crate::backend::{Backend, CallError};
use crate::events::{DispatchEvent, EventSink};

/// How to reach one remote provider and which of its models to ask for.
#[derive(Clone)]
pub struct Route {
    pub backend: Arc<dyn Backend>,
    pub chat_model: String,
    pub embedding_model: Option<String>,
}

impl Route {
    fn model_for(&self, kind: ProtocolKind) -> Option<&str> {
        match kind {
            ProtocolKind::ChatCompletion => Some(&self.chat_model),
            ProtocolKind::Embedding => self.embedding_model.as_deref(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Connection(String),
    #[error("{0}")]
    Format(String),
}

impl AttemptError {
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptError::Timeout(_) => "backend_timeout",
            AttemptError::Connection(_) => "backend_connection_error",
            AttemptError::Format(_) => "format_error",
        }
    }
}

impl From<CallError> for AttemptError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Body(m) => AttemptError::Format(m),
            other => AttemptError::Connection(other.to_string()),
        }
    }
}

impl From<FormatError> for AttemptError {
    fn from(e: FormatError) -> Self {
        AttemptError::Format(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedAttempt {
    pub backend: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
}

/// `all_backends_exhausted`
#[derive(Debug, Error)]
#[error("all {} candidate backends failed", .attempts.len())]
pub struct Exhausted {
    pub attempts: Vec<FailedAttempt>,
}

#[derive(Debug)]
pub struct Dispatched<T> {
    pub body: T,
    pub backend: String,
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    local: Option<Arc<dyn Backend>>,
    remotes: HashMap<String, Route>,
    local_timeout: Duration,
    remote_timeout: Duration,
    ids: SyntheticIds,
    events: EventSink,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        local: Option<Arc<dyn Backend>>,
        remotes: HashMap<String, Route>,
        local_timeout: Duration,
        remote_timeout: Duration,
        events: EventSink,
    ) -> Self {
        Self {
            registry,
            local,
            remotes,
            local_timeout,
            remote_timeout,
            ids: SyntheticIds::new(),
            events,
        }
    }

    /// Remote backends keyed by provider name.
    pub fn remote_backends(&self) -> impl Iterator<Item = (&str, &Arc<dyn Backend>)> {
        self.remotes.iter().map(|(name, route)| (name.as_str(), &route.backend))
    }

    pub async fn chat(
        &self,
        ctx: &RequestContext,
        plan: &Plan,
        req: &ChatCompletionRequest,
    ) -> Result<Dispatched<ChatCompletionResponse>, Exhausted> {
        self.run(
            ctx,
            plan,
            |flavor, model| wire::encode_chat(flavor, req, model),
            |flavor, body, cx| wire::decode_chat(flavor, body, cx),
        )
        .await
    }

    pub async fn embeddings(
        &self,
        ctx: &RequestContext,
        plan: &Plan,
        req: &EmbeddingRequest,
    ) -> Result<Dispatched<EmbeddingResponse>, Exhausted> {
        let expected = req.input.len();
        self.run(
            ctx,
            plan,
            |flavor, model| wire::encode_embeddings(flavor, req, model),
            |flavor, body, cx| wire::decode_embeddings(flavor, body, cx, expected),
        )
        .await
    }

    async fn run<T, E, D>(
        &self,
        ctx: &RequestContext,
        plan: &Plan,
        encode: E,
        decode: D,
    ) -> Result<Dispatched<T>, Exhausted>
    where
        E: Fn(Flavor, &str) -> wire::Result<NativeRequest>,
        D: Fn(Flavor, &Value, &DecodeContext<'_>) -> wire::Result<T>,
    {
        let mut failed = Vec::new();
        let mut reservation = Reservation { registry: self.registry.clone(), model: plan.reserved.clone() };

        for (step, cand) in plan.candidates.iter().enumerate() {
            let (backend, model, timeout) = match self.resolve(cand, ctx.kind) {
                Ok(r) => r,
                Err(e) => {
                    warn!(request_id=%ctx.request_id, backend=%cand.name, "dispatch: {e}");
                    failed.push(FailedAttempt { backend: cand.name.clone(), kind: e.kind(), message: e.to_string() });
                    continue;
                }
            };

            // an encode failure never reaches the backend and is not held against it
            let native = match encode(backend.flavor(), &model) {
                Ok(n) => n,
                Err(e) => {
                    let e = AttemptError::from(e);
                    warn!(request_id=%ctx.request_id, backend=%cand.name, "dispatch: cannot encode: {e}");
                    failed.push(FailedAttempt { backend: cand.name.clone(), kind: e.kind(), message: e.to_string() });
                    continue;
                }
            };

            debug!(request_id=%ctx.request_id, step, backend=%cand.name, via=%backend.name(), model=%model, "dispatch: calling");
            let started = Instant::now();
            let result = self.call(ctx, backend.as_ref(), &native, timeout, &model, &decode).await;
            let latency = started.elapsed().as_secs_f64();

            self.settle(cand, result.is_ok(), latency).await;
            if cand.tier == Tier::Local {
                reservation.settled();
            }

            match result {
                Ok(body) => {
                    info!(
                        request_id=%ctx.request_id,
                        backend=%cand.name,
                        latency_secs=latency,
                        fallbacks=step,
                        "dispatch: success"
                    );
                    self.emit(ctx, Some(cand.name.clone()), true, step + 1);
                    return Ok(Dispatched { body, backend: cand.name.clone() });
                }
                Err(e) => {
                    let next = plan.candidates.get(step + 1).map(|c| c.name.as_str()).unwrap_or("-");
                    warn!(
                        request_id=%ctx.request_id,
                        backend=%cand.name,
                        error_type=e.kind(),
                        next=%next,
                        "dispatch: attempt failed: {e}"
                    );
                    failed.push(FailedAttempt { backend: cand.name.clone(), kind: e.kind(), message: e.to_string() });
                }
            }
        }

        self.emit(ctx, None, false, failed.len());
        Err(Exhausted { attempts: failed })
    }

    fn resolve(
        &self,
        cand: &Candidate,
        kind: ProtocolKind,
    ) -> Result<(Arc<dyn Backend>, String, Duration), AttemptError> {
        match cand.tier {
            Tier::Local => {
                let backend = self
                    .local
                    .clone()
                    .ok_or_else(|| AttemptError::Connection("no local runtime configured".to_string()))?;
                Ok((backend, cand.name.clone(), self.local_timeout))
            }
            Tier::Remote => {
                let route = self
                    .remotes
                    .get(&cand.name)
                    .ok_or_else(|| AttemptError::Connection(format!("no route to {}", cand.name)))?;
                let model = route
                    .model_for(kind)
                    .ok_or_else(|| AttemptError::Format(format!("{} has no model for {kind}", cand.name)))?;
                Ok((route.backend.clone(), model.to_string(), self.remote_timeout))
            }
        }
    }

    /// Dropping the timed-out `send` future closes its connection.
    async fn call<T, D>(
        &self,
        ctx: &RequestContext,
        backend: &dyn Backend,
        native: &NativeRequest,
        timeout: Duration,
        model: &str,
        decode: &D,
    ) -> Result<T, AttemptError>
    where
        D: Fn(Flavor, &Value, &DecodeContext<'_>) -> wire::Result<T>,
    {
        let deadline = ctx.attempt_deadline(timeout);
        let body = match tokio::time::timeout_at(deadline, backend.send(native)).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                if let CallError::Status { status, body } = &e {
                    warn!(request_id=%ctx.request_id, via=%backend.name(), status, body=%body, "dispatch: error reply");
                }
                return Err(e.into());
            }
            Err(_) => return Err(AttemptError::Timeout(timeout)),
        };
        let cx = DecodeContext { model, ids: &self.ids };
        Ok(decode(backend.flavor(), &body, &cx)?)
    }

    /// Folds the outcome into the registry. A local model that failed is no
    /// longer trusted to be resident; one that answered certainly is.
    async fn settle(&self, cand: &Candidate, succeeded: bool, latency: f64) {
        if let Err(e) = self.registry.record_attempt(&cand.name, succeeded, latency).await {
            warn!(backend=%cand.name, "dispatch: stats not recorded: {e}");
        }
        if cand.tier != Tier::Local {
            return;
        }
        if succeeded {
            match self.registry.mark_loaded(&cand.name).await {
                Ok(()) => {}
                Err(RegistryError::CapacityReached { loaded, max }) => {
                    debug!(model=%cand.name, loaded, max, "dispatch: answered while not tracked as loaded");
                }
                Err(e) => warn!(model=%cand.name, "dispatch: {e}"),
            }
        } else if let Ok(true) = self.registry.mark_unloaded(&cand.name).await {
            info!(model=%cand.name, "dispatch: local model marked unloaded after failure");
        }
    }

    fn emit(&self, ctx: &RequestContext, backend_used: Option<String>, success: bool, attempts: usize) {
        self.events.emit(DispatchEvent {
            request_id: ctx.request_id,
            kind: ctx.kind,
            backend_used,
            latency_secs: ctx.received_at.elapsed().as_secs_f64(),
            success,
            attempts,
            ts: Utc::now(),
        });
    }
}

/// A local model the selector marked loaded before calling it. If the
/// request goes away before that call settles, the slot is given back.
struct Reservation {
    registry: Arc<Registry>,
    model: Option<String>,
}

impl Reservation {
    fn settled(&mut self) {
        self.model = None;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let Some(model) = self.model.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let registry = self.registry.clone();
        handle.spawn(async move {
            if let Ok(true) = registry.mark_unloaded(&model).await {
                info!(model=%model, "dispatch: released unsettled reservation");
            }
        });
    }
}
