use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde_json::Value;
use tracing::info;

use registry::{ProtocolKind, RequestContext};
use wire::{EmbeddingRequest, EmbeddingResponse};

use crate::error::GatewayError;
use crate::state::SharedState;

pub async fn embeddings(
    State(st): State<SharedState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<EmbeddingResponse>, GatewayError> {
    let Json(raw) = payload.map_err(|e| GatewayError::bad_request(e.body_text()))?;
    let req: EmbeddingRequest = serde_json::from_value(raw.clone())
        .map_err(|e| GatewayError::bad_request(format!("invalid embedding request: {e}")))?;
    if req.input.is_empty() {
        return Err(GatewayError::bad_request("input must not be empty"));
    }

    let ctx = RequestContext::new(ProtocolKind::Embedding, raw);
    info!(request_id=%ctx.request_id, model=?ctx.requested_model, inputs=req.input.len(), "embeddings: received");

    let admitted = st.admission.admit(&ctx).await?;
    let plan = st.selector.select(&ctx, &admitted).await?;
    crate::monitor_loop::release_evicted(&st, plan.evicted.clone());

    let out = st.dispatcher.embeddings(&ctx, &plan, &req).await?;
    Ok(Json(out.body))
}
