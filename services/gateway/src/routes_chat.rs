use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde_json::Value;
use tracing::info;

use registry::{ProtocolKind, RequestContext};
use wire::{ChatCompletionRequest, ChatCompletionResponse};

use crate::error::GatewayError;
use crate::state::SharedState;

pub async fn chat_completions(
    State(st): State<SharedState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ChatCompletionResponse>, GatewayError> {
    let Json(raw) = payload.map_err(|e| GatewayError::bad_request(e.body_text()))?;
    let req: ChatCompletionRequest = serde_json::from_value(raw.clone())
        .map_err(|e| GatewayError::bad_request(format!("invalid chat completion request: {e}")))?;
    if req.messages.is_empty() {
        return Err(GatewayError::bad_request("messages must not be empty"));
    }

    let ctx = RequestContext::new(ProtocolKind::ChatCompletion, raw);
    info!(
        request_id=%ctx.request_id,
        model=?ctx.requested_model,
        turns=req.messages.len(),
        "chat: received"
    );

    let admitted = st.admission.admit(&ctx).await?;
    let plan = st.selector.select(&ctx, &admitted).await?;
    crate::monitor_loop::release_evicted(&st, plan.evicted.clone());

    let out = st.dispatcher.chat(&ctx, &plan, &req).await?;
    Ok(Json(out.body))
}
