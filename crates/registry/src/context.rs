use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::schema::ProtocolKind;

/// Per-request state, created at ingress and dropped once the response is sent.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub kind: ProtocolKind,
    pub raw_payload: serde_json::Value,
    pub requested_model: Option<String>,
    pub received_at: Instant,
}

impl RequestContext {
    pub fn new(kind: ProtocolKind, raw_payload: serde_json::Value) -> Self {
        let requested_model = raw_payload
            .get("model")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Self {
            request_id: Uuid::new_v4(),
            kind,
            raw_payload,
            requested_model,
            received_at: Instant::now(),
        }
    }

    /// Deadline for one backend call started now with the given per-call timeout.
    pub fn attempt_deadline(&self, timeout: Duration) -> Instant {
        Instant::now() + timeout
    }
}
