use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use wire::{Flavor, NativeRequest};

/// Longest slice of an error body kept for the log.
const BODY_SNIPPET: usize = 200;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("connection failed: {0}")]
    Connection(String),
    /// `body` is for the log only; it never reaches the client.
    #[error("HTTP {status} from backend")]
    Status { status: u16, body: String },
    /// The backend answered 2xx but the body is not JSON.
    #[error("unreadable body: {0}")]
    Body(String),
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;
    fn flavor(&self) -> Flavor;
    async fn send(&self, req: &NativeRequest) -> Result<Value, CallError>;
    async fn ping(&self) -> anyhow::Result<()>;
}

pub(crate) async fn read_json(resp: reqwest::Response) -> Result<Value, CallError> {
    let status = resp.status();
    if !status.is_success() {
        let mut body = resp.text().await.unwrap_or_default();
        if body.len() > BODY_SNIPPET {
            let mut cut = BODY_SNIPPET;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        return Err(CallError::Status { status: status.as_u16(), body });
    }
    resp.json::<Value>().await.map_err(|e| CallError::Body(e.to_string()))
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}
