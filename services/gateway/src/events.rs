//! Fire-and-forget dispatch log. The request path only ever calls
//! [`EventSink::emit`]; delivery happens on the consumer task.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use registry::ProtocolKind;

pub const EVENT_BUFFER: usize = 1024;
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize)]
pub struct DispatchEvent {
    pub request_id: Uuid,
    pub kind: ProtocolKind,
    /// `None` when every candidate failed.
    pub backend_used: Option<String>,
    pub latency_secs: f64,
    pub success: bool,
    pub attempts: usize,
    pub ts: DateTime<Utc>,
}

#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<DispatchEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::Receiver<DispatchEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        (Self { tx }, rx)
    }

    /// Never blocks; a full or closed channel drops the event.
    pub fn emit(&self, event: DispatchEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!("events: dropped dispatch event: {e}");
        }
    }
}

pub struct Collector {
    pub url: String,
    pub secret: String,
    pub timeout: Duration,
}

pub async fn run_event_consumer(
    mut rx: mpsc::Receiver<DispatchEvent>,
    collector: Option<Collector>,
    token: CancellationToken,
) {
    match &collector {
        Some(c) => info!(url=%c.url, "events: forwarding dispatch log"),
        None => info!("events: log only (no DISPATCH_LOG_URL)"),
    }
    let client = reqwest::Client::new();

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            ev = rx.recv() => match ev {
                Some(ev) => ev,
                None => break,
            },
        };

        info!(
            request_id=%event.request_id,
            kind=%event.kind,
            backend=%event.backend_used.as_deref().unwrap_or("-"),
            latency_secs=event.latency_secs,
            success=event.success,
            attempts=event.attempts,
            "dispatch"
        );

        if let Some(c) = &collector {
            if let Err(e) = forward(&client, c, &event).await {
                warn!(request_id=%event.request_id, "events: forward failed: {e:#}");
            }
        }
    }
    debug!("events: consumer stopped");
}

async fn forward(client: &reqwest::Client, c: &Collector, event: &DispatchEvent) -> anyhow::Result<()> {
    let body = serde_json::to_string(event)?;
    let ts = Utc::now().timestamp();
    let signature = sign_payload(&c.secret, ts, &body)?;

    client
        .post(&c.url)
        .timeout(c.timeout)
        .header("Content-Type", "application/json")
        .header("Idempotency-Key", event.request_id.to_string())
        .header("X-Timestamp", ts.to_string())
        .header("X-Signature", signature)
        .body(body)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

fn sign_payload(secret: &str, ts: i64, body: &str) -> anyhow::Result<String> {
    let payload = format!("{}.{}", ts, body);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("hmac key: {e}"))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
