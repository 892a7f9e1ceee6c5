use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use wire::{Flavor, NativeRequest};

use crate::backend::{join_url, read_json, Backend, CallError};

/// Deadline for runtime management calls. Inference calls get theirs from
/// the dispatcher.
pub const MANAGEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Local model runtime. Inference goes through [`Backend::send`]; the rest
/// is runtime management used by the background tasks and `/v1/models`.
pub struct OllamaBackend {
    base_url: String,
    flavor: Flavor,
    client: reqwest::Client,
    management_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalModel {
    pub name: String,
    #[serde(default)]
    pub modified_at: Option<String>,
}

impl LocalModel {
    pub fn created(&self) -> i64 {
        self.modified_at
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.timestamp())
            .unwrap_or(0)
    }
}

#[derive(Deserialize)]
struct ModelsReply {
    #[serde(default)]
    models: Vec<LocalModel>,
}

impl OllamaBackend {
    pub fn new(base_url: String, flavor: Flavor) -> Self {
        Self {
            base_url,
            flavor,
            client: reqwest::Client::new(),
            management_timeout: MANAGEMENT_TIMEOUT,
        }
    }

    pub fn with_management_timeout(mut self, timeout: Duration) -> Self {
        self.management_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Every model installed on the runtime.
    pub async fn list_models(&self) -> anyhow::Result<Vec<LocalModel>> {
        self.get_models("/api/tags").await
    }

    /// Names of the models currently resident in memory.
    pub async fn loaded_models(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.get_models("/api/ps").await?.into_iter().map(|m| m.name).collect())
    }

    /// Asks the runtime to drop `model` from memory right away.
    pub async fn unload(&self, model: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({ "model": model, "keep_alive": 0 });
        self.client
            .post(join_url(&self.base_url, wire::ollama::GENERATE_PATH))
            .timeout(self.management_timeout)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("unload {model}: request failed"))?
            .error_for_status()?;
        Ok(())
    }

    async fn get_models(&self, path: &str) -> anyhow::Result<Vec<LocalModel>> {
        let reply: ModelsReply = self
            .client
            .get(join_url(&self.base_url, path))
            .timeout(self.management_timeout)
            .send()
            .await
            .with_context(|| format!("local runtime unreachable at {}", self.base_url))?
            .error_for_status()?
            .json()
            .await?;
        Ok(reply.models)
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn flavor(&self) -> Flavor {
        self.flavor
    }

    async fn send(&self, req: &NativeRequest) -> Result<Value, CallError> {
        let resp = self
            .client
            .post(join_url(&self.base_url, req.path))
            .json(&req.body)
            .send()
            .await
            .map_err(|e| CallError::Connection(e.to_string()))?;
        read_json(resp).await
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.client
            .get(join_url(&self.base_url, "/api/version"))
            .timeout(self.management_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
