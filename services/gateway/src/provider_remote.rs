use async_trait::async_trait;
use registry::{ProviderFlavor, ProviderSpec};
use serde_json::Value;
use wire::{Flavor, NativeRequest};

use crate::backend::{join_url, read_json, Backend, CallError};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Hosted inference API reached over HTTPS with an API key.
pub struct RemoteBackend {
    name: String,
    flavor: Flavor,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl RemoteBackend {
    pub fn from_spec(spec: &ProviderSpec, api_key: Option<String>) -> Self {
        let flavor = match spec.flavor {
            ProviderFlavor::OpenAi => Flavor::OpenAi,
            ProviderFlavor::Anthropic => Flavor::Anthropic,
        };
        Self {
            name: spec.name.clone(),
            flavor,
            endpoint: spec.endpoint.clone(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn authorize(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let Some(key) = &self.api_key else {
            return rb;
        };
        match self.flavor {
            Flavor::Anthropic => rb
                .header("x-api-key", key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            _ => rb.bearer_auth(key),
        }
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn flavor(&self) -> Flavor {
        self.flavor
    }

    async fn send(&self, req: &NativeRequest) -> Result<Value, CallError> {
        let rb = self.client.post(join_url(&self.endpoint, req.path)).json(&req.body);
        let resp = self
            .authorize(rb)
            .send()
            .await
            .map_err(|e| CallError::Connection(e.to_string()))?;
        read_json(resp).await
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let rb = self.client.get(join_url(&self.endpoint, "/models"));
        self.authorize(rb).send().await?.error_for_status()?;
        Ok(())
    }
}
