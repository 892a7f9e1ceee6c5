//! Test helpers: throw-away HTTP servers and scripted backends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use registry::{HostUsage, ModelDescriptor, ProviderDescriptor, Registry, ResourceMonitor, RollingStats, StaticProbe};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use wire::{Flavor, NativeRequest};

use crate::backend::{Backend, CallError};
use crate::config::AppConfig;
use crate::dispatch::{Dispatcher, Route};
use crate::events::{DispatchEvent, EventSink};
use crate::provider_ollama::OllamaBackend;
use crate::state::{AppState, SharedState};

/// Serves `app` on an ephemeral local port and returns its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[derive(Clone)]
pub enum Script {
    Reply(Value),
    Fail(u16),
    Hang,
}

pub struct MockBackend {
    name: String,
    flavor: Flavor,
    script: Script,
    pub calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(name: &str, flavor: Flavor, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            flavor,
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn flavor(&self) -> Flavor {
        self.flavor
    }

    async fn send(&self, _req: &NativeRequest) -> Result<Value, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Reply(v) => Ok(v.clone()),
            Script::Fail(status) => Err(CallError::Status { status: *status, body: "boom".into() }),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Value::Null)
            }
        }
    }

    async fn ping(&self) -> anyhow::Result<()> {
        match self.script {
            Script::Reply(_) => Ok(()),
            _ => anyhow::bail!("{} is down", self.name),
        }
    }
}

pub fn openai_reply(content: &str) -> Value {
    json!({
        "id": "chatcmpl-remote",
        "object": "chat.completion",
        "created": 1_715_000_000,
        "model": "remote-model",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
    })
}

pub fn ollama_reply(content: &str) -> Value {
    json!({
        "model": "llama3.2:3b",
        "created_at": "2024-05-01T10:00:00Z",
        "message": {"role": "assistant", "content": content},
        "done": true,
        "done_reason": "stop",
        "prompt_eval_count": 5,
        "eval_count": 4
    })
}

pub struct Setup {
    pub usage: HostUsage,
    pub models: Vec<ModelDescriptor>,
    pub local: Option<Arc<MockBackend>>,
    pub remotes: Vec<(ProviderDescriptor, Route)>,
    pub runtime: Option<Arc<OllamaBackend>>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            usage: HostUsage { cpu_percent: 20.0, memory_percent: 40.0, total_memory_mb: 16_384 },
            models: Vec::new(),
            local: None,
            remotes: Vec::new(),
            runtime: None,
        }
    }
}

impl Setup {
    pub fn with_local_model() -> Self {
        Self {
            models: vec![model("llama3.2:3b", 2_400, 1, false)],
            ..Self::default()
        }
    }

    pub fn remote(name: &str, backend: Arc<MockBackend>) -> (ProviderDescriptor, Route) {
        Self::remote_route(name, backend, None)
    }

    pub fn remote_with_embeddings(name: &str, backend: Arc<MockBackend>) -> (ProviderDescriptor, Route) {
        Self::remote_route(name, backend, Some("embed-model".to_string()))
    }

    fn remote_route(
        name: &str,
        backend: Arc<MockBackend>,
        embedding_model: Option<String>,
    ) -> (ProviderDescriptor, Route) {
        let descriptor = ProviderDescriptor {
            name: name.to_string(),
            endpoint: format!("https://{name}.example/v1"),
            has_credentials: true,
            embeddings: embedding_model.is_some(),
            healthy: true,
            stats: RollingStats::default(),
        };
        let route = Route { backend, chat_model: "remote-model".to_string(), embedding_model };
        (descriptor, route)
    }
}

pub fn model(name: &str, cost: u64, priority: i32, embeddings: bool) -> ModelDescriptor {
    ModelDescriptor {
        name: name.to_string(),
        memory_cost_mb: cost,
        priority,
        embeddings,
        loaded: false,
        stats: RollingStats::default(),
    }
}

pub struct Fixture {
    pub state: SharedState,
    pub events: mpsc::Receiver<DispatchEvent>,
}

/// Full application state over scripted backends and a fixed host reading.
pub fn fixture(setup: Setup) -> Fixture {
    let config = AppConfig::from_lookup(|_| None).unwrap();
    let providers = setup.remotes.iter().map(|(d, _)| d.clone()).collect();
    let routes: HashMap<String, Route> =
        setup.remotes.into_iter().map(|(d, r)| (d.name, r)).collect();

    let registry = Arc::new(Registry::new(setup.models, providers, config.registry_settings()));
    let monitor = Arc::new(ResourceMonitor::new(Box::new(StaticProbe(setup.usage))));
    let (sink, events) = EventSink::channel();
    let dispatcher = Dispatcher::new(
        registry.clone(),
        setup.local.map(|b| b as Arc<dyn Backend>),
        routes,
        Duration::from_millis(200),
        Duration::from_millis(200),
        sink,
    );

    let state = Arc::new(AppState::new(config, registry, monitor, dispatcher, setup.runtime));
    Fixture { state, events }
}
