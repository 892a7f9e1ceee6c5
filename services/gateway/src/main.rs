mod backend;
mod config;
mod dispatch;
mod error;
mod events;
mod health_probe;
mod monitor_loop;
mod provider_ollama;
mod provider_remote;
mod routes_chat;
mod routes_embeddings;
mod routes_health;
mod routes_models;
mod routes_runtime;
mod state;
#[cfg(test)]
mod testing;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::{get, post}, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use registry::{ProviderSpec, Registry, ResourceMonitor, SysinfoProbe, DEFAULT_SAMPLE_BOUND};

use crate::backend::Backend;
use crate::config::AppConfig;
use crate::dispatch::{Dispatcher, Route};
use crate::events::{Collector, EventSink};
use crate::provider_ollama::OllamaBackend;
use crate::provider_remote::RemoteBackend;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;
    let catalog = cfg.load_catalog()?;

    let registry = Arc::new(Registry::from_catalog(&catalog, cfg.registry_settings(), |p| {
        api_key(p).is_some()
    }));
    for p in &catalog.providers {
        if api_key(p).is_none() {
            warn!(provider=%p.name, env=?p.api_key_env, "no credentials, provider will be skipped");
        }
    }

    let monitor = Arc::new(ResourceMonitor::with_settings(
        Box::new(SysinfoProbe::new()),
        cfg.smoothing_window,
        DEFAULT_SAMPLE_BOUND,
    ));

    let local = Arc::new(OllamaBackend::new(catalog.local_runtime.clone(), cfg.local_chat_mode.flavor()));
    let remotes: HashMap<String, Route> = catalog
        .providers
        .iter()
        .map(|p| {
            let route = Route {
                backend: Arc::new(RemoteBackend::from_spec(p, api_key(p))),
                chat_model: p.model.clone(),
                embedding_model: p.embedding_model.clone(),
            };
            (p.name.clone(), route)
        })
        .collect();

    let (events, events_rx) = EventSink::channel();
    let dispatcher = Dispatcher::new(
        registry.clone(),
        Some(local.clone() as Arc<dyn Backend>),
        remotes,
        cfg.local_timeout,
        cfg.remote_timeout,
        events,
    );
    let app_state = Arc::new(AppState::new(cfg.clone(), registry, monitor, dispatcher, Some(local)));

    // --- First readings before taking traffic ---
    let snap = app_state.monitor.sample().await;
    info!(cpu=snap.cpu_percent, mem=snap.memory_percent, total_mb=snap.total_memory_mb, "host: ok");
    health_probe::probe_once(&app_state).await;
    if app_state.local_reachable() {
        info!(url=%catalog.local_runtime, "local runtime: ok");
    } else {
        warn!(url=%catalog.local_runtime, "local runtime: unreachable, remote providers only for now");
    }

    // --- Background tasks ---
    let collector = cfg.dispatch_log_url.clone().map(|url| Collector {
        url,
        secret: cfg.dispatch_log_secret.clone().unwrap_or_default(),
        timeout: events::FORWARD_TIMEOUT,
    });
    let tasks = vec![
        tokio::spawn(events::run_event_consumer(events_rx, collector, app_state.shutdown.clone())),
        tokio::spawn(monitor_loop::run_monitor_loop(app_state.clone())),
        tokio::spawn(health_probe::run_health_probe(app_state.clone())),
    ];

    let app = Router::new()
        .route("/v1/chat/completions", post(routes_chat::chat_completions))
        .route("/v1/embeddings", post(routes_embeddings::embeddings))
        .route("/v1/models", get(routes_models::list_models))
        .route("/health", get(routes_health::get_health))
        .route("/runtime", get(routes_runtime::get_runtime))
        .layer(CorsLayer::permissive())
        .with_state(app_state.clone());

    let addr = &cfg.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("gateway listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(app_state.shutdown.clone()))
        .await
        .context("server error")?;

    app_state.shutdown.cancel();
    for t in tasks {
        if let Err(e) = t.await {
            warn!("background task ended abnormally: {e}");
        }
    }
    info!("gateway stopped");
    Ok(())
}

/// Key from the env var the catalog names for this provider, if set and non-empty.
fn api_key(spec: &ProviderSpec) -> Option<String> {
    spec.api_key_env
        .as_deref()
        .and_then(|k| std::env::var(k).ok())
        .filter(|v| !v.trim().is_empty())
}

async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            if let Err(e) = r {
                warn!("ctrl_c handler failed: {e}");
            }
            info!("shutdown requested");
        }
        _ = token.cancelled() => {}
    }
    token.cancel();
}
