use axum::{extract::State, Json};
use tracing::warn;

use wire::{ModelCard, ModelList};

use crate::state::SharedState;

/// Models installed on the local runtime. An unreachable runtime yields an
/// empty list, not an error.
pub async fn list_models(State(st): State<SharedState>) -> Json<ModelList> {
    let Some(local) = &st.local else {
        return Json(ModelList::new(Vec::new()));
    };

    match local.list_models().await {
        Ok(models) => {
            st.set_local_reachable(true);
            let cards = models
                .iter()
                .map(|m| ModelCard::new(m.name.clone(), m.created(), "local"))
                .collect();
            Json(ModelList::new(cards))
        }
        Err(e) => {
            warn!("models: local runtime unavailable: {e:#}");
            st.set_local_reachable(false);
            Json(ModelList::new(Vec::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider_ollama::OllamaBackend;
    use crate::testing::{fixture, serve, Setup};
    use axum::{routing::get, Router};
    use serde_json::json;
    use std::sync::Arc;
    use wire::Flavor;

    #[tokio::test]
    async fn test_lists_runtime_models() {
        let app = Router::new().route(
            "/api/tags",
            get(|| async {
                Json(json!({"models": [{"name": "llama3.2:3b", "modified_at": "2024-05-01T10:00:00Z"}]}))
            }),
        );
        let runtime = Arc::new(OllamaBackend::new(serve(app).await, Flavor::OllamaChat));
        let f = fixture(Setup { runtime: Some(runtime), ..Setup::default() });

        let Json(list) = list_models(State(f.state.clone())).await;
        assert_eq!(
            serde_json::to_value(&list).unwrap(),
            json!({"object": "list", "data": [
                {"id": "llama3.2:3b", "object": "model", "created": 1_714_557_600, "owned_by": "local"}
            ]})
        );
    }

    #[tokio::test]
    async fn test_hung_runtime_gives_empty_list() {
        let app = Router::new().route(
            "/api/tags",
            get(|| async {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Json(json!({"models": []}))
            }),
        );
        let runtime = OllamaBackend::new(serve(app).await, Flavor::OllamaChat)
            .with_management_timeout(std::time::Duration::from_millis(100));
        let f = fixture(Setup { runtime: Some(Arc::new(runtime)), ..Setup::default() });
        f.state.set_local_reachable(true);

        let Json(list) = tokio::time::timeout(std::time::Duration::from_secs(5), list_models(State(f.state.clone())))
            .await
            .unwrap();
        assert!(list.data.is_empty());
        assert!(!f.state.local_reachable());
    }

    #[tokio::test]
    async fn test_unreachable_runtime_gives_empty_list() {
        let runtime = Arc::new(OllamaBackend::new("http://127.0.0.1:9".to_string(), Flavor::OllamaChat));
        let f = fixture(Setup { runtime: Some(runtime), ..Setup::default() });

        let Json(list) = list_models(State(f.state.clone())).await;
        assert_eq!(list.object, "list");
        assert!(list.data.is_empty());
        assert!(!f.state.local_reachable());
    }
}
