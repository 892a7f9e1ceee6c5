use axum::{extract::State, Json};
use serde_json::json;

use crate::state::SharedState;

/// Operator view: registry tables, last host reading, local runtime state.
pub async fn get_runtime(State(st): State<SharedState>) -> Json<serde_json::Value> {
    let view = st.registry.view().await;
    let snapshot = st.monitor.last().await;
    let limits = st.admission.limits();

    Json(json!({
        "local_runtime": {
            "url": st.local.as_ref().map(|l| l.base_url().to_string()),
            "reachable": st.local_reachable(),
            "mode": st.config.local_chat_mode.flavor().as_str(),
        },
        "limits": {
            "cpu_max": limits.cpu_max,
            "mem_max": limits.mem_max,
            "memory_reserve_mb": st.config.memory_reserve_mb,
        },
        "snapshot": snapshot,
        "registry": view,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, openai_reply, MockBackend, Script, Setup};
    use wire::Flavor;

    #[tokio::test]
    async fn test_runtime_view() {
        let remote = MockBackend::new("groq", Flavor::OpenAi, Script::Reply(openai_reply("x")));
        let setup = Setup { remotes: vec![Setup::remote("groq", remote)], ..Setup::with_local_model() };
        let f = fixture(setup);
        f.state.registry.mark_loaded("llama3.2:3b").await.unwrap();
        f.state.monitor.sample().await;

        let Json(body) = get_runtime(State(f.state.clone())).await;
        assert_eq!(body["registry"]["max_concurrent_models"], 2);
        assert_eq!(body["registry"]["models"][0]["name"], "llama3.2:3b");
        assert_eq!(body["registry"]["models"][0]["loaded"], true);
        assert_eq!(body["registry"]["providers"][0]["name"], "groq");
        assert_eq!(body["registry"]["providers"][0]["score"], 1.0);
        assert_eq!(body["snapshot"]["memory_percent"], 40.0);
        assert_eq!(body["limits"]["cpu_max"], 85.0);
        assert_eq!(body["local_runtime"]["mode"], "ollama-chat");
    }
}
