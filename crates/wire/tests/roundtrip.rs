use serde_json::{json, Value};
use wire::{
    decode_chat, decode_embeddings, encode_chat, encode_embeddings, ChatCompletionRequest,
    ChatCompletionResponse, DecodeContext, EmbeddingRequest, Flavor, SyntheticIds,
};

fn client_request() -> ChatCompletionRequest {
    serde_json::from_value(json!({
        "model": "whatever-the-client-asked",
        "messages": [
            {"role": "system", "content": "you are terse"},
            {"role": "user", "content": [{"type": "text", "text": "first"}, {"type": "image_url"}]},
            {"role": "user", "content": "second"}
        ],
        "temperature": 0.2
    }))
    .unwrap()
}

#[test]
fn client_schema_survives_serde() {
    let req = client_request();
    let text = serde_json::to_string(&req).unwrap();
    let back: ChatCompletionRequest = serde_json::from_str(&text).unwrap();
    assert_eq!(back, req);

    let resp = ChatCompletionResponse {
        id: "chatcmpl-9".into(),
        object: "chat.completion".into(),
        created: 1_700_000_000,
        model: "gpt-4o-mini".into(),
        choices: vec![wire::Choice {
            index: 0,
            message: wire::AssistantMessage { role: "assistant".into(), content: "ok".into() },
            finish_reason: "stop".into(),
        }],
        usage: wire::Usage::new(1, 2),
    };
    let body = serde_json::to_value(&resp).unwrap();
    let back: ChatCompletionResponse = serde_json::from_value(body).unwrap();
    assert_eq!(back, resp);
}

#[test]
fn openai_encode_only_replaces_model() {
    let req = client_request();
    let native = encode_chat(Flavor::OpenAi, &req, "gpt-4o-mini").unwrap();
    let back: ChatCompletionRequest = serde_json::from_value(native.body).unwrap();

    let mut expected = req.clone();
    expected.model = Some("gpt-4o-mini".into());
    assert_eq!(back, expected);
}

#[test]
fn openai_shaped_reply_decodes_unchanged() {
    let ids = SyntheticIds::new();
    let cx = DecodeContext { model: "unused", ids: &ids };
    let body = json!({
        "id": "chatcmpl-abc",
        "object": "chat.completion",
        "created": 1_715_000_000,
        "model": "llama-3.1-8b-instant",
        "choices": [
            {"index": 0, "message": {"role": "assistant", "content": "fine"}, "finish_reason": "stop"}
        ],
        "usage": {"prompt_tokens": 4, "completion_tokens": 1, "total_tokens": 5}
    });
    let resp = decode_chat(Flavor::OpenAi, &body, &cx).unwrap();
    assert_eq!(serde_json::to_value(&resp).unwrap(), body);
}

#[test]
fn every_chat_flavor_yields_the_client_shape() {
    let ids = SyntheticIds::new();
    let cx = DecodeContext { model: "m", ids: &ids };
    let replies: Vec<(Flavor, Value)> = vec![
        (Flavor::OllamaChat, json!({"message": {"role": "assistant", "content": "a"}, "done": true})),
        (Flavor::OllamaGenerate, json!({"response": "b", "done": true})),
        (Flavor::OpenAi, json!({"choices": [{"message": {"content": "c"}}]})),
        (Flavor::Anthropic, json!({"content": [{"type": "text", "text": "d"}]})),
    ];

    for (flavor, body) in replies {
        let resp = decode_chat(flavor, &body, &cx).unwrap();
        let shape = serde_json::to_value(&resp).unwrap();
        for key in ["id", "object", "created", "model", "choices", "usage"] {
            assert!(shape.get(key).is_some(), "{} missing {}", flavor.as_str(), key);
        }
        assert_eq!(shape["object"], "chat.completion");
        assert_eq!(shape["choices"][0]["message"]["role"], "assistant");
        assert_eq!(shape["choices"][0]["index"], 0);
    }
}

#[test]
fn parts_content_is_flattened_for_native_calls() {
    let req = client_request();
    let native = encode_chat(Flavor::Anthropic, &req, "claude").unwrap();
    assert_eq!(native.body["system"], "you are terse");
    assert_eq!(native.body["messages"], json!([{"role": "user", "content": "first\n\nsecond"}]));
}

#[test]
fn embeddings_through_the_local_runtime() {
    let req: EmbeddingRequest = serde_json::from_value(json!({"input": ["one", "two"]})).unwrap();
    let native = encode_embeddings(Flavor::OllamaGenerate, &req, "nomic-embed-text").unwrap();
    assert_eq!(native.body, json!({"model": "nomic-embed-text", "input": ["one", "two"]}));

    let ids = SyntheticIds::new();
    let cx = DecodeContext { model: "nomic-embed-text", ids: &ids };
    let reply = json!({"embeddings": [[0.5, 0.25], [0.125, 1.0]]});
    let resp = decode_embeddings(Flavor::OllamaGenerate, &reply, &cx, req.input.len()).unwrap();
    assert_eq!(
        serde_json::to_value(&resp).unwrap(),
        json!({
            "object": "list",
            "data": [
                {"object": "embedding", "index": 0, "embedding": [0.5, 0.25]},
                {"object": "embedding", "index": 1, "embedding": [0.125, 1.0]}
            ],
            "model": "nomic-embed-text"
        })
    );
}

#[test]
fn oversized_token_counts_saturate_instead_of_overflowing() {
    let ids = SyntheticIds::new();
    let cx = DecodeContext { model: "m", ids: &ids };
    let max = u64::MAX;
    let replies: Vec<(Flavor, Value)> = vec![
        (
            Flavor::OllamaChat,
            json!({"message": {"role": "assistant", "content": "a"}, "done": true,
                   "prompt_eval_count": max, "eval_count": 1}),
        ),
        (
            Flavor::OllamaGenerate,
            json!({"response": "b", "done": true, "prompt_eval_count": max, "eval_count": 1}),
        ),
        (
            Flavor::OpenAi,
            json!({"choices": [{"message": {"content": "c"}}],
                   "usage": {"prompt_tokens": max, "completion_tokens": 1}}),
        ),
        (
            Flavor::Anthropic,
            json!({"content": [{"type": "text", "text": "d"}],
                   "usage": {"input_tokens": max, "output_tokens": 1}}),
        ),
    ];

    for (flavor, body) in replies {
        let resp = decode_chat(flavor, &body, &cx).unwrap();
        assert_eq!(resp.usage.prompt_tokens, max, "{}", flavor.as_str());
        assert_eq!(resp.usage.completion_tokens, 1, "{}", flavor.as_str());
        assert_eq!(resp.usage.total_tokens, max, "{}", flavor.as_str());
    }
}
