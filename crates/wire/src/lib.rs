//! Protocol translation between the client-facing chat/embedding contract and
//! each backend's native request/response shape.
//!
//! Every function here is pure: no I/O, no shared state except the synthetic
//! id counter handed in through [`DecodeContext`].

pub mod client;
pub mod error;
pub mod ids;
pub mod ollama;
pub mod openai;
pub mod anthropic;

pub use client::*;
pub use error::{FormatError, Result};
pub use ids::SyntheticIds;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Native call shape of a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flavor {
    /// Local runtime, multi-turn `/api/chat`.
    OllamaChat,
    /// Local runtime, single-prompt `/api/generate`.
    OllamaGenerate,
    OpenAi,
    Anthropic,
}

impl Flavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flavor::OllamaChat => "ollama-chat",
            Flavor::OllamaGenerate => "ollama-generate",
            Flavor::OpenAi => "openai",
            Flavor::Anthropic => "anthropic",
        }
    }

    pub fn supports_embeddings(&self) -> bool {
        !matches!(self, Flavor::Anthropic)
    }
}

/// Request ready to be POSTed: path relative to the backend base URL, JSON body.
#[derive(Clone, Debug, PartialEq)]
pub struct NativeRequest {
    pub path: &'static str,
    pub body: Value,
}

pub struct DecodeContext<'a> {
    /// Reported when the backend reply does not name its model.
    pub model: &'a str,
    pub ids: &'a SyntheticIds,
}

pub fn encode_chat(flavor: Flavor, req: &ChatCompletionRequest, model: &str) -> Result<NativeRequest> {
    if req.messages.is_empty() {
        return Err(FormatError::EmptyMessages);
    }
    let (path, body) = match flavor {
        Flavor::OllamaChat => (ollama::CHAT_PATH, ollama::encode_chat(req, model)?),
        Flavor::OllamaGenerate => (ollama::GENERATE_PATH, ollama::encode_generate(req, model)?),
        Flavor::OpenAi => (openai::CHAT_PATH, openai::encode_chat(req, model)?),
        Flavor::Anthropic => (anthropic::MESSAGES_PATH, anthropic::encode_chat(req, model)?),
    };
    Ok(NativeRequest { path, body })
}

/// Scalar or array input is normalized to a list of strings.
pub fn encode_embeddings(flavor: Flavor, req: &EmbeddingRequest, model: &str) -> Result<NativeRequest> {
    let input = req.input.to_list();
    let (path, body) = match flavor {
        Flavor::OllamaChat | Flavor::OllamaGenerate => (ollama::EMBED_PATH, ollama::encode_embed(input, model)?),
        Flavor::OpenAi => (openai::EMBEDDINGS_PATH, openai::encode_embeddings(input, model)?),
        Flavor::Anthropic => {
            return Err(FormatError::Unsupported { flavor: flavor.as_str(), what: "embeddings" })
        }
    };
    Ok(NativeRequest { path, body })
}

pub fn decode_chat(flavor: Flavor, body: &Value, cx: &DecodeContext<'_>) -> Result<ChatCompletionResponse> {
    match flavor {
        Flavor::OllamaChat => ollama::decode_chat(body, cx),
        Flavor::OllamaGenerate => ollama::decode_generate(body, cx),
        Flavor::OpenAi => openai::decode_chat(body, cx),
        Flavor::Anthropic => anthropic::decode_chat(body, cx),
    }
}

/// `expected` is the number of inputs sent; a reply with a different count is
/// a format error.
pub fn decode_embeddings(
    flavor: Flavor,
    body: &Value,
    cx: &DecodeContext<'_>,
    expected: usize,
) -> Result<EmbeddingResponse> {
    match flavor {
        Flavor::OllamaChat | Flavor::OllamaGenerate => ollama::decode_embed(body, cx, expected),
        Flavor::OpenAi => openai::decode_embeddings(body, cx, expected),
        Flavor::Anthropic => Err(FormatError::Unsupported { flavor: flavor.as_str(), what: "embeddings" }),
    }
}

pub(crate) fn parse<T: DeserializeOwned>(body: &Value) -> Result<T> {
    if !body.is_object() {
        return Err(FormatError::Malformed("reply is not a JSON object".to_string()));
    }
    serde_json::from_value(body.clone()).map_err(|e| FormatError::Malformed(e.to_string()))
}

pub(crate) fn to_body<T: Serialize>(body: &T) -> Result<Value> {
    serde_json::to_value(body).map_err(|e| FormatError::Malformed(e.to_string()))
}
