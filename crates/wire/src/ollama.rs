//! Local runtime native shapes (`/api/chat`, `/api/generate`, `/api/embed`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{
    AssistantMessage, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice,
    EmbeddingData, EmbeddingResponse, Usage,
};
use crate::error::{FormatError, Result};
use crate::{parse, to_body, DecodeContext};

pub const CHAT_PATH: &str = "/api/chat";
pub const GENERATE_PATH: &str = "/api/generate";
pub const EMBED_PATH: &str = "/api/embed";

#[derive(Serialize)]
struct Options {
    temperature: f64,
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<Turn<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<Options>,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<Options>,
}

#[derive(Serialize)]
struct EmbedBody<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatReply {
    model: Option<String>,
    created_at: Option<String>,
    message: Option<ReplyMessage>,
    done_reason: Option<String>,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Deserialize)]
struct GenerateReply {
    model: Option<String>,
    created_at: Option<String>,
    response: Option<String>,
    done_reason: Option<String>,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Deserialize)]
struct EmbedReply {
    model: Option<String>,
    embeddings: Option<Vec<Vec<f64>>>,
}

/// Collapses role-tagged turns into one prompt for single-prompt runtimes.
pub fn render_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for m in messages {
        prompt.push_str(&m.role);
        prompt.push_str(": ");
        prompt.push_str(&m.content.as_text());
        prompt.push('\n');
    }
    prompt.push_str("assistant:");
    prompt
}

pub(crate) fn encode_chat(req: &ChatCompletionRequest, model: &str) -> Result<Value> {
    let body = ChatBody {
        model,
        messages: req
            .messages
            .iter()
            .map(|m| Turn { role: &m.role, content: m.content.as_text() })
            .collect(),
        stream: false,
        options: req.temperature.map(|temperature| Options { temperature }),
    };
    to_body(&body)
}

pub(crate) fn encode_generate(req: &ChatCompletionRequest, model: &str) -> Result<Value> {
    let body = GenerateBody {
        model,
        prompt: render_prompt(&req.messages),
        stream: false,
        options: req.temperature.map(|temperature| Options { temperature }),
    };
    to_body(&body)
}

pub(crate) fn encode_embed(input: Vec<String>, model: &str) -> Result<Value> {
    to_body(&EmbedBody { model, input })
}

pub(crate) fn decode_chat(body: &Value, cx: &DecodeContext<'_>) -> Result<ChatCompletionResponse> {
    let reply: ChatReply = parse(body)?;
    let content = reply
        .message
        .and_then(|m| m.content)
        .ok_or(FormatError::MissingField("message.content"))?;
    Ok(completion(
        cx,
        reply.model,
        reply.created_at,
        content,
        reply.done_reason,
        reply.prompt_eval_count,
        reply.eval_count,
    ))
}

pub(crate) fn decode_generate(body: &Value, cx: &DecodeContext<'_>) -> Result<ChatCompletionResponse> {
    let reply: GenerateReply = parse(body)?;
    let content = reply.response.ok_or(FormatError::MissingField("response"))?;
    Ok(completion(
        cx,
        reply.model,
        reply.created_at,
        content.trim_start().to_string(),
        reply.done_reason,
        reply.prompt_eval_count,
        reply.eval_count,
    ))
}

pub(crate) fn decode_embed(body: &Value, cx: &DecodeContext<'_>, expected: usize) -> Result<EmbeddingResponse> {
    let reply: EmbedReply = parse(body)?;
    let vectors = reply.embeddings.ok_or(FormatError::MissingField("embeddings"))?;
    if vectors.len() != expected {
        return Err(FormatError::CountMismatch { expected, got: vectors.len() });
    }
    Ok(EmbeddingResponse {
        object: "list".to_string(),
        data: vectors
            .into_iter()
            .enumerate()
            .map(|(i, embedding)| EmbeddingData {
                object: "embedding".to_string(),
                index: i as u32,
                embedding,
            })
            .collect(),
        model: reply.model.unwrap_or_else(|| cx.model.to_string()),
    })
}

fn completion(
    cx: &DecodeContext<'_>,
    model: Option<String>,
    created_at: Option<String>,
    content: String,
    done_reason: Option<String>,
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
) -> ChatCompletionResponse {
    let created = created_at
        .as_deref()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.timestamp())
        .unwrap_or_else(|| chrono::Utc::now().timestamp());

    ChatCompletionResponse {
        id: cx.ids.next_chat_id(),
        object: "chat.completion".to_string(),
        created,
        model: model.unwrap_or_else(|| cx.model.to_string()),
        choices: vec![Choice {
            index: 0,
            message: AssistantMessage { role: "assistant".to_string(), content },
            finish_reason: done_reason.unwrap_or_else(|| "stop".to_string()),
        }],
        usage: Usage::new(prompt_tokens.unwrap_or(0), completion_tokens.unwrap_or(0)),
    }
}
