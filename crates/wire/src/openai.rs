//! OpenAI-compatible native shapes. Close to the client contract, but replies
//! from third parties are still validated field by field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{
    AssistantMessage, ChatCompletionRequest, ChatCompletionResponse, Choice, EmbeddingData,
    EmbeddingResponse, Usage,
};
use crate::error::{FormatError, Result};
use crate::{parse, to_body, DecodeContext};

pub const CHAT_PATH: &str = "/chat/completions";
pub const EMBEDDINGS_PATH: &str = "/embeddings";

#[derive(Serialize)]
struct EmbeddingsBody<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ReplyChoice {
    index: Option<u32>,
    message: Option<ReplyMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ReplyUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ChatReply {
    id: Option<String>,
    created: Option<i64>,
    model: Option<String>,
    choices: Option<Vec<ReplyChoice>>,
    usage: Option<ReplyUsage>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: Option<u32>,
    embedding: Option<Vec<f64>>,
}

#[derive(Deserialize)]
struct EmbeddingsReply {
    model: Option<String>,
    data: Option<Vec<EmbeddingItem>>,
}

pub(crate) fn encode_chat(req: &ChatCompletionRequest, model: &str) -> Result<Value> {
    let body = ChatCompletionRequest {
        model: Some(model.to_string()),
        messages: req.messages.clone(),
        temperature: req.temperature,
    };
    to_body(&body)
}

pub(crate) fn encode_embeddings(input: Vec<String>, model: &str) -> Result<Value> {
    to_body(&EmbeddingsBody { model, input })
}

pub(crate) fn decode_chat(body: &Value, cx: &DecodeContext<'_>) -> Result<ChatCompletionResponse> {
    let reply: ChatReply = parse(body)?;
    let raw_choices = reply.choices.ok_or(FormatError::MissingField("choices"))?;
    if raw_choices.is_empty() {
        return Err(FormatError::MissingField("choices[0]"));
    }

    let mut choices = Vec::with_capacity(raw_choices.len());
    for (i, c) in raw_choices.into_iter().enumerate() {
        let content = c
            .message
            .and_then(|m| m.content)
            .ok_or(FormatError::MissingField("choices[].message.content"))?;
        choices.push(Choice {
            index: c.index.unwrap_or(i as u32),
            message: AssistantMessage { role: "assistant".to_string(), content },
            finish_reason: c.finish_reason.unwrap_or_else(|| "stop".to_string()),
        });
    }

    let usage = match reply.usage {
        Some(u) => {
            let prompt = u.prompt_tokens.unwrap_or(0);
            let completion = u.completion_tokens.unwrap_or(0);
            Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: u.total_tokens.unwrap_or(prompt.saturating_add(completion)),
            }
        }
        None => Usage::default(),
    };

    Ok(ChatCompletionResponse {
        id: reply.id.unwrap_or_else(|| cx.ids.next_chat_id()),
        object: "chat.completion".to_string(),
        created: reply.created.unwrap_or_else(|| chrono::Utc::now().timestamp()),
        model: reply.model.unwrap_or_else(|| cx.model.to_string()),
        choices,
        usage,
    })
}

pub(crate) fn decode_embeddings(
    body: &Value,
    cx: &DecodeContext<'_>,
    expected: usize,
) -> Result<EmbeddingResponse> {
    let reply: EmbeddingsReply = parse(body)?;
    let mut items = reply.data.ok_or(FormatError::MissingField("data"))?;
    if items.len() != expected {
        return Err(FormatError::CountMismatch { expected, got: items.len() });
    }
    items.sort_by_key(|item| item.index);

    let mut data = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let embedding = item.embedding.ok_or(FormatError::MissingField("data[].embedding"))?;
        data.push(EmbeddingData {
            object: "embedding".to_string(),
            index: i as u32,
            embedding,
        });
    }

    Ok(EmbeddingResponse {
        object: "list".to_string(),
        data,
        model: reply.model.unwrap_or_else(|| cx.model.to_string()),
    })
}
