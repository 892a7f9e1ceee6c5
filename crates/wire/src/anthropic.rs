//! Anthropic Messages API shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{AssistantMessage, ChatCompletionRequest, ChatCompletionResponse, Choice, Usage};
use crate::error::{FormatError, Result};
use crate::{parse, to_body, DecodeContext};

pub const MESSAGES_PATH: &str = "/messages";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Serialize)]
struct Turn {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Turn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Deserialize)]
struct Block {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct ReplyUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct MessagesReply {
    id: Option<String>,
    model: Option<String>,
    content: Option<Vec<Block>>,
    stop_reason: Option<String>,
    usage: Option<ReplyUsage>,
}

/// System turns are lifted into `system`; consecutive turns with the same
/// role are merged because the API requires alternation.
pub(crate) fn encode_chat(req: &ChatCompletionRequest, model: &str) -> Result<Value> {
    let mut system: Vec<String> = Vec::new();
    let mut turns: Vec<Turn> = Vec::new();

    for m in &req.messages {
        let text = m.content.as_text();
        if m.role == "system" {
            system.push(text);
            continue;
        }
        let role = if m.role == "assistant" { "assistant" } else { "user" };
        match turns.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&text);
            }
            _ => turns.push(Turn { role, content: text }),
        }
    }
    if turns.is_empty() {
        return Err(FormatError::EmptyMessages);
    }

    let body = MessagesBody {
        model,
        max_tokens: DEFAULT_MAX_TOKENS,
        system: if system.is_empty() { None } else { Some(system.join("\n\n")) },
        messages: turns,
        // this API caps temperature at 1.0
        temperature: req.temperature.map(|t| t.clamp(0.0, 1.0)),
    };
    to_body(&body)
}

pub(crate) fn decode_chat(body: &Value, cx: &DecodeContext<'_>) -> Result<ChatCompletionResponse> {
    let reply: MessagesReply = parse(body)?;
    let blocks = reply.content.ok_or(FormatError::MissingField("content"))?;
    let texts: Vec<String> = blocks
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect();
    if texts.is_empty() {
        return Err(FormatError::MissingField("content[].text"));
    }

    let usage = reply
        .usage
        .map(|u| Usage::new(u.input_tokens.unwrap_or(0), u.output_tokens.unwrap_or(0)))
        .unwrap_or_default();

    Ok(ChatCompletionResponse {
        id: reply.id.unwrap_or_else(|| cx.ids.next_chat_id()),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: reply.model.unwrap_or_else(|| cx.model.to_string()),
        choices: vec![Choice {
            index: 0,
            message: AssistantMessage { role: "assistant".to_string(), content: texts.concat() },
            finish_reason: finish_reason(reply.stop_reason.as_deref()).to_string(),
        }],
        usage,
    })
}

fn finish_reason(stop_reason: Option<&str>) -> &'static str {
    match stop_reason {
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        _ => "stop",
    }
}
