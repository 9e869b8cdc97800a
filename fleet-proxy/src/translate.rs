//! Source ↔ target wire format translation.
//!
//! "Source" is the chat-style protocol every creature speaks. "Target" is
//! a response-style API with a flat sequence of input items instead of
//! alternating messages. Grounded on
//! `neuron-provider-anthropic/openai::mapping`'s `to_api_request`/
//! `from_api_response` shape, adapted from Chat-Completions-style mapping
//! to this response-style item sequence.

use fleet_core::{Content, ContentBlock, Message, Role, StopReason, SystemPrompt, TokenUsage, ToolDefinition};
use serde::{Deserialize, Serialize};

/// The chat-style request every creature sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
}

/// The chat-style response every creature expects back.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceResponse {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
}

/// One item in a target-format input sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetItem {
    Message { role: Role, content: Vec<TargetContentPart> },
    FunctionCall { call_id: String, name: String, arguments: String },
    FunctionCallOutput { call_id: String, output: String },
}

/// A content part within a target-format message item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetContentPart {
    InputText { text: String },
    OutputText { text: String },
}

/// A tool definition in target format.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TargetTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The target-format request body.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TargetRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub input: Vec<TargetItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<TargetTool>,
    pub max_output_tokens: u32,
}

/// Translate a source request into the target format: `system` flattens
/// to `instructions`, messages become a flat item sequence, tool
/// definitions become `{type: "function", ...}`.
pub fn source_to_target_request(req: &SourceRequest) -> TargetRequest {
    let instructions = req.system.as_ref().map(SystemPrompt::flatten);
    let mut input = Vec::new();

    for message in &req.messages {
        match message.role {
            Role::User => translate_user_message(message.content.clone(), &mut input),
            Role::Assistant => translate_assistant_message(message.content.clone(), &mut input),
        }
    }

    let tools = req
        .tools
        .iter()
        .map(|t| TargetTool {
            kind: "function".to_string(),
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.input_schema.clone(),
        })
        .collect();

    TargetRequest {
        model: req.model.clone(),
        instructions,
        input,
        tools,
        max_output_tokens: req.max_tokens,
    }
}

fn translate_user_message(content: Content, input: &mut Vec<TargetItem>) {
    let mut parts = Vec::new();
    for block in content.into_blocks() {
        match block {
            ContentBlock::Text { text } => parts.push(TargetContentPart::InputText { text }),
            ContentBlock::ToolResult { tool_use_id, content, .. } => {
                if !parts.is_empty() {
                    input.push(TargetItem::Message {
                        role: Role::User,
                        content: std::mem::take(&mut parts),
                    });
                }
                input.push(TargetItem::FunctionCallOutput {
                    call_id: tool_use_id,
                    output: content,
                });
            }
            ContentBlock::ToolUse { .. } => {
                tracing::debug!("ignoring tool_use block on a user message during target translation");
            }
        }
    }
    if !parts.is_empty() {
        input.push(TargetItem::Message { role: Role::User, content: parts });
    }
}

fn translate_assistant_message(content: Content, input: &mut Vec<TargetItem>) {
    let mut parts = Vec::new();
    for block in content.into_blocks() {
        match block {
            ContentBlock::Text { text } => parts.push(TargetContentPart::OutputText { text }),
            ContentBlock::ToolUse { id, name, input: tool_input } => {
                if !parts.is_empty() {
                    input.push(TargetItem::Message {
                        role: Role::Assistant,
                        content: std::mem::take(&mut parts),
                    });
                }
                let arguments = serde_json::to_string(&tool_input).unwrap_or_else(|_| "{}".to_string());
                input.push(TargetItem::FunctionCall { call_id: id, name, arguments });
            }
            ContentBlock::ToolResult { .. } => {
                tracing::debug!("ignoring tool_result block on an assistant message during target translation");
            }
        }
    }
    if !parts.is_empty() {
        input.push(TargetItem::Message { role: Role::Assistant, content: parts });
    }
}

/// Translate a target-format upstream response body into the source
/// response shape. Walks `output` items directly as JSON rather than
/// through a strict enum, since unrecognized item kinds (`reasoning`)
/// must be skipped rather than fail the whole parse.
pub fn target_response_to_source(body: &serde_json::Value) -> Result<SourceResponse, TranslateError> {
    let output = body
        .get("output")
        .and_then(|v| v.as_array())
        .ok_or(TranslateError::MissingField("output"))?;

    let mut blocks = Vec::new();
    let mut saw_tool_use = false;

    for item in output {
        match item.get("type").and_then(|t| t.as_str()) {
            Some("message") => {
                if let Some(parts) = item.get("content").and_then(|c| c.as_array()) {
                    for part in parts {
                        if part.get("type").and_then(|t| t.as_str()) == Some("output_text") {
                            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                                blocks.push(ContentBlock::Text { text: text.to_string() });
                            }
                        }
                    }
                }
            }
            Some("function_call") => {
                let id = item.get("call_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let name = item.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let input = item
                    .get("arguments")
                    .and_then(|v| v.as_str())
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or_else(|| serde_json::json!({}));
                blocks.push(ContentBlock::ToolUse { id, name, input });
                saw_tool_use = true;
            }
            _ => {
                // `reasoning` and anything else the target adds later: skip.
            }
        }
    }

    let usage = body
        .get("usage")
        .map(|u| TokenUsage {
            input_tokens: u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            output_tokens: u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        })
        .unwrap_or_default();

    Ok(SourceResponse {
        role: Role::Assistant,
        content: blocks,
        stop_reason: if saw_tool_use { StopReason::ToolUse } else { StopReason::EndTurn },
        usage,
    })
}

/// Failures translating a target response back to source format.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("target response missing required field `{0}`")]
    MissingField(&'static str),
}
