//! Universal content types for the LLM chat protocol creatures speak.
//!
//! Mirrors the "source format" described in the translating proxy: a chat
//! message is either a plain string or a list of tagged content blocks.
//! Kept intentionally small — the escape hatch is exhaustive matching plus
//! `#[non_exhaustive]`, not a generic payload type.

use serde::{Deserialize, Serialize};

/// A chat message's content: either a bare string or structured blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Content {
    /// Plain text content.
    Text(String),
    /// Structured content blocks.
    Blocks(Vec<ContentBlock>),
}

/// A single block of structured message content.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    /// Plain text block.
    #[serde(rename = "text")]
    Text {
        /// The text content.
        text: String,
    },

    /// A tool invocation requested by the model.
    #[serde(rename = "tool_use")]
    ToolUse {
        /// Unique identifier for this tool use.
        id: String,
        /// Name of the tool to invoke.
        name: String,
        /// Tool input parameters.
        input: serde_json::Value,
    },

    /// Result of executing a previously-requested tool.
    #[serde(rename = "tool_result")]
    ToolResult {
        /// The `tool_use` id this result answers.
        tool_use_id: String,
        /// The result content, as plain text.
        content: String,
        /// Whether the tool execution errored.
        #[serde(default)]
        is_error: bool,
    },
}

impl Content {
    /// Build a plain text content value.
    pub fn text(s: impl Into<String>) -> Self {
        Content::Text(s.into())
    }

    /// Concatenate all text found in this content (bare string, or text
    /// blocks within a block list — non-text blocks are ignored).
    pub fn text_concat(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Render as a block list regardless of which variant this is.
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            Content::Text(s) => vec![ContentBlock::Text { text: s }],
            Content::Blocks(blocks) => blocks,
        }
    }
}

/// A single message in the source chat protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// `"user"` or `"assistant"`.
    pub role: Role,
    /// The message content.
    pub content: Content,
}

/// Conversation role in the source chat protocol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// System prompt: either bare text or a list of text blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SystemPrompt {
    /// A single system prompt string.
    Text(String),
    /// A list of text blocks, concatenated in order.
    Blocks(Vec<SystemTextBlock>),
}

/// A single block within a list-form system prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemTextBlock {
    pub text: String,
}

impl SystemPrompt {
    /// Flatten to a single string, in source order.
    pub fn flatten(&self) -> String {
        match self {
            SystemPrompt::Text(s) => s.clone(),
            SystemPrompt::Blocks(blocks) => blocks
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A tool definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
}

/// Token usage reported alongside a completion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_concat_bare_string() {
        let c = Content::text("hello");
        assert_eq!(c.text_concat(), "hello");
    }

    #[test]
    fn text_concat_blocks_ignores_non_text() {
        let c = Content::Blocks(vec![
            ContentBlock::Text {
                text: "a".to_string(),
            },
            ContentBlock::ToolUse {
                id: "t1".into(),
                name: "run".into(),
                input: serde_json::json!({}),
            },
            ContentBlock::Text {
                text: "b".to_string(),
            },
        ]);
        assert_eq!(c.text_concat(), "ab");
    }

    #[test]
    fn system_prompt_flatten_blocks() {
        let sp = SystemPrompt::Blocks(vec![
            SystemTextBlock { text: "a".into() },
            SystemTextBlock { text: "b".into() },
        ]);
        assert_eq!(sp.flatten(), "a\nb");
    }
}
