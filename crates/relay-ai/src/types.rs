use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `MessageRole` values.
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A function invocation requested by a back-end.
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Where the bytes of a media block live.
pub enum MediaSource {
    Base64 { mime_type: String, data: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Enumerates supported `ContentBlock` values.
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    Image {
        source: MediaSource,
    },
}

impl ContentBlock {
    pub fn tool_call(call: ToolCall) -> Self {
        Self::ToolCall {
            id: call.id,
            name: call.name,
            arguments: call.arguments,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// One entry of a chat transcript sent to a back-end.
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub is_error: bool,
}

impl Message {
    fn with_role(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content,
            tool_call_id: None,
            tool_name: None,
            is_error: false,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(
            MessageRole::System,
            vec![ContentBlock::Text { text: text.into() }],
        )
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(
            MessageRole::User,
            vec![ContentBlock::Text { text: text.into() }],
        )
    }

    /// User message carrying an inline base64 image after the text.
    pub fn user_with_image(
        text: impl Into<String>,
        mime_type: impl Into<String>,
        base64_data: impl Into<String>,
    ) -> Self {
        Self::with_role(
            MessageRole::User,
            vec![
                ContentBlock::Text { text: text.into() },
                ContentBlock::Image {
                    source: MediaSource::Base64 {
                        mime_type: mime_type.into(),
                        data: base64_data.into(),
                    },
                },
            ],
        )
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::with_role(
            MessageRole::Assistant,
            vec![ContentBlock::Text { text: text.into() }],
        )
    }

    pub fn assistant_blocks(content: Vec<ContentBlock>) -> Self {
        Self::with_role(MessageRole::Assistant, content)
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        text: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: MessageRole::Tool,
            content: vec![ContentBlock::Text { text: text.into() }],
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            is_error,
        }
    }

    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::ToolCall { .. } | ContentBlock::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolCall {
                    id,
                    name,
                    arguments,
                } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }),
                ContentBlock::Text { .. } | ContentBlock::Image { .. } => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A function a back-end may ask to invoke.
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
/// Enumerates supported `ToolChoice` values.
pub enum ToolChoice {
    Auto,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChatUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub message: Message,
    pub finish_reason: Option<String>,
    pub usage: ChatUsage,
}

#[derive(Debug, Error)]
/// Failures raised by the cloud HTTP clients.
pub enum RelayAiError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RelayAiError {
    /// True when the endpoint rejected the caller's credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::HttpStatus { status, .. } if *status == 401 || *status == 403)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Http(inner) if inner.is_timeout())
    }
}

#[async_trait]
/// Trait contract for chat-completion back-ends.
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, RelayAiError>;
}

#[cfg(test)]
mod tests {
    use super::{ContentBlock, Message, MessageRole, RelayAiError};

    #[test]
    fn collects_text_content() {
        let message = Message {
            role: MessageRole::Assistant,
            content: vec![
                ContentBlock::Text {
                    text: "first".to_string(),
                },
                ContentBlock::ToolCall {
                    id: "1".to_string(),
                    name: "calculate".to_string(),
                    arguments: serde_json::json!({ "expression": "1+1" }),
                },
                ContentBlock::Text {
                    text: "second".to_string(),
                },
            ],
            tool_call_id: None,
            tool_name: None,
            is_error: false,
        };

        assert_eq!(message.text_content(), "first\nsecond");
        assert_eq!(message.tool_calls().len(), 1);
        assert_eq!(message.tool_calls()[0].name, "calculate");
    }

    #[test]
    fn image_blocks_do_not_leak_into_text_content() {
        let message = Message::user_with_image("what is this", "image/png", "AAAA");
        assert_eq!(message.text_content(), "what is this");
        assert_eq!(message.content.len(), 2);
    }

    #[test]
    fn auth_failure_covers_401_and_403_only() {
        let unauthorized = RelayAiError::HttpStatus {
            status: 401,
            body: String::new(),
        };
        let forbidden = RelayAiError::HttpStatus {
            status: 403,
            body: String::new(),
        };
        let throttled = RelayAiError::HttpStatus {
            status: 429,
            body: String::new(),
        };
        assert!(unauthorized.is_auth_failure());
        assert!(forbidden.is_auth_failure());
        assert!(!throttled.is_auth_failure());
        assert!(!RelayAiError::MissingApiKey.is_auth_failure());
    }
}
