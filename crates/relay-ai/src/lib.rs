//! Wire types and HTTP clients for the cloud chat back-ends.
mod google;
mod http;
mod openai;
mod types;

pub use google::{GoogleAuth, GoogleClient, GoogleConfig};
pub use http::RetryPolicy;
pub use openai::{OpenAiClient, OpenAiConfig};
pub use types::{
    ChatRequest, ChatResponse, ChatUsage, ContentBlock, LlmClient, MediaSource, Message,
    MessageRole, RelayAiError, ToolCall, ToolChoice, ToolDefinition,
};
