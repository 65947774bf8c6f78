use relay_ai::{Message, ToolCall};
use relay_session::{ProviderKind, SessionHandle, Turn};
use relay_tools::ToolResult;

use crate::ProviderError;

pub const IMAGE_NOT_SUPPORTED: &str =
    "Image understanding is not available with the current assistant. Please describe the image in text.";

/// Transcript state carried from a tool request to the finalizing call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRound {
    pub call: ToolCall,
    /// Every message sent so far, ending with the assistant's tool request.
    pub transcript: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderReply {
    Text(String),
    /// The back-end wants a local tool run before it answers.
    ToolRequested(ToolRound),
}

/// Uniform conversational contract every back-end variant implements.
///
/// All methods block the calling thread until the back-end answers or its
/// deadline passes. `history` is the chat's prior turns in conversation
/// order; variants that keep context remotely ignore it.
pub trait ChatProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn start_session(&self, chat_id: &str, history: &[Turn]) -> Result<SessionHandle, ProviderError>;

    fn send(
        &self,
        session: &SessionHandle,
        history: &[Turn],
        text: &str,
    ) -> Result<ProviderReply, ProviderError>;

    /// Variants without vision support answer with a fixed notice instead of
    /// failing.
    fn send_with_image(
        &self,
        _session: &SessionHandle,
        _history: &[Turn],
        _text: &str,
        _image: &[u8],
    ) -> Result<ProviderReply, ProviderError> {
        Ok(ProviderReply::Text(IMAGE_NOT_SUPPORTED.to_string()))
    }

    /// Feeds a tool result back and asks for the final answer.
    fn finish_tool_round(
        &self,
        _session: &SessionHandle,
        round: ToolRound,
        _result: &ToolResult,
    ) -> Result<ProviderReply, ProviderError> {
        Err(ProviderError::ToolExecution(format!(
            "{} back-end cannot complete tool call '{}'",
            self.kind(),
            round.call.name
        )))
    }

    fn end_session(&self, _session: &SessionHandle) -> Result<(), ProviderError> {
        Ok(())
    }

    fn describe_capabilities(&self) -> String;

    /// Releases process-wide resources such as transports and workers.
    fn shutdown(&self) {}
}
