//! Request building shared by the stateless cloud variants, which resend the
//! full history on every call.

use relay_ai::{ChatRequest, ChatResponse, ContentBlock, Message, ToolChoice, ToolDefinition};
use relay_session::{Turn, TurnRole};
use relay_tools::ToolResult;

use crate::{ProviderError, ProviderReply, ToolRound};

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSettings {
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub tools: Vec<ToolDefinition>,
}

impl ConversationSettings {
    pub(crate) fn transcript(&self, history: &[Turn], message: Message) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if !self.system_prompt.trim().is_empty() {
            messages.push(Message::system(self.system_prompt.clone()));
        }
        messages.extend(history.iter().map(|turn| match turn.role {
            TurnRole::User => Message::user(turn.text.clone()),
            TurnRole::Assistant => Message::assistant_text(turn.text.clone()),
        }));
        messages.push(message);
        messages
    }

    pub(crate) fn request(&self, messages: Vec<Message>, tool_choice: ToolChoice) -> ChatRequest {
        let tool_choice = (!self.tools.is_empty()).then_some(tool_choice);
        ChatRequest {
            model: self.model.clone(),
            messages,
            tools: self.tools.clone(),
            tool_choice,
            max_tokens: Some(self.max_tokens),
        }
    }

    /// Request for the call that turns a tool result into the final answer.
    /// Further tool use is switched off for that call.
    pub(crate) fn finalize_request(&self, round: ToolRound, result: &ToolResult) -> ChatRequest {
        let ToolRound {
            call,
            mut transcript,
        } = round;
        transcript.push(Message::tool_result(
            call.id,
            call.name,
            result.content.clone(),
            !result.success,
        ));
        self.request(transcript, ToolChoice::None)
    }
}

/// Turns a completion into either final text or a pending tool round. Only
/// the first requested call is honored.
pub(crate) fn interpret_response(
    transcript: Vec<Message>,
    response: ChatResponse,
) -> Result<ProviderReply, ProviderError> {
    if let Some(call) = response.message.tool_calls().into_iter().next() {
        let mut transcript = transcript;
        transcript.push(Message::assistant_blocks(vec![ContentBlock::tool_call(
            call.clone(),
        )]));
        return Ok(ProviderReply::ToolRequested(ToolRound { call, transcript }));
    }
    let text = response.message.text_content();
    let text = text.trim();
    if text.is_empty() {
        return Err(ProviderError::UpstreamApi(
            "response contained no text".to_string(),
        ));
    }
    Ok(ProviderReply::Text(text.to_string()))
}

#[cfg(test)]
mod tests {
    use relay_ai::{
        ChatResponse, ChatUsage, ContentBlock, Message, MessageRole, ToolCall, ToolChoice,
        ToolDefinition,
    };
    use relay_session::{Turn, TurnRole};
    use relay_tools::ToolResult;
    use serde_json::json;

    use super::{interpret_response, ConversationSettings};
    use crate::{ProviderError, ProviderReply};

    fn settings(tools: Vec<ToolDefinition>) -> ConversationSettings {
        ConversationSettings {
            model: "model-x".to_string(),
            system_prompt: "be brief".to_string(),
            max_tokens: 256,
            tools,
        }
    }

    fn calculate_definition() -> ToolDefinition {
        ToolDefinition {
            name: "calculate".to_string(),
            description: "math".to_string(),
            parameters: json!({ "type": "object" }),
        }
    }

    fn response(message: Message) -> ChatResponse {
        ChatResponse {
            message,
            finish_reason: None,
            usage: ChatUsage::default(),
        }
    }

    #[test]
    fn transcript_keeps_history_order() {
        let history = vec![
            Turn {
                role: TurnRole::User,
                text: "one".to_string(),
                timestamp_ms: 1,
            },
            Turn {
                role: TurnRole::Assistant,
                text: "two".to_string(),
                timestamp_ms: 2,
            },
        ];
        let messages = settings(Vec::new()).transcript(&history, Message::user("three"));
        let roles: Vec<_> = messages.iter().map(|message| message.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::System,
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::User
            ]
        );
        assert_eq!(messages[3].text_content(), "three");
    }

    #[test]
    fn tool_choice_only_sent_with_tools() {
        let without = settings(Vec::new()).request(Vec::new(), ToolChoice::Auto);
        assert_eq!(without.tool_choice, None);
        let with = settings(vec![calculate_definition()]).request(Vec::new(), ToolChoice::Auto);
        assert_eq!(with.tool_choice, Some(ToolChoice::Auto));
    }

    #[test]
    fn tool_call_becomes_round_and_finalize_appends_result() {
        let call = ToolCall {
            id: "call-1".to_string(),
            name: "calculate".to_string(),
            arguments: json!({ "expression": "2+2" }),
        };
        let reply = interpret_response(
            vec![Message::user("2+2?")],
            response(Message::assistant_blocks(vec![ContentBlock::tool_call(call.clone())])),
        )
        .expect("reply");
        let ProviderReply::ToolRequested(round) = reply else {
            panic!("expected tool round");
        };
        assert_eq!(round.call, call);
        assert_eq!(round.transcript.len(), 2);

        let request = settings(vec![calculate_definition()])
            .finalize_request(round, &ToolResult::ok("2 + 2 = 4"));
        let last = request.messages.last().expect("tool result");
        assert_eq!(last.role, MessageRole::Tool);
        assert_eq!(last.tool_call_id.as_deref(), Some("call-1"));
        assert!(!last.is_error);
        assert_eq!(request.tool_choice, Some(ToolChoice::None));
    }

    #[test]
    fn blank_text_is_an_upstream_error() {
        let error = interpret_response(Vec::new(), response(Message::assistant_text("  ")))
            .expect_err("blank");
        assert!(matches!(error, ProviderError::UpstreamApi(_)));
    }
}
