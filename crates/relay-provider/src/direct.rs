use std::sync::Arc;
use std::time::Duration;

use relay_ai::{ChatRequest, ChatResponse, LlmClient, Message, ToolChoice};
use relay_session::{ProviderKind, SessionHandle, Turn};
use relay_tools::ToolResult;

use crate::conversation::{interpret_response, ConversationSettings};
use crate::error::from_ai_error;
use crate::media::image_message;
use crate::{AsyncBridge, ChatProvider, ProviderError, ProviderReply, ToolRound};

/// Stateless cloud back-end authorized by a long-lived API key. The full
/// history is resent on every call.
pub struct DirectCloudProvider {
    label: String,
    client: Result<Arc<dyn LlmClient>, String>,
    settings: ConversationSettings,
    bridge: Arc<AsyncBridge>,
    request_timeout_ms: u64,
}

impl DirectCloudProvider {
    /// `client` is `Err` with a reason when the back-end could not be built,
    /// e.g. because no API key is configured. Calls then report the variant
    /// as unavailable.
    pub fn new(
        label: impl Into<String>,
        client: Result<Arc<dyn LlmClient>, String>,
        settings: ConversationSettings,
        bridge: Arc<AsyncBridge>,
        request_timeout_ms: u64,
    ) -> Self {
        Self {
            label: label.into(),
            client,
            settings,
            bridge,
            request_timeout_ms,
        }
    }

    fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let client = match &self.client {
            Ok(client) => Arc::clone(client),
            Err(reason) => return Err(ProviderError::Unavailable(reason.clone())),
        };
        let timeout_ms = self.request_timeout_ms;
        tracing::debug!(
            backend = %self.label,
            model = %request.model,
            messages = request.messages.len(),
            "direct cloud request"
        );
        let outcome = self
            .bridge
            .run(async move { client.complete(request).await }, Duration::from_millis(timeout_ms))?;
        outcome.map_err(|error| {
            tracing::warn!(backend = %self.label, %error, "direct cloud call failed");
            from_ai_error(error, timeout_ms)
        })
    }

    fn converse(&self, history: &[Turn], message: Message) -> Result<ProviderReply, ProviderError> {
        let transcript = self.settings.transcript(history, message);
        let response = self.complete(self.settings.request(transcript.clone(), ToolChoice::Auto))?;
        interpret_response(transcript, response)
    }
}

impl ChatProvider for DirectCloudProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DirectCloud
    }

    fn start_session(&self, _chat_id: &str, _history: &[Turn]) -> Result<SessionHandle, ProviderError> {
        if let Err(reason) = &self.client {
            return Err(ProviderError::Unavailable(reason.clone()));
        }
        Ok(SessionHandle::local(ProviderKind::DirectCloud))
    }

    fn send(
        &self,
        _session: &SessionHandle,
        history: &[Turn],
        text: &str,
    ) -> Result<ProviderReply, ProviderError> {
        self.converse(history, Message::user(text))
    }

    fn send_with_image(
        &self,
        _session: &SessionHandle,
        history: &[Turn],
        text: &str,
        image: &[u8],
    ) -> Result<ProviderReply, ProviderError> {
        self.converse(history, image_message(text, image))
    }

    fn finish_tool_round(
        &self,
        _session: &SessionHandle,
        round: ToolRound,
        result: &ToolResult,
    ) -> Result<ProviderReply, ProviderError> {
        let request = self.settings.finalize_request(round, result);
        let transcript = request.messages.clone();
        let response = self.complete(request)?;
        interpret_response(transcript, response)
    }

    fn describe_capabilities(&self) -> String {
        let status = match &self.client {
            Ok(_) => "ready".to_string(),
            Err(reason) => format!("unavailable ({reason})"),
        };
        describe_cloud(
            &format!("direct cloud via {}", self.label),
            &status,
            &self.settings,
        )
    }

    fn shutdown(&self) {
        self.bridge.shutdown();
    }
}

pub(crate) fn describe_cloud(name: &str, status: &str, settings: &ConversationSettings) -> String {
    let tools = if settings.tools.is_empty() {
        "none".to_string()
    } else {
        settings
            .tools
            .iter()
            .map(|tool| tool.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "Back-end: {name}\nStatus: {status}\nModel: {}\nTools: {tools}\nImages: supported",
        settings.model
    )
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use relay_ai::{
        ChatRequest, ChatResponse, ChatUsage, ContentBlock, LlmClient, Message, MessageRole,
        RelayAiError, ToolCall, ToolDefinition,
    };
    use relay_session::{ProviderKind, SessionHandle, Turn, TurnRole};
    use relay_tools::ToolResult;
    use serde_json::json;

    use super::DirectCloudProvider;
    use crate::conversation::ConversationSettings;
    use crate::{AsyncBridge, ChatProvider, ErrorClass, ProviderError, ProviderReply};

    #[derive(Clone, Default)]
    struct ScriptedClient {
        replies: Arc<Mutex<VecDeque<Result<ChatResponse, RelayAiError>>>>,
        requests: Arc<Mutex<Vec<ChatRequest>>>,
    }

    impl ScriptedClient {
        fn push(&self, reply: Result<ChatResponse, RelayAiError>) {
            self.replies.lock().expect("replies").push_back(reply);
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, RelayAiError> {
            self.requests.lock().expect("requests").push(request);
            self.replies
                .lock()
                .expect("replies")
                .pop_front()
                .unwrap_or_else(|| Err(RelayAiError::InvalidResponse("script exhausted".into())))
        }
    }

    fn text_response(text: &str) -> ChatResponse {
        ChatResponse {
            message: Message::assistant_text(text),
            finish_reason: Some("stop".to_string()),
            usage: ChatUsage::default(),
        }
    }

    fn settings() -> ConversationSettings {
        ConversationSettings {
            model: "gpt-test".to_string(),
            system_prompt: "You are a helpful assistant.".to_string(),
            max_tokens: 128,
            tools: vec![ToolDefinition {
                name: "calculate".to_string(),
                description: "math".to_string(),
                parameters: json!({ "type": "object" }),
            }],
        }
    }

    fn provider(client: &ScriptedClient) -> DirectCloudProvider {
        DirectCloudProvider::new(
            "openai",
            Ok(Arc::new(client.clone()) as Arc<dyn LlmClient>),
            settings(),
            Arc::new(AsyncBridge::new(1)),
            5_000,
        )
    }

    #[test]
    fn resends_history_and_returns_text() {
        let client = ScriptedClient::default();
        client.push(Ok(text_response("pong")));
        let provider = provider(&client);
        let handle = provider.start_session("chat", &[]).expect("session");
        let history = vec![
            Turn {
                role: TurnRole::User,
                text: "hi".to_string(),
                timestamp_ms: 0,
            },
            Turn {
                role: TurnRole::Assistant,
                text: "hello".to_string(),
                timestamp_ms: 0,
            },
        ];
        let reply = provider.send(&handle, &history, "ping").expect("reply");
        assert_eq!(reply, ProviderReply::Text("pong".to_string()));

        let requests = client.requests.lock().expect("requests");
        let messages = &requests[0].messages;
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].text_content(), "hi");
        assert_eq!(messages[3].text_content(), "ping");
    }

    #[test]
    fn tool_round_feeds_result_back() {
        let client = ScriptedClient::default();
        let call = ToolCall {
            id: "call-7".to_string(),
            name: "calculate".to_string(),
            arguments: json!({ "expression": "6*7" }),
        };
        client.push(Ok(ChatResponse {
            message: Message::assistant_blocks(vec![ContentBlock::tool_call(call.clone())]),
            finish_reason: Some("tool_calls".to_string()),
            usage: ChatUsage::default(),
        }));
        client.push(Ok(text_response("The answer is 42.")));
        let provider = provider(&client);
        let handle = SessionHandle::local(ProviderKind::DirectCloud);

        let ProviderReply::ToolRequested(round) = provider.send(&handle, &[], "6*7?").expect("send")
        else {
            panic!("expected tool request");
        };
        assert_eq!(round.call, call);
        let reply = provider
            .finish_tool_round(&handle, round, &ToolResult::ok("6 * 7 = 42"))
            .expect("final");
        assert_eq!(reply, ProviderReply::Text("The answer is 42.".to_string()));

        let requests = client.requests.lock().expect("requests");
        let last = requests[1].messages.last().expect("tool message");
        assert_eq!(last.role, MessageRole::Tool);
        assert_eq!(last.text_content(), "6 * 7 = 42");
    }

    #[test]
    fn missing_client_is_unavailable() {
        let provider = DirectCloudProvider::new(
            "openai",
            Err("OPENAI_API_KEY is not set".to_string()),
            settings(),
            Arc::new(AsyncBridge::new(1)),
            5_000,
        );
        let error = provider.start_session("chat", &[]).expect_err("unavailable");
        assert!(error.triggers_fallback());
        assert!(provider.describe_capabilities().contains("unavailable"));
    }

    #[test]
    fn upstream_failure_is_reported_not_raised() {
        let client = ScriptedClient::default();
        client.push(Err(RelayAiError::HttpStatus {
            status: 500,
            body: "boom".to_string(),
        }));
        let provider = provider(&client);
        let handle = SessionHandle::local(ProviderKind::DirectCloud);
        let error = provider.send(&handle, &[], "hi").expect_err("upstream");
        assert_eq!(error.class(), ErrorClass::UpstreamApi);
        assert!(!matches!(error, ProviderError::Unavailable(_)));
    }

    #[test]
    fn image_is_sent_inline() {
        let client = ScriptedClient::default();
        client.push(Ok(text_response("a cat")));
        let provider = provider(&client);
        let handle = SessionHandle::local(ProviderKind::DirectCloud);
        let reply = provider
            .send_with_image(&handle, &[], "what is it", b"\x89PNG\r\n\x1a\nrest")
            .expect("reply");
        assert_eq!(reply, ProviderReply::Text("a cat".to_string()));
        let requests = client.requests.lock().expect("requests");
        let user = requests[0].messages.last().expect("user message");
        assert!(user
            .content
            .iter()
            .any(|block| matches!(block, ContentBlock::Image { .. })));
    }
}
