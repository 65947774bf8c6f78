use std::sync::Arc;
use std::time::Duration;

use relay_ai::{ChatRequest, ChatResponse, GoogleClient, Message, ToolChoice};
use relay_session::{ProviderKind, SessionHandle, Turn};
use relay_tools::ToolResult;

use crate::conversation::{interpret_response, ConversationSettings};
use crate::direct::describe_cloud;
use crate::error::from_ai_error;
use crate::media::image_message;
use crate::{
    AccessTokenCache, AsyncBridge, ChatProvider, OAuthClientCredentials, ProviderError,
    ProviderReply, ToolRound,
};

/// Cloud back-end reached with short-lived OAuth2 bearer tokens. Each call
/// asks the token cache first; a rejected token is refreshed and the call is
/// retried exactly once.
pub struct OAuthProxiedProvider {
    client: Result<Arc<GoogleClient>, String>,
    credentials: Option<OAuthClientCredentials>,
    tokens: Arc<AccessTokenCache>,
    settings: ConversationSettings,
    bridge: Arc<AsyncBridge>,
    request_timeout_ms: u64,
    token_timeout_ms: u64,
}

impl OAuthProxiedProvider {
    pub fn new(
        client: Result<Arc<GoogleClient>, String>,
        credentials: Option<OAuthClientCredentials>,
        tokens: Arc<AccessTokenCache>,
        settings: ConversationSettings,
        bridge: Arc<AsyncBridge>,
        request_timeout_ms: u64,
        token_timeout_ms: u64,
    ) -> Self {
        Self {
            client,
            credentials,
            tokens,
            settings,
            bridge,
            request_timeout_ms,
            token_timeout_ms,
        }
    }

    fn readiness(&self) -> Result<(Arc<GoogleClient>, OAuthClientCredentials), ProviderError> {
        let client = match &self.client {
            Ok(client) => Arc::clone(client),
            Err(reason) => return Err(ProviderError::Unavailable(reason.clone())),
        };
        let credentials = self.credentials.clone().ok_or_else(|| {
            ProviderError::Unavailable("OAuth client credentials are not configured".to_string())
        })?;
        Ok((client, credentials))
    }

    fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let (client, credentials) = self.readiness()?;
        let tokens = Arc::clone(&self.tokens);
        let timeout_ms = self.request_timeout_ms;
        // Worst case: refresh, rejected call, forced refresh, retried call.
        let deadline_ms = timeout_ms
            .saturating_mul(2)
            .saturating_add(self.token_timeout_ms.saturating_mul(2));
        tracing::debug!(model = %request.model, messages = request.messages.len(), "oauth proxied request");
        self.bridge.run(
            call_with_refresh(client, tokens, credentials, request, timeout_ms),
            Duration::from_millis(deadline_ms),
        )?
        .inspect_err(|error| tracing::warn!(%error, "oauth proxied call failed"))
    }

    fn converse(&self, history: &[Turn], message: Message) -> Result<ProviderReply, ProviderError> {
        let transcript = self.settings.transcript(history, message);
        let response = self.complete(self.settings.request(transcript.clone(), ToolChoice::Auto))?;
        interpret_response(transcript, response)
    }
}

async fn call_with_refresh(
    client: Arc<GoogleClient>,
    tokens: Arc<AccessTokenCache>,
    credentials: OAuthClientCredentials,
    request: ChatRequest,
    timeout_ms: u64,
) -> Result<ChatResponse, ProviderError> {
    let token = tokens.get_token(&credentials).await?;
    match client.complete_with_bearer(request.clone(), &token).await {
        Ok(response) => Ok(response),
        Err(error) if error.is_auth_failure() => {
            tracing::warn!(client_id = %credentials.client_id, "bearer token rejected, forcing refresh");
            let token = tokens.force_refresh(&credentials).await?;
            client
                .complete_with_bearer(request, &token)
                .await
                .map_err(|error| from_ai_error(error, timeout_ms))
        }
        Err(error) => Err(from_ai_error(error, timeout_ms)),
    }
}

impl ChatProvider for OAuthProxiedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OAuthProxied
    }

    fn start_session(&self, _chat_id: &str, _history: &[Turn]) -> Result<SessionHandle, ProviderError> {
        self.readiness()?;
        Ok(SessionHandle::local(ProviderKind::OAuthProxied))
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
        let status = match self.readiness() {
            Ok(_) => "ready".to_string(),
            Err(error) => format!("unavailable ({error})"),
        };
        describe_cloud("OAuth proxied cloud", &status, &self.settings)
    }

    fn shutdown(&self) {
        self.bridge.shutdown();
    }
}
