use std::sync::Arc;

use relay_ai::{GoogleAuth, GoogleClient, GoogleConfig, LlmClient, OpenAiClient, OpenAiConfig, RetryPolicy};
use relay_session::{ProviderKind, SessionHandle, Turn};
use relay_tools::ToolDispatcher;

use crate::conversation::ConversationSettings;
use crate::session_transport::{StdioSessionTransport, StdioTransportConfig};
use crate::{
    AccessTokenCache, AsyncBridge, AsyncToolSessionProvider, ChatProvider, DirectCloudProvider,
    OAuthClientCredentials, OAuthProxiedProvider, ProviderError, ProviderReply, RuleBasedProvider,
    DEFAULT_TOKEN_URL,
};

pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_GOOGLE_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GOOGLE_MODEL: &str = "gemini-1.5-pro";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const DEFAULT_MAX_TOKENS: u32 = 1_024;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_TOKEN_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_HISTORY_TURNS: usize = 20;
pub const DEFAULT_BRIDGE_WORKERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudBackend {
    OpenAi,
    Google,
}

impl CloudBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Google => "google",
        }
    }
}

/// Which back-end answers, with its endpoint and credentials.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderSelection {
    DirectCloud {
        backend: CloudBackend,
        api_base: String,
        api_key: Option<String>,
        model: String,
    },
    OAuthProxied {
        credentials: Option<OAuthClientCredentials>,
        token_url: String,
        endpoint: String,
        model: String,
    },
    RuleBased,
    AsyncToolSession {
        command: Option<String>,
        args: Vec<String>,
        model: Option<String>,
    },
}

impl ProviderSelection {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::DirectCloud { .. } => ProviderKind::DirectCloud,
            Self::OAuthProxied { .. } => ProviderKind::OAuthProxied,
            Self::RuleBased => ProviderKind::RuleBased,
            Self::AsyncToolSession { .. } => ProviderKind::AsyncToolSession,
        }
    }
}

/// Start-up configuration. Read-only once the orchestrator is built.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub selection: ProviderSelection,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub request_timeout_ms: u64,
    pub session_timeout_ms: u64,
    pub token_timeout_ms: u64,
    pub max_history_turns: usize,
    pub earthquake_api_base: String,
    pub bridge_workers: usize,
    pub retry: RetryPolicy,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            selection: ProviderSelection::RuleBased,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            session_timeout_ms: crate::DEFAULT_SESSION_DEADLINE_MS,
            token_timeout_ms: DEFAULT_TOKEN_TIMEOUT_MS,
            max_history_turns: DEFAULT_MAX_HISTORY_TURNS,
            earthquake_api_base: relay_tools::DEFAULT_EARTHQUAKE_API_BASE.to_string(),
            bridge_workers: DEFAULT_BRIDGE_WORKERS,
            retry: RetryPolicy::default(),
        }
    }
}

impl ProviderConfig {
    pub fn kind(&self) -> ProviderKind {
        self.selection.kind()
    }

    fn settings(&self, model: &str, tools: &ToolDispatcher) -> ConversationSettings {
        ConversationSettings {
            model: model.to_string(),
            system_prompt: self.system_prompt.clone(),
            max_tokens: self.max_tokens,
            tools: tools.definitions(),
        }
    }
}

/// Builds the configured variant. Missing credentials never fail here: the
/// variant reports itself unavailable on use so callers fall back.
pub fn build_provider(config: &ProviderConfig, tools: &ToolDispatcher) -> Box<dyn ChatProvider> {
    let bridge = Arc::new(AsyncBridge::new(config.bridge_workers));
    match &config.selection {
        ProviderSelection::DirectCloud {
            backend,
            api_base,
            api_key,
            model,
        } => {
            let client = build_cloud_client(config, *backend, api_base, api_key.as_deref());
            Box::new(DirectCloudProvider::new(
                backend.as_str(),
                client,
                config.settings(model, tools),
                bridge,
                config.request_timeout_ms,
            ))
        }
        ProviderSelection::OAuthProxied {
            credentials,
            token_url,
            endpoint,
            model,
        } => {
            let tokens = match AccessTokenCache::new(token_url.as_str(), config.token_timeout_ms) {
                Ok(tokens) => Arc::new(tokens),
                Err(error) => return Box::new(UnavailableProvider::new(ProviderKind::OAuthProxied, error.to_string())),
            };
            let client = GoogleClient::for_bearer_auth(endpoint.as_str(), config.request_timeout_ms, config.retry)
                .map(Arc::new)
                .map_err(|error| error.to_string());
            Box::new(OAuthProxiedProvider::new(
                client,
                credentials.clone(),
                tokens,
                config.settings(model, tools),
                bridge,
                config.request_timeout_ms,
                config.token_timeout_ms,
            ))
        }
        ProviderSelection::RuleBased => Box::new(RuleBasedProvider::default()),
        ProviderSelection::AsyncToolSession {
            command,
            args,
            model,
        } => {
            let Some(command) = command.as_deref().map(str::trim).filter(|value| !value.is_empty())
            else {
                return Box::new(UnavailableProvider::new(
                    ProviderKind::AsyncToolSession,
                    "no session host command is configured",
                ));
            };
            let transport = StdioSessionTransport::new(
                StdioTransportConfig {
                    command: command.to_string(),
                    args: args.clone(),
                },
                Arc::clone(&bridge),
            );
            Box::new(AsyncToolSessionProvider::new(
                Arc::new(transport),
                bridge,
                model.clone(),
                config.session_timeout_ms,
            ))
        }
    }
}

fn build_cloud_client(
    config: &ProviderConfig,
    backend: CloudBackend,
    api_base: &str,
    api_key: Option<&str>,
) -> Result<Arc<dyn LlmClient>, String> {
    let api_key = api_key
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| format!("no {} API key is configured", backend.as_str()))?;
    let client: Arc<dyn LlmClient> = match backend {
        CloudBackend::OpenAi => Arc::new(
            OpenAiClient::new(OpenAiConfig {
                api_base: api_base.to_string(),
                api_key: api_key.to_string(),
                request_timeout_ms: config.request_timeout_ms,
                retry: config.retry,
            })
            .map_err(|error| error.to_string())?,
        ),
        CloudBackend::Google => Arc::new(
            GoogleClient::new(GoogleConfig {
                api_base: api_base.to_string(),
                auth: GoogleAuth::ApiKey(api_key.to_string()),
                request_timeout_ms: config.request_timeout_ms,
                retry: config.retry,
            })
            .map_err(|error| error.to_string())?,
        ),
    };
    Ok(client)
}

/// Stand-in for a variant that could not be set up at all.
struct UnavailableProvider {
    kind: ProviderKind,
    reason: String,
}

impl UnavailableProvider {
    fn new(kind: ProviderKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    fn error(&self) -> ProviderError {
        ProviderError::Unavailable(self.reason.clone())
    }
}

impl ChatProvider for UnavailableProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn start_session(&self, _chat_id: &str, _history: &[Turn]) -> Result<SessionHandle, ProviderError> {
        Err(self.error())
    }

    fn send(
        &self,
        _session: &SessionHandle,
        _history: &[Turn],
        _text: &str,
    ) -> Result<ProviderReply, ProviderError> {
        Err(self.error())
    }

    fn send_with_image(
        &self,
        _session: &SessionHandle,
        _history: &[Turn],
        _text: &str,
        _image: &[u8],
    ) -> Result<ProviderReply, ProviderError> {
        Err(self.error())
    }

    fn describe_capabilities(&self) -> String {
        format!("Back-end: {}\nStatus: unavailable ({})", self.kind, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use relay_session::ProviderKind;
    use relay_tools::default_dispatcher;

    use super::{build_provider, CloudBackend, ProviderConfig, ProviderSelection};

    fn tools() -> relay_tools::ToolDispatcher {
        default_dispatcher("test", "http://localhost/query")
    }

    #[test]
    fn defaults_select_rules() {
        let config = ProviderConfig::default();
        assert_eq!(config.kind(), ProviderKind::RuleBased);
        assert_eq!(config.max_history_turns, 20);
        assert_eq!(config.session_timeout_ms, 60_000);
        let provider = build_provider(&config, &tools());
        assert_eq!(provider.kind(), ProviderKind::RuleBased);
    }

    #[test]
    fn missing_credentials_build_but_report_unavailable() {
        let selections = [
            ProviderSelection::DirectCloud {
                backend: CloudBackend::OpenAi,
                api_base: "http://localhost".to_string(),
                api_key: None,
                model: "m".to_string(),
            },
            ProviderSelection::OAuthProxied {
                credentials: None,
                token_url: "http://localhost/token".to_string(),
                endpoint: "http://localhost".to_string(),
                model: "m".to_string(),
            },
            ProviderSelection::AsyncToolSession {
                command: None,
                args: Vec::new(),
                model: None,
            },
        ];
        for selection in selections {
            let kind = selection.kind();
            let config = ProviderConfig {
                selection,
                ..ProviderConfig::default()
            };
            let provider = build_provider(&config, &tools());
            assert_eq!(provider.kind(), kind);
            let error = provider.start_session("chat", &[]).expect_err("unavailable");
            assert!(error.triggers_fallback(), "{kind}: {error}");
        }
    }

    #[test]
    fn cloud_settings_declare_dispatcher_tools() {
        let config = ProviderConfig {
            selection: ProviderSelection::DirectCloud {
                backend: CloudBackend::Google,
                api_base: "http://localhost".to_string(),
                api_key: Some("key".to_string()),
                model: "gemini".to_string(),
            },
            ..ProviderConfig::default()
        };
        let description = build_provider(&config, &tools()).describe_capabilities();
        assert!(description.contains("ready"));
        assert!(description.contains("calculate"));
    }
}
