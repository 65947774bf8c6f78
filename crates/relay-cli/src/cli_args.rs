use anyhow::{ensure, Result};
use clap::Parser;
use relay_ai::RetryPolicy;
use relay_provider::{
    CloudBackend, OAuthClientCredentials, ProviderConfig, ProviderSelection,
    DEFAULT_BRIDGE_WORKERS, DEFAULT_GOOGLE_API_BASE, DEFAULT_GOOGLE_MODEL,
    DEFAULT_MAX_HISTORY_TURNS, DEFAULT_MAX_TOKENS, DEFAULT_OPENAI_API_BASE, DEFAULT_OPENAI_MODEL,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_SESSION_DEADLINE_MS, DEFAULT_SYSTEM_PROMPT,
    DEFAULT_TOKEN_TIMEOUT_MS, DEFAULT_TOKEN_URL,
};
use relay_tools::DEFAULT_EARTHQUAKE_API_BASE;

use crate::CliProvider;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u32(value: &str) -> Result<u32, String> {
    let parsed = value
        .parse::<u32>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "relay-bot",
    about = "Chat relay with cloud, OAuth-proxied, session-host and offline back-ends",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "RELAY_PROVIDER",
        value_enum,
        default_value = "rules",
        help = "Back-end that answers messages"
    )]
    pub provider: CliProvider,

    #[arg(
        long,
        env = "OPENAI_API_KEY",
        hide_env_values = true,
        help = "API key for the OpenAI-compatible back-end"
    )]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "RELAY_OPENAI_API_BASE", default_value = DEFAULT_OPENAI_API_BASE)]
    pub openai_api_base: String,

    #[arg(long, env = "RELAY_OPENAI_MODEL", default_value = DEFAULT_OPENAI_MODEL)]
    pub openai_model: String,

    #[arg(
        long,
        env = "GEMINI_API_KEY",
        hide_env_values = true,
        help = "API key for Google Gemini"
    )]
    pub google_api_key: Option<String>,

    #[arg(long, env = "RELAY_GOOGLE_API_BASE", default_value = DEFAULT_GOOGLE_API_BASE)]
    pub google_api_base: String,

    #[arg(long, env = "RELAY_GOOGLE_MODEL", default_value = DEFAULT_GOOGLE_MODEL)]
    pub google_model: String,

    #[arg(long, env = "RELAY_OAUTH_CLIENT_ID", help = "OAuth2 client id for the proxied back-end")]
    pub oauth_client_id: Option<String>,

    #[arg(long, env = "RELAY_OAUTH_CLIENT_SECRET", hide_env_values = true)]
    pub oauth_client_secret: Option<String>,

    #[arg(long, env = "RELAY_OAUTH_REFRESH_TOKEN", hide_env_values = true)]
    pub oauth_refresh_token: Option<String>,

    #[arg(long, env = "RELAY_OAUTH_TOKEN_URL", default_value = DEFAULT_TOKEN_URL)]
    pub oauth_token_url: String,

    #[arg(
        long,
        env = "RELAY_OAUTH_ENDPOINT",
        default_value = DEFAULT_GOOGLE_API_BASE,
        help = "Base URL of the generateContent endpoint reached with bearer tokens"
    )]
    pub oauth_endpoint: String,

    #[arg(
        long,
        env = "RELAY_SESSION_COMMAND",
        help = "Session host executable for the session back-end"
    )]
    pub session_command: Option<String>,

    #[arg(
        long,
        env = "RELAY_SESSION_ARGS",
        value_delimiter = ',',
        help = "Additional argument(s) passed to the session host"
    )]
    pub session_args: Vec<String>,

    #[arg(long, env = "RELAY_SESSION_MODEL")]
    pub session_model: Option<String>,

    #[arg(
        long,
        env = "RELAY_REQUEST_TIMEOUT_MS",
        default_value_t = DEFAULT_REQUEST_TIMEOUT_MS,
        value_parser = parse_positive_u64
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long,
        env = "RELAY_SESSION_TIMEOUT_MS",
        default_value_t = DEFAULT_SESSION_DEADLINE_MS,
        value_parser = parse_positive_u64,
        help = "Deadline for one session-host turn"
    )]
    pub session_timeout_ms: u64,

    #[arg(
        long,
        env = "RELAY_TOKEN_TIMEOUT_MS",
        default_value_t = DEFAULT_TOKEN_TIMEOUT_MS,
        value_parser = parse_positive_u64
    )]
    pub token_timeout_ms: u64,

    #[arg(
        long,
        env = "RELAY_MAX_HISTORY_TURNS",
        default_value_t = DEFAULT_MAX_HISTORY_TURNS,
        value_parser = parse_positive_usize
    )]
    pub max_history_turns: usize,

    #[arg(
        long,
        env = "RELAY_MAX_TOKENS",
        default_value_t = DEFAULT_MAX_TOKENS,
        value_parser = parse_positive_u32
    )]
    pub max_tokens: u32,

    #[arg(long, env = "RELAY_SYSTEM_PROMPT", default_value = DEFAULT_SYSTEM_PROMPT)]
    pub system_prompt: String,

    #[arg(long, env = "RELAY_EARTHQUAKE_API_BASE", default_value = DEFAULT_EARTHQUAKE_API_BASE)]
    pub earthquake_api_base: String,

    #[arg(
        long,
        env = "RELAY_BRIDGE_WORKERS",
        default_value_t = DEFAULT_BRIDGE_WORKERS,
        value_parser = parse_positive_usize
    )]
    pub bridge_workers: usize,

    #[arg(
        long,
        env = "RELAY_HTTP_MAX_RETRIES",
        default_value_t = 2,
        help = "Retries for retryable HTTP statuses in the cloud clients"
    )]
    pub http_max_retries: usize,

    #[arg(
        long,
        env = "RELAY_HTTP_RETRY_BUDGET_MS",
        default_value_t = 0,
        help = "Total backoff budget across retries; 0 means unbounded"
    )]
    pub http_retry_budget_ms: u64,
}

impl Cli {
    /// Immutable back-end configuration. Missing credentials are not an
    /// error here; the selected back-end reports itself unavailable instead.
    pub fn provider_config(&self) -> Result<ProviderConfig> {
        let selection = match self.provider {
            CliProvider::Rules => ProviderSelection::RuleBased,
            CliProvider::Openai => ProviderSelection::DirectCloud {
                backend: CloudBackend::OpenAi,
                api_base: http_url("openai api base", &self.openai_api_base)?,
                api_key: non_empty(self.openai_api_key.as_deref()),
                model: self.openai_model.trim().to_string(),
            },
            CliProvider::Google => ProviderSelection::DirectCloud {
                backend: CloudBackend::Google,
                api_base: http_url("google api base", &self.google_api_base)?,
                api_key: non_empty(self.google_api_key.as_deref()),
                model: self.google_model.trim().to_string(),
            },
            CliProvider::Oauth => ProviderSelection::OAuthProxied {
                credentials: self.oauth_credentials(),
                token_url: http_url("oauth token url", &self.oauth_token_url)?,
                endpoint: http_url("oauth endpoint", &self.oauth_endpoint)?,
                model: self.google_model.trim().to_string(),
            },
            CliProvider::Session => ProviderSelection::AsyncToolSession {
                command: non_empty(self.session_command.as_deref()),
                args: self.session_args.clone(),
                model: non_empty(self.session_model.as_deref()),
            },
        };

        Ok(ProviderConfig {
            selection,
            system_prompt: self.system_prompt.clone(),
            max_tokens: self.max_tokens,
            request_timeout_ms: self.request_timeout_ms,
            session_timeout_ms: self.session_timeout_ms,
            token_timeout_ms: self.token_timeout_ms,
            max_history_turns: self.max_history_turns,
            earthquake_api_base: http_url("earthquake api base", &self.earthquake_api_base)?,
            bridge_workers: self.bridge_workers,
            retry: RetryPolicy {
                max_retries: self.http_max_retries,
                retry_budget_ms: self.http_retry_budget_ms,
                ..RetryPolicy::default()
            },
        })
    }

    fn oauth_credentials(&self) -> Option<OAuthClientCredentials> {
        let client_id = non_empty(self.oauth_client_id.as_deref());
        let client_secret = non_empty(self.oauth_client_secret.as_deref());
        let refresh_token = non_empty(self.oauth_refresh_token.as_deref());
        match (client_id, client_secret, refresh_token) {
            (Some(client_id), Some(client_secret), Some(refresh_token)) => {
                Some(OAuthClientCredentials {
                    client_id,
                    client_secret,
                    refresh_token,
                })
            }
            (None, None, None) => None,
            (client_id, client_secret, refresh_token) => {
                tracing::warn!(
                    client_id = client_id.is_some(),
                    client_secret = client_secret.is_some(),
                    refresh_token = refresh_token.is_some(),
                    "incomplete oauth credentials ignored"
                );
                None
            }
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn http_url(label: &str, value: &str) -> Result<String> {
    let trimmed = value.trim().trim_end_matches('/');
    ensure!(
        trimmed.starts_with("http://") || trimmed.starts_with("https://"),
        "{label} must be an http(s) URL, got '{value}'"
    );
    Ok(trimmed.to_string())
}
