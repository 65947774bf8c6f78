use relay_ai::RelayAiError;
use thiserror::Error;

use crate::BridgeError;

const MAX_DETAIL_CHARS: usize = 200;

/// Failure class reported alongside every error answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    ProviderUnavailable,
    Authentication,
    UpstreamApi,
    Timeout,
    ToolExecution,
    SessionState,
    Internal,
}

impl ErrorClass {
    /// Stable prefix placed at the start of error answers.
    pub fn marker(self) -> &'static str {
        match self {
            Self::ProviderUnavailable => "[provider_unavailable]",
            Self::Authentication => "[auth_error]",
            Self::UpstreamApi => "[upstream_error]",
            Self::Timeout => "[timeout]",
            Self::ToolExecution => "[tool_error]",
            Self::SessionState => "[session_error]",
            Self::Internal => "[internal_error]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("upstream API error: {0}")]
    UpstreamApi(String),
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("tool execution failed: {0}")]
    ToolExecution(String),
    #[error("session state error: {0}")]
    SessionState(String),
    #[error("unexpected provider failure: {0}")]
    Unexpected(String),
}

impl ProviderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unavailable(_) => ErrorClass::ProviderUnavailable,
            Self::Authentication(_) => ErrorClass::Authentication,
            Self::UpstreamApi(_) => ErrorClass::UpstreamApi,
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::ToolExecution(_) => ErrorClass::ToolExecution,
            Self::SessionState(_) => ErrorClass::SessionState,
            Self::Unexpected(_) => ErrorClass::Internal,
        }
    }

    /// True for the failures the orchestrator answers with the rule engine
    /// instead of an error string.
    pub fn triggers_fallback(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Unexpected(_))
    }

    /// User-displayable answer text, prefixed with the class marker.
    pub fn render(&self) -> String {
        let marker = self.class().marker();
        match self {
            Self::Unavailable(_) => {
                format!("{marker} The assistant is not available right now. Please try again later.")
            }
            Self::Authentication(_) => {
                format!("{marker} Could not authenticate with the AI service. Please check the credentials.")
            }
            Self::UpstreamApi(detail) => format!(
                "{marker} The AI service returned an error: {}",
                truncate_detail(detail)
            ),
            Self::Timeout { .. } => {
                format!("{marker} The request timed out. Please try again.")
            }
            Self::ToolExecution(detail) => {
                format!("{marker} A tool failed while answering: {}", truncate_detail(detail))
            }
            Self::SessionState(_) => {
                format!("{marker} This conversation is no longer active. Send /new to start over.")
            }
            Self::Unexpected(_) => {
                format!("{marker} Something went wrong, please try again.")
            }
        }
    }
}

fn truncate_detail(detail: &str) -> String {
    let trimmed = detail.trim();
    if trimmed.chars().count() <= MAX_DETAIL_CHARS {
        return trimmed.to_string();
    }
    let mut shortened: String = trimmed.chars().take(MAX_DETAIL_CHARS).collect();
    shortened.push('…');
    shortened
}

impl From<BridgeError> for ProviderError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            BridgeError::Setup(message) => Self::Unavailable(message),
            BridgeError::Aborted(message) => Self::Unexpected(message),
        }
    }
}

/// Maps a cloud client failure onto the provider taxonomy.
pub(crate) fn from_ai_error(error: RelayAiError, timeout_ms: u64) -> ProviderError {
    if error.is_auth_failure() {
        return ProviderError::Authentication(error.to_string());
    }
    if error.is_timeout() {
        return ProviderError::Timeout { timeout_ms };
    }
    match error {
        RelayAiError::MissingApiKey => ProviderError::Unavailable(error.to_string()),
        other => ProviderError::UpstreamApi(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use relay_ai::RelayAiError;

    use super::{from_ai_error, ErrorClass, ProviderError};
    use crate::BridgeError;

    #[test]
    fn every_render_starts_with_its_marker() {
        let errors = [
            ProviderError::Unavailable("x".into()),
            ProviderError::Authentication("x".into()),
            ProviderError::UpstreamApi("x".into()),
            ProviderError::Timeout { timeout_ms: 5 },
            ProviderError::ToolExecution("x".into()),
            ProviderError::SessionState("x".into()),
            ProviderError::Unexpected("x".into()),
        ];
        for error in errors {
            assert!(error.render().starts_with(error.class().marker()));
        }
    }

    #[test]
    fn only_unavailable_and_unexpected_fall_back() {
        assert!(ProviderError::Unavailable("no key".into()).triggers_fallback());
        assert!(ProviderError::Unexpected("panic".into()).triggers_fallback());
        assert!(!ProviderError::Timeout { timeout_ms: 1 }.triggers_fallback());
        assert!(!ProviderError::Authentication("bad".into()).triggers_fallback());
    }

    #[test]
    fn upstream_detail_is_truncated() {
        let rendered = ProviderError::UpstreamApi("e".repeat(500)).render();
        assert!(rendered.ends_with('…'));
        assert!(rendered.chars().count() < 300);
    }

    #[test]
    fn maps_ai_and_bridge_errors() {
        let auth = from_ai_error(
            RelayAiError::HttpStatus {
                status: 401,
                body: "denied".into(),
            },
            1_000,
        );
        assert_eq!(auth.class(), ErrorClass::Authentication);
        let missing = from_ai_error(RelayAiError::MissingApiKey, 1_000);
        assert_eq!(missing.class(), ErrorClass::ProviderUnavailable);
        let upstream = from_ai_error(RelayAiError::InvalidResponse("bad".into()), 1_000);
        assert_eq!(upstream.class(), ErrorClass::UpstreamApi);

        assert_eq!(
            ProviderError::from(BridgeError::Timeout { timeout_ms: 60_000 }),
            ProviderError::Timeout { timeout_ms: 60_000 }
        );
        assert!(ProviderError::from(BridgeError::Setup("no threads".into())).triggers_fallback());
    }
}
