use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates the conversational back-end variants.
pub enum ProviderKind {
    DirectCloud,
    OAuthProxied,
    RuleBased,
    AsyncToolSession,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DirectCloud => "direct_cloud",
            Self::OAuthProxied => "oauth_proxied",
            Self::RuleBased => "rule_based",
            Self::AsyncToolSession => "async_tool_session",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Idle,
    Destroyed,
}

/// Opaque reference a provider hands out from `start_session`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub provider_kind: ProviderKind,
    /// Identifier of the remote session, for variants that keep one.
    pub remote_id: Option<String>,
}

impl SessionHandle {
    pub fn local(provider_kind: ProviderKind) -> Self {
        Self {
            provider_kind,
            remote_id: None,
        }
    }

    pub fn remote(provider_kind: ProviderKind, remote_id: impl Into<String>) -> Self {
        Self {
            provider_kind,
            remote_id: Some(remote_id.into()),
        }
    }
}

/// Conversation state for one chat identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSession {
    pub id: String,
    pub provider_kind: ProviderKind,
    pub handle: SessionHandle,
    history: Vec<Turn>,
    pub created_at_ms: u64,
    pub last_active_at_ms: u64,
    pub state: SessionState,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, handle: SessionHandle, now_ms: u64) -> Self {
        Self {
            id: id.into(),
            provider_kind: handle.provider_kind,
            handle,
            history: Vec::new(),
            created_at_ms: now_ms,
            last_active_at_ms: now_ms,
            state: SessionState::Idle,
        }
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn mark_active(&mut self, now_ms: u64) {
        if self.state != SessionState::Destroyed {
            self.state = SessionState::Active;
            self.last_active_at_ms = now_ms;
        }
    }

    pub fn mark_idle(&mut self, now_ms: u64) {
        if self.state != SessionState::Destroyed {
            self.state = SessionState::Idle;
            self.last_active_at_ms = now_ms;
        }
    }

    pub fn mark_destroyed(&mut self) {
        self.state = SessionState::Destroyed;
    }

    /// Appends a user/assistant pair, then keeps only the newest `max_turns`
    /// turns. Trimming drops whole pairs so history never starts with an
    /// assistant turn.
    pub fn record_exchange(
        &mut self,
        user_text: impl Into<String>,
        assistant_text: impl Into<String>,
        now_ms: u64,
        max_turns: usize,
    ) {
        if self.state == SessionState::Destroyed {
            return;
        }
        self.history.push(Turn {
            role: TurnRole::User,
            text: user_text.into(),
            timestamp_ms: now_ms,
        });
        self.history.push(Turn {
            role: TurnRole::Assistant,
            text: assistant_text.into(),
            timestamp_ms: now_ms,
        });
        let cap = max_turns.max(2) & !1;
        if self.history.len() > cap {
            let excess = self.history.len() - cap;
            self.history.drain(..excess);
        }
        self.last_active_at_ms = now_ms;
    }
}
