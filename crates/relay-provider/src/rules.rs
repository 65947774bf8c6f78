use relay_rules::RuleEngine;
use relay_session::{ProviderKind, SessionHandle, Turn};

use crate::{ChatProvider, ProviderError, ProviderReply};

const OFFLINE_IMAGE_REPLY: &str =
    "I'm running in offline mode and can't look at images right now. Tell me what's in it and I'll do my best.";

/// Offline back-end built on the ordered rule chain. Never fails.
#[derive(Default)]
pub struct RuleBasedProvider {
    engine: RuleEngine,
}

impl RuleBasedProvider {
    pub fn new(engine: RuleEngine) -> Self {
        Self { engine }
    }

    /// Answer for `text`, independent of any session.
    pub fn respond(&self, text: &str) -> String {
        self.engine.respond(text)
    }
}

impl ChatProvider for RuleBasedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::RuleBased
    }

    fn start_session(&self, _chat_id: &str, _history: &[Turn]) -> Result<SessionHandle, ProviderError> {
        Ok(SessionHandle::local(ProviderKind::RuleBased))
    }

    fn send(
        &self,
        _session: &SessionHandle,
        _history: &[Turn],
        text: &str,
    ) -> Result<ProviderReply, ProviderError> {
        Ok(ProviderReply::Text(self.respond(text)))
    }

    fn send_with_image(
        &self,
        _session: &SessionHandle,
        _history: &[Turn],
        _text: &str,
        _image: &[u8],
    ) -> Result<ProviderReply, ProviderError> {
        Ok(ProviderReply::Text(OFFLINE_IMAGE_REPLY.to_string()))
    }

    fn describe_capabilities(&self) -> String {
        format!(
            "Back-end: offline rules\nStatus: ready\nMatchers: {}\nTools: none\nImages: not supported",
            self.engine.matcher_names().join(", ")
        )
    }
}
