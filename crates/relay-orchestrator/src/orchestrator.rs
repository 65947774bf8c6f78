use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use relay_core::current_unix_timestamp_ms;
use relay_provider::{
    build_provider, ChatProvider, ErrorClass, ProviderConfig, ProviderError, ProviderReply,
    RuleBasedProvider, DEFAULT_IMAGE_PROMPT,
};
use relay_session::{ChatSession, ProviderKind, SessionHandle, SessionRegistry, SlotState, Turn};
use relay_tools::{default_dispatcher, ToolDispatcher};

type ClockFn = Arc<dyn Fn() -> u64 + Send + Sync>;

pub const NEW_CONVERSATION_REPLY: &str =
    "Started a new conversation. Previous messages are forgotten.";
const NEW_CONVERSATION_COMMAND: &str = "/new";

/// What `handle` produced and which back-end produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleOutcome {
    pub text: String,
    pub answered_by: ProviderKind,
    /// Class of the primary back-end's failure, also set when the fallback
    /// answered in its place.
    pub failure: Option<ErrorClass>,
}

/// Routes chat messages to the configured back-end.
///
/// Calls for one chat id run one at a time; different chat ids proceed in
/// parallel. Every call returns a displayable string: unavailable or
/// panicking back-ends are answered by the rule engine, other failures are
/// rendered with their class marker.
pub struct Orchestrator {
    provider: Box<dyn ChatProvider>,
    fallback: RuleBasedProvider,
    tools: ToolDispatcher,
    registry: SessionRegistry,
    max_history_turns: usize,
    clock: ClockFn,
}

impl Orchestrator {
    pub fn new(config: &ProviderConfig) -> Self {
        let tools = default_dispatcher(config.kind().as_str(), &config.earthquake_api_base);
        let provider = build_provider(config, &tools);
        tracing::info!(provider = %provider.kind(), tools = tools.tool_names().len(), "orchestrator ready");
        Self::with_provider(provider, tools, config.max_history_turns)
    }

    pub fn with_provider(
        provider: Box<dyn ChatProvider>,
        tools: ToolDispatcher,
        max_history_turns: usize,
    ) -> Self {
        Self {
            provider,
            fallback: RuleBasedProvider::default(),
            tools,
            registry: SessionRegistry::new(),
            max_history_turns,
            clock: Arc::new(current_unix_timestamp_ms),
        }
    }

    /// Replaces the wall clock used for session and turn timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> u64 + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    pub fn handle(&self, chat_id: &str, text: &str, image: Option<&[u8]>) -> String {
        self.handle_detailed(chat_id, text, image).text
    }

    pub fn handle_detailed(&self, chat_id: &str, text: &str, image: Option<&[u8]>) -> HandleOutcome {
        if is_new_conversation_command(text) {
            self.clear_session(chat_id);
            return HandleOutcome {
                text: NEW_CONVERSATION_REPLY.to_string(),
                answered_by: self.provider.kind(),
                failure: None,
            };
        }
        let prompt = match image {
            Some(_) if text.trim().is_empty() => DEFAULT_IMAGE_PROMPT,
            _ => text.trim(),
        };
        tracing::debug!(chat_id, provider = %self.provider.kind(), has_image = image.is_some(), "handling message");
        self.registry
            .with_session(chat_id, |slot| self.converse(chat_id, slot, prompt, image))
    }

    fn converse(
        &self,
        chat_id: &str,
        slot: &mut SlotState,
        prompt: &str,
        image: Option<&[u8]>,
    ) -> HandleOutcome {
        let now_ms = (self.clock)();
        let primary = self.provider.kind();
        if let Err(error) = self.attach_session(chat_id, slot, now_ms) {
            return self.fail(chat_id, slot, prompt, image, error);
        }
        let (handle, history) = match slot.session.as_mut() {
            Some(session) => {
                session.mark_active(now_ms);
                (session.handle.clone(), session.history().to_vec())
            }
            None => {
                let error = ProviderError::SessionState("session was not created".to_string());
                return self.fail(chat_id, slot, prompt, image, error);
            }
        };

        match self.ask_primary(&handle, &history, prompt, image) {
            Ok(answer) => {
                if let Some(session) = slot.session.as_mut() {
                    session.record_exchange(prompt, answer.clone(), (self.clock)(), self.max_history_turns);
                    session.mark_idle((self.clock)());
                }
                HandleOutcome {
                    text: answer,
                    answered_by: primary,
                    failure: None,
                }
            }
            Err(error) => self.fail(chat_id, slot, prompt, image, error),
        }
    }

    /// The chat's session, created on first use. A session left bound to the
    /// fallback because the primary could not start is upgraded once the
    /// primary becomes available; its history is kept either way.
    fn attach_session(
        &self,
        chat_id: &str,
        slot: &mut SlotState,
        now_ms: u64,
    ) -> Result<(), ProviderError> {
        let primary = self.provider.kind();
        let needs_start = slot
            .session
            .as_ref()
            .map_or(true, |session| session.handle.provider_kind != primary);
        if needs_start {
            let history = slot
                .session
                .as_ref()
                .map(|session| session.history().to_vec())
                .unwrap_or_default();
            match guarded(|| self.provider.start_session(chat_id, &history)) {
                Ok(handle) => match slot.session.as_mut() {
                    Some(session) => {
                        session.provider_kind = handle.provider_kind;
                        session.handle = handle;
                    }
                    None => {
                        tracing::info!(chat_id, provider = %primary, "session created");
                        slot.session = Some(ChatSession::new(chat_id, handle, now_ms));
                    }
                },
                Err(error) => {
                    if error.triggers_fallback() && slot.session.is_none() {
                        tracing::info!(chat_id, provider = %ProviderKind::RuleBased, "session created on fallback");
                        slot.session = Some(ChatSession::new(
                            chat_id,
                            SessionHandle::local(ProviderKind::RuleBased),
                            now_ms,
                        ));
                    }
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// One send plus at most one tool round.
    fn ask_primary(
        &self,
        handle: &SessionHandle,
        history: &[Turn],
        prompt: &str,
        image: Option<&[u8]>,
    ) -> Result<String, ProviderError> {
        let reply = guarded(|| match image {
            Some(bytes) => self.provider.send_with_image(handle, history, prompt, bytes),
            None => self.provider.send(handle, history, prompt),
        })?;
        let round = match reply {
            ProviderReply::Text(text) => return Ok(text),
            ProviderReply::ToolRequested(round) => round,
        };

        tracing::debug!(tool = %round.call.name, "back-end requested a tool");
        let result = self.tools.execute(&round.call.name, &round.call.arguments);
        if !result.success {
            tracing::warn!(tool = %round.call.name, error = %result.content, "tool call failed");
        }
        match guarded(|| self.provider.finish_tool_round(handle, round, &result))? {
            ProviderReply::Text(text) => Ok(text),
            ProviderReply::ToolRequested(next) => Err(ProviderError::ToolExecution(format!(
                "back-end requested another tool ('{}') after a completed tool round",
                next.call.name
            ))),
        }
    }

    fn fail(
        &self,
        chat_id: &str,
        slot: &mut SlotState,
        prompt: &str,
        image: Option<&[u8]>,
        error: ProviderError,
    ) -> HandleOutcome {
        let class = error.class();
        if error.triggers_fallback() {
            tracing::warn!(chat_id, provider = %self.provider.kind(), %error, "falling back to rule engine");
            let fallback = guarded(|| {
                let handle = SessionHandle::local(ProviderKind::RuleBased);
                match image {
                    Some(bytes) => self.fallback.send_with_image(&handle, &[], prompt, bytes),
                    None => self.fallback.send(&handle, &[], prompt),
                }
            });
            if let Ok(ProviderReply::Text(answer)) = fallback {
                if let Some(session) = slot.session.as_mut() {
                    let now_ms = (self.clock)();
                    session.record_exchange(prompt, answer.clone(), now_ms, self.max_history_turns);
                    session.mark_idle(now_ms);
                }
                return HandleOutcome {
                    text: answer,
                    answered_by: ProviderKind::RuleBased,
                    failure: Some(class),
                };
            }
        }

        tracing::warn!(chat_id, provider = %self.provider.kind(), marker = class.marker(), %error, "answering with error");
        if class == ErrorClass::SessionState {
            // The remote side is gone; the next message starts over.
            if let Some(mut session) = slot.session.take() {
                session.mark_destroyed();
            }
        } else if let Some(session) = slot.session.as_mut() {
            session.mark_idle((self.clock)());
        }
        HandleOutcome {
            text: error.render(),
            answered_by: self.provider.kind(),
            failure: Some(class),
        }
    }

    /// Destroys the chat's session. Returns whether one existed.
    pub fn clear_session(&self, chat_id: &str) -> bool {
        let Some(mut session) = self.registry.remove(chat_id) else {
            return false;
        };
        self.end_remote(&session);
        session.mark_destroyed();
        tracing::info!(chat_id, turns = session.history().len(), "session cleared");
        true
    }

    fn end_remote(&self, session: &ChatSession) {
        if session.handle.provider_kind != self.provider.kind() {
            return;
        }
        if let Err(error) = guarded(|| self.provider.end_session(&session.handle)) {
            tracing::warn!(chat_id = %session.id, %error, "failed to end back-end session");
        }
    }

    /// Copy of the chat's turns, oldest first.
    pub fn history(&self, chat_id: &str) -> Vec<Turn> {
        self.registry
            .snapshot(chat_id)
            .map(|session| session.history().to_vec())
            .unwrap_or_default()
    }

    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }

    pub fn describe_capabilities(&self) -> String {
        let description = guarded(|| Ok(self.provider.describe_capabilities()))
            .unwrap_or_else(|error| error.render());
        format!("{description}\nActive sessions: {}", self.active_sessions())
    }

    /// Ends every session, remote ones included, and stops the back-end.
    pub fn shutdown(&self) {
        let sessions = self.registry.drain();
        let count = sessions.len();
        for mut session in sessions {
            self.end_remote(&session);
            session.mark_destroyed();
        }
        if catch_unwind(AssertUnwindSafe(|| self.provider.shutdown())).is_err() {
            tracing::warn!("back-end panicked during shutdown");
        }
        tracing::info!(sessions = count, "orchestrator shut down");
    }
}

fn is_new_conversation_command(text: &str) -> bool {
    let Some(command) = text.split_whitespace().next() else {
        return false;
    };
    let command = command.split('@').next().unwrap_or(command);
    command.eq_ignore_ascii_case(NEW_CONVERSATION_COMMAND)
}

/// Runs a back-end call, turning a panic into an unexpected-failure error.
fn guarded<T>(operation: impl FnOnce() -> Result<T, ProviderError>) -> Result<T, ProviderError> {
    match catch_unwind(AssertUnwindSafe(operation)) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|message| (*message).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "back-end panicked".to_string());
            tracing::warn!(%message, "back-end call panicked");
            Err(ProviderError::Unexpected(message))
        }
    }
}
