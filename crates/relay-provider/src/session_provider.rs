use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use relay_core::lock_or_recover;
use relay_session::{ProviderKind, SessionHandle, Turn};
use tokio::sync::mpsc;

use crate::session_transport::{SessionEvent, SessionEventKind, SessionTransport};
use crate::{AsyncBridge, ChatProvider, ProviderError, ProviderReply};

pub const DEFAULT_SESSION_DEADLINE_MS: u64 = 60_000;

/// Lifecycle of one remote session as seen from this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteLifecycle {
    Created,
    Active,
    Idle,
    Destroyed,
}

struct RemoteSlot {
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<SessionEvent>>,
    lifecycle: Mutex<RemoteLifecycle>,
}

impl RemoteSlot {
    fn set(&self, next: RemoteLifecycle) {
        let mut lifecycle = lock_or_recover(&self.lifecycle);
        if *lifecycle != RemoteLifecycle::Destroyed {
            *lifecycle = next;
        }
    }

    fn get(&self) -> RemoteLifecycle {
        *lock_or_recover(&self.lifecycle)
    }
}

/// Back-end hosted in a long-lived external session that answers through
/// pushed events. Context lives on the remote side, so local history is not
/// resent. Every blocking call is bounded by the session deadline.
pub struct AsyncToolSessionProvider {
    transport: Arc<dyn SessionTransport>,
    bridge: Arc<AsyncBridge>,
    model: Option<String>,
    deadline: Duration,
    sessions: Mutex<HashMap<String, Arc<RemoteSlot>>>,
    next_turn_id: AtomicU64,
}

impl AsyncToolSessionProvider {
    pub fn new(
        transport: Arc<dyn SessionTransport>,
        bridge: Arc<AsyncBridge>,
        model: Option<String>,
        deadline_ms: u64,
    ) -> Self {
        Self {
            transport,
            bridge,
            model,
            deadline: Duration::from_millis(deadline_ms.max(1)),
            sessions: Mutex::new(HashMap::new()),
            next_turn_id: AtomicU64::new(1),
        }
    }

    pub fn lifecycle(&self, session: &SessionHandle) -> Option<RemoteLifecycle> {
        let remote_id = session.remote_id.as_deref()?;
        lock_or_recover(&self.sessions)
            .get(remote_id)
            .map(|slot| slot.get())
    }

    fn slot(&self, session: &SessionHandle) -> Result<(String, Arc<RemoteSlot>), ProviderError> {
        let remote_id = session.remote_id.clone().ok_or_else(|| {
            ProviderError::SessionState("session handle has no remote session".to_string())
        })?;
        let slot = lock_or_recover(&self.sessions)
            .get(&remote_id)
            .cloned()
            .ok_or_else(|| {
                ProviderError::SessionState(format!("remote session '{remote_id}' does not exist"))
            })?;
        if slot.get() == RemoteLifecycle::Destroyed {
            return Err(ProviderError::SessionState(format!(
                "remote session '{remote_id}' was destroyed"
            )));
        }
        Ok((remote_id, slot))
    }

    fn destroy_remote(&self, remote_id: &str) -> Result<(), ProviderError> {
        if let Some(slot) = lock_or_recover(&self.sessions).remove(remote_id) {
            slot.set(RemoteLifecycle::Destroyed);
        }
        let transport = Arc::clone(&self.transport);
        let remote_id_owned = remote_id.to_string();
        self.bridge.run(
            async move { transport.destroy_session(&remote_id_owned).await },
            self.deadline,
        )??;
        tracing::info!(remote_id, "remote session destroyed");
        Ok(())
    }
}

/// Sends one prompt and gathers its answer: chunks are joined in arrival order
/// until the matching idle event.
async fn run_turn(
    transport: Arc<dyn SessionTransport>,
    slot: Arc<RemoteSlot>,
    remote_id: String,
    turn_id: u64,
    prompt: String,
) -> Result<String, ProviderError> {
    let mut events = slot.events.lock().await;
    // Leftovers of an earlier turn that timed out.
    while events.try_recv().is_ok() {}

    transport.send_prompt(&remote_id, turn_id, &prompt).await?;

    let mut answer = String::new();
    loop {
        let Some(event) = events.recv().await else {
            return Err(ProviderError::SessionState(format!(
                "event stream for remote session '{remote_id}' closed"
            )));
        };
        if event.turn_id.is_some_and(|id| id != turn_id) {
            continue;
        }
        match event.kind {
            SessionEventKind::MessageChunk(chunk) => answer.push_str(&chunk),
            SessionEventKind::Idle => break,
            SessionEventKind::Error(message) => return Err(ProviderError::UpstreamApi(message)),
        }
    }
    let answer = answer.trim();
    if answer.is_empty() {
        return Err(ProviderError::UpstreamApi(
            "session finished without an answer".to_string(),
        ));
    }
    Ok(answer.to_string())
}

impl ChatProvider for AsyncToolSessionProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AsyncToolSession
    }

    fn start_session(&self, chat_id: &str, _history: &[Turn]) -> Result<SessionHandle, ProviderError> {
        let transport = Arc::clone(&self.transport);
        let model = self.model.clone();
        let remote = self
            .bridge
            .run(async move { transport.create_session(model).await }, self.deadline)??;
        tracing::info!(chat_id, remote_id = %remote.id, "remote session started");
        let handle = SessionHandle::remote(ProviderKind::AsyncToolSession, remote.id.clone());
        lock_or_recover(&self.sessions).insert(
            remote.id,
            Arc::new(RemoteSlot {
                events: tokio::sync::Mutex::new(remote.events),
                lifecycle: Mutex::new(RemoteLifecycle::Created),
            }),
        );
        Ok(handle)
    }

    fn send(
        &self,
        session: &SessionHandle,
        _history: &[Turn],
        text: &str,
    ) -> Result<ProviderReply, ProviderError> {
        let (remote_id, slot) = self.slot(session)?;
        let turn_id = self.next_turn_id.fetch_add(1, Ordering::Relaxed);
        slot.set(RemoteLifecycle::Active);
        tracing::debug!(remote_id = %remote_id, turn_id, "sending prompt to remote session");

        let outcome = self.bridge.run(
            run_turn(
                Arc::clone(&self.transport),
                Arc::clone(&slot),
                remote_id.clone(),
                turn_id,
                text.to_string(),
            ),
            self.deadline,
        );
        // Errors and timeouts leave the session usable for the next prompt.
        slot.set(RemoteLifecycle::Idle);
        match outcome {
            Ok(Ok(answer)) => Ok(ProviderReply::Text(answer)),
            Ok(Err(error)) => {
                if matches!(error, ProviderError::SessionState(_)) {
                    lock_or_recover(&self.sessions).remove(&remote_id);
                }
                tracing::warn!(remote_id = %remote_id, turn_id, %error, "remote turn failed");
                Err(error)
            }
            Err(error) => {
                tracing::warn!(remote_id = %remote_id, turn_id, %error, "remote turn did not finish");
                Err(error.into())
            }
        }
    }

    fn end_session(&self, session: &SessionHandle) -> Result<(), ProviderError> {
        match session.remote_id.as_deref() {
            Some(remote_id) => self.destroy_remote(remote_id),
            None => Ok(()),
        }
    }

    fn describe_capabilities(&self) -> String {
        let open = lock_or_recover(&self.sessions).len();
        format!(
            "Back-end: async tool session\nStatus: ready\nModel: {}\nOpen sessions: {open}\nTools: provided by the session host\nImages: not supported",
            self.model.as_deref().unwrap_or("host default")
        )
    }

    fn shutdown(&self) {
        let remote_ids: Vec<String> = lock_or_recover(&self.sessions).keys().cloned().collect();
        for remote_id in remote_ids {
            if let Err(error) = self.destroy_remote(&remote_id) {
                tracing::debug!(remote_id = %remote_id, %error, "failed to destroy remote session during shutdown");
            }
        }
        let transport = Arc::clone(&self.transport);
        if let Err(error) = self
            .bridge
            .run(async move { transport.shutdown().await }, self.deadline)
        {
            tracing::warn!(%error, "session transport did not shut down cleanly");
        }
        self.bridge.shutdown();
    }
}
