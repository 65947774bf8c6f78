//! Transport to an externally hosted, event-driven session endpoint.
//!
//! [`StdioSessionTransport`] spawns the host command once and talks to it with
//! JSON lines. Requests go out on stdin:
//!
//! ```text
//! {"op":"create_session","request_id":"1","model":"..."}
//! {"op":"send","session_id":"s1","turn_id":4,"prompt":"..."}
//! {"op":"destroy_session","session_id":"s1"}
//! ```
//!
//! Events come back on stdout and are routed by `session_id`:
//! `session.created` (with the originating `request_id`), `assistant.message`
//! (`content`), `session.idle`, and `error` (`message`).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use relay_core::lock_or_recover;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::{AsyncBridge, ProviderError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    MessageChunk(String),
    Idle,
    Error(String),
}

/// One pushed event. `turn_id` ties it to the prompt that caused it when the
/// host reports one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub turn_id: Option<u64>,
    pub kind: SessionEventKind,
}

pub struct RemoteSession {
    pub id: String,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn create_session(&self, model: Option<String>) -> Result<RemoteSession, ProviderError>;

    /// Queues `prompt`; the answer arrives as events on the session stream.
    async fn send_prompt(&self, session_id: &str, turn_id: u64, prompt: &str) -> Result<(), ProviderError>;

    async fn destroy_session(&self, session_id: &str) -> Result<(), ProviderError>;

    async fn shutdown(&self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioTransportConfig {
    pub command: String,
    pub args: Vec<String>,
}

type PendingCreate = oneshot::Sender<Result<RemoteSession, String>>;

#[derive(Default)]
struct Routes {
    sessions: HashMap<String, mpsc::UnboundedSender<SessionEvent>>,
    pending: HashMap<String, PendingCreate>,
    closed: bool,
}

/// Forgets a pending create once its waiter is gone, e.g. after a timeout.
struct PendingGuard {
    routes: Arc<Mutex<Routes>>,
    request_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if lock_or_recover(&self.routes).pending.remove(&self.request_id).is_some() {
            tracing::debug!(request_id = %self.request_id, "pending session create abandoned");
        }
    }
}

struct HostLink {
    outbound: mpsc::UnboundedSender<String>,
    routes: Arc<Mutex<Routes>>,
    child: Mutex<Option<Child>>,
}

impl HostLink {
    fn is_closed(&self) -> bool {
        lock_or_recover(&self.routes).closed || self.outbound.is_closed()
    }

    fn send_line(&self, line: String) -> Result<(), ProviderError> {
        self.outbound
            .send(line)
            .map_err(|_| ProviderError::Unavailable("session host is not running".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct HostEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    turn_id: Option<u64>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct StdioSessionTransport {
    config: StdioTransportConfig,
    bridge: Arc<AsyncBridge>,
    link: Mutex<Option<Arc<HostLink>>>,
    next_request_id: AtomicU64,
}

impl StdioSessionTransport {
    /// The host process and its reader run on `bridge`'s worker so they
    /// outlive any single call.
    pub fn new(config: StdioTransportConfig, bridge: Arc<AsyncBridge>) -> Self {
        Self {
            config,
            bridge,
            link: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Running host, spawning a fresh one if none is up or the last one exited.
    fn host(&self) -> Result<Arc<HostLink>, ProviderError> {
        let mut link = lock_or_recover(&self.link);
        if let Some(existing) = link.as_ref() {
            if !existing.is_closed() {
                return Ok(Arc::clone(existing));
            }
            tracing::warn!(command = %self.config.command, "session host exited, restarting");
        }
        let handle = self.bridge.worker_handle()?;
        let spawned = Arc::new(spawn_host(&self.config, &handle)?);
        *link = Some(Arc::clone(&spawned));
        Ok(spawned)
    }

    fn running_host(&self) -> Option<Arc<HostLink>> {
        lock_or_recover(&self.link)
            .as_ref()
            .filter(|link| !link.is_closed())
            .cloned()
    }
}

fn spawn_host(config: &StdioTransportConfig, handle: &Handle) -> Result<HostLink, ProviderError> {
    let _runtime = handle.enter();
    let mut command = Command::new(&config.command);
    command
        .args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    let mut child = command.spawn().map_err(|error| {
        ProviderError::Unavailable(format!(
            "failed to spawn session host '{}': {error}",
            config.command
        ))
    })?;
    let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(ProviderError::Unavailable(
            "session host pipes were not available".to_string(),
        ));
    };

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    handle.spawn(async move {
        while let Some(line) = outbound_rx.recv().await {
            let written = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await
            }
            .await;
            if let Err(error) = written {
                tracing::warn!(%error, "failed to write to session host stdin");
                break;
            }
        }
    });

    let routes = Arc::new(Mutex::new(Routes::default()));
    handle.spawn(read_host_events(stdout, Arc::clone(&routes), outbound.clone()));
    tracing::info!(command = %config.command, pid = child.id(), "session host started");
    Ok(HostLink {
        outbound,
        routes,
        child: Mutex::new(Some(child)),
    })
}

async fn read_host_events(
    stdout: ChildStdout,
    routes: Arc<Mutex<Routes>>,
    outbound: mpsc::UnboundedSender<String>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => route_event(&routes, &outbound, &line),
            Ok(None) => break,
            Err(error) => {
                tracing::warn!(%error, "failed to read session host stdout");
                break;
            }
        }
    }

    let mut routes = lock_or_recover(&routes);
    routes.closed = true;
    routes.sessions.clear();
    for (_, pending) in routes.pending.drain() {
        let _ = pending.send(Err("session host exited".to_string()));
    }
    tracing::warn!("session host output closed");
}

fn route_event(routes: &Mutex<Routes>, outbound: &mpsc::UnboundedSender<String>, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let event: HostEvent = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(error) => {
            tracing::debug!(%error, "ignoring unparseable session host line");
            return;
        }
    };
    let mut routes = lock_or_recover(routes);

    if event.kind == "session.created" {
        let (Some(request_id), Some(session_id)) = (event.request_id, event.session_id) else {
            tracing::debug!("session.created without request_id or session_id");
            return;
        };
        let (sender, events) = mpsc::unbounded_channel();
        let Some(pending) = routes.pending.remove(&request_id) else {
            // Nobody is waiting for this session any more.
            tracing::debug!(%request_id, %session_id, "destroying unclaimed session");
            let _ = outbound.send(destroy_line(&session_id));
            return;
        };
        routes.sessions.insert(session_id.clone(), sender);
        let remote = RemoteSession {
            id: session_id.clone(),
            events,
        };
        if pending.send(Ok(remote)).is_err() {
            // Creator gave up waiting; nobody will ever use this session.
            routes.sessions.remove(&session_id);
            let _ = outbound.send(destroy_line(&session_id));
        }
        return;
    }

    if event.kind == "error" && event.session_id.is_none() {
        let message = event.message.unwrap_or_else(|| "session host error".to_string());
        match event.request_id.and_then(|id| routes.pending.remove(&id)) {
            Some(pending) => {
                let _ = pending.send(Err(message));
            }
            None => tracing::warn!(%message, "session host reported an error"),
        }
        return;
    }

    let Some(session_id) = event.session_id else {
        return;
    };
    let kind = match event.kind.as_str() {
        "assistant.message" => SessionEventKind::MessageChunk(event.content.unwrap_or_default()),
        "session.idle" => SessionEventKind::Idle,
        "error" => SessionEventKind::Error(
            event
                .message
                .unwrap_or_else(|| "session reported an error".to_string()),
        ),
        other => {
            tracing::debug!(event = other, "ignoring session host event");
            return;
        }
    };
    if let Some(sender) = routes.sessions.get(&session_id) {
        let _ = sender.send(SessionEvent {
            turn_id: event.turn_id,
            kind,
        });
    }
}

fn destroy_line(session_id: &str) -> String {
    json!({ "op": "destroy_session", "session_id": session_id }).to_string()
}

#[async_trait]
impl SessionTransport for StdioSessionTransport {
    async fn create_session(&self, model: Option<String>) -> Result<RemoteSession, ProviderError> {
        let host = self.host()?;
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (sender, receiver) = oneshot::channel();
        lock_or_recover(&host.routes)
            .pending
            .insert(request_id.clone(), sender);
        let _pending = PendingGuard {
            routes: Arc::clone(&host.routes),
            request_id: request_id.clone(),
        };
        host.send_line(
            json!({ "op": "create_session", "request_id": request_id, "model": model }).to_string(),
        )?;
        match receiver.await {
            Ok(Ok(remote)) => {
                tracing::debug!(session_id = %remote.id, "remote session created");
                Ok(remote)
            }
            Ok(Err(message)) => Err(ProviderError::UpstreamApi(message)),
            Err(_) => Err(ProviderError::Unavailable(
                "session host exited before creating a session".to_string(),
            )),
        }
    }

    async fn send_prompt(&self, session_id: &str, turn_id: u64, prompt: &str) -> Result<(), ProviderError> {
        let host = self.running_host().ok_or_else(|| {
            ProviderError::SessionState(format!("remote session '{session_id}' is gone"))
        })?;
        if !lock_or_recover(&host.routes).sessions.contains_key(session_id) {
            return Err(ProviderError::SessionState(format!(
                "remote session '{session_id}' is not known to the host"
            )));
        }
        host.send_line(
            json!({
                "op": "send",
                "session_id": session_id,
                "turn_id": turn_id,
                "prompt": prompt,
            })
            .to_string(),
        )
    }

    async fn destroy_session(&self, session_id: &str) -> Result<(), ProviderError> {
        let Some(host) = self.running_host() else {
            return Ok(());
        };
        lock_or_recover(&host.routes).sessions.remove(session_id);
        host.send_line(destroy_line(session_id))
    }

    async fn shutdown(&self) {
        let Some(host) = lock_or_recover(&self.link).take() else {
            return;
        };
        if let Some(mut child) = lock_or_recover(&host.child).take() {
            if let Err(error) = child.start_kill() {
                tracing::debug!(%error, "session host already stopped");
            }
        }
        tracing::info!(command = %self.config.command, "session host stopped");
    }
}
