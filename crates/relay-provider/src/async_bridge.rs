//! Runs async operations to completion for synchronous callers.
//!
//! One long-lived multi-thread runtime (the worker) owns every async session
//! and is built lazily on first use. Callers block on a cross-thread channel
//! with a bounded wait. A caller that is already inside a tokio runtime gets
//! an isolated current-thread runtime on a helper thread instead, so a runtime
//! never waits on itself.

use std::future::Future;
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use relay_core::lock_or_recover;
use thiserror::Error;
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};

/// Extra wait beyond the operation deadline before the caller gives up on the
/// worker delivering the timeout itself.
const COMPLETION_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("operation did not complete within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("failed to start async worker: {0}")]
    Setup(String),
    #[error("async operation aborted: {0}")]
    Aborted(String),
}

pub struct AsyncBridge {
    worker_threads: usize,
    runtime: Mutex<Option<Arc<Runtime>>>,
}

impl std::fmt::Debug for AsyncBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncBridge")
            .field("worker_threads", &self.worker_threads)
            .field("started", &lock_or_recover(&self.runtime).is_some())
            .finish()
    }
}

impl Default for AsyncBridge {
    fn default() -> Self {
        Self::new(2)
    }
}

impl AsyncBridge {
    pub fn new(worker_threads: usize) -> Self {
        Self {
            worker_threads: worker_threads.max(1),
            runtime: Mutex::new(None),
        }
    }

    fn runtime(&self) -> Result<Arc<Runtime>, BridgeError> {
        let mut slot = lock_or_recover(&self.runtime);
        if let Some(runtime) = slot.as_ref() {
            return Ok(Arc::clone(runtime));
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.worker_threads)
            .thread_name("relay-bridge-worker")
            .enable_all()
            .build()
            .map_err(|error| BridgeError::Setup(error.to_string()))?;
        tracing::debug!(worker_threads = self.worker_threads, "async bridge worker started");
        let runtime = Arc::new(runtime);
        *slot = Some(Arc::clone(&runtime));
        Ok(runtime)
    }

    /// Handle to the shared worker, starting it if needed. Long-lived tasks
    /// such as transport readers are spawned here.
    pub fn worker_handle(&self) -> Result<Handle, BridgeError> {
        Ok(self.runtime()?.handle().clone())
    }

    /// Runs `operation` and waits at most `timeout` for its output. On timeout
    /// the operation is dropped; anything it started remotely is left alone.
    pub fn run<F, T>(&self, operation: F, timeout: Duration) -> Result<T, BridgeError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if let Ok(current) = Handle::try_current() {
            return run_isolated(operation, timeout, current.runtime_flavor());
        }

        let runtime = self.runtime()?;
        let (sender, receiver) = sync_channel(1);
        runtime.spawn(async move {
            let outcome = tokio::time::timeout(timeout, operation).await;
            let _ = sender.send(outcome);
        });
        await_completion(&receiver, timeout)
    }

    /// Stops the worker without waiting for in-flight tasks. A later `run`
    /// starts a fresh worker.
    pub fn shutdown(&self) {
        let runtime = lock_or_recover(&self.runtime).take();
        if let Some(runtime) = runtime.and_then(|runtime| Arc::try_unwrap(runtime).ok()) {
            runtime.shutdown_background();
            tracing::debug!("async bridge worker stopped");
        }
    }
}

impl Drop for AsyncBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timeout_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

fn await_completion<T>(
    receiver: &std::sync::mpsc::Receiver<Result<T, tokio::time::error::Elapsed>>,
    timeout: Duration,
) -> Result<T, BridgeError> {
    match receiver.recv_timeout(timeout.saturating_add(COMPLETION_GRACE)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) | Err(RecvTimeoutError::Timeout) => Err(BridgeError::Timeout {
            timeout_ms: timeout_ms(timeout),
        }),
        Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Aborted(
            "worker dropped the operation before completing it".to_string(),
        )),
    }
}

fn run_isolated<F, T>(operation: F, timeout: Duration, flavor: RuntimeFlavor) -> Result<T, BridgeError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| BridgeError::Setup(error.to_string()))?;
    let (sender, receiver) = sync_channel(1);
    std::thread::Builder::new()
        .name("relay-bridge-nested".to_string())
        .spawn(move || {
            // The timer must be created inside the runtime it runs on.
            let outcome = runtime.block_on(async move { tokio::time::timeout(timeout, operation).await });
            let _ = sender.send(outcome);
            runtime.shutdown_background();
        })
        .map_err(|error| BridgeError::Setup(error.to_string()))?;

    if flavor == RuntimeFlavor::MultiThread {
        tokio::task::block_in_place(|| await_completion(&receiver, timeout))
    } else {
        await_completion(&receiver, timeout)
    }
}
