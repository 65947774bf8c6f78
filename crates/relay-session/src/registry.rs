use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use relay_core::lock_or_recover;

use crate::ChatSession;

/// Mutable per-chat state guarded by that chat's own lock.
#[derive(Debug, Default)]
pub struct SlotState {
    pub session: Option<ChatSession>,
    retired: bool,
}

#[derive(Debug, Default)]
struct SessionSlot {
    state: Mutex<SlotState>,
    live: AtomicBool,
}

/// Process-wide map from chat identity to session.
///
/// The map lock is held only to find or insert a slot; each chat then
/// serializes on its own slot lock, so unrelated chats never wait on each
/// other while a send is in flight.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: Mutex<HashMap<String, Arc<SessionSlot>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, chat_id: &str) -> Arc<SessionSlot> {
        let mut slots = lock_or_recover(&self.slots);
        if let Some(slot) = slots.get(chat_id) {
            return Arc::clone(slot);
        }
        tracing::debug!(chat_id, slots = slots.len() + 1, "session slot opened");
        Arc::clone(slots.entry(chat_id.to_string()).or_default())
    }

    /// Runs `operation` while holding the lock for `chat_id`, creating the
    /// slot on first use. Calls for the same chat run one at a time. A slot
    /// left without a session is dropped from the map afterwards.
    pub fn with_session<R>(&self, chat_id: &str, operation: impl FnOnce(&mut SlotState) -> R) -> R {
        loop {
            let slot = self.slot(chat_id);
            let mut state = lock_or_recover(&slot.state);
            // Cleared while this caller waited; the map already holds a fresh slot.
            if state.retired {
                continue;
            }
            let output = operation(&mut state);
            let live = state.session.is_some();
            slot.live.store(live, Ordering::Release);
            if !live {
                // Waiters on this slot see `retired` and move to a fresh one.
                state.retired = true;
                let mut slots = lock_or_recover(&self.slots);
                if slots.get(chat_id).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                    slots.remove(chat_id);
                    tracing::debug!(chat_id, slots = slots.len(), "empty session slot evicted");
                }
            }
            return output;
        }
    }

    /// Clone of the current session for `chat_id`, if one exists. Waits for an
    /// in-flight send on that chat to finish.
    pub fn snapshot(&self, chat_id: &str) -> Option<ChatSession> {
        let slot = lock_or_recover(&self.slots).get(chat_id).cloned()?;
        let state = lock_or_recover(&slot.state);
        state.session.clone()
    }

    /// Detaches and returns the session for `chat_id`. Later calls for the
    /// same chat start from an empty slot.
    pub fn remove(&self, chat_id: &str) -> Option<ChatSession> {
        let slot = lock_or_recover(&self.slots).remove(chat_id)?;
        let session = retire(&slot);
        tracing::info!(chat_id, had_session = session.is_some(), "session slot removed");
        session
    }

    /// Detaches every session, e.g. on shutdown.
    pub fn drain(&self) -> Vec<ChatSession> {
        let slots: Vec<_> = lock_or_recover(&self.slots).drain().map(|(_, slot)| slot).collect();
        let sessions: Vec<_> = slots.iter().filter_map(|slot| retire(slot)).collect();
        tracing::info!(slots = slots.len(), sessions = sessions.len(), "session registry drained");
        sessions
    }

    /// Number of chats that currently hold a session.
    pub fn len(&self) -> usize {
        lock_or_recover(&self.slots)
            .values()
            .filter(|slot| slot.live.load(Ordering::Acquire))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn retire(slot: &SessionSlot) -> Option<ChatSession> {
    let mut state = lock_or_recover(&slot.state);
    state.retired = true;
    slot.live.store(false, Ordering::Release);
    state.session.take()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::{Duration, Instant};

    use super::SessionRegistry;
    use crate::{ChatSession, ProviderKind, SessionHandle};

    fn open(registry: &SessionRegistry, chat_id: &str) {
        registry.with_session(chat_id, |state| {
            state.session.get_or_insert_with(|| {
                ChatSession::new(chat_id, SessionHandle::local(ProviderKind::RuleBased), 0)
            });
        });
    }

    #[test]
    fn creates_gets_and_removes_sessions() {
        let registry = SessionRegistry::new();
        assert!(registry.snapshot("a").is_none());
        open(&registry, "a");
        open(&registry, "b");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.snapshot("a").map(|session| session.id), Some("a".to_string()));

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.drain().len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn same_chat_calls_are_serialized() {
        let registry = Arc::new(SessionRegistry::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let inside = Arc::clone(&inside);
                let overlap = Arc::clone(&overlap);
                thread::spawn(move || {
                    registry.with_session("shared", |_| {
                        if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlap.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_millis(20));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker");
        }
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn different_chats_do_not_block_each_other() {
        let registry = Arc::new(SessionRegistry::new());
        let barrier = Arc::new(Barrier::new(2));
        let started = Instant::now();
        let handles: Vec<_> = ["left", "right"]
            .into_iter()
            .map(|chat_id| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    registry.with_session(chat_id, |_| {
                        // Both closures must be inside their locks at once to pass.
                        barrier.wait();
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker");
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn removal_during_in_flight_call_hands_later_calls_a_fresh_slot() {
        let registry = Arc::new(SessionRegistry::new());
        open(&registry, "chat");

        let entered = Arc::new(Barrier::new(2));
        let worker = {
            let registry = Arc::clone(&registry);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                registry.with_session("chat", |state| {
                    entered.wait();
                    thread::sleep(Duration::from_millis(30));
                    state.session.as_ref().map(|session| session.id.clone())
                })
            })
        };
        entered.wait();
        let removed = registry.remove("chat");
        assert!(removed.is_some());
        assert_eq!(worker.join().expect("worker"), Some("chat".to_string()));

        let fresh = registry.with_session("chat", |state| state.session.is_none());
        assert!(fresh);
    }

    #[test]
    fn chats_without_a_session_leave_no_slot_behind() {
        let registry = SessionRegistry::new();
        for n in 0..50 {
            let chat_id = format!("idle-{n}");
            assert!(registry.with_session(&chat_id, |state| state.session.is_none()));
        }
        assert_eq!(super::lock_or_recover(&registry.slots).len(), 0);

        open(&registry, "kept");
        assert_eq!(super::lock_or_recover(&registry.slots).len(), 1);
        registry.with_session("kept", |state| state.session = None);
        assert_eq!(super::lock_or_recover(&registry.slots).len(), 0);
        assert!(registry.snapshot("kept").is_none());

        open(&registry, "again");
        assert!(registry.remove("again").is_some());
        assert_eq!(super::lock_or_recover(&registry.slots).len(), 0);
    }
}
