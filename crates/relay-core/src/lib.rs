//! Foundational low-level utilities shared across relay crates.
//!
//! Provides clock helpers used for token expiry and session timestamps, and a
//! poison-tolerant mutex lock used by every piece of process-wide state.

pub mod sync_utils;
pub mod time_utils;

pub use sync_utils::lock_or_recover;
pub use time_utils::{current_unix_timestamp_ms, is_expired_with_margin_ms};

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn clock_is_after_epoch_and_monotonic_enough() {
        let first = current_unix_timestamp_ms();
        let second = current_unix_timestamp_ms();
        assert!(first > 1_600_000_000_000);
        assert!(second >= first);
    }

    #[test]
    fn expiry_margin_treats_missing_expiry_as_expired() {
        assert!(is_expired_with_margin_ms(None, 10, 0));
    }

    #[test]
    fn expiry_margin_bounds() {
        let expires = 100_000;
        assert!(!is_expired_with_margin_ms(Some(expires), 39_999, 60_000));
        assert!(is_expired_with_margin_ms(Some(expires), 40_000, 60_000));
        assert!(is_expired_with_margin_ms(Some(expires), 100_001, 60_000));
        assert!(is_expired_with_margin_ms(Some(10), 0, 60_000));
    }

    #[test]
    fn lock_or_recover_returns_guard_after_poisoning() {
        let shared = Arc::new(Mutex::new(7_u32));
        let poisoner = Arc::clone(&shared);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().expect("lock");
            panic!("poison the mutex");
        })
        .join();
        assert!(shared.is_poisoned());
        let mut guard = lock_or_recover(&shared);
        *guard += 1;
        assert_eq!(*guard, 8);
    }
}
