/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns true when `expires_unix_ms` is missing, or when `now_unix_ms` has
/// reached it once `margin_ms` is subtracted.
pub fn is_expired_with_margin_ms(
    expires_unix_ms: Option<u64>,
    now_unix_ms: u64,
    margin_ms: u64,
) -> bool {
    match expires_unix_ms {
        Some(expires) => now_unix_ms >= expires.saturating_sub(margin_ms),
        None => true,
    }
}
