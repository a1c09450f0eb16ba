//! # Time Utilities
//!
//! Epoch-millisecond helpers for liveness bookkeeping (cpuWhen,
//! offlineSince, ping timestamps). Wall-clock time is only ever compared
//! against itself on the same host, so a coarse u64 is enough.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
/// Clocks before 1970 collapse to 0 rather than panicking.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Milliseconds elapsed since `earlier`, saturating at zero.
pub fn millis_since(earlier: u64) -> u64 {
    now_millis().saturating_sub(earlier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_after_2024() {
        assert!(now_millis() > 1_700_000_000_000);
    }

    #[test]
    fn millis_since_saturates() {
        assert_eq!(millis_since(u64::MAX), 0);
        assert!(millis_since(0) > 0);
    }
}
