//! Time utilities for shellgate

use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

/// Get the current Unix timestamp in milliseconds.
///
/// Returns 0 on a clock set before the Unix epoch.
pub fn current_time_millis() -> u64 {
    since_epoch().as_millis() as u64
}

/// Get the current Unix timestamp in seconds.
pub fn current_time_secs() -> u64 {
    since_epoch().as_secs()
}

/// Calculate elapsed time in milliseconds since a given timestamp.
///
/// Returns 0 if the given time is in the future.
pub fn elapsed_millis(since: u64) -> u64 {
    current_time_millis().saturating_sub(since)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_is_positive() {
        assert!(current_time_millis() > 0);
        assert!(current_time_secs() > 0);
    }

    #[test]
    fn test_elapsed_millis() {
        let now = current_time_millis();
        std::thread::sleep(Duration::from_millis(10));
        assert!(elapsed_millis(now) >= 10);
    }

    #[test]
    fn test_elapsed_millis_future_time() {
        let future = current_time_millis() + 1_000_000;
        assert_eq!(elapsed_millis(future), 0);
    }
}
