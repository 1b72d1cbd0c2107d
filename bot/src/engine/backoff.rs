use std::time::Duration;

/// Retry budget for rate-limited probes.
///
/// Retry number `n` (1-based) waits `base_delay * 2^(n-1)` before the next
/// attempt, so the defaults wait 1s, 2s, 4s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// How many times a rate-limited probe is retried before giving up.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound on a single probe attempt.
    pub probe_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based). `retry == 0` means no wait.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}
