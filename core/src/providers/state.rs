//! Shared rate-limit/cooldown bookkeeping, self-synchronized per provider.
//!
//! Each [`RateState`] owns its own lock; there is no cross-provider lock
//! (SPEC_FULL §5).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::ProviderStatus;

const WINDOW: Duration = Duration::from_secs(60);
const COOLDOWN_BASE_SECS: u64 = 30;
const COOLDOWN_MAX_EXPONENT: u32 = 4;

#[derive(Debug, Clone, Default)]
pub struct ProviderStatsSnapshot {
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub rate_limited: u64,
    pub last_error: Option<String>,
}

impl ProviderStatsSnapshot {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful as f64 / self.total_requests as f64 * 100.0
        }
    }
}

#[derive(Debug)]
struct Inner {
    requests_this_window: u32,
    window_start: Instant,
    cooldown_until: Option<Instant>,
    total_requests: u64,
    successful: u64,
    failed: u64,
    rate_limited: u64,
    last_error: Option<String>,
}

/// Per-provider sliding-window RPM gate plus exponential-cooldown bookkeeping.
#[derive(Debug)]
pub struct RateState {
    rpm_cap: u32,
    inner: Mutex<Inner>,
}

impl RateState {
    pub fn new(rpm_cap: u32) -> Self {
        Self {
            rpm_cap,
            inner: Mutex::new(Inner {
                requests_this_window: 0,
                window_start: Instant::now(),
                cooldown_until: None,
                total_requests: 0,
                successful: 0,
                failed: 0,
                rate_limited: 0,
                last_error: None,
            }),
        }
    }

    /// Free-running sliding-window gate: resets the window once 60s have
    /// elapsed, then rejects if already at cap.
    pub fn precheck_rate(&self) -> bool {
        let mut inner = self.inner.lock().expect("rate state poisoned");
        let now = Instant::now();
        if now.duration_since(inner.window_start) > WINDOW {
            inner.requests_this_window = 0;
            inner.window_start = now;
        }
        inner.requests_this_window < self.rpm_cap
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("rate state poisoned");
        inner.total_requests += 1;
        inner.successful += 1;
        inner.requests_this_window += 1;
    }

    /// Record a failure. `is_rate_limit` advances the cooldown on the
    /// `30 * 2^min(k,4)` schedule (60s, 120s, 240s, 480s, capped).
    pub fn record_failure(&self, is_rate_limit: bool, message: impl Into<String>) {
        let mut inner = self.inner.lock().expect("rate state poisoned");
        inner.total_requests += 1;
        inner.failed += 1;
        inner.last_error = Some(message.into());

        if is_rate_limit {
            inner.rate_limited += 1;
            let exponent = inner.rate_limited.min(COOLDOWN_MAX_EXPONENT as u64) as u32;
            let cooldown_secs = COOLDOWN_BASE_SECS * 2u64.pow(exponent);
            inner.cooldown_until = Some(Instant::now() + Duration::from_secs(cooldown_secs));
        }
    }

    pub fn in_cooldown(&self) -> bool {
        let inner = self.inner.lock().expect("rate state poisoned");
        matches!(inner.cooldown_until, Some(until) if Instant::now() < until)
    }

    pub fn status(&self, available: bool) -> ProviderStatus {
        if !available {
            ProviderStatus::Disabled
        } else if self.in_cooldown() {
            ProviderStatus::RateLimited
        } else {
            ProviderStatus::Available
        }
    }

    pub fn snapshot(&self) -> ProviderStatsSnapshot {
        let inner = self.inner.lock().expect("rate state poisoned");
        ProviderStatsSnapshot {
            total_requests: inner.total_requests,
            successful: inner.successful,
            failed: inner.failed,
            rate_limited: inner.rate_limited,
            last_error: inner.last_error.clone(),
        }
    }
}

/// HTTP 429, 456, and the substrings §4.B names as rate-limit indicators.
pub fn is_rate_limit_status(status: Option<u16>) -> bool {
    matches!(status, Some(429) | Some(456))
}

pub fn message_suggests_rate_limit(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("rate") || lowered.contains("too many") || lowered.contains("quota")
}

/// A string result counts as a no-op translation when trim+lowercase equals
/// the (trimmed) input's trim+lowercase: the "identical to input" failure
/// mode shared by every provider's single-translate policy.
pub fn is_noop_translation(input: &str, output: &str) -> bool {
    output.trim().to_lowercase() == input.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_math_matches_spec_schedule() {
        let state = RateState::new(50);
        let expected = [60, 120, 240, 480, 480];
        for expected_secs in expected {
            state.record_failure(true, "rate limited");
            let inner = state.inner.lock().unwrap();
            let remaining = inner
                .cooldown_until
                .unwrap()
                .saturating_duration_since(Instant::now())
                .as_secs();
            assert!(
                remaining <= expected_secs && remaining + 2 >= expected_secs,
                "expected ~{expected_secs}s, got {remaining}s"
            );
            drop(inner);
        }
    }

    #[test]
    fn precheck_rejects_once_cap_reached() {
        let state = RateState::new(2);
        assert!(state.precheck_rate());
        state.record_success();
        assert!(state.precheck_rate());
        state.record_success();
        assert!(!state.precheck_rate());
    }

    #[test]
    fn noop_translation_is_trim_lowercase_equal() {
        assert!(is_noop_translation("Save changes", "save changes "));
        assert!(!is_noop_translation("Save changes", "Salvar alterações"));
    }
}
