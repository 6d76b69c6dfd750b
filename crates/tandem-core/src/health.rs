//! Connection health monitor and reconnect backoff policy.
//!
//! The monitor only records what happened to the link; it never decides
//! whether to retry.  The caller's backoff loop checks [`can_reconnect`]
//! before each attempt and asks [`Backoff`] how long to wait.

use std::time::Duration;

use rand::Rng;
use tandem_proto::config::ReconnectConfig;
use tandem_proto::state::{ConnectionHealth, ConnectionState};

/// Latency above this is `Slow`.
pub const SLOW_LATENCY_MS: f64 = 500.0;
/// Latency above this is `Moderate`.
pub const MODERATE_LATENCY_MS: f64 = 200.0;

/// A successful (re)connect forgives earlier failures.
pub fn set_transport_connected(state: &mut ConnectionState, connected: bool, timestamp: i64) {
    state.transport_connected = connected;
    if connected {
        state.last_error = None;
        state.reconnect_attempts = 0;
    }
    state.last_updated = timestamp;
}

pub fn set_service_connected(state: &mut ConnectionState, connected: bool, timestamp: i64) {
    state.service_connected = connected;
    if connected {
        state.last_error = None;
    }
    state.last_updated = timestamp;
}

pub fn set_latency(state: &mut ConnectionState, latency_ms: f64, timestamp: i64) {
    if !latency_ms.is_finite() {
        return;
    }
    state.latency_ms = latency_ms.max(0.0);
    state.last_updated = timestamp;
}

/// Saturates at `max_reconnect_attempts`.
pub fn increment_reconnect_attempts(state: &mut ConnectionState, timestamp: i64) {
    state.reconnect_attempts = state
        .reconnect_attempts
        .saturating_add(1)
        .min(state.max_reconnect_attempts);
    state.last_reconnect_time = timestamp;
    state.last_updated = timestamp;
}

pub fn reset_reconnect_attempts(state: &mut ConnectionState, timestamp: i64) {
    state.reconnect_attempts = 0;
    state.last_updated = timestamp;
}

pub fn record_error(state: &mut ConnectionState, message: String, timestamp: i64) {
    state.last_error = Some(message);
    state.last_updated = timestamp;
}

pub fn classify(state: &ConnectionState) -> ConnectionHealth {
    if !state.transport_connected || !state.service_connected {
        ConnectionHealth::Disconnected
    } else if state.latency_ms > SLOW_LATENCY_MS {
        ConnectionHealth::Slow
    } else if state.latency_ms > MODERATE_LATENCY_MS {
        ConnectionHealth::Moderate
    } else {
        ConnectionHealth::Good
    }
}

/// The caller's gate: another attempt may be scheduled.
pub fn can_reconnect(state: &ConnectionState) -> bool {
    state.reconnect_attempts < state.max_reconnect_attempts
}

// ── Backoff ───────────────────────────────────────────────────────────────────

/// Exponential delay between reconnect attempts: `base * 2^attempt`, capped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    /// Fraction of the delay added at random (0.2 = up to +20%).
    pub jitter: f64,
}

impl Backoff {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            max: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
            jitter: 0.2,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn delay_with_jitter<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.delay(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = delay.mul_f64(rng.gen_range(0.0..self.jitter));
        (delay + extra).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn online(latency_ms: f64) -> ConnectionState {
        let mut state = ConnectionState::new(3);
        set_transport_connected(&mut state, true, 1);
        set_service_connected(&mut state, true, 1);
        set_latency(&mut state, latency_ms, 1);
        state
    }

    #[test]
    fn test_classification_thresholds() {
        assert_eq!(classify(&ConnectionState::default()), ConnectionHealth::Disconnected);
        assert_eq!(classify(&online(50.0)), ConnectionHealth::Good);
        assert_eq!(classify(&online(200.0)), ConnectionHealth::Good);
        assert_eq!(classify(&online(201.0)), ConnectionHealth::Moderate);
        assert_eq!(classify(&online(500.0)), ConnectionHealth::Moderate);
        assert_eq!(classify(&online(501.0)), ConnectionHealth::Slow);

        let mut half = online(10.0);
        set_service_connected(&mut half, false, 2);
        assert_eq!(classify(&half), ConnectionHealth::Disconnected);
    }

    #[test]
    fn test_increment_saturates() {
        let mut state = ConnectionState::new(3);
        for ts in 0..10 {
            increment_reconnect_attempts(&mut state, ts);
            assert!(state.reconnect_attempts <= 3);
        }
        assert_eq!(state.reconnect_attempts, 3);
        assert_eq!(state.last_reconnect_time, 9);
        assert!(!can_reconnect(&state));
    }

    #[test]
    fn test_transport_connect_forgives_failures() {
        let mut state = ConnectionState::new(5);
        increment_reconnect_attempts(&mut state, 10);
        increment_reconnect_attempts(&mut state, 20);
        record_error(&mut state, "connection refused".into(), 20);
        set_transport_connected(&mut state, true, 30);
        assert_eq!(state.reconnect_attempts, 0);
        assert_eq!(state.last_error, None);
        assert_eq!(state.last_updated, 30);
    }

    #[test]
    fn test_service_connect_keeps_attempts() {
        let mut state = ConnectionState::new(5);
        increment_reconnect_attempts(&mut state, 10);
        record_error(&mut state, "backend offline".into(), 10);
        set_service_connected(&mut state, true, 11);
        assert_eq!(state.reconnect_attempts, 1);
        assert_eq!(state.last_error, None);
    }

    #[test]
    fn test_disconnect_keeps_error() {
        let mut state = online(10.0);
        record_error(&mut state, "reset by peer".into(), 5);
        set_transport_connected(&mut state, false, 6);
        assert_eq!(state.last_error.as_deref(), Some("reset by peer"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff {
            base: Duration::from_millis(500),
            max: Duration::from_millis(3_000),
            jitter: 0.0,
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(500));
        assert_eq!(backoff.delay(1), Duration::from_millis(1_000));
        assert_eq!(backoff.delay(2), Duration::from_millis(2_000));
        assert_eq!(backoff.delay(3), Duration::from_millis(3_000));
        assert_eq!(backoff.delay(40), Duration::from_millis(3_000));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let backoff = Backoff::from_config(&ReconnectConfig::default());
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..6 {
            let d = backoff.delay_with_jitter(attempt, &mut rng);
            assert!(d >= backoff.delay(attempt));
            assert!(d <= backoff.max);
        }
    }
}
