//! Connection bookkeeping for the controller handshake.
//!
//! The state is a plain value; the controller's handshake loop feeds it
//! results and acts on what it returns. Keeping it free of I/O lets the
//! alert/retry rules be checked without a runtime.

use std::time::Duration;

/// Delay between handshake attempts unless configured otherwise.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Observable summary of a [`ConnectionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No transport, or it was detached.
    Disconnected,
    /// A transport is attached and its handshake has not succeeded yet.
    AwaitingHandshake,
    /// The last handshake succeeded.
    Connected,
}

/// What to do after a failed handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFailureOutcome {
    /// Message to surface to the user; `None` while a streak is already
    /// being reported.
    pub alert: Option<String>,
    /// Delay before the next attempt.
    pub retry_after: Duration,
}

/// Handshake bookkeeping for one controller.
///
/// Every attach or detach starts a new generation. Handshake results carry
/// the generation they were started under and are only applied while it
/// is still current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    connected: bool,
    first_error_shown: bool,
    awaiting: bool,
    retry_delay: Duration,
    generation: u64,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY)
    }
}

impl ConnectionState {
    /// Disconnected, with the first failure armed to alert.
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            connected: false,
            first_error_shown: true,
            awaiting: false,
            retry_delay,
            generation: 0,
        }
    }

    /// True after a successful handshake on the current transport.
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// True when the next failure will be shown to the user.
    pub fn first_error_shown(&self) -> bool {
        self.first_error_shown
    }

    /// Delay between failed attempts.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Generation of the transport currently attached (or detached).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether results started under `generation` may still be applied.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Current phase.
    pub fn phase(&self) -> ConnectionPhase {
        if self.connected {
            ConnectionPhase::Connected
        } else if self.awaiting {
            ConnectionPhase::AwaitingHandshake
        } else {
            ConnectionPhase::Disconnected
        }
    }

    /// A new transport was attached: forget the previous connection and
    /// wait for its handshake. Returns the generation its results must
    /// carry.
    pub fn begin_handshake(&mut self) -> u64 {
        self.generation += 1;
        self.connected = false;
        self.awaiting = true;
        self.generation
    }

    /// The transport went away. Results of earlier handshakes become
    /// stale.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.connected = false;
        self.awaiting = false;
    }

    /// Record a successful handshake. Returns true only on the transition
    /// into `Connected`.
    pub fn on_handshake_success(&mut self) -> bool {
        self.first_error_shown = true;
        self.awaiting = false;
        let newly_connected = !self.connected;
        self.connected = true;
        newly_connected
    }

    /// Record a failed handshake. A retry is always scheduled; the alert is
    /// only produced for the first failure of a streak.
    pub fn on_handshake_failure(
        &mut self,
        message: impl Into<String>,
    ) -> HandshakeFailureOutcome {
        let alert = if self.first_error_shown {
            self.first_error_shown = false;
            Some(message.into())
        } else {
            None
        };
        HandshakeFailureOutcome {
            alert,
            retry_after: self.retry_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected_with_alert_armed() {
        let state = ConnectionState::default();
        assert!(!state.connected());
        assert!(state.first_error_shown());
        assert_eq!(state.phase(), ConnectionPhase::Disconnected);
    }

    #[test]
    fn only_first_failure_of_a_streak_alerts() {
        let mut state = ConnectionState::default();
        state.begin_handshake();

        let first = state.on_handshake_failure("connection refused");
        assert_eq!(first.alert.as_deref(), Some("connection refused"));
        assert!(!state.first_error_shown());

        for _ in 0..5 {
            let next = state.on_handshake_failure("connection refused");
            assert_eq!(next.alert, None);
            assert!(!state.first_error_shown());
        }
    }

    #[test]
    fn every_failure_schedules_retry_at_fixed_delay() {
        let mut state = ConnectionState::new(Duration::from_millis(1000));
        let a = state.on_handshake_failure("a");
        let b = state.on_handshake_failure("b");
        assert_eq!(a.retry_after, Duration::from_secs(1));
        assert_eq!(b.retry_after, Duration::from_secs(1));
    }

    #[test]
    fn success_rearms_alert_and_connects_once() {
        let mut state = ConnectionState::default();
        state.begin_handshake();
        assert_eq!(state.phase(), ConnectionPhase::AwaitingHandshake);
        state.on_handshake_failure("down");

        assert!(state.on_handshake_success());
        assert!(state.connected());
        assert!(state.first_error_shown());
        assert_eq!(state.phase(), ConnectionPhase::Connected);

        // Already connected: no second edge.
        assert!(!state.on_handshake_success());

        // A fresh streak alerts again.
        let outcome = state.on_handshake_failure("down again");
        assert_eq!(outcome.alert.as_deref(), Some("down again"));
    }

    #[test]
    fn new_handshake_drops_connected_flag() {
        let mut state = ConnectionState::default();
        state.on_handshake_success();
        state.begin_handshake();
        assert!(!state.connected());
        assert!(state.on_handshake_success());

        state.reset();
        assert_eq!(state.phase(), ConnectionPhase::Disconnected);
    }

    #[test]
    fn attach_and_detach_retire_earlier_generations() {
        let mut state = ConnectionState::default();
        let first = state.begin_handshake();
        assert!(state.is_current(first));

        let second = state.begin_handshake();
        assert_ne!(first, second);
        assert!(!state.is_current(first));
        assert!(state.is_current(second));

        state.reset();
        assert!(!state.is_current(second));
        assert_eq!(state.generation(), second + 1);
    }
}
