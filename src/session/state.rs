//! Viewer session state machine
//!
//! Tracks one HTTP viewer from registration to teardown.

use std::time::{Duration, Instant};

use crate::registry::ConsumerId;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Registered with the distributor, nothing written yet
    Registered,
    /// Forwarding frames
    Streaming,
    /// View-time budget used up
    LimitReached,
    /// Consumer removed, session over
    Closed,
}

/// Why streaming stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The view-time limit elapsed
    LimitReached,
    /// A write to the client failed
    ClientDisconnected,
    /// The mailbox was closed by the distributor
    SourceClosed,
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionOutcome::LimitReached => write!(f, "view limit reached"),
            SessionOutcome::ClientDisconnected => write!(f, "client disconnected"),
            SessionOutcome::SourceClosed => write!(f, "source closed"),
        }
    }
}

/// Complete session state
#[derive(Debug)]
pub struct SessionState {
    /// Consumer identifier assigned at registration
    pub id: ConsumerId,

    /// Current phase
    pub phase: SessionPhase,

    /// Registration time
    pub registered_at: Instant,

    /// Time the first byte was written
    pub stream_started_at: Option<Instant>,

    /// Sections written (live frames and stills)
    pub frames_sent: u64,

    /// Live frames replaced or skipped because viewing was denied
    pub frames_denied: u64,

    /// Body bytes written
    pub bytes_sent: u64,

    /// A section write was cut off by the view limit
    pub stalled: bool,
}

impl SessionState {
    /// Create state for a freshly registered consumer
    pub fn new(id: ConsumerId) -> Self {
        Self {
            id,
            phase: SessionPhase::Registered,
            registered_at: Instant::now(),
            stream_started_at: None,
            frames_sent: 0,
            frames_denied: 0,
            bytes_sent: 0,
            stalled: false,
        }
    }

    /// Enter the streaming phase
    pub fn start_streaming(&mut self) {
        if self.phase == SessionPhase::Registered {
            self.phase = SessionPhase::Streaming;
            self.stream_started_at = Some(Instant::now());
        }
    }

    /// Record a written section
    pub fn on_section(&mut self, bytes: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Mark the view limit as reached
    pub fn limit_reached(&mut self) {
        if self.phase == SessionPhase::Streaming {
            self.phase = SessionPhase::LimitReached;
        }
    }

    /// Mark the session closed
    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
    }

    /// Time spent streaming so far
    pub fn view_time(&self) -> Duration {
        self.stream_started_at
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let mut state = SessionState::new(3);

        assert_eq!(state.phase, SessionPhase::Registered);
        assert_eq!(state.view_time(), Duration::ZERO);

        state.start_streaming();
        assert_eq!(state.phase, SessionPhase::Streaming);
        assert!(state.stream_started_at.is_some());

        state.on_section(100);
        state.on_section(50);
        assert_eq!(state.frames_sent, 2);
        assert_eq!(state.bytes_sent, 150);

        state.limit_reached();
        assert_eq!(state.phase, SessionPhase::LimitReached);

        state.close();
        assert_eq!(state.phase, SessionPhase::Closed);
    }

    #[test]
    fn test_limit_only_from_streaming() {
        let mut state = SessionState::new(1);

        state.limit_reached();
        assert_eq!(state.phase, SessionPhase::Registered);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(SessionOutcome::ClientDisconnected.to_string(), "client disconnected");
    }
}
