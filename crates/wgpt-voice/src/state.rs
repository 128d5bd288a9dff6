//! Capture state machine with thread-safe transitions.
//!
//! - Idle -> Listening (start capture)
//! - Listening -> Idle (transcript delivered, error or cancel)

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::CaptureError;

/// Lifecycle of the capture service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    /// No session. Ready to start.
    Idle,
    /// A recognition session is in flight.
    Listening,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "Idle"),
            CaptureState::Listening => write!(f, "Listening"),
        }
    }
}

impl CaptureState {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &CaptureState) -> bool {
        matches!(
            (self, target),
            (CaptureState::Idle, CaptureState::Listening)
                | (CaptureState::Listening, CaptureState::Idle)
        )
    }
}

/// Shared, validated capture state.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: Arc<Mutex<CaptureState>>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CaptureState::Idle)),
        }
    }

    /// Returns the current state.
    pub fn current(&self) -> CaptureState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `Listening`. Fails with `AlreadyActive` unless currently idle.
    pub fn begin(&self) -> Result<(), CaptureError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.can_transition_to(&CaptureState::Listening) {
            tracing::debug!("Capture state: {} -> {}", *state, CaptureState::Listening);
            *state = CaptureState::Listening;
            Ok(())
        } else {
            Err(CaptureError::AlreadyActive)
        }
    }

    /// Return to `Idle`. Idempotent.
    pub fn finish(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != CaptureState::Idle {
            tracing::debug!("Capture state: {} -> {}", *state, CaptureState::Idle);
            *state = CaptureState::Idle;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
