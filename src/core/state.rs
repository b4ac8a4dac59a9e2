//! Modem session state register
//!
//! A single mutex-guarded [`SessionState`] shared between the worker and
//! any number of readers. Critical sections only ever read or write the
//! value; no lock is held across I/O.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Modem session lifecycle
///
/// Ordered: `Init < Idle < Attached < LinkActive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Before bring-up has been released by [`StateRegister::start`]
    Init,
    /// Command mode, not registered on the network
    Idle,
    /// Registered on the network, still in command mode
    Attached,
    /// Data mode; the PPP session owns the link
    LinkActive,
}

impl SessionState {
    /// Whether the registration poll applies in this state
    pub fn is_polled(&self) -> bool {
        matches!(self, Self::Idle | Self::Attached)
    }

    /// Whether the modem is in data mode
    pub fn is_link_active(&self) -> bool {
        *self == Self::LinkActive
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Idle => write!(f, "idle"),
            Self::Attached => write!(f, "attached"),
            Self::LinkActive => write!(f, "link-active"),
        }
    }
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: SessionState,
    /// New state
    pub to: SessionState,
    /// Timestamp
    pub timestamp: DateTime<Local>,
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    last_transition: Option<StateTransition>,
}

/// Shared, cloneable handle to the session state
#[derive(Debug, Clone)]
pub struct StateRegister {
    inner: Arc<Mutex<Inner>>,
}

impl Default for StateRegister {
    fn default() -> Self {
        Self::new()
    }
}

impl StateRegister {
    /// Create a register in [`SessionState::Init`]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::Init,
                last_transition: None,
            })),
        }
    }

    /// Current state
    pub fn get(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Advance `Init` to `Idle`. Any other state is left untouched.
    ///
    /// Returns `true` if the transition happened.
    pub fn start(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Init {
            return false;
        }
        Self::record(&mut inner, SessionState::Idle);
        true
    }

    /// Most recent transition, if any
    pub fn last_transition(&self) -> Option<StateTransition> {
        self.inner.lock().last_transition.clone()
    }

    /// Worker-only mutation. Returns the previous state.
    pub(crate) fn set(&self, state: SessionState) -> SessionState {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        if previous != state {
            Self::record(&mut inner, state);
        }
        previous
    }

    fn record(inner: &mut Inner, to: SessionState) {
        let from = inner.state;
        inner.state = to;
        inner.last_transition = Some(StateTransition {
            from,
            to,
            timestamp: Local::now(),
        });
        tracing::info!(%from, %to, "modem state changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_in_init() {
        let reg = StateRegister::new();
        assert_eq!(reg.get(), SessionState::Init);
        assert!(reg.last_transition().is_none());
    }

    #[test]
    fn test_start_is_idempotent() {
        let reg = StateRegister::new();
        assert!(reg.start());
        assert_eq!(reg.get(), SessionState::Idle);

        assert!(!reg.start());
        assert_eq!(reg.get(), SessionState::Idle);
    }

    #[test]
    fn test_start_does_not_demote() {
        let reg = StateRegister::new();
        reg.start();
        reg.set(SessionState::Attached);
        assert!(!reg.start());
        assert_eq!(reg.get(), SessionState::Attached);
    }

    #[test]
    fn test_set_records_transition() {
        let reg = StateRegister::new();
        reg.start();
        let previous = reg.set(SessionState::Attached);
        assert_eq!(previous, SessionState::Idle);

        let t = reg.last_transition().unwrap();
        assert_eq!(t.from, SessionState::Idle);
        assert_eq!(t.to, SessionState::Attached);

        // Same-state writes are not transitions
        reg.set(SessionState::Attached);
        assert_eq!(reg.last_transition().unwrap().from, SessionState::Idle);
    }

    #[test]
    fn test_ordering_and_poll_window() {
        assert!(SessionState::Init < SessionState::Idle);
        assert!(SessionState::Attached < SessionState::LinkActive);
        assert!(!SessionState::Init.is_polled());
        assert!(SessionState::Idle.is_polled());
        assert!(SessionState::Attached.is_polled());
        assert!(!SessionState::LinkActive.is_polled());
    }

    #[test]
    fn test_clones_share_state() {
        let reg = StateRegister::new();
        let other = reg.clone();
        reg.start();
        assert_eq!(other.get(), SessionState::Idle);
    }
}
