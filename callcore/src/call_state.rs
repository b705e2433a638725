//! Call state machine implementation.

use serde::Serialize;
use std::fmt;

/// Current state of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    /// Nothing happened yet.
    #[default]
    Ready,
    /// Outgoing offer sent, or incoming offer accepted; waiting for media.
    Pending,
    /// Incoming offer received, ringing locally.
    Incoming,
    /// Media connected.
    Ongoing,
    /// Outgoing offer went unanswered.
    Timeout,
    /// Call on hold, local tracks muted.
    Hold,
    /// Call ended.
    Terminated,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Pending => "pending",
            Self::Incoming => "incoming",
            Self::Ongoing => "ongoing",
            Self::Timeout => "timeout",
            Self::Hold => "hold",
            Self::Terminated => "terminated",
        }
    }

    pub fn is_ongoing(&self) -> bool {
        matches!(self, Self::Ongoing)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// States in which hanging up has nothing to tear down.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Ready | Self::Timeout | Self::Terminated)
    }

    /// Apply a transition. Pure: the receiver is left untouched.
    pub fn transition(self, transition: CallTransition) -> Result<CallState, InvalidTransition> {
        use CallState::*;
        use CallTransition as T;

        let next = match (self, transition) {
            (Ready | Timeout, T::Start) => Pending,
            (Ready | Timeout, T::Incoming) => Incoming,
            (Incoming, T::Accept) => Pending,
            (Incoming, T::Ignore) => Terminated,
            (Pending, T::Complete) => Ongoing,
            (Pending, T::Timeout) => Timeout,
            (Ongoing, T::Hold) => Hold,
            (Hold, T::Resume) => Ongoing,
            (Incoming | Pending | Timeout | Ongoing | Hold, T::Hangup) => Terminated,
            (current, attempted) => {
                return Err(InvalidTransition::new(current, attempted));
            }
        };
        Ok(next)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State transitions for calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallTransition {
    Start,
    Incoming,
    Accept,
    Ignore,
    Complete,
    Timeout,
    Hangup,
    Hold,
    Resume,
}

impl CallTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Incoming => "incoming",
            Self::Accept => "accept",
            Self::Ignore => "ignore",
            Self::Complete => "complete",
            Self::Timeout => "timeout",
            Self::Hangup => "hangup",
            Self::Hold => "hold",
            Self::Resume => "resume",
        }
    }
}

impl fmt::Display for CallTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition attempted from a state that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl InvalidTransition {
    pub fn new(current: impl fmt::Display, attempted: impl fmt::Display) -> Self {
        Self {
            current_state: current.to_string(),
            attempted: attempted.to_string(),
        }
    }
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [CallState; 7] = [
        CallState::Ready,
        CallState::Pending,
        CallState::Incoming,
        CallState::Ongoing,
        CallState::Timeout,
        CallState::Hold,
        CallState::Terminated,
    ];

    const ALL_TRANSITIONS: [CallTransition; 9] = [
        CallTransition::Start,
        CallTransition::Incoming,
        CallTransition::Accept,
        CallTransition::Ignore,
        CallTransition::Complete,
        CallTransition::Timeout,
        CallTransition::Hangup,
        CallTransition::Hold,
        CallTransition::Resume,
    ];

    fn documented(state: CallState, transition: CallTransition) -> Option<CallState> {
        use CallState::*;
        use CallTransition as T;
        match (state, transition) {
            (Ready, T::Start) | (Timeout, T::Start) => Some(Pending),
            (Ready, T::Incoming) | (Timeout, T::Incoming) => Some(Incoming),
            (Incoming, T::Accept) => Some(Pending),
            (Incoming, T::Ignore) | (Incoming, T::Hangup) => Some(Terminated),
            (Pending, T::Complete) => Some(Ongoing),
            (Pending, T::Timeout) => Some(Timeout),
            (Pending, T::Hangup) | (Timeout, T::Hangup) => Some(Terminated),
            (Ongoing, T::Hold) => Some(Hold),
            (Ongoing, T::Hangup) | (Hold, T::Hangup) => Some(Terminated),
            (Hold, T::Resume) => Some(Ongoing),
            _ => None,
        }
    }

    /// Every (state, transition) pair either yields the documented target
    /// or is rejected.
    #[test]
    fn test_transition_table() {
        for state in ALL_STATES {
            for transition in ALL_TRANSITIONS {
                match documented(state, transition) {
                    Some(target) => assert_eq!(state.transition(transition), Ok(target)),
                    None => assert!(
                        state.transition(transition).is_err(),
                        "{state} --{transition}--> should be rejected"
                    ),
                }
            }
        }
    }

    /// Flow: Ready → Pending → Ongoing → Hold → Ongoing → Terminated
    #[test]
    fn test_outgoing_call_flow() {
        let state = CallState::Ready;
        let state = state.transition(CallTransition::Start).unwrap();
        let state = state.transition(CallTransition::Complete).unwrap();
        assert!(state.is_ongoing());
        let state = state.transition(CallTransition::Hold).unwrap();
        let state = state.transition(CallTransition::Resume).unwrap();
        let state = state.transition(CallTransition::Hangup).unwrap();
        assert!(state.is_terminated());
    }

    #[test]
    fn test_terminated_is_absorbing() {
        for transition in ALL_TRANSITIONS {
            assert!(CallState::Terminated.transition(transition).is_err());
        }
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = CallState::Ongoing.transition(CallTransition::Start).unwrap_err();
        assert_eq!(err.to_string(), "invalid transition start in state ongoing");
    }

    #[test]
    fn test_idle_states() {
        assert!(CallState::Ready.is_idle());
        assert!(CallState::Timeout.is_idle());
        assert!(CallState::Terminated.is_idle());
        assert!(!CallState::Pending.is_idle());
        assert!(!CallState::Hold.is_idle());
    }
}
