//! Lifecycle of the media connection underneath a call.

use serde::Serialize;
use std::fmt;

use crate::call_state::InvalidTransition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaState {
    #[default]
    Ready,
    /// Offer created or connection being rebuilt.
    Pending,
    Ongoing,
    Terminated,
}

impl MediaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Pending => "pending",
            Self::Ongoing => "ongoing",
            Self::Terminated => "terminated",
        }
    }

    pub fn transition(self, transition: MediaTransition) -> Result<MediaState, InvalidTransition> {
        use MediaState::*;
        use MediaTransition as T;

        match (self, transition) {
            (Ready, T::Initiate) => Ok(Pending),
            (Pending, T::Establish) => Ok(Ongoing),
            (Ready | Ongoing, T::Answer) => Ok(Ongoing),
            (Ongoing, T::Upgrade) => Ok(Pending),
            (_, T::Terminate) => Ok(Terminated),
            (Terminated, T::Reset) => Ok(Ready),
            (current, attempted) => Err(InvalidTransition::new(current, attempted)),
        }
    }
}

impl fmt::Display for MediaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaTransition {
    Initiate,
    Establish,
    Answer,
    Upgrade,
    Terminate,
    Reset,
}

impl MediaTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiate => "initiate",
            Self::Establish => "establish",
            Self::Answer => "answer",
            Self::Upgrade => "upgrade",
            Self::Terminate => "terminate",
            Self::Reset => "reset",
        }
    }
}

impl fmt::Display for MediaTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiate_establish() {
        let state = MediaState::Ready.transition(MediaTransition::Initiate).unwrap();
        assert_eq!(state, MediaState::Pending);
        let state = state.transition(MediaTransition::Establish).unwrap();
        assert_eq!(state, MediaState::Ongoing);
    }

    #[test]
    fn test_answer_from_ready_and_ongoing() {
        assert_eq!(
            MediaState::Ready.transition(MediaTransition::Answer),
            Ok(MediaState::Ongoing)
        );
        assert_eq!(
            MediaState::Ongoing.transition(MediaTransition::Answer),
            Ok(MediaState::Ongoing)
        );
        assert!(MediaState::Pending.transition(MediaTransition::Answer).is_err());
    }

    #[test]
    fn test_upgrade_cycle() {
        let state = MediaState::Ongoing.transition(MediaTransition::Upgrade).unwrap();
        assert_eq!(state, MediaState::Pending);
        let state = state.transition(MediaTransition::Terminate).unwrap();
        let state = state.transition(MediaTransition::Reset).unwrap();
        assert_eq!(state, MediaState::Ready);
    }

    #[test]
    fn test_terminate_from_anywhere() {
        for state in [
            MediaState::Ready,
            MediaState::Pending,
            MediaState::Ongoing,
            MediaState::Terminated,
        ] {
            assert_eq!(
                state.transition(MediaTransition::Terminate),
                Ok(MediaState::Terminated)
            );
        }
    }

    const ALL_STATES: [MediaState; 4] = [
        MediaState::Ready,
        MediaState::Pending,
        MediaState::Ongoing,
        MediaState::Terminated,
    ];

    const ALL_TRANSITIONS: [MediaTransition; 6] = [
        MediaTransition::Initiate,
        MediaTransition::Establish,
        MediaTransition::Answer,
        MediaTransition::Upgrade,
        MediaTransition::Terminate,
        MediaTransition::Reset,
    ];

    fn documented(state: MediaState, transition: MediaTransition) -> Option<MediaState> {
        use MediaState::*;
        use MediaTransition as T;
        match (state, transition) {
            (Ready, T::Initiate) => Some(Pending),
            (Pending, T::Establish) => Some(Ongoing),
            (Ready, T::Answer) | (Ongoing, T::Answer) => Some(Ongoing),
            (Ongoing, T::Upgrade) => Some(Pending),
            (_, T::Terminate) => Some(Terminated),
            (Terminated, T::Reset) => Some(Ready),
            _ => None,
        }
    }

    #[test]
    fn test_transition_table() {
        for state in ALL_STATES {
            for transition in ALL_TRANSITIONS {
                match documented(state, transition) {
                    Some(target) => assert_eq!(state.transition(transition), Ok(target)),
                    None => assert!(
                        state.transition(transition).is_err(),
                        "{} --{}--> should be rejected",
                        state.as_str(),
                        transition.as_str()
                    ),
                }
            }
        }
    }
}
