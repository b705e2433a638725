//! Media session: connection lifecycle, negotiation and the data channel.

pub mod session;
pub mod transport;
#[cfg(feature = "webrtc")]
pub mod webrtc;

use callcore::{CodecError, IceCandidateInit, InvalidTransition, SessionDescription, Value};
use std::str::FromStr;
use thiserror::Error;

use crate::stack::NativeError;

pub use session::MediaSession;
pub use transport::DataChannelTransport;
#[cfg(feature = "webrtc")]
pub use webrtc::WebRtcStack;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid media state transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// A native call failed; displays as `<description>: <name> <message>`.
    #[error("{description}: {source}")]
    Native {
        description: String,
        source: NativeError,
    },

    #[error("Unable to decode data channel message: {0}")]
    Codec(#[from] CodecError),

    #[error("unknown mute scope {0:?}")]
    UnknownScope(String),

    #[error("unknown media kind {0:?}")]
    UnknownMedia(String),

    #[error("no peer connection")]
    NotConnected,
}

/// What a session operation or native notification produced for the
/// session's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSignal {
    OfferReady(SessionDescription),
    AnswerReady(SessionDescription),
    ConnectionEstablished,
    ConnectionUpgraded,
    ConnectionTerminated,
    IceCandidateReady(Option<IceCandidateInit>),
    DataChannelReady,
    DataMessage(Value),
    DataChannelClosed,
}

/// Which side's tracks a mute applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteScope {
    Local,
    Remote,
}

impl FromStr for MuteScope {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(MuteScope::Local),
            "remote" => Ok(MuteScope::Remote),
            other => Err(MediaError::UnknownScope(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteMedia {
    Audio,
    Video,
    Both,
}

impl FromStr for MuteMedia {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(MuteMedia::Audio),
            "video" => Ok(MuteMedia::Video),
            "both" => Ok(MuteMedia::Both),
            other => Err(MediaError::UnknownMedia(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mute_scope() {
        assert_eq!("local".parse::<MuteScope>().unwrap(), MuteScope::Local);
        assert_eq!("remote".parse::<MuteScope>().unwrap(), MuteScope::Remote);
        assert!(matches!(
            "sideways".parse::<MuteScope>(),
            Err(MediaError::UnknownScope(s)) if s == "sideways"
        ));
    }

    #[test]
    fn test_native_error_format() {
        let err = MediaError::Native {
            description: "Unable to create offer".into(),
            source: NativeError::new("InternalError", "no codecs"),
        };
        assert_eq!(err.to_string(), "Unable to create offer: InternalError no codecs");
    }
}
