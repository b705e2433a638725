//! Signaling payloads exchanged with the peer through the relay.
//!
//! These are plain value objects. Field names on the wire follow the
//! camelCase JSON shapes the relay forwards verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::sdp::{Sdp, SdpConstraints};

/// Random 32-bit call identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(u32);

impl CallId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(rand::random())
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// An SDP blob together with its role in the negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn sdp(&self) -> Sdp<'_> {
        Sdp::new(&self.sdp)
    }

    pub fn constraints(&self) -> SdpConstraints {
        self.sdp().constraints()
    }
}

/// A trickled ICE candidate in its JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidateInit {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }

    pub fn with_sdp_mid(mut self, sdp_mid: impl Into<String>) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self
    }

    pub fn with_sdp_mline_index(mut self, index: u16) -> Self {
        self.sdp_mline_index = Some(index);
        self
    }
}

/// Call or chat offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub peer: String,
    pub offer: SessionDescription,
    #[serde(rename = "callId")]
    pub call_id: CallId,
    /// Set when the offer renegotiates a live connection.
    #[serde(default)]
    pub upgrade: bool,
}

/// Answer to an offer.
///
/// `answer` is optional on the wire; a missing answer is rejected when the
/// payload is used to establish a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub peer: String,
    #[serde(default)]
    pub answer: Option<SessionDescription>,
}

impl Answer {
    pub fn new(peer: impl Into<String>, answer: SessionDescription) -> Self {
        Self {
            peer: peer.into(),
            answer: Some(answer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hangup {
    pub peer: String,
    #[serde(rename = "callId")]
    pub call_id: CallId,
}

/// A trickled candidate, or `None` as the end-of-candidates marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub peer: String,
    pub candidate: Option<IceCandidateInit>,
}

/// Request to move the call to another device of the same user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub peer: String,
    #[serde(rename = "callId")]
    pub call_id: CallId,
}

/// Confirmation that a move was picked up elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveAccept {
    pub peer: String,
    #[serde(rename = "callId")]
    pub call_id: CallId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub peer: String,
    #[serde(rename = "callId")]
    pub call_id: CallId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResumeMedia {
    pub video: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resume {
    pub peer: String,
    #[serde(rename = "callId")]
    pub call_id: CallId,
    pub media: ResumeMedia,
}
