use bytes::Bytes;
use callcore::{
    Answer, CallState, CallTransition, ChatMessage, Hangup, IceCandidate, IceCandidateInit,
    MediaState, MediaTransition, Move, Offer, SessionDescription, TransferSummary, Value,
};
use tokio::sync::broadcast;

use crate::stack::{IceConnectionState, MediaStream, SignalingState};

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

// Generates a bus struct with one broadcast channel per event.
macro_rules! define_event_bus {
    ($(#[$meta:meta])* $name:ident { $(($field:ident, $type:ty)),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl $name {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaStateChange {
    pub from: MediaState,
    pub to: MediaState,
    pub transition: MediaTransition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallStateChange {
    pub from: CallState,
    pub to: CallState,
    pub transition: CallTransition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferComplete {
    pub summary: TransferSummary,
    pub data: Bytes,
}

define_event_bus! {
    /// Notifications from a [`MediaSession`](crate::media::MediaSession).
    MediaEvents {
        (state_changed, MediaStateChange),
        (local_stream_ready, MediaStream),
        (local_stream_terminated, ()),
        (remote_stream_ready, MediaStream),
        (remote_stream_removed, MediaStream),
        (remote_stream_terminated, ()),
        (offer_ready, SessionDescription),
        (answer_ready, SessionDescription),
        (connection_established, ()),
        (connection_upgraded, ()),
        (connection_terminated, ()),
        (ice_state, IceConnectionState),
        (ice_candidate_ready, Option<IceCandidateInit>),
        (signaling_state, SignalingState),
        (dc_ready, ()),
        (dc_message, Value),
        (dc_closed, ()),
        (error, String),
    }
}

define_event_bus! {
    /// Call lifecycle notifications and outgoing call payloads.
    CallEvents {
        (state_changed, CallStateChange),
        (send_offer, Offer),
        (send_answer, Answer),
        (send_hangup, Hangup),
        (send_timeout, Hangup),
        (initiate_move, Move),
    }
}

define_event_bus! {
    /// Chat, typing and transfer notifications, plus the payloads of
    /// data-only sessions.
    ChatEvents {
        (chat_message, ChatMessage),
        (peer_typing, bool),
        (transfer_started, TransferSummary),
        (transfer_progress, TransferSummary),
        (transfer_complete, TransferComplete),
        (send_offer, Offer),
        (send_answer, Answer),
        (send_ice_candidate, IceCandidate),
        (error, String),
    }
}
