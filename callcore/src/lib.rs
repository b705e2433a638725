//! Runtime-agnostic protocol core for peer calls.
//!
//! Everything in this crate is synchronous and free of I/O: SDP inspection,
//! signaling payloads, the tnetstring frame codec used on the data channel,
//! the wire envelope, chunked file transfers, and the two lifecycle state
//! machines. The `peercall` crate drives these types from an async runtime.

pub mod call_state;
pub mod chat;
pub mod media_state;
pub mod payloads;
pub mod sdp;
pub mod tnetstring;
pub mod transfer;
pub mod wire;

pub use call_state::{CallState, CallTransition, InvalidTransition};
pub use chat::ChatMessage;
pub use media_state::{MediaState, MediaTransition};
pub use payloads::{
    Answer, CallId, Hangup, Hold, IceCandidate, IceCandidateInit, Move, MoveAccept, Offer, Resume,
    ResumeMedia, SdpType, SessionDescription,
};
pub use sdp::{Media, Sdp, SdpConstraints};
pub use tnetstring::{CodecError, FrameDecoder, Value};
pub use transfer::{
    TransferDirection, TransferError, TransferSession, TransferStep, TransferSummary,
};
pub use wire::{WireError, WireMessage};
