//! Call lifecycle on top of a media session.
//!
//! [`CallSession`] tracks one call with one peer: offering, ringing,
//! accepting, hold and hang up. It does not own the media session; every
//! operation that touches media borrows it, so a conversation can keep its
//! data channel across calls.

mod error;
mod session;

pub use error::CallError;
pub use session::CallSession;
