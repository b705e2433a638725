//! Peer calls, chat and file transfer over a single negotiated connection.
//!
//! The protocol types live in [`callcore`]; this crate drives them from a
//! tokio runtime. A [`Conversation`](conversation::Conversation) owns one
//! [`MediaSession`](media::MediaSession) and the current
//! [`CallSession`](call::CallSession), and a
//! [`ConversationDriver`](driver::ConversationDriver) feeds it user
//! commands, native media events, relay signals and timer expiries.

pub use callcore;

pub mod call;
pub mod config;
pub mod conversation;
pub mod driver;
pub mod events;
pub mod media;
pub mod relay;
pub mod stack;
pub mod timer;

pub use call::{CallError, CallSession};
pub use config::{CallConfig, ConfigError};
pub use conversation::{Conversation, ConversationError};
pub use driver::{Command, ConversationDriver, DriverHandle};
pub use media::{MediaError, MediaSession, MediaSignal};
pub use relay::{MemoryRelay, Signal, SignalRelay, forward_events};
