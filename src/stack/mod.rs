//! The native media stack seam.
//!
//! [`RtcStack`] and [`PeerConnection`] model the primitives a browser-like
//! real-time stack offers: media acquisition, offer/answer creation,
//! description setting, candidate trickling and one reliable, ordered data
//! channel per connection. Asynchronous notifications from a connection are
//! pushed as [`NativeEvent`]s tagged with the generation of the connection
//! that produced them, so the session can discard anything coming from a
//! connection it already replaced.

pub mod fake;

use async_trait::async_trait;
use bytes::Bytes;
use callcore::{IceCandidateInit, SdpConstraints, SessionDescription};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

pub use fake::{FakeNetwork, FakeStack};

/// What to request from the media stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
    /// Synthetic tracks instead of capture devices.
    pub fake: bool,
}

impl MediaConstraints {
    pub fn new(video: bool, audio: bool) -> Self {
        Self {
            video,
            audio,
            fake: false,
        }
    }

    /// Data channel only.
    pub fn data_only() -> Self {
        Self::default()
    }

    pub fn wants_media(&self) -> bool {
        self.video || self.audio
    }
}

impl From<SdpConstraints> for MediaConstraints {
    fn from(c: SdpConstraints) -> Self {
        Self::new(c.video, c.audio)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A media track handle. Clones share the same enabled/live flags.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    enabled: Arc<AtomicBool>,
    live: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        self.tracks.push(track);
    }

    pub fn has(&self, kind: TrackKind) -> bool {
        self.tracks_of(kind).next().is_some()
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Failure reported by the native stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub name: String,
    pub message: String,
}

impl NativeError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.message)
    }
}

impl std::error::Error for NativeError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

#[derive(Debug, Clone)]
pub enum NativeEventKind {
    IceConnectionState(IceConnectionState),
    /// A local candidate was gathered; `None` ends gathering.
    IceCandidate(Option<IceCandidateInit>),
    SignalingState(SignalingState),
    RemoteStreamAdded(MediaStream),
    /// Another track of a remote stream that was already reported.
    RemoteTrackAdded { stream_id: String, track: MediaTrack },
    RemoteStreamRemoved(MediaStream),
    DataChannelOpen,
    DataChannelMessage(Bytes),
    DataChannelError(String),
    DataChannelClosed,
}

#[derive(Debug, Clone)]
pub struct NativeEvent {
    pub generation: u64,
    pub kind: NativeEventKind,
}

pub type NativeEventReceiver = mpsc::UnboundedReceiver<NativeEvent>;

/// Where a connection reports its notifications.
#[derive(Debug, Clone)]
pub struct ConnectionEvents {
    generation: u64,
    sink: mpsc::UnboundedSender<NativeEvent>,
}

impl ConnectionEvents {
    pub fn new(generation: u64, sink: mpsc::UnboundedSender<NativeEvent>) -> Self {
        Self { generation, sink }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, kind: NativeEventKind) {
        // The session may be gone already; nobody is left to notify then.
        let _ = self.sink.send(NativeEvent {
            generation: self.generation,
            kind,
        });
    }
}

#[async_trait]
pub trait RtcStack: Send + Sync {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, NativeError>;

    /// Create a connection together with its data channel.
    async fn connect(&self, events: ConnectionEvents) -> Result<Box<dyn PeerConnection>, NativeError>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_stream(&self, stream: &MediaStream) -> Result<(), NativeError>;
    async fn create_offer(&self) -> Result<SessionDescription, NativeError>;
    async fn create_answer(&self) -> Result<SessionDescription, NativeError>;
    async fn set_local_description(&self, description: SessionDescription) -> Result<(), NativeError>;
    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), NativeError>;
    /// `None` tells the connection the peer has no more candidates.
    async fn add_ice_candidate(&self, candidate: Option<IceCandidateInit>) -> Result<(), NativeError>;
    async fn send_data(&self, data: Bytes) -> Result<(), NativeError>;
    /// Close the connection. The connection reports `Closed` afterwards.
    async fn close(&self);
    fn is_closed(&self) -> bool;
}
