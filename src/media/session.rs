//! Media session for peer calls.
//!
//! A [`MediaSession`] owns at most one live peer connection and runs the
//! media lifecycle on top of it. Operations return the [`MediaSignal`]s they
//! produced right away; anything the native stack reports later arrives as a
//! [`NativeEvent`] that the owner feeds back through
//! [`MediaSession::handle_native`].
//!
//! Renegotiation is done by tearing the connection down and building a new
//! one: [`MediaSession::upgrade`] terminates, waits for the old connection to
//! report `Closed`, then initiates or answers again on a fresh connection.

use bytes::Bytes;
use callcore::{IceCandidateInit, MediaState, MediaTransition, SessionDescription, Value};
use log::{debug, info, trace, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::transport::DataChannelTransport;
use super::{MediaError, MediaSignal, MuteMedia, MuteScope};
use crate::events::{MediaEvents, MediaStateChange};
use crate::stack::{
    ConnectionEvents, IceConnectionState, MediaConstraints, MediaStream, NativeError, NativeEvent,
    NativeEventKind, NativeEventReceiver, PeerConnection, RtcStack, TrackKind,
};

struct PendingUpgrade {
    constraints: Option<MediaConstraints>,
    offer: Option<SessionDescription>,
}

pub struct MediaSession {
    stack: Arc<dyn RtcStack>,
    force_fake: bool,
    state: MediaState,
    constraints: MediaConstraints,
    local_stream: Option<MediaStream>,
    remote_stream: Option<MediaStream>,
    connection: Option<Box<dyn PeerConnection>>,
    generation: u64,
    native_tx: mpsc::UnboundedSender<NativeEvent>,
    remote_description_set: bool,
    pending_candidates: Vec<Option<IceCandidateInit>>,
    transport: DataChannelTransport,
    awaiting_established: bool,
    awaiting_upgraded: bool,
    awaiting_closed: bool,
    pending_upgrade: Option<PendingUpgrade>,
    events: Arc<MediaEvents>,
}

impl MediaSession {
    /// Create a session; the receiver yields the native notifications of
    /// every connection the session opens.
    pub fn new(stack: Arc<dyn RtcStack>, force_fake: bool) -> (Self, NativeEventReceiver) {
        let (native_tx, native_rx) = mpsc::unbounded_channel();
        let session = Self {
            stack,
            force_fake,
            state: MediaState::Ready,
            constraints: MediaConstraints {
                fake: force_fake,
                ..MediaConstraints::default()
            },
            local_stream: None,
            remote_stream: None,
            connection: None,
            generation: 0,
            native_tx,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            transport: DataChannelTransport::new(),
            awaiting_established: false,
            awaiting_upgraded: false,
            awaiting_closed: false,
            pending_upgrade: None,
            events: Arc::new(MediaEvents::new()),
        };
        (session, native_rx)
    }

    pub fn state(&self) -> MediaState {
        self.state
    }

    pub fn constraints(&self) -> MediaConstraints {
        self.constraints
    }

    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.local_stream.as_ref()
    }

    pub fn remote_stream(&self) -> Option<&MediaStream> {
        self.remote_stream.as_ref()
    }

    pub fn events(&self) -> &Arc<MediaEvents> {
        &self.events
    }

    pub fn transport(&self) -> &DataChannelTransport {
        &self.transport
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    pub fn is_upgrading(&self) -> bool {
        self.pending_upgrade.is_some()
    }

    /// Start an outgoing connection and produce its offer.
    pub async fn initiate(
        &mut self,
        constraints: MediaConstraints,
    ) -> Result<Vec<MediaSignal>, MediaError> {
        self.apply(MediaTransition::Initiate)?;
        // Nothing the peer sent before our offer applies to it.
        self.pending_candidates.clear();
        self.set_constraints(constraints);
        self.open_connection().await?;
        if self.constraints.wants_media() {
            self.acquire_media().await?;
        }
        self.create_offer().await
    }

    /// Answer an incoming offer, requesting whatever media it carries.
    pub async fn answer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<Vec<MediaSignal>, MediaError> {
        self.apply(MediaTransition::Answer)?;
        self.set_constraints(offer.constraints().into());
        if self.connection.is_none() {
            self.open_connection().await?;
        }
        if self.constraints.wants_media() && self.local_stream.is_none() {
            self.acquire_media().await?;
        }

        self.native(
            "Unable to set remote offer description",
            self.connection()?.set_remote_description(offer).await,
        )?;
        self.remote_description_set = true;
        self.apply_pending_candidates().await?;

        let connection = self.connection()?;
        let answer = self.native("Unable to create answer", connection.create_answer().await)?;
        self.native(
            "Unable to set local answer description",
            connection.set_local_description(answer.clone()).await,
        )?;
        let _ = self.events.answer_ready.send(answer.clone());
        Ok(vec![MediaSignal::AnswerReady(answer)])
    }

    /// Apply the peer's answer. The next `Connected` ICE state reports
    /// [`MediaSignal::ConnectionEstablished`], once.
    pub async fn establish(
        &mut self,
        answer: SessionDescription,
    ) -> Result<Vec<MediaSignal>, MediaError> {
        self.apply(MediaTransition::Establish)?;
        self.awaiting_established = true;
        self.native(
            "Unable to set remote answer description",
            self.connection()?.set_remote_description(answer).await,
        )?;
        self.remote_description_set = true;
        self.apply_pending_candidates().await?;
        Ok(Vec::new())
    }

    /// Rebuild the connection with new constraints, or to answer a new
    /// offer.
    ///
    /// Returns nothing while the old connection is still closing; the rest
    /// of the upgrade happens in [`handle_native`](Self::handle_native).
    pub async fn upgrade(
        &mut self,
        constraints: Option<MediaConstraints>,
        offer: Option<SessionDescription>,
    ) -> Result<Vec<MediaSignal>, MediaError> {
        if constraints.is_none() && offer.is_none() {
            return Err(MediaError::Protocol("upgrade needs constraints or an offer"));
        }
        self.apply(MediaTransition::Upgrade)?;
        info!("Upgrading media connection");
        self.pending_upgrade = Some(PendingUpgrade { constraints, offer });
        self.terminate().await;
        if self.awaiting_closed {
            Ok(Vec::new())
        } else {
            self.resume_upgrade().await
        }
    }

    /// Remote candidates are held back until a remote description is set.
    /// `None` marks the end of the peer's candidates. Candidates that
    /// arrive after the session terminated belong to the closed connection
    /// and are dropped, unless an upgrade is rebuilding it.
    pub async fn add_ice_candidate(
        &mut self,
        candidate: Option<IceCandidateInit>,
    ) -> Result<(), MediaError> {
        if self.state == MediaState::Terminated && self.pending_upgrade.is_none() {
            debug!("Dropping remote candidate for a closed connection");
            return Ok(());
        }
        if self.connection.is_none() || !self.remote_description_set {
            debug!("Holding remote candidate until a remote description is set");
            self.pending_candidates.push(candidate);
            return Ok(());
        }
        self.native(
            "Unable to add ice candidate",
            self.connection()?.add_ice_candidate(candidate).await,
        )
    }

    /// Enable or disable matching tracks.
    pub fn set_mute_state(&self, scope: MuteScope, media: MuteMedia, mute: bool) {
        let stream = match scope {
            MuteScope::Local => self.local_stream.as_ref(),
            MuteScope::Remote => self.remote_stream.as_ref(),
        };
        let Some(stream) = stream else {
            return;
        };
        for track in stream.tracks() {
            let selected = match media {
                MuteMedia::Audio => track.kind() == TrackKind::Audio,
                MuteMedia::Video => track.kind() == TrackKind::Video,
                MuteMedia::Both => true,
            };
            if selected {
                track.set_enabled(!mute);
            }
        }
    }

    /// True when the local stream has tracks of `kind` and all are disabled.
    pub fn is_local_muted(&self, kind: TrackKind) -> bool {
        self.local_stream.as_ref().is_some_and(|stream| {
            stream.has(kind) && stream.tracks_of(kind).all(|t| !t.is_enabled())
        })
    }

    /// Stop local media and close the connection. The connection's next
    /// `Closed` ICE state reports [`MediaSignal::ConnectionTerminated`].
    pub async fn terminate(&mut self) {
        let from = self.state;
        self.enter(MediaState::Terminated, MediaTransition::Terminate);
        self.awaiting_established = false;
        self.awaiting_upgraded = false;
        self.awaiting_closed = false;
        self.pending_candidates.clear();
        self.remote_description_set = false;

        if let Some(stream) = self.local_stream.take() {
            stream.stop();
        }
        let _ = self.events.local_stream_terminated.send(());
        self.remote_stream = None;
        let _ = self.events.remote_stream_terminated.send(());
        self.transport.close();

        if let Some(connection) = self.connection.take()
            && !connection.is_closed()
        {
            self.awaiting_closed = true;
            connection.close().await;
        }
        debug!("Media session terminated from {from}");
    }

    pub fn reset(&mut self) -> Result<(), MediaError> {
        self.apply(MediaTransition::Reset)
    }

    /// Queue or write one value on the data channel.
    pub async fn send(&mut self, value: &Value) -> Result<(), MediaError> {
        match self.transport.send(value) {
            Some(frame) => self.write_frame(frame).await,
            None => Ok(()),
        }
    }

    /// Process a notification from the native stack. Notifications from
    /// connections other than the current one are dropped.
    pub async fn handle_native(
        &mut self,
        event: NativeEvent,
    ) -> Result<Vec<MediaSignal>, MediaError> {
        if event.generation != self.generation {
            trace!(
                "Dropping event from connection {} (current {}): {:?}",
                event.generation, self.generation, event.kind
            );
            return Ok(Vec::new());
        }

        let mut signals = Vec::new();
        match event.kind {
            NativeEventKind::IceConnectionState(state) => {
                debug!("ICE connection state: {state:?}");
                let _ = self.events.ice_state.send(state);
                match state {
                    IceConnectionState::Connected => {
                        if std::mem::take(&mut self.awaiting_established) {
                            info!("Media connection established");
                            let _ = self.events.connection_established.send(());
                            signals.push(MediaSignal::ConnectionEstablished);
                        }
                        if std::mem::take(&mut self.awaiting_upgraded) {
                            info!("Media connection upgraded");
                            let _ = self.events.connection_upgraded.send(());
                            signals.push(MediaSignal::ConnectionUpgraded);
                        }
                    }
                    IceConnectionState::Closed if std::mem::take(&mut self.awaiting_closed) => {
                        let _ = self.events.connection_terminated.send(());
                        signals.push(MediaSignal::ConnectionTerminated);
                        signals.extend(self.resume_upgrade().await?);
                    }
                    _ => {}
                }
            }
            NativeEventKind::IceCandidate(candidate) => {
                let _ = self.events.ice_candidate_ready.send(candidate.clone());
                signals.push(MediaSignal::IceCandidateReady(candidate));
            }
            NativeEventKind::SignalingState(state) => {
                trace!("Signaling state: {state:?}");
                let _ = self.events.signaling_state.send(state);
            }
            NativeEventKind::RemoteStreamAdded(stream) => {
                debug!("Remote stream {} ready", stream.id());
                self.remote_stream = Some(stream.clone());
                let _ = self.events.remote_stream_ready.send(stream);
            }
            NativeEventKind::RemoteTrackAdded { stream_id, track } => {
                match self.remote_stream.as_mut() {
                    Some(stream) if stream.id() == stream_id => {
                        debug!("Remote stream {stream_id} gained track {}", track.id());
                        stream.add_track(track);
                    }
                    _ => {
                        let stream = MediaStream::new(stream_id, vec![track]);
                        debug!("Remote stream {} ready", stream.id());
                        self.remote_stream = Some(stream.clone());
                        let _ = self.events.remote_stream_ready.send(stream);
                    }
                }
            }
            NativeEventKind::RemoteStreamRemoved(stream) => {
                if self
                    .remote_stream
                    .as_ref()
                    .is_some_and(|current| current.id() == stream.id())
                {
                    self.remote_stream = None;
                }
                let _ = self.events.remote_stream_removed.send(stream);
            }
            NativeEventKind::DataChannelOpen => {
                let queued = self.transport.open();
                debug!("Data channel open, flushing {} queued frames", queued.len());
                let _ = self.events.dc_ready.send(());
                signals.push(MediaSignal::DataChannelReady);
                for frame in queued {
                    self.write_frame(frame).await?;
                }
            }
            NativeEventKind::DataChannelMessage(data) => {
                let values = self
                    .transport
                    .receive(&data)
                    .map_err(|e| self.fail(MediaError::Codec(e)))?;
                for value in values {
                    let _ = self.events.dc_message.send(value.clone());
                    signals.push(MediaSignal::DataMessage(value));
                }
            }
            NativeEventKind::DataChannelError(message) => {
                warn!("Data channel error: {message}");
                let _ = self.events.error.send(message);
            }
            NativeEventKind::DataChannelClosed => {
                debug!("Data channel closed");
                self.transport.close();
                let _ = self.events.dc_closed.send(());
                signals.push(MediaSignal::DataChannelClosed);
            }
        }
        Ok(signals)
    }

    async fn resume_upgrade(&mut self) -> Result<Vec<MediaSignal>, MediaError> {
        let Some(PendingUpgrade { constraints, offer }) = self.pending_upgrade.take() else {
            return Ok(Vec::new());
        };
        self.reset()?;
        let signals = match (offer, constraints) {
            (Some(offer), _) => self.answer(offer).await?,
            (None, Some(constraints)) => self.initiate(constraints).await?,
            (None, None) => return Err(MediaError::Protocol("upgrade needs constraints or an offer")),
        };
        self.awaiting_upgraded = true;
        Ok(signals)
    }

    fn apply(&mut self, transition: MediaTransition) -> Result<(), MediaError> {
        let to = self.state.transition(transition)?;
        self.enter(to, transition);
        Ok(())
    }

    fn enter(&mut self, to: MediaState, transition: MediaTransition) {
        let from = self.state;
        self.state = to;
        debug!("Media state {from} -> {to} ({transition})");
        let _ = self.events.state_changed.send(MediaStateChange {
            from,
            to,
            transition,
        });
    }

    fn set_constraints(&mut self, constraints: MediaConstraints) {
        self.constraints = MediaConstraints {
            fake: constraints.fake || self.force_fake,
            ..constraints
        };
    }

    fn connection(&self) -> Result<&dyn PeerConnection, MediaError> {
        self.connection.as_deref().ok_or(MediaError::NotConnected)
    }

    /// Report a failure on the error event and hand it back.
    fn fail(&self, err: MediaError) -> MediaError {
        warn!("{err}");
        let _ = self.events.error.send(err.to_string());
        err
    }

    fn native<T>(
        &self,
        description: impl Into<String>,
        result: Result<T, NativeError>,
    ) -> Result<T, MediaError> {
        result.map_err(|source| {
            self.fail(MediaError::Native {
                description: description.into(),
                source,
            })
        })
    }

    async fn open_connection(&mut self) -> Result<(), MediaError> {
        if let Some(old) = self.connection.take() {
            old.close().await;
        }
        self.generation += 1;
        self.transport.reset();
        self.remote_description_set = false;
        self.awaiting_closed = false;

        let events = ConnectionEvents::new(self.generation, self.native_tx.clone());
        let connection = self.native(
            "Unable to create peer connection",
            self.stack.connect(events).await,
        )?;
        debug!("Opened connection generation {}", self.generation);
        self.connection = Some(connection);
        Ok(())
    }

    async fn acquire_media(&mut self) -> Result<(), MediaError> {
        let constraints = self.constraints;
        let stream = self.native(
            format!("Unable to get user media, constraints={constraints:?}"),
            self.stack.get_user_media(constraints).await,
        )?;
        let _ = self.events.local_stream_ready.send(stream.clone());
        self.local_stream = Some(stream.clone());
        self.native(
            "Unable to add local stream",
            self.connection()?.add_stream(&stream).await,
        )
    }

    async fn create_offer(&mut self) -> Result<Vec<MediaSignal>, MediaError> {
        let connection = self.connection()?;
        let offer = self.native("Unable to create offer", connection.create_offer().await)?;
        self.native(
            "Unable to set local offer description",
            connection.set_local_description(offer.clone()).await,
        )?;
        let _ = self.events.offer_ready.send(offer.clone());
        Ok(vec![MediaSignal::OfferReady(offer)])
    }

    /// A rejected candidate is reported and skipped; the rest still apply.
    async fn apply_pending_candidates(&mut self) -> Result<(), MediaError> {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            let result = self.connection()?.add_ice_candidate(candidate).await;
            let _ = self.native("Unable to add ice candidate", result);
        }
        Ok(())
    }

    async fn write_frame(&self, frame: Bytes) -> Result<(), MediaError> {
        self.native("Couldn't send data", self.connection()?.send_data(frame).await)
    }
}
