//! In-process media stack.
//!
//! [`FakeNetwork::pair`] links two stacks through a loopback "network":
//! once both sides hold matching local and remote descriptions the pair is
//! considered connected, ICE reports `Connected`, remote streams appear and
//! the data channels open. Data sent on one side is delivered to the other.
//! A standalone [`FakeStack::new`] never connects on its own; tests drive
//! it with [`FakeStack::emit`].
//!
//! Every call is recorded and any operation can be made to fail once with
//! [`FakeStack::fail`].

use async_trait::async_trait;
use bytes::Bytes;
use callcore::{IceCandidateInit, SdpType, SessionDescription};
use log::{debug, trace};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::{
    ConnectionEvents, IceConnectionState, MediaConstraints, MediaStream, MediaTrack, NativeError,
    NativeEventKind, PeerConnection, RtcStack, SignalingState, TrackKind,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Loopback link between two [`FakeStack`]s.
#[derive(Clone, Default)]
pub struct FakeNetwork {
    slots: Arc<Mutex<[Option<Arc<Endpoint>>; 2]>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two stacks that can reach each other.
    pub fn pair() -> (Arc<FakeStack>, Arc<FakeStack>) {
        let network = Self::new();
        (
            Arc::new(FakeStack::on(network.clone(), 0)),
            Arc::new(FakeStack::on(network, 1)),
        )
    }

    fn register(&self, side: usize, endpoint: Arc<Endpoint>) {
        lock(&self.slots)[side] = Some(endpoint);
    }

    fn unregister(&self, side: usize, id: u64) {
        let mut slots = lock(&self.slots);
        if slots[side].as_ref().is_some_and(|e| e.id == id) {
            slots[side] = None;
        }
    }

    /// Connect the two current endpoints if their descriptions match up.
    fn try_connect(&self) {
        let (a, b) = {
            let slots = lock(&self.slots);
            match (&slots[0], &slots[1]) {
                (Some(a), Some(b)) => (a.clone(), b.clone()),
                _ => return,
            }
        };

        let (a_streams, b_streams) = {
            let mut sa = lock(&a.state);
            let mut sb = lock(&b.state);
            let ready = !sa.closed
                && !sb.closed
                && sa.peer.is_none()
                && sb.peer.is_none()
                && sa.local.is_some()
                && sa.remote.is_some()
                && sa.local == sb.remote
                && sa.remote == sb.local;
            if !ready {
                return;
            }
            sa.peer = Some(Arc::downgrade(&b));
            sb.peer = Some(Arc::downgrade(&a));
            (sa.streams.clone(), sb.streams.clone())
        };

        debug!("Fake network connected endpoints {} and {}", a.id, b.id);
        for (endpoint, remote_streams) in [(&a, b_streams), (&b, a_streams)] {
            let events = &endpoint.events;
            events.emit(NativeEventKind::IceConnectionState(IceConnectionState::Checking));
            events.emit(NativeEventKind::IceConnectionState(IceConnectionState::Connected));
            for stream in remote_streams {
                events.emit(NativeEventKind::RemoteStreamAdded(stream));
            }
            events.emit(NativeEventKind::DataChannelOpen);
        }
    }
}

struct Endpoint {
    id: u64,
    events: ConnectionEvents,
    state: Mutex<EndpointState>,
}

#[derive(Default)]
struct EndpointState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    streams: Vec<MediaStream>,
    remote_candidates: Vec<IceCandidateInit>,
    candidates_complete: bool,
    peer: Option<Weak<Endpoint>>,
    closed: bool,
}

struct Shared {
    side: usize,
    network: FakeNetwork,
    ops: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, NativeError>>,
    current: Mutex<Option<Arc<Endpoint>>>,
    sent: Mutex<Vec<Bytes>>,
}

impl Shared {
    fn op(&self, name: &str) -> Result<(), NativeError> {
        trace!("fake stack {}: {}", self.side, name);
        lock(&self.ops).push(name.to_string());
        match lock(&self.failures).remove(name) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub struct FakeStack {
    shared: Arc<Shared>,
}

impl FakeStack {
    /// A stack with nobody on the other end.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::on(FakeNetwork::new(), 0))
    }

    fn on(network: FakeNetwork, side: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                side,
                network,
                ops: Mutex::new(Vec::new()),
                failures: Mutex::new(HashMap::new()),
                current: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Names of the operations called so far, in order.
    pub fn ops(&self) -> Vec<String> {
        lock(&self.shared.ops).clone()
    }

    pub fn clear_ops(&self) {
        lock(&self.shared.ops).clear();
    }

    /// Make the next call to `op` fail with `error`.
    pub fn fail(&self, op: &str, error: NativeError) {
        lock(&self.shared.failures).insert(op.to_string(), error);
    }

    /// Push a notification from the most recent connection.
    pub fn emit(&self, kind: NativeEventKind) {
        if let Some(endpoint) = lock(&self.shared.current).as_ref() {
            endpoint.events.emit(kind);
        }
    }

    /// Event sink of the most recent connection.
    pub fn connection_events(&self) -> Option<ConnectionEvents> {
        lock(&self.shared.current).as_ref().map(|e| e.events.clone())
    }

    /// Remote candidates applied to the most recent connection.
    pub fn remote_candidates(&self) -> Vec<IceCandidateInit> {
        lock(&self.shared.current)
            .as_ref()
            .map(|e| lock(&e.state).remote_candidates.clone())
            .unwrap_or_default()
    }

    /// Whether the peer's end-of-candidates reached the most recent
    /// connection.
    pub fn candidates_complete(&self) -> bool {
        lock(&self.shared.current)
            .as_ref()
            .is_some_and(|e| lock(&e.state).candidates_complete)
    }

    /// Everything written to data channels, in order.
    pub fn sent_data(&self) -> Vec<Bytes> {
        lock(&self.shared.sent).clone()
    }
}

#[async_trait]
impl RtcStack for FakeStack {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, NativeError> {
        self.shared.op("get_user_media")?;
        let id = next_id();
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::new(format!("audio-{id}"), TrackKind::Audio));
        }
        if constraints.video {
            tracks.push(MediaTrack::new(format!("video-{id}"), TrackKind::Video));
        }
        Ok(MediaStream::new(format!("stream-{id}"), tracks))
    }

    async fn connect(&self, events: ConnectionEvents) -> Result<Box<dyn PeerConnection>, NativeError> {
        self.shared.op("connect")?;
        let endpoint = Arc::new(Endpoint {
            id: next_id(),
            events,
            state: Mutex::new(EndpointState::default()),
        });
        self.shared
            .network
            .register(self.shared.side, endpoint.clone());
        *lock(&self.shared.current) = Some(endpoint.clone());
        Ok(Box::new(FakeConnection {
            shared: self.shared.clone(),
            endpoint,
        }))
    }
}

struct FakeConnection {
    shared: Arc<Shared>,
    endpoint: Arc<Endpoint>,
}

impl FakeConnection {
    fn sdp(&self, audio: bool, video: bool) -> String {
        let mut sdp = format!(
            "v=0\r\no=- {} 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.endpoint.id
        );
        if audio {
            sdp.push_str("m=audio 9 UDP/TLS/RTP/SAVPF 109\r\na=rtpmap:109 opus/48000/2\r\n");
        }
        if video {
            sdp.push_str("m=video 9 UDP/TLS/RTP/SAVPF 120\r\na=rtpmap:120 VP8/90000\r\n");
        }
        sdp.push_str("m=application 9 DTLS/SCTP 5000\r\na=sctpmap:5000 webrtc-datachannel 256\r\n");
        sdp
    }

    fn ensure_open(&self) -> Result<(), NativeError> {
        if lock(&self.endpoint.state).closed {
            return Err(NativeError::new(
                "InvalidStateError",
                "peer connection is closed",
            ));
        }
        Ok(())
    }

    fn signaling(&self, state: SignalingState) {
        self.endpoint
            .events
            .emit(NativeEventKind::SignalingState(state));
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn add_stream(&self, stream: &MediaStream) -> Result<(), NativeError> {
        self.shared.op("add_stream")?;
        self.ensure_open()?;
        lock(&self.endpoint.state).streams.push(stream.clone());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NativeError> {
        self.shared.op("create_offer")?;
        self.ensure_open()?;
        let (audio, video) = {
            let state = lock(&self.endpoint.state);
            (
                state.streams.iter().any(|s| s.has(TrackKind::Audio)),
                state.streams.iter().any(|s| s.has(TrackKind::Video)),
            )
        };
        Ok(SessionDescription::offer(self.sdp(audio, video)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NativeError> {
        self.shared.op("create_answer")?;
        self.ensure_open()?;
        let offered = lock(&self.endpoint.state)
            .remote
            .as_ref()
            .filter(|d| d.sdp_type == SdpType::Offer)
            .map(|d| d.constraints())
            .ok_or_else(|| NativeError::new("InvalidStateError", "no remote offer"))?;
        Ok(SessionDescription::answer(
            self.sdp(offered.audio, offered.video),
        ))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), NativeError> {
        self.shared.op("set_local_description")?;
        self.ensure_open()?;
        let next = match description.sdp_type {
            SdpType::Offer => SignalingState::HaveLocalOffer,
            _ => SignalingState::Stable,
        };
        lock(&self.endpoint.state).local = Some(description);
        self.signaling(next);

        let events = &self.endpoint.events;
        let candidate = IceCandidateInit::new(format!(
            "candidate:{} 1 UDP 2122252543 127.0.0.1 {} typ host",
            self.endpoint.id,
            50000 + self.endpoint.id % 10000
        ))
        .with_sdp_mid("0")
        .with_sdp_mline_index(0);
        events.emit(NativeEventKind::IceCandidate(Some(candidate)));
        events.emit(NativeEventKind::IceCandidate(None));

        self.shared.network.try_connect();
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), NativeError> {
        self.shared.op("set_remote_description")?;
        self.ensure_open()?;
        let next = match description.sdp_type {
            SdpType::Offer => SignalingState::HaveRemoteOffer,
            _ => SignalingState::Stable,
        };
        lock(&self.endpoint.state).remote = Some(description);
        self.signaling(next);
        self.shared.network.try_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: Option<IceCandidateInit>) -> Result<(), NativeError> {
        self.shared.op("add_ice_candidate")?;
        self.ensure_open()?;
        let mut state = lock(&self.endpoint.state);
        match candidate {
            Some(candidate) => state.remote_candidates.push(candidate),
            None => state.candidates_complete = true,
        }
        Ok(())
    }

    async fn send_data(&self, data: Bytes) -> Result<(), NativeError> {
        self.shared.op("send_data")?;
        let peer = {
            let state = lock(&self.endpoint.state);
            if state.closed {
                return Err(NativeError::new(
                    "InvalidStateError",
                    "data channel is closed",
                ));
            }
            state.peer.as_ref().and_then(Weak::upgrade)
        };
        lock(&self.shared.sent).push(data.clone());
        if let Some(peer) = peer
            && !lock(&peer.state).closed
        {
            peer.events.emit(NativeEventKind::DataChannelMessage(data));
        }
        Ok(())
    }

    async fn close(&self) {
        // Closing cannot fail; the op is only recorded.
        let _ = self.shared.op("close");
        let (peer, streams) = {
            let mut state = lock(&self.endpoint.state);
            if state.closed {
                return;
            }
            state.closed = true;
            (
                state.peer.take().and_then(|p| p.upgrade()),
                state.streams.clone(),
            )
        };
        self.shared
            .network
            .unregister(self.shared.side, self.endpoint.id);

        let events = &self.endpoint.events;
        events.emit(NativeEventKind::DataChannelClosed);
        events.emit(NativeEventKind::SignalingState(SignalingState::Closed));
        events.emit(NativeEventKind::IceConnectionState(IceConnectionState::Closed));

        if let Some(peer) = peer
            && !lock(&peer.state).closed
        {
            peer.events.emit(NativeEventKind::IceConnectionState(
                IceConnectionState::Disconnected,
            ));
            peer.events.emit(NativeEventKind::DataChannelClosed);
            for stream in streams {
                peer.events.emit(NativeEventKind::RemoteStreamRemoved(stream));
            }
        }
        debug!("Fake connection {} closed", self.endpoint.id);
    }

    fn is_closed(&self) -> bool {
        lock(&self.endpoint.state).closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{NativeEvent, NativeEventReceiver};
    use callcore::Sdp;
    use tokio::sync::mpsc;

    fn events(generation: u64) -> (ConnectionEvents, NativeEventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionEvents::new(generation, tx), rx)
    }

    fn drain(rx: &mut NativeEventReceiver) -> Vec<NativeEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn has_open(events: &[NativeEvent]) -> bool {
        events
            .iter()
            .any(|e| matches!(e.kind, NativeEventKind::DataChannelOpen))
    }

    #[tokio::test]
    async fn test_offer_lists_added_media() {
        let stack = FakeStack::new();
        let (ev, _rx) = events(1);
        let conn = stack.connect(ev).await.unwrap();
        let stream = stack
            .get_user_media(MediaConstraints::new(true, true))
            .await
            .unwrap();
        conn.add_stream(&stream).await.unwrap();
        let offer = conn.create_offer().await.unwrap();
        let sdp = Sdp::new(&offer.sdp);
        assert!(sdp.constraints().audio);
        assert!(sdp.constraints().video);
        assert!(sdp.constraints().datachannel);
    }

    #[tokio::test]
    async fn test_pair_connects_and_delivers_data() {
        let (left, right) = FakeNetwork::pair();
        let (ev_a, mut rx_a) = events(1);
        let (ev_b, mut rx_b) = events(1);
        let a = left.connect(ev_a).await.unwrap();
        let b = right.connect(ev_b).await.unwrap();

        let offer = a.create_offer().await.unwrap();
        a.set_local_description(offer.clone()).await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        b.set_local_description(answer.clone()).await.unwrap();
        assert!(!has_open(&drain(&mut rx_b)));

        a.set_remote_description(answer).await.unwrap();
        assert!(has_open(&drain(&mut rx_a)));
        assert!(has_open(&drain(&mut rx_b)));

        a.send_data(Bytes::from_static(b"3:1st,")).await.unwrap();
        let delivered = drain(&mut rx_b);
        assert!(matches!(
            &delivered[..],
            [NativeEvent { kind: NativeEventKind::DataChannelMessage(data), .. }] if data == "3:1st,"
        ));
    }

    #[tokio::test]
    async fn test_close_notifies_both_sides() {
        let stack = FakeStack::new();
        let (ev, mut rx) = events(3);
        let conn = stack.connect(ev).await.unwrap();
        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());

        let closed: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| {
                matches!(
                    e.kind,
                    NativeEventKind::IceConnectionState(IceConnectionState::Closed)
                )
            })
            .collect();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].generation, 3);
        assert!(conn.send_data(Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let stack = FakeStack::new();
        stack.fail("get_user_media", NativeError::new("NotAllowedError", "denied"));
        let err = stack
            .get_user_media(MediaConstraints::new(false, true))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "NotAllowedError denied");
        assert!(stack
            .get_user_media(MediaConstraints::new(false, true))
            .await
            .is_ok());
        assert_eq!(stack.ops(), vec!["get_user_media", "get_user_media"]);
    }
}
