//! Media stack backed by webrtc-rs.
//!
//! Each connection carries one negotiated, reliable and ordered data
//! channel (id 0), created up front on both sides so neither has to wait
//! for an in-band announcement. Local tracks are sample tracks; capturing
//! and encoding is left to whoever feeds them through
//! [`WebRtcStack::write_sample`].

use async_trait::async_trait;
use bytes::Bytes;
use callcore::{IceCandidateInit, SdpType, SessionDescription};
use dashmap::{DashMap, DashSet};
use log::{debug, info, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use webrtc::api::API;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::stack::{
    ConnectionEvents, IceConnectionState, MediaConstraints, MediaStream, MediaTrack, NativeError,
    NativeEventKind, PeerConnection, RtcStack, SignalingState, TrackKind,
};

/// Label of the data channel both sides create.
pub const DATA_CHANNEL_LABEL: &str = "data";
const DATA_CHANNEL_ID: u16 = 0;

static NEXT_STREAM: AtomicU64 = AtomicU64::new(1);

fn native(e: webrtc::Error) -> NativeError {
    NativeError::new("WebRtcError", e.to_string())
}

/// A local track added to a connection: the handle mute and hold act on,
/// and the sample track that feeds the RTP sender.
struct LocalTrack {
    generation: u64,
    track: MediaTrack,
    sample: Arc<TrackLocalStaticSample>,
}

pub struct WebRtcStack {
    api: API,
    ice_servers: Vec<String>,
    local_tracks: Arc<DashMap<String, LocalTrack>>,
}

impl WebRtcStack {
    pub fn new(ice_servers: Vec<String>) -> Result<Self, NativeError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(native)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(native)?;

        let setting_engine = SettingEngine::default();

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();
        Ok(Self {
            api,
            ice_servers,
            local_tracks: Arc::new(DashMap::new()),
        })
    }

    /// Feed one encoded frame to a local track. Frames for a muted or
    /// stopped track are dropped; returns whether the frame was sent.
    pub async fn write_sample(
        &self,
        track_id: &str,
        data: Bytes,
        duration: Duration,
    ) -> Result<bool, NativeError> {
        let sample_track = match self.local_tracks.get(track_id) {
            Some(local) if local.track.is_enabled() && local.track.is_live() => {
                local.sample.clone()
            }
            Some(_) => return Ok(false),
            None => {
                return Err(NativeError::new(
                    "NotFoundError",
                    format!("no local track {track_id}"),
                ));
            }
        };
        sample_track
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
            .map_err(native)?;
        Ok(true)
    }
}

#[async_trait]
impl RtcStack for WebRtcStack {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, NativeError> {
        if !constraints.fake {
            debug!("No capture devices, handing out sample tracks");
        }
        let id = NEXT_STREAM.fetch_add(1, Ordering::Relaxed);
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
        let config = RTCConfiguration {
            ice_servers: if self.ice_servers.is_empty() {
                Vec::new()
            } else {
                vec![RTCIceServer {
                    urls: self.ice_servers.clone(),
                    ..Default::default()
                }]
            },
            ..Default::default()
        };
        let peer_connection = Arc::new(self.api.new_peer_connection(config).await.map_err(native)?);

        let data_channel = peer_connection
            .create_data_channel(
                DATA_CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    negotiated: Some(DATA_CHANNEL_ID),
                    ..Default::default()
                }),
            )
            .await
            .map_err(native)?;

        wire_callbacks(&peer_connection, &data_channel, &events);
        info!("Created peer connection (generation {})", events.generation());

        Ok(Box::new(WebRtcConnection {
            peer_connection,
            data_channel,
            events,
            local_tracks: self.local_tracks.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

fn wire_callbacks(
    peer_connection: &Arc<RTCPeerConnection>,
    data_channel: &Arc<RTCDataChannel>,
    events: &ConnectionEvents,
) {
    let sink = events.clone();
    peer_connection.on_ice_connection_state_change(Box::new(
        move |state: RTCIceConnectionState| {
            let sink = sink.clone();
            Box::pin(async move {
                let state = match state {
                    RTCIceConnectionState::Checking => IceConnectionState::Checking,
                    RTCIceConnectionState::Connected => IceConnectionState::Connected,
                    RTCIceConnectionState::Completed => IceConnectionState::Completed,
                    RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
                    RTCIceConnectionState::Failed => IceConnectionState::Failed,
                    // Reported by close() itself.
                    RTCIceConnectionState::Closed => return,
                    _ => IceConnectionState::New,
                };
                sink.emit(NativeEventKind::IceConnectionState(state));
            })
        },
    ));

    let sink = events.clone();
    peer_connection.on_ice_candidate(Box::new(move |candidate| {
        let sink = sink.clone();
        Box::pin(async move {
            let candidate = match candidate {
                Some(c) => match c.to_json() {
                    Ok(json) => Some(IceCandidateInit {
                        candidate: json.candidate,
                        sdp_mid: json.sdp_mid,
                        sdp_mline_index: json.sdp_mline_index,
                    }),
                    Err(e) => {
                        warn!("Failed to serialize ICE candidate: {e}");
                        return;
                    }
                },
                None => None,
            };
            sink.emit(NativeEventKind::IceCandidate(candidate));
        })
    }));

    let sink = events.clone();
    peer_connection.on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
        let sink = sink.clone();
        Box::pin(async move {
            let state = match state {
                RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
                RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
                RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
                RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
                RTCSignalingState::Closed => SignalingState::Closed,
                _ => SignalingState::Stable,
            };
            sink.emit(NativeEventKind::SignalingState(state));
        })
    }));

    // Audio and video of one remote stream arrive as separate tracks.
    let sink = events.clone();
    let remote_streams: Arc<DashSet<String>> = Arc::new(DashSet::new());
    peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
        let sink = sink.clone();
        let remote_streams = remote_streams.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Video => TrackKind::Video,
                _ => TrackKind::Audio,
            };
            let stream_id = track.stream_id();
            let remote = MediaTrack::new(track.id(), kind);
            if remote_streams.insert(stream_id.clone()) {
                sink.emit(NativeEventKind::RemoteStreamAdded(MediaStream::new(
                    stream_id,
                    vec![remote],
                )));
            } else {
                sink.emit(NativeEventKind::RemoteTrackAdded {
                    stream_id,
                    track: remote,
                });
            }
        })
    }));

    let sink = events.clone();
    data_channel.on_open(Box::new(move || {
        let sink = sink.clone();
        Box::pin(async move {
            debug!("Data channel '{DATA_CHANNEL_LABEL}' open");
            sink.emit(NativeEventKind::DataChannelOpen);
        })
    }));

    let sink = events.clone();
    data_channel.on_message(Box::new(move |msg: DataChannelMessage| {
        let sink = sink.clone();
        Box::pin(async move {
            sink.emit(NativeEventKind::DataChannelMessage(msg.data));
        })
    }));

    let sink = events.clone();
    data_channel.on_error(Box::new(move |e: webrtc::Error| {
        let sink = sink.clone();
        Box::pin(async move {
            sink.emit(NativeEventKind::DataChannelError(e.to_string()));
        })
    }));
}

struct WebRtcConnection {
    peer_connection: Arc<RTCPeerConnection>,
    data_channel: Arc<RTCDataChannel>,
    events: ConnectionEvents,
    local_tracks: Arc<DashMap<String, LocalTrack>>,
    closed: AtomicBool,
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription, NativeError> {
    match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpType::Rollback => {
            return Err(NativeError::new(
                "NotSupportedError",
                "rollback descriptions are not supported",
            ));
        }
    }
    .map_err(native)
}

fn from_rtc(description: RTCSessionDescription) -> SessionDescription {
    match description.sdp_type {
        RTCSdpType::Answer => SessionDescription::answer(description.sdp),
        _ => SessionDescription::offer(description.sdp),
    }
}

#[async_trait]
impl PeerConnection for WebRtcConnection {
    async fn add_stream(&self, stream: &MediaStream) -> Result<(), NativeError> {
        for track in stream.tracks() {
            let mime_type = match track.kind() {
                TrackKind::Audio => MIME_TYPE_OPUS,
                TrackKind::Video => MIME_TYPE_VP8,
            };
            let sample = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime_type.to_owned(),
                    ..Default::default()
                },
                track.id().to_owned(),
                stream.id().to_owned(),
            ));
            let sender = self
                .peer_connection
                .add_track(sample.clone() as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(native)?;

            // Interceptors only see RTCP that somebody reads.
            let track_id = track.id().to_owned();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
                trace!("RTCP reader for {track_id} finished");
            });

            self.local_tracks.insert(
                track.id().to_owned(),
                LocalTrack {
                    generation: self.events.generation(),
                    track: track.clone(),
                    sample,
                },
            );
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NativeError> {
        let offer = self.peer_connection.create_offer(None).await.map_err(native)?;
        Ok(from_rtc(offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NativeError> {
        let answer = self.peer_connection.create_answer(None).await.map_err(native)?;
        Ok(from_rtc(answer))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), NativeError> {
        self.peer_connection
            .set_local_description(to_rtc(description)?)
            .await
            .map_err(native)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), NativeError> {
        self.peer_connection
            .set_remote_description(to_rtc(description)?)
            .await
            .map_err(native)
    }

    async fn add_ice_candidate(&self, candidate: Option<IceCandidateInit>) -> Result<(), NativeError> {
        // An empty candidate string is webrtc-rs' end-of-candidates.
        let init = match candidate {
            Some(candidate) => RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            },
            None => RTCIceCandidateInit::default(),
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(native)
    }

    async fn send_data(&self, data: Bytes) -> Result<(), NativeError> {
        self.data_channel.send(&data).await.map_err(native)?;
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.data_channel.close().await {
            debug!("Data channel close: {e}");
        }
        if let Err(e) = self.peer_connection.close().await {
            warn!("Peer connection close failed: {e}");
        }
        let generation = self.events.generation();
        self.local_tracks
            .retain(|_, local| local.generation != generation);
        self.events.emit(NativeEventKind::DataChannelClosed);
        self.events
            .emit(NativeEventKind::SignalingState(SignalingState::Closed));
        self.events
            .emit(NativeEventKind::IceConnectionState(IceConnectionState::Closed));
        info!("Closed peer connection (generation {})", self.events.generation());
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_samples_follow_track_state() {
        let stack = WebRtcStack::new(Vec::new()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = stack.connect(ConnectionEvents::new(1, tx)).await.unwrap();
        let stream = stack
            .get_user_media(MediaConstraints::new(false, true))
            .await
            .unwrap();
        connection.add_stream(&stream).await.unwrap();

        let track = &stream.tracks()[0];
        let frame = Bytes::from_static(&[0; 10]);
        let duration = Duration::from_millis(20);
        assert!(stack.write_sample(track.id(), frame.clone(), duration).await.unwrap());

        track.set_enabled(false);
        assert!(!stack.write_sample(track.id(), frame.clone(), duration).await.unwrap());
        assert!(stack.write_sample("missing", frame.clone(), duration).await.is_err());

        connection.close().await;
        assert!(stack.write_sample(track.id(), frame, duration).await.is_err());
    }
}
