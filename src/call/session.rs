use callcore::{
    Answer, CallId, CallState, CallTransition, Hangup, MediaState, MediaTransition, Move, Offer,
};
use log::{debug, info};
use std::sync::Arc;

use super::CallError;
use crate::config::CallConfig;
use crate::events::{CallEvents, CallStateChange};
use crate::media::{MediaError, MediaSession, MediaSignal, MuteMedia, MuteScope};
use crate::stack::MediaConstraints;
use crate::timer::Timer;

/// One call with one peer.
pub struct CallSession {
    peer: String,
    call_id: CallId,
    state: CallState,
    constraints: MediaConstraints,
    incoming: Option<Offer>,
    capabilities: Vec<String>,
    upgrading: bool,
    offer_timer: Timer,
    events: Arc<CallEvents>,
}

impl CallSession {
    pub fn new(peer: impl Into<String>, config: &CallConfig, events: Arc<CallEvents>) -> Self {
        Self {
            peer: peer.into(),
            call_id: CallId::generate(),
            state: CallState::Ready,
            constraints: MediaConstraints::default(),
            incoming: None,
            capabilities: config.capabilities.clone(),
            upgrading: false,
            offer_timer: Timer::new(config.offer_timeout()),
            events,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn constraints(&self) -> MediaConstraints {
        self.constraints
    }

    pub fn events(&self) -> &Arc<CallEvents> {
        &self.events
    }

    pub fn requires_video(&self) -> bool {
        self.constraints.video
    }

    /// True when every capability in `capabilities` was advertised.
    pub fn supports(&self, capabilities: &[&str]) -> bool {
        capabilities
            .iter()
            .all(|wanted| self.capabilities.iter().any(|c| c == wanted))
    }

    /// When the unanswered outgoing offer expires, if one is pending.
    pub fn offer_deadline(&self) -> Option<tokio::time::Instant> {
        self.offer_timer.deadline()
    }

    /// Place an outgoing call. A live media connection is upgraded instead of
    /// being replaced.
    pub async fn start(
        &mut self,
        media: &mut MediaSession,
        constraints: MediaConstraints,
    ) -> Result<Vec<MediaSignal>, CallError> {
        self.state.transition(CallTransition::Start)?;
        check_media(media, MediaTransition::Initiate)?;
        self.apply(CallTransition::Start)?;
        self.call_id = CallId::generate();
        self.constraints = constraints;
        self.incoming = None;
        self.offer_timer.arm();
        info!(
            "Calling {} (call {}, video={}, audio={})",
            self.peer, self.call_id, constraints.video, constraints.audio
        );

        let signals = if media.state() == MediaState::Ongoing {
            self.upgrading = true;
            media.upgrade(Some(constraints), None).await?
        } else {
            if media.state() == MediaState::Terminated {
                media.reset()?;
            }
            media.initiate(constraints).await?
        };
        self.process(signals)
    }

    /// Call again with the constraints of the previous attempt.
    pub async fn restart(
        &mut self,
        media: &mut MediaSession,
    ) -> Result<Vec<MediaSignal>, CallError> {
        let constraints = self.constraints;
        self.start(media, constraints).await
    }

    /// Register an offer from the peer; the call rings until accepted or
    /// ignored.
    pub fn incoming(&mut self, offer: Offer) -> Result<(), CallError> {
        self.apply(CallTransition::Incoming)?;
        self.call_id = offer.call_id;
        self.constraints = offer.offer.constraints().into();
        info!(
            "Incoming call {} from {} (video={}, audio={})",
            self.call_id, self.peer, self.constraints.video, self.constraints.audio
        );
        self.incoming = Some(offer);
        Ok(())
    }

    pub async fn accept(
        &mut self,
        media: &mut MediaSession,
    ) -> Result<Vec<MediaSignal>, CallError> {
        self.state.transition(CallTransition::Accept)?;
        let offer = self
            .incoming
            .as_ref()
            .map(|incoming| incoming.offer.clone())
            .ok_or(CallError::Protocol("no incoming offer to accept"))?;
        check_media(media, MediaTransition::Answer)?;
        self.apply(CallTransition::Accept)?;

        let signals = if media.state() == MediaState::Ongoing {
            self.upgrading = true;
            media.upgrade(None, Some(offer)).await?
        } else {
            if media.state() == MediaState::Terminated {
                media.reset()?;
            }
            media.answer(offer).await?
        };
        self.process(signals)
    }

    pub fn ignore(&mut self) -> Result<(), CallError> {
        self.apply(CallTransition::Ignore)?;
        self.incoming = None;
        Ok(())
    }

    /// Apply the peer's answer. The call completes when media reports the
    /// connection established.
    pub async fn establish(
        &mut self,
        media: &mut MediaSession,
        answer: Answer,
    ) -> Result<Vec<MediaSignal>, CallError> {
        let Some(description) = answer.answer else {
            return Err(CallError::Protocol("answer payload carries no answer"));
        };
        self.state.transition(CallTransition::Complete)?;
        let signals = media.establish(description).await?;
        self.process(signals)
    }

    /// Consume the media signals that drive a pending call and hand back the
    /// rest.
    pub fn process(&mut self, signals: Vec<MediaSignal>) -> Result<Vec<MediaSignal>, CallError> {
        let mut rest = Vec::new();
        for signal in signals {
            if self.state != CallState::Pending {
                rest.push(signal);
                continue;
            }
            match signal {
                MediaSignal::OfferReady(offer) => {
                    let _ = self.events.send_offer.send(Offer {
                        peer: self.peer.clone(),
                        offer,
                        call_id: self.call_id,
                        upgrade: self.upgrading,
                    });
                }
                MediaSignal::AnswerReady(answer) => {
                    let _ = self
                        .events
                        .send_answer
                        .send(Answer::new(self.peer.clone(), answer));
                    // The answering side never sees establish.
                    self.apply(CallTransition::Complete)?;
                }
                MediaSignal::ConnectionEstablished => {
                    self.apply(CallTransition::Complete)?;
                }
                other => rest.push(other),
            }
        }
        Ok(rest)
    }

    /// The outgoing offer went unanswered.
    pub async fn timeout(&mut self, media: &mut MediaSession) -> Result<(), CallError> {
        self.apply(CallTransition::Timeout)?;
        info!("Call {} to {} timed out", self.call_id, self.peer);
        media.terminate().await;
        media.reset()?;
        let _ = self.events.send_timeout.send(self.hangup_payload());
        Ok(())
    }

    /// End the call. Nothing happens when there is no call to end.
    pub async fn hangup(
        &mut self,
        media: &mut MediaSession,
        send_message: bool,
    ) -> Result<(), CallError> {
        if self.state.is_idle() {
            debug!("Ignoring hangup in state {}", self.state);
            return Ok(());
        }
        self.apply(CallTransition::Hangup)?;
        info!("Call {} with {} ended", self.call_id, self.peer);
        media.terminate().await;
        if send_message {
            let _ = self.events.send_hangup.send(self.hangup_payload());
        }
        Ok(())
    }

    /// Ask the peer's other devices to pick up this call.
    pub fn initiate_move(&self) {
        let _ = self.events.initiate_move.send(Move {
            peer: self.peer.clone(),
            call_id: self.call_id,
        });
    }

    pub fn hold(&mut self, media: &MediaSession) -> Result<(), CallError> {
        self.apply(CallTransition::Hold)?;
        media.set_mute_state(MuteScope::Local, MuteMedia::Both, true);
        Ok(())
    }

    /// Take the call off hold. Video comes back only for a video call and
    /// only when `enable_video` is set; otherwise the call continues as
    /// audio only.
    pub fn resume(&mut self, media: &MediaSession, enable_video: bool) -> Result<(), CallError> {
        if self.state != CallState::Hold {
            return Err(CallError::Protocol("only a call on hold can be resumed"));
        }
        self.apply(CallTransition::Resume)?;
        media.set_mute_state(MuteScope::Local, MuteMedia::Audio, false);
        if self.constraints.video && enable_video {
            media.set_mute_state(MuteScope::Local, MuteMedia::Video, false);
        } else {
            self.constraints.video = false;
        }
        Ok(())
    }

    fn hangup_payload(&self) -> Hangup {
        Hangup {
            peer: self.peer.clone(),
            call_id: self.call_id,
        }
    }

    fn apply(&mut self, transition: CallTransition) -> Result<(), CallError> {
        let from = self.state;
        let to = from.transition(transition)?;
        self.state = to;
        if to != CallState::Pending {
            self.offer_timer.clear();
            self.upgrading = false;
        }
        debug!("Call state {from} -> {to} ({transition})");
        let _ = self.events.state_changed.send(CallStateChange {
            from,
            to,
            transition,
        });
        Ok(())
    }
}

/// A call only moves once media can take the negotiation: a live connection
/// is upgraded, a terminated one reset, anything else must accept
/// `transition` as is.
fn check_media(media: &MediaSession, transition: MediaTransition) -> Result<(), CallError> {
    match media.state() {
        MediaState::Ongoing | MediaState::Terminated => Ok(()),
        state => {
            state.transition(transition).map_err(MediaError::from)?;
            Ok(())
        }
    }
}
