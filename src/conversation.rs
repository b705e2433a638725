//! One conversation with one peer: chat, typing, file transfers and calls
//! over a single media session.
//!
//! The conversation owns the [`MediaSession`] and lends it to the current
//! [`CallSession`]. Chat needs only the data channel, so sending a message
//! or a file without a call opens a data-only connection; a call started
//! later upgrades that connection in place.

use bytes::Bytes;
use callcore::{
    Answer, CallState, ChatMessage, IceCandidate, Media, MediaState, Offer, TransferError,
    TransferSession, TransferSummary, WireError, WireMessage,
};
use log::{debug, info, trace, warn};
use std::sync::Arc;
use thiserror::Error;

use crate::call::{CallError, CallSession};
use crate::config::{CallConfig, TYPING_TIMEOUT};
use crate::events::{CallEvents, ChatEvents, TransferComplete};
use crate::media::{MediaError, MediaSession, MediaSignal, MuteMedia, MuteScope};
use crate::relay::Signal;
use crate::stack::{MediaConstraints, NativeEvent, NativeEventReceiver, RtcStack};
use crate::timer::Timer;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error(transparent)]
    Call(#[from] CallError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("malformed data channel message: {0}")]
    Wire(#[from] WireError),
    #[error("unknown transfer {0}")]
    UnknownTransfer(String),
    #[error("protocol error: {0}")]
    Protocol(&'static str),
}

pub struct Conversation {
    user: String,
    peer: String,
    config: CallConfig,
    media: MediaSession,
    call: CallSession,
    call_events: Arc<CallEvents>,
    history: Vec<ChatMessage>,
    transfers: Vec<TransferSession>,
    peer_typing: bool,
    typing_timer: Timer,
    events: Arc<ChatEvents>,
}

impl Conversation {
    pub fn new(
        user: impl Into<String>,
        peer: impl Into<String>,
        config: CallConfig,
        stack: Arc<dyn RtcStack>,
    ) -> (Self, NativeEventReceiver) {
        let peer = peer.into();
        let (media, native) = MediaSession::new(stack, config.force_fake_media);
        let call_events = Arc::new(CallEvents::new());
        let call = CallSession::new(peer.clone(), &config, call_events.clone());
        let conversation = Self {
            user: user.into(),
            peer,
            config,
            media,
            call,
            call_events,
            history: Vec::new(),
            transfers: Vec::new(),
            peer_typing: false,
            typing_timer: Timer::new(TYPING_TIMEOUT),
            events: Arc::new(ChatEvents::new()),
        };
        (conversation, native)
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    pub fn call(&self) -> &CallSession {
        &self.call
    }

    pub fn media(&self) -> &MediaSession {
        &self.media
    }

    pub fn events(&self) -> &Arc<ChatEvents> {
        &self.events
    }

    pub fn call_events(&self) -> &Arc<CallEvents> {
        &self.call_events
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn transfers(&self) -> Vec<TransferSummary> {
        self.transfers.iter().map(TransferSession::summary).collect()
    }

    pub fn is_peer_typing(&self) -> bool {
        self.peer_typing
    }

    pub fn typing_deadline(&self) -> Option<tokio::time::Instant> {
        self.typing_timer.deadline()
    }

    // Calls

    pub async fn start_call(&mut self, constraints: MediaConstraints) -> Result<(), ConversationError> {
        self.renew_call();
        let signals = self.call.start(&mut self.media, constraints).await?;
        self.route(signals).await
    }

    pub async fn restart_call(&mut self) -> Result<(), ConversationError> {
        let signals = self.call.restart(&mut self.media).await?;
        self.route(signals).await
    }

    pub async fn accept_call(&mut self) -> Result<(), ConversationError> {
        let signals = self.call.accept(&mut self.media).await?;
        self.route(signals).await
    }

    pub fn ignore_call(&mut self) -> Result<(), ConversationError> {
        Ok(self.call.ignore()?)
    }

    pub async fn hangup(&mut self) -> Result<(), ConversationError> {
        Ok(self.call.hangup(&mut self.media, true).await?)
    }

    pub fn initiate_move(&self) {
        self.call.initiate_move();
    }

    pub fn hold(&mut self) -> Result<(), ConversationError> {
        Ok(self.call.hold(&self.media)?)
    }

    pub fn resume(&mut self, video: bool) -> Result<(), ConversationError> {
        Ok(self.call.resume(&self.media, video)?)
    }

    pub fn mute(&self, scope: MuteScope, media: MuteMedia, mute: bool) {
        self.media.set_mute_state(scope, media, mute);
    }

    /// The outgoing offer expired.
    pub async fn offer_timeout(&mut self) -> Result<(), ConversationError> {
        Ok(self.call.timeout(&mut self.media).await?)
    }

    // Chat

    pub async fn send_message(&mut self, text: impl Into<String>) -> Result<(), ConversationError> {
        let message = ChatMessage::new(self.user.clone(), text);
        self.ensure_connection().await?;
        self.media
            .send(&WireMessage::Chat(message.clone()).to_value())
            .await?;
        self.history.push(message.clone());
        let _ = self.events.chat_message.send(message);
        Ok(())
    }

    /// Tell the peer we are typing. Does nothing without a connection.
    pub async fn send_typing(&mut self) -> Result<(), ConversationError> {
        if matches!(self.media.state(), MediaState::Ready | MediaState::Terminated) {
            trace!("No connection, not sending typing notification");
            return Ok(());
        }
        Ok(self.media.send(&WireMessage::Typing.to_value()).await?)
    }

    /// The typing indicator expired.
    pub fn typing_timeout(&mut self) {
        self.set_peer_typing(false);
    }

    /// Offer a file to the peer and send its first chunk. The rest follows
    /// one chunk per acknowledgement.
    pub async fn send_file(
        &mut self,
        filename: impl Into<String>,
        data: Bytes,
    ) -> Result<TransferSummary, ConversationError> {
        let mut transfer =
            TransferSession::outgoing(filename, data, self.config.file_chunk_size)?;
        info!(
            "Sending {} ({} bytes) to {}",
            transfer.filename(),
            transfer.size(),
            self.peer
        );
        self.ensure_connection().await?;
        self.media
            .send(
                &WireMessage::FileNew {
                    id: transfer.id().to_string(),
                    filename: transfer.filename().to_string(),
                    size: transfer.size(),
                }
                .to_value(),
            )
            .await?;
        let _ = self.events.transfer_started.send(transfer.summary());

        let step = transfer.next_chunk()?;
        let id = transfer.id().to_string();
        self.transfers.push(transfer);
        self.send_chunk(id, step).await
    }

    // Inbound

    /// Handle a signal the relay delivered from the peer.
    pub async fn handle_signal(&mut self, signal: Signal) -> Result<(), ConversationError> {
        match signal {
            Signal::Offer(offer) if is_data_only(&offer) => {
                debug!("Data channel offer from {}", self.peer);
                let signals = self.media.answer(offer.offer).await?;
                self.route(signals).await?;
            }
            Signal::Offer(offer) => {
                self.renew_call();
                self.call.incoming(offer)?;
            }
            Signal::Answer(answer) => {
                let data_only = answer
                    .answer
                    .as_ref()
                    .is_some_and(|a| a.sdp().only(&[Media::Datachannel]));
                let signals = if data_only && self.call.state() != CallState::Pending {
                    let Some(description) = answer.answer else {
                        return Err(ConversationError::Protocol("answer payload carries no answer"));
                    };
                    self.media.establish(description).await?
                } else {
                    self.call.establish(&mut self.media, answer).await?
                };
                self.route(signals).await?;
            }
            Signal::Hangup(hangup) => {
                if hangup.call_id == self.call.call_id() {
                    self.call.hangup(&mut self.media, false).await?;
                } else {
                    debug!("Ignoring hangup for call {}", hangup.call_id);
                }
            }
            Signal::MoveAccept(accept) => {
                if accept.call_id == self.call.call_id() {
                    info!("Call {} moved to another device", accept.call_id);
                    self.call.hangup(&mut self.media, false).await?;
                }
            }
            Signal::IceCandidate(candidate) => {
                self.media.add_ice_candidate(candidate.candidate).await?;
            }
            Signal::Hold(hold) => {
                if hold.call_id == self.call.call_id() {
                    self.call.hold(&self.media)?;
                }
            }
            Signal::Resume(resume) => {
                if resume.call_id == self.call.call_id() {
                    self.call.resume(&self.media, resume.media.video)?;
                }
            }
            Signal::Move(request) => {
                debug!("Ignoring move request for call {}", request.call_id);
            }
        }
        Ok(())
    }

    /// Handle a notification from the media stack.
    pub async fn handle_native(&mut self, event: NativeEvent) -> Result<(), ConversationError> {
        let signals = self.media.handle_native(event).await?;
        self.route(signals).await
    }

    /// Hang up and drop the connection.
    pub async fn close(&mut self) -> Result<(), ConversationError> {
        self.call.hangup(&mut self.media, true).await?;
        if matches!(self.media.state(), MediaState::Pending | MediaState::Ongoing) {
            self.media.terminate().await;
        }
        Ok(())
    }

    async fn route(&mut self, signals: Vec<MediaSignal>) -> Result<(), ConversationError> {
        for signal in self.call.process(signals)? {
            match signal {
                MediaSignal::OfferReady(offer) => {
                    let _ = self.events.send_offer.send(Offer {
                        peer: self.peer.clone(),
                        offer,
                        call_id: self.call.call_id(),
                        upgrade: false,
                    });
                }
                MediaSignal::AnswerReady(answer) => {
                    let _ = self
                        .events
                        .send_answer
                        .send(Answer::new(self.peer.clone(), answer));
                }
                MediaSignal::IceCandidateReady(candidate) => {
                    let _ = self.events.send_ice_candidate.send(IceCandidate {
                        peer: self.peer.clone(),
                        candidate,
                    });
                }
                MediaSignal::DataMessage(value) => {
                    let result = match WireMessage::from_value(&value) {
                        Ok(message) => self.handle_wire(message).await,
                        Err(e) => Err(e.into()),
                    };
                    // One bad message must not stop the rest of the batch.
                    if let Err(e) = result {
                        warn!("Dropping data channel message from {}: {e}", self.peer);
                        let _ = self.events.error.send(e.to_string());
                    }
                }
                MediaSignal::DataChannelClosed
                    if self.call.state().is_idle()
                        && self.media.state() == MediaState::Ongoing
                        && !self.media.is_upgrading() =>
                {
                    info!("{} closed the data channel", self.peer);
                    self.media.terminate().await;
                }
                other => trace!("Media signal: {other:?}"),
            }
        }
        Ok(())
    }

    async fn handle_wire(&mut self, message: WireMessage) -> Result<(), ConversationError> {
        match message {
            WireMessage::Chat(message) => {
                self.set_peer_typing(false);
                self.history.push(message.clone());
                let _ = self.events.chat_message.send(message);
            }
            WireMessage::Typing => {
                self.set_peer_typing(true);
                self.typing_timer.arm();
            }
            WireMessage::FileNew { id, filename, size } => {
                info!("Receiving {filename} ({size} bytes) from {}", self.peer);
                let transfer = TransferSession::incoming(id, filename, size);
                let _ = self.events.transfer_started.send(transfer.summary());
                self.transfers.push(transfer);
            }
            WireMessage::FileChunk { id, chunk } => {
                let index = self.transfer_index(&id)?;
                let step = match self.transfers[index].append(chunk) {
                    Ok(step) => step,
                    Err(e) => {
                        let aborted = self.transfers.remove(index);
                        debug!("Aborted transfer of {}", aborted.filename());
                        return Err(e.into());
                    }
                };
                let summary = self.transfers[index].summary();
                let _ = self.events.transfer_progress.send(summary.clone());
                if let Some(data) = step.completed {
                    self.transfers.remove(index);
                    let _ = self
                        .events
                        .transfer_complete
                        .send(TransferComplete { summary, data });
                }
                self.media
                    .send(&WireMessage::FileAck { id }.to_value())
                    .await?;
            }
            WireMessage::FileAck { id } => {
                let index = self.transfer_index(&id)?;
                if self.transfers[index].is_done() {
                    trace!("Transfer {id} acknowledged to completion");
                    self.transfers.remove(index);
                    return Ok(());
                }
                let step = self.transfers[index].next_chunk()?;
                self.send_chunk(id, step).await?;
            }
        }
        Ok(())
    }

    async fn send_chunk(
        &mut self,
        id: String,
        step: callcore::TransferStep,
    ) -> Result<TransferSummary, ConversationError> {
        let index = self.transfer_index(&id)?;
        let summary = self.transfers[index].summary();
        self.media
            .send(
                &WireMessage::FileChunk {
                    id,
                    chunk: step.chunk,
                }
                .to_value(),
            )
            .await?;
        let _ = self.events.transfer_progress.send(summary.clone());
        if let Some(data) = step.completed {
            let _ = self.events.transfer_complete.send(TransferComplete {
                summary: summary.clone(),
                data,
            });
        }
        Ok(summary)
    }

    fn transfer_index(&self, id: &str) -> Result<usize, ConversationError> {
        self.transfers
            .iter()
            .position(|t| t.id() == id)
            .ok_or_else(|| ConversationError::UnknownTransfer(id.to_string()))
    }

    /// Open a data-only connection when there is none.
    async fn ensure_connection(&mut self) -> Result<(), ConversationError> {
        if self.media.is_upgrading() {
            return Ok(());
        }
        match self.media.state() {
            MediaState::Ready => {}
            MediaState::Terminated => self.media.reset()?,
            _ => return Ok(()),
        }
        info!("Opening data channel to {}", self.peer);
        let signals = self.media.initiate(MediaConstraints::data_only()).await?;
        self.route(signals).await
    }

    fn set_peer_typing(&mut self, typing: bool) {
        if !typing {
            self.typing_timer.clear();
        }
        if self.peer_typing != typing {
            self.peer_typing = typing;
            let _ = self.events.peer_typing.send(typing);
        }
    }

    /// A finished call cannot be reused; replace it, keeping its event bus.
    fn renew_call(&mut self) {
        if self.call.state().is_terminated() {
            self.call = CallSession::new(self.peer.clone(), &self.config, self.call_events.clone());
        }
    }
}

fn is_data_only(offer: &Offer) -> bool {
    offer.offer.sdp().only(&[Media::Datachannel])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{FakeStack, NativeEventKind};
    use callcore::{CallId, Hangup, SessionDescription, Value};

    fn conversation() -> (Conversation, NativeEventReceiver, Arc<FakeStack>) {
        let stack = FakeStack::new();
        let (conversation, native) =
            Conversation::new("alice", "bob", CallConfig::default(), stack.clone());
        (conversation, native, stack)
    }

    async fn pump(conversation: &mut Conversation, native: &mut NativeEventReceiver) {
        while let Ok(event) = native.try_recv() {
            conversation.handle_native(event).await.unwrap();
        }
    }

    fn incoming(value: Value) -> NativeEventKind {
        NativeEventKind::DataChannelMessage(callcore::tnetstring::encode(&value))
    }

    #[tokio::test]
    async fn test_send_message_opens_data_channel() {
        let (mut c, mut native, stack) = conversation();
        let mut offers = c.events().send_offer.subscribe();

        c.send_message("hi").await.unwrap();
        let offer = offers.try_recv().unwrap();
        assert!(is_data_only(&offer));
        assert_eq!(c.call().state(), CallState::Ready);
        assert!(stack.sent_data().is_empty());

        stack.emit(NativeEventKind::DataChannelOpen);
        pump(&mut c, &mut native).await;
        let sent = stack.sent_data();
        assert_eq!(sent.len(), 1);
        let value = callcore::tnetstring::decode(&sent[0]).unwrap();
        let WireMessage::Chat(message) = WireMessage::from_value(&value).unwrap() else {
            panic!("expected a chat message");
        };
        assert_eq!(message.sender, "alice");
        assert_eq!(message.text, "hi");
        assert_eq!(c.history().len(), 1);
    }

    #[tokio::test]
    async fn test_typing_not_sent_without_connection() {
        let (mut c, _native, stack) = conversation();
        c.send_typing().await.unwrap();
        assert!(stack.ops().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_typing_indicator() {
        let (mut c, mut native, stack) = conversation();
        let mut typing = c.events().peer_typing.subscribe();
        c.send_message("hi").await.unwrap();

        stack.emit(incoming(WireMessage::Typing.to_value()));
        pump(&mut c, &mut native).await;
        assert!(c.is_peer_typing());
        assert!(typing.try_recv().unwrap());

        crate::timer::wait(c.typing_deadline()).await;
        c.typing_timeout();
        assert!(!c.is_peer_typing());
        assert!(!typing.try_recv().unwrap());
        assert!(c.typing_deadline().is_none());
    }

    #[tokio::test]
    async fn test_chat_message_clears_typing() {
        let (mut c, mut native, stack) = conversation();
        c.send_message("hi").await.unwrap();
        stack.emit(incoming(WireMessage::Typing.to_value()));
        stack.emit(incoming(
            WireMessage::Chat(ChatMessage::new("bob", "hello")).to_value(),
        ));
        pump(&mut c, &mut native).await;
        assert!(!c.is_peer_typing());
        assert_eq!(c.history().last().unwrap().text, "hello");
    }

    #[tokio::test]
    async fn test_receive_file_acks_each_chunk() {
        let (mut c, mut native, stack) = conversation();
        let mut complete = c.events().transfer_complete.subscribe();
        c.send_message("hi").await.unwrap();
        stack.emit(NativeEventKind::DataChannelOpen);
        pump(&mut c, &mut native).await;

        stack.emit(incoming(
            WireMessage::FileNew {
                id: "t1".into(),
                filename: "notes.txt".into(),
                size: 7,
            }
            .to_value(),
        ));
        for part in ["con", "ten", "t"] {
            stack.emit(incoming(
                WireMessage::FileChunk {
                    id: "t1".into(),
                    chunk: Bytes::from(part),
                }
                .to_value(),
            ));
        }
        pump(&mut c, &mut native).await;

        let acks = stack
            .sent_data()
            .iter()
            .filter_map(|frame| callcore::tnetstring::decode(frame).ok())
            .filter(|value| matches!(WireMessage::from_value(value), Ok(WireMessage::FileAck { .. })))
            .count();
        assert_eq!(acks, 3);

        let done = complete.try_recv().unwrap();
        assert_eq!(done.data, "content");
        assert_eq!(done.summary.progress, 100);
        assert!(done.summary.incoming);
        assert!(c.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_chunk_aborts_transfer() {
        let (mut c, mut native, stack) = conversation();
        let mut errors = c.events().error.subscribe();
        c.send_message("hi").await.unwrap();
        stack.emit(NativeEventKind::DataChannelOpen);
        stack.emit(incoming(
            WireMessage::FileNew {
                id: "t1".into(),
                filename: "tiny".into(),
                size: 2,
            }
            .to_value(),
        ));
        stack.emit(incoming(
            WireMessage::FileChunk {
                id: "t1".into(),
                chunk: Bytes::from_static(b"abc"),
            }
            .to_value(),
        ));
        pump(&mut c, &mut native).await;

        assert_eq!(errors.try_recv().unwrap(), "Received more data than expected");
        assert!(c.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_bad_peer_messages_are_reported() {
        let (mut c, mut native, stack) = conversation();
        let mut errors = c.events().error.subscribe();
        let mut chat = c.events().chat_message.subscribe();
        c.send_message("hi").await.unwrap();
        stack.emit(NativeEventKind::DataChannelOpen);
        pump(&mut c, &mut native).await;
        let _ = chat.try_recv();

        stack.emit(incoming(
            WireMessage::FileNew {
                id: "in".into(),
                filename: "notes.txt".into(),
                size: 10,
            }
            .to_value(),
        ));
        // Acking a transfer we receive, a chunk nobody announced, and junk.
        stack.emit(incoming(WireMessage::FileAck { id: "in".into() }.to_value()));
        stack.emit(incoming(
            WireMessage::FileChunk {
                id: "nope".into(),
                chunk: Bytes::from_static(b"x"),
            }
            .to_value(),
        ));
        stack.emit(incoming(Value::Bytes(Bytes::from_static(b"junk"))));
        stack.emit(incoming(
            WireMessage::Chat(ChatMessage::new("bob", "still here")).to_value(),
        ));
        pump(&mut c, &mut native).await;

        assert_eq!(errors.try_recv().unwrap(), "transfer in is not sending");
        assert_eq!(errors.try_recv().unwrap(), "unknown transfer nope");
        assert!(errors.try_recv().is_ok());
        assert_eq!(chat.try_recv().unwrap().text, "still here");
        assert_eq!(c.transfers().len(), 1);
    }

    #[tokio::test]
    async fn test_send_file_waits_for_ack() {
        let config = CallConfig {
            file_chunk_size: 3,
            ..CallConfig::default()
        };
        let stack = FakeStack::new();
        let (mut c, mut native) = Conversation::new("alice", "bob", config, stack.clone());
        c.send_message("hi").await.unwrap();
        stack.emit(NativeEventKind::DataChannelOpen);
        pump(&mut c, &mut native).await;

        let summary = c.send_file("notes.txt", Bytes::from_static(b"content")).await.unwrap();
        let chunks = |stack: &FakeStack| {
            stack
                .sent_data()
                .iter()
                .filter_map(|frame| callcore::tnetstring::decode(frame).ok())
                .filter_map(|value| match WireMessage::from_value(&value) {
                    Ok(WireMessage::FileChunk { chunk, .. }) => Some(chunk),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(chunks(&stack), vec!["con"]);

        for _ in 0..2 {
            c.handle_wire(WireMessage::FileAck {
                id: summary.id.clone(),
            })
            .await
            .unwrap();
        }
        assert_eq!(chunks(&stack), vec!["con", "ten", "t"]);
        assert_eq!(c.transfers()[0].progress, 100);

        // The ack for the last chunk retires the transfer.
        c.handle_wire(WireMessage::FileAck {
            id: summary.id.clone(),
        })
        .await
        .unwrap();
        assert_eq!(chunks(&stack).len(), 3);
        assert!(c.transfers().is_empty());
        assert!(matches!(
            c.handle_wire(WireMessage::FileAck { id: summary.id }).await,
            Err(ConversationError::UnknownTransfer(_))
        ));
    }

    #[tokio::test]
    async fn test_media_offer_rings_the_call() {
        let (mut c, _native, stack) = conversation();
        c.handle_signal(Signal::Offer(Offer {
            peer: "bob".into(),
            offer: SessionDescription::offer("v=0\r\nm=audio 9 x\r\nwebrtc-datachannel"),
            call_id: CallId::new(77),
            upgrade: false,
        }))
        .await
        .unwrap();
        assert_eq!(c.call().state(), CallState::Incoming);
        assert_eq!(c.call().call_id(), CallId::new(77));
        assert!(stack.ops().is_empty());
    }

    #[tokio::test]
    async fn test_data_offer_is_answered_directly() {
        let (mut c, _native, _stack) = conversation();
        let mut answers = c.events().send_answer.subscribe();
        c.handle_signal(Signal::Offer(Offer {
            peer: "bob".into(),
            offer: SessionDescription::offer("v=0\r\nwebrtc-datachannel"),
            call_id: CallId::new(1),
            upgrade: false,
        }))
        .await
        .unwrap();
        assert!(answers.try_recv().is_ok());
        assert_eq!(c.call().state(), CallState::Ready);
        assert_eq!(c.media().state(), MediaState::Ongoing);
    }

    #[tokio::test]
    async fn test_hangup_for_other_call_is_ignored() {
        let (mut c, _native, _stack) = conversation();
        c.start_call(MediaConstraints::new(false, true)).await.unwrap();
        let other = CallId::new(c.call().call_id().get().wrapping_add(1));
        c.handle_signal(Signal::Hangup(Hangup {
            peer: "bob".into(),
            call_id: other,
        }))
        .await
        .unwrap();
        assert_eq!(c.call().state(), CallState::Pending);

        let current = c.call().call_id();
        c.handle_signal(Signal::Hangup(Hangup {
            peer: "bob".into(),
            call_id: current,
        }))
        .await
        .unwrap();
        assert_eq!(c.call().state(), CallState::Terminated);
    }

    #[tokio::test]
    async fn test_call_rejected_while_chat_connection_pending() {
        let (mut c, _native, _stack) = conversation();
        let mut offers = c.call_events().send_offer.subscribe();
        c.send_message("hi").await.unwrap();
        assert_eq!(c.media().state(), MediaState::Pending);

        assert!(c.start_call(MediaConstraints::new(false, true)).await.is_err());
        assert_eq!(c.call().state(), CallState::Ready);
        assert!(c.call().offer_deadline().is_none());
        assert!(offers.try_recv().is_err());

        // Once the chat connection is up the call upgrades it.
        c.handle_signal(Signal::Answer(Answer::new(
            "bob",
            SessionDescription::answer("v=0\r\nwebrtc-datachannel"),
        )))
        .await
        .unwrap();
        assert_eq!(c.media().state(), MediaState::Ongoing);
        c.start_call(MediaConstraints::new(false, true)).await.unwrap();
        assert_eq!(c.call().state(), CallState::Pending);
        assert!(c.media().is_upgrading());
    }

    #[tokio::test]
    async fn test_new_call_after_hangup() {
        let (mut c, _native, _stack) = conversation();
        c.start_call(MediaConstraints::new(false, true)).await.unwrap();
        c.hangup().await.unwrap();
        assert_eq!(c.call().state(), CallState::Terminated);

        c.start_call(MediaConstraints::new(false, true)).await.unwrap();
        assert_eq!(c.call().state(), CallState::Pending);
        assert_eq!(c.media().state(), MediaState::Pending);
    }
}
