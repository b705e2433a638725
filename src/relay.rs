//! Signaling relay.
//!
//! Payloads travel between peers as a JSON `{topic, data}` envelope. The
//! relay only routes by peer id; it never looks inside `data` beyond the
//! `peer` field, which it rewrites to the sender on delivery.

use async_trait::async_trait;
use callcore::{Answer, Hangup, Hold, IceCandidate, Move, MoveAccept, Offer, Resume};
use dashmap::DashMap;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::events::{CallEvents, ChatEvents};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "data", rename_all = "kebab-case")]
pub enum Signal {
    Offer(Offer),
    Answer(Answer),
    Hangup(Hangup),
    IceCandidate(IceCandidate),
    Move(Move),
    MoveAccept(MoveAccept),
    Hold(Hold),
    Resume(Resume),
}

impl Signal {
    pub fn topic(&self) -> &'static str {
        match self {
            Signal::Offer(_) => "offer",
            Signal::Answer(_) => "answer",
            Signal::Hangup(_) => "hangup",
            Signal::IceCandidate(_) => "ice-candidate",
            Signal::Move(_) => "move",
            Signal::MoveAccept(_) => "move-accept",
            Signal::Hold(_) => "hold",
            Signal::Resume(_) => "resume",
        }
    }

    pub fn peer(&self) -> &str {
        match self {
            Signal::Offer(p) => &p.peer,
            Signal::Answer(p) => &p.peer,
            Signal::Hangup(p) => &p.peer,
            Signal::IceCandidate(p) => &p.peer,
            Signal::Move(p) => &p.peer,
            Signal::MoveAccept(p) => &p.peer,
            Signal::Hold(p) => &p.peer,
            Signal::Resume(p) => &p.peer,
        }
    }

    pub fn set_peer(&mut self, peer: impl Into<String>) {
        let slot = match self {
            Signal::Offer(p) => &mut p.peer,
            Signal::Answer(p) => &mut p.peer,
            Signal::Hangup(p) => &mut p.peer,
            Signal::IceCandidate(p) => &mut p.peer,
            Signal::Move(p) => &mut p.peer,
            Signal::MoveAccept(p) => &mut p.peer,
            Signal::Hold(p) => &mut p.peer,
            Signal::Resume(p) => &mut p.peer,
        };
        *slot = peer.into();
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("unknown peer {0}")]
    UnknownPeer(String),
    #[error("connection to {0} is closed")]
    Closed(String),
    #[error("failed to encode signal: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Delivers signals to the peer named in their payload.
#[async_trait]
pub trait SignalRelay: Send + Sync {
    async fn send(&self, signal: Signal) -> Result<(), RelayError>;
}

/// In-process relay keyed by peer id.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    peers: Arc<DashMap<String, mpsc::UnboundedSender<String>>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the relay as `id`. Registering an id again replaces the earlier
    /// inbox.
    pub fn register(&self, id: impl Into<String>) -> (RelayHandle, RelayInbox) {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.insert(id.clone(), tx);
        debug!("Registered {id} on the relay");
        let handle = RelayHandle {
            id,
            relay: self.clone(),
        };
        (handle, RelayInbox { rx })
    }

    pub fn unregister(&self, id: &str) {
        self.peers.remove(id);
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }
}

/// A peer's sending side of a [`MemoryRelay`].
#[derive(Clone)]
pub struct RelayHandle {
    id: String,
    relay: MemoryRelay,
}

impl RelayHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl SignalRelay for RelayHandle {
    async fn send(&self, mut signal: Signal) -> Result<(), RelayError> {
        let target = signal.peer().to_string();
        let sender = self
            .relay
            .peers
            .get(&target)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RelayError::UnknownPeer(target.clone()))?;

        signal.set_peer(self.id.clone());
        let json = serde_json::to_string(&signal)?;
        debug!("--> {} {} -> {}", signal.topic(), self.id, target);
        sender.send(json).map_err(|_| RelayError::Closed(target))
    }
}

/// A peer's receiving side of a [`MemoryRelay`].
pub struct RelayInbox {
    rx: mpsc::UnboundedReceiver<String>,
}

impl RelayInbox {
    /// Next well-formed signal; malformed envelopes are logged and skipped.
    pub async fn recv(&mut self) -> Option<Signal> {
        loop {
            let json = self.rx.recv().await?;
            match serde_json::from_str::<Signal>(&json) {
                Ok(signal) => {
                    debug!("<-- {} from {}", signal.topic(), signal.peer());
                    return Some(signal);
                }
                Err(e) => warn!("Dropping malformed signal: {e}"),
            }
        }
    }
}

/// Pump every outgoing payload event of a conversation into `relay`.
///
/// Subscriptions are taken before this returns, so nothing emitted after
/// the call is missed.
pub fn forward_events(
    call: &CallEvents,
    chat: &ChatEvents,
    relay: Arc<dyn SignalRelay>,
) -> JoinHandle<()> {
    let streams = vec![
        signals(call.send_offer.subscribe(), Signal::Offer),
        signals(call.send_answer.subscribe(), Signal::Answer),
        signals(call.send_hangup.subscribe(), Signal::Hangup),
        signals(call.send_timeout.subscribe(), Signal::Hangup),
        signals(call.initiate_move.subscribe(), Signal::Move),
        signals(chat.send_offer.subscribe(), Signal::Offer),
        signals(chat.send_answer.subscribe(), Signal::Answer),
        signals(chat.send_ice_candidate.subscribe(), Signal::IceCandidate),
    ];
    let mut outgoing = stream::select_all(streams);

    tokio::spawn(async move {
        while let Some(signal) = outgoing.next().await {
            if let Err(e) = relay.send(signal).await {
                warn!("Failed to relay signal: {e}");
            }
        }
        debug!("Signal forwarder stopped");
    })
}

fn signals<T>(
    rx: broadcast::Receiver<T>,
    wrap: fn(T) -> Signal,
) -> BoxStream<'static, Signal>
where
    T: Clone + Send + 'static,
{
    stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(value) => return Some((wrap(value), rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Signal forwarder lagged, {skipped} signals lost");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}
