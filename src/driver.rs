//! Event loop for one conversation.
//!
//! [`ConversationDriver::run`] owns the [`Conversation`] and serializes
//! everything that can touch it: user commands, native media events,
//! signals from the relay and the two timers. Each input is handled to
//! completion before the next one is picked up.

use bytes::Bytes;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::conversation::{Conversation, ConversationError};
use crate::media::{MuteMedia, MuteScope};
use crate::relay::RelayInbox;
use crate::stack::{MediaConstraints, NativeEventReceiver};
use crate::timer;

/// Something the local user asked for.
#[derive(Debug, Clone)]
pub enum Command {
    StartCall { video: bool, audio: bool },
    RestartCall,
    Accept,
    Ignore,
    Hangup,
    Move,
    Hold,
    Resume { video: bool },
    Mute {
        scope: MuteScope,
        media: MuteMedia,
        mute: bool,
    },
    SendMessage(String),
    Typing,
    SendFile { filename: String, data: Bytes },
    Shutdown,
}

#[derive(Debug, Error)]
#[error("conversation driver has stopped")]
pub struct DriverClosed;

/// Sends commands to a running [`ConversationDriver`].
#[derive(Debug, Clone)]
pub struct DriverHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl DriverHandle {
    pub fn send(&self, command: Command) -> Result<(), DriverClosed> {
        self.commands.send(command).map_err(|_| DriverClosed)
    }
}

pub struct ConversationDriver {
    conversation: Conversation,
    native: NativeEventReceiver,
    inbox: RelayInbox,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl ConversationDriver {
    pub fn new(
        conversation: Conversation,
        native: NativeEventReceiver,
        inbox: RelayInbox,
    ) -> (Self, DriverHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Self {
            conversation,
            native,
            inbox,
            commands: rx,
        };
        (driver, DriverHandle { commands: tx })
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Run until [`Command::Shutdown`] or until every handle is dropped,
    /// then close the conversation and hand it back.
    pub async fn run(mut self) -> Conversation {
        info!(
            "Conversation between {} and {} started",
            self.conversation.user(),
            self.conversation.peer()
        );
        loop {
            let offer_deadline = self.conversation.call().offer_deadline();
            let typing_deadline = self.conversation.typing_deadline();

            let result = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.execute(command).await,
                },
                Some(event) = self.native.recv() => {
                    self.conversation.handle_native(event).await
                }
                Some(signal) = self.inbox.recv() => {
                    self.conversation.handle_signal(signal).await
                }
                _ = timer::wait(offer_deadline) => {
                    self.conversation.offer_timeout().await
                }
                _ = timer::wait(typing_deadline) => {
                    self.conversation.typing_timeout();
                    Ok(())
                }
            };

            if let Err(e) = result {
                warn!("[{}] {e}", self.conversation.user());
            }
        }

        debug!("Closing conversation of {}", self.conversation.user());
        if let Err(e) = self.conversation.close().await {
            warn!("Failed to close conversation: {e}");
        }
        self.conversation
    }

    async fn execute(&mut self, command: Command) -> Result<(), ConversationError> {
        debug!("[{}] command: {command:?}", self.conversation.user());
        let conversation = &mut self.conversation;
        match command {
            Command::StartCall { video, audio } => {
                conversation
                    .start_call(MediaConstraints::new(video, audio))
                    .await
            }
            Command::RestartCall => conversation.restart_call().await,
            Command::Accept => conversation.accept_call().await,
            Command::Ignore => conversation.ignore_call(),
            Command::Hangup => conversation.hangup().await,
            Command::Move => {
                conversation.initiate_move();
                Ok(())
            }
            Command::Hold => conversation.hold(),
            Command::Resume { video } => conversation.resume(video),
            Command::Mute { scope, media, mute } => {
                conversation.mute(scope, media, mute);
                Ok(())
            }
            Command::SendMessage(text) => conversation.send_message(text).await,
            Command::Typing => conversation.send_typing().await,
            Command::SendFile { filename, data } => {
                conversation.send_file(filename, data).await.map(|_| ())
            }
            Command::Shutdown => Ok(()),
        }
    }
}
