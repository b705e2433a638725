//! Messages carried on the data channel.
//!
//! Every message is a tnetstring dict `{type, message}`, `type` being one
//! of `chat:message`, `chat:typing`, `file:new`, `file:chunk`, `file:ack`.

use bytes::Bytes;
use thiserror::Error;

use crate::chat::ChatMessage;
use crate::tnetstring::Value;

pub const CHAT_MESSAGE: &str = "chat:message";
pub const CHAT_TYPING: &str = "chat:typing";
pub const FILE_NEW: &str = "file:new";
pub const FILE_CHUNK: &str = "file:chunk";
pub const FILE_ACK: &str = "file:ack";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("message is not a {{type, message}} dict")]
    NotAnEnvelope,
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    #[error("{kind} message is missing field {field:?}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Chat(ChatMessage),
    Typing,
    FileNew { id: String, filename: String, size: u64 },
    FileChunk { id: String, chunk: Bytes },
    FileAck { id: String },
}

impl WireMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Chat(_) => CHAT_MESSAGE,
            WireMessage::Typing => CHAT_TYPING,
            WireMessage::FileNew { .. } => FILE_NEW,
            WireMessage::FileChunk { .. } => FILE_CHUNK,
            WireMessage::FileAck { .. } => FILE_ACK,
        }
    }

    pub fn to_value(&self) -> Value {
        let message = match self {
            WireMessage::Chat(chat) => Value::dict([
                ("sender", Value::from(chat.sender.as_str())),
                ("text", Value::from(chat.text.as_str())),
                ("date", Value::Integer(chat.date_millis())),
            ]),
            WireMessage::Typing => Value::dict::<&str, _>([]),
            WireMessage::FileNew { id, filename, size } => Value::dict([
                ("id", Value::from(id.as_str())),
                ("filename", Value::from(filename.as_str())),
                // Sizes above i64::MAX do not fit a tnetstring integer.
                ("size", Value::Integer(i64::try_from(*size).unwrap_or(i64::MAX))),
            ]),
            WireMessage::FileChunk { id, chunk } => Value::dict([
                ("id", Value::from(id.as_str())),
                ("chunk", Value::Bytes(chunk.clone())),
            ]),
            WireMessage::FileAck { id } => Value::dict([("id", Value::from(id.as_str()))]),
        };
        Value::dict([("type", Value::from(self.kind())), ("message", message)])
    }

    pub fn from_value(value: &Value) -> Result<Self, WireError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(WireError::NotAnEnvelope)?;
        let body = value.get("message").ok_or(WireError::NotAnEnvelope)?;

        match kind {
            CHAT_MESSAGE => {
                let sender = text_field(body, CHAT_MESSAGE, "sender")?;
                let text = text_field(body, CHAT_MESSAGE, "text")?;
                let timestamp = body
                    .get("date")
                    .and_then(Value::as_i64)
                    .and_then(ChatMessage::timestamp_from_millis)
                    .ok_or(WireError::MissingField {
                        kind: CHAT_MESSAGE,
                        field: "date",
                    })?;
                Ok(WireMessage::Chat(ChatMessage::at(sender, text, timestamp)))
            }
            CHAT_TYPING => Ok(WireMessage::Typing),
            FILE_NEW => Ok(WireMessage::FileNew {
                id: text_field(body, FILE_NEW, "id")?,
                filename: text_field(body, FILE_NEW, "filename")?,
                size: body
                    .get("size")
                    .and_then(Value::as_i64)
                    .and_then(|s| u64::try_from(s).ok())
                    .ok_or(WireError::MissingField {
                        kind: FILE_NEW,
                        field: "size",
                    })?,
            }),
            FILE_CHUNK => Ok(WireMessage::FileChunk {
                id: text_field(body, FILE_CHUNK, "id")?,
                chunk: body
                    .get("chunk")
                    .and_then(Value::as_bytes)
                    .cloned()
                    .ok_or(WireError::MissingField {
                        kind: FILE_CHUNK,
                        field: "chunk",
                    })?,
            }),
            FILE_ACK => Ok(WireMessage::FileAck {
                id: text_field(body, FILE_ACK, "id")?,
            }),
            other => Err(WireError::UnknownType(other.to_string())),
        }
    }
}

fn text_field(body: &Value, kind: &'static str, field: &'static str) -> Result<String, WireError> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(WireError::MissingField { kind, field })
}
