use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// A text line exchanged over the data channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::at(sender, text, Utc::now())
    }

    pub fn at(sender: impl Into<String>, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp,
        }
    }

    /// Milliseconds since the epoch, as carried in the `date` field.
    pub fn date_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    pub fn timestamp_from_millis(millis: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(millis).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_millis_roundtrip() {
        let ts = ChatMessage::timestamp_from_millis(1_400_000_000_123).unwrap();
        let message = ChatMessage::at("alice", "hi", ts);
        assert_eq!(message.date_millis(), 1_400_000_000_123);
        assert_eq!(message.sender, "alice");
    }
}
