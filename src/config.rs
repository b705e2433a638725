use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// How long the "peer is typing" indicator stays up without news.
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Largest accepted chunk size, leaving room for the file:chunk envelope.
pub const MAX_FILE_CHUNK_SIZE: usize = callcore::tnetstring::DEFAULT_MAX_FRAME - 1024;

/// Configuration for a conversation and its call.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Seconds an outgoing offer may stay unanswered.
    pub offer_timeout_secs: u64,
    /// Bytes per `file:chunk` message.
    pub file_chunk_size: usize,
    /// Ask the media stack for synthetic tracks instead of devices.
    pub force_fake_media: bool,
    /// Capabilities advertised for the peer, queried with `supports`.
    pub capabilities: Vec<String>,
}

impl std::fmt::Debug for CallConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallConfig")
            .field("offer_timeout_secs", &self.offer_timeout_secs)
            .field("file_chunk_size", &self.file_chunk_size)
            .field("force_fake_media", &self.force_fake_media)
            .field("capabilities", &self.capabilities.len())
            .finish()
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            offer_timeout_secs: 30,
            file_chunk_size: DEFAULT_CHUNK_SIZE,
            force_fake_media: false,
            capabilities: Vec::new(),
        }
    }
}

impl CallConfig {
    pub fn offer_timeout(&self) -> Duration {
        Duration::from_secs(self.offer_timeout_secs)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file_chunk_size == 0 {
            return Err(ConfigError::Invalid("file_chunk_size must be positive"));
        }
        // A chunk plus its envelope must fit in one data channel frame.
        if self.file_chunk_size > MAX_FILE_CHUNK_SIZE {
            return Err(ConfigError::Invalid("file_chunk_size exceeds the frame limit"));
        }
        if self.offer_timeout_secs == 0 {
            return Err(ConfigError::Invalid("offer_timeout_secs must be positive"));
        }
        Ok(())
    }
}
