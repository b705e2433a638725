//! Call-related error types.

use callcore::InvalidTransition;
use thiserror::Error;

use crate::media::MediaError;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("protocol error: {0}")]
    Protocol(&'static str),

    #[error("media error: {0}")]
    Media(#[from] MediaError),
}
