use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("{name} must be a positive integer, got {value}")]
    InvalidParameter { name: &'static str, value: u32 },
}

/// Why a refresh could not produce a result set.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to encode query payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(err) => err.status(),
            Self::Encode(_) => None,
        }
    }
}
