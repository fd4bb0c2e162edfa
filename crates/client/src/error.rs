//! Tipe error SDK fabric.

use fabric_common::ValidationError;
use thiserror::Error;

use crate::retry::Retryable;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid submission: {0}")]
    Validation(#[from] ValidationError),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("no attestations found for record {0}")]
    NoAttestations(String),

    #[error("witness {0} not found in configuration")]
    UnknownWitness(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    /// Status HTTP, hanya untuk [`ClientError::Http`].
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Retryable for ClientError {
    /// Transport failures dan 5xx diulang; 4xx, validasi, dan decode tidak.
    fn is_retryable(&self) -> bool {
        match self {
            ClientError::Timeout(_) | ClientError::Network(_) => true,
            ClientError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Network(e.to_string())
        }
    }
}
