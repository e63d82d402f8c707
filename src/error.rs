use thiserror::Error;

use crate::protocol::ProtocolState;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("malformed proof: {0}")]
    MalformedProof(String),

    #[error("plaintext not found in the decryption table")]
    NotFound,

    #[error("protocol round did not complete in time")]
    Timeout,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid protocol state: expected {expected:?}, found {actual:?}")]
    InvalidState {
        expected: ProtocolState,
        actual: ProtocolState,
    },

    #[error("feedback channel closed before a result was delivered")]
    ChannelClosed,

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ProtocolError {
    pub(crate) fn length_mismatch(expected: usize, actual: usize) -> Self {
        ProtocolError::LengthMismatch { expected, actual }
    }
}

impl From<ark_serialize::SerializationError> for ProtocolError {
    fn from(err: ark_serialize::SerializationError) -> Self {
        ProtocolError::Serialization(err.to_string())
    }
}

pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;
