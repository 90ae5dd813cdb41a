//! Decode errors for the parameter wire format.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid parameter type code {0}")]
    InvalidTypeCode(i64),

    #[error("parameter '{key}' is not an object with a numeric 'type' field")]
    MalformedEntry { key: String },

    #[error("parameter '{key}' has a malformed {kind} value: {detail}")]
    MalformedValue {
        key: String,
        kind: &'static str,
        detail: String,
    },

    #[error("id must be a hex string like '0x1a', got '{0}'")]
    InvalidId(String),

    #[error("malformed compact id set '{0}'")]
    InvalidIdSet(String),

    #[error("parameter set must be a JSON object")]
    NotAnObject,
}
