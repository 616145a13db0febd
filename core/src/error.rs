//! Error types for the Proxmox VE session engine.
//!
//! # Design
//! Ordinary request outcomes (bad credentials, non-200 status, API-reported
//! validation errors, task timeouts) are never errors here: they live in
//! `ApiResult` and in boolean return values. `Error` covers construction-time
//! mistakes and the opt-in conversions that turn an envelope into a
//! `Result` for callers who prefer `?`.

use thiserror::Error;

/// Convenience result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by session construction and envelope conversion helpers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A builder or config value is unusable (empty hostname, port 0, ...).
    #[error("invalid session configuration: {message}")]
    InvalidConfig { message: String },

    /// The API token is not of the form `USER@REALM!TOKENID=UUID`.
    ///
    /// Only the token id part is kept so the secret never reaches logs.
    #[error("invalid API token for {token_id}: expected USER@REALM!TOKENID=UUID")]
    InvalidApiToken { token_id: String },

    /// The `data` member could not be deserialized into the requested type.
    #[error("failed to decode response data: {message}")]
    Decode { message: String },

    /// The envelope did not describe a successful call.
    #[error("request failed with HTTP {status}: {message}")]
    Http { status: u16, message: String },
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Failure below HTTP: DNS, TLS, refused connection, timeouts, broken bodies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
