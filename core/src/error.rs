//! Error types for the request pipeline.
//!
//! # Design
//! Transport failures keep their own `TransportError` value so that the retry
//! policy and the error classifier can match on `TransportErrorKind` instead
//! of inspecting message text. Application-level failures reported inside a
//! response envelope land in `Envelope`, carrying the server's code and
//! message. HTTP status codes are never errors at this layer: a 500 is a
//! response like any other and only the envelope decides success.

use thiserror::Error;

pub const TIMEOUT_MESSAGE: &str = "request timed out";
pub const NETWORK_MESSAGE: &str = "network unavailable, please check your connection";
pub const EMPTY_RESPONSE_MESSAGE: &str = "request failed, please retry";

/// Failure category reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The transport gave up waiting for the response.
    Timeout,
    /// DNS failure, refused connection, or other unreachable-network condition.
    Network,
    /// The request's cancellation handle fired.
    Aborted,
    Other,
}

/// A failure raised by the HTTP transport before a response was received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }

    pub fn aborted() -> Self {
        Self::new(TransportErrorKind::Aborted, "request aborted")
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == TransportErrorKind::Timeout
    }
}

/// Errors returned by `Client` calls.
#[derive(Debug, Error)]
pub enum Error {
    /// Raw transport failure. Surfaces unchanged once retries are exhausted.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A transport failure re-raised with a user-facing message.
    #[error("{message}")]
    Request {
        kind: TransportErrorKind,
        message: String,
    },

    /// The response envelope reported a non-success code.
    #[error("{message}")]
    Envelope { code: Option<i64>, message: String },

    /// No response, or a response without a body, where one was required.
    #[error("{}", EMPTY_RESPONSE_MESSAGE)]
    EmptyResponse,

    /// The request payload could not be serialised.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The response body could not be deserialised into the expected type.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Raised by caller-supplied hook code rather than by the HTTP layer.
    #[error("{0}")]
    Hook(String),
}

impl Error {
    /// Transport failure category, whether raw or already re-raised.
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Error::Transport(e) => Some(e.kind),
            Error::Request { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.transport_kind() == Some(TransportErrorKind::Aborted)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
