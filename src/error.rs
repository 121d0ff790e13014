//! Error types for the `cvt-live` crate.
//!
//! All fallible operations in this crate return [`Result<T>`], which is an
//! alias for `std::result::Result<T, LiveError>`.
//!
//! [`LiveError`] covers:
//! - **Configuration errors**: no session token available (never retried)
//! - **Transient connection errors**: connect timeout, transport close/error
//!   (retried by the channel's backoff policy)
//! - **Protocol errors**: frames that do not decode as an envelope
//! - **URL / IO errors**: malformed endpoints, bind failures
//!
//! Server-side token rejections are a separate [`TokenError`], mapped onto
//! WebSocket close codes.

use std::time::Duration;

use crate::constants::close;

/// Rejection outcomes of session-token verification.
///
/// Each variant maps onto the close frame the server sends before dropping
/// the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// No token was supplied with the connection.
    #[error("session token missing")]
    Missing,
    /// The token is unknown or malformed.
    #[error("session token invalid")]
    Invalid,
    /// The token was valid once but has expired.
    #[error("session token expired")]
    Expired,
}

impl TokenError {
    /// WebSocket close code the server uses for this rejection.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Missing => close::MISSING_CREDENTIAL,
            Self::Invalid | Self::Expired => close::INVALID_CREDENTIAL,
        }
    }

    /// Close reason text sent alongside [`close_code`](Self::close_code).
    pub fn close_reason(&self) -> &'static str {
        match self {
            Self::Missing => close::MISSING_CREDENTIAL_REASON,
            Self::Invalid | Self::Expired => close::INVALID_CREDENTIAL_REASON,
        }
    }
}

/// All possible errors produced by the channel and the registry.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    /// No session token could be obtained from the identity provider.
    #[error("no session token available")]
    MissingToken,

    /// The transport did not report "open" within the bounded wait.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A WebSocket-level error.
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// The transport went away before the attempt completed.
    #[error("transport closed")]
    TransportClosed,

    /// Failed to encode or decode an envelope.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error building or parsing a URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Socket-level failure (bind / accept).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel has been disposed and accepts no further commands.
    #[error("channel disposed")]
    Disposed,
}

impl From<tokio_tungstenite::tungstenite::Error> for LiveError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

impl LiveError {
    /// Whether the reconnection policy should retry after this error.
    ///
    /// Configuration and terminal errors are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout(_) | Self::WebSocket(_) | Self::TransportClosed | Self::Io(_)
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LiveError>;
