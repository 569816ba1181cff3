//! Error types for the debugging bridge.

use crate::registry::ContextId;
use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised by the bridge.
///
/// Errors that originate from a single page's dispatch loop stay local to that
/// page; they only reach the session through context removal or disconnect.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Malformed wire message, unknown verb or bad breakpoint location.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A fail-fast queue was full and the item was dropped.
    #[error("queue is full")]
    QueueFull,

    /// The remote debugger connection went away.
    #[error("connection interrupted")]
    ConnectionInterrupted,

    /// The remote client is not allowed to debug.
    #[error("client is not authorized to debug")]
    Unauthorized,

    /// The operation needs a connected remote client.
    #[error("no remote debugger is connected")]
    NotConnected,

    /// The bridge has not been started.
    #[error("debugging bridge is not started")]
    NotStarted,

    /// A remote client session is already active.
    #[error("a remote debugger is already attached")]
    Busy,

    /// The context id is not registered.
    #[error("unknown debug context {0}")]
    UnknownContext(ContextId),

    /// The page number does not denote a live page.
    #[error("unknown page {0}")]
    UnknownPage(u32),

    /// Every page slot is in use.
    #[error("no free page slot")]
    NoFreePage,

    /// Waiting for a reply took too long.
    #[error("timed out waiting for a reply")]
    Timeout,

    /// The context was aborted while waiting.
    #[error("debug context aborted")]
    Aborted,

    /// The pilot thread is no longer running.
    #[error("debug pilot has shut down")]
    PilotGone,

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Shorthand for [`BridgeError::InvalidParameter`].
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }
}
