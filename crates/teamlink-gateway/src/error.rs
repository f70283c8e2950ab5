use thiserror::Error;

use crate::frame::FrameError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open link to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("connection attempt timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("token provider failed: {0}")]
    Token(String),

    #[error("broker rejected the session: {0}")]
    Rejected(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("no traffic for {0:?}, heartbeat lost")]
    HeartbeatTimeout(std::time::Duration),

    #[error("link closed")]
    Closed,

    #[error("link i/o: {0}")]
    Io(String),

    #[error(transparent)]
    Frame(#[from] FrameError),
}
