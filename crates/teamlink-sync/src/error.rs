use thiserror::Error;

use teamlink_api::ApiError;
use teamlink_types::models::RoomSeq;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("history request failed: {0}")]
    History(#[from] ApiError),

    /// The session was closed while the request was in flight; the response
    /// was dropped.
    #[error("room {0} was closed before the response arrived")]
    SessionClosed(RoomSeq),

    #[error("room {0} is not open")]
    NotOpen(RoomSeq),
}
