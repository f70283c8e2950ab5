//! Per-room timelines and cross-room counters built on the broker client.

pub mod aggregate;
pub mod cursor;
pub mod error;
pub mod session;
pub mod timeline;
pub mod unread;

pub use aggregate::{ReactionSummary, ReadPartition, group_reactions, partition_readers};
pub use cursor::PageCursor;
pub use error::SyncError;
pub use session::{Draft, RoomContext, RoomSession, SendOutcome, SessionState};
pub use timeline::Timeline;
pub use unread::UnreadAggregator;
