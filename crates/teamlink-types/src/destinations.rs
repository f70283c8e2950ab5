//! Logical broker destinations used by the chat layer. These are resolved to
//! wire paths by the gateway's destination resolver.

use crate::models::{ChatSeq, RoomSeq};

/// Publish target for new messages and subscribe topic for pushed messages.
pub fn new_message(room: RoomSeq) -> String {
    format!("newMessage/{}", room)
}

/// Publish target for a read pointer update.
pub fn read(room: RoomSeq, chat_seq: ChatSeq) -> String {
    format!("read/room/{}/{}", room, chat_seq)
}

/// Subscribe topic carrying read receipts for a room.
pub fn join_room(room: RoomSeq) -> String {
    format!("joinRoom/{}", room)
}
