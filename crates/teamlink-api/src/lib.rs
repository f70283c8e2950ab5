//! REST side of the chat sync layer.

pub mod error;
pub mod history;

pub use error::ApiError;
pub use history::{HistoryClient, HistorySource};
