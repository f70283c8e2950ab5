//! Wire and domain types shared by the teamlink crates.

pub mod api;
pub mod destinations;
pub mod events;
pub mod models;
