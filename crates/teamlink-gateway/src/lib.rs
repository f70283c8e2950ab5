//! Broker client for the chat sync layer: STOMP framing over a websocket,
//! the connection state machine and the subscription registry.

pub mod client;
mod connection;
pub mod connector;
pub mod destination;
pub mod error;
pub mod frame;
pub mod listeners;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod options;
pub mod registry;
pub mod token;

pub use client::{ConnectionStatus, MessageHandler, TransportClient, Unsubscribe};
pub use connector::{Connector, Link, WebSocketConnector};
pub use destination::DestinationResolver;
pub use error::TransportError;
pub use listeners::{ConnectionEvent, ConnectionEventKind, ListenerId};
pub use options::ConnectOptions;
pub use registry::SubscriptionRegistry;
pub use token::TokenProvider;
