//! Transport Adapters
//!
//! Implementations of [`Connector`](crate::application::ports::Connector).

pub mod mock;
pub mod websocket;

pub use mock::{MockConnect, MockConnector, MockSession};
pub use websocket::WebSocketConnector;
