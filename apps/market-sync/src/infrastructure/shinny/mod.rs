//! DIFF Market Data Front Adapters
//!
//! Client side of the DIFF protocol spoken by the market data front:
//!
//! - **Connection**: socket lifecycle, buffering, reconnection, heartbeat
//! - **Correlator**: request ids and response matching
//! - **Client**: dispatch loop folding `rtn_data` into the chart and quote books

pub mod client;
pub mod codec;
pub mod connection;
pub mod correlator;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;

pub use client::{ClientError, MarketClient};
pub use codec::{CodecError, InboundFrame, JsonCodec};
pub use connection::{
    CloseOutcome, Connection, ConnectionError, ConnectionEvent, ConnectionHandle,
    ConnectionManager, ConnectionState, Outbound,
};
pub use correlator::{CallError, Correlator};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use messages::{ClientMessage, Notification, RequestEnvelope, ResponseEnvelope};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
