//! Detection stream transport.
//!
//! - `connection`: the connection state machine and transport traits
//! - `reconnect`: retry delay policy
//! - `wire`: detection message parsing
//! - `ws`: WebSocket transport on a reader thread

pub mod connection;
pub mod reconnect;
pub mod wire;
mod ws;

pub use connection::{
    ConnectionManager, ConnectionState, ConnectionStats, ConnectionUpdate, Connector, EventSink,
    Transport, TransportEvent, TransportEventKind, TransportId,
};
pub use reconnect::{FixedDelay, ReconnectPolicy, DEFAULT_RECONNECT_DELAY};
pub use wire::{parse_detection_message, WireAnimal, WireFrame};
pub use ws::{WsConnector, WsTransport};
