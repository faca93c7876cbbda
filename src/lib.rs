//! AU915 dual-radio LoRaWAN packet-forwarder gateway core.
//!
//! Two independent SX127x radios are driven from [`radio`]; [`channel_manager`]
//! serializes their register I/O across dedicated OS threads and hands
//! received frames off through [`queue`]'s bounded channels. [`protocol`]
//! speaks the Semtech UDP packet-forwarder protocol to a network server.
//! [`forwarder`] is the gateway core that wires the two halves together and
//! owns their shared [`stats`] and liveness [`link`] state.

pub mod channel_manager;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod freq_plan;
pub mod link;
pub mod model;
pub mod protocol;
pub mod queue;
pub mod radio;
pub mod stats;
pub mod time;

pub use error::GatewayError;
pub use forwarder::{GatewayCore, GatewayCoreConfig};
pub use link::LinkStatus;
