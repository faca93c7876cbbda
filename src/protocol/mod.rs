//! Semtech UDP packet-forwarder protocol engine (§4.3).

pub mod engine;
pub mod json;
pub mod wire;

pub use engine::{DownlinkSink, ProtocolConfig, ProtocolEngine, ProtocolHandle};
pub use json::DecodeError;
pub use wire::{Frame, FrameError, PacketType, DEFAULT_PORT, PROTOCOL_VERSION};
