//! Crate-wide error taxonomy.
//!
//! Individual modules define their own error enums for the failures specific
//! to them (`radio::RadioError`, `protocol::DecodeError`, ...). `GatewayError`
//! sits at the forwarder/channel-manager boundary and wraps those, following
//! the `From`-impl-per-boundary convention used throughout this crate.

use std::fmt;

use crate::protocol::DecodeError;
use crate::radio::RadioError;

/// Error kinds surfaced across the forwarder/channel-manager boundary.
#[derive(Debug)]
pub enum GatewayError {
    /// Caller-visible programming error, never retried.
    InvalidArgument(String),
    /// Lifecycle misuse (operation attempted before init / after stop).
    NotInitialized,
    NotRunning,
    /// A radio operation failed.
    Radio(RadioError),
    /// A bounded queue was full; the newest item was dropped.
    QueueFull,
    /// A downlink request was scheduled outside the accepted window.
    TooLate,
    TooEarly,
    /// A PULL_RESP body failed to parse.
    Decode(DecodeError),
    /// Attempted to send without a reachable server.
    LinkDown,
    /// Failed to bind the protocol engine's UDP socket.
    Io(std::io::Error),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::NotInitialized => write!(f, "gateway not initialized"),
            Self::NotRunning => write!(f, "gateway not running"),
            Self::Radio(e) => write!(f, "radio error: {e}"),
            Self::QueueFull => write!(f, "queue full"),
            Self::TooLate => write!(f, "downlink scheduled too late"),
            Self::TooEarly => write!(f, "downlink scheduled too early"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::LinkDown => write!(f, "link down"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Radio(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RadioError> for GatewayError {
    fn from(e: RadioError) -> Self {
        Self::Radio(e)
    }
}

impl From<DecodeError> for GatewayError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
