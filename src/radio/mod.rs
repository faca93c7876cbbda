//! Radio driver: register-level SX127x control over a pluggable SPI/GPIO
//! backend (§4.1).

pub mod backend;
pub mod driver;
pub mod registers;

pub use backend::{BusError, MockBus, RadioBus};
#[cfg(feature = "hardware")]
pub use backend::RaspberryPiBus;
pub use driver::{OperatingMode, Radio, RadioError, RadioEvent};
