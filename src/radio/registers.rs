//! SX127x register map and bit constants.
//!
//! Addresses and bit layouts follow the Semtech SX1276/77/78/79 datasheet,
//! the same register set used by `sx127x_lora` (the closest retrieved
//! reference for this chip family).

#![allow(dead_code)]

pub const REG_FIFO: u8 = 0x00;
pub const REG_OP_MODE: u8 = 0x01;
pub const REG_FRF_MSB: u8 = 0x06;
pub const REG_FRF_MID: u8 = 0x07;
pub const REG_FRF_LSB: u8 = 0x08;
pub const REG_PA_CONFIG: u8 = 0x09;
pub const REG_OCP: u8 = 0x0B;
pub const REG_LNA: u8 = 0x0C;
pub const REG_FIFO_ADDR_PTR: u8 = 0x0D;
pub const REG_FIFO_TX_BASE_ADDR: u8 = 0x0E;
pub const REG_FIFO_RX_BASE_ADDR: u8 = 0x0F;
pub const REG_FIFO_RX_CURRENT_ADDR: u8 = 0x10;
pub const REG_IRQ_FLAGS: u8 = 0x12;
pub const REG_RX_NB_BYTES: u8 = 0x13;
pub const REG_PKT_SNR_VALUE: u8 = 0x19;
pub const REG_PKT_RSSI_VALUE: u8 = 0x1A;
pub const REG_MODEM_CONFIG_1: u8 = 0x1D;
pub const REG_MODEM_CONFIG_2: u8 = 0x1E;
pub const REG_PREAMBLE_MSB: u8 = 0x20;
pub const REG_PREAMBLE_LSB: u8 = 0x21;
pub const REG_PAYLOAD_LENGTH: u8 = 0x22;
pub const REG_MODEM_CONFIG_3: u8 = 0x26;
pub const REG_INVERT_IQ: u8 = 0x33;
pub const REG_DETECT_OPTIMIZE: u8 = 0x31;
pub const REG_DETECTION_THRESHOLD: u8 = 0x37;
pub const REG_SYNC_WORD: u8 = 0x39;
pub const REG_DIO_MAPPING_1: u8 = 0x40;
pub const REG_VERSION: u8 = 0x42;
pub const REG_PA_DAC: u8 = 0x4D;

/// Expected value of [`REG_VERSION`] for the SX127x family.
pub const EXPECTED_VERSION: u8 = 0x12;

/// Crystal oscillator frequency used in the FRF formula, in Hz.
pub const F_XO_HZ: u64 = 32_000_000;

pub mod op_mode {
    pub const LONG_RANGE_MODE: u8 = 0x80;
    pub const SLEEP: u8 = 0x00;
    pub const STANDBY: u8 = 0x01;
    pub const FS_TX: u8 = 0x02;
    pub const TX: u8 = 0x03;
    pub const FS_RX: u8 = 0x04;
    pub const RX_CONTINUOUS: u8 = 0x05;
    pub const RX_SINGLE: u8 = 0x06;
    pub const CAD: u8 = 0x07;
}

pub mod irq_flags {
    pub const CAD_DETECTED: u8 = 0x01;
    pub const FHSS_CHANGE_CHANNEL: u8 = 0x02;
    pub const CAD_DONE: u8 = 0x04;
    pub const TX_DONE: u8 = 0x08;
    pub const VALID_HEADER: u8 = 0x10;
    pub const PAYLOAD_CRC_ERROR: u8 = 0x20;
    pub const RX_DONE: u8 = 0x40;
    pub const RX_TIMEOUT: u8 = 0x80;
    pub const ALL: u8 = 0xFF;
}

pub mod dio0_mapping {
    pub const RX_DONE: u8 = 0x00;
    pub const TX_DONE: u8 = 0x40;
    pub const CAD_DONE: u8 = 0x80;
}

/// Top bit of the register address signals a write transaction.
pub const WRITE_BIT: u8 = 0x80;

/// `REG_PA_CONFIG` bit selecting the PA_BOOST output pin (used for all power
/// levels this driver supports).
pub const PA_SELECT_BOOST: u8 = 0x80;
/// `REG_PA_DAC` value enabling the high-power (+20 dBm) boost DAC.
pub const PA_DAC_BOOST: u8 = 0x87;
/// `REG_PA_DAC` default (non-boosted) value.
pub const PA_DAC_DEFAULT: u8 = 0x84;
