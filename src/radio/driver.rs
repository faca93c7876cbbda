//! SX127x register-level driver (§4.1).
//!
//! One [`Radio`] per physical transceiver. All register access is
//! synchronous and blocking (it's a handful of SPI transactions), so the
//! channel manager drives each radio from its own dedicated thread rather
//! than an async task, mirroring how the teacher's ESP-IDF radio driver is
//! itself fully synchronous even though the rest of the node is async.

use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::backend::{BusError, RadioBus};
use super::registers::*;
use crate::model::{Bandwidth, CodingRate, Modulation, RadioConfig};

/// Operating modes a chip can be in (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Sleep,
    Standby,
    FsTx,
    Tx,
    FsRx,
    RxContinuous,
    RxSingle,
    Cad,
}

impl OperatingMode {
    fn register_bits(self) -> u8 {
        match self {
            Self::Sleep => op_mode::SLEEP,
            Self::Standby => op_mode::STANDBY,
            Self::FsTx => op_mode::FS_TX,
            Self::Tx => op_mode::TX,
            Self::FsRx => op_mode::FS_RX,
            Self::RxContinuous => op_mode::RX_CONTINUOUS,
            Self::RxSingle => op_mode::RX_SINGLE,
            Self::Cad => op_mode::CAD,
        }
    }
}

/// Outcome of an interrupt dispatch (§4.1 "Interrupt handler").
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    Rx(crate::model::RxDescriptor),
    TxDone,
    CadDone { detected: bool },
    /// DIO0 fired but the flags register carried no bit this driver tracks
    /// (spurious interrupt); the caller should keep waiting.
    Spurious,
}

#[derive(Debug)]
pub enum RadioError {
    InvalidArgument(String),
    ChipAbsent { found: u8 },
    Timeout,
    Bus(BusError),
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::ChipAbsent { found } => {
                write!(f, "chip absent: version register read 0x{found:02x}")
            }
            Self::Timeout => write!(f, "radio timeout"),
            Self::Bus(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RadioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bus(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BusError> for RadioError {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

/// Upper bound on channel activity detection (§4.1).
const CAD_TIMEOUT_MS: u32 = 100;

pub struct Radio<B: RadioBus> {
    bus: B,
    mode: OperatingMode,
    config: RadioConfig,
    label: String,
}

impl<B: RadioBus> Radio<B> {
    pub fn new(bus: B, label: impl Into<String>) -> Self {
        Self {
            bus,
            mode: OperatingMode::Sleep,
            config: RadioConfig::default(),
            label: label.into(),
        }
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    /// Reset, verify chip identity, and apply `config`. Leaves the radio in
    /// Standby.
    pub fn init(&mut self, config: RadioConfig) -> Result<(), RadioError> {
        info!("radio[{}]: resetting and verifying chip identity", self.label);
        self.bus.reset()?;

        let version = self.bus.read_register(REG_VERSION)?;
        if version != EXPECTED_VERSION {
            return Err(RadioError::ChipAbsent { found: version });
        }

        self.apply_config(config)?;
        info!(
            "radio[{}]: initialized at {} Hz, SF{}, {} kHz",
            self.label,
            self.config.frequency_hz,
            self.config.spreading_factor,
            self.config.bandwidth.khz()
        );
        Ok(())
    }

    /// Apply a full [`RadioConfig`], following the seven-step sequence in §4.1.
    pub fn apply_config(&mut self, config: RadioConfig) -> Result<(), RadioError> {
        if !(6..=12).contains(&config.spreading_factor) {
            return Err(RadioError::InvalidArgument(format!(
                "spreading factor {} out of range",
                config.spreading_factor
            )));
        }

        // 1. Sleep with LoRa mode bit set (only mutable in Sleep).
        self.set_raw_mode(OperatingMode::Sleep, op_mode::LONG_RANGE_MODE)?;
        // 2. Standby.
        self.set_raw_mode(OperatingMode::Standby, op_mode::LONG_RANGE_MODE)?;

        // 3. Carrier frequency.
        self.write_frequency(config.frequency_hz)?;

        // 4. Modem config: SF, BW, CR, detection-optimize pair, low-data-rate-optimize.
        self.write_modem_config(&config)?;

        // 5. TX power.
        self.write_tx_power(config.tx_power_dbm)?;

        // 6. Sync word, preamble, CRC, header mode, IQ, LNA/AGC.
        self.bus.write_register(REG_SYNC_WORD, config.sync_word)?;
        self.bus
            .write_register(REG_PREAMBLE_MSB, (config.preamble_length >> 8) as u8)?;
        self.bus
            .write_register(REG_PREAMBLE_LSB, (config.preamble_length & 0xFF) as u8)?;

        let modem_config_1 = self.bus.read_register(REG_MODEM_CONFIG_1)?;
        let modem_config_1 = if config.implicit_header {
            modem_config_1 | 0x01
        } else {
            modem_config_1 & !0x01
        };
        self.bus.write_register(REG_MODEM_CONFIG_1, modem_config_1)?;

        let modem_config_2 = self.bus.read_register(REG_MODEM_CONFIG_2)?;
        let modem_config_2 = if config.crc_on {
            modem_config_2 | 0x04
        } else {
            modem_config_2 & !0x04
        };
        self.bus.write_register(REG_MODEM_CONFIG_2, modem_config_2)?;

        let lna = self.bus.read_register(REG_LNA)?;
        self.bus.write_register(REG_LNA, lna | 0x03)?;

        let invert_iq = self.bus.read_register(REG_INVERT_IQ)?;
        let invert_iq = if config.invert_iq_rx {
            invert_iq | 0x40
        } else {
            invert_iq & !0x40
        };
        self.bus.write_register(REG_INVERT_IQ, invert_iq)?;

        // 7. FIFO base addresses.
        self.bus.write_register(REG_FIFO_TX_BASE_ADDR, 0)?;
        self.bus.write_register(REG_FIFO_RX_BASE_ADDR, 0)?;

        self.config = config;
        debug!("radio[{}]: config applied", self.label);
        Ok(())
    }

    fn write_frequency(&mut self, freq_hz: u32) -> Result<(), RadioError> {
        let frf = ((freq_hz as u64) << 19) / F_XO_HZ;
        self.bus
            .write_register(REG_FRF_MSB, ((frf >> 16) & 0xFF) as u8)?;
        self.bus
            .write_register(REG_FRF_MID, ((frf >> 8) & 0xFF) as u8)?;
        self.bus.write_register(REG_FRF_LSB, (frf & 0xFF) as u8)?;
        Ok(())
    }

    fn write_modem_config(&mut self, config: &RadioConfig) -> Result<(), RadioError> {
        let bw_bits: u8 = match config.bandwidth {
            Bandwidth::Khz125 => 0x70,
            Bandwidth::Khz250 => 0x80,
            Bandwidth::Khz500 => 0x90,
        };
        let cr_bits: u8 = (config.coding_rate_denom - 4) << 1;
        self.bus
            .write_register(REG_MODEM_CONFIG_1, bw_bits | cr_bits)?;

        let sf_bits = config.spreading_factor << 4;
        let existing = self.bus.read_register(REG_MODEM_CONFIG_2)?;
        self.bus
            .write_register(REG_MODEM_CONFIG_2, sf_bits | (existing & 0x0F))?;

        if config.spreading_factor == 6 {
            self.bus.write_register(REG_DETECT_OPTIMIZE, 0x05)?;
            self.bus.write_register(REG_DETECTION_THRESHOLD, 0x0C)?;
        } else {
            self.bus.write_register(REG_DETECT_OPTIMIZE, 0x03)?;
            self.bus.write_register(REG_DETECTION_THRESHOLD, 0x0A)?;
        }

        let low_dr_opt =
            config.spreading_factor >= 11 && matches!(config.bandwidth, Bandwidth::Khz125);
        let modem_config_3 = if low_dr_opt { 0x08 } else { 0x00 } | 0x04; // AGC auto on
        self.bus.write_register(REG_MODEM_CONFIG_3, modem_config_3)?;

        Ok(())
    }

    fn write_tx_power(&mut self, power_dbm: i8) -> Result<(), RadioError> {
        let power = power_dbm.clamp(2, 20);
        if power <= 14 {
            self.bus
                .write_register(REG_PA_CONFIG, PA_SELECT_BOOST | (power as u8 - 2))?;
            self.bus.write_register(REG_PA_DAC, PA_DAC_DEFAULT)?;
        } else if power <= 17 {
            self.bus
                .write_register(REG_PA_CONFIG, PA_SELECT_BOOST | (power as u8 - 2))?;
            self.bus.write_register(REG_PA_DAC, PA_DAC_DEFAULT)?;
        } else {
            self.bus
                .write_register(REG_PA_CONFIG, PA_SELECT_BOOST | 0x0F)?;
            self.bus.write_register(REG_PA_DAC, PA_DAC_BOOST)?;
        }
        self.bus.write_register(REG_OCP, 0x20 | 0x0B)?; // ~100 mA trim
        Ok(())
    }

    fn set_raw_mode(&mut self, mode: OperatingMode, extra_bits: u8) -> Result<(), RadioError> {
        self.bus
            .write_register(REG_OP_MODE, mode.register_bits() | extra_bits)?;
        self.mode = mode;
        Ok(())
    }

    fn set_mode(&mut self, mode: OperatingMode) -> Result<(), RadioError> {
        self.set_raw_mode(mode, op_mode::LONG_RANGE_MODE)
    }

    /// Arm continuous receive (§4.1 "Start receive").
    pub fn start_receive(&mut self) -> Result<(), RadioError> {
        self.bus.write_register(REG_IRQ_FLAGS, irq_flags::ALL)?;
        self.bus
            .write_register(REG_DIO_MAPPING_1, dio0_mapping::RX_DONE)?;
        self.bus.write_register(REG_FIFO_ADDR_PTR, 0)?;
        self.set_mode(OperatingMode::RxContinuous)?;
        debug!("radio[{}]: receiving continuously", self.label);
        Ok(())
    }

    /// Transmit one packet (§4.1 "Transmit one packet"). Precondition: the
    /// radio must be in Standby with no TX already in flight.
    pub fn transmit(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        if payload.is_empty() {
            return Err(RadioError::InvalidArgument("empty payload".into()));
        }
        if payload.len() > 255 {
            return Err(RadioError::InvalidArgument(format!(
                "payload of {} bytes exceeds 255",
                payload.len()
            )));
        }

        self.set_mode(OperatingMode::Standby)?;
        self.bus.write_register(REG_IRQ_FLAGS, irq_flags::ALL)?;
        self.bus
            .write_register(REG_DIO_MAPPING_1, dio0_mapping::TX_DONE)?;
        self.bus.write_register(REG_FIFO_ADDR_PTR, 0)?;
        self.bus.write_register(REG_PAYLOAD_LENGTH, payload.len() as u8)?;
        self.bus.write_fifo(payload)?;
        self.set_mode(OperatingMode::Tx)?;
        debug!("radio[{}]: transmitting {} bytes", self.label, payload.len());
        Ok(())
    }

    /// Block waiting for the next DIO0 edge and dispatch it (§4.1).
    pub fn wait_event(&mut self, timeout_ms: u32) -> Result<RadioEvent, RadioError> {
        if !self.bus.wait_for_dio0(timeout_ms)? {
            return Err(RadioError::Timeout);
        }

        let flags = self.bus.read_register(REG_IRQ_FLAGS)?;

        if flags & irq_flags::RX_DONE != 0 {
            let descriptor = self.read_rx_descriptor(flags)?;
            self.bus.write_register(
                REG_IRQ_FLAGS,
                irq_flags::RX_DONE | irq_flags::PAYLOAD_CRC_ERROR,
            )?;
            return Ok(RadioEvent::Rx(descriptor));
        }

        if flags & irq_flags::TX_DONE != 0 {
            self.bus.write_register(REG_IRQ_FLAGS, irq_flags::TX_DONE)?;
            self.set_mode(OperatingMode::Standby)?;
            return Ok(RadioEvent::TxDone);
        }

        if flags & irq_flags::CAD_DONE != 0 {
            let detected = flags & irq_flags::CAD_DETECTED != 0;
            self.bus.write_register(
                REG_IRQ_FLAGS,
                irq_flags::CAD_DONE | irq_flags::CAD_DETECTED,
            )?;
            self.set_mode(OperatingMode::Standby)?;
            return Ok(RadioEvent::CadDone { detected });
        }

        Ok(RadioEvent::Spurious)
    }

    fn read_rx_descriptor(
        &mut self,
        flags: u8,
    ) -> Result<crate::model::RxDescriptor, RadioError> {
        let len = self.bus.read_register(REG_RX_NB_BYTES)? as usize;
        let current_addr = self.bus.read_register(REG_FIFO_RX_CURRENT_ADDR)?;
        self.bus.write_register(REG_FIFO_ADDR_PTR, current_addr)?;
        let payload = self.bus.read_fifo(len)?;

        let rssi_reg = self.bus.read_register(REG_PKT_RSSI_VALUE)?;
        let snr_reg = self.bus.read_register(REG_PKT_SNR_VALUE)? as i8;

        let rssi_dbm = rssi_reg as i16 - 157;
        let snr_db = snr_reg as f32 / 4.0;
        let crc_ok = flags & irq_flags::PAYLOAD_CRC_ERROR == 0;

        Ok(crate::model::RxDescriptor {
            payload,
            modulation: Modulation {
                frequency_hz: self.config.frequency_hz,
                bandwidth: self.config.bandwidth,
                spreading_factor: self.config.spreading_factor,
                coding_rate: CodingRate(self.config.coding_rate_denom),
            },
            rssi_dbm,
            snr_db,
            crc_ok,
            hw_timestamp_us: crate::time::now_us(),
            rf_chain_index: 0,
        })
    }

    /// Channel activity detection with a 100 ms ceiling (§4.1).
    pub fn channel_activity_detected(&mut self) -> Result<bool, RadioError> {
        self.bus.write_register(REG_IRQ_FLAGS, irq_flags::ALL)?;
        self.set_mode(OperatingMode::Cad)?;

        let deadline = Instant::now() + Duration::from_millis(CAD_TIMEOUT_MS as u64);
        loop {
            match self.bus.wait_for_dio0(5)? {
                true => {
                    let flags = self.bus.read_register(REG_IRQ_FLAGS)?;
                    if flags & irq_flags::CAD_DONE != 0 {
                        let detected = flags & irq_flags::CAD_DETECTED != 0;
                        self.bus.write_register(REG_IRQ_FLAGS, irq_flags::ALL)?;
                        self.set_mode(OperatingMode::Standby)?;
                        return Ok(detected);
                    }
                }
                false => {
                    if Instant::now() >= deadline {
                        self.set_mode(OperatingMode::Standby)?;
                        return Err(RadioError::Timeout);
                    }
                }
            }
        }
    }

    /// Retune while leaving all other modem parameters untouched (used by
    /// the channel manager's hopping and by per-packet downlink retuning).
    pub fn retune(&mut self, frequency_hz: u32) -> Result<(), RadioError> {
        let mode = self.mode;
        self.set_mode(OperatingMode::Standby)?;
        self.write_frequency(frequency_hz)?;
        self.config.frequency_hz = frequency_hz;
        if mode != OperatingMode::Standby {
            self.set_mode(mode)?;
        }
        Ok(())
    }
}
