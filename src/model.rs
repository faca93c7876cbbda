//! Shared wire-adjacent data types: [`RxDescriptor`], [`TxRequest`],
//! [`RadioConfig`] and the LoRa modulation parameters they're built from.
//!
//! These are plain value types with no behaviour beyond construction and
//! (de)serialization helpers; the radio driver, channel manager and
//! protocol engine all pass them by value, never share mutable references
//! across the module boundary (§9 design note on avoiding global state).

use std::fmt;

/// LoRa channel bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bandwidth {
    Khz125,
    Khz250,
    Khz500,
}

impl Bandwidth {
    pub fn hz(self) -> u32 {
        match self {
            Self::Khz125 => 125_000,
            Self::Khz250 => 250_000,
            Self::Khz500 => 500_000,
        }
    }

    pub fn khz(self) -> u32 {
        self.hz() / 1000
    }

    pub fn from_khz(khz: u32) -> Option<Self> {
        match khz {
            125 => Some(Self::Khz125),
            250 => Some(Self::Khz250),
            500 => Some(Self::Khz500),
            _ => None,
        }
    }
}

/// LoRa coding rate, expressed as the denominator of `4/n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodingRate(pub u8);

impl CodingRate {
    pub const CR_4_5: Self = Self(5);
    pub const CR_4_6: Self = Self(6);
    pub const CR_4_7: Self = Self(7);
    pub const CR_4_8: Self = Self(8);

    pub fn as_str(self) -> &'static str {
        match self.0 {
            5 => "4/5",
            6 => "4/6",
            7 => "4/7",
            8 => "4/8",
            _ => "4/5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let n: u8 = s.strip_prefix("4/")?.parse().ok()?;
        if (5..=8).contains(&n) {
            Some(Self(n))
        } else {
            None
        }
    }

    /// Register-level index (0..3) into the modem config bit field.
    pub fn register_index(self) -> u8 {
        self.0 - 4
    }
}

impl fmt::Display for CodingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Full LoRa modulation parameters for one packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Modulation {
    pub frequency_hz: u32,
    pub bandwidth: Bandwidth,
    pub spreading_factor: u8,
    pub coding_rate: CodingRate,
}

impl Modulation {
    /// Render the `datr` field, e.g. `"SF7BW125"`.
    pub fn datr(&self) -> String {
        format!("SF{}BW{}", self.spreading_factor, self.bandwidth.khz())
    }

    /// Parse a `datr` string into (spreading_factor, bandwidth).
    pub fn parse_datr(datr: &str) -> Option<(u8, Bandwidth)> {
        let rest = datr.strip_prefix("SF")?;
        let bw_pos = rest.find("BW")?;
        let sf: u8 = rest[..bw_pos].parse().ok()?;
        let khz: u32 = rest[bw_pos + 2..].parse().ok()?;
        let bw = Bandwidth::from_khz(khz)?;
        if (6..=12).contains(&sf) {
            Some((sf, bw))
        } else {
            None
        }
    }
}

/// A frame delivered by the radio driver on RX_DONE (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct RxDescriptor {
    pub payload: Vec<u8>,
    pub modulation: Modulation,
    pub rssi_dbm: i16,
    pub snr_db: f32,
    pub crc_ok: bool,
    pub hw_timestamp_us: u32,
    pub rf_chain_index: u8,
}

/// When a downlink should go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Immediate,
    At(u32),
}

/// A downlink decoded from PULL_RESP (§3), queued for the channel manager.
#[derive(Debug, Clone, PartialEq)]
pub struct TxRequest {
    pub payload: Vec<u8>,
    pub modulation: Modulation,
    pub tx_power_dbm: i8,
    pub schedule: Schedule,
    pub invert_iq: bool,
}

/// Outcome of submitting a downlink for scheduling (§4.3 step 4, §8.5
/// property 5). The channel manager decides the schedule window
/// synchronously at submit time so the protocol engine can report the
/// precise TX_ACK error code, instead of acking blind and letting the TX
/// worker drop the frame later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxSubmitOutcome {
    Accepted,
    QueueFull,
    TooEarly,
    TooLate,
}

impl TxSubmitOutcome {
    /// Semtech TX_ACK error code, or `None` for a clean acceptance.
    pub fn tx_ack_code(self) -> Option<&'static str> {
        match self {
            Self::Accepted => None,
            Self::QueueFull => Some("TX_FAILED"),
            Self::TooEarly => Some("TOO_EARLY"),
            Self::TooLate => Some("TOO_LATE"),
        }
    }
}

/// Durable per-radio hardware configuration (§3).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RadioConfig {
    pub frequency_hz: u32,
    pub spreading_factor: u8,
    #[serde(with = "bandwidth_khz")]
    pub bandwidth: Bandwidth,
    pub coding_rate_denom: u8,
    pub sync_word: u8,
    pub preamble_length: u16,
    pub crc_on: bool,
    pub implicit_header: bool,
    pub invert_iq_rx: bool,
    pub invert_iq_tx: bool,
    pub tx_power_dbm: i8,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency_hz: crate::freq_plan::UPLINK_START_HZ,
            spreading_factor: 7,
            bandwidth: Bandwidth::Khz125,
            coding_rate_denom: 5,
            sync_word: crate::freq_plan::SYNC_WORD,
            preamble_length: 8,
            crc_on: true,
            implicit_header: false,
            invert_iq_rx: false,
            invert_iq_tx: true,
            tx_power_dbm: 14,
        }
    }
}

impl RadioConfig {
    pub fn coding_rate(&self) -> CodingRate {
        CodingRate(self.coding_rate_denom)
    }
}

pub(crate) mod bandwidth_khz {
    use super::Bandwidth;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bw: &Bandwidth, s: S) -> Result<S::Ok, S::Error> {
        bw.khz().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bandwidth, D::Error> {
        let khz = u32::deserialize(d)?;
        Bandwidth::from_khz(khz).ok_or_else(|| serde::de::Error::custom("invalid bandwidth_khz"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datr_roundtrip() {
        let m = Modulation {
            frequency_hz: 916_800_000,
            bandwidth: Bandwidth::Khz125,
            spreading_factor: 7,
            coding_rate: CodingRate::CR_4_5,
        };
        assert_eq!(m.datr(), "SF7BW125");
        assert_eq!(
            Modulation::parse_datr("SF7BW125"),
            Some((7, Bandwidth::Khz125))
        );
        assert_eq!(
            Modulation::parse_datr("SF12BW500"),
            Some((12, Bandwidth::Khz500))
        );
        assert_eq!(Modulation::parse_datr("garbage"), None);
    }

    #[test]
    fn coding_rate_roundtrip() {
        assert_eq!(CodingRate::from_str("4/5"), Some(CodingRate::CR_4_5));
        assert_eq!(CodingRate::CR_4_8.register_index(), 4);
        assert_eq!(CodingRate::from_str("4/9"), None);
    }

    #[test]
    fn radio_config_json_roundtrip() {
        let cfg = RadioConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: RadioConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
