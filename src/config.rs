//! Durable gateway configuration (§6) and gateway EUI derivation.
//!
//! Mirrors the teacher's host-side persistence split: a serde value type
//! (`GatewayConfig`, matching `wifi::config::WifiConfig`'s validated-value-type
//! shape) loaded from and saved to a JSON file with read-back verification
//! (`persistence_host::save_identity_to`'s pattern), instead of the ESP32 NVS
//! half of that split which has no host-class equivalent here.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::freq_plan;
use crate::model::{Bandwidth, RadioConfig};

/// Default path for the durable configuration blob.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/au915-gateway/config.json";

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    InvalidFormat(String),
    VerificationFailed,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::InvalidFormat(msg) => write!(f, "invalid config: {msg}"),
            Self::VerificationFailed => write!(f, "config write verification failed"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Per-uplink-channel enable/SF-range state (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub frequency_hz: u32,
    pub sf_min: u8,
    pub sf_max: u8,
    #[serde(with = "crate::model::bandwidth_khz")]
    pub bandwidth: Bandwidth,
    pub enabled: bool,
}

/// Radio-facing LoRa configuration (§6): sub-band selector, per-channel
/// table, and the defaults applied to the RX/TX radios at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoraConfig {
    pub sub_band: u8,
    pub channels: Vec<ChannelConfig>,
    pub rx_spreading_factor: u8,
    #[serde(with = "crate::model::bandwidth_khz")]
    pub rx_bandwidth: Bandwidth,
    pub tx_power_dbm: i8,
    pub sync_word: u8,
}

impl Default for LoraConfig {
    fn default() -> Self {
        let channels = (0..freq_plan::UPLINK_CHANNEL_COUNT)
            .map(|chan| ChannelConfig {
                frequency_hz: freq_plan::uplink_freq_hz(chan).expect("chan in range"),
                sf_min: 7,
                sf_max: 12,
                bandwidth: Bandwidth::Khz125,
                enabled: freq_plan::sub_band_of(chan) == 0,
            })
            .collect();
        Self {
            sub_band: 0,
            channels,
            rx_spreading_factor: 7,
            rx_bandwidth: Bandwidth::Khz125,
            tx_power_dbm: 14,
            sync_word: freq_plan::SYNC_WORD,
        }
    }
}

impl LoraConfig {
    /// The [`RadioConfig`] to apply to the RX radio at start, using this
    /// sub-band's first enabled channel.
    pub fn rx_radio_config(&self) -> RadioConfig {
        let frequency_hz = self
            .channels
            .iter()
            .find(|c| c.enabled)
            .map(|c| c.frequency_hz)
            .unwrap_or(freq_plan::UPLINK_START_HZ);
        RadioConfig {
            frequency_hz,
            spreading_factor: self.rx_spreading_factor,
            bandwidth: self.rx_bandwidth,
            sync_word: self.sync_word,
            tx_power_dbm: self.tx_power_dbm,
            ..RadioConfig::default()
        }
    }
}

/// Network-server-facing configuration (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub keepalive_ms: u64,
    pub stat_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: crate::protocol::DEFAULT_PORT,
            keepalive_ms: 10_000,
            stat_interval_ms: 30_000,
        }
    }
}

/// The full durable configuration blob (§6): gateway EUI, LoRa config, and
/// server config. Link config (Wi-Fi/Ethernet) is out of scope (§1) and is
/// represented only by the [`LinkStatus`] trait below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub version: u32,
    pub gateway_eui: [u8; 8],
    pub lora: LoraConfig,
    pub server: ServerConfig,
}

/// Current blob version. Bump when the on-disk shape changes incompatibly.
pub const CONFIG_VERSION: u32 = 1;

impl GatewayConfig {
    pub fn new(gateway_eui: [u8; 8]) -> Self {
        Self {
            version: CONFIG_VERSION,
            gateway_eui,
            lora: LoraConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Load from `path`, returning `None` if no file exists there yet.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("no config file at {path:?}");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
        Ok(Some(config))
    }

    pub fn load() -> Result<Option<Self>, ConfigError> {
        Self::load_from(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Save to `path`, creating parent directories as needed, then read the
    /// file back and verify it matches what was written.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
        fs::write(path, &json)?;

        let read_back = fs::read_to_string(path)?;
        if read_back != json {
            return Err(ConfigError::VerificationFailed);
        }
        info!("gateway config saved to {path:?}");
        Ok(())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Load the config at `path`, or derive a fresh EUI from `mac` and save
    /// a default config there if none existed yet.
    pub fn load_or_create_at(path: &Path, mac: [u8; 6]) -> Result<Self, ConfigError> {
        if let Some(config) = Self::load_from(path)? {
            info!("loaded existing gateway config from {path:?}");
            return Ok(config);
        }
        let eui = derive_eui_from_mac(mac);
        let config = Self::new(eui);
        config.save_to(path)?;
        Ok(config)
    }

    pub fn server_addr(&self) -> std::net::SocketAddr {
        use std::net::ToSocketAddrs;
        format!("{}:{}", self.server.host, self.server.port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut it| it.next())
            .unwrap_or_else(|| ([127, 0, 0, 1], self.server.port).into())
    }

    pub fn config_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }
}

/// Synthesize a gateway EUI from a MAC address (§6):
/// `MAC[0..3] || 0xFF 0xFE || MAC[3..6]`.
pub fn derive_eui_from_mac(mac: [u8; 6]) -> [u8; 8] {
    [
        mac[0], mac[1], mac[2], 0xFF, 0xFE, mac[3], mac[4], mac[5],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_path() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("au915-gateway-test-{}-{id}.json", std::process::id()))
    }

    #[test]
    fn eui_derivation_matches_spec_formula() {
        let mac = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        assert_eq!(
            derive_eui_from_mac(mac),
            [0x11, 0x22, 0x33, 0xFF, 0xFE, 0x44, 0x55, 0x66]
        );
    }

    #[test]
    fn save_then_load_roundtrips() {
        let path = unique_path();
        let config = GatewayConfig::new([0xAA; 8]);
        config.save_to(&path).expect("save should succeed");

        let loaded = GatewayConfig::load_from(&path).unwrap().unwrap();
        assert_eq!(loaded.gateway_eui, config.gateway_eui);
        assert_eq!(loaded.lora.channels.len(), 64);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn load_from_missing_path_returns_none() {
        let path = unique_path();
        assert!(GatewayConfig::load_from(&path).unwrap().is_none());
    }

    #[test]
    fn load_or_create_persists_eui_across_calls() {
        let path = unique_path();
        let mac = [1, 2, 3, 4, 5, 6];
        let first = GatewayConfig::load_or_create_at(&path, mac).unwrap();
        let second = GatewayConfig::load_or_create_at(&path, [9, 9, 9, 9, 9, 9]).unwrap();
        assert_eq!(first.gateway_eui, second.gateway_eui);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn default_lora_config_enables_only_sub_band_zero() {
        let lora = LoraConfig::default();
        let enabled: Vec<_> = lora.channels.iter().filter(|c| c.enabled).collect();
        assert_eq!(enabled.len(), 8);
        assert!(enabled.iter().all(|c| c.frequency_hz < 915_200_000 + 8 * 200_000));
    }
}
