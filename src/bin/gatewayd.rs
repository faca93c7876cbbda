//! `gatewayd`: CLI entry point for the AU915 packet-forwarder gateway.
//!
//! Host-only: unlike the teacher's `node.rs`/`host-node.rs` split, there is
//! no ESP32 target for this binary, so there is only one `main`, shaped the
//! same way the teacher's host path already is: `env_logger` from a CLI-
//! overridable filter, `#[tokio::main]`, and a `ctrl_c`-driven graceful
//! shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

use au915_gateway::config::GatewayConfig;
use au915_gateway::forwarder::GatewayCoreConfig;
use au915_gateway::link::AlwaysConnected;
use au915_gateway::protocol::ProtocolConfig;
use au915_gateway::radio::{MockBus, Radio};
use au915_gateway::GatewayCore;

#[derive(Parser, Debug)]
#[command(name = "gatewayd", about = "AU915 dual-radio LoRaWAN packet-forwarder")]
struct Cli {
    /// Path to the durable gateway configuration file. Mirrors
    /// `config::DEFAULT_CONFIG_PATH`.
    #[arg(long, default_value = "/etc/au915-gateway/config.json")]
    config: String,

    /// Override the configured network server, e.g. `eu1.cloud.thethings.network:1700`.
    #[arg(long)]
    server: Option<SocketAddr>,

    /// Override the RX radio's initial frequency in Hz (must be one of the
    /// 64 AU915 uplink channels, §4.6).
    #[arg(long)]
    rx_freq: Option<u32>,

    /// Enable periodic RX channel hopping across the configured sub-band.
    #[arg(long)]
    hop: bool,

    /// `env_logger` filter directive, e.g. `info`, `debug`, `au915_gateway=trace`.
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Derive a MAC-backed gateway EUI when no config exists yet, by reading the
/// first non-loopback interface's address from sysfs. Falls back to a fixed
/// placeholder (logged loudly) if nothing usable is found, since a Pi
/// without a wired NIC up yet should not block gateway start.
fn host_mac_address() -> [u8; 6] {
    let net_dir = std::path::Path::new("/sys/class/net");
    let entries = match std::fs::read_dir(net_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("gatewayd: cannot read {net_dir:?}: {e}");
            return [0, 0, 0, 0, 0, 0];
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == "lo" {
            continue;
        }
        let addr_path = entry.path().join("address");
        if let Ok(text) = std::fs::read_to_string(&addr_path) {
            if let Some(mac) = parse_mac(text.trim()) {
                if mac != [0, 0, 0, 0, 0, 0] {
                    return mac;
                }
            }
        }
    }

    warn!("gatewayd: no usable network interface found, using placeholder MAC for gateway EUI");
    [0, 0, 0, 0, 0, 0]
}

fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut bytes = [0u8; 6];
    let mut parts = text.split(':');
    for b in bytes.iter_mut() {
        *b = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(bytes)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    info!("=== au915-gateway starting ===");

    let config_path = std::path::PathBuf::from(&cli.config);
    let mac = host_mac_address();
    let mut config = match GatewayConfig::load_or_create_at(&config_path, mac) {
        Ok(c) => c,
        Err(e) => {
            error!("gatewayd: failed to load/create config at {config_path:?}: {e}");
            std::process::exit(1);
        }
    };

    if let Some(server) = cli.server {
        config.server.host = server.ip().to_string();
        config.server.port = server.port();
    }
    if let Some(freq) = cli.rx_freq {
        for chan in &mut config.lora.channels {
            chan.enabled = chan.frequency_hz == freq;
        }
    }

    info!(
        "gatewayd: gateway EUI {}",
        config
            .gateway_eui
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join("")
    );
    info!("gatewayd: server {}", config.server_addr());

    // No dedicated hardware backend is wired up yet: `--features hardware`
    // gates the bus implementation, not its GPIO pin assignment, which is
    // site-specific and not something this binary should hardcode.
    #[cfg(feature = "hardware")]
    {
        error!("gatewayd: built with `hardware` feature but pin wiring is not configured in this binary; falling back to the mock radio backend");
    }
    let rx_radio = Radio::new(MockBus::new(), "rx");
    let tx_radio = Radio::new(MockBus::new(), "tx");

    let rx_radio_config = config.lora.rx_radio_config();
    let mut protocol_config = ProtocolConfig::new(config.server_addr(), config.gateway_eui);
    protocol_config.keepalive_interval = Duration::from_millis(config.server.keepalive_ms);
    protocol_config.stat_interval = Duration::from_millis(config.server.stat_interval_ms);

    let core_config = GatewayCoreConfig {
        rx_radio_config,
        protocol: protocol_config,
        hop_interval: cli.hop.then_some(Duration::from_secs(60)),
        forward_crc_bad: false,
    };

    let core = match GatewayCore::start(rx_radio, tx_radio, core_config, Arc::new(AlwaysConnected))
        .await
    {
        Ok(core) => core,
        Err(e) => {
            error!("gatewayd: failed to start gateway core: {e}");
            std::process::exit(1);
        }
    };

    info!("gatewayd: running (Ctrl+C to stop)");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("gatewayd: failed to listen for ctrl_c: {e}");
    }

    info!("gatewayd: shutting down");
    core.stop().await;
    info!("gatewayd: shutdown complete");
}
