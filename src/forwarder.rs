//! Gateway core (§4.5): the forwarder that owns the channel manager and the
//! protocol engine, and the two bridge types that let them talk to each
//! other without a cyclic dependency between the two modules (§9 design
//! note: the same pattern the teacher uses to keep its BLE and LoRa layers
//! from depending on each other, each only seeing the narrow trait the other
//! side needs).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::channel_manager::{ChannelManager, RxSink};
use crate::error::GatewayError;
use crate::link::LinkStatus;
use crate::model::{RadioConfig, RxDescriptor, TxRequest, TxSubmitOutcome};
use crate::protocol::{DownlinkSink, ProtocolConfig, ProtocolEngine, ProtocolHandle};
use crate::queue;
use crate::radio::{Radio, RadioBus};
use crate::stats::{ForwarderStatus, GatewayStats};

/// Capacity of the RX queue between the channel manager and the gateway core
/// (§4.4).
pub const RX_QUEUE_CAPACITY: usize = 32;

/// Bridges the channel manager's RX worker to the protocol engine's uplink
/// queue: updates stats and applies the CRC-based forwarding filter before
/// handing descriptors on (§4.4, §4.5).
struct RxBridge {
    stats: Arc<GatewayStats>,
    uplink_tx: queue::Sender<RxDescriptor>,
    forward_crc_bad: bool,
}

impl RxSink for RxBridge {
    fn on_rx(&self, descriptor: RxDescriptor) {
        self.stats.rx_total.fetch_add(1, Ordering::Relaxed);
        if descriptor.crc_ok {
            self.stats.rx_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.rx_bad.fetch_add(1, Ordering::Relaxed);
            if !self.forward_crc_bad {
                return;
            }
        }
        self.stats.record_rx_time();
        if !self.uplink_tx.try_send(descriptor) {
            self.stats.rx_queue_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// The other direction: downlinks decoded by the protocol engine are handed
/// to the channel manager's TX queue. `ChannelManager::schedule_tx` already
/// does the enqueue/drop-count bookkeeping, so this is a thin adaptor.
impl DownlinkSink for ChannelManager {
    fn on_downlink(&self, req: TxRequest) -> TxSubmitOutcome {
        self.schedule_tx(req)
    }
}

/// Gateway core lifecycle knobs not already carried by [`ProtocolConfig`] or
/// the RX radio's [`RadioConfig`].
pub struct GatewayCoreConfig {
    pub rx_radio_config: RadioConfig,
    pub protocol: ProtocolConfig,
    /// Periodic RX channel hopping across the AU915 uplink plan; `None`
    /// leaves the RX radio parked on `rx_radio_config.frequency_hz` (§4.2).
    pub hop_interval: Option<Duration>,
    /// Forward frames that failed CRC instead of dropping them (§4.4).
    pub forward_crc_bad: bool,
}

/// The running gateway: the channel manager's two radio worker threads and
/// the protocol engine's async task, wired together, plus the shared stats
/// and liveness state both sides read and write (§4.5).
pub struct GatewayCore {
    channel_manager: Arc<ChannelManager>,
    protocol_handle: Option<ProtocolHandle>,
    stats: Arc<GatewayStats>,
    status: Arc<ForwarderStatus>,
}

impl GatewayCore {
    /// Bring up both radios, the channel manager, and the protocol engine,
    /// and start the uplink/downlink pipeline between them.
    pub async fn start<B>(
        rx_radio: Radio<B>,
        tx_radio: Radio<B>,
        config: GatewayCoreConfig,
        link: Arc<dyn LinkStatus>,
    ) -> Result<Self, GatewayError>
    where
        B: RadioBus + 'static,
    {
        let stats = Arc::new(GatewayStats::default());
        let status = Arc::new(ForwarderStatus::default());
        let (uplink_tx, uplink_rx) = queue::bounded::<RxDescriptor>(RX_QUEUE_CAPACITY);

        let rx_bridge = Arc::new(RxBridge {
            stats: stats.clone(),
            uplink_tx,
            forward_crc_bad: config.forward_crc_bad,
        });

        let channel_manager = Arc::new(ChannelManager::start_with_hopping(
            rx_radio,
            config.rx_radio_config,
            tx_radio,
            rx_bridge,
            stats.clone(),
            config.hop_interval,
        )?);

        let downlink_sink: Arc<dyn DownlinkSink> = channel_manager.clone();
        let engine = ProtocolEngine::bind(
            config.protocol,
            stats.clone(),
            status.clone(),
            downlink_sink,
            link,
        )
        .await?;
        let protocol_handle = engine.spawn(uplink_rx);

        Ok(Self {
            channel_manager,
            protocol_handle: Some(protocol_handle),
            stats,
            status,
        })
    }

    pub fn stats(&self) -> &GatewayStats {
        &self.stats
    }

    pub fn status(&self) -> &ForwarderStatus {
        &self.status
    }

    /// Current monotonic microsecond clock, shared by the radio driver and
    /// the protocol engine's liveness check (§4.5).
    pub fn now_us(&self) -> u32 {
        crate::time::now_us()
    }

    /// Ask the RX radio to retune at its next poll (§4.5, §4.6).
    pub fn retune_rx(&self, freq_hz: u32) {
        self.channel_manager.request_retune(freq_hz);
    }

    pub fn tx_queue_dropped(&self) -> u64 {
        self.channel_manager.tx_queue_dropped()
    }

    /// Stop the protocol engine, then let the channel manager's `Drop` impl
    /// join its worker threads once this is the last reference to it.
    pub async fn stop(mut self) {
        if let Some(handle) = self.protocol_handle.take() {
            handle.stop().await;
        }
        drop(self.channel_manager);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::AlwaysConnected;
    use crate::model::{Bandwidth, CodingRate, Modulation};
    use crate::radio::MockBus;
    use tokio::net::UdpSocket;

    fn sample_descriptor(crc_ok: bool) -> RxDescriptor {
        RxDescriptor {
            payload: vec![1, 2, 3],
            modulation: Modulation {
                frequency_hz: 916_800_000,
                bandwidth: Bandwidth::Khz125,
                spreading_factor: 7,
                coding_rate: CodingRate::CR_4_5,
            },
            rssi_dbm: -39,
            snr_db: 10.0,
            crc_ok,
            hw_timestamp_us: 123_456,
            rf_chain_index: 0,
        }
    }

    #[test]
    fn rx_bridge_counts_and_forwards_crc_ok_frames() {
        let stats = Arc::new(GatewayStats::default());
        let (tx, mut rx) = queue::bounded::<RxDescriptor>(4);
        let bridge = RxBridge {
            stats: stats.clone(),
            uplink_tx: tx,
            forward_crc_bad: false,
        };
        bridge.on_rx(sample_descriptor(true));
        assert_eq!(stats.rx_total.load(Ordering::Relaxed), 1);
        assert_eq!(stats.rx_ok.load(Ordering::Relaxed), 1);
        assert!(rx.try_recv().is_some());
    }

    #[test]
    fn rx_bridge_drops_crc_bad_frames_by_default() {
        let stats = Arc::new(GatewayStats::default());
        let (tx, mut rx) = queue::bounded::<RxDescriptor>(4);
        let bridge = RxBridge {
            stats: stats.clone(),
            uplink_tx: tx,
            forward_crc_bad: false,
        };
        bridge.on_rx(sample_descriptor(false));
        assert_eq!(stats.rx_bad.load(Ordering::Relaxed), 1);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn rx_bridge_can_be_configured_to_forward_crc_bad_frames() {
        let stats = Arc::new(GatewayStats::default());
        let (tx, mut rx) = queue::bounded::<RxDescriptor>(4);
        let bridge = RxBridge {
            stats: stats.clone(),
            uplink_tx: tx,
            forward_crc_bad: true,
        };
        bridge.on_rx(sample_descriptor(false));
        assert!(rx.try_recv().is_some());
    }

    #[tokio::test]
    async fn gateway_core_starts_and_stops_cleanly() {
        let loopback = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = loopback.local_addr().unwrap();

        let rx_radio = Radio::new(MockBus::new(), "rx");
        let tx_radio = Radio::new(MockBus::new(), "tx");
        let config = GatewayCoreConfig {
            rx_radio_config: RadioConfig::default(),
            protocol: ProtocolConfig::new(server_addr, [0xAA; 8]),
            hop_interval: None,
            forward_crc_bad: false,
        };

        let core = GatewayCore::start(rx_radio, tx_radio, config, Arc::new(AlwaysConnected))
            .await
            .expect("gateway core should start");

        assert_eq!(core.stats().rx_total.load(Ordering::Relaxed), 0);
        // Optimistically connected at startup (§8 testable property 7); only
        // a 30s liveness timeout or an explicit ack flips this.
        assert!(core.status().is_connected());

        core.stop().await;
    }
}
