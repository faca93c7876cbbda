//! Async UDP protocol engine: PUSH_DATA/PULL_DATA keepalive, uplink batching,
//! downlink dispatch, and periodic `stat` reporting (§4.3).
//!
//! Unlike [`crate::channel_manager`], this layer is genuinely async: the
//! socket I/O and the interval timers map directly onto `tokio::select!`,
//! the same shape the teacher uses for its event-loop tasks (`spawn_event_task`
//! in its node orchestration).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::link::LinkStatus;
use crate::model::{RxDescriptor, TxRequest, TxSubmitOutcome};
use crate::queue;
use crate::stats::{ForwarderStatus, GatewayStats};

use super::json;
use super::wire::{Frame, PacketType};

/// Maximum rxpk entries batched into one PUSH_DATA (§4.3).
const UPLINK_BATCH_SIZE: usize = 8;
/// Upper bound on waiting for the first descriptor of a new batch before
/// flushing whatever has accumulated (§4.3).
const BATCH_FLUSH_DELAY: Duration = Duration::from_millis(100);
/// Outbound UDP datagram cap (§4.3): a collected batch that would encode
/// past this is split across multiple PUSH_DATA datagrams rather than sent
/// oversized.
const OUTBOUND_DATAGRAM_CAP: usize = 2048;

/// Accepts a decoded downlink for scheduling, without the protocol engine
/// knowing anything about the channel manager (mirrors [`crate::channel_manager::RxSink`]).
pub trait DownlinkSink: Send + Sync {
    fn on_downlink(&self, req: TxRequest) -> TxSubmitOutcome;
}

#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub server_addr: SocketAddr,
    pub gateway_eui: [u8; 8],
    pub keepalive_interval: Duration,
    pub stat_interval: Duration,
    pub liveness_threshold_us: u32,
}

impl ProtocolConfig {
    pub fn new(server_addr: SocketAddr, gateway_eui: [u8; 8]) -> Self {
        Self {
            server_addr,
            gateway_eui,
            keepalive_interval: Duration::from_secs(10),
            stat_interval: Duration::from_secs(30),
            liveness_threshold_us: 30_000_000,
        }
    }
}

/// The running protocol engine: owns the UDP socket and the bookkeeping for
/// in-flight PUSH_DATA/PULL_DATA tokens.
pub struct ProtocolEngine {
    socket: UdpSocket,
    config: ProtocolConfig,
    stats: Arc<GatewayStats>,
    status: Arc<ForwarderStatus>,
    downlink_sink: Arc<dyn DownlinkSink>,
    link: Arc<dyn LinkStatus>,
    pending_push_tokens: Mutex<HashSet<u16>>,
    pending_pull_tokens: Mutex<HashSet<u16>>,
    cancel: CancellationToken,
}

/// Handle to a spawned engine task; dropping it does not stop the task.
/// Call [`ProtocolHandle::stop`] for a clean shutdown.
///
/// Shutdown is cooperative (§5: "each worker observes a running flag and
/// exits its loop"), the same shape the teacher's `node.rs` uses its
/// `CancellationToken` for. `stop` signals the token and waits for the task
/// to observe it and return, rather than aborting it mid-send.
pub struct ProtocolHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ProtocolHandle {
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

impl ProtocolEngine {
    pub async fn bind(
        config: ProtocolConfig,
        stats: Arc<GatewayStats>,
        status: Arc<ForwarderStatus>,
        downlink_sink: Arc<dyn DownlinkSink>,
        link: Arc<dyn LinkStatus>,
    ) -> std::io::Result<Arc<Self>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(config.server_addr).await?;
        Ok(Arc::new(Self {
            socket,
            config,
            stats,
            status,
            downlink_sink,
            link,
            pending_push_tokens: Mutex::new(HashSet::new()),
            pending_pull_tokens: Mutex::new(HashSet::new()),
            cancel: CancellationToken::new(),
        }))
    }

    /// Spawn the engine's event loop, consuming uplinks from `uplinks`.
    pub fn spawn(self: Arc<Self>, uplinks: queue::Receiver<RxDescriptor>) -> ProtocolHandle {
        let cancel = self.cancel.clone();
        let task = tokio::spawn(run_loop(self, uplinks));
        ProtocolHandle { cancel, task }
    }

    fn next_token(&self) -> u16 {
        rand::thread_rng().gen()
    }

    async fn send_frame(&self, frame: &Frame) -> std::io::Result<()> {
        self.socket.send(&frame.to_bytes()).await?;
        Ok(())
    }

    async fn send_push_data(&self, body: String) -> std::io::Result<()> {
        let token = self.next_token();
        self.pending_push_tokens.lock().unwrap().insert(token);
        self.stats.push_sent.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::new(
            token,
            PacketType::PushData,
            Some(self.config.gateway_eui),
            body.into_bytes(),
        );
        self.send_frame(&frame).await
    }

    async fn send_pull_data(&self) -> std::io::Result<()> {
        let token = self.next_token();
        self.pending_pull_tokens.lock().unwrap().insert(token);
        let frame = Frame::new(token, PacketType::PullData, Some(self.config.gateway_eui), Vec::new());
        self.send_frame(&frame).await
    }

    async fn send_tx_ack(&self, token: u16, error: Option<&str>) -> std::io::Result<()> {
        let body = json::encode_tx_ack(error).unwrap_or_default().into_bytes();
        let frame = Frame::new(token, PacketType::TxAck, Some(self.config.gateway_eui), body);
        self.send_frame(&frame).await
    }

    async fn emit_uplink_batch(&self, batch: Vec<RxDescriptor>) {
        if batch.is_empty() {
            return;
        }
        if !self.link.is_connected() {
            debug!("protocol: link down, dropping batch of {} uplinks", batch.len());
            return;
        }
        let descriptors: Vec<(RxDescriptor, u8)> = batch
            .into_iter()
            .map(|d| {
                let chan = ((d.modulation.frequency_hz.saturating_sub(crate::freq_plan::UPLINK_START_HZ))
                    / crate::freq_plan::UPLINK_STEP_HZ) as u8;
                (d, chan)
            })
            .collect();

        // Grow the pending chunk one descriptor at a time; the moment adding
        // one would push the encoded datagram past the outbound cap, flush
        // what fit and defer that descriptor into the next chunk (§4.3).
        let mut chunk: Vec<(RxDescriptor, u8)> = Vec::with_capacity(descriptors.len());
        for d in descriptors {
            chunk.push(d);
            if json::encode_uplink_batch(&chunk).len() > OUTBOUND_DATAGRAM_CAP && chunk.len() > 1 {
                let deferred = chunk.pop().expect("just pushed");
                self.flush_uplink_chunk(std::mem::take(&mut chunk)).await;
                chunk.push(deferred);
            }
        }
        if !chunk.is_empty() {
            self.flush_uplink_chunk(chunk).await;
        }
    }

    async fn flush_uplink_chunk(&self, chunk: Vec<(RxDescriptor, u8)>) {
        let forwarded = chunk.len() as u64;
        let body = json::encode_uplink_batch(&chunk);
        if let Err(e) = self.send_push_data(body).await {
            warn!("protocol: failed to send uplink PUSH_DATA: {e}");
            return;
        }
        self.stats.rx_forwarded.fetch_add(forwarded, Ordering::Relaxed);
    }

    async fn emit_stat(&self) {
        if !self.link.is_connected() {
            debug!("protocol: link down, skipping stat report");
            return;
        }
        let now = chrono::Utc::now();
        let time_gmt = now.format("%Y-%m-%d %H:%M:%S GMT").to_string();
        let body = json::encode_stat(&time_gmt, &self.stats.to_json_fields());
        if let Err(e) = self.send_push_data(body).await {
            warn!("protocol: failed to send stat PUSH_DATA: {e}");
        }
    }

    async fn handle_datagram(&self, bytes: &[u8]) {
        let frame = match Frame::from_bytes(bytes) {
            Ok(f) => f,
            Err(e) => {
                debug!("protocol: dropping malformed datagram: {e}");
                return;
            }
        };
        match frame.packet_type {
            PacketType::PushAck => {
                if self.pending_push_tokens.lock().unwrap().remove(&frame.token) {
                    self.stats.push_acked.fetch_add(1, Ordering::Relaxed);
                    self.status.on_push_ack();
                }
            }
            PacketType::PullAck => {
                if self.pending_pull_tokens.lock().unwrap().remove(&frame.token) {
                    self.status.on_pull_ack();
                }
            }
            PacketType::PullResp => {
                let body = match frame.body_str() {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = self.send_tx_ack(frame.token, Some("INVALID_JSON")).await;
                        return;
                    }
                };
                match json::decode_pull_resp(body) {
                    Ok(req) => {
                        let outcome = self.downlink_sink.on_downlink(req);
                        if outcome == TxSubmitOutcome::QueueFull {
                            self.stats.tx_queue_dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        let _ = self.send_tx_ack(frame.token, outcome.tx_ack_code()).await;
                    }
                    Err(e) => {
                        warn!("protocol: rejecting PULL_RESP: {e}");
                        let _ = self.send_tx_ack(frame.token, Some(e.tx_ack_code())).await;
                    }
                }
            }
            other => {
                debug!("protocol: ignoring unexpected {other:?} from server");
            }
        }
    }
}

async fn run_loop(engine: Arc<ProtocolEngine>, mut uplinks: queue::Receiver<RxDescriptor>) {
    info!("protocol: engine starting, server={}", engine.config.server_addr);
    if engine.link.is_connected() {
        if let Err(e) = engine.send_pull_data().await {
            warn!("protocol: initial PULL_DATA failed: {e}");
        }
    }

    let mut keepalive = tokio::time::interval(engine.config.keepalive_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stat_tick = tokio::time::interval(engine.config.stat_interval);
    stat_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut recv_buf = [0u8; 2048];
    let mut batch: Vec<RxDescriptor> = Vec::with_capacity(UPLINK_BATCH_SIZE);

    loop {
        tokio::select! {
            biased;

            _ = engine.cancel.cancelled() => {
                debug!("protocol: cancelled, stopping engine");
                return;
            }

            first = uplinks.recv(), if batch.is_empty() => {
                match first {
                    Some(d) => {
                        batch.push(d);
                        drain_batch(&mut uplinks, &mut batch);
                        if batch.len() < UPLINK_BATCH_SIZE {
                            tokio::time::sleep(BATCH_FLUSH_DELAY).await;
                            drain_batch(&mut uplinks, &mut batch);
                        }
                        let drained = std::mem::take(&mut batch);
                        engine.emit_uplink_batch(drained).await;
                    }
                    None => {
                        debug!("protocol: uplink queue closed, stopping engine");
                        return;
                    }
                }
            }

            _ = keepalive.tick() => {
                if engine.link.is_connected() {
                    if let Err(e) = engine.send_pull_data().await {
                        warn!("protocol: keepalive PULL_DATA failed: {e}");
                    }
                } else {
                    debug!("protocol: link down, skipping keepalive PULL_DATA");
                }
                engine.status.check_liveness(crate::time::now_us(), engine.config.liveness_threshold_us);
            }

            _ = stat_tick.tick() => {
                engine.emit_stat().await;
            }

            recvd = engine.socket.recv(&mut recv_buf) => {
                match recvd {
                    Ok(n) => engine.handle_datagram(&recv_buf[..n]).await,
                    Err(e) => warn!("protocol: recv error: {e}"),
                }
            }
        }
    }
}

fn drain_batch(uplinks: &mut queue::Receiver<RxDescriptor>, batch: &mut Vec<RxDescriptor>) {
    while batch.len() < UPLINK_BATCH_SIZE {
        match uplinks.try_recv() {
            Some(d) => batch.push(d),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Bandwidth, CodingRate, Modulation};

    struct AcceptingSink;
    impl DownlinkSink for AcceptingSink {
        fn on_downlink(&self, _req: TxRequest) -> TxSubmitOutcome {
            TxSubmitOutcome::Accepted
        }
    }

    fn sample_descriptor() -> RxDescriptor {
        RxDescriptor {
            payload: vec![1, 2, 3],
            modulation: Modulation {
                frequency_hz: 915_200_000,
                bandwidth: Bandwidth::Khz125,
                spreading_factor: 7,
                coding_rate: CodingRate::CR_4_5,
            },
            rssi_dbm: -90,
            snr_db: 5.0,
            crc_ok: true,
            hw_timestamp_us: 1,
            rf_chain_index: 0,
        }
    }

    #[tokio::test]
    async fn push_data_round_trip_against_loopback_server() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let config = ProtocolConfig::new(server_addr, [0xAA; 8]);
        let stats = Arc::new(GatewayStats::default());
        let status = Arc::new(ForwarderStatus::default());
        let engine = ProtocolEngine::bind(config, stats.clone(), status, Arc::new(AcceptingSink), Arc::new(crate::link::AlwaysConnected))
            .await
            .unwrap();

        engine.send_push_data(r#"{"rxpk":[]}"#.to_string()).await.unwrap();
        assert_eq!(stats.push_sent.load(Ordering::Relaxed), 1);

        let mut buf = [0u8; 512];
        let (n, client_addr) = server.recv_from(&mut buf).await.unwrap();
        let frame = Frame::from_bytes(&buf[..n]).unwrap();
        assert_eq!(frame.packet_type, PacketType::PushData);
        assert_eq!(frame.gateway_eui, Some([0xAA; 8]));

        let ack = Frame::new(frame.token, PacketType::PushAck, None, Vec::new());
        server.send_to(&ack.to_bytes(), client_addr).await.unwrap();

        // Give the (not-yet-running) handler a chance if this were hooked to
        // run_loop; here we drive handle_datagram directly since the loop
        // itself is exercised by emit_uplink_batch below.
        let mut recv_buf = [0u8; 512];
        let n = engine.socket.recv(&mut recv_buf).await.unwrap();
        engine.handle_datagram(&recv_buf[..n]).await;
        assert_eq!(stats.push_acked.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn pull_resp_with_valid_txpk_is_accepted_and_acked() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let config = ProtocolConfig::new(server_addr, [0; 8]);
        let stats = Arc::new(GatewayStats::default());
        let status = Arc::new(ForwarderStatus::default());
        let engine = ProtocolEngine::bind(config, stats, status, Arc::new(AcceptingSink), Arc::new(crate::link::AlwaysConnected))
            .await
            .unwrap();

        let body = br#"{"txpk":{"imme":true,"freq":923.3,"powe":14,"datr":"SF12BW500","codr":"4/5","ipol":true,"size":3,"data":"AQID"}}"#;
        let frame = Frame::new(0x55AA, PacketType::PullResp, None, body.to_vec());
        server.send_to(&frame.to_bytes(), engine.socket.local_addr().unwrap()).await.unwrap();

        let mut recv_buf = [0u8; 512];
        let n = engine.socket.recv(&mut recv_buf).await.unwrap();
        engine.handle_datagram(&recv_buf[..n]).await;

        let mut ack_buf = [0u8; 512];
        let (n, _) = server.recv_from(&mut ack_buf).await.unwrap();
        let ack_frame = Frame::from_bytes(&ack_buf[..n]).unwrap();
        assert_eq!(ack_frame.packet_type, PacketType::TxAck);
        assert_eq!(ack_frame.token, 0x55AA);
        assert!(ack_frame.body.is_empty());
    }

    struct RejectingSink(TxSubmitOutcome);
    impl DownlinkSink for RejectingSink {
        fn on_downlink(&self, _req: TxRequest) -> TxSubmitOutcome {
            self.0
        }
    }

    #[tokio::test]
    async fn pull_resp_rejected_as_too_late_carries_the_right_tx_ack_code() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let config = ProtocolConfig::new(server_addr, [0; 8]);
        let stats = Arc::new(GatewayStats::default());
        let status = Arc::new(ForwarderStatus::default());
        let engine = ProtocolEngine::bind(
            config,
            stats.clone(),
            status,
            Arc::new(RejectingSink(TxSubmitOutcome::TooLate)),
            Arc::new(crate::link::AlwaysConnected),
        )
        .await
        .unwrap();

        let body = br#"{"txpk":{"tmst":1,"freq":923.3,"powe":14,"datr":"SF12BW500","codr":"4/5","ipol":true,"size":3,"data":"AQID"}}"#;
        let frame = Frame::new(0x1234, PacketType::PullResp, None, body.to_vec());
        server.send_to(&frame.to_bytes(), engine.socket.local_addr().unwrap()).await.unwrap();

        let mut recv_buf = [0u8; 512];
        let n = engine.socket.recv(&mut recv_buf).await.unwrap();
        engine.handle_datagram(&recv_buf[..n]).await;

        let mut ack_buf = [0u8; 512];
        let (n, _) = server.recv_from(&mut ack_buf).await.unwrap();
        let ack_frame = Frame::from_bytes(&ack_buf[..n]).unwrap();
        let ack_body = ack_frame.body_str().unwrap();
        assert!(ack_body.contains(r#""error":"TOO_LATE""#));
        // TOO_LATE/TOO_EARLY are scheduling rejections, not queue-full drops.
        assert_eq!(stats.tx_queue_dropped.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn pull_resp_rejected_as_queue_full_counts_tx_queue_dropped() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let config = ProtocolConfig::new(server_addr, [0; 8]);
        let stats = Arc::new(GatewayStats::default());
        let status = Arc::new(ForwarderStatus::default());
        let engine = ProtocolEngine::bind(
            config,
            stats.clone(),
            status,
            Arc::new(RejectingSink(TxSubmitOutcome::QueueFull)),
            Arc::new(crate::link::AlwaysConnected),
        )
        .await
        .unwrap();

        let body = br#"{"txpk":{"imme":true,"freq":923.3,"powe":14,"datr":"SF12BW500","codr":"4/5","ipol":true,"size":3,"data":"AQID"}}"#;
        let frame = Frame::new(0x1234, PacketType::PullResp, None, body.to_vec());
        server.send_to(&frame.to_bytes(), engine.socket.local_addr().unwrap()).await.unwrap();

        let mut recv_buf = [0u8; 512];
        let n = engine.socket.recv(&mut recv_buf).await.unwrap();
        engine.handle_datagram(&recv_buf[..n]).await;

        let mut ack_buf = [0u8; 512];
        let (n, _) = server.recv_from(&mut ack_buf).await.unwrap();
        let ack_frame = Frame::from_bytes(&ack_buf[..n]).unwrap();
        let ack_body = ack_frame.body_str().unwrap();
        assert!(ack_body.contains(r#""error":"TX_FAILED""#));
        assert_eq!(stats.tx_queue_dropped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn emit_uplink_batch_counts_forwarded_descriptors() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let config = ProtocolConfig::new(server_addr, [0; 8]);
        let stats = Arc::new(GatewayStats::default());
        let status = Arc::new(ForwarderStatus::default());
        let engine = ProtocolEngine::bind(config, stats.clone(), status, Arc::new(AcceptingSink), Arc::new(crate::link::AlwaysConnected))
            .await
            .unwrap();

        engine.emit_uplink_batch(vec![sample_descriptor(), sample_descriptor()]).await;
        assert_eq!(stats.rx_forwarded.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn emit_uplink_batch_splits_across_datagrams_past_the_outbound_cap() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let config = ProtocolConfig::new(server_addr, [0; 8]);
        let stats = Arc::new(GatewayStats::default());
        let status = Arc::new(ForwarderStatus::default());
        let engine = ProtocolEngine::bind(config, stats.clone(), status, Arc::new(AcceptingSink), Arc::new(crate::link::AlwaysConnected))
            .await
            .unwrap();

        // 8 max-size (255-byte) payloads base64-encode to well over 2048
        // bytes combined, so this must produce more than one datagram.
        let mut big = sample_descriptor();
        big.payload = vec![0xAB; 255];
        let batch: Vec<_> = (0..UPLINK_BATCH_SIZE).map(|_| big.clone()).collect();

        engine.emit_uplink_batch(batch).await;
        assert_eq!(stats.rx_forwarded.load(Ordering::Relaxed), UPLINK_BATCH_SIZE as u64);

        let mut datagram_count = 0;
        let mut total_rxpk = 0;
        loop {
            let mut buf = [0u8; 4096];
            match tokio::time::timeout(Duration::from_millis(200), server.recv_from(&mut buf)).await {
                Ok(Ok((n, _))) => {
                    // 4-byte header + 8-byte gateway EUI precede the body on PUSH_DATA.
                    assert!(n <= OUTBOUND_DATAGRAM_CAP + 12);
                    let frame = Frame::from_bytes(&buf[..n]).unwrap();
                    let body = frame.body_str().unwrap();
                    let parsed: serde_json::Value = serde_json::from_str(body).unwrap();
                    total_rxpk += parsed["rxpk"].as_array().unwrap().len();
                    datagram_count += 1;
                }
                _ => break,
            }
        }
        assert!(datagram_count > 1, "expected the batch to split across multiple datagrams");
        assert_eq!(total_rxpk, UPLINK_BATCH_SIZE);
    }
}
