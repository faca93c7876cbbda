//! Gateway statistics and forwarder liveness status (§3).
//!
//! Atomic-counter container, grounded on the teacher's `NodeStats`/
//! `InterfaceStats` shape (plain `AtomicU64` fields, a `to_json()` method
//! assembled with `format!`) but holding the forwarder's own counter set
//! instead of mesh interface counters.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic counters updated from the radio worker threads, the protocol
/// engine, and the forwarder core.
#[derive(Debug)]
pub struct GatewayStats {
    pub rx_total: AtomicU64,
    pub rx_ok: AtomicU64,
    pub rx_bad: AtomicU64,
    pub rx_forwarded: AtomicU64,
    pub tx_total: AtomicU64,
    pub tx_ok: AtomicU64,
    pub tx_fail: AtomicU64,
    pub tx_collision: AtomicU64,
    /// Datagrams sent to the server (for the `ackr` formula, §9 open question).
    pub push_sent: AtomicU64,
    pub push_acked: AtomicU64,
    pub rx_queue_dropped: AtomicU64,
    pub tx_queue_dropped: AtomicU64,
    start_time: Instant,
    last_rx_us: AtomicU64,
    last_tx_us: AtomicU64,
}

impl Default for GatewayStats {
    fn default() -> Self {
        Self {
            rx_total: AtomicU64::new(0),
            rx_ok: AtomicU64::new(0),
            rx_bad: AtomicU64::new(0),
            rx_forwarded: AtomicU64::new(0),
            tx_total: AtomicU64::new(0),
            tx_ok: AtomicU64::new(0),
            tx_fail: AtomicU64::new(0),
            tx_collision: AtomicU64::new(0),
            push_sent: AtomicU64::new(0),
            push_acked: AtomicU64::new(0),
            rx_queue_dropped: AtomicU64::new(0),
            tx_queue_dropped: AtomicU64::new(0),
            start_time: Instant::now(),
            last_rx_us: AtomicU64::new(0),
            last_tx_us: AtomicU64::new(0),
        }
    }
}

impl GatewayStats {
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn record_rx_time(&self) {
        self.last_rx_us
            .store(crate::time::now_us() as u64, Ordering::Relaxed);
    }

    pub fn record_tx_time(&self) {
        self.last_tx_us
            .store(crate::time::now_us() as u64, Ordering::Relaxed);
    }

    /// `100 * push_acked / max(push_sent, 1)` (§9 open question: the
    /// reference hardcodes this to 100.0; this is the intended formula).
    pub fn ack_ratio(&self) -> f64 {
        let sent = self.push_sent.load(Ordering::Relaxed).max(1);
        let acked = self.push_acked.load(Ordering::Relaxed);
        100.0 * acked as f64 / sent as f64
    }

    /// Render the `stat` JSON object's numeric fields (§4.3), independent
    /// of the wall-clock `time` field which the protocol engine supplies.
    pub fn to_json_fields(&self) -> String {
        format!(
            r#""rxnb":{},"rxok":{},"rxfw":{},"ackr":{:.1},"dwnb":{},"txnb":{}"#,
            self.rx_total.load(Ordering::Relaxed),
            self.rx_ok.load(Ordering::Relaxed),
            self.rx_forwarded.load(Ordering::Relaxed),
            self.ack_ratio(),
            self.tx_total.load(Ordering::Relaxed),
            self.tx_ok.load(Ordering::Relaxed),
        )
    }
}

/// Liveness of the connection to the network server (§3, §4.3).
///
/// Starts optimistically connected, seeded with the construction time as the
/// liveness baseline, so a gateway that never receives a PULL_ACK still
/// transitions true -> false once `check_liveness` observes 30s of silence
/// (§8 testable property 7), rather than sitting disconnected forever.
#[derive(Debug)]
pub struct ForwarderStatus {
    connected: AtomicBool,
    push_ack_count: AtomicU64,
    pull_ack_count: AtomicU64,
    last_pull_ack_us: AtomicU64,
}

impl Default for ForwarderStatus {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(true),
            push_ack_count: AtomicU64::new(0),
            pull_ack_count: AtomicU64::new(0),
            last_pull_ack_us: AtomicU64::new(crate::time::now_us() as u64),
        }
    }
}

impl ForwarderStatus {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn on_push_ack(&self) {
        self.push_ack_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_pull_ack(&self) {
        self.pull_ack_count.fetch_add(1, Ordering::Relaxed);
        self.last_pull_ack_us
            .store(crate::time::now_us() as u64, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
    }

    pub fn push_ack_count(&self) -> u64 {
        self.push_ack_count.load(Ordering::Relaxed)
    }

    pub fn pull_ack_count(&self) -> u64 {
        self.pull_ack_count.load(Ordering::Relaxed)
    }

    /// Re-evaluate liveness: disconnect if no PULL_ACK arrived within
    /// `threshold_us` of `now_us` (§4.3: 30s default).
    pub fn check_liveness(&self, now_us: u32, threshold_us: u32) {
        let last = self.last_pull_ack_us.load(Ordering::Relaxed) as u32;
        if crate::time::delta_us(now_us, last) > threshold_us as i32 {
            self.connected.store(false, Ordering::Relaxed);
        }
    }
}
