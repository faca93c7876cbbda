//! Channel manager (§4.2): owns the RX-continuous radio and the scheduled-TX
//! radio, serializing transmissions around continuous reception.
//!
//! Register I/O is blocking, so each radio gets its own dedicated OS thread,
//! the same shape the teacher uses implicitly (its ESP-IDF radio calls are
//! blocking too, just called from a task that owns nothing else). Crossing
//! back into async code happens only at the queue boundaries.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, warn};

use crate::model::{RadioConfig, RxDescriptor, Schedule, TxRequest, TxSubmitOutcome};
use crate::queue::{self, Sender};
use crate::radio::{Radio, RadioBus, RadioError, RadioEvent};
use crate::stats::GatewayStats;
use crate::time;

/// Default TX queue capacity (§4.2).
pub const TX_QUEUE_CAPACITY: usize = 16;

/// Consecutive bus errors on one radio before a reset-and-reinit is attempted.
const RESET_ESCALATION_THRESHOLD: u32 = 3;

/// Upper bound on waiting for TX_DONE after starting a transmission (§5).
const TX_DONE_TIMEOUT_MS: u32 = 5_000;

/// Receives RxDescriptors from the RX worker thread without the channel
/// manager knowing anything about the forwarder (§9 design note: breaks the
/// cyclic reference between the channel manager and the gateway core).
pub trait RxSink: Send + Sync {
    fn on_rx(&self, descriptor: RxDescriptor);
}

/// Handle to the running RX and TX worker threads.
pub struct ChannelManager {
    tx_queue: Sender<TxRequest>,
    stats: Arc<GatewayStats>,
    running: Arc<AtomicBool>,
    retune_request: Arc<AtomicU32>,
    rx_thread: Option<JoinHandle<()>>,
    tx_thread: Option<JoinHandle<()>>,
}

impl ChannelManager {
    /// Start the RX-continuous and TX worker threads.
    pub fn start<B>(
        rx_radio: Radio<B>,
        rx_config: RadioConfig,
        tx_radio: Radio<B>,
        sink: Arc<dyn RxSink>,
        stats: Arc<GatewayStats>,
    ) -> Result<Self, RadioError>
    where
        B: RadioBus + 'static,
    {
        Self::start_with_hopping(rx_radio, rx_config, tx_radio, sink, stats, None)
    }

    /// Like [`Self::start`], additionally enabling periodic RX channel
    /// hopping across the AU915 uplink plan (disabled by default, §4.2).
    pub fn start_with_hopping<B>(
        rx_radio: Radio<B>,
        rx_config: RadioConfig,
        tx_radio: Radio<B>,
        sink: Arc<dyn RxSink>,
        stats: Arc<GatewayStats>,
        hop_interval: Option<Duration>,
    ) -> Result<Self, RadioError>
    where
        B: RadioBus + 'static,
    {
        let (tx_sender, tx_receiver) = queue::bounded::<TxRequest>(TX_QUEUE_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));
        let retune_request = Arc::new(AtomicU32::new(0));

        let rx_thread = {
            let running = running.clone();
            let retune_request = retune_request.clone();
            let mut radio = rx_radio;
            radio.init(rx_config)?;
            radio.start_receive()?;
            std::thread::Builder::new()
                .name("radio-rx".into())
                .spawn(move || rx_worker(radio, sink, running, retune_request, hop_interval))
                .expect("spawn radio-rx thread")
        };

        let tx_thread = {
            let running = running.clone();
            let stats = stats.clone();
            let mut radio = tx_radio;
            radio.init(RadioConfig::default())?;
            let mut receiver = tx_receiver;
            std::thread::Builder::new()
                .name("radio-tx".into())
                .spawn(move || tx_worker(radio, &mut receiver, stats, running))
                .expect("spawn radio-tx thread")
        };

        Ok(Self {
            tx_queue: tx_sender,
            stats,
            running,
            retune_request,
            rx_thread: Some(rx_thread),
            tx_thread: Some(tx_thread),
        })
    }

    /// Decide the schedule window synchronously and enqueue the downlink if
    /// it's accepted (§4.2, §4.3 step 4, §8.5 property 5). A `Schedule::At`
    /// target more than 5s in the future or more than 100ms in the past is
    /// rejected here rather than silently dropped later by the TX worker, so
    /// the caller can report the precise TX_ACK error code.
    pub fn schedule_tx(&self, req: TxRequest) -> TxSubmitOutcome {
        if let Schedule::At(target_us) = req.schedule {
            match schedule_decision(target_us, time::now_us()) {
                ScheduleDecision::TooEarly => {
                    warn!("tx: scheduled target too far in the future, rejecting as TOO_EARLY");
                    self.stats.tx_fail.fetch_add(1, Ordering::Relaxed);
                    return TxSubmitOutcome::TooEarly;
                }
                ScheduleDecision::TooLate => {
                    warn!("tx: scheduled target too far in the past, rejecting as TOO_LATE");
                    self.stats.tx_collision.fetch_add(1, Ordering::Relaxed);
                    return TxSubmitOutcome::TooLate;
                }
                ScheduleDecision::Now | ScheduleDecision::Wait => {}
            }
        }
        if self.tx_queue.try_send(req) {
            TxSubmitOutcome::Accepted
        } else {
            TxSubmitOutcome::QueueFull
        }
    }

    /// Ask the RX worker to retune to `freq_hz` at its next poll (§4.5).
    /// Overwrites any not-yet-applied request; `0` is not a valid AU915
    /// frequency so it doubles as the "no request pending" sentinel.
    pub fn request_retune(&self, freq_hz: u32) {
        self.retune_request.store(freq_hz, Ordering::Release);
    }

    pub fn tx_queue_dropped(&self) -> u64 {
        self.tx_queue.dropped_count()
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(h) = self.rx_thread.take() {
            let _ = h.join();
        }
        if let Some(h) = self.tx_thread.take() {
            let _ = h.join();
        }
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn rx_worker<B: RadioBus>(
    mut radio: Radio<B>,
    sink: Arc<dyn RxSink>,
    running: Arc<AtomicBool>,
    retune_request: Arc<AtomicU32>,
    hop_interval: Option<Duration>,
) {
    let mut consecutive_errors: u32 = 0;
    let mut hop_channel: u8 = 0;
    let mut last_hop = std::time::Instant::now();

    while running.load(Ordering::Acquire) {
        let requested = retune_request.swap(0, Ordering::AcqRel);
        if requested != 0 {
            if let Err(e) = radio.retune(requested) {
                warn!("radio-rx: requested retune to {requested} Hz failed: {e}");
            } else {
                debug!("radio-rx: retuned to {requested} Hz on request");
            }
        }

        if let Some(interval) = hop_interval {
            if last_hop.elapsed() >= interval {
                hop_channel = (hop_channel + 1) % crate::freq_plan::UPLINK_CHANNEL_COUNT;
                if let Some(freq) = crate::freq_plan::uplink_freq_hz(hop_channel) {
                    if let Err(e) = radio.retune(freq) {
                        warn!("radio-rx: hop retune failed: {e}");
                    } else {
                        debug!("radio-rx: hopped to channel {hop_channel} ({freq} Hz)");
                    }
                }
                last_hop = std::time::Instant::now();
            }
        }

        match radio.wait_event(1_000) {
            Ok(RadioEvent::Rx(descriptor)) => {
                // Stats and CRC-based forwarding policy belong to the gateway
                // core's `RxSink` (§4.5), not this producer; this thread's
                // job stops at handing the descriptor off.
                consecutive_errors = 0;
                sink.on_rx(descriptor);
            }
            Ok(_) => {
                // RX radio only expects RX_DONE; anything else is spurious.
            }
            Err(RadioError::Timeout) => {}
            Err(e) => {
                consecutive_errors += 1;
                warn!("radio-rx: {e}");
                if consecutive_errors >= RESET_ESCALATION_THRESHOLD {
                    error!("radio-rx: {consecutive_errors} consecutive errors, attempting reset");
                    if let Err(e) = radio.init(*radio.config()) {
                        error!("radio-rx: reset failed: {e}");
                    } else if let Err(e) = radio.start_receive() {
                        error!("radio-rx: failed to resume receive after reset: {e}");
                    } else {
                        consecutive_errors = 0;
                    }
                }
            }
        }
    }
    debug!("radio-rx: worker exiting");
}

/// Outcome of checking a [`Schedule::At`] target against the current clock
/// (§4.2 step 1, §8.5). Pulled out of `schedule_tx` as a pure function so the
/// four scheduling-window cases can be unit tested without a live radio
/// thread or real clock. Evaluated synchronously at submit time, not in
/// `tx_worker`, so a rejection can be reported back through the TX_ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScheduleDecision {
    /// Transmit now (target already reached, or within the immediate window).
    Now,
    /// Wait until the clock reaches the target, then transmit.
    Wait,
    /// Target is more than 5s in the future: reject as TOO_EARLY.
    TooEarly,
    /// Target is more than 100ms in the past: reject as TOO_LATE.
    TooLate,
}

fn schedule_decision(target_us: u32, now_us: u32) -> ScheduleDecision {
    let delta = time::delta_us(target_us, now_us);
    if delta > 5_000_000 {
        ScheduleDecision::TooEarly
    } else if delta < -100_000 {
        ScheduleDecision::TooLate
    } else if delta > 0 {
        ScheduleDecision::Wait
    } else {
        ScheduleDecision::Now
    }
}

fn tx_worker<B: RadioBus>(
    mut radio: Radio<B>,
    receiver: &mut queue::Receiver<TxRequest>,
    stats: Arc<GatewayStats>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        let req = match receiver.blocking_recv() {
            Some(r) => r,
            None => break,
        };

        if !running.load(Ordering::Acquire) {
            break;
        }

        // The schedule window was already decided at submit time
        // (`ChannelManager::schedule_tx`); only an accepted `At` target can
        // reach this queue, so the only thing left to do is wait for it.
        if let Schedule::At(target_us) = req.schedule {
            spin_until(target_us);
        }

        let config = RadioConfig {
            frequency_hz: req.modulation.frequency_hz,
            spreading_factor: req.modulation.spreading_factor,
            bandwidth: req.modulation.bandwidth,
            coding_rate_denom: req.modulation.coding_rate.0,
            invert_iq_tx: req.invert_iq,
            invert_iq_rx: req.invert_iq,
            tx_power_dbm: req.tx_power_dbm,
            ..*radio.config()
        };

        stats.tx_total.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = radio.apply_config(config) {
            error!("tx: failed to apply config: {e}");
            stats.tx_fail.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        if let Err(e) = radio.transmit(&req.payload) {
            error!("tx: transmit failed: {e}");
            stats.tx_fail.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        match radio.wait_event(TX_DONE_TIMEOUT_MS) {
            Ok(RadioEvent::TxDone) => {
                stats.tx_ok.fetch_add(1, Ordering::Relaxed);
                stats.record_tx_time();
            }
            Ok(other) => {
                warn!("tx: unexpected event while awaiting TX_DONE: {other:?}");
                stats.tx_fail.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                error!("tx: {e}");
                stats.tx_fail.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    debug!("radio-tx: worker exiting");
}

/// Spin/yield until the monotonic clock reaches `target_us` (§4.2 step 1).
fn spin_until(target_us: u32) {
    loop {
        let now = time::now_us();
        let remaining = time::delta_us(target_us, now);
        if remaining <= 0 {
            return;
        }
        if remaining > 2_000 {
            std::thread::sleep(Duration::from_micros((remaining as u64) - 1_000));
        } else {
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Bandwidth, CodingRate, Modulation};
    use crate::radio::MockBus;
    use std::sync::Mutex;

    struct CollectingSink(Mutex<Vec<RxDescriptor>>);
    impl RxSink for CollectingSink {
        fn on_rx(&self, descriptor: RxDescriptor) {
            self.0.lock().unwrap().push(descriptor);
        }
    }

    fn sample_request(schedule: Schedule) -> TxRequest {
        TxRequest {
            payload: b"hi".to_vec(),
            modulation: Modulation {
                frequency_hz: 923_300_000,
                bandwidth: Bandwidth::Khz500,
                spreading_factor: 12,
                coding_rate: CodingRate::CR_4_5,
            },
            tx_power_dbm: 14,
            schedule,
            invert_iq: true,
        }
    }

    #[test]
    fn schedule_decision_matches_the_four_spec_scenarios() {
        let now = 1_000_000u32;
        // At(1_050_000): 50ms in the future, within the immediate window -> wait then transmit.
        assert_eq!(schedule_decision(1_050_000, now), ScheduleDecision::Wait);
        // At(999_000): 1ms in the past -> transmits immediately.
        assert_eq!(schedule_decision(999_000, now), ScheduleDecision::Now);
        // At(800_000): 200ms in the past -> too late, tx_collision.
        assert_eq!(schedule_decision(800_000, now), ScheduleDecision::TooLate);
        // At(7_000_000): 6s in the future -> too early, tx_fail.
        assert_eq!(schedule_decision(7_000_000, now), ScheduleDecision::TooEarly);
    }

    #[test]
    fn schedule_decision_window_boundaries() {
        let now = 1_000_000u32;
        assert_eq!(schedule_decision(now, now), ScheduleDecision::Now);
        assert_eq!(schedule_decision(now - 100_000, now), ScheduleDecision::Now);
        assert_eq!(schedule_decision(now - 100_001, now), ScheduleDecision::TooLate);
        assert_eq!(schedule_decision(now + 5_000_000, now), ScheduleDecision::Wait);
        assert_eq!(schedule_decision(now + 5_000_001, now), ScheduleDecision::TooEarly);
    }

    #[test]
    fn schedule_tx_respects_queue_capacity() {
        let (tx, _rx) = queue::bounded::<TxRequest>(2);
        assert!(tx.try_send(sample_request(Schedule::Immediate)));
        assert!(tx.try_send(sample_request(Schedule::Immediate)));
        assert!(!tx.try_send(sample_request(Schedule::Immediate)));
        assert_eq!(tx.dropped_count(), 1);
    }

    #[test]
    fn start_and_stop_runs_both_worker_threads() {
        let rx_radio = Radio::new(MockBus::new(), "rx");
        let tx_radio = Radio::new(MockBus::new(), "tx");
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let stats = Arc::new(GatewayStats::default());

        let mut manager = ChannelManager::start(
            rx_radio,
            RadioConfig::default(),
            tx_radio,
            sink,
            stats,
        )
        .expect("channel manager should start");

        assert_eq!(
            manager.schedule_tx(sample_request(Schedule::Immediate)),
            TxSubmitOutcome::Accepted
        );
        std::thread::sleep(Duration::from_millis(50));
        manager.stop();
    }

    #[test]
    fn schedule_tx_rejects_out_of_window_targets_without_enqueueing() {
        let rx_radio = Radio::new(MockBus::new(), "rx");
        let tx_radio = Radio::new(MockBus::new(), "tx");
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let stats = Arc::new(GatewayStats::default());

        let mut manager = ChannelManager::start(
            rx_radio,
            RadioConfig::default(),
            tx_radio,
            sink,
            stats.clone(),
        )
        .expect("channel manager should start");

        let now = time::now_us();
        assert_eq!(
            manager.schedule_tx(sample_request(Schedule::At(now.wrapping_add(7_000_000)))),
            TxSubmitOutcome::TooEarly
        );
        assert_eq!(stats.tx_fail.load(Ordering::Relaxed), 1);

        assert_eq!(
            manager.schedule_tx(sample_request(Schedule::At(now.wrapping_sub(200_000)))),
            TxSubmitOutcome::TooLate
        );
        assert_eq!(stats.tx_collision.load(Ordering::Relaxed), 1);

        manager.stop();
    }
}
