//! Bounded queue with drop-newest backpressure (§4.4).
//!
//! Wraps a `tokio::sync::mpsc` bounded channel: on overflow the *new*
//! item is discarded rather than blocking the producer, which is what lets
//! an ISR-adjacent producer and the UDP receive loop stay non-blocking. A
//! counter tracks drops so callers can surface them in [`crate::stats`].

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

/// Producer half of a [`bounded`] queue.
pub struct Sender<T> {
    inner: mpsc::Sender<T>,
    dropped: std::sync::Arc<AtomicU64>,
}

/// Consumer half of a [`bounded`] queue.
pub struct Receiver<T> {
    inner: mpsc::Receiver<T>,
    dropped: std::sync::Arc<AtomicU64>,
}

/// Create a bounded drop-newest queue with the given capacity.
pub fn bounded<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    let dropped = std::sync::Arc::new(AtomicU64::new(0));
    (
        Sender {
            inner: tx,
            dropped: dropped.clone(),
        },
        Receiver { inner: rx, dropped },
    )
}

impl<T> Sender<T> {
    /// Enqueue `item`. On overflow, drops `item` (the newest enqueue),
    /// increments the drop counter, and returns `false`.
    pub fn try_send(&self, item: T) -> bool {
        match self.inner.try_send(item) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            dropped: self.dropped.clone(),
        }
    }
}

impl<T> Receiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.inner.recv().await
    }

    /// Non-blocking receive, for batch draining (§4.3 uplink batching).
    pub fn try_recv(&mut self) -> Option<T> {
        self.inner.try_recv().ok()
    }

    /// Blocking receive, for consumers that run on a plain OS thread rather
    /// than a tokio task (the channel manager's radio worker threads).
    pub fn blocking_recv(&mut self) -> Option<T> {
        self.inner.blocking_recv()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
