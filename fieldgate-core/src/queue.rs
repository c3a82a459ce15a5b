//! Update Queue
//!
//! The only boundary between the ingestion thread and the publisher thread.
//!
//! ## Overview
//!
//! ```text
//!   ingestion loop                        publisher thread
//!  ┌──────────────┐   UpdateSender   ┌────────────────┐   UpdateReceiver
//!  │ Data → decode │ ──── push ────► │ crossbeam chan │ ──── pop (blocking) ──►
//!  └──────────────┘                  └────────────────┘
//! ```
//!
//! - Single producer, single consumer
//! - Unbounded unless a capacity is configured
//! - With a capacity, overflow either drops the incoming update
//!   ([`OverflowPolicy::DropNewest`]) or the oldest queued one
//!   ([`OverflowPolicy::DropOldest`]); drops are counted either way
//!
//! ## Shutdown
//!
//! Dropping the sender ends the stream: `pop` drains what is left and then
//! returns `None`. Dropping the receiver makes every later `push` fail with
//! [`QueueError::Disconnected`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::errors::QueueError;
use crate::update::EdgeUpdate;

/// What to discard when a bounded queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the queue, drop the update being pushed
    #[default]
    DropNewest,
    /// Make room by discarding the oldest queued update
    DropOldest,
}

/// Queue shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    /// `None` = unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    /// Applies only when bounded
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl QueueConfig {
    /// Unbounded queue
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Bounded queue with the given overflow policy
    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            capacity: Some(capacity),
            overflow,
        }
    }
}

/// Queue health counters
///
/// Shared by both ends; reading them never blocks either side.
#[derive(Debug, Default)]
pub struct QueueStats {
    pushed: AtomicU64,
    popped: AtomicU64,
    dropped: AtomicU64,
    max_depth: AtomicU64,
}

impl QueueStats {
    /// Record a new depth, keeping the maximum
    fn update_max_depth(&self, current: u64) {
        self.max_depth.fetch_max(current, Ordering::Relaxed);
    }

    /// Consistent-enough copy of the counters
    pub fn snapshot(&self) -> QueueCounters {
        QueueCounters {
            pushed: self.pushed.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            max_depth: self.max_depth.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`QueueStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueCounters {
    /// Updates accepted by `push`
    pub pushed: u64,
    /// Updates handed to the consumer
    pub popped: u64,
    /// Updates discarded by the overflow policy
    pub dropped: u64,
    /// Deepest the queue has been
    pub max_depth: u64,
}

#[derive(Debug, Default)]
struct Shared {
    stats: QueueStats,
    consumer_gone: AtomicBool,
}

/// How a successful push went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pushed {
    /// Queued without side effects
    Queued,
    /// Queued after discarding the oldest update
    DisplacedOldest,
}

/// Producer end, owned by the ingestion loop
#[derive(Debug)]
pub struct UpdateSender {
    tx: Sender<EdgeUpdate>,
    /// Held only under drop-oldest, to evict from the head
    evict: Option<Receiver<EdgeUpdate>>,
    capacity: Option<usize>,
    shared: Arc<Shared>,
}

/// Consumer end, owned by the publisher
#[derive(Debug)]
pub struct UpdateReceiver {
    rx: Receiver<EdgeUpdate>,
    shared: Arc<Shared>,
}

/// Create a connected sender/receiver pair
pub fn update_queue(config: QueueConfig) -> (UpdateSender, UpdateReceiver) {
    let (tx, rx) = match config.capacity {
        Some(capacity) => crossbeam_channel::bounded(capacity.max(1)),
        None => crossbeam_channel::unbounded(),
    };

    let evict = match (config.capacity, config.overflow) {
        (Some(_), OverflowPolicy::DropOldest) => Some(rx.clone()),
        _ => None,
    };

    let shared = Arc::new(Shared::default());
    let sender = UpdateSender {
        tx,
        evict,
        capacity: config.capacity.map(|c| c.max(1)),
        shared: Arc::clone(&shared),
    };

    (sender, UpdateReceiver { rx, shared })
}

impl UpdateSender {
    /// Hand an update to the consumer without blocking
    pub fn push(&self, update: EdgeUpdate) -> Result<Pushed, QueueError> {
        if self.shared.consumer_gone.load(Ordering::Acquire) {
            return Err(QueueError::Disconnected);
        }

        let outcome = match self.tx.try_send(update) {
            Ok(()) => Pushed::Queued,
            Err(TrySendError::Disconnected(_)) => return Err(QueueError::Disconnected),
            Err(TrySendError::Full(update)) => self.overflow(update)?,
        };

        let stats = &self.shared.stats;
        stats.pushed.fetch_add(1, Ordering::Relaxed);
        stats.update_max_depth(self.tx.len() as u64);
        Ok(outcome)
    }

    fn overflow(&self, update: EdgeUpdate) -> Result<Pushed, QueueError> {
        let capacity = self.capacity.unwrap_or(usize::MAX);
        let dropped = &self.shared.stats.dropped;

        let Some(evict) = &self.evict else {
            dropped.fetch_add(1, Ordering::Relaxed);
            return Err(QueueError::Full { capacity });
        };

        // The consumer may have emptied the queue since the failed send
        let displaced = evict.try_recv().is_ok();
        let result = match self.tx.try_send(update) {
            Ok(()) if displaced => Ok(Pushed::DisplacedOldest),
            Ok(()) => Ok(Pushed::Queued),
            Err(TrySendError::Disconnected(_)) => Err(QueueError::Disconnected),
            Err(TrySendError::Full(_)) => Err(QueueError::Full { capacity }),
        };

        // One update is lost either way: the evicted head, or the new one
        if displaced || result.is_err() {
            dropped.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Updates currently waiting
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Nothing waiting
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Configured bound
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Shared counters
    pub fn stats(&self) -> &QueueStats {
        &self.shared.stats
    }
}

impl UpdateReceiver {
    /// Block until an update arrives; `None` once the sender is gone and the queue is empty
    pub fn pop(&self) -> Option<EdgeUpdate> {
        let update = self.rx.recv().ok()?;
        self.shared.stats.popped.fetch_add(1, Ordering::Relaxed);
        Some(update)
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`
    ///
    /// `Ok(None)` means the wait timed out; `Err` means the sender is gone.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<EdgeUpdate>, QueueError> {
        match self.rx.recv_timeout(timeout) {
            Ok(update) => {
                self.shared.stats.popped.fetch_add(1, Ordering::Relaxed);
                Ok(Some(update))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(QueueError::Disconnected),
        }
    }

    /// Take an update if one is ready
    pub fn try_pop(&self) -> Option<EdgeUpdate> {
        let update = self.rx.try_recv().ok()?;
        self.shared.stats.popped.fetch_add(1, Ordering::Relaxed);
        Some(update)
    }

    /// Shared counters
    pub fn stats(&self) -> &QueueStats {
        &self.shared.stats
    }

    /// Blocking iterator ending when the sender is gone
    pub fn iter(&self) -> impl Iterator<Item = EdgeUpdate> + '_ {
        std::iter::from_fn(move || self.pop())
    }
}

impl Drop for UpdateReceiver {
    fn drop(&mut self) {
        self.shared.consumer_gone.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::{Epoch, Reading};
    use std::thread;

    fn update(n: u64) -> EdgeUpdate {
        EdgeUpdate::new(Some(format!("node-{n}")), Some(Epoch::from(n)))
            .with_reading(Reading::SoilTemp, n as f64)
    }

    fn epoch(update: &EdgeUpdate) -> String {
        update.timestamp().map(ToString::to_string).unwrap_or_default()
    }

    #[test]
    fn unbounded_preserves_order() {
        let (tx, rx) = update_queue(QueueConfig::unbounded());
        for n in 0..100 {
            assert_eq!(tx.push(update(n)).unwrap(), Pushed::Queued);
        }
        drop(tx);

        let got: Vec<_> = rx.iter().map(|u| epoch(&u)).collect();
        let want: Vec<_> = (0..100).map(|n: u64| n.to_string()).collect();
        assert_eq!(got, want);

        let stats = rx.stats().snapshot();
        assert_eq!(stats.pushed, 100);
        assert_eq!(stats.popped, 100);
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.max_depth, 100);
    }

    #[test]
    fn drop_newest_rejects_overflow() {
        let (tx, rx) = update_queue(QueueConfig::bounded(2, OverflowPolicy::DropNewest));
        tx.push(update(1)).unwrap();
        tx.push(update(2)).unwrap();
        assert_eq!(tx.push(update(3)), Err(QueueError::Full { capacity: 2 }));

        assert_eq!(epoch(&rx.try_pop().unwrap()), "1");
        assert_eq!(epoch(&rx.try_pop().unwrap()), "2");
        assert!(rx.try_pop().is_none());
        assert_eq!(tx.stats().snapshot().dropped, 1);
    }

    #[test]
    fn drop_oldest_displaces_head() {
        let (tx, rx) = update_queue(QueueConfig::bounded(2, OverflowPolicy::DropOldest));
        tx.push(update(1)).unwrap();
        tx.push(update(2)).unwrap();
        assert_eq!(tx.push(update(3)).unwrap(), Pushed::DisplacedOldest);

        assert_eq!(epoch(&rx.try_pop().unwrap()), "2");
        assert_eq!(epoch(&rx.try_pop().unwrap()), "3");
        assert_eq!(tx.stats().snapshot().dropped, 1);
    }

    #[test]
    fn drop_oldest_counts_each_loss_once() {
        const PUSHES: u64 = 20_000;
        let (tx, rx) = update_queue(QueueConfig::bounded(1, OverflowPolicy::DropOldest));
        let consumer = thread::spawn(move || {
            let delivered = rx.iter().count() as u64;
            (delivered, rx)
        });

        let mut displaced = 0;
        for n in 0..PUSHES {
            if tx.push(update(n)).unwrap() == Pushed::DisplacedOldest {
                displaced += 1;
            }
        }
        drop(tx);

        let (delivered, rx) = consumer.join().unwrap();
        let stats = rx.stats().snapshot();
        assert_eq!(stats.pushed, PUSHES);
        assert_eq!(stats.dropped, displaced);
        assert_eq!(delivered + stats.dropped, PUSHES);
    }

    #[test]
    fn push_fails_once_consumer_is_gone() {
        for config in [
            QueueConfig::unbounded(),
            QueueConfig::bounded(4, OverflowPolicy::DropOldest),
        ] {
            let (tx, rx) = update_queue(config);
            drop(rx);
            assert_eq!(tx.push(update(1)), Err(QueueError::Disconnected));
        }
    }

    #[test]
    fn pop_timeout_distinguishes_idle_from_closed() {
        let (tx, rx) = update_queue(QueueConfig::unbounded());
        assert_eq!(rx.pop_timeout(Duration::from_millis(5)), Ok(None));
        drop(tx);
        assert_eq!(rx.pop_timeout(Duration::from_millis(5)), Err(QueueError::Disconnected));
    }

    #[test]
    fn crosses_threads() {
        let (tx, rx) = update_queue(QueueConfig::unbounded());
        let consumer = thread::spawn(move || rx.iter().count());

        for n in 0..1000 {
            tx.push(update(n)).unwrap();
        }
        drop(tx);

        assert_eq!(consumer.join().unwrap(), 1000);
    }
}
