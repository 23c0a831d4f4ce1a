// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded, ordered buffer of events waiting for delivery.
//!
//! ```text
//!    ┌──────────────┐
//!    │ QueueHandle  │ (Clone, one per producer)
//!    └──────┬───────┘
//!           │ enqueue
//!           v
//!    ┌──────────────┐
//!    │  EventQueue  │ (FIFO, bounded)
//!    └──────┬───────┘
//!           │ drain(limits)
//!           v
//!    ┌──────────────┐
//!    │    Driver    │ (single consumer)
//!    └──────────────┘
//! ```
//!
//! Unlike a lossy aggregator, a full queue refuses new events with
//! [`QueueError::Full`] and leaves the decision to drop or wait to the producer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::warn;

use crate::batch::{Batch, BatchLimits};
use crate::errors::{EventTooLarge, QueueError};
use crate::event::LogEvent;

/// Result of one drain: the batch taken off the front of the queue and the
/// oversized events that were discarded on the way.
#[derive(Debug, Default)]
pub struct Drained {
    pub batch: Batch,
    pub rejected: Vec<EventTooLarge>,
}

#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<LogEvent>,
    capacity: usize,
    pending_bytes: usize,
    closed: bool,
}

impl EventQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity,
            pending_bytes: 0,
            closed: false,
        }
    }

    pub fn enqueue(&mut self, event: LogEvent) -> Result<(), QueueError> {
        if self.closed {
            return Err(QueueError::Closed);
        }
        if self.events.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        self.pending_bytes += event.billed_size();
        self.events.push_back(event);
        Ok(())
    }

    /// Removes the longest prefix of the queue that fits in one batch.
    ///
    /// Events too large to ever be sent are removed and reported in
    /// [`Drained::rejected`]. The first event that does not fit stays at the
    /// front of the queue for the next drain.
    pub fn drain(&mut self, limits: &BatchLimits) -> Drained {
        let mut drained = Drained::default();
        while let Some(front) = self.events.front() {
            if let Err(e) = limits.check_event(front) {
                warn!("LOGS | Dropping log event: {}", e);
                drained.rejected.push(e);
                self.pop_front();
                continue;
            }
            if !drained.batch.fits(front, limits) {
                break;
            }
            if let Some(event) = self.pop_front() {
                drained.batch.push(event);
            }
        }
        drained
    }

    /// Removes every queued event, in order.
    pub fn drain_all(&mut self) -> Vec<LogEvent> {
        self.pending_bytes = 0;
        self.events.drain(..).collect()
    }

    /// Whether enough events are queued to fill a batch.
    #[must_use]
    pub fn has_full_batch(&self, limits: &BatchLimits) -> bool {
        self.events.len() >= limits.max_events || self.pending_bytes >= limits.max_bytes
    }

    /// Stops accepting events. Queued events stay available to drain.
    pub fn close(&mut self) {
        self.closed = true;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn pop_front(&mut self) -> Option<LogEvent> {
        let event = self.events.pop_front()?;
        self.pending_bytes -= event.billed_size();
        Some(event)
    }
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<EventQueue>,
    notify: Notify,
}

/// Cloneable handle over one stream's queue.
///
/// Producers enqueue from any task; the stream driver is the only consumer.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    shared: Arc<Shared>,
}

impl QueueHandle {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(EventQueue::new(capacity)),
                notify: Notify::new(),
            }),
        }
    }

    pub fn enqueue(&self, event: LogEvent) -> Result<(), QueueError> {
        self.lock().enqueue(event)?;
        self.shared.notify.notify_one();
        Ok(())
    }

    pub fn drain(&self, limits: &BatchLimits) -> Drained {
        self.lock().drain(limits)
    }

    pub fn drain_all(&self) -> Vec<LogEvent> {
        self.lock().drain_all()
    }

    #[must_use]
    pub fn has_full_batch(&self, limits: &BatchLimits) -> bool {
        self.lock().has_full_batch(limits)
    }

    /// Closes the queue: further enqueues fail with [`QueueError::Closed`].
    pub fn close(&self) {
        self.lock().close();
        self.shared.notify.notify_one();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().is_closed()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Resolves after the next enqueue or close.
    pub async fn notified(&self) {
        self.shared.notify.notified().await;
    }

    fn lock(&self) -> MutexGuard<'_, EventQueue> {
        // A panic while holding the lock can't leave the deque half-updated
        self.shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn event(timestamp: i64, size: usize) -> LogEvent {
        LogEvent::new(timestamp, vec![b'x'; size])
    }

    #[test]
    fn test_enqueue_fails_when_full() {
        let mut queue = EventQueue::new(2);
        queue.enqueue(event(1, 1)).expect("room for event");
        queue.enqueue(event(2, 1)).expect("room for event");

        assert_eq!(
            queue.enqueue(event(3, 1)),
            Err(QueueError::Full { capacity: 2 })
        );
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_enqueue_fails_when_closed() {
        let mut queue = EventQueue::new(2);
        queue.enqueue(event(1, 1)).expect("room for event");
        queue.close();

        assert_eq!(queue.enqueue(event(2, 1)), Err(QueueError::Closed));
        // Queued events remain drainable
        assert_eq!(queue.drain(&BatchLimits::default()).batch.len(), 1);
    }

    #[test]
    fn test_drain_empty_queue() {
        let mut queue = EventQueue::new(10);
        let drained = queue.drain(&BatchLimits::default());
        assert!(drained.batch.is_empty());
        assert!(drained.rejected.is_empty());
    }

    #[test]
    fn test_drain_takes_longest_fitting_prefix() {
        let mut queue = EventQueue::new(10);
        for i in 0..5 {
            queue.enqueue(event(i, 300_000)).expect("room for event");
        }

        let first = queue.drain(&BatchLimits::default());
        assert_eq!(first.batch.len(), 3);
        assert_eq!(queue.len(), 2);

        let second = queue.drain(&BatchLimits::default());
        let timestamps: Vec<i64> = second.batch.events().iter().map(LogEvent::timestamp).collect();
        assert_eq!(timestamps, vec![3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_respects_span() {
        let mut queue = EventQueue::new(10);
        queue.enqueue(event(0, 1)).expect("room for event");
        queue.enqueue(event(5_000, 1)).expect("room for event");
        let limits = BatchLimits {
            max_span: Duration::from_secs(1),
            ..Default::default()
        };

        assert_eq!(queue.drain(&limits).batch.len(), 1);
        assert_eq!(queue.drain(&limits).batch.len(), 1);
    }

    #[test]
    fn test_drain_rejects_oversized_events() {
        let mut queue = EventQueue::new(10);
        queue.enqueue(event(1, 10)).expect("room for event");
        queue.enqueue(event(2, 1_100_000)).expect("room for event");
        queue.enqueue(event(3, 10)).expect("room for event");

        let drained = queue.drain(&BatchLimits::default());

        assert_eq!(drained.rejected.len(), 1);
        assert_eq!(drained.batch.len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_has_full_batch() {
        let limits = BatchLimits {
            max_events: 2,
            ..Default::default()
        };
        let mut queue = EventQueue::new(10);
        queue.enqueue(event(1, 1)).expect("room for event");
        assert!(!queue.has_full_batch(&limits));
        queue.enqueue(event(2, 1)).expect("room for event");
        assert!(queue.has_full_batch(&limits));
    }

    #[tokio::test]
    async fn test_handle_shared_between_producers() {
        let handle = QueueHandle::new(100);
        let mut tasks = Vec::new();
        for producer in 0..4 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..10 {
                    handle
                        .enqueue(event(producer * 100 + i, 1))
                        .expect("room for event");
                }
            }));
        }
        for task in tasks {
            task.await.expect("producer task failed");
        }

        assert_eq!(handle.len(), 40);
        assert_eq!(handle.drain_all().len(), 40);
        assert!(handle.is_empty());
    }

    #[tokio::test]
    async fn test_notified_after_enqueue() {
        let handle = QueueHandle::new(10);
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.notified().await });

        handle.enqueue(event(1, 1)).expect("room for event");

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter should be notified")
            .expect("waiter task failed");
    }
}
