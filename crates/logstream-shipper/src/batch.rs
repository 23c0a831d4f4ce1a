// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching of log events into put-sized groups.
//!
//! # Batching Strategy
//!
//! Events are packed first-fit, in arrival order. A new batch starts as soon as
//! adding the next event would break any one of:
//! 1. **Count limit**: events per put (10,000)
//! 2. **Size limit**: sum of message bytes plus 26 bytes of overhead per event (1MB)
//! 3. **Span limit**: last timestamp minus first timestamp (24 hours)
//! 4. **Ordering**: an event older than the previous one in the batch
//!
//! No event is ever moved ahead of another. An event whose message alone is
//! larger than the per-event limit can never be sent and is rejected with
//! [`EventTooLarge`].

use std::time::Duration;
use tracing::warn;

use crate::constants;
use crate::errors::{ConfigError, EventTooLarge};
use crate::event::LogEvent;

/// Size, count and span limits a batch must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_events: usize,
    pub max_bytes_per_event: usize,
    pub max_bytes: usize,
    pub max_span: Duration,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_events: constants::MAX_EVENTS_PER_PUT,
            max_bytes_per_event: constants::MAX_BYTES_PER_EVENT,
            max_bytes: constants::MAX_BYTES_PER_PUT,
            max_span: constants::MAX_BATCH_SPAN,
        }
    }
}

impl BatchLimits {
    /// Checks the limits once, before any batch is built with them.
    ///
    /// The per-event limit may equal the batch limit, as the protocol defaults
    /// do; [`Self::check_event`] deducts the per-event overhead.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_events == 0 || self.max_events > constants::MAX_EVENTS_PER_PUT {
            return Err(ConfigError::InvalidConfig(format!(
                "max events per batch must be between 1 and {}, got {}",
                constants::MAX_EVENTS_PER_PUT,
                self.max_events
            )));
        }
        if self.max_bytes == 0 || self.max_bytes > constants::MAX_BYTES_PER_PUT {
            return Err(ConfigError::InvalidConfig(format!(
                "max bytes per batch must be between 1 and {}, got {}",
                constants::MAX_BYTES_PER_PUT,
                self.max_bytes
            )));
        }
        if self.max_bytes_per_event == 0 || self.max_bytes_per_event > self.max_bytes {
            return Err(ConfigError::InvalidConfig(format!(
                "max bytes per event ({}) must be non-zero and not exceed max bytes per batch ({})",
                self.max_bytes_per_event, self.max_bytes
            )));
        }
        if self.max_span > constants::MAX_BATCH_SPAN {
            return Err(ConfigError::InvalidConfig(format!(
                "max batch span must not exceed {}s",
                constants::MAX_BATCH_SPAN.as_secs()
            )));
        }
        Ok(())
    }

    /// Rejects an event that can never be part of a batch.
    ///
    /// An event is too large when its message exceeds the per-event limit, or
    /// when the message plus overhead exceeds the batch limit on its own.
    pub fn check_event(&self, event: &LogEvent) -> Result<(), EventTooLarge> {
        let max = self
            .max_bytes_per_event
            .min(self.max_bytes.saturating_sub(constants::PER_EVENT_OVERHEAD_BYTES));
        if event.len() > max {
            return Err(EventTooLarge {
                timestamp: event.timestamp(),
                size: event.len(),
                max,
            });
        }
        Ok(())
    }

    fn max_span_millis(&self) -> i64 {
        i64::try_from(self.max_span.as_millis()).unwrap_or(i64::MAX)
    }
}

/// An ordered group of events sent in one put request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    events: Vec<LogEvent>,
    size_bytes: usize,
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `event` can be appended without breaking any limit.
    ///
    /// The caller is expected to have run [`BatchLimits::check_event`] first.
    #[must_use]
    pub fn fits(&self, event: &LogEvent, limits: &BatchLimits) -> bool {
        if self.events.len() >= limits.max_events {
            return false;
        }
        if self.size_bytes + event.billed_size() > limits.max_bytes {
            return false;
        }
        match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => {
                event.timestamp() >= last.timestamp()
                    && event.timestamp() - first.timestamp() <= limits.max_span_millis()
            }
            _ => true,
        }
    }

    pub(crate) fn push(&mut self, event: LogEvent) {
        self.size_bytes += event.billed_size();
        self.events.push(event);
    }

    #[must_use]
    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<LogEvent> {
        self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total bytes the batch counts for, overhead included.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Time between the first and the last event.
    #[must_use]
    pub fn span(&self) -> Duration {
        match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => {
                let millis = last.timestamp().saturating_sub(first.timestamp());
                Duration::from_millis(u64::try_from(millis).unwrap_or_default())
            }
            _ => Duration::ZERO,
        }
    }
}

/// Splits ordered events into first-fit batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchBuilder {
    limits: BatchLimits,
}

impl BatchBuilder {
    #[must_use]
    pub fn new(limits: BatchLimits) -> Self {
        Self { limits }
    }

    #[must_use]
    pub fn limits(&self) -> &BatchLimits {
        &self.limits
    }

    /// Builds batches from `events`, failing on the first oversized event.
    pub fn build(
        &self,
        events: impl IntoIterator<Item = LogEvent>,
    ) -> Result<Vec<Batch>, EventTooLarge> {
        let mut batches = Vec::new();
        let mut current = Batch::new();
        for event in events {
            self.limits.check_event(&event)?;
            self.append(&mut batches, &mut current, event);
        }
        if !current.is_empty() {
            batches.push(current);
        }
        Ok(batches)
    }

    /// Builds batches from `events`, dropping oversized events and carrying on.
    ///
    /// Returns the batches together with one rejection per dropped event.
    pub fn build_lossy(
        &self,
        events: impl IntoIterator<Item = LogEvent>,
    ) -> (Vec<Batch>, Vec<EventTooLarge>) {
        let mut batches = Vec::new();
        let mut rejected = Vec::new();
        let mut current = Batch::new();
        for event in events {
            if let Err(e) = self.limits.check_event(&event) {
                warn!("LOGS | Dropping log event: {}", e);
                rejected.push(e);
                continue;
            }
            self.append(&mut batches, &mut current, event);
        }
        if !current.is_empty() {
            batches.push(current);
        }
        (batches, rejected)
    }

    fn append(&self, batches: &mut Vec<Batch>, current: &mut Batch, event: LogEvent) {
        if !current.fits(&event, &self.limits) {
            batches.push(std::mem::take(current));
        }
        current.push(event);
    }
}
