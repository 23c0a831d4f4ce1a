// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Protocol limits of the log-stream service and engine defaults.
//!
//! The service rejects a put request that breaks any of these limits, so the
//! batch builder packs batches against them and every client adapter checks
//! them again before a request leaves the process.

use std::time::Duration;

/// Maximum number of events accepted in a single put request.
pub const MAX_EVENTS_PER_PUT: usize = 10_000;

/// Maximum size of a single put request in bytes.
///
/// The size of a request is the sum of every message length plus
/// [`PER_EVENT_OVERHEAD_BYTES`] for each event.
pub const MAX_BYTES_PER_PUT: usize = 1_048_576;

/// Maximum size of a single event message in bytes.
pub const MAX_BYTES_PER_EVENT: usize = 1_048_576;

/// Fixed number of bytes the service accounts for every event in a request.
pub const PER_EVENT_OVERHEAD_BYTES: usize = 26;

/// A batch may not span more than 24 hours between its first and last event.
pub const MAX_BATCH_SPAN: Duration = Duration::from_secs(24 * 60 * 60);

/// How often the driver publishes a partially filled batch.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Default capacity of the per-stream event queue.
pub const DEFAULT_MAX_BUFFERED_EVENTS: usize = 4_096;

/// Attempts made for one batch before it is dropped.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

// Backoff formula: base * 2^(attempt - 1), capped at the maximum and jittered
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(200);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(10);

/// Upper bound for the final drain when flush-on-shutdown is enabled.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Limits on log group and log stream names.
pub const MAX_GROUP_NAME_LEN: usize = 512;
pub const MAX_STREAM_NAME_LEN: usize = 512;

/// Timeout of a single request to the service.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
