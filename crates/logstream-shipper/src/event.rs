// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::PER_EVENT_OVERHEAD_BYTES;

/// A single log event: a timestamp and an opaque payload.
///
/// Timestamps are milliseconds since the Unix epoch, which is the resolution
/// the log-stream service stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    timestamp: i64,
    message: Vec<u8>,
    // Size of the message once encoded for the wire
    wire_len: usize,
}

impl LogEvent {
    #[must_use]
    pub fn new(timestamp: i64, message: impl Into<Vec<u8>>) -> Self {
        let message = message.into();
        let wire_len = String::from_utf8_lossy(&message).len();
        Self {
            timestamp,
            message,
            wire_len,
        }
    }

    /// Creates an event stamped with the current wall clock time.
    #[must_use]
    pub fn now(message: impl Into<Vec<u8>>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or_default();
        Self::new(timestamp, message)
    }

    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    #[must_use]
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// Length of the message in bytes, as sent on the wire.
    #[must_use]
    pub fn len(&self) -> usize {
        self.wire_len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }

    /// Bytes this event counts for against the per-put limit.
    #[must_use]
    pub fn billed_size(&self) -> usize {
        self.wire_len + PER_EVENT_OVERHEAD_BYTES
    }

    /// Wire form of the event. Invalid UTF-8 sequences are replaced since the
    /// service only stores text.
    #[must_use]
    pub fn to_input(&self) -> InputLogEvent {
        InputLogEvent {
            timestamp: self.timestamp,
            message: String::from_utf8_lossy(&self.message).into_owned(),
        }
    }
}

/// Event as serialized in a put request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputLogEvent {
    pub timestamp: i64,
    pub message: String,
}

/// Destination of a stream of events: a log group and a log stream inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamIdentity {
    pub group: String,
    pub stream: String,
}

impl StreamIdentity {
    pub fn new(group: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            stream: stream.into(),
        }
    }
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.stream)
    }
}
