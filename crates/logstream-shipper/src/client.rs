// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client seam over the three operations of the log-stream service.
//!
//! The driver only talks to the service through [`LogsClient`]. The
//! production implementation is [`crate::http_client::HttpLogsClient`]; tests
//! provide scripted doubles. Every implementation must run
//! [`validate_put_request`] before sending events so that test and production
//! paths reject exactly the same requests.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::batch::BatchLimits;
use crate::errors::{DeliveryError, DeliveryErrorKind};
use crate::event::LogEvent;

/// Arguments of a put-log-events call. Borrowed from the batch in flight so a
/// retry does not copy the events.
#[derive(Debug, Clone, Copy)]
pub struct PutLogEventsRequest<'a> {
    pub group: &'a str,
    pub stream: &'a str,
    pub events: &'a [LogEvent],
    pub sequence_token: Option<&'a str>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutLogEventsResponse {
    pub next_token: Option<String>,
    pub rejected: Option<RejectedLogEventsInfo>,
}

/// Events the service accepted the request for but did not store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedLogEventsInfo {
    pub too_new_log_event_start_index: Option<i64>,
    pub too_old_log_event_end_index: Option<i64>,
    pub expired_log_event_end_index: Option<i64>,
}

#[async_trait]
pub trait LogsClient: Send + Sync {
    /// Creates a log group. A group that exists already is a success.
    async fn create_log_group(&self, group: &str) -> Result<(), DeliveryError>;

    /// Creates a log stream. A stream that exists already is a success.
    async fn create_log_stream(&self, group: &str, stream: &str) -> Result<(), DeliveryError>;

    /// Appends events to a stream, returning the token for the next put.
    async fn put_log_events(
        &self,
        request: PutLogEventsRequest<'_>,
    ) -> Result<PutLogEventsResponse, DeliveryError>;
}

#[async_trait]
impl<T: LogsClient + ?Sized> LogsClient for Arc<T> {
    async fn create_log_group(&self, group: &str) -> Result<(), DeliveryError> {
        (**self).create_log_group(group).await
    }

    async fn create_log_stream(&self, group: &str, stream: &str) -> Result<(), DeliveryError> {
        (**self).create_log_stream(group, stream).await
    }

    async fn put_log_events(
        &self,
        request: PutLogEventsRequest<'_>,
    ) -> Result<PutLogEventsResponse, DeliveryError> {
        (**self).put_log_events(request).await
    }
}

/// Client-side enforcement of the put limits.
///
/// Checks, in order: at least one event, the event count, every message
/// against the per-event limit, timestamp order and span, and the cumulative
/// size including the per-event overhead.
pub fn validate_put_request(
    events: &[LogEvent],
    limits: &BatchLimits,
) -> Result<(), DeliveryError> {
    if events.is_empty() {
        return Err(DeliveryError::new(
            DeliveryErrorKind::InvalidInput,
            "put request has no events",
        ));
    }
    if events.len() > limits.max_events {
        return Err(DeliveryError::new(
            DeliveryErrorKind::BatchTooLarge,
            format!(
                "maximum events per put exceeded: {}, max allowed: {}",
                events.len(),
                limits.max_events
            ),
        ));
    }

    let mut total_bytes = 0;
    for event in events {
        if event.len() > limits.max_bytes_per_event {
            return Err(DeliveryError::new(
                DeliveryErrorKind::EventTooLarge,
                format!(
                    "maximum bytes per event exceeded: Event too large {}, max allowed: {}",
                    event.len(),
                    limits.max_bytes_per_event
                ),
            ));
        }
        total_bytes += event.billed_size();
    }

    if events
        .windows(2)
        .any(|pair| pair[1].timestamp() < pair[0].timestamp())
    {
        return Err(DeliveryError::new(
            DeliveryErrorKind::InvalidInput,
            "log events in a put request must be in chronological order",
        ));
    }
    if let (Some(first), Some(last)) = (events.first(), events.last()) {
        let span = u128::try_from(last.timestamp().saturating_sub(first.timestamp()))
            .unwrap_or_default();
        if span > limits.max_span.as_millis() {
            return Err(DeliveryError::new(
                DeliveryErrorKind::InvalidInput,
                format!(
                    "log events in a put request span {span}ms, max allowed: {}ms",
                    limits.max_span.as_millis()
                ),
            ));
        }
    }

    if total_bytes > limits.max_bytes {
        return Err(DeliveryError::new(
            DeliveryErrorKind::BatchTooLarge,
            format!(
                "maximum bytes per put exceeded: Upload too large {}, max allowed: {}",
                total_bytes, limits.max_bytes
            ),
        ));
    }
    Ok(())
}
