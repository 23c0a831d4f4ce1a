// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use logstream_shipper::{
    driver::{DriverConfig, ShutdownPolicy},
    errors::{DeliveryError, DeliveryErrorKind},
    retry::RetryStrategy,
    LogEvent, PutLogEventsResponse,
};
use std::time::Duration;

/// Driver settings with short timings so tests run fast.
#[allow(dead_code)]
pub fn fast_config() -> DriverConfig {
    DriverConfig {
        flush_interval: Duration::from_millis(20),
        retry_strategy: RetryStrategy::LinearBackoff(4, 1),
        shutdown: ShutdownPolicy::Discard,
        ..Default::default()
    }
}

/// Event with a message of `size` bytes.
#[allow(dead_code)]
pub fn sized_event(timestamp: i64, size: usize) -> LogEvent {
    LogEvent::new(timestamp, vec![b'x'; size])
}

#[allow(dead_code)]
pub fn success(token: &str) -> Result<PutLogEventsResponse, DeliveryError> {
    Ok(PutLogEventsResponse {
        next_token: Some(token.to_string()),
        rejected: None,
    })
}

#[allow(dead_code)]
pub fn failure(kind: DeliveryErrorKind) -> Result<PutLogEventsResponse, DeliveryError> {
    Err(DeliveryError::new(kind, format!("mock {kind}")))
}
