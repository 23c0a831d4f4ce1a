// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Error returned by the event queue when an event can't be accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue is full ({capacity} events)")]
    Full { capacity: usize },
    #[error("queue is closed")]
    Closed,
}

/// A single event whose message is larger than the per-event limit.
///
/// The event is never truncated: it is excluded from every batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("event at {timestamp} is too large: {size} bytes, max allowed: {max}")]
pub struct EventTooLarge {
    pub timestamp: i64,
    pub size: usize,
    pub max: usize,
}

/// Failure classes reported by the log-stream service or the client adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryErrorKind {
    Throttled,
    ResourceMissing,
    TokenMismatch,
    /// The same batch was accepted by an earlier request whose response was lost.
    AlreadyAccepted,
    /// The resource a create call targeted exists already.
    AlreadyExists,
    Transient,
    EventTooLarge,
    BatchTooLarge,
    InvalidInput,
    Unauthorized,
}

impl DeliveryErrorKind {
    /// Whether the same batch may be sent again after recovery.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Throttled | Self::ResourceMissing | Self::TokenMismatch | Self::Transient
        )
    }
}

impl fmt::Display for DeliveryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Throttled => "throttled",
            Self::ResourceMissing => "resource-missing",
            Self::TokenMismatch => "token-mismatch",
            Self::AlreadyAccepted => "already-accepted",
            Self::AlreadyExists => "already-exists",
            Self::Transient => "transient",
            Self::EventTooLarge => "event-too-large",
            Self::BatchTooLarge => "batch-too-large",
            Self::InvalidInput => "invalid-input",
            Self::Unauthorized => "unauthorized",
        };
        f.write_str(name)
    }
}

/// Error returned by a [`crate::client::LogsClient`] operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct DeliveryError {
    pub kind: DeliveryErrorKind,
    pub message: String,
    /// Token the service expected, when a token-mismatch or already-accepted
    /// response reports it.
    pub expected_token: Option<String>,
}

impl DeliveryError {
    pub fn new(kind: DeliveryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            expected_token: None,
        }
    }

    #[must_use]
    pub fn with_expected_token(mut self, token: Option<String>) -> Self {
        self.expected_token = token;
        self
    }
}

/// Failure to create the destination log group or log stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to create log group {group}: {source}")]
    Group {
        group: String,
        #[source]
        source: DeliveryError,
    },
    #[error("failed to create log stream {group}/{stream}: {source}")]
    Stream {
        group: String,
        stream: String,
        #[source]
        source: DeliveryError,
    },
    #[error("log group {group} does not exist and group creation is disabled")]
    GroupCreationDisabled { group: String },
}

impl ProvisionError {
    /// Rate limiting and network failures while provisioning are worth retrying,
    /// everything else stops the stream.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Group { source, .. } | Self::Stream { source, .. } => matches!(
                source.kind,
                DeliveryErrorKind::Throttled | DeliveryErrorKind::Transient
            ),
            Self::GroupCreationDisabled { .. } => false,
        }
    }
}

/// Errors from the instance metadata resolver.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("metadata service returned status {0}")]
    Status(u16),
    #[error("metadata service returned an empty region")]
    EmptyRegion,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

/// Unrecoverable conditions that stop a stream driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("invalid driver configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot provision destination: {0}")]
    Provision(#[from] ProvisionError),
    #[error("cannot resolve region: {0}")]
    Region(#[from] MetadataError),
    #[error("driver task failed: {0}")]
    Task(String),
}

/// A driver that stopped on a [`DriverError`].
///
/// The report holds what was delivered before the failure and, in
/// `undelivered`, every event still owned by the driver: the batch that was
/// in flight followed by the rest of the queue.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct DriverFailure {
    pub error: DriverError,
    pub report: crate::driver::DriverReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(DeliveryErrorKind::Throttled.is_retryable());
        assert!(DeliveryErrorKind::ResourceMissing.is_retryable());
        assert!(DeliveryErrorKind::TokenMismatch.is_retryable());
        assert!(DeliveryErrorKind::Transient.is_retryable());

        assert!(!DeliveryErrorKind::AlreadyAccepted.is_retryable());
        assert!(!DeliveryErrorKind::EventTooLarge.is_retryable());
        assert!(!DeliveryErrorKind::BatchTooLarge.is_retryable());
        assert!(!DeliveryErrorKind::InvalidInput.is_retryable());
        assert!(!DeliveryErrorKind::Unauthorized.is_retryable());
    }

    #[test]
    fn test_delivery_error_display() {
        let error = DeliveryError::new(DeliveryErrorKind::TokenMismatch, "stale token");
        assert_eq!(error.to_string(), "token-mismatch: stale token");
    }

    #[test]
    fn test_provision_error_retryable() {
        let throttled = ProvisionError::Group {
            group: "g".to_string(),
            source: DeliveryError::new(DeliveryErrorKind::Throttled, "slow down"),
        };
        assert!(throttled.is_retryable());

        let denied = ProvisionError::Stream {
            group: "g".to_string(),
            stream: "s".to_string(),
            source: DeliveryError::new(DeliveryErrorKind::Unauthorized, "denied"),
        };
        assert!(!denied.is_retryable());
        assert!(denied.to_string().contains("g/s"));
    }

    #[test]
    fn test_event_too_large_display() {
        let error = EventTooLarge {
            timestamp: 7,
            size: 1_100_000,
            max: 1_048_576,
        };
        assert_eq!(
            error.to_string(),
            "event at 7 is too large: 1100000 bytes, max allowed: 1048576"
        );
    }
}
