// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::batch::BatchLimits;
use crate::constants;
use crate::driver::{DriverConfig, ShutdownPolicy};
use crate::errors::ConfigError;
use crate::event::StreamIdentity;
use crate::http_client::endpoint_for_region;
use crate::metadata::DEFAULT_METADATA_ENDPOINT;
use crate::provisioner::ProvisionPolicy;
use crate::retry::RetryStrategy;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Shipper settings, read from `LOGSTREAM_*` environment variables.
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Destination log group
    pub log_group: String,
    /// Destination log stream
    pub log_stream: String,
    /// Service region. Resolved from instance metadata when unset.
    pub region: Option<String>,
    /// Overrides the regional service endpoint
    pub endpoint: Option<String>,
    pub metadata_endpoint: String,
    pub create_group: bool,
    pub create_stream: bool,
    pub flush_interval: Duration,
    /// Capacity of the event queue
    pub max_buffered_events: usize,
    pub retry_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Deliver queued events on shutdown instead of discarding them
    pub flush_on_shutdown: bool,
    pub shutdown_timeout: Duration,
    /// Timeout of a single request to the service
    pub request_timeout: Duration,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            log_group: String::new(),
            log_stream: String::new(),
            region: None,
            endpoint: None,
            metadata_endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
            create_group: true,
            create_stream: true,
            flush_interval: constants::DEFAULT_FLUSH_INTERVAL,
            max_buffered_events: constants::DEFAULT_MAX_BUFFERED_EVENTS,
            retry_attempts: constants::DEFAULT_MAX_ATTEMPTS,
            backoff_base: constants::DEFAULT_BACKOFF_BASE,
            backoff_max: constants::DEFAULT_BACKOFF_MAX,
            flush_on_shutdown: true,
            shutdown_timeout: constants::DEFAULT_SHUTDOWN_TIMEOUT,
            request_timeout: constants::DEFAULT_REQUEST_TIMEOUT,
            https_proxy: None,
            log_level: "info".to_string(),
        }
    }
}

impl ShipperConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|val| val.to_lowercase() != "false")
                .unwrap_or(default)
        };
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|val| val.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        let config = Self {
            log_group: non_empty("LOGSTREAM_GROUP").ok_or(ConfigError::Missing("LOGSTREAM_GROUP"))?,
            log_stream: non_empty("LOGSTREAM_STREAM")
                .ok_or(ConfigError::Missing("LOGSTREAM_STREAM"))?,
            region: non_empty("LOGSTREAM_REGION"),
            endpoint: non_empty("LOGSTREAM_ENDPOINT"),
            metadata_endpoint: non_empty("LOGSTREAM_METADATA_ENDPOINT")
                .unwrap_or(defaults.metadata_endpoint),
            create_group: flag("LOGSTREAM_CREATE_GROUP", defaults.create_group),
            create_stream: flag("LOGSTREAM_CREATE_STREAM", defaults.create_stream),
            flush_interval: millis("LOGSTREAM_FLUSH_INTERVAL_MS", defaults.flush_interval),
            max_buffered_events: lookup("LOGSTREAM_MAX_BUFFERED_EVENTS")
                .and_then(|val| val.trim().parse::<usize>().ok())
                .unwrap_or(defaults.max_buffered_events),
            retry_attempts: lookup("LOGSTREAM_RETRY_ATTEMPTS")
                .and_then(|val| val.trim().parse::<u32>().ok())
                .unwrap_or(defaults.retry_attempts),
            backoff_base: millis("LOGSTREAM_BACKOFF_BASE_MS", defaults.backoff_base),
            backoff_max: millis("LOGSTREAM_BACKOFF_MAX_MS", defaults.backoff_max),
            flush_on_shutdown: flag("LOGSTREAM_FLUSH_ON_SHUTDOWN", defaults.flush_on_shutdown),
            shutdown_timeout: millis("LOGSTREAM_SHUTDOWN_TIMEOUT_MS", defaults.shutdown_timeout),
            request_timeout: millis("LOGSTREAM_REQUEST_TIMEOUT_MS", defaults.request_timeout),
            https_proxy: non_empty("LOGSTREAM_PROXY_HTTPS").or_else(|| non_empty("HTTPS_PROXY")),
            log_level: lookup("LOGSTREAM_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name("log group", &self.log_group, constants::MAX_GROUP_NAME_LEN)?;
        validate_name("log stream", &self.log_stream, constants::MAX_STREAM_NAME_LEN)?;

        if self.flush_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "flush interval must be greater than 0".to_string(),
            ));
        }
        if self.shutdown_timeout.is_zero() && self.flush_on_shutdown {
            return Err(ConfigError::InvalidConfig(
                "shutdown timeout must be greater than 0 when flushing on shutdown".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "request timeout must be greater than 0".to_string(),
            ));
        }
        if self.max_buffered_events == 0 {
            return Err(ConfigError::InvalidConfig(
                "max buffered events must be greater than 0".to_string(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry attempts must be greater than 0".to_string(),
            ));
        }
        if self.backoff_base > self.backoff_max {
            return Err(ConfigError::InvalidConfig(format!(
                "backoff base {:?} is greater than backoff max {:?}",
                self.backoff_base, self.backoff_max
            )));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn stream_identity(&self) -> StreamIdentity {
        StreamIdentity::new(&self.log_group, &self.log_stream)
    }

    /// Service endpoint: the configured override, or the regional endpoint.
    #[must_use]
    pub fn service_endpoint(&self, region: &str) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| endpoint_for_region(region))
    }

    #[must_use]
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            limits: BatchLimits::default(),
            flush_interval: self.flush_interval,
            retry_strategy: RetryStrategy::ExponentialBackoff {
                attempts: self.retry_attempts,
                base: self.backoff_base,
                max: self.backoff_max,
            },
            provision_policy: ProvisionPolicy {
                create_group: self.create_group,
                create_stream: self.create_stream,
            },
            shutdown: if self.flush_on_shutdown {
                ShutdownPolicy::Flush {
                    timeout: self.shutdown_timeout,
                }
            } else {
                ShutdownPolicy::Discard
            },
        }
    }
}

fn validate_name(what: &str, name: &str, max_len: usize) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::InvalidConfig(format!("{what} name cannot be empty")));
    }
    if name.chars().count() > max_len {
        return Err(ConfigError::InvalidConfig(format!(
            "{what} name is longer than {max_len} characters"
        )));
    }
    if name.contains([':', '*']) {
        return Err(ConfigError::InvalidConfig(format!(
            "{what} name '{name}' cannot contain ':' or '*'"
        )));
    }
    Ok(())
}
