// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::constants;

/// How many times a batch is attempted and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Retry right away, up to the given number of attempts.
    Immediate(u32),
    /// Attempts, and a fixed delay in milliseconds between them.
    LinearBackoff(u32, u64),
    /// Delay doubles from `base` up to `max`, with jitter.
    ExponentialBackoff {
        attempts: u32,
        base: Duration,
        max: Duration,
    },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::ExponentialBackoff {
            attempts: constants::DEFAULT_MAX_ATTEMPTS,
            base: constants::DEFAULT_BACKOFF_BASE,
            max: constants::DEFAULT_BACKOFF_MAX,
        }
    }
}

impl RetryStrategy {
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::Immediate(attempts)
            | Self::LinearBackoff(attempts, _)
            | Self::ExponentialBackoff { attempts, .. } => (*attempts).max(1),
        }
    }

    /// Delay before the next attempt, after `failed` attempts have failed.
    #[must_use]
    pub fn delay(&self, failed: u32) -> Duration {
        match self {
            Self::Immediate(_) => Duration::ZERO,
            Self::LinearBackoff(_, delay_ms) => Duration::from_millis(*delay_ms),
            Self::ExponentialBackoff { base, max, .. } => {
                let exponent = failed.saturating_sub(1).min(16);
                let capped = base.saturating_mul(1 << exponent).min(*max);
                jitter(capped)
            }
        }
    }
}

// Keeps half of the delay and randomizes the rest
fn jitter(delay: Duration) -> Duration {
    let half = delay / 2;
    let spread = u64::try_from(half.as_millis()).unwrap_or(u64::MAX);
    if spread == 0 {
        return delay;
    }
    half + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

/// Sleeps for `delay` unless `cancel` fires first.
///
/// Returns `false` when the wait was cut short by cancellation.
pub async fn wait(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        () = sleep(delay) => true,
        () = cancel.cancelled() => false,
    }
}
