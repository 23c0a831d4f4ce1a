// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-stream delivery loop.
//!
//! # State Machine
//!
//! ```text
//!              batch ready
//!   ┌──────┐ ─────────────> ┌──────────────┐  ok   ┌────────────┐
//!   │ Idle │                │ Provisioning │ ────> │ Delivering │
//!   └──────┘ <───────────── └──────────────┘ <──── └─────┬──────┘
//!      ^      fatal: Stopped        resource-missing     │  │
//!      │                                                 │  │ throttled / transient
//!      │            success / dropped                    │  v
//!      └─────────────────────────────────────────────────┘ ┌──────────┐
//!                                                           │ Retrying │
//!                                                           └──────────┘
//! ```
//!
//! One driver owns one destination stream: its queue, its continuation token
//! and its provisioning status. At most one put is in flight, so the token
//! advances strictly in order. The cancellation token is checked at every
//! suspension point: while idle, while backing off, and before each call.

use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{Batch, BatchLimits};
use crate::client::{validate_put_request, LogsClient, PutLogEventsRequest, PutLogEventsResponse};
use crate::constants;
use crate::errors::{DeliveryError, DeliveryErrorKind, DriverError, DriverFailure};
use crate::event::{LogEvent, StreamIdentity};
use crate::provisioner::{ProvisionPolicy, ResourceProvisioner};
use crate::queue::QueueHandle;
use crate::retry::{self, RetryStrategy};
use crate::token::TokenManager;

/// What to do with queued events when the driver is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Stop right away and hand every undelivered event back to the caller.
    Discard,
    /// Keep delivering until the queue is empty or the timeout expires.
    Flush { timeout: Duration },
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub limits: BatchLimits,
    pub flush_interval: Duration,
    pub retry_strategy: RetryStrategy,
    pub provision_policy: ProvisionPolicy,
    pub shutdown: ShutdownPolicy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            limits: BatchLimits::default(),
            flush_interval: constants::DEFAULT_FLUSH_INTERVAL,
            retry_strategy: RetryStrategy::default(),
            provision_policy: ProvisionPolicy::default(),
            shutdown: ShutdownPolicy::Flush {
                timeout: constants::DEFAULT_SHUTDOWN_TIMEOUT,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Provisioning,
    Delivering,
    Retrying,
    Stopped,
}

/// Result of delivering one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Delivered,
    /// The batch was given up on; the error says why.
    Dropped(DeliveryError),
    /// Cancellation arrived before the batch was delivered. The batch still
    /// belongs to the caller.
    Interrupted,
}

/// Summary returned when a driver stops.
#[derive(Debug, Default)]
pub struct DriverReport {
    pub batches_delivered: u64,
    pub events_delivered: u64,
    pub batches_dropped: u64,
    pub events_dropped: u64,
    /// Events excluded before batching because they were too large.
    pub events_rejected: u64,
    /// Events neither delivered nor dropped, in enqueue order.
    pub undelivered: Vec<LogEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Publish {
    FullBatches,
    Everything,
}

pub struct StreamDriver<C> {
    client: C,
    stream: StreamIdentity,
    queue: QueueHandle,
    config: DriverConfig,
    tokens: TokenManager,
    provisioner: ResourceProvisioner,
    state: DriverState,
    // Batch that was interrupted by cancellation, delivered first on flush
    pending: Option<Batch>,
    report: DriverReport,
}

impl<C: LogsClient> StreamDriver<C> {
    pub fn new(
        client: C,
        stream: StreamIdentity,
        queue: QueueHandle,
        config: DriverConfig,
    ) -> Result<Self, DriverError> {
        config.limits.validate()?;
        Ok(Self {
            client,
            stream,
            queue,
            provisioner: ResourceProvisioner::new(config.provision_policy),
            config,
            tokens: TokenManager::new(),
            state: DriverState::Idle,
            pending: None,
            report: DriverReport::default(),
        })
    }

    #[must_use]
    pub fn state(&self) -> DriverState {
        self.state
    }

    #[must_use]
    pub fn stream(&self) -> &StreamIdentity {
        &self.stream
    }

    /// Token the next put will carry.
    #[must_use]
    pub fn current_token(&self) -> Option<&str> {
        self.tokens.current_token(&self.stream)
    }

    /// Runs the delivery loop until `cancel` fires or the queue is closed.
    ///
    /// A closed queue is drained completely before returning. On cancellation
    /// the configured [`ShutdownPolicy`] applies. Provisioning failures that
    /// can't be recovered stop the driver with a [`DriverFailure`] whose report
    /// hands back the in-flight batch and every queued event.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<DriverReport, DriverFailure> {
        info!("LOGS | Starting delivery to {}", self.stream);

        if let Err(e) = self.provision(&cancel).await {
            return Err(self.stop_with(e));
        }

        let period = self.config.flush_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let publish = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => Publish::Everything,
                () = self.queue.notified() => {
                    if self.queue.is_closed() {
                        Publish::Everything
                    } else {
                        Publish::FullBatches
                    }
                }
            };

            match self.publish(publish, &cancel).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => return Err(self.stop_with(e)),
            }

            if self.queue.is_closed() && self.queue.is_empty() {
                debug!("LOGS | Queue for {} closed and drained", self.stream);
                break;
            }
        }

        self.shutdown().await
    }

    /// Delivers every queued event now, batch by batch.
    pub async fn flush(&mut self, cancel: &CancellationToken) -> Result<(), DriverError> {
        self.publish(Publish::Everything, cancel).await.map(|_| ())
    }

    /// Returns `Ok(false)` when delivery was interrupted by cancellation.
    async fn publish(
        &mut self,
        publish: Publish,
        cancel: &CancellationToken,
    ) -> Result<bool, DriverError> {
        if let Some(batch) = self.pending.take() {
            if !self.deliver_counted(batch, cancel).await? {
                return Ok(false);
            }
        }

        loop {
            if publish == Publish::FullBatches && !self.queue.has_full_batch(&self.config.limits) {
                return Ok(true);
            }
            let drained = self.queue.drain(&self.config.limits);
            self.report.events_rejected += drained.rejected.len() as u64;
            if drained.batch.is_empty() {
                return Ok(true);
            }
            if !self.deliver_counted(drained.batch, cancel).await? {
                return Ok(false);
            }
        }
    }

    async fn deliver_counted(
        &mut self,
        batch: Batch,
        cancel: &CancellationToken,
    ) -> Result<bool, DriverError> {
        let outcome = match self.deliver(&batch, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Kept so that the failure report hands it back
                self.pending = Some(batch);
                return Err(e);
            }
        };
        match outcome {
            BatchOutcome::Delivered => {
                self.report.batches_delivered += 1;
                self.report.events_delivered += batch.len() as u64;
                Ok(true)
            }
            BatchOutcome::Dropped(e) => {
                error!(
                    "LOGS | Dropping batch of {} events for {}: {}",
                    batch.len(),
                    self.stream,
                    e
                );
                self.report.batches_dropped += 1;
                self.report.events_dropped += batch.len() as u64;
                Ok(true)
            }
            BatchOutcome::Interrupted => {
                self.pending = Some(batch);
                Ok(false)
            }
        }
    }

    /// Delivers one batch, recovering from retryable failures.
    ///
    /// Every retryable failure uses up one attempt of the retry strategy;
    /// once they are exhausted the batch is dropped. Only an unrecoverable
    /// provisioning failure is returned as an error.
    pub async fn deliver(
        &mut self,
        batch: &Batch,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, DriverError> {
        if batch.is_empty() {
            return Ok(BatchOutcome::Delivered);
        }
        let max_attempts = self.config.retry_strategy.max_attempts();
        let mut failed = 0;
        self.state = if self.provisioner.is_provisioned(&self.stream) {
            DriverState::Delivering
        } else {
            DriverState::Provisioning
        };

        loop {
            if cancel.is_cancelled() {
                self.state = DriverState::Idle;
                return Ok(BatchOutcome::Interrupted);
            }

            if self.state == DriverState::Provisioning {
                match self.provisioner.ensure(&self.client, &self.stream).await {
                    Ok(()) => self.state = DriverState::Delivering,
                    Err(e) if e.is_retryable() && failed + 1 < max_attempts => {
                        failed += 1;
                        warn!("LOGS | Provisioning {} failed, will retry: {}", self.stream, e);
                        if !self.back_off(failed, cancel).await {
                            return Ok(BatchOutcome::Interrupted);
                        }
                        self.state = DriverState::Provisioning;
                        continue;
                    }
                    Err(e) => {
                        self.state = DriverState::Stopped;
                        return Err(e.into());
                    }
                }
            }

            if let Err(e) = validate_put_request(batch.events(), &self.config.limits) {
                self.state = DriverState::Idle;
                return Ok(BatchOutcome::Dropped(e));
            }

            let token = self.tokens.current_token(&self.stream).map(str::to_owned);
            let result = self
                .client
                .put_log_events(PutLogEventsRequest {
                    group: &self.stream.group,
                    stream: &self.stream.stream,
                    events: batch.events(),
                    sequence_token: token.as_deref(),
                })
                .await;

            let e = match result {
                Ok(response) => {
                    self.on_success(batch, response);
                    return Ok(BatchOutcome::Delivered);
                }
                Err(e) if e.kind == DeliveryErrorKind::AlreadyAccepted => {
                    debug!("LOGS | Batch for {} was already accepted", self.stream);
                    self.on_success(
                        batch,
                        PutLogEventsResponse {
                            next_token: e.expected_token,
                            rejected: None,
                        },
                    );
                    return Ok(BatchOutcome::Delivered);
                }
                Err(e) if !e.kind.is_retryable() => {
                    self.state = DriverState::Idle;
                    return Ok(BatchOutcome::Dropped(e));
                }
                Err(e) => e,
            };

            // Applied even when this was the last attempt for the batch
            match e.kind {
                DeliveryErrorKind::TokenMismatch => match (token, e.expected_token.clone()) {
                    // The stale token is never reused: the next attempt omits it
                    (Some(_), _) | (None, None) => self.tokens.invalidate(&self.stream),
                    // A tokenless attempt got the true value back
                    (None, Some(expected)) => self.tokens.adopt(&self.stream, expected),
                },
                DeliveryErrorKind::ResourceMissing => {
                    warn!("LOGS | Destination {} is missing, provisioning again", self.stream);
                    self.provisioner.forget(&self.stream);
                }
                _ => {}
            }

            failed += 1;
            if failed >= max_attempts {
                self.state = DriverState::Idle;
                return Ok(BatchOutcome::Dropped(DeliveryError::new(
                    e.kind,
                    format!("giving up after {failed} attempts: {}", e.message),
                )));
            }
            debug!(
                "LOGS | Put to {} failed (attempt {}/{}): {}",
                self.stream, failed, max_attempts, e
            );

            self.state = match e.kind {
                DeliveryErrorKind::TokenMismatch => DriverState::Delivering,
                DeliveryErrorKind::ResourceMissing => DriverState::Provisioning,
                _ => {
                    if !self.back_off(failed, cancel).await {
                        return Ok(BatchOutcome::Interrupted);
                    }
                    DriverState::Delivering
                }
            };
        }
    }

    fn on_success(&mut self, batch: &Batch, response: PutLogEventsResponse) {
        if let Some(rejected) = response.rejected {
            warn!(
                "LOGS | Some events sent to {} were rejected by the service: {:?}",
                self.stream, rejected
            );
        }
        debug!("LOGS | Delivered {} events to {}", batch.len(), self.stream);
        self.tokens.record_success(&self.stream, response.next_token);
        self.state = DriverState::Idle;
    }

    async fn back_off(&mut self, failed: u32, cancel: &CancellationToken) -> bool {
        self.state = DriverState::Retrying;
        let delay = self.config.retry_strategy.delay(failed);
        if retry::wait(delay, cancel).await {
            true
        } else {
            self.state = DriverState::Idle;
            false
        }
    }

    /// Provisions the destination before the first delivery.
    async fn provision(&mut self, cancel: &CancellationToken) -> Result<(), DriverError> {
        let max_attempts = self.config.retry_strategy.max_attempts();
        let mut failed = 0;
        self.state = DriverState::Provisioning;
        loop {
            match self.provisioner.ensure(&self.client, &self.stream).await {
                Ok(()) => {
                    self.state = DriverState::Idle;
                    return Ok(());
                }
                Err(e) if e.is_retryable() && failed + 1 < max_attempts => {
                    failed += 1;
                    warn!("LOGS | Provisioning {} failed, will retry: {}", self.stream, e);
                    if !self.back_off(failed, cancel).await {
                        // Cancelled: the delivery path provisions again if needed
                        return Ok(());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn shutdown(mut self) -> Result<DriverReport, DriverFailure> {
        self.queue.close();

        if let ShutdownPolicy::Flush { timeout } = self.config.shutdown {
            if self.pending.is_some() || !self.queue.is_empty() {
                info!("LOGS | Flushing {} queued events for {}", self.queue.len(), self.stream);
                let deadline = CancellationToken::new();
                let timer = {
                    let deadline = deadline.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(timeout).await;
                        deadline.cancel();
                    })
                };
                let result = self.publish(Publish::Everything, &deadline).await;
                timer.abort();
                if let Err(e) = result {
                    return Err(self.stop_with(e));
                }
            }
        }

        self.collect_undelivered();
        self.state = DriverState::Stopped;
        self.tokens.remove(&self.stream);
        info!("LOGS | Stopped delivery to {}", self.stream);
        Ok(self.report)
    }

    fn stop_with(&mut self, error: DriverError) -> DriverFailure {
        error!("LOGS | Stopping delivery to {}: {}", self.stream, error);
        self.queue.close();
        self.collect_undelivered();
        self.state = DriverState::Stopped;
        self.tokens.remove(&self.stream);
        DriverFailure {
            error,
            report: std::mem::take(&mut self.report),
        }
    }

    /// Moves the interrupted batch and the rest of the queue into the report,
    /// in enqueue order.
    fn collect_undelivered(&mut self) {
        let mut undelivered = self.pending.take().map(Batch::into_events).unwrap_or_default();
        undelivered.extend(self.queue.drain_all());
        if !undelivered.is_empty() {
            warn!(
                "LOGS | Stopping {} with {} undelivered events",
                self.stream,
                undelivered.len()
            );
        }
        self.report.undelivered.extend(undelivered);
    }
}
