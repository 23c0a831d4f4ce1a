// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Supervisor running one [`StreamDriver`] per destination stream.
//!
//! Drivers share nothing but the client. Each one is spawned on a `JoinSet`
//! the first time a stream is asked for and reports back when it stops.

use std::collections::HashMap;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::client::LogsClient;
use crate::driver::{DriverConfig, DriverReport, StreamDriver};
use crate::errors::{DriverError, DriverFailure, QueueError};
use crate::event::{LogEvent, StreamIdentity};
use crate::queue::QueueHandle;

/// How a driver ended: its report, or the error that stopped it together with
/// the events it still held.
pub type StreamResult = (StreamIdentity, Result<DriverReport, DriverFailure>);

pub struct Shipper<C> {
    client: C,
    config: DriverConfig,
    queue_capacity: usize,
    cancel: CancellationToken,
    queues: HashMap<StreamIdentity, QueueHandle>,
    drivers: JoinSet<StreamResult>,
}

impl<C> Shipper<C>
where
    C: LogsClient + Clone + 'static,
{
    /// Creates a shipper. Must be called inside a tokio runtime.
    pub fn new(client: C, config: DriverConfig, queue_capacity: usize) -> Result<Self, DriverError> {
        config.limits.validate()?;
        Ok(Self {
            client,
            config,
            queue_capacity,
            cancel: CancellationToken::new(),
            queues: HashMap::new(),
            drivers: JoinSet::new(),
        })
    }

    /// Token that stops every driver when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Queue of `stream`, starting its driver on first use.
    pub fn stream(&mut self, stream: &StreamIdentity) -> Result<QueueHandle, DriverError> {
        if let Some(queue) = self.queues.get(stream) {
            return Ok(queue.clone());
        }

        let queue = QueueHandle::new(self.queue_capacity);
        let driver = StreamDriver::new(
            self.client.clone(),
            stream.clone(),
            queue.clone(),
            self.config.clone(),
        )?;
        let cancel = self.cancel.child_token();
        let id = stream.clone();
        self.drivers.spawn(async move { (id, driver.run(cancel).await) });
        debug!("LOGS | Spawned driver for {}", stream);

        self.queues.insert(stream.clone(), queue.clone());
        Ok(queue)
    }

    /// Queues `event` for `stream`.
    pub fn enqueue(&mut self, stream: &StreamIdentity, event: LogEvent) -> Result<(), QueueError> {
        match self.stream(stream) {
            Ok(queue) => queue.enqueue(event),
            Err(e) => {
                error!("LOGS | Unable to start driver for {}: {}", stream, e);
                Err(QueueError::Closed)
            }
        }
    }

    #[must_use]
    pub fn streams(&self) -> Vec<StreamIdentity> {
        self.queues.keys().cloned().collect()
    }

    /// Closes every queue and waits for the drivers to deliver what is left.
    pub async fn shutdown(self) -> Vec<StreamResult> {
        for queue in self.queues.values() {
            queue.close();
        }
        Self::join(self.drivers).await
    }

    /// Cancels every driver and waits for them to stop. Queued events are
    /// flushed or handed back according to the shutdown policy.
    pub async fn cancel(self) -> Vec<StreamResult> {
        self.cancel.cancel();
        Self::join(self.drivers).await
    }

    async fn join(mut drivers: JoinSet<StreamResult>) -> Vec<StreamResult> {
        let mut results = Vec::with_capacity(drivers.len());
        while let Some(joined) = drivers.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) if e.is_panic() => error!("LOGS | Driver task panicked: {:?}", e),
                Err(e) => error!("LOGS | Driver task failed: {}", e),
            }
        }
        results
    }
}
