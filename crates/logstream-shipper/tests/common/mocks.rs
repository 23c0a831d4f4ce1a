// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Channel-backed stand-in for the log-stream service.
//!
//! Every call pushes its arguments into a bounded channel and takes its
//! result from another one, so a test scripts the exact responses up front
//! and inspects the exact requests afterwards. Put requests go through the
//! same limit validation as the production client.

use async_trait::async_trait;
use logstream_shipper::{
    batch::BatchLimits,
    client::validate_put_request,
    errors::{DeliveryError, DeliveryErrorKind},
    LogEvent, LogsClient, PutLogEventsRequest, PutLogEventsResponse,
};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError, Receiver, Sender};
use tokio::sync::Mutex;

/// Owned copy of a put request as the service received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPut {
    pub group: String,
    pub stream: String,
    pub events: Vec<LogEvent>,
    pub sequence_token: Option<String>,
}

#[allow(dead_code)]
impl RecordedPut {
    pub fn timestamps(&self) -> Vec<i64> {
        self.events.iter().map(LogEvent::timestamp).collect()
    }
}

type PutResult = Result<PutLogEventsResponse, DeliveryError>;
type CreateResult = Result<(), DeliveryError>;

pub struct MockLogsClient {
    limits: BatchLimits,
    put_args: Sender<RecordedPut>,
    put_results: Mutex<Receiver<PutResult>>,
    create_args: Sender<String>,
    create_results: Mutex<Receiver<CreateResult>>,
}

/// Test side of the mock: script results, read recorded calls.
pub struct MockController {
    pub put_args: Receiver<RecordedPut>,
    pub put_results: Sender<PutResult>,
    pub create_args: Receiver<String>,
    pub create_results: Sender<CreateResult>,
}

#[allow(dead_code)]
impl MockLogsClient {
    pub fn new(capacity: usize) -> (Arc<Self>, MockController) {
        let (put_args_tx, put_args_rx) = mpsc::channel(capacity);
        let (put_results_tx, put_results_rx) = mpsc::channel(capacity);
        let (create_args_tx, create_args_rx) = mpsc::channel(capacity);
        let (create_results_tx, create_results_rx) = mpsc::channel(capacity);
        let client = Arc::new(Self {
            limits: BatchLimits::default(),
            put_args: put_args_tx,
            put_results: Mutex::new(put_results_rx),
            create_args: create_args_tx,
            create_results: Mutex::new(create_results_rx),
        });
        let controller = MockController {
            put_args: put_args_rx,
            put_results: put_results_tx,
            create_args: create_args_rx,
            create_results: create_results_tx,
        };
        (client, controller)
    }

    async fn next_create_result(&self) -> CreateResult {
        // Unscripted creates succeed
        match self.create_results.lock().await.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => Ok(()),
        }
    }
}

#[async_trait]
impl LogsClient for MockLogsClient {
    async fn create_log_group(&self, group: &str) -> Result<(), DeliveryError> {
        let _ = self.create_args.send(format!("group:{group}")).await;
        self.next_create_result().await
    }

    async fn create_log_stream(&self, group: &str, stream: &str) -> Result<(), DeliveryError> {
        let _ = self
            .create_args
            .send(format!("stream:{group}/{stream}"))
            .await;
        self.next_create_result().await
    }

    async fn put_log_events(
        &self,
        request: PutLogEventsRequest<'_>,
    ) -> Result<PutLogEventsResponse, DeliveryError> {
        // Recorded before validation so rejected requests can be inspected too
        let _ = self
            .put_args
            .send(RecordedPut {
                group: request.group.to_string(),
                stream: request.stream.to_string(),
                events: request.events.to_vec(),
                sequence_token: request.sequence_token.map(str::to_owned),
            })
            .await;

        validate_put_request(request.events, &self.limits)?;

        // Waits for the test to script a result
        self.put_results.lock().await.recv().await.unwrap_or_else(|| {
            Err(DeliveryError::new(
                DeliveryErrorKind::Transient,
                "mock result channel closed",
            ))
        })
    }
}

#[allow(dead_code)]
impl MockController {
    /// Every put recorded so far.
    pub fn recorded_puts(&mut self) -> Vec<RecordedPut> {
        let mut puts = Vec::new();
        while let Ok(put) = self.put_args.try_recv() {
            puts.push(put);
        }
        puts
    }

    /// Every create call recorded so far.
    pub fn recorded_creates(&mut self) -> Vec<String> {
        let mut creates = Vec::new();
        while let Ok(create) = self.create_args.try_recv() {
            creates.push(create);
        }
        creates
    }

    pub async fn script_puts(&self, results: Vec<PutResult>) {
        for result in results {
            self.put_results
                .send(result)
                .await
                .expect("mock client dropped");
        }
    }
}
