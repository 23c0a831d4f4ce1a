// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod logger;

use std::env;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use logstream_shipper::{
    errors::{DriverError, QueueError},
    http_client::HttpLogsClient,
    metadata::{resolve_region, ImdsMetadataClient},
    DriverReport, LogEvent, QueueHandle, ShipperConfig, StreamDriver,
};

const METADATA_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("LOGSTREAM_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    init_logging(&log_level);

    let config = match ShipperConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(report) => {
            info!(
                "Delivered {} events in {} batches, dropped {}, rejected {}, undelivered {}",
                report.events_delivered,
                report.batches_delivered,
                report.events_dropped,
                report.events_rejected,
                report.undelivered.len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Log shipping stopped: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_level: &str) {
    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");
    let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .event_format(logger::Formatter)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Unable to install log subscriber: {e}");
    }
    debug!("Logging subsystem enabled");
}

async fn run(config: ShipperConfig) -> Result<DriverReport, DriverError> {
    let endpoint = match &config.endpoint {
        Some(endpoint) => endpoint.clone(),
        None => {
            let metadata = ImdsMetadataClient::new(&config.metadata_endpoint, METADATA_TIMEOUT)?;
            let region = resolve_region(config.region.as_deref(), &metadata).await?;
            config.service_endpoint(&region)
        }
    };
    info!("Shipping stdin to {} via {}", config.stream_identity(), endpoint);

    let client = HttpLogsClient::new(
        endpoint,
        config.request_timeout,
        config.https_proxy.as_deref(),
    )
    .map_err(|e| DriverError::Task(format!("unable to build HTTP client: {e}")))?;

    let queue = QueueHandle::new(config.max_buffered_events);
    let driver = StreamDriver::new(
        client,
        config.stream_identity(),
        queue.clone(),
        config.driver_config(),
    )?;

    let cancel = CancellationToken::new();
    let mut driver_handle = tokio::spawn(driver.run(cancel.clone()));
    let reader = tokio::spawn(read_stdin(queue, cancel.clone()));

    let joined = tokio::select! {
        joined = &mut driver_handle => joined,
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt, shutting down");
            cancel.cancel();
            driver_handle.await
        }
    };
    reader.abort();

    match joined.map_err(|e| DriverError::Task(e.to_string()))? {
        Ok(report) => Ok(report),
        Err(failure) => {
            if !failure.report.undelivered.is_empty() {
                error!(
                    "{} events were not delivered before the failure",
                    failure.report.undelivered.len()
                );
            }
            Err(failure.error)
        }
    }
}

/// Enqueues every stdin line as an event. Closes the queue on EOF so the
/// driver delivers what is left and stops.
async fn read_stdin(queue: QueueHandle, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut dropped: u64 = 0;
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => match queue.enqueue(LogEvent::now(line)) {
                Ok(()) => {}
                Err(QueueError::Full { capacity }) => {
                    dropped += 1;
                    // One warning per thousand dropped lines
                    if dropped % 1000 == 1 {
                        warn!("Queue full ({capacity} events), {dropped} lines dropped so far");
                    }
                }
                Err(QueueError::Closed) => return,
            },
            Ok(None) => {
                debug!("End of input");
                queue.close();
                return;
            }
            Err(e) => {
                error!("Unable to read stdin: {e}");
                queue.close();
                return;
            }
        }
    }
}
