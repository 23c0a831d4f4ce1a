// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # logstream-shipper
//!
//! Ships log events to an append-only log-stream service, one ordered stream
//! at a time.
//!
//! ```text
//!   producers ──> EventQueue ──> StreamDriver ──> LogsClient ──> service
//!                                  │      │
//!                     TokenManager ┘      └ ResourceProvisioner
//! ```
//!
//! - [`queue`]: bounded per-stream buffer, cloneable handle for producers
//! - [`batch`]: packing events into batches that respect the put limits
//! - [`client`]: the [`LogsClient`] seam and the shared request validation
//! - [`token`]: continuation tokens of the append protocol
//! - [`provisioner`]: lazy creation of the log group and log stream
//! - [`driver`]: the per-stream delivery loop
//! - [`shipper`]: one driver per stream, supervised on a `JoinSet`
//! - [`http_client`], [`metadata`], [`config`]: production wiring

#![deny(clippy::all)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch;
pub mod client;
pub mod config;
pub mod constants;
pub mod driver;
pub mod errors;
pub mod event;
pub mod http_client;
pub mod metadata;
pub mod provisioner;
pub mod queue;
pub mod retry;
pub mod shipper;
pub mod token;

pub use batch::{Batch, BatchBuilder, BatchLimits};
pub use client::{LogsClient, PutLogEventsRequest, PutLogEventsResponse};
pub use config::ShipperConfig;
pub use driver::{BatchOutcome, DriverConfig, DriverReport, DriverState, ShutdownPolicy, StreamDriver};
pub use errors::{DeliveryError, DeliveryErrorKind, DriverError, DriverFailure};
pub use event::{LogEvent, StreamIdentity};
pub use queue::QueueHandle;
pub use shipper::Shipper;
