// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use tracing::{debug, info};

use crate::client::LogsClient;
use crate::errors::{DeliveryError, DeliveryErrorKind, ProvisionError};
use crate::event::StreamIdentity;

/// Which destination resources the provisioner may create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionPolicy {
    pub create_group: bool,
    pub create_stream: bool,
}

impl Default for ProvisionPolicy {
    fn default() -> Self {
        Self {
            create_group: true,
            create_stream: true,
        }
    }
}

/// Lazily creates the log group and log stream of a destination.
///
/// A destination is provisioned once, then again only after [`forget`] is
/// called because a put reported it missing.
///
/// [`forget`]: ResourceProvisioner::forget
#[derive(Debug, Default)]
pub struct ResourceProvisioner {
    policy: ProvisionPolicy,
    provisioned: HashSet<StreamIdentity>,
}

impl ResourceProvisioner {
    #[must_use]
    pub fn new(policy: ProvisionPolicy) -> Self {
        Self {
            policy,
            provisioned: HashSet::new(),
        }
    }

    #[must_use]
    pub fn is_provisioned(&self, stream: &StreamIdentity) -> bool {
        self.provisioned.contains(stream)
    }

    /// Marks `stream` as needing provisioning before the next delivery.
    pub fn forget(&mut self, stream: &StreamIdentity) {
        self.provisioned.remove(stream);
    }

    /// Makes sure the group and stream of `stream` exist.
    pub async fn ensure<C>(
        &mut self,
        client: &C,
        stream: &StreamIdentity,
    ) -> Result<(), ProvisionError>
    where
        C: LogsClient + ?Sized,
    {
        if self.is_provisioned(stream) {
            return Ok(());
        }

        if self.policy.create_group {
            debug!("LOGS | Creating log group {}", stream.group);
            accept_existing(client.create_log_group(&stream.group).await).map_err(|source| {
                ProvisionError::Group {
                    group: stream.group.clone(),
                    source,
                }
            })?;
        }

        if self.policy.create_stream {
            debug!("LOGS | Creating log stream {}", stream);
            match accept_existing(
                client
                    .create_log_stream(&stream.group, &stream.stream)
                    .await,
            ) {
                Ok(()) => {}
                Err(e)
                    if e.kind == DeliveryErrorKind::ResourceMissing
                        && !self.policy.create_group =>
                {
                    return Err(ProvisionError::GroupCreationDisabled {
                        group: stream.group.clone(),
                    });
                }
                Err(source) => {
                    return Err(ProvisionError::Stream {
                        group: stream.group.clone(),
                        stream: stream.stream.clone(),
                        source,
                    });
                }
            }
        }

        info!("LOGS | Destination {} is ready", stream);
        self.provisioned.insert(stream.clone());
        Ok(())
    }
}

// Creating a resource that exists already is a success
fn accept_existing(result: Result<(), DeliveryError>) -> Result<(), DeliveryError> {
    match result {
        Err(e) if e.kind == DeliveryErrorKind::AlreadyExists => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{PutLogEventsRequest, PutLogEventsResponse};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted create results and records the calls made.
    #[derive(Default)]
    struct ScriptedClient {
        group_results: Mutex<VecDeque<Result<(), DeliveryError>>>,
        stream_results: Mutex<VecDeque<Result<(), DeliveryError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn with_results(
            group: Vec<Result<(), DeliveryError>>,
            stream: Vec<Result<(), DeliveryError>>,
        ) -> Self {
            Self {
                group_results: Mutex::new(group.into()),
                stream_results: Mutex::new(stream.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LogsClient for ScriptedClient {
        async fn create_log_group(&self, group: &str) -> Result<(), DeliveryError> {
            self.calls.lock().unwrap().push(format!("group:{group}"));
            self.group_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        async fn create_log_stream(&self, group: &str, stream: &str) -> Result<(), DeliveryError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("stream:{group}/{stream}"));
            self.stream_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        async fn put_log_events(
            &self,
            _request: PutLogEventsRequest<'_>,
        ) -> Result<PutLogEventsResponse, DeliveryError> {
            unreachable!("provisioner never puts events")
        }
    }

    fn exists() -> DeliveryError {
        DeliveryError::new(DeliveryErrorKind::AlreadyExists, "exists")
    }

    #[tokio::test]
    async fn test_ensure_creates_group_then_stream_once() {
        let client = ScriptedClient::default();
        let mut provisioner = ResourceProvisioner::default();
        let stream = StreamIdentity::new("g", "s");

        provisioner.ensure(&client, &stream).await.unwrap();
        provisioner.ensure(&client, &stream).await.unwrap();

        assert_eq!(client.calls(), vec!["group:g", "stream:g/s"]);
        assert!(provisioner.is_provisioned(&stream));
    }

    #[tokio::test]
    async fn test_already_exists_is_success() {
        let client = ScriptedClient::with_results(vec![Err(exists())], vec![Err(exists())]);
        let mut provisioner = ResourceProvisioner::default();
        let stream = StreamIdentity::new("g", "s");

        assert!(provisioner.ensure(&client, &stream).await.is_ok());
    }

    #[tokio::test]
    async fn test_forget_reprovisions() {
        let client = ScriptedClient::with_results(vec![Ok(()), Err(exists())], vec![]);
        let mut provisioner = ResourceProvisioner::default();
        let stream = StreamIdentity::new("g", "s");

        provisioner.ensure(&client, &stream).await.unwrap();
        provisioner.forget(&stream);
        assert!(!provisioner.is_provisioned(&stream));
        provisioner.ensure(&client, &stream).await.unwrap();

        assert_eq!(client.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_permission_denied_is_an_error() {
        let denied = DeliveryError::new(DeliveryErrorKind::Unauthorized, "denied");
        let client = ScriptedClient::with_results(vec![Err(denied)], vec![]);
        let mut provisioner = ResourceProvisioner::default();
        let stream = StreamIdentity::new("g", "s");

        let error = provisioner.ensure(&client, &stream).await.unwrap_err();

        assert!(matches!(error, ProvisionError::Group { .. }));
        assert!(!error.is_retryable());
        assert!(!provisioner.is_provisioned(&stream));
        // Stream creation is not attempted after the group failed
        assert_eq!(client.calls(), vec!["group:g"]);
    }

    #[tokio::test]
    async fn test_missing_group_without_group_creation() {
        let missing = DeliveryError::new(DeliveryErrorKind::ResourceMissing, "no group");
        let client = ScriptedClient::with_results(vec![], vec![Err(missing)]);
        let mut provisioner = ResourceProvisioner::new(ProvisionPolicy {
            create_group: false,
            create_stream: true,
        });
        let stream = StreamIdentity::new("g", "s");

        let error = provisioner.ensure(&client, &stream).await.unwrap_err();

        assert!(matches!(error, ProvisionError::GroupCreationDisabled { .. }));
        assert_eq!(client.calls(), vec!["stream:g/s"]);
    }
}
