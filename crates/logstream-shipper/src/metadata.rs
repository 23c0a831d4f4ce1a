// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Region lookup through the instance metadata service.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::MetadataError;

pub const DEFAULT_METADATA_ENDPOINT: &str = "http://169.254.169.254";
const TOKEN_PATH: &str = "/latest/api/token";
const REGION_PATH: &str = "/latest/meta-data/placement/region";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_SECONDS: &str = "21600";

#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn region(&self) -> Result<String, MetadataError>;
}

/// Session-token based metadata client: a `PUT` for a session token, then a
/// `GET` of the region with that token.
#[derive(Debug, Clone)]
pub struct ImdsMetadataClient {
    client: reqwest::Client,
    endpoint: String,
}

impl ImdsMetadataClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, MetadataError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            // The metadata service is link-local, never proxied
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    async fn session_token(&self) -> Result<String, MetadataError> {
        let response = self
            .client
            .put(format!("{}{}", self.endpoint, TOKEN_PATH))
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECONDS)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MetadataError::Status(response.status().as_u16()));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl MetadataClient for ImdsMetadataClient {
    async fn region(&self) -> Result<String, MetadataError> {
        let token = self.session_token().await?;
        let response = self
            .client
            .get(format!("{}{}", self.endpoint, REGION_PATH))
            .header(TOKEN_HEADER, token.trim())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MetadataError::Status(response.status().as_u16()));
        }
        let region = response.text().await?.trim().to_string();
        if region.is_empty() {
            return Err(MetadataError::EmptyRegion);
        }
        debug!("Resolved region {} from instance metadata", region);
        Ok(region)
    }
}

/// Returns `configured` when set, otherwise asks the metadata service.
pub async fn resolve_region<M>(
    configured: Option<&str>,
    metadata: &M,
) -> Result<String, MetadataError>
where
    M: MetadataClient + ?Sized,
{
    match configured.map(str::trim).filter(|r| !r.is_empty()) {
        Some(region) => Ok(region.to_string()),
        None => {
            info!("No region configured, querying instance metadata");
            metadata.region().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRegion(&'static str);

    #[async_trait]
    impl MetadataClient for FixedRegion {
        async fn region(&self) -> Result<String, MetadataError> {
            Ok(self.0.to_string())
        }
    }

    struct Unavailable;

    #[async_trait]
    impl MetadataClient for Unavailable {
        async fn region(&self) -> Result<String, MetadataError> {
            Err(MetadataError::Status(404))
        }
    }

    #[tokio::test]
    async fn test_configured_region_wins() {
        let region = resolve_region(Some("eu-west-1"), &Unavailable).await.unwrap();
        assert_eq!(region, "eu-west-1");
    }

    #[tokio::test]
    async fn test_falls_back_to_metadata() {
        let region = resolve_region(None, &FixedRegion("us-east-2")).await.unwrap();
        assert_eq!(region, "us-east-2");

        let region = resolve_region(Some("  "), &FixedRegion("us-east-2")).await.unwrap();
        assert_eq!(region, "us-east-2");
    }

    #[tokio::test]
    async fn test_metadata_error_is_surfaced() {
        let error = resolve_region(None, &Unavailable).await.unwrap_err();
        assert!(matches!(error, MetadataError::Status(404)));
    }
}
