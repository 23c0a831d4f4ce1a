// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! [`LogsClient`] over HTTP.
//!
//! Speaks the JSON 1.1 protocol of the log-stream service: every operation is a
//! `POST` to the service endpoint, selected by the `X-Amz-Target` header, with a
//! JSON body. Failures come back as a JSON document whose `__type` names the
//! error, which is mapped to a [`DeliveryErrorKind`].
//!
//! Requests are not signed here. The endpoint is expected to be the service
//! itself behind a signing proxy, or a compatible local service.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, error};

use crate::batch::BatchLimits;
use crate::client::{
    validate_put_request, LogsClient, PutLogEventsRequest, PutLogEventsResponse,
    RejectedLogEventsInfo,
};
use crate::errors::{DeliveryError, DeliveryErrorKind};
use crate::event::InputLogEvent;

const TARGET_PREFIX: &str = "Logs_20140328";
const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Endpoint of the public service in `region`.
#[must_use]
pub fn endpoint_for_region(region: &str) -> String {
    format!("https://logs.{region}.amazonaws.com")
}

#[derive(Debug, Clone)]
pub struct HttpLogsClient {
    client: reqwest::Client,
    endpoint: String,
    limits: BatchLimits,
}

impl HttpLogsClient {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        https_proxy: Option<&str>,
    ) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Some(Duration::from_secs(270)))
            .tcp_keepalive(Some(Duration::from_secs(120)));
        if let Some(proxy) = https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
            endpoint: endpoint.into(),
            limits: BatchLimits::default(),
        })
    }

    /// Replaces the limits enforced before each put.
    #[must_use]
    pub fn with_limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<B: Serialize>(&self, operation: &str, body: &B) -> Result<Vec<u8>, DeliveryError> {
        let payload = serde_json::to_vec(body).map_err(|e| {
            DeliveryError::new(
                DeliveryErrorKind::InvalidInput,
                format!("failed to serialize {operation} request: {e}"),
            )
        })?;

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                debug!("LOGS | {} request failed: {}", operation, e);
                DeliveryError::new(DeliveryErrorKind::Transient, e.to_string())
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| DeliveryError::new(DeliveryErrorKind::Transient, e.to_string()))?;

        if status.is_success() {
            Ok(body.to_vec())
        } else {
            Err(service_error(status, &body))
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogGroupBody<'a> {
    log_group_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogStreamBody<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsBody<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
    log_events: Vec<InputLogEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_token: Option<&'a str>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsOutput {
    next_sequence_token: Option<String>,
    rejected_log_events_info: Option<RejectedLogEventsInfo>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ServiceErrorBody {
    #[serde(rename = "__type")]
    error_type: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
    expected_sequence_token: Option<String>,
}

#[async_trait]
impl LogsClient for HttpLogsClient {
    async fn create_log_group(&self, group: &str) -> Result<(), DeliveryError> {
        self.call(
            "CreateLogGroup",
            &CreateLogGroupBody {
                log_group_name: group,
            },
        )
        .await
        .map(|_| ())
        .or_else(accept_existing)
    }

    async fn create_log_stream(&self, group: &str, stream: &str) -> Result<(), DeliveryError> {
        self.call(
            "CreateLogStream",
            &CreateLogStreamBody {
                log_group_name: group,
                log_stream_name: stream,
            },
        )
        .await
        .map(|_| ())
        .or_else(accept_existing)
    }

    async fn put_log_events(
        &self,
        request: PutLogEventsRequest<'_>,
    ) -> Result<PutLogEventsResponse, DeliveryError> {
        validate_put_request(request.events, &self.limits)?;

        let body = PutLogEventsBody {
            log_group_name: request.group,
            log_stream_name: request.stream,
            log_events: request.events.iter().map(|e| e.to_input()).collect(),
            sequence_token: request.sequence_token,
        };
        let output = self.call("PutLogEvents", &body).await?;

        // An empty body is a success without a token
        let output: PutLogEventsOutput = if output.is_empty() {
            PutLogEventsOutput::default()
        } else {
            serde_json::from_slice(&output).map_err(|e| {
                error!("LOGS | Unreadable PutLogEvents response: {}", e);
                DeliveryError::new(
                    DeliveryErrorKind::Transient,
                    format!("unreadable PutLogEvents response: {e}"),
                )
            })?
        };
        Ok(PutLogEventsResponse {
            next_token: output.next_sequence_token,
            rejected: output.rejected_log_events_info,
        })
    }
}

fn accept_existing(e: DeliveryError) -> Result<(), DeliveryError> {
    if e.kind == DeliveryErrorKind::AlreadyExists {
        debug!("LOGS | {}", e);
        Ok(())
    } else {
        Err(e)
    }
}

fn service_error(status: StatusCode, body: &[u8]) -> DeliveryError {
    let parsed: ServiceErrorBody = serde_json::from_slice(body).unwrap_or_default();
    // Error types may be namespaced, e.g. "com.amazonaws.logs#ThrottlingException"
    let error_type = parsed
        .error_type
        .as_deref()
        .map(|t| t.rsplit('#').next().unwrap_or(t))
        .unwrap_or_default();
    let kind = classify(status, error_type);
    let message = parsed
        .message
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());

    let expected_token = match kind {
        DeliveryErrorKind::TokenMismatch | DeliveryErrorKind::AlreadyAccepted => parsed
            .expected_sequence_token
            .or_else(|| token_from_message(&message)),
        _ => None,
    };

    let message = if error_type.is_empty() {
        format!("status {}: {}", status.as_u16(), message)
    } else {
        format!("{error_type}: {message}")
    };
    DeliveryError::new(kind, message).with_expected_token(expected_token)
}

fn classify(status: StatusCode, error_type: &str) -> DeliveryErrorKind {
    match error_type {
        "ResourceAlreadyExistsException" => DeliveryErrorKind::AlreadyExists,
        "ResourceNotFoundException" => DeliveryErrorKind::ResourceMissing,
        "InvalidSequenceTokenException" => DeliveryErrorKind::TokenMismatch,
        "DataAlreadyAcceptedException" => DeliveryErrorKind::AlreadyAccepted,
        "ThrottlingException" | "LimitExceededException" | "RequestLimitExceeded" => {
            DeliveryErrorKind::Throttled
        }
        "ServiceUnavailableException" | "InternalFailure" => DeliveryErrorKind::Transient,
        "AccessDeniedException"
        | "UnrecognizedClientException"
        | "MissingAuthenticationToken"
        | "IncompleteSignature"
        | "InvalidSignatureException"
        | "ExpiredTokenException" => DeliveryErrorKind::Unauthorized,
        "InvalidParameterException" | "SerializationException" | "ValidationException" => {
            DeliveryErrorKind::InvalidInput
        }
        _ => match status {
            StatusCode::TOO_MANY_REQUESTS => DeliveryErrorKind::Throttled,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DeliveryErrorKind::Unauthorized,
            StatusCode::PAYLOAD_TOO_LARGE => DeliveryErrorKind::BatchTooLarge,
            StatusCode::NOT_FOUND => DeliveryErrorKind::ResourceMissing,
            s if s.is_server_error() => DeliveryErrorKind::Transient,
            _ => DeliveryErrorKind::InvalidInput,
        },
    }
}

// The service repeats the expected token in the message, e.g.
// "The next expected sequenceToken is: 4959..."
fn token_from_message(message: &str) -> Option<String> {
    static TOKEN: OnceLock<Option<regex::Regex>> = OnceLock::new();
    let re = TOKEN
        .get_or_init(|| regex::Regex::new(r"sequenceToken(?: is)?:\s*(\S+)").ok())
        .as_ref()?;
    re.captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('.'))
        .filter(|token| *token != "null")
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_types() {
        assert_eq!(
            classify(StatusCode::BAD_REQUEST, "InvalidSequenceTokenException"),
            DeliveryErrorKind::TokenMismatch
        );
        assert_eq!(
            classify(StatusCode::BAD_REQUEST, "ResourceNotFoundException"),
            DeliveryErrorKind::ResourceMissing
        );
        assert_eq!(
            classify(StatusCode::BAD_REQUEST, "ThrottlingException"),
            DeliveryErrorKind::Throttled
        );
        assert_eq!(
            classify(StatusCode::BAD_REQUEST, "AccessDeniedException"),
            DeliveryErrorKind::Unauthorized
        );
    }

    #[test]
    fn test_classify_falls_back_to_status() {
        assert_eq!(
            classify(StatusCode::SERVICE_UNAVAILABLE, ""),
            DeliveryErrorKind::Transient
        );
        assert_eq!(
            classify(StatusCode::TOO_MANY_REQUESTS, "Unknown"),
            DeliveryErrorKind::Throttled
        );
        assert_eq!(
            classify(StatusCode::BAD_REQUEST, ""),
            DeliveryErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_token_from_message() {
        assert_eq!(
            token_from_message(
                "The given sequenceToken is invalid. The next expected sequenceToken is: 49590302"
            ),
            Some("49590302".to_string())
        );
        assert_eq!(
            token_from_message("The next batch can be sent with sequenceToken: 123."),
            Some("123".to_string())
        );
        assert_eq!(
            token_from_message("The next expected sequenceToken is: null"),
            None
        );
        assert_eq!(token_from_message("no token here"), None);
    }

    #[test]
    fn test_service_error_prefers_payload_token() {
        let body = br#"{"__type":"com.amazonaws.logs#InvalidSequenceTokenException","message":"The next expected sequenceToken is: B","expectedSequenceToken":"A"}"#;
        let error = service_error(StatusCode::BAD_REQUEST, body);
        assert_eq!(error.kind, DeliveryErrorKind::TokenMismatch);
        assert_eq!(error.expected_token.as_deref(), Some("A"));
        assert!(error.message.starts_with("InvalidSequenceTokenException"));
    }

    #[test]
    fn test_service_error_with_unreadable_body() {
        let error = service_error(StatusCode::BAD_GATEWAY, b"<html>bad gateway</html>");
        assert_eq!(error.kind, DeliveryErrorKind::Transient);
        assert!(error.message.contains("502"));
        assert_eq!(error.expected_token, None);
    }
}
