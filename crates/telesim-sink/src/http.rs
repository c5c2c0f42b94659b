//! ---
//! tsim_section: "05-networking-external-interfaces"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "HTTP gateway sink posting JSON batches."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use telesim_sim::TelemetryMessage;
use tracing::{debug, warn};
use url::Url;

use crate::{SendReceipt, SinkError, TelemetrySink};

/// Posts each batch as a JSON array to a gateway ingestion endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpSink {
    pub fn new(endpoint: Url, token: Option<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SinkError::Config(format!("unable to build http client: {err}")))?;
        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn classify(status: StatusCode, body: &str) -> SinkError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        SinkError::Transient(detail)
    } else {
        SinkError::Rejected(detail)
    }
}

#[async_trait]
impl TelemetrySink for HttpSink {
    async fn send_batch(&self, batch: &[TelemetryMessage]) -> Result<SendReceipt, SinkError> {
        let mut request = self.client.post(self.endpoint.clone()).json(batch);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|err| {
            warn!(endpoint = %self.endpoint, error = %err, "gateway unreachable");
            SinkError::Transient(err.to_string())
        })?;
        let status = response.status();
        if status.is_success() {
            debug!(endpoint = %self.endpoint, records = batch.len(), "batch delivered");
            return Ok(SendReceipt {
                accepted: batch.len(),
            });
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, body.trim()))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_throttling_are_transient() {
        assert!(classify(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(classify(StatusCode::TOO_MANY_REQUESTS, "slow down").is_retryable());
        assert!(classify(StatusCode::REQUEST_TIMEOUT, "").is_retryable());
    }

    #[test]
    fn client_errors_are_rejections() {
        let err = classify(StatusCode::UNAUTHORIZED, "bad token");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("bad token"));
    }
}
