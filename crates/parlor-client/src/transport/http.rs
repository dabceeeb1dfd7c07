use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use tracing::debug;

use parlor_types::api::{GraphQlRequest, GraphQlResponse};

use crate::credential::Credential;
use crate::error::TransportError;
use crate::transport::{RequestChannel, response_data};

/// Longest response body kept in an error.
const MAX_ERROR_BODY: usize = 200;

/// GraphQL over HTTP POST. The credential rides in the `Authorization` header
/// of each request.
pub struct HttpRequestChannel {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRequestChannel {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl RequestChannel for HttpRequestChannel {
    async fn execute(
        &self,
        request: &GraphQlRequest,
        credential: Option<&Credential>,
    ) -> Result<Value, TransportError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(credential) = credential {
            builder = builder.header(AUTHORIZATION, credential.bearer());
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = resp.status();
        debug!("{} -> {}", self.endpoint, status);

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let reply: GraphQlResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::Protocol(format!("malformed reply: {}", e)))?;
        response_data(reply)
    }
}

fn status_error(status: StatusCode, body: &str) -> TransportError {
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TransportError::unauthorized(format!("server returned {}", status))
        }
        _ => TransportError::Http {
            status: status.as_u16(),
            body,
        },
    }
}
