//! HTTP client core
//!
//! One `reqwest::Client` shared by every endpoint group. All responses use
//! the backend's `{ status, data, message }` envelope; non-2xx statuses map
//! onto the error taxonomy (401/403 are authentication failures, 404 is
//! not-found, everything else is an API error).

use crate::config::ClientConfig;
use crate::error::{AppError, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    status: String,
    data: Option<T>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// REST client for the backend API
pub struct ApiClient {
    http: reqwest::Client,
    config: ClientConfig,
    token: String,
}

impl ApiClient {
    /// Create a client with a bearer token issued by the identity provider.
    pub fn new(config: ClientConfig, token: impl Into<String>) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            config,
            token: token.into(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The bearer token, also passed as a query parameter on streaming
    /// endpoints (those transports cannot set headers).
    pub fn token(&self) -> &str {
        &self.token
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        Self::decode(response).await
    }

    pub(crate) async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    pub(crate) async fn put_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .http
            .put(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    pub(crate) async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::decode_empty(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let response = Self::check_status(response).await?;
        let envelope: ApiEnvelope<T> = response.json().await?;
        if envelope.status != "success" {
            return Err(AppError::Api(
                envelope.message.unwrap_or_else(|| "request failed".to_string()),
            ));
        }
        envelope
            .data
            .ok_or_else(|| AppError::Api("no data in response".to_string()))
    }

    async fn decode_empty(response: reqwest::Response) -> Result<()> {
        let response = Self::check_status(response).await?;
        let envelope: ApiEnvelope<serde_json::Value> = response.json().await?;
        if envelope.status != "success" {
            return Err(AppError::Api(
                envelope.message.unwrap_or_else(|| "request failed".to_string()),
            ));
        }
        Ok(())
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = Self::error_message(response).await;
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AppError::Auth(message)),
            StatusCode::NOT_FOUND => Err(AppError::NotFound(message)),
            _ => Err(AppError::Api(format!("{}: {}", status, message))),
        }
    }

    async fn error_message(response: reqwest::Response) -> String {
        match response.json::<ApiErrorBody>().await {
            Ok(body) => body
                .message
                .or(body.error)
                .unwrap_or_else(|| "request failed".to_string()),
            Err(_) => "request failed".to_string(),
        }
    }
}
