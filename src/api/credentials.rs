//! Broker credential and OAuth endpoints
//!
//! Credentials live behind the backend; the client never sees broker
//! secrets after submission. The Zerodha flow is: save the api key pair,
//! `oauth_initiate` to get the broker login URL, then poll `oauth_status`
//! until the backend reports the session as connected.

use super::client::ApiClient;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored broker credential, secrets redacted
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerCredential {
    pub id: String,
    pub broker: String,
    pub api_key: String,
    pub user_id: Option<String>,
    #[serde(default)]
    pub connected: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveCredentialRequest {
    pub broker: String,
    pub api_key: String,
    pub api_secret: String,
}

/// Response of `oauth_initiate`: where to send the user
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthInitiate {
    pub login_url: String,
}

/// Current state of the broker OAuth session
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthStatus {
    pub connected: bool,
    pub user_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApiClient {
    /// List stored broker credentials.
    pub async fn list_broker_credentials(&self) -> Result<Vec<BrokerCredential>> {
        self.get_json("/api/v1/credentials", &[]).await
    }

    /// Store or replace a broker credential.
    pub async fn save_broker_credential(
        &self,
        request: &SaveCredentialRequest,
    ) -> Result<BrokerCredential> {
        tracing::info!("Saving {} credential", request.broker);
        self.post_json("/api/v1/credentials", request).await
    }

    /// Delete a stored broker credential.
    pub async fn delete_broker_credential(&self, credential_id: &str) -> Result<()> {
        tracing::info!("Deleting credential {}", credential_id);
        self.delete(&format!(
            "/api/v1/credentials/{}",
            urlencoding::encode(credential_id)
        ))
        .await
    }

    /// Begin the broker OAuth flow; returns the login URL to open.
    pub async fn oauth_initiate(&self, broker: &str) -> Result<OAuthInitiate> {
        self.post_json(
            &format!("/api/v1/oauth/{}/initiate", urlencoding::encode(broker)),
            &serde_json::json!({}),
        )
        .await
    }

    /// Check whether the broker session is connected.
    pub async fn oauth_status(&self, broker: &str) -> Result<OAuthStatus> {
        self.get_json(
            &format!("/api/v1/oauth/{}/status", urlencoding::encode(broker)),
            &[],
        )
        .await
    }

    /// Refresh the broker session token.
    pub async fn oauth_refresh(&self, broker: &str) -> Result<OAuthStatus> {
        tracing::info!("Refreshing {} session", broker);
        self.post_json(
            &format!("/api/v1/oauth/{}/refresh", urlencoding::encode(broker)),
            &serde_json::json!({}),
        )
        .await
    }
}
