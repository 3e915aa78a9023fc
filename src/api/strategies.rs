//! Strategy editing endpoints

use super::client::ApiClient;
use crate::error::Result;
use crate::models::Strategy;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CreateStrategyRequest {
    pub name: String,
    pub code: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateStrategyRequest {
    pub name: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
}

impl ApiClient {
    /// List the user's strategies.
    pub async fn list_strategies(&self) -> Result<Vec<Strategy>> {
        self.get_json("/api/v1/strategies", &[]).await
    }

    /// Create a new strategy.
    pub async fn create_strategy(&self, request: &CreateStrategyRequest) -> Result<Strategy> {
        tracing::info!("Creating strategy: {}", request.name);
        self.post_json("/api/v1/strategies", request).await
    }

    /// Update an existing strategy.
    pub async fn update_strategy(
        &self,
        strategy_id: &str,
        request: &UpdateStrategyRequest,
    ) -> Result<Strategy> {
        tracing::info!("Updating strategy: {}", strategy_id);
        self.put_json(
            &format!("/api/v1/strategies/{}", urlencoding::encode(strategy_id)),
            request,
        )
        .await
    }

    /// Delete a strategy.
    pub async fn delete_strategy(&self, strategy_id: &str) -> Result<()> {
        tracing::info!("Deleting strategy: {}", strategy_id);
        self.delete(&format!(
            "/api/v1/strategies/{}",
            urlencoding::encode(strategy_id)
        ))
        .await
    }
}
