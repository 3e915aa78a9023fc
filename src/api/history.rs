//! Historical data endpoint
//!
//! Used by the completion coordinator and the polling fallback. Streamed
//! interval data goes through `stream`; this is the request/response path.

use super::client::ApiClient;
use crate::error::Result;
use crate::models::Bar;
use serde::Deserialize;

/// Historical OHLCV data for one (resource, interval) pair
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryResponse {
    pub symbol: String,
    pub exchange: String,
    pub interval: String,
    #[serde(default)]
    pub bars: Vec<Bar>,
}

impl ApiClient {
    /// Fetch historical bars for a resource at one interval.
    ///
    /// `limit` bounds the number of bars; `format` selects the payload
    /// encoding when the backend supports more than one.
    pub async fn get_history(
        &self,
        resource_id: &str,
        interval: &str,
        limit: Option<u32>,
        format: Option<&str>,
    ) -> Result<HistoryResponse> {
        let mut query = vec![("interval", interval.to_string())];
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(format) = format {
            query.push(("format", format.to_string()));
        }

        self.get_json(
            &format!("/api/v1/history/{}", urlencoding::encode(resource_id)),
            &query,
        )
        .await
    }
}
