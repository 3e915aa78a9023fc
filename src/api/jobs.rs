//! Backtest job endpoints

use super::client::ApiClient;
use crate::error::Result;
use crate::models::{BacktestRecord, Job, JobStatus};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CreateJobRequest {
    pub strategy_id: String,
    pub symbol: String,
    pub exchange: String,
    pub interval: String,
    pub start_date: String,
    pub end_date: String,
    pub initial_capital: f64,
}

impl ApiClient {
    /// Submit a new backtest job.
    pub async fn create_job(&self, request: &CreateJobRequest) -> Result<Job> {
        tracing::info!("Creating backtest job for strategy {}", request.strategy_id);
        self.post_json("/api/v1/jobs", request).await
    }

    /// Fetch the authoritative state of a job, including its full result
    /// once completed.
    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.get_json(&format!("/api/v1/jobs/{}", urlencoding::encode(job_id)), &[])
            .await
    }

    /// List jobs, optionally filtered by status.
    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let mut query = Vec::new();
        if let Some(status) = status {
            query.push(("status", status.as_str().to_string()));
        }
        self.get_json("/api/v1/jobs", &query).await
    }

    /// Request cancellation of a job. The terminal `cancelled` event still
    /// arrives over the job's stream.
    pub async fn cancel_job(&self, job_id: &str) -> Result<Job> {
        tracing::info!("Cancelling job {}", job_id);
        self.post_json(
            &format!("/api/v1/jobs/{}/cancel", urlencoding::encode(job_id)),
            &serde_json::json!({}),
        )
        .await
    }

    /// List completed backtests for the history screen.
    pub async fn list_backtests(&self, limit: Option<u32>) -> Result<Vec<BacktestRecord>> {
        let mut query = Vec::new();
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        self.get_json("/api/v1/backtests", &query).await
    }
}
