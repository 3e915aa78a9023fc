//! Completion and polling fallbacks
//!
//! Streamed completion notices carry a summary truncated to bound message
//! size; the authoritative result always comes from one REST fetch. If
//! that fetch fails the summary stands - the view degrades, it never
//! becomes unrecoverable.
//!
//! The poller covers the one case where live multi-interval streaming is
//! unsupported server-side while a job still runs: one REST request per
//! interval on a fixed timer, each successful poll replacing that
//! interval's bars, until the job leaves the active statuses.

use crate::api::ApiClient;
use crate::error::Result;
use crate::models::{BacktestResult, IntervalMeta, IntervalState, Job, JobStatus};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Choose the final result for a completed job: the REST payload when it is
/// authoritative, the streamed summary otherwise.
pub fn reconcile(summary: Option<BacktestResult>, fetched: Result<Job>) -> Option<BacktestResult> {
    match fetched {
        Ok(job) if job.status == JobStatus::Completed && job.result.is_some() => job.result,
        Ok(job) => {
            warn!(
                "Job fetch returned {} without a result, keeping streamed summary",
                job.status.as_str()
            );
            summary
        }
        Err(e) => {
            warn!("Result fetch failed ({}), keeping streamed summary", e);
            summary
        }
    }
}

/// Fetch the full job and reconcile against the streamed summary.
pub async fn resolve_completion(
    api: &ApiClient,
    job_id: &str,
    summary: Option<BacktestResult>,
) -> Option<BacktestResult> {
    reconcile(summary, api.get_job(job_id).await)
}

/// Poll every interval over REST until the job leaves the active set.
/// Each successful poll replaces that interval's bars wholesale; failures
/// (large-dataset timeouts are expected for running jobs) leave the
/// previous bars in place and retry on the next tick.
pub(crate) async fn poll_intervals<F>(
    api: Arc<ApiClient>,
    job_id: String,
    resource_id: String,
    intervals: Vec<String>,
    limit: Option<u32>,
    states: Arc<DashMap<String, IntervalState>>,
    publish: F,
) where
    F: Fn() + Send + 'static,
{
    let poll_interval = api.config().poll_interval;

    loop {
        for interval in &intervals {
            match api.get_history(&resource_id, interval, limit, None).await {
                Ok(response) => {
                    if let Some(mut state) = states.get_mut(interval) {
                        state.bars = response.bars;
                        state.loading = false;
                        state.error = None;
                        state.meta = Some(IntervalMeta {
                            symbol: response.symbol,
                            exchange: response.exchange,
                            total_points: None,
                        });
                    }
                    publish();
                }
                Err(e) => {
                    warn!("Poll for interval {} failed: {}", interval, e);
                }
            }
        }

        match api.get_job(&job_id).await {
            Ok(job) if !job.status.is_active() => {
                info!(
                    "Job {} is {}, stopping interval polling",
                    job_id,
                    job.status.as_str()
                );
                for mut state in states.iter_mut() {
                    state.loading = false;
                    state.complete = true;
                }
                publish();
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Job status poll failed: {}", e);
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn completed_job(result: Option<BacktestResult>) -> Job {
        Job {
            id: "j1".to_string(),
            status: JobStatus::Completed,
            progress: 100.0,
            current_step: None,
            total_steps: None,
            result,
            error: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn result(total_trades: u64, transactions: usize) -> BacktestResult {
        BacktestResult {
            total_trades,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            net_pnl: 0.0,
            max_drawdown: 0.0,
            transactions: (0..transactions)
                .map(|i| crate::models::Transaction {
                    trade_id: format!("t{}", i),
                    date: "2024-03-01".to_string(),
                    kind: "BUY".to_string(),
                    quantity: 1.0,
                    price: 100.0,
                    pnl: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_rest_result_supersedes_summary() {
        let summary = Some(result(3, 0));
        let fetched = Ok(completed_job(Some(result(3, 3))));
        let final_result = reconcile(summary, fetched).unwrap();
        assert_eq!(final_result.total_trades, 3);
        assert_eq!(final_result.transactions.len(), 3);
    }

    #[test]
    fn test_fetch_failure_degrades_to_summary() {
        let summary = Some(result(3, 0));
        let fetched = Err(AppError::Internal("timeout".to_string()));
        let final_result = reconcile(summary, fetched).unwrap();
        assert_eq!(final_result.total_trades, 3);
        assert!(final_result.transactions.is_empty());
    }

    #[test]
    fn test_incomplete_fetch_degrades_to_summary() {
        // The backend may still be persisting the result when the stream
        // announces completion.
        let summary = Some(result(3, 0));
        let mut job = completed_job(None);
        job.status = JobStatus::Running;
        let final_result = reconcile(summary, Ok(job)).unwrap();
        assert_eq!(final_result.total_trades, 3);
    }

    #[test]
    fn test_completed_fetch_without_result_degrades_to_summary() {
        let summary = Some(result(2, 0));
        let final_result = reconcile(summary, Ok(completed_job(None))).unwrap();
        assert_eq!(final_result.total_trades, 2);
    }

    #[test]
    fn test_no_summary_and_failed_fetch_yields_none() {
        assert!(reconcile(None, Err(AppError::Internal("x".to_string()))).is_none());
    }
}
