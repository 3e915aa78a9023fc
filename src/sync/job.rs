//! Job progress subscription
//!
//! Mirrors one running backtest job: `Idle -> Connecting -> Streaming ->
//! {Completed | Failed | Cancelled}`. Progress events merge in arrival
//! order; transactions accumulate with composite-key dedup because the
//! stream may redeliver. A terminal `completed` notice is never trusted as
//! final - the coordinator fetches the authoritative result over REST
//! before `completed` is published.

use super::fallback;
use crate::api::ApiClient;
use crate::error::Result;
use crate::models::{Job, JobStatus, Transaction};
use crate::stream::events::ProgressUpdate;
use crate::stream::{Connection, ConnectionEvent, StreamEvent, StreamTarget, TransportKind};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Where the subscription is in the job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

/// Read-only job state exposed to the view layer
#[derive(Debug, Clone)]
pub struct JobProgressView {
    pub job: Option<Job>,
    pub transactions: Vec<Transaction>,
    pub progress: f64,
    pub phase: JobPhase,
    pub loading: bool,
    pub reconnecting: bool,
    pub completed: bool,
    pub error: Option<String>,
}

impl Default for JobProgressView {
    fn default() -> Self {
        Self {
            job: None,
            transactions: Vec::new(),
            progress: 0.0,
            phase: JobPhase::Idle,
            loading: true,
            reconnecting: false,
            completed: false,
            error: None,
        }
    }
}

/// Merge one progress event into the view. Later values overwrite earlier
/// ones; nothing beyond arrival order on a single connection is assumed.
pub(crate) fn apply_progress(view: &mut JobProgressView, job_id: &str, update: ProgressUpdate) {
    let job = view.job.get_or_insert_with(|| Job {
        id: update.job_id.clone().unwrap_or_else(|| job_id.to_string()),
        status: JobStatus::Pending,
        progress: 0.0,
        current_step: None,
        total_steps: None,
        result: None,
        error: None,
        created_at: None,
        updated_at: None,
    });

    if let Some(status) = update.status {
        job.status = status;
    }
    if let Some(progress) = update.progress {
        job.progress = progress;
        view.progress = progress;
    }
    if let Some(step) = update.current_step {
        job.current_step = Some(step);
    }
    if let Some(total) = update.total_steps {
        job.total_steps = Some(total);
    }
    view.loading = false;
    view.reconnecting = false;
}

/// Append a transaction unless its composite key was already seen.
pub(crate) fn push_transaction(
    transactions: &mut Vec<Transaction>,
    seen: &mut HashSet<(String, String, String, u64)>,
    tx: Transaction,
) {
    if seen.insert(tx.dedup_key()) {
        transactions.push(tx);
    }
}

/// Live view of one job's progress stream
pub struct JobProgressSubscription {
    api: Arc<ApiClient>,
    job_id: String,
    conn: Arc<Connection>,
    view_tx: Arc<watch::Sender<JobProgressView>>,
    view_rx: watch::Receiver<JobProgressView>,
    task: JoinHandle<()>,
}

impl JobProgressSubscription {
    /// Subscribe to a job's progress. `transport` selects SSE (primary) or
    /// the legacy WebSocket endpoint; both speak the same events.
    pub fn start(api: Arc<ApiClient>, job_id: &str, transport: TransportKind) -> Result<Self> {
        let path = match transport {
            TransportKind::Sse => format!("/stream/jobs/{}", job_id),
            TransportKind::WebSocket => format!("/ws/jobs/{}", job_id),
        };
        let conn = Arc::new(Connection::new(
            api.config(),
            transport,
            StreamTarget::new(path),
            api.token(),
        )?);

        let (event_tx, event_rx) = mpsc::channel(256);
        conn.connect(event_tx);

        let (view_tx, view_rx) = watch::channel(JobProgressView {
            phase: JobPhase::Connecting,
            ..Default::default()
        });
        let view_tx = Arc::new(view_tx);

        let task = tokio::spawn(run_job_progress(
            api.clone(),
            job_id.to_string(),
            event_rx,
            view_tx.clone(),
            conn.clone(),
        ));

        Ok(Self {
            api,
            job_id: job_id.to_string(),
            conn,
            view_tx,
            view_rx,
            task,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<JobProgressView> {
        self.view_rx.clone()
    }

    pub fn snapshot(&self) -> JobProgressView {
        self.view_rx.borrow().clone()
    }

    /// Re-fetch the job over REST and replace the mirrored state.
    pub async fn refresh(&self) -> Result<()> {
        let job = self.api.get_job(&self.job_id).await?;
        self.view_tx.send_modify(|view| {
            view.progress = job.progress;
            if job.status == JobStatus::Completed {
                view.phase = JobPhase::Completed;
                view.completed = true;
            }
            if let Some(result) = &job.result {
                if !result.transactions.is_empty() {
                    view.transactions = result.transactions.clone();
                }
            }
            view.job = Some(job);
            view.loading = false;
        });
        Ok(())
    }

    /// Tear down the stream. Idempotent.
    pub fn disconnect(&self) {
        self.conn.disconnect();
        self.task.abort();
    }
}

impl Drop for JobProgressSubscription {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run_job_progress(
    api: Arc<ApiClient>,
    job_id: String,
    mut rx: mpsc::Receiver<ConnectionEvent>,
    view_tx: Arc<watch::Sender<JobProgressView>>,
    conn: Arc<Connection>,
) {
    let mut seen = HashSet::new();

    while let Some(event) = rx.recv().await {
        match event {
            ConnectionEvent::Open => {
                view_tx.send_modify(|view| view.reconnecting = false);
            }
            ConnectionEvent::Stream(StreamEvent::Connected(_)) => {
                view_tx.send_modify(|view| view.phase = JobPhase::Streaming);
            }
            ConnectionEvent::Stream(StreamEvent::Progress(update)) => {
                view_tx.send_modify(|view| apply_progress(view, &job_id, update));
            }
            ConnectionEvent::Stream(StreamEvent::Transaction(tx)) => {
                view_tx.send_modify(|view| push_transaction(&mut view.transactions, &mut seen, tx));
            }
            ConnectionEvent::Stream(StreamEvent::Completed(notice)) => {
                // The streamed summary is bounded; fetch the full result
                // before announcing completion.
                conn.mark_stream_complete();
                let result = fallback::resolve_completion(&api, &job_id, notice.result).await;
                view_tx.send_modify(|view| {
                    let job = view.job.get_or_insert_with(|| Job {
                        id: job_id.clone(),
                        status: JobStatus::Completed,
                        progress: 100.0,
                        current_step: None,
                        total_steps: None,
                        result: None,
                        error: None,
                        created_at: None,
                        updated_at: None,
                    });
                    job.status = JobStatus::Completed;
                    job.progress = 100.0;
                    job.result = result.clone();
                    if let Some(result) = &result {
                        if !result.transactions.is_empty() {
                            view.transactions = result.transactions.clone();
                        }
                    }
                    view.progress = 100.0;
                    view.phase = JobPhase::Completed;
                    view.completed = true;
                    view.loading = false;
                });
                conn.disconnect();
                break;
            }
            ConnectionEvent::Stream(StreamEvent::Failed { message }) => {
                conn.mark_stream_complete();
                view_tx.send_modify(|view| {
                    if let Some(job) = view.job.as_mut() {
                        job.status = JobStatus::Failed;
                        job.error = Some(message.clone());
                    }
                    view.phase = JobPhase::Failed;
                    view.error = Some(message);
                    view.loading = false;
                });
                conn.disconnect();
                break;
            }
            ConnectionEvent::Stream(StreamEvent::Cancelled { message }) => {
                conn.mark_stream_complete();
                view_tx.send_modify(|view| {
                    if let Some(job) = view.job.as_mut() {
                        job.status = JobStatus::Cancelled;
                    }
                    view.phase = JobPhase::Cancelled;
                    view.error = message;
                    view.loading = false;
                });
                conn.disconnect();
                break;
            }
            ConnectionEvent::Stream(StreamEvent::ParseError { event, message }) => {
                view_tx.send_modify(|view| {
                    view.error = Some(format!("bad {} payload: {}", event, message))
                });
            }
            ConnectionEvent::Stream(StreamEvent::ServerError(payload)) => {
                let fatal = payload.is_auth();
                view_tx.send_modify(|view| {
                    view.error = Some(payload.message.clone());
                    if fatal {
                        view.loading = false;
                    }
                });
                if fatal {
                    conn.disconnect();
                    break;
                }
            }
            ConnectionEvent::Stream(other) => {
                tracing::debug!("Unexpected event on job stream: {:?}", other);
            }
            ConnectionEvent::Reconnecting { .. } => {
                view_tx.send_modify(|view| view.reconnecting = true);
            }
            ConnectionEvent::AuthFailure { message } => {
                view_tx.send_modify(|view| {
                    view.error = Some(message);
                    view.loading = false;
                });
                break;
            }
            ConnectionEvent::Lost { reason } => {
                view_tx.send_modify(|view| {
                    view.error = Some(reason.unwrap_or_else(|| "connection lost".to_string()));
                    view.loading = false;
                });
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BacktestResult;
    use crate::sync::fallback::reconcile;

    fn progress(value: f64, status: Option<JobStatus>) -> ProgressUpdate {
        ProgressUpdate {
            job_id: Some("j1".to_string()),
            status,
            progress: Some(value),
            current_step: None,
            total_steps: None,
            message: None,
        }
    }

    fn transaction(id: &str) -> Transaction {
        Transaction {
            trade_id: id.to_string(),
            date: "2024-03-01".to_string(),
            kind: "BUY".to_string(),
            quantity: 1.0,
            price: 100.0,
            pnl: None,
        }
    }

    #[test]
    fn test_later_progress_overwrites_earlier() {
        let mut view = JobProgressView::default();
        apply_progress(&mut view, "j1", progress(20.0, Some(JobStatus::Running)));
        apply_progress(&mut view, "j1", progress(55.0, None));

        assert_eq!(view.progress, 55.0);
        let job = view.job.as_ref().unwrap();
        assert_eq!(job.progress, 55.0);
        // status survives an update that omits it
        assert_eq!(job.status, JobStatus::Running);
        assert!(!view.loading);
    }

    #[test]
    fn test_transaction_redelivery_deduped() {
        let mut transactions = Vec::new();
        let mut seen = HashSet::new();
        push_transaction(&mut transactions, &mut seen, transaction("t1"));
        push_transaction(&mut transactions, &mut seen, transaction("t2"));
        push_transaction(&mut transactions, &mut seen, transaction("t1"));
        assert_eq!(transactions.len(), 2);
    }

    #[test]
    fn test_job_lifecycle_to_completion() {
        // progress 20 -> 55, then a completed notice with a summary of 3
        // trades; the REST fetch supplies the full transaction list.
        let mut view = JobProgressView::default();
        apply_progress(&mut view, "j1", progress(20.0, Some(JobStatus::Running)));
        apply_progress(&mut view, "j1", progress(55.0, None));

        let summary = BacktestResult {
            total_trades: 3,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            net_pnl: 0.0,
            max_drawdown: 0.0,
            transactions: vec![],
        };
        let full = BacktestResult {
            transactions: vec![transaction("t1"), transaction("t2"), transaction("t3")],
            ..summary.clone()
        };
        let fetched = Ok(Job {
            id: "j1".to_string(),
            status: JobStatus::Completed,
            progress: 100.0,
            current_step: None,
            total_steps: None,
            result: Some(full),
            error: None,
            created_at: None,
            updated_at: None,
        });

        let result = reconcile(Some(summary), fetched).unwrap();
        assert_eq!(result.total_trades, 3);
        assert_eq!(result.transactions.len(), 3);
    }
}
