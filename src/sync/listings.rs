//! Listing subscriptions
//!
//! Job listings and backtest-history listings share one state-machine
//! shape: an ordered collection keyed by a stable id, mutated only by the
//! pure `apply` reducer. `snapshot` replaces the whole collection,
//! `*_added` prepends, `*_updated` replaces by key, `*_removed` filters
//! out. Replaying the same event log from any valid snapshot yields the
//! same final state.

use crate::api::ApiClient;
use crate::error::Result;
use crate::models::{BacktestRecord, Job, JobStatus, Strategy};
use crate::stream::{Connection, ConnectionEvent, StreamEvent, StreamTarget, TransportKind};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Collection elements addressable by a stable id
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for Job {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for BacktestRecord {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for Strategy {
    fn key(&self) -> &str {
        &self.id
    }
}

/// One mutation of a keyed listing
#[derive(Debug, Clone)]
pub enum ListingEvent<T> {
    Snapshot(Vec<T>),
    Added(T),
    Updated(T),
    Removed(String),
}

/// Apply one event to a collection. Pure: the result depends only on the
/// event and the previous collection.
pub fn apply<T: Keyed>(items: &mut Vec<T>, event: ListingEvent<T>) {
    match event {
        ListingEvent::Snapshot(new) => *items = new,
        ListingEvent::Added(item) => items.insert(0, item),
        ListingEvent::Updated(item) => {
            if let Some(slot) = items.iter_mut().find(|i| i.key() == item.key()) {
                *slot = item;
            }
        }
        ListingEvent::Removed(id) => items.retain(|i| i.key() != id),
    }
}

/// Read-only listing state exposed to the view layer
#[derive(Debug, Clone)]
pub struct ListingView<T> {
    pub items: Vec<T>,
    pub loading: bool,
    pub reconnecting: bool,
    pub error: Option<String>,
}

impl<T> Default for ListingView<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: true,
            reconnecting: false,
            error: None,
        }
    }
}

fn decode_snapshot<T: serde::de::DeserializeOwned>(values: Vec<serde_json::Value>) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!("Skipping undecodable snapshot item: {}", e);
                None
            }
        })
        .collect()
}

/// Live view of the job listing
pub struct JobListingSubscription {
    api: Arc<ApiClient>,
    conn: Arc<Connection>,
    status_filter: Option<JobStatus>,
    view_tx: Arc<watch::Sender<ListingView<Job>>>,
    view_rx: watch::Receiver<ListingView<Job>>,
    task: JoinHandle<()>,
}

impl JobListingSubscription {
    /// Subscribe to the job listing stream, optionally filtered by status.
    pub fn start(api: Arc<ApiClient>, status_filter: Option<JobStatus>) -> Result<Self> {
        let mut target = StreamTarget::new("/stream/jobs");
        if let Some(status) = status_filter {
            target = target.with_param("status", status.as_str());
        }
        let conn = Arc::new(Connection::new(
            api.config(),
            TransportKind::Sse,
            target,
            api.token(),
        )?);

        let (event_tx, event_rx) = mpsc::channel(256);
        conn.connect(event_tx);

        let (view_tx, view_rx) = watch::channel(ListingView::default());
        let view_tx = Arc::new(view_tx);
        let task = tokio::spawn(run_job_listing(event_rx, view_tx.clone(), conn.clone()));

        Ok(Self {
            api,
            conn,
            status_filter,
            view_tx,
            view_rx,
            task,
        })
    }

    /// Watch for state changes.
    pub fn subscribe(&self) -> watch::Receiver<ListingView<Job>> {
        self.view_rx.clone()
    }

    /// Current state.
    pub fn snapshot(&self) -> ListingView<Job> {
        self.view_rx.borrow().clone()
    }

    /// Re-fetch the listing over REST, replacing the collection.
    pub async fn refresh(&self) -> Result<()> {
        let jobs = self.api.list_jobs(self.status_filter).await?;
        self.view_tx.send_modify(|view| {
            view.items = jobs;
            view.loading = false;
            view.error = None;
        });
        Ok(())
    }

    /// Tear down the stream. Idempotent.
    pub fn disconnect(&self) {
        self.conn.disconnect();
        self.task.abort();
    }
}

impl Drop for JobListingSubscription {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run_job_listing(
    mut rx: mpsc::Receiver<ConnectionEvent>,
    view_tx: Arc<watch::Sender<ListingView<Job>>>,
    conn: Arc<Connection>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            ConnectionEvent::Open => {
                view_tx.send_modify(|view| view.reconnecting = false);
            }
            ConnectionEvent::Stream(stream_event) => {
                let listing_event = match stream_event {
                    StreamEvent::Snapshot(values) => {
                        Some(ListingEvent::Snapshot(decode_snapshot::<Job>(values)))
                    }
                    StreamEvent::JobAdded(job) => Some(ListingEvent::Added(job)),
                    StreamEvent::JobUpdated(job) => Some(ListingEvent::Updated(job)),
                    StreamEvent::JobRemoved { id } => Some(ListingEvent::Removed(id)),
                    StreamEvent::Connected(_) => None,
                    StreamEvent::ParseError { event, message } => {
                        view_tx.send_modify(|view| {
                            view.error = Some(format!("bad {} payload: {}", event, message))
                        });
                        None
                    }
                    StreamEvent::ServerError(payload) => {
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
                        None
                    }
                    other => {
                        tracing::debug!("Unexpected event on job listing: {:?}", other);
                        None
                    }
                };
                if let Some(listing_event) = listing_event {
                    view_tx.send_modify(|view| {
                        apply(&mut view.items, listing_event);
                        view.loading = false;
                        view.reconnecting = false;
                    });
                }
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

/// Live view of the backtest history listing
pub struct BacktestHistorySubscription {
    api: Arc<ApiClient>,
    conn: Arc<Connection>,
    limit: Option<u32>,
    view_tx: Arc<watch::Sender<ListingView<BacktestRecord>>>,
    view_rx: watch::Receiver<ListingView<BacktestRecord>>,
    task: JoinHandle<()>,
}

impl BacktestHistorySubscription {
    /// Subscribe to the backtest history stream.
    pub fn start(api: Arc<ApiClient>, limit: Option<u32>) -> Result<Self> {
        let mut target = StreamTarget::new("/stream/backtests");
        if let Some(limit) = limit {
            target = target.with_param("limit", limit.to_string());
        }
        let conn = Arc::new(Connection::new(
            api.config(),
            TransportKind::Sse,
            target,
            api.token(),
        )?);

        let (event_tx, event_rx) = mpsc::channel(256);
        conn.connect(event_tx);

        let (view_tx, view_rx) = watch::channel(ListingView::default());
        let view_tx = Arc::new(view_tx);
        let task = tokio::spawn(run_backtest_listing(event_rx, view_tx.clone(), conn.clone()));

        Ok(Self {
            api,
            conn,
            limit,
            view_tx,
            view_rx,
            task,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ListingView<BacktestRecord>> {
        self.view_rx.clone()
    }

    pub fn snapshot(&self) -> ListingView<BacktestRecord> {
        self.view_rx.borrow().clone()
    }

    /// Re-fetch the history over REST, replacing the collection.
    pub async fn refresh(&self) -> Result<()> {
        let records = self.api.list_backtests(self.limit).await?;
        self.view_tx.send_modify(|view| {
            view.items = records;
            view.loading = false;
            view.error = None;
        });
        Ok(())
    }

    pub fn disconnect(&self) {
        self.conn.disconnect();
        self.task.abort();
    }
}

impl Drop for BacktestHistorySubscription {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run_backtest_listing(
    mut rx: mpsc::Receiver<ConnectionEvent>,
    view_tx: Arc<watch::Sender<ListingView<BacktestRecord>>>,
    conn: Arc<Connection>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            ConnectionEvent::Open => {
                view_tx.send_modify(|view| view.reconnecting = false);
            }
            ConnectionEvent::Stream(stream_event) => {
                let listing_event = match stream_event {
                    StreamEvent::Snapshot(values) => Some(ListingEvent::Snapshot(
                        decode_snapshot::<BacktestRecord>(values),
                    )),
                    StreamEvent::BacktestAdded(record) => Some(ListingEvent::Added(record)),
                    StreamEvent::BacktestUpdated(record) => Some(ListingEvent::Updated(record)),
                    StreamEvent::Connected(_) => None,
                    StreamEvent::ParseError { event, message } => {
                        view_tx.send_modify(|view| {
                            view.error = Some(format!("bad {} payload: {}", event, message))
                        });
                        None
                    }
                    StreamEvent::ServerError(payload) => {
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
                        None
                    }
                    other => {
                        tracing::debug!("Unexpected event on backtest listing: {:?}", other);
                        None
                    }
                };
                if let Some(listing_event) = listing_event {
                    view_tx.send_modify(|view| {
                        apply(&mut view.items, listing_event);
                        view.loading = false;
                        view.reconnecting = false;
                    });
                }
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
    use crate::models::JobStatus;

    fn job(id: &str, progress: f64) -> Job {
        Job {
            id: id.to_string(),
            status: JobStatus::Running,
            progress,
            current_step: None,
            total_steps: None,
            result: None,
            error: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_snapshot_replaces() {
        let mut items = vec![job("a", 1.0)];
        apply(&mut items, ListingEvent::Snapshot(vec![job("b", 2.0), job("c", 3.0)]));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "b");
    }

    #[test]
    fn test_added_prepends() {
        let mut items = vec![job("a", 1.0)];
        apply(&mut items, ListingEvent::Added(job("b", 2.0)));
        assert_eq!(items[0].id, "b");
        assert_eq!(items[1].id, "a");
    }

    #[test]
    fn test_updated_replaces_by_key() {
        let mut items = vec![job("a", 1.0), job("b", 2.0)];
        apply(&mut items, ListingEvent::Updated(job("b", 55.0)));
        assert_eq!(items[1].progress, 55.0);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_updated_absent_key_is_noop() {
        let mut items = vec![job("a", 1.0)];
        apply(&mut items, ListingEvent::Updated(job("zzz", 9.0)));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "a");
    }

    #[test]
    fn test_removed_filters_out() {
        let mut items = vec![job("a", 1.0), job("b", 2.0)];
        apply(&mut items, ListingEvent::Removed("a".to_string()));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "b");

        // removing an absent key is a no-op
        apply(&mut items, ListingEvent::Removed("ghost".to_string()));
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_replay_from_snapshot_matches_replay_from_empty() {
        // The same event log applied from an empty collection and from a
        // snapshot-initialized collection must agree.
        let log = || {
            vec![
                ListingEvent::Snapshot(vec![job("a", 1.0), job("b", 2.0)]),
                ListingEvent::Added(job("c", 3.0)),
                ListingEvent::Updated(job("a", 50.0)),
                ListingEvent::Removed("b".to_string()),
            ]
        };

        let mut from_empty: Vec<Job> = Vec::new();
        for event in log() {
            apply(&mut from_empty, event);
        }

        let mut from_snapshot = vec![job("x", 0.0), job("y", 0.0)];
        for event in log() {
            apply(&mut from_snapshot, event);
        }

        let ids = |items: &Vec<Job>| items.iter().map(|j| j.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&from_empty), ids(&from_snapshot));
        assert_eq!(ids(&from_empty), vec!["c", "a"]);
        assert_eq!(from_empty[1].progress, 50.0);
    }

    #[test]
    fn test_decode_snapshot_skips_bad_items() {
        let values = vec![
            serde_json::json!({"id": "a", "status": "running"}),
            serde_json::json!({"status": 42}),
        ];
        let jobs: Vec<Job> = decode_snapshot(values);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "a");
    }
}
