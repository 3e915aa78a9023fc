//! Interval data subscription
//!
//! Streams historical bars for one resource across several intervals at
//! once: one independent connection per interval, all opened concurrently.
//! Accumulation is idempotent (bars already present by timestamp are
//! dropped) and intervals are isolated - an error on one never halts a
//! sibling. Only on a subscription with exactly one interval does a
//! connection error surface as the subscription-level error.
//!
//! While the owning job is still running the backend cannot serve live
//! multi-interval streams, so `start_polling` runs the REST fallback
//! instead: same view, fed by a fixed-timer poller.

use super::fallback;
use crate::api::ApiClient;
use crate::error::Result;
use crate::models::{Bar, IntervalMeta, IntervalState};
use crate::stream::{Connection, ConnectionEvent, StreamEvent, StreamTarget, TransportKind};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Normalized, order-independent subscription identity. Re-renders of the
/// owning view compare keys; an unchanged key must not tear down live
/// connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionKey {
    resource_id: String,
    intervals: Vec<String>,
}

impl SubscriptionKey {
    pub fn new(resource_id: &str, intervals: &[String]) -> Self {
        let mut intervals = intervals.to_vec();
        intervals.sort();
        intervals.dedup();
        Self {
            resource_id: resource_id.to_string(),
            intervals,
        }
    }

    pub fn intervals(&self) -> &[String] {
        &self.intervals
    }
}

/// Append bars whose timestamps are not already present. Delivering the
/// same chunk twice leaves the accumulated set unchanged.
pub(crate) fn append_bars(existing: &mut Vec<Bar>, incoming: impl IntoIterator<Item = Bar>) {
    let mut seen: HashSet<String> = existing.iter().map(|b| b.timestamp.clone()).collect();
    for bar in incoming {
        if seen.insert(bar.timestamp.clone()) {
            existing.push(bar);
        }
    }
}

/// Read-only multi-interval state exposed to the view layer
#[derive(Debug, Clone, Default)]
pub struct IntervalDataView {
    pub intervals: HashMap<String, IntervalState>,
    /// OR of every per-interval loading flag
    pub loading: bool,
    /// Subscription-level error; per-interval errors stay inside their state
    pub error: Option<String>,
}

/// Live (or polled) historical data across one or more intervals
pub struct IntervalDataSubscription {
    api: Arc<ApiClient>,
    key: SubscriptionKey,
    limit: Option<u32>,
    chunk_size: Option<u32>,
    states: Arc<DashMap<String, IntervalState>>,
    conns: Vec<Arc<Connection>>,
    tasks: Vec<JoinHandle<()>>,
    view_tx: Arc<watch::Sender<IntervalDataView>>,
    view_rx: watch::Receiver<IntervalDataView>,
}

impl IntervalDataSubscription {
    /// Open one SSE connection per interval, all concurrently.
    pub fn start(
        api: Arc<ApiClient>,
        resource_id: &str,
        intervals: &[String],
        limit: Option<u32>,
        chunk_size: Option<u32>,
    ) -> Result<Self> {
        let key = SubscriptionKey::new(resource_id, intervals);
        let (view_tx, view_rx) = watch::channel(IntervalDataView::default());

        let mut subscription = Self {
            api,
            key,
            limit,
            chunk_size,
            states: Arc::new(DashMap::new()),
            conns: Vec::new(),
            tasks: Vec::new(),
            view_tx: Arc::new(view_tx),
            view_rx,
        };
        subscription.open_streams()?;
        Ok(subscription)
    }

    /// Run the REST polling fallback instead of live streams, for jobs the
    /// backend cannot stream intervals for while they are still running.
    pub fn start_polling(
        api: Arc<ApiClient>,
        job_id: &str,
        resource_id: &str,
        intervals: &[String],
        limit: Option<u32>,
    ) -> Result<Self> {
        let key = SubscriptionKey::new(resource_id, intervals);
        let (view_tx, view_rx) = watch::channel(IntervalDataView::default());
        let view_tx = Arc::new(view_tx);

        let states: Arc<DashMap<String, IntervalState>> = Arc::new(DashMap::new());
        for interval in key.intervals() {
            states.insert(
                interval.clone(),
                IntervalState {
                    loading: true,
                    ..Default::default()
                },
            );
        }
        publish(&states, &view_tx);

        let task = tokio::spawn(fallback::poll_intervals(
            api.clone(),
            job_id.to_string(),
            resource_id.to_string(),
            key.intervals().to_vec(),
            limit,
            states.clone(),
            {
                let states = states.clone();
                let view_tx = view_tx.clone();
                move || publish(&states, &view_tx)
            },
        ));

        Ok(Self {
            api,
            key,
            limit,
            chunk_size: None,
            states,
            conns: Vec::new(),
            tasks: vec![task],
            view_tx,
            view_rx,
        })
    }

    fn open_streams(&mut self) -> Result<()> {
        let single = self.key.intervals().len() == 1;

        for interval in self.key.intervals().to_vec() {
            self.states.insert(
                interval.clone(),
                IntervalState {
                    loading: true,
                    ..Default::default()
                },
            );

            let mut target =
                StreamTarget::new(format!("/stream/history/{}", self.key.resource_id))
                    .with_param("interval", &interval);
            if let Some(limit) = self.limit {
                target = target.with_param("limit", limit.to_string());
            }
            if let Some(chunk_size) = self.chunk_size {
                target = target.with_param("chunk_size", chunk_size.to_string());
            }

            let conn = Arc::new(Connection::new(
                self.api.config(),
                TransportKind::Sse,
                target,
                self.api.token(),
            )?);
            let (event_tx, event_rx) = mpsc::channel(256);
            conn.connect(event_tx);

            self.tasks.push(tokio::spawn(run_interval(
                interval,
                single,
                event_rx,
                self.states.clone(),
                self.view_tx.clone(),
                conn.clone(),
            )));
            self.conns.push(conn);
        }

        publish(&self.states, &self.view_tx);
        Ok(())
    }

    /// The normalized identity of this subscription.
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Whether `resource_id` + `intervals` describe this same subscription,
    /// regardless of interval order or duplicates.
    pub fn matches(&self, resource_id: &str, intervals: &[String]) -> bool {
        self.key == SubscriptionKey::new(resource_id, intervals)
    }

    /// Adopt a new configuration. Unchanged keys are a no-op (live
    /// connections stay up); a changed key tears everything down and
    /// reconnects. Returns whether a reconnect happened.
    pub fn reconfigure(&mut self, resource_id: &str, intervals: &[String]) -> Result<bool> {
        if self.matches(resource_id, intervals) {
            return Ok(false);
        }

        self.disconnect();
        self.key = SubscriptionKey::new(resource_id, intervals);
        // Fresh map: late commits from the torn-down tasks land on the
        // orphaned one and are benign no-ops.
        self.states = Arc::new(DashMap::new());
        self.conns.clear();
        self.tasks.clear();
        self.view_tx.send_replace(IntervalDataView::default());
        self.open_streams()?;
        Ok(true)
    }

    pub fn subscribe(&self) -> watch::Receiver<IntervalDataView> {
        self.view_rx.clone()
    }

    pub fn snapshot(&self) -> IntervalDataView {
        self.view_rx.borrow().clone()
    }

    /// One-shot REST refresh of every interval, replacing each bar list.
    pub async fn refresh(&self) -> Result<()> {
        for interval in self.key.intervals() {
            let response = self
                .api
                .get_history(&self.key.resource_id, interval, self.limit, None)
                .await?;
            if let Some(mut state) = self.states.get_mut(interval) {
                state.bars = response.bars;
                state.loading = false;
                state.error = None;
                state.meta = Some(IntervalMeta {
                    symbol: response.symbol,
                    exchange: response.exchange,
                    total_points: None,
                });
            }
        }
        publish(&self.states, &self.view_tx);
        Ok(())
    }

    /// Tear down every owned connection and task. Idempotent.
    pub fn disconnect(&self) {
        for conn in &self.conns {
            conn.disconnect();
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for IntervalDataSubscription {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn publish(states: &DashMap<String, IntervalState>, view_tx: &watch::Sender<IntervalDataView>) {
    let intervals: HashMap<String, IntervalState> = states
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();
    let loading = intervals.values().any(|state| state.loading);
    view_tx.send_modify(|view| {
        view.intervals = intervals;
        view.loading = loading;
    });
}

async fn run_interval(
    interval: String,
    single: bool,
    mut rx: mpsc::Receiver<ConnectionEvent>,
    states: Arc<DashMap<String, IntervalState>>,
    view_tx: Arc<watch::Sender<IntervalDataView>>,
    conn: Arc<Connection>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            ConnectionEvent::Open => {}
            ConnectionEvent::Stream(StreamEvent::IntervalStart(start)) => {
                if let Some(mut state) = states.get_mut(&interval) {
                    state.meta = Some(IntervalMeta {
                        symbol: start.symbol.unwrap_or_default(),
                        exchange: start.exchange.unwrap_or_default(),
                        total_points: start.total_points,
                    });
                    state.loading = true;
                }
                publish(&states, &view_tx);
            }
            ConnectionEvent::Stream(StreamEvent::DataChunk(chunk)) => {
                // Chunks on a per-interval connection either name our
                // interval or omit it.
                if chunk.interval.as_deref().is_some_and(|i| i != interval) {
                    tracing::debug!(
                        "Chunk for {} arrived on the {} stream, dropping",
                        chunk.interval.as_deref().unwrap_or(""),
                        interval
                    );
                    continue;
                }
                if let Some(mut state) = states.get_mut(&interval) {
                    append_bars(&mut state.bars, chunk.bars);
                    if let Some(progress) = chunk.progress {
                        state.progress = progress;
                    }
                }
                publish(&states, &view_tx);
            }
            ConnectionEvent::Stream(
                StreamEvent::Complete { .. }
                | StreamEvent::IntervalComplete { .. }
                | StreamEvent::AllComplete,
            ) => {
                if let Some(mut state) = states.get_mut(&interval) {
                    state.loading = false;
                    state.complete = true;
                    state.progress = 100.0;
                }
                publish(&states, &view_tx);
                conn.disconnect();
                break;
            }
            ConnectionEvent::Stream(StreamEvent::ServerError(payload)) => {
                // Isolation: the error stays inside this interval unless
                // this is a single-interval subscription.
                if let Some(mut state) = states.get_mut(&interval) {
                    state.error = Some(payload.message.clone());
                    state.loading = false;
                }
                if single {
                    view_tx.send_modify(|view| view.error = Some(payload.message.clone()));
                }
                publish(&states, &view_tx);
                if payload.is_auth() {
                    conn.disconnect();
                    break;
                }
            }
            ConnectionEvent::Stream(StreamEvent::ParseError { event, message }) => {
                if let Some(mut state) = states.get_mut(&interval) {
                    state.error = Some(format!("bad {} payload: {}", event, message));
                }
                publish(&states, &view_tx);
            }
            ConnectionEvent::Stream(_) => {}
            ConnectionEvent::Reconnecting { .. } => {}
            ConnectionEvent::AuthFailure { message } | ConnectionEvent::Lost { reason: Some(message) } => {
                if let Some(mut state) = states.get_mut(&interval) {
                    state.error = Some(message.clone());
                    state.loading = false;
                }
                if single {
                    view_tx.send_modify(|view| view.error = Some(message));
                }
                publish(&states, &view_tx);
                break;
            }
            ConnectionEvent::Lost { reason: None } => {
                if let Some(mut state) = states.get_mut(&interval) {
                    state.error = Some("connection lost".to_string());
                    state.loading = false;
                }
                if single {
                    view_tx.send_modify(|view| view.error = Some("connection lost".to_string()));
                }
                publish(&states, &view_tx);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(timestamp: &str) -> Bar {
        Bar {
            timestamp: timestamp.to_string(),
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 100,
        }
    }

    #[test]
    fn test_dedup_preserves_arrival_order() {
        let mut bars = Vec::new();
        append_bars(&mut bars, vec![bar("t1"), bar("t2")]);
        append_bars(&mut bars, vec![bar("t2"), bar("t3")]);

        let timestamps: Vec<&str> = bars.iter().map(|b| b.timestamp.as_str()).collect();
        assert_eq!(timestamps, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let chunk = vec![bar("t1"), bar("t2")];

        let mut once = Vec::new();
        append_bars(&mut once, chunk.clone());

        let mut twice = Vec::new();
        append_bars(&mut twice, chunk.clone());
        append_bars(&mut twice, chunk);

        let ts = |bars: &Vec<Bar>| bars.iter().map(|b| b.timestamp.clone()).collect::<Vec<_>>();
        assert_eq!(ts(&once), ts(&twice));
    }

    #[test]
    fn test_dedup_within_one_chunk() {
        let mut bars = Vec::new();
        append_bars(&mut bars, vec![bar("t1"), bar("t1"), bar("t2")]);
        assert_eq!(bars.len(), 2);
    }

    #[test]
    fn test_key_is_order_independent() {
        let a = SubscriptionKey::new("r1", &["1d".to_string(), "5m".to_string()]);
        let b = SubscriptionKey::new("r1", &["5m".to_string(), "1d".to_string()]);
        assert_eq!(a, b);

        let c = SubscriptionKey::new("r1", &["5m".to_string()]);
        assert_ne!(a, c);
        let d = SubscriptionKey::new("r2", &["1d".to_string(), "5m".to_string()]);
        assert_ne!(a, d);
    }

    #[test]
    fn test_key_dedupes_intervals() {
        let a = SubscriptionKey::new("r1", &["1d".to_string(), "1d".to_string()]);
        assert_eq!(a.intervals(), &["1d".to_string()]);
    }

    #[test]
    fn test_error_isolation_between_intervals() {
        // An error scoped to one interval must not touch its sibling or
        // the subscription-level error.
        let states: DashMap<String, IntervalState> = DashMap::new();
        states.insert(
            "1d".to_string(),
            IntervalState {
                loading: true,
                ..Default::default()
            },
        );
        states.insert(
            "5m".to_string(),
            IntervalState {
                loading: true,
                ..Default::default()
            },
        );

        if let Some(mut state) = states.get_mut("1d") {
            state.error = Some("unsupported interval".to_string());
            state.loading = false;
        }
        append_bars(&mut states.get_mut("5m").unwrap().bars, vec![bar("t1")]);

        let (view_tx, view_rx) = watch::channel(IntervalDataView::default());
        publish(&states, &view_tx);

        let view = view_rx.borrow();
        assert!(view.error.is_none());
        assert!(view.intervals["1d"].error.is_some());
        assert_eq!(view.intervals["5m"].bars.len(), 1);
        // sibling still loading, so the subscription still reports loading
        assert!(view.loading);
    }
}
