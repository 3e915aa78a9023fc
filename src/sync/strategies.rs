//! Strategy status subscription
//!
//! Mirrors the set of deployed strategies: `strategies_snapshot` replaces
//! it, status and performance updates patch the matching entry by id and
//! are no-ops for unknown ids.

use super::listings::Keyed;
use crate::api::ApiClient;
use crate::error::Result;
use crate::models::{Strategy, StrategyPerformance};
use crate::stream::{Connection, ConnectionEvent, StreamEvent, StreamTarget, TransportKind};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// One mutation of the strategy set
#[derive(Debug, Clone)]
pub enum StrategyEvent {
    Snapshot(Vec<Strategy>),
    StatusUpdate { id: String, status: String },
    PerformanceUpdate { id: String, performance: StrategyPerformance },
}

/// Apply one event. Pure: depends only on the event and the previous set.
pub fn apply_strategy_event(strategies: &mut Vec<Strategy>, event: StrategyEvent) {
    match event {
        StrategyEvent::Snapshot(new) => *strategies = new,
        StrategyEvent::StatusUpdate { id, status } => {
            if let Some(strategy) = strategies.iter_mut().find(|s| s.key() == id) {
                strategy.status = status;
            }
        }
        StrategyEvent::PerformanceUpdate { id, performance } => {
            if let Some(strategy) = strategies.iter_mut().find(|s| s.key() == id) {
                strategy.performance = Some(performance);
            }
        }
    }
}

/// Read-only strategy state exposed to the view layer
#[derive(Debug, Clone)]
pub struct StrategyStatusView {
    pub strategies: Vec<Strategy>,
    pub loading: bool,
    pub reconnecting: bool,
    pub error: Option<String>,
}

impl Default for StrategyStatusView {
    fn default() -> Self {
        Self {
            strategies: Vec::new(),
            loading: true,
            reconnecting: false,
            error: None,
        }
    }
}

/// Live view of strategy status and performance
pub struct StrategyStatusSubscription {
    api: Arc<ApiClient>,
    conn: Arc<Connection>,
    view_tx: Arc<watch::Sender<StrategyStatusView>>,
    view_rx: watch::Receiver<StrategyStatusView>,
    task: JoinHandle<()>,
}

impl StrategyStatusSubscription {
    pub fn start(api: Arc<ApiClient>) -> Result<Self> {
        let conn = Arc::new(Connection::new(
            api.config(),
            TransportKind::Sse,
            StreamTarget::new("/stream/strategies"),
            api.token(),
        )?);

        let (event_tx, event_rx) = mpsc::channel(256);
        conn.connect(event_tx);

        let (view_tx, view_rx) = watch::channel(StrategyStatusView::default());
        let view_tx = Arc::new(view_tx);
        let task = tokio::spawn(run_strategy_status(event_rx, view_tx.clone(), conn.clone()));

        Ok(Self {
            api,
            conn,
            view_tx,
            view_rx,
            task,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<StrategyStatusView> {
        self.view_rx.clone()
    }

    pub fn snapshot(&self) -> StrategyStatusView {
        self.view_rx.borrow().clone()
    }

    /// Re-fetch the strategy set over REST.
    pub async fn refresh(&self) -> Result<()> {
        let strategies = self.api.list_strategies().await?;
        self.view_tx.send_modify(|view| {
            view.strategies = strategies;
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

impl Drop for StrategyStatusSubscription {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run_strategy_status(
    mut rx: mpsc::Receiver<ConnectionEvent>,
    view_tx: Arc<watch::Sender<StrategyStatusView>>,
    conn: Arc<Connection>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            ConnectionEvent::Open => {
                view_tx.send_modify(|view| view.reconnecting = false);
            }
            ConnectionEvent::Stream(stream_event) => {
                let strategy_event = match stream_event {
                    StreamEvent::StrategiesSnapshot(strategies) => {
                        Some(StrategyEvent::Snapshot(strategies))
                    }
                    StreamEvent::StrategyStatusUpdate { id, status } => {
                        Some(StrategyEvent::StatusUpdate { id, status })
                    }
                    StreamEvent::StrategyPerformanceUpdate { id, performance } => {
                        Some(StrategyEvent::PerformanceUpdate { id, performance })
                    }
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
                        tracing::debug!("Unexpected event on strategy stream: {:?}", other);
                        None
                    }
                };
                if let Some(strategy_event) = strategy_event {
                    view_tx.send_modify(|view| {
                        apply_strategy_event(&mut view.strategies, strategy_event);
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

    fn strategy(id: &str, status: &str) -> Strategy {
        Strategy {
            id: id.to_string(),
            name: format!("strategy {}", id),
            code: String::new(),
            status: status.to_string(),
            performance: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_snapshot_replaces_set() {
        let mut strategies = vec![strategy("a", "stopped")];
        apply_strategy_event(
            &mut strategies,
            StrategyEvent::Snapshot(vec![strategy("b", "running")]),
        );
        assert_eq!(strategies.len(), 1);
        assert_eq!(strategies[0].id, "b");
    }

    #[test]
    fn test_status_update_patches_by_id() {
        let mut strategies = vec![strategy("a", "stopped"), strategy("b", "running")];
        apply_strategy_event(
            &mut strategies,
            StrategyEvent::StatusUpdate {
                id: "a".to_string(),
                status: "running".to_string(),
            },
        );
        assert_eq!(strategies[0].status, "running");
        assert_eq!(strategies[1].status, "running");
    }

    #[test]
    fn test_update_for_unknown_id_is_noop() {
        let mut strategies = vec![strategy("a", "stopped")];
        apply_strategy_event(
            &mut strategies,
            StrategyEvent::StatusUpdate {
                id: "ghost".to_string(),
                status: "running".to_string(),
            },
        );
        assert_eq!(strategies.len(), 1);
        assert_eq!(strategies[0].status, "stopped");
    }

    #[test]
    fn test_performance_update() {
        let mut strategies = vec![strategy("a", "running")];
        apply_strategy_event(
            &mut strategies,
            StrategyEvent::PerformanceUpdate {
                id: "a".to_string(),
                performance: StrategyPerformance {
                    total_trades: 12,
                    win_rate: 0.5,
                    net_pnl: 340.0,
                },
            },
        );
        assert_eq!(strategies[0].performance.as_ref().unwrap().total_trades, 12);
    }
}
