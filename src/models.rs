//! Core domain models
//!
//! Everything here is transient client-side state mirrored from the backend.
//! Nothing is persisted locally; a subscription owns its slice for the
//! lifetime of the owning view and discards it on teardown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a server-side job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Statuses for which the backend is still producing updates.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Queued | JobStatus::Running | JobStatus::Paused)
    }

    /// Wire form, as used in query parameters and event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// A server-side asynchronous backtest execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: f64,
    pub current_step: Option<u64>,
    pub total_steps: Option<u64>,
    pub result: Option<BacktestResult>,
    pub error: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Full output of a completed job: aggregate statistics plus the ordered
/// transaction list. Completion events carry a truncated copy of this with
/// `transactions` omitted; the REST fetch supplies the authoritative one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub total_trades: u64,
    #[serde(default)]
    pub winning_trades: u64,
    #[serde(default)]
    pub losing_trades: u64,
    #[serde(default)]
    pub win_rate: f64,
    #[serde(default)]
    pub net_pnl: f64,
    #[serde(default)]
    pub max_drawdown: f64,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

/// One trade event belonging to a result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub trade_id: String,
    pub date: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub quantity: f64,
    #[serde(default)]
    pub price: f64,
    pub pnl: Option<f64>,
}

impl Transaction {
    /// Composite deduplication key. The stream may redeliver transactions,
    /// so equality is judged on (trade id, date, type, quantity) rather than
    /// the full payload.
    pub fn dedup_key(&self) -> (String, String, String, u64) {
        (
            self.trade_id.clone(),
            self.date.clone(),
            self.kind.clone(),
            self.quantity.to_bits(),
        )
    }
}

/// One OHLCV bar of historical data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: i64,
}

/// Metadata announced at the start of an interval stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalMeta {
    pub symbol: String,
    pub exchange: String,
    pub total_points: Option<u64>,
}

/// Per-interval accumulator for streamed historical data
#[derive(Debug, Clone, Default)]
pub struct IntervalState {
    pub bars: Vec<Bar>,
    pub progress: f64,
    pub loading: bool,
    pub complete: bool,
    pub meta: Option<IntervalMeta>,
    pub error: Option<String>,
}

/// One completed backtest in the history listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRecord {
    pub id: String,
    pub strategy_id: String,
    #[serde(default)]
    pub strategy_name: String,
    pub symbol: String,
    pub status: JobStatus,
    #[serde(default)]
    pub total_trades: u64,
    #[serde(default)]
    pub net_pnl: f64,
    #[serde(default)]
    pub win_rate: f64,
    pub created_at: Option<DateTime<Utc>>,
}

/// Rolling performance figures for a running strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyPerformance {
    #[serde(default)]
    pub total_trades: u64,
    #[serde(default)]
    pub win_rate: f64,
    #[serde(default)]
    pub net_pnl: f64,
}

/// A strategy as shown in the status stream and the editing screens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: String,
    pub status: String,
    pub performance: Option<StrategyPerformance>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Paused.is_active());
        assert!(!JobStatus::Completed.is_active());
    }

    #[test]
    fn test_status_serde_lowercase() {
        let status: JobStatus = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(status, JobStatus::Running);
        assert_eq!(serde_json::to_string(&JobStatus::Completed).unwrap(), "\"completed\"");
    }

    #[test]
    fn test_transaction_dedup_key() {
        let tx = Transaction {
            trade_id: "t1".to_string(),
            date: "2024-03-01".to_string(),
            kind: "BUY".to_string(),
            quantity: 10.0,
            price: 101.5,
            pnl: None,
        };
        let mut redelivered = tx.clone();
        redelivered.price = 102.0; // price drift must not defeat dedup
        assert_eq!(tx.dedup_key(), redelivered.dedup_key());

        let mut other = tx.clone();
        other.quantity = 20.0;
        assert_ne!(tx.dedup_key(), other.dedup_key());
    }

    #[test]
    fn test_summary_result_deserializes_without_transactions() {
        let summary: BacktestResult =
            serde_json::from_str(r#"{"total_trades":3,"net_pnl":120.5}"#).unwrap();
        assert_eq!(summary.total_trades, 3);
        assert!(summary.transactions.is_empty());
    }
}
