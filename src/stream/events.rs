//! Event demultiplexer
//!
//! Maps named server events onto typed payloads. Transport concerns stay in
//! the channel implementations; subscriptions only ever see `StreamEvent`.
//! Malformed payloads become `StreamEvent::ParseError` (they never escape as
//! panics or close the connection) and unknown names are logged and skipped
//! so older clients survive newer servers.

use crate::models::{BacktestRecord, BacktestResult, Bar, Job, JobStatus, Strategy, StrategyPerformance, Transaction};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// One named event as read off the wire, payload still unparsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub name: String,
    pub data: String,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Acknowledgment sent by the server once a subscription is established
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionAck {
    pub message: Option<String>,
    pub subscription: Option<String>,
}

/// Incremental job progress; later values overwrite earlier ones
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressUpdate {
    pub job_id: Option<String>,
    pub status: Option<JobStatus>,
    pub progress: Option<f64>,
    pub current_step: Option<u64>,
    pub total_steps: Option<u64>,
    pub message: Option<String>,
}

/// Terminal completion notice. The embedded result is a summary bounded in
/// size; the authoritative result comes from a REST fetch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionNotice {
    pub job_id: Option<String>,
    #[serde(alias = "summary")]
    pub result: Option<BacktestResult>,
}

/// Metadata opening one interval's data stream
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntervalStart {
    pub interval: Option<String>,
    pub symbol: Option<String>,
    pub exchange: Option<String>,
    pub total_points: Option<u64>,
}

/// One bounded slice of streamed historical bars
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataChunk {
    pub interval: Option<String>,
    #[serde(default, alias = "data", alias = "points")]
    pub bars: Vec<Bar>,
    pub progress: Option<f64>,
    pub chunk_index: Option<u64>,
}

/// Structured error payload carried by the `error` event
#[derive(Debug, Clone, Deserialize)]
pub struct StreamErrorPayload {
    pub error: String,
    pub message: String,
    pub available_intervals: Option<Vec<String>>,
    /// Present when the error is scoped to a single interval
    pub interval: Option<String>,
}

impl StreamErrorPayload {
    /// 401-shaped error codes: terminal, the user must re-authenticate.
    pub fn is_auth(&self) -> bool {
        matches!(self.error.as_str(), "unauthorized" | "auth_failed" | "invalid_token")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RemovedPayload {
    id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FailurePayload {
    #[serde(alias = "error")]
    message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CompletePayload {
    interval: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct IntervalCompletePayload {
    interval: String,
    total_points: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct StatusUpdatePayload {
    id: String,
    status: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PerformanceUpdatePayload {
    id: String,
    performance: StrategyPerformance,
}

/// A typed server event
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Connected(ConnectionAck),
    /// Whole-collection replacement; items are decoded by the owning
    /// subscription since the element type depends on the resource
    Snapshot(Vec<Value>),
    JobAdded(Job),
    JobUpdated(Job),
    JobRemoved { id: String },
    BacktestAdded(BacktestRecord),
    BacktestUpdated(BacktestRecord),
    Progress(ProgressUpdate),
    Transaction(Transaction),
    Completed(CompletionNotice),
    Failed { message: String },
    Cancelled { message: Option<String> },
    IntervalStart(IntervalStart),
    DataChunk(DataChunk),
    Complete { interval: Option<String> },
    IntervalComplete { interval: String, total_points: Option<u64> },
    AllComplete,
    StrategiesSnapshot(Vec<Strategy>),
    StrategyStatusUpdate { id: String, status: String },
    StrategyPerformanceUpdate { id: String, performance: StrategyPerformance },
    ServerError(StreamErrorPayload),
    /// A payload that failed to decode; surfaced, never thrown
    ParseError { event: String, message: String },
}

impl StreamEvent {
    /// Whether this event acknowledges the subscription (the server is
    /// reachable and the token was accepted).
    pub fn is_ack(&self) -> bool {
        matches!(
            self,
            StreamEvent::Connected(_) | StreamEvent::Snapshot(_) | StreamEvent::StrategiesSnapshot(_)
        )
    }

    /// Whether this event ends the stream for good. Once observed, the
    /// connection must not reconnect regardless of later transport errors.
    pub fn completes_stream(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::AllComplete)
    }
}

/// Route one raw event to its typed form. Returns `None` for unknown names.
pub fn demux(raw: &RawEvent) -> Option<StreamEvent> {
    match parse(raw) {
        Ok(Some(event)) => Some(event),
        Ok(None) => {
            tracing::debug!("Ignoring unknown event: {}", raw.name);
            None
        }
        Err(e) => {
            tracing::warn!("Failed to parse {} payload: {}", raw.name, e);
            Some(StreamEvent::ParseError {
                event: raw.name.clone(),
                message: e.to_string(),
            })
        }
    }
}

fn parse(raw: &RawEvent) -> serde_json::Result<Option<StreamEvent>> {
    let event = match raw.name.as_str() {
        "connection" => StreamEvent::Connected(lenient(&raw.data)?),
        "snapshot" => StreamEvent::Snapshot(lenient(&raw.data)?),
        "job_added" => StreamEvent::JobAdded(serde_json::from_str(&raw.data)?),
        "job_updated" => StreamEvent::JobUpdated(serde_json::from_str(&raw.data)?),
        "job_removed" => {
            let payload: RemovedPayload = serde_json::from_str(&raw.data)?;
            StreamEvent::JobRemoved { id: payload.id }
        }
        "backtest_added" => StreamEvent::BacktestAdded(serde_json::from_str(&raw.data)?),
        "backtest_updated" => StreamEvent::BacktestUpdated(serde_json::from_str(&raw.data)?),
        "progress" => StreamEvent::Progress(serde_json::from_str(&raw.data)?),
        "transaction" => StreamEvent::Transaction(serde_json::from_str(&raw.data)?),
        "completed" => StreamEvent::Completed(lenient(&raw.data)?),
        "failed" => {
            let payload: FailurePayload = lenient(&raw.data)?;
            StreamEvent::Failed {
                message: payload.message.unwrap_or_else(|| "job failed".to_string()),
            }
        }
        "cancelled" => {
            let payload: FailurePayload = lenient(&raw.data)?;
            StreamEvent::Cancelled {
                message: payload.message,
            }
        }
        "interval_start" => StreamEvent::IntervalStart(lenient(&raw.data)?),
        "data_chunk" => StreamEvent::DataChunk(serde_json::from_str(&raw.data)?),
        "complete" => {
            let payload: CompletePayload = lenient(&raw.data)?;
            StreamEvent::Complete {
                interval: payload.interval,
            }
        }
        "interval_complete" => {
            let payload: IntervalCompletePayload = serde_json::from_str(&raw.data)?;
            StreamEvent::IntervalComplete {
                interval: payload.interval,
                total_points: payload.total_points,
            }
        }
        "all_complete" => StreamEvent::AllComplete,
        "strategies_snapshot" => StreamEvent::StrategiesSnapshot(lenient(&raw.data)?),
        "strategy_status_update" => {
            let payload: StatusUpdatePayload = serde_json::from_str(&raw.data)?;
            StreamEvent::StrategyStatusUpdate {
                id: payload.id,
                status: payload.status,
            }
        }
        "strategy_performance_update" => {
            let payload: PerformanceUpdatePayload = serde_json::from_str(&raw.data)?;
            StreamEvent::StrategyPerformanceUpdate {
                id: payload.id,
                performance: payload.performance,
            }
        }
        "error" => StreamEvent::ServerError(serde_json::from_str(&raw.data)?),
        _ => return Ok(None),
    };
    Ok(Some(event))
}

/// Decode a payload that some servers send empty.
fn lenient<T: DeserializeOwned + Default>(data: &str) -> serde_json::Result<T> {
    if data.trim().is_empty() {
        Ok(T::default())
    } else {
        serde_json::from_str(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_event() {
        let raw = RawEvent::new("progress", r#"{"job_id":"j1","progress":55.0,"status":"running"}"#);
        match demux(&raw) {
            Some(StreamEvent::Progress(update)) => {
                assert_eq!(update.progress, Some(55.0));
                assert_eq!(update.status, Some(JobStatus::Running));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_completed_carries_summary() {
        let raw = RawEvent::new("completed", r#"{"job_id":"j1","summary":{"total_trades":3}}"#);
        match demux(&raw) {
            Some(StreamEvent::Completed(notice)) => {
                assert_eq!(notice.result.unwrap().total_trades, 3);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payload_becomes_parse_error() {
        let raw = RawEvent::new("progress", "{not json");
        match demux(&raw) {
            Some(StreamEvent::ParseError { event, .. }) => assert_eq!(event, "progress"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_ignored() {
        let raw = RawEvent::new("job_renamed", "{}");
        assert!(demux(&raw).is_none());
    }

    #[test]
    fn test_empty_terminal_payloads() {
        assert!(matches!(
            demux(&RawEvent::new("all_complete", "")),
            Some(StreamEvent::AllComplete)
        ));
        assert!(matches!(
            demux(&RawEvent::new("complete", "")),
            Some(StreamEvent::Complete { interval: None })
        ));
    }

    #[test]
    fn test_error_payload_with_intervals() {
        let raw = RawEvent::new(
            "error",
            r#"{"error":"unsupported_interval","message":"1s not available","available_intervals":["1m","1d"]}"#,
        );
        match demux(&raw) {
            Some(StreamEvent::ServerError(payload)) => {
                assert_eq!(payload.error, "unsupported_interval");
                assert_eq!(payload.available_intervals.unwrap().len(), 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_ack_and_terminal_classification() {
        assert!(StreamEvent::Connected(ConnectionAck::default()).is_ack());
        assert!(StreamEvent::Snapshot(vec![]).is_ack());
        assert!(!StreamEvent::AllComplete.is_ack());
        assert!(StreamEvent::AllComplete.completes_stream());
        assert!(StreamEvent::Complete { interval: None }.completes_stream());
        assert!(!StreamEvent::Connected(ConnectionAck::default()).completes_stream());
    }

    #[test]
    fn test_data_chunk_aliases() {
        let raw = RawEvent::new(
            "data_chunk",
            r#"{"interval":"1d","data":[{"timestamp":"t1","open":1.0,"high":2.0,"low":0.5,"close":1.5,"volume":10}]}"#,
        );
        match demux(&raw) {
            Some(StreamEvent::DataChunk(chunk)) => {
                assert_eq!(chunk.bars.len(), 1);
                assert_eq!(chunk.bars[0].timestamp, "t1");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
