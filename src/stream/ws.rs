//! WebSocket transport (legacy job-progress path)
//!
//! Frames are JSON text of the form `{"event": "<name>", "data": {...}}`,
//! mirroring the SSE event names. An application-level ping keeps NAT
//! mappings warm; protocol pings from the server are answered in kind.

use super::{wait_for_flag, ChannelMessage, LiveChannel, RawEvent};
use crate::error::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// WebSocket live-channel variant
pub struct WebSocketChannel {
    heartbeat_interval: Duration,
}

impl WebSocketChannel {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self { heartbeat_interval }
    }
}

/// Decode one text frame into a raw event. Heartbeat replies and frames
/// without an event name yield `None`.
fn parse_frame(text: &str) -> Option<RawEvent> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Dropping unparseable frame: {}", e);
            return None;
        }
    };

    let name = value.get("event")?.as_str()?.to_string();
    if name == "pong" || name == "ping" {
        return None;
    }

    let data = value
        .get("data")
        .map(|d| d.to_string())
        .unwrap_or_default();
    Some(RawEvent { name, data })
}

#[async_trait]
impl LiveChannel for WebSocketChannel {
    async fn run(
        &self,
        url: Url,
        tx: mpsc::Sender<ChannelMessage>,
        closed: Arc<AtomicBool>,
    ) -> Result<()> {
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        if tx.send(ChannelMessage::Opened).await.is_err() {
            return Ok(());
        }

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = parse_frame(&text) {
                                if tx.send(ChannelMessage::Event(event)).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame.map(|f| f.reason.to_string());
                            let _ = tx.send(ChannelMessage::Closed { reason }).await;
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            let _ = tx.send(ChannelMessage::Closed { reason: None }).await;
                            return Ok(());
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    let ping = serde_json::json!({"event": "ping"}).to_string();
                    if write.send(Message::Text(ping)).await.is_err() {
                        return Ok(());
                    }
                }
                _ = wait_for_flag(&closed) => {
                    let _ = write.close().await;
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame() {
        let event = parse_frame(r#"{"event":"progress","data":{"progress":42.0}}"#).unwrap();
        assert_eq!(event.name, "progress");
        assert!(event.data.contains("42"));
    }

    #[test]
    fn test_heartbeat_frames_filtered() {
        assert!(parse_frame(r#"{"event":"pong"}"#).is_none());
        assert!(parse_frame(r#"{"event":"ping"}"#).is_none());
    }

    #[test]
    fn test_frame_without_event_name_dropped() {
        assert!(parse_frame(r#"{"data":{"x":1}}"#).is_none());
        assert!(parse_frame("not json").is_none());
    }

    #[test]
    fn test_frame_without_data_yields_empty_payload() {
        let event = parse_frame(r#"{"event":"all_complete"}"#).unwrap();
        assert_eq!(event.name, "all_complete");
        assert_eq!(event.data, "");
    }
}
