//! SSE transport
//!
//! A long-lived HTTP response parsed incrementally as `text/event-stream`.
//! The decoder is tolerant of frames split across network chunks, CRLF line
//! endings, multi-line `data:` fields, and comment keep-alives.

use super::{wait_for_flag, ChannelMessage, LiveChannel, RawEvent};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// Incremental `text/event-stream` decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event_name: Option<String>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk; returns every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        // Only consume up to the last full line; a partial line (or a
        // UTF-8 sequence split across chunks) stays buffered.
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                // comment / keep-alive
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };

            match field {
                "event" => self.event_name = Some(value.to_string()),
                "data" => self.data_lines.push(value.to_string()),
                // id and retry are managed server-side; nothing to do
                _ => {}
            }
        }

        events
    }

    fn dispatch(&mut self) -> Option<RawEvent> {
        if self.event_name.is_none() && self.data_lines.is_empty() {
            return None;
        }
        let name = self.event_name.take().unwrap_or_else(|| "message".to_string());
        let data = std::mem::take(&mut self.data_lines).join("\n");
        Some(RawEvent { name, data })
    }
}

/// SSE live-channel variant
pub struct SseChannel {
    http: reqwest::Client,
}

impl SseChannel {
    pub fn new() -> Self {
        // No overall timeout: the response body is a long-lived stream.
        Self {
            http: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }
}

impl Default for SseChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LiveChannel for SseChannel {
    async fn run(
        &self,
        url: Url,
        tx: mpsc::Sender<ChannelMessage>,
        closed: Arc<AtomicBool>,
    ) -> Result<()> {
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AppError::Auth(format!("stream rejected: {}", status)));
        }
        if !status.is_success() {
            return Err(AppError::Stream(format!("stream request failed: {}", status)));
        }

        if tx.send(ChannelMessage::Opened).await.is_err() {
            return Ok(());
        }

        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();

        loop {
            tokio::select! {
                chunk = body.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            for event in decoder.push(&bytes) {
                                if tx.send(ChannelMessage::Event(event)).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        Some(Err(e)) => return Err(AppError::Http(e)),
                        None => {
                            let _ = tx.send(ChannelMessage::Closed { reason: None }).await;
                            return Ok(());
                        }
                    }
                }
                _ = wait_for_flag(&closed) => {
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
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: progress\ndata: {\"progress\":20}\n\n");
        assert_eq!(events, vec![RawEvent::new("progress", "{\"progress\":20}")]);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: data_chunk\nda").is_empty());
        let events = decoder.push(b"ta: {\"interval\":\"1d\"}\n\n");
        assert_eq!(events, vec![RawEvent::new("data_chunk", "{\"interval\":\"1d\"}")]);
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: line1\ndata: line2\n\n");
        assert_eq!(events, vec![RawEvent::new("message", "line1\nline2")]);
    }

    #[test]
    fn test_comment_keepalive_ignored() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b": ping\n\n").is_empty());
    }

    #[test]
    fn test_crlf_lines() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: connection\r\ndata: {}\r\n\r\n");
        assert_eq!(events, vec![RawEvent::new("connection", "{}")]);
    }

    #[test]
    fn test_two_events_one_chunk() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: a\ndata: 1\n\nevent: b\ndata: 2\n\n");
        assert_eq!(
            events,
            vec![RawEvent::new("a", "1"), RawEvent::new("b", "2")]
        );
    }

    #[test]
    fn test_default_event_name_is_message() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: hello\n\n");
        assert_eq!(events[0].name, "message");
    }
}
