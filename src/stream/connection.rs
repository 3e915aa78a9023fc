//! Connection primitive
//!
//! Owns exactly one live channel to one backend resource. The auth token
//! rides in the query string because neither streaming transport can set
//! request headers. Two flags only ever progress forward:
//! `intentionally_closed` (set by `disconnect`, suppresses everything) and
//! `stream_complete` (set by a terminal `complete`/`all_complete` event,
//! suppresses reconnection and its logging).

use super::{channel_for, events, ChannelMessage, LiveChannel, TransportKind};
use crate::config::{ClientConfig, ReconnectPolicy};
use crate::error::{AppError, Result};
use crate::stream::StreamEvent;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

/// The resource a connection subscribes to
#[derive(Debug, Clone)]
pub struct StreamTarget {
    /// Path under the streaming origin, e.g. `/stream/jobs/j1`
    pub path: String,
    /// Resource-specific query parameters (interval, limit, chunk size,
    /// status filter)
    pub params: Vec<(String, String)>,
}

impl StreamTarget {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }
}

/// What a connection reports to its subscription
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Transport opened; the server may start sending events
    Open,
    /// A demultiplexed server event
    Stream(StreamEvent),
    /// Transport dropped; a reconnect attempt is scheduled
    Reconnecting { attempt: u32, delay: Duration },
    /// Never acknowledged within the ack window and found closed -
    /// the token was most likely rejected
    AuthFailure { message: String },
    /// Reconnect attempts exhausted
    Lost { reason: Option<String> },
}

/// What to do once a transport attempt ends
#[derive(Debug, PartialEq, Eq)]
enum Disposition {
    /// Intentional close: wind down without a word
    Silent,
    /// Terminal event observed: no reconnect, no reconnect logging
    SuppressReconnect,
    /// Never acknowledged: classify as an authentication failure
    AuthFailure,
    /// Transient: reconnect after the policy delay
    Reconnect { delay: Duration },
    /// Attempt budget exhausted
    GiveUp,
}

fn disposition_after_close(
    intentionally_closed: bool,
    stream_complete: bool,
    acked: bool,
    next_attempt: u32,
    policy: &ReconnectPolicy,
) -> Disposition {
    if intentionally_closed {
        return Disposition::Silent;
    }
    if stream_complete {
        return Disposition::SuppressReconnect;
    }
    if !acked {
        return Disposition::AuthFailure;
    }
    if !policy.allows(next_attempt) {
        return Disposition::GiveUp;
    }
    Disposition::Reconnect {
        delay: policy.delay_for(next_attempt),
    }
}

/// A live subscription to one backend resource
pub struct Connection {
    url: Url,
    kind: TransportKind,
    config: ClientConfig,
    intentionally_closed: Arc<AtomicBool>,
    stream_complete: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Build a connection for `target`, resolving the base origin for the
    /// chosen transport and appending the token and resource parameters.
    pub fn new(
        config: &ClientConfig,
        kind: TransportKind,
        target: StreamTarget,
        token: &str,
    ) -> Result<Self> {
        let base = match kind {
            TransportKind::Sse => &config.stream_url,
            TransportKind::WebSocket => &config.ws_url,
        };
        let mut url = Url::parse(base)
            .map_err(|e| AppError::Config(format!("invalid stream origin {}: {}", base, e)))?;
        url.set_path(&target.path);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("token", token);
            for (key, value) in &target.params {
                pairs.append_pair(key, value);
            }
        }

        Ok(Self {
            url,
            kind,
            config: config.clone(),
            intentionally_closed: Arc::new(AtomicBool::new(false)),
            stream_complete: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        })
    }

    /// Open the transport and start delivering `ConnectionEvent`s into
    /// `tx`. Calling this on an open (or intentionally closed) connection
    /// is a no-op with a warning.
    pub fn connect(&self, tx: mpsc::Sender<ConnectionEvent>) {
        let mut task = self.task.lock();
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            tracing::warn!("connect() called on an open connection, ignoring");
            return;
        }
        if self.intentionally_closed.load(Ordering::SeqCst) {
            tracing::warn!("connect() called on a closed connection, ignoring");
            return;
        }

        let transport = channel_for(self.kind, &self.config);
        *task = Some(tokio::spawn(run_loop(
            self.url.clone(),
            transport,
            self.config.clone(),
            tx,
            self.intentionally_closed.clone(),
            self.stream_complete.clone(),
        )));
    }

    /// Close the transport and suppress any further reconnection.
    /// Idempotent.
    pub fn disconnect(&self) {
        if self.intentionally_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("Disconnecting live channel");
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// Record that a terminal event was observed, so a later transport
    /// error must not trigger reconnection.
    pub fn mark_stream_complete(&self) {
        self.stream_complete.store(true, Ordering::SeqCst);
    }

    pub fn is_stream_complete(&self) -> bool {
        self.stream_complete.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) fn url(&self) -> &Url {
        &self.url
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run_loop(
    url: Url,
    transport: Arc<dyn LiveChannel>,
    config: ClientConfig,
    tx: mpsc::Sender<ConnectionEvent>,
    intentionally_closed: Arc<AtomicBool>,
    stream_complete: Arc<AtomicBool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if intentionally_closed.load(Ordering::SeqCst) {
            return;
        }

        let (raw_tx, mut raw_rx) = mpsc::channel::<ChannelMessage>(64);
        let started = tokio::time::Instant::now();
        let transport_task = tokio::spawn({
            let transport = transport.clone();
            let url = url.clone();
            let closed = intentionally_closed.clone();
            async move { transport.run(url, raw_tx, closed).await }
        });

        let mut acked = false;
        let mut close_reason: Option<String> = None;
        while let Some(msg) = raw_rx.recv().await {
            match msg {
                ChannelMessage::Opened => {
                    tracing::debug!("Live channel opened");
                    if tx.send(ConnectionEvent::Open).await.is_err() {
                        intentionally_closed.store(true, Ordering::SeqCst);
                        break;
                    }
                }
                ChannelMessage::Event(raw) => {
                    let Some(event) = events::demux(&raw) else {
                        continue;
                    };
                    if event.is_ack() {
                        acked = true;
                        attempt = 0;
                    }
                    if event.completes_stream() {
                        stream_complete.store(true, Ordering::SeqCst);
                    }
                    if tx.send(ConnectionEvent::Stream(event)).await.is_err() {
                        // Subscriber went away; treat as an intentional close.
                        intentionally_closed.store(true, Ordering::SeqCst);
                        break;
                    }
                }
                ChannelMessage::Closed { reason } => {
                    close_reason = reason;
                }
            }
        }

        let error = match transport_task.await {
            Ok(Ok(())) => close_reason,
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(format!("transport task failed: {}", e)),
        };

        attempt += 1;
        let disposition = disposition_after_close(
            intentionally_closed.load(Ordering::SeqCst),
            stream_complete.load(Ordering::SeqCst),
            acked,
            attempt,
            &config.reconnect,
        );

        match disposition {
            Disposition::Silent | Disposition::SuppressReconnect => return,
            Disposition::AuthFailure => {
                // Give the server the full ack window before deciding the
                // token was rejected rather than the transport flaky.
                let elapsed = started.elapsed();
                if elapsed < config.connect_ack_timeout {
                    tokio::time::sleep(config.connect_ack_timeout - elapsed).await;
                    if intentionally_closed.load(Ordering::SeqCst) {
                        return;
                    }
                }
                let message = error
                    .unwrap_or_else(|| "connection closed before acknowledgment".to_string());
                tracing::error!("Stream never acknowledged, treating as auth failure: {}", message);
                let _ = tx.send(ConnectionEvent::AuthFailure { message }).await;
                return;
            }
            Disposition::GiveUp => {
                tracing::error!(
                    "Giving up after {} reconnect attempts",
                    config.reconnect.max_attempts
                );
                let _ = tx.send(ConnectionEvent::Lost { reason: error }).await;
                return;
            }
            Disposition::Reconnect { delay } => {
                tracing::warn!(
                    "Live channel closed ({}), reconnecting in {:?} (attempt {})",
                    error.as_deref().unwrap_or("eof"),
                    delay,
                    attempt
                );
                if tx
                    .send(ConnectionEvent::Reconnecting { attempt, delay })
                    .await
                    .is_err()
                {
                    return;
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::default()
    }

    #[test]
    fn test_intentional_close_is_silent() {
        assert_eq!(
            disposition_after_close(true, false, true, 1, &policy()),
            Disposition::Silent
        );
        // intentional close wins over everything else
        assert_eq!(
            disposition_after_close(true, true, false, 99, &policy()),
            Disposition::Silent
        );
    }

    #[test]
    fn test_terminal_event_suppresses_reconnect() {
        // Once complete/all_complete was observed, a later transport error
        // must not trigger reconnection.
        assert_eq!(
            disposition_after_close(false, true, true, 1, &policy()),
            Disposition::SuppressReconnect
        );
    }

    #[test]
    fn test_never_acked_is_auth_failure() {
        assert_eq!(
            disposition_after_close(false, false, false, 1, &policy()),
            Disposition::AuthFailure
        );
    }

    #[test]
    fn test_acked_close_reconnects_with_backoff() {
        assert_eq!(
            disposition_after_close(false, false, true, 1, &policy()),
            Disposition::Reconnect {
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            disposition_after_close(false, false, true, 3, &policy()),
            Disposition::Reconnect {
                delay: Duration::from_secs(4)
            }
        );
    }

    #[test]
    fn test_attempts_exhausted_gives_up() {
        assert_eq!(
            disposition_after_close(false, false, true, 6, &policy()),
            Disposition::GiveUp
        );
    }

    #[test]
    fn test_url_carries_token_and_params() {
        let config = ClientConfig::default();
        let target = StreamTarget::new("/stream/jobs/j1")
            .with_param("interval", "1d")
            .with_param("limit", "500");
        let conn = Connection::new(&config, TransportKind::Sse, target, "tok-123").unwrap();

        let url = conn.url();
        assert_eq!(url.path(), "/stream/jobs/j1");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(pairs.contains(&("token".to_string(), "tok-123".to_string())));
        assert!(pairs.contains(&("interval".to_string(), "1d".to_string())));
        assert!(pairs.contains(&("limit".to_string(), "500".to_string())));
    }

    #[test]
    fn test_ws_target_uses_ws_origin() {
        let config = ClientConfig::default();
        let conn = Connection::new(
            &config,
            TransportKind::WebSocket,
            StreamTarget::new("/ws/jobs/j1"),
            "tok",
        )
        .unwrap();
        assert_eq!(conn.url().scheme(), "wss");
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let config = ClientConfig::default();
        let conn = Connection::new(
            &config,
            TransportKind::Sse,
            StreamTarget::new("/stream/jobs/j1"),
            "tok",
        )
        .unwrap();
        conn.disconnect();
        conn.disconnect();
        assert!(!conn.is_open());

        // connect() after an intentional close stays a no-op
        let (tx, mut rx) = mpsc::channel(8);
        conn.connect(tx);
        assert!(!conn.is_open());
        assert!(rx.try_recv().is_err());
    }
}
