//! Live streaming transports
//!
//! A subscription talks to exactly one backend resource over a live
//! channel. Two transport variants exist behind one interface: SSE (the
//! primary path) and WebSocket (kept for the job-progress endpoint). The
//! `Connection` primitive owns the channel, its reconnect policy, and the
//! intentionally-closed / stream-complete flags.

pub mod connection;
pub mod events;
mod sse;
mod ws;

pub use connection::{Connection, ConnectionEvent, StreamTarget};
pub use events::{RawEvent, StreamEvent};

use crate::config::ClientConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// Transport variant for a live channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Sse,
    WebSocket,
}

/// Messages a transport delivers to its connection
#[derive(Debug)]
pub enum ChannelMessage {
    /// The channel is open and the server may start sending events
    Opened,
    /// One named event read off the wire
    Event(RawEvent),
    /// The server closed the channel, optionally with a reason
    Closed { reason: Option<String> },
}

/// One live channel variant. `run` performs a single transport attempt:
/// open the channel, forward frames into `tx`, and return when the stream
/// ends, an error occurs, or `closed` is set.
#[async_trait]
pub trait LiveChannel: Send + Sync {
    async fn run(
        &self,
        url: Url,
        tx: mpsc::Sender<ChannelMessage>,
        closed: Arc<AtomicBool>,
    ) -> Result<()>;
}

/// Build the transport for the configured kind.
pub(crate) fn channel_for(kind: TransportKind, config: &ClientConfig) -> Arc<dyn LiveChannel> {
    match kind {
        TransportKind::Sse => Arc::new(sse::SseChannel::new()),
        TransportKind::WebSocket => Arc::new(ws::WebSocketChannel::new(config.heartbeat_interval)),
    }
}

/// Resolve once `flag` becomes true. Used by transports to notice an
/// intentional close while blocked on a read.
pub(crate) async fn wait_for_flag(flag: &AtomicBool) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
