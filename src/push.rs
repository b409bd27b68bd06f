//! Push-channel transport for job status notifications
//!
//! An out-of-band, server-initiated notification path used as a
//! lower-latency alternative to polling. The service assigns each job a
//! channel address and event name; subscribing yields the job's state as
//! JSON payloads.
//!
//! Delivery is not guaranteed exactly-once or timely, so the tracker always
//! pairs a subscription with a slow safety-net poll (see
//! [`crate::tracker::PushTracker`]).

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Result, TransportError};

/// Buffer size for undelivered push payloads per subscription
const SUBSCRIPTION_BUFFER: usize = 32;

/// A push notification transport
///
/// Implementations subscribe to a (channel, event) pair and deliver each
/// matching payload as raw JSON. Selected at client construction time;
/// polling remains the always-available fallback when no push transport is
/// configured.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Subscribe to `event` notifications on `channel`
    async fn subscribe(&self, channel: &str, event: &str) -> Result<PushSubscription>;
}

/// A live subscription to one job's push channel
///
/// Owns the background receive task; [`unsubscribe`](Self::unsubscribe)
/// releases the transport connection deterministically. Dropping the
/// subscription cancels and aborts the task as a backstop so no work
/// outlives its owner.
pub struct PushSubscription {
    receiver: mpsc::Receiver<serde_json::Value>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PushSubscription {
    /// Assemble a subscription from its parts
    ///
    /// `task`, when present, is the owned receive loop; it must exit once
    /// `cancel` is triggered.
    pub fn new(
        receiver: mpsc::Receiver<serde_json::Value>,
        cancel: CancellationToken,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            receiver,
            cancel,
            task,
        }
    }

    /// Receive the next payload; `None` once the channel closes
    pub async fn next(&mut self) -> Option<serde_json::Value> {
        self.receiver.recv().await
    }

    /// Unsubscribe and release the transport connection
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// One frame on the WebSocket push transport
#[derive(Debug, Deserialize)]
struct PushFrame {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// WebSocket-based [`PushChannel`]
///
/// Connects to the configured WebSocket URL, sends a JSON subscribe frame
/// for the job's channel, and forwards payloads of matching
/// `{channel, event, data}` frames. `data` may arrive either as a JSON
/// object or as a JSON-encoded string; both are accepted.
pub struct WebSocketPushChannel {
    url: String,
}

impl WebSocketPushChannel {
    /// Create a push channel targeting a WebSocket endpoint (`ws://`/`wss://`)
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl PushChannel for WebSocketPushChannel {
    async fn subscribe(&self, channel: &str, event: &str) -> Result<PushSubscription> {
        let (ws_stream, _response) = connect_async(&self.url).await.map_err(|e| {
            TransportError::Push(format!("failed to connect to {}: {}", self.url, e))
        })?;
        debug!(url = %self.url, %channel, %event, "push channel connected");

        let (mut sink, mut stream) = ws_stream.split();

        let subscribe_frame = serde_json::json!({
            "action": "subscribe",
            "channel": channel,
        });
        sink.send(Message::Text(subscribe_frame.to_string()))
            .await
            .map_err(|e| TransportError::Push(format!("subscribe failed: {}", e)))?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let channel = channel.to_string();
        let event = event.to_string();

        let task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    biased;
                    _ = loop_cancel.cancelled() => {
                        let unsubscribe_frame = serde_json::json!({
                            "action": "unsubscribe",
                            "channel": channel,
                        });
                        let _ = sink.send(Message::Text(unsubscribe_frame.to_string())).await;
                        let _ = sink.close().await;
                        break;
                    }
                    m = stream.next() => m,
                };

                match message {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, &channel, &event, &tx).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        trace!("ignoring binary push frame");
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "push channel closed by server");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "push channel receive error");
                        break;
                    }
                    None => break,
                }
            }
        });

        Ok(PushSubscription::new(rx, cancel, Some(task)))
    }
}

/// Parse a text frame and forward its payload when channel and event match
async fn handle_frame(
    text: &str,
    channel: &str,
    event: &str,
    tx: &mpsc::Sender<serde_json::Value>,
) {
    let frame: PushFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, raw = %text, "failed to parse push frame");
            return;
        }
    };

    if frame.channel.as_deref() != Some(channel) || frame.event.as_deref() != Some(event) {
        trace!(?frame.channel, ?frame.event, "ignoring frame for other channel/event");
        return;
    }

    let Some(data) = frame.data else {
        return;
    };

    // Some push brokers wrap the payload in a JSON-encoded string.
    let payload = match data {
        serde_json::Value::String(inner) => match serde_json::from_str(&inner) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "push frame data is a string but not valid JSON");
                return;
            }
        },
        other => other,
    };

    // Receiver gone means the wait already resolved; nothing to do.
    let _ = tx.send(payload).await;
}
