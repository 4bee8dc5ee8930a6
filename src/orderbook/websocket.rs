//! WebSocket client for the primary-venue book-diff feed.
//!
//! Features:
//! - Automatic reconnection with exponential backoff
//! - Gzip framed subscribe and event messages
//! - Resubscription when the book asks for a fresh snapshot or the feed goes idle

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::event::BookEvent;
use super::writer::BookHandle;
use crate::error::WsError;
use crate::metrics;

/// Action name of the subscribe request.
pub const ACTION_SUBSCRIBE_BOOK: &str = "SUBSCRIBE_BOOK";
/// Action name of feed events.
pub const ACTION_EMIT_EVENT: &str = "EMIT_EVENT";

/// Envelope shared by requests and events on the feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedMessage {
    /// Request id.
    #[serde(default)]
    pub id: String,
    /// Message action.
    pub action: String,
    /// Request parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Event body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error reported by the feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl FeedMessage {
    /// Subscribe request for one market.
    pub fn subscribe(market: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action: ACTION_SUBSCRIBE_BOOK.to_string(),
            params: Some(serde_json::json!({ "market": market })),
            data: None,
            error: None,
        }
    }
}

/// Serialize and gzip a feed message.
pub fn encode_frame(message: &FeedMessage) -> Result<Vec<u8>, WsError> {
    let json = serde_json::to_vec(message).map_err(|e| WsError::SendFailed(e.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(3));
    encoder
        .write_all(&json)
        .and_then(|_| encoder.finish())
        .map_err(|e| WsError::SendFailed(e.to_string()))
}

/// Decode a text or gzip binary frame. Control frames yield `None`.
pub fn decode_frame(message: &Message) -> Result<Option<FeedMessage>, WsError> {
    let parsed = match message {
        Message::Text(text) => serde_json::from_str(text),
        Message::Binary(bytes) => {
            let mut json = Vec::new();
            GzDecoder::new(bytes.as_slice())
                .read_to_end(&mut json)
                .map_err(|e| WsError::ParseError(format!("gzip: {}", e)))?;
            serde_json::from_slice(&json)
        }
        _ => return Ok(None),
    };
    parsed
        .map(Some)
        .map_err(|e| WsError::ParseError(e.to_string()))
}

/// Reconnection configuration for WebSocket.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial backoff delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum backoff delay in seconds.
    pub max_delay_s: u64,
    /// Backoff multiplier (e.g., 2.0 for exponential).
    pub backoff_multiplier: f64,
    /// Reconnect when no message arrives for this many seconds.
    pub idle_timeout_s: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_s: 30,
            backoff_multiplier: 2.0,
            idle_timeout_s: 60,
        }
    }
}

impl ReconnectConfig {
    /// Calculate next delay with exponential backoff.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let max_delay_ms = self.max_delay_s * 1000;
        let clamped_ms = delay_ms.min(max_delay_ms as f64) as u64;
        Duration::from_millis(clamped_ms)
    }
}

/// Why a feed session ended without a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Resync,
}

/// Streams one market's book diffs into its book writer.
pub struct BookFeed {
    ws_url: String,
    book: BookHandle,
    reconnect_config: ReconnectConfig,
}

impl BookFeed {
    /// Create a feed for the writer's pair.
    pub fn new(ws_url: impl Into<String>, book: BookHandle) -> Self {
        Self {
            ws_url: ws_url.into(),
            book,
            reconnect_config: ReconnectConfig::default(),
        }
    }

    /// Create with custom reconnection config.
    pub fn with_reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect_config = config;
        self
    }

    /// Run sessions until shutdown, reconnecting after every failure.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let market = self.book.pair().market_id();
        let mut attempt = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            info!(market = %market, attempt, "Connecting to book feed");
            match self.session(&market, &mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Resync) => {
                    info!(market = %market, "Resubscribing for a fresh book snapshot");
                    attempt = 0;
                    metrics::inc_ws_reconnects();
                    continue;
                }
                Err(e) => {
                    error!(market = %market, error = %e, attempt, "Book feed session failed");
                }
            }

            let delay = self.reconnect_config.next_delay(attempt);
            metrics::inc_ws_reconnects();
            debug!(delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
            attempt = attempt.saturating_add(1);
        }

        info!(market = %market, "Book feed stopped");
    }

    async fn session(
        &self,
        market: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, WsError> {
        let (ws_stream, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let frame = encode_frame(&FeedMessage::subscribe(market))?;
        write
            .send(Message::Binary(frame))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))?;
        info!(market = %market, "Subscribed to book");

        let idle = Duration::from_secs(self.reconnect_config.idle_timeout_s);
        loop {
            let next = tokio::select! {
                _ = shutdown.changed() => return Ok(SessionEnd::Shutdown),
                next = tokio::time::timeout(idle, read.next()) => next,
            };

            let message = match next {
                Err(_) => {
                    return Err(WsError::Idle {
                        secs: self.reconnect_config.idle_timeout_s,
                    })
                }
                Ok(None) => return Err(WsError::ConnectionFailed("stream ended".to_string())),
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(Some(Ok(message))) => message,
            };

            if let Message::Close(frame) = &message {
                warn!(frame = ?frame, "WebSocket closed");
                return Err(WsError::ConnectionFailed("closed by peer".to_string()));
            }

            let start = Instant::now();
            metrics::inc_ws_messages_received();
            let feed_message = match decode_frame(&message) {
                Ok(Some(m)) => m,
                Ok(None) => continue,
                Err(e) => {
                    warn!(market = %market, error = %e, "Undecodable feed frame");
                    continue;
                }
            };
            if feed_message.action != ACTION_EMIT_EVENT {
                debug!(action = %feed_message.action, "Ignoring feed message");
                continue;
            }
            let Some(data) = feed_message.data else { continue };

            let outcome = match BookEvent::from_json(data) {
                Ok(event) => self.book.apply(event).await,
                Err(e) => Err(e),
            };
            metrics::record_ws_message_latency(start);

            if let Err(e) = outcome {
                if e.needs_resync() {
                    return Ok(SessionEnd::Resync);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn subscribe_frame_is_gzipped_json() {
        let message = FeedMessage::subscribe("BASE-QUOTE");
        let frame = encode_frame(&message).unwrap();
        assert_eq!(&frame[..2], &[0x1f, 0x8b]);

        let decoded = decode_frame(&Message::Binary(frame)).unwrap().unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.action, ACTION_SUBSCRIBE_BOOK);
        assert_eq!(decoded.params.unwrap()["market"], "BASE-QUOTE");
    }

    #[test]
    fn text_frames_are_accepted() {
        let text = r#"{"id":"1","action":"EMIT_EVENT","data":{"market":"m","event":"BOOK-T0","sequence":1,"data":{}}}"#;
        let decoded = decode_frame(&Message::Text(text.to_string())).unwrap().unwrap();
        assert_eq!(decoded.action, ACTION_EMIT_EVENT);
        let event = BookEvent::from_json(decoded.data.unwrap()).unwrap();
        assert_eq!(event.sequence, 1);
    }

    #[test]
    fn control_frames_are_skipped() {
        assert!(decode_frame(&Message::Ping(vec![1])).unwrap().is_none());
    }

    #[test]
    fn garbage_binary_is_a_parse_error() {
        let err = decode_frame(&Message::Binary(vec![1, 2, 3])).unwrap_err();
        assert!(matches!(err, WsError::ParseError(_)));
    }

    #[test]
    fn backoff_is_capped() {
        let config = ReconnectConfig::default();
        assert_eq!(config.next_delay(0), Duration::from_millis(100));
        assert_eq!(config.next_delay(1), Duration::from_millis(200));
        assert_eq!(config.next_delay(20), Duration::from_secs(30));
    }
}
