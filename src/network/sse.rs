//! Server-sent-event connection manager
//!
//! Maintains the single stream connection to the automation service with
//! automatic reconnection and health monitoring. Parsed frames are pushed
//! onto the event bus; the reconciler consumes them from there.

use anyhow::{Context, Result};
use futures::StreamExt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use super::event_bus::AppEvent;
use crate::telemetry::{record_stream_connected, record_stream_reconnects};

/// Stream connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Observable connection health.
#[derive(Debug, Clone)]
pub struct StreamHealth {
    pub connected: bool,
    pub connection_error: Option<String>,
    pub reconnect_count: u32,
}

/// SSE manager for the automation event stream
pub struct SseManager {
    url: String,
    state: Arc<RwLock<ConnectionState>>,
    last_error: Arc<RwLock<Option<String>>>,
    event_tx: broadcast::Sender<AppEvent>,
    max_reconnect_attempts: u32,
    reconnect_delay: Duration,
    reconnect_count: Arc<AtomicU32>,
    shutdown: Arc<RwLock<bool>>,
}

impl SseManager {
    pub fn new(url: &str, event_tx: broadcast::Sender<AppEvent>) -> Self {
        Self {
            url: url.to_string(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            last_error: Arc::new(RwLock::new(None)),
            event_tx,
            max_reconnect_attempts: 10,
            reconnect_delay: Duration::from_secs(1),
            reconnect_count: Arc::new(AtomicU32::new(0)),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub fn with_reconnect_policy(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_delay = delay;
        self
    }

    pub async fn get_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    pub async fn health(&self) -> StreamHealth {
        StreamHealth {
            connected: self.is_connected().await,
            connection_error: self.last_error.read().await.clone(),
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
        }
    }

    /// Start the stream connection task.
    pub async fn start(&self) -> Result<()> {
        let url = self.url.clone();
        let state = self.state.clone();
        let last_error = self.last_error.clone();
        let event_tx = self.event_tx.clone();
        let max_attempts = self.max_reconnect_attempts;
        let reconnect_delay = self.reconnect_delay;
        let reconnect_count = self.reconnect_count.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut attempts = 0u32;

            loop {
                if *shutdown.read().await {
                    info!("Event stream shutdown signal received");
                    break;
                }

                *state.write().await = ConnectionState::Connecting;
                info!("Connecting to event stream: {}", url);

                match Self::connect_and_run(&url, &state, &event_tx).await {
                    Ok(()) => {
                        info!("Event stream closed normally");
                        attempts = 0;
                    }
                    Err(e) => {
                        error!("Event stream error: {}", e);
                        *last_error.write().await = Some(e.to_string());
                        attempts += 1;

                        if attempts >= max_attempts {
                            error!("Max reconnection attempts ({}) reached", max_attempts);
                            break;
                        }
                    }
                }

                let _ = event_tx.send(AppEvent::StreamDisconnected);
                record_stream_connected(false);

                if *shutdown.read().await {
                    break;
                }

                *state.write().await = ConnectionState::Reconnecting;
                let count = reconnect_count.fetch_add(1, Ordering::Relaxed) + 1;
                record_stream_reconnects(count);
                let delay = reconnect_delay * attempts.max(1);
                warn!(
                    "Reconnecting in {:?} (attempt {}/{})",
                    delay, attempts, max_attempts
                );
                tokio::time::sleep(delay).await;
            }

            *state.write().await = ConnectionState::Disconnected;
        });

        Ok(())
    }

    /// Connect and pump frames until the stream ends.
    async fn connect_and_run(
        url: &str,
        state: &Arc<RwLock<ConnectionState>>,
        event_tx: &broadcast::Sender<AppEvent>,
    ) -> Result<()> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build stream client")?;

        let response = client
            .get(url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .context("failed to connect to event stream")?
            .error_for_status()
            .context("event stream endpoint returned an error")?;

        *state.write().await = ConnectionState::Connected;
        info!("Event stream connected");
        record_stream_connected(true);
        let _ = event_tx.send(AppEvent::StreamConnected);

        let mut stream = response.bytes_stream();
        let mut parser = SseParser::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("event stream read error")?;
            for frame in parser.push(&chunk) {
                debug!(event = %frame.event, bytes = frame.data.len(), "stream frame");
                let _ = event_tx.send(AppEvent::StreamFrame {
                    event: frame.event,
                    data: frame.data,
                });
            }
        }

        info!("Event stream ended");
        Ok(())
    }

    /// Stop the stream connection
    pub async fn stop(&self) {
        info!("Stopping event stream connection");
        *self.shutdown.write().await = true;
    }
}

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental parser for the text/event-stream wire format.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    /// Feed a chunk, returning every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(frame) = self.flush() {
                    frames.push(frame);
                }
                continue;
            }
            if line.starts_with(':') {
                continue; // comment / keep-alive
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data_lines.push(value.to_string()),
                // id and retry are not used by the reconciler
                _ => {}
            }
        }
        frames
    }

    fn flush(&mut self) -> Option<SseFrame> {
        if self.event.is_none() && self.data_lines.is_empty() {
            return None;
        }
        let frame = SseFrame {
            event: self.event.take().unwrap_or_else(|| "message".to_string()),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        Some(frame)
    }
}
