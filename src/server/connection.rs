use super::AppState;
use crate::compositing::Mode;
use crate::processor::FrameTimings;
use crate::protocol::{Inbound, ServerMessage};
use axum::extract::ws::{Message, WebSocket};
use std::time::{Duration, Instant};

/// Rolling per-connection timings, logged every `interval` frames
#[derive(Debug)]
pub struct ConnectionStats {
    interval: u64,
    frames: u64,
    dropped: u64,
    total_decode: Duration,
    total_process: Duration,
    total_encode: Duration,
}

impl ConnectionStats {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            frames: 0,
            dropped: 0,
            total_decode: Duration::ZERO,
            total_process: Duration::ZERO,
            total_encode: Duration::ZERO,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn record_dropped(&mut self) {
        self.dropped += 1;
    }

    /// Add one frame; returns true when a stats line was logged
    pub fn record(&mut self, timings: &FrameTimings) -> bool {
        self.frames += 1;
        self.total_decode += timings.decode;
        self.total_process += timings.process;
        self.total_encode += timings.encode;

        if self.frames % self.interval != 0 {
            return false;
        }

        let frames = self.frames as f64;
        let avg_decode_ms = self.total_decode.as_secs_f64() * 1000.0 / frames;
        let avg_process_ms = self.total_process.as_secs_f64() * 1000.0 / frames;
        let avg_encode_ms = self.total_encode.as_secs_f64() * 1000.0 / frames;
        let total_ms = avg_decode_ms + avg_process_ms + avg_encode_ms;
        let fps = if total_ms > 0.0 { 1000.0 / total_ms } else { 0.0 };

        tracing::info!(
            "Frame {}: decode={:.1}ms, process={:.1}ms, encode={:.1}ms, total={:.1}ms, fps={:.1}, dropped={}",
            self.frames,
            avg_decode_ms,
            avg_process_ms,
            avg_encode_ms,
            total_ms,
            fps,
            self.dropped
        );
        true
    }
}

async fn send_text(socket: &mut WebSocket, message: ServerMessage) -> bool {
    match socket.send(Message::Text(message.to_json())).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to send {:?}: {}", message, e);
            false
        }
    }
}

/// Apply a requested mode; returns true when the mode changed
///
/// Frames repeat their mode, so nothing is logged unless it changes.
fn switch_mode(current: &mut Mode, requested: &str) -> bool {
    let known = Mode::parse_known(requested);
    let mode = known.unwrap_or_default();
    if mode == *current {
        return false;
    }

    if known.is_none() {
        tracing::warn!("Unrecognized mode '{}', using original frame", requested);
    }
    tracing::info!("Changing mode from '{}' to '{}'", current, mode);
    *current = mode;
    true
}

/// Per-connection protocol loop
pub async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let connected_at = Instant::now();
    tracing::info!("WebSocket connection established");

    if !send_text(&mut socket, ServerMessage::ConnectionEstablished).await {
        return;
    }

    let mut mode = Mode::None;
    let mut stats = ConnectionStats::new(state.config.stats_interval);

    while let Some(message) = socket.recv().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                tracing::info!("Client disconnected");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
        };

        let inbound = match Inbound::parse(&text) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::warn!("Dropping message: {}", e);
                stats.record_dropped();
                continue;
            }
        };

        match inbound {
            Inbound::Ping => {
                tracing::debug!("Received ping, sending pong");
                if !send_text(&mut socket, ServerMessage::Pong).await {
                    break;
                }
            }
            Inbound::ModeChange(requested) => {
                switch_mode(&mut mode, &requested);
                let ack = ServerMessage::ModeChangeAck {
                    mode: mode.as_str().to_string(),
                };
                if !send_text(&mut socket, ack).await {
                    break;
                }
            }
            Inbound::Frame {
                mode: requested,
                image,
            } => {
                if let Some(requested) = requested {
                    switch_mode(&mut mode, &requested);
                }

                // Model and image work are CPU-bound
                let processor = state.processor.clone();
                let current = mode;
                let result =
                    tokio::task::spawn_blocking(move || processor.handle_frame(&image, current))
                        .await;

                let output = match result {
                    Ok(Ok(output)) => output,
                    Ok(Err(e)) => {
                        tracing::warn!("Dropping frame: {}", e);
                        stats.record_dropped();
                        continue;
                    }
                    Err(e) => {
                        tracing::error!("Frame task failed: {}", e);
                        stats.record_dropped();
                        continue;
                    }
                };

                stats.record(&output.timings);
                if let Err(e) = socket.send(Message::Binary(output.packet)).await {
                    tracing::warn!("Failed to send frame: {}", e);
                    break;
                }
            }
        }
    }

    tracing::info!(
        "Closing WebSocket connection after {:.1}s ({} frames, {} dropped)",
        connected_at.elapsed().as_secs_f64(),
        stats.frames(),
        stats.dropped()
    );
}
