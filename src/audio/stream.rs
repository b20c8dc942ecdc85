use anyhow::Result;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::buffer::RingBuffer;
use super::frame::AudioFrame;
use crate::nats::{AudioFrameMessage, NatsClient};

/// Subscribe to the host's audio frame stream and pump decoded frames into
/// the ring buffer. Runs until the subscription closes or a final frame
/// arrives.
pub async fn spawn_frame_pump(
    client: Arc<NatsClient>,
    buffer: Arc<RingBuffer>,
) -> Result<JoinHandle<()>> {
    let mut subscriber = client.subscribe_audio_frames().await?;
    let channel = client.channel().to_string();

    let handle = tokio::spawn(async move {
        info!("Audio frame pump started");
        let mut pump_start: Option<DateTime<Utc>> = None;

        while let Some(msg) = subscriber.next().await {
            let frame_msg: AudioFrameMessage = match serde_json::from_slice(&msg.payload) {
                Ok(frame_msg) => frame_msg,
                Err(e) => {
                    warn!("Failed to parse audio frame message: {}", e);
                    continue;
                }
            };

            if frame_msg.session_id != channel {
                continue;
            }
            if frame_msg.final_frame {
                info!("Final audio frame received, stopping pump");
                break;
            }

            let pcm = match base64::engine::general_purpose::STANDARD.decode(&frame_msg.pcm) {
                Ok(pcm) => pcm,
                Err(e) => {
                    warn!("Failed to decode audio frame payload: {}", e);
                    continue;
                }
            };
            let samples: Vec<i16> = pcm
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect();

            let wall_clock = DateTime::parse_from_rfc3339(&frame_msg.timestamp)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            let start = *pump_start.get_or_insert(wall_clock);
            let timestamp_ms = (wall_clock - start).num_milliseconds().max(0) as u64;

            buffer.push_at(
                AudioFrame {
                    samples,
                    sample_rate: frame_msg.sample_rate,
                    channels: frame_msg.channels,
                    timestamp_ms,
                },
                wall_clock,
            );
        }

        info!("Audio frame pump stopped");
    });

    Ok(handle)
}
