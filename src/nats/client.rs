use anyhow::{bail, Context, Result};
use async_nats::Client;
use base64::Engine;
use std::time::Duration;
use tracing::info;

use super::messages::{BatchTranscribeRequest, BatchTranscribeResponse};

/// How long to wait for a batch transcription reply before treating the
/// request as failed. Batch windows are ~30s of audio, so the service may
/// legitimately take a while.
const BATCH_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct NatsClient {
    client: Client,
    channel: String,
}

impl NatsClient {
    /// Connect to NATS server. The channel identifier is shared with the
    /// host capture pipeline and the recognizer; every message carries it
    /// so multiple capture sources can coexist on one broker.
    pub async fn connect(url: &str, channel: String) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self { client, channel })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Subscribe to streaming recognizer results (partial and final).
    ///
    /// The STT service publishes to stt.text.partial and stt.text.final;
    /// messages are filtered by session_id in the payload.
    pub async fn subscribe_recognizer(&self) -> Result<async_nats::Subscriber> {
        let subject = "stt.text.>";

        info!("Subscribing to recognizer results on {}", subject);

        let subscriber = self
            .client
            .subscribe(subject)
            .await
            .context("Failed to subscribe to recognizer results")?;

        Ok(subscriber)
    }

    /// Subscribe to raw audio frames published by the host capture pipeline.
    pub async fn subscribe_audio_frames(&self) -> Result<async_nats::Subscriber> {
        let subject = format!("audio.frame.{}", self.channel);

        info!("Subscribing to audio frames on {}", subject);

        let subscriber = self
            .client
            .subscribe(subject)
            .await
            .context("Failed to subscribe to audio frames")?;

        Ok(subscriber)
    }

    /// Request a one-shot batch transcription of a WAV clip.
    pub async fn transcribe_batch(
        &self,
        wav_bytes: &[u8],
        filename: &str,
    ) -> Result<BatchTranscribeResponse> {
        let subject = "stt.batch.transcribe";

        let request = BatchTranscribeRequest {
            session_id: self.channel.clone(),
            filename: filename.to_string(),
            audio: base64::engine::general_purpose::STANDARD.encode(wav_bytes),
        };
        let payload = serde_json::to_vec(&request)?;

        let reply = tokio::time::timeout(
            BATCH_REQUEST_TIMEOUT,
            self.client.request(subject, payload.into()),
        )
        .await
        .context("Batch transcription request timed out")?
        .context("Batch transcription request failed")?;

        let response: BatchTranscribeResponse = serde_json::from_slice(&reply.payload)
            .context("Failed to parse batch transcription reply")?;

        if let Some(error) = response.error {
            bail!("Batch transcription service error: {}", error);
        }

        Ok(response)
    }
}
