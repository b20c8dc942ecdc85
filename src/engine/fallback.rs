use anyhow::Result;
use std::sync::Arc;

use crate::nats::NatsClient;

/// One time-aligned span within a fallback transcription result.
#[derive(Debug, Clone)]
pub struct TranscribedSpan {
    /// Offset from the start of the submitted clip, in seconds.
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
}

/// Result of transcribing one audio clip.
#[derive(Debug, Clone, Default)]
pub struct Transcription {
    pub text: String,
    pub spans: Vec<TranscribedSpan>,
}

impl Transcription {
    /// The span texts in order, or the whole text when the engine returned
    /// no span breakdown. Empty strings are dropped.
    pub fn texts(&self) -> Vec<String> {
        let mut texts: Vec<String> = self
            .spans
            .iter()
            .map(|s| s.text.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if texts.is_empty() {
            let whole = self.text.trim();
            if !whole.is_empty() {
                texts.push(whole.to_string());
            }
        }
        texts
    }
}

/// The buffered, higher-accuracy batch transcription engine.
#[async_trait::async_trait]
pub trait FallbackTranscriber: Send + Sync {
    /// Transcribe a self-contained WAV clip. Fails with a transport error
    /// when the service is unreachable.
    async fn transcribe(&self, wav_bytes: Vec<u8>, filename: &str) -> Result<Transcription>;
}

/// Fallback transcriber backed by the batch STT service on NATS.
pub struct NatsFallbackTranscriber {
    client: Arc<NatsClient>,
}

impl NatsFallbackTranscriber {
    pub fn new(client: Arc<NatsClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl FallbackTranscriber for NatsFallbackTranscriber {
    async fn transcribe(&self, wav_bytes: Vec<u8>, filename: &str) -> Result<Transcription> {
        let response = self.client.transcribe_batch(&wav_bytes, filename).await?;

        Ok(Transcription {
            text: response.text,
            spans: response
                .segments
                .into_iter()
                .map(|s| TranscribedSpan {
                    start_secs: s.start,
                    end_secs: s.end,
                    text: s.text,
                })
                .collect(),
        })
    }
}
