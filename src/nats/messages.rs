use serde::{Deserialize, Serialize};

/// Audio frame published by the host capture pipeline.
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    pub session_id: String,
    pub pcm: String, // Base64-encoded PCM bytes (i16 LE, interleaved)
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: String, // RFC3339 timestamp
    pub sequence: u32,
    #[serde(rename = "final")]
    pub final_frame: bool,
}

/// Streaming recognizer result received from the primary STT service.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecognizerResultMessage {
    pub session_id: String,
    pub text: String,
    pub partial: bool,
    pub timestamp: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Request sent to the batch transcription service.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchTranscribeRequest {
    pub session_id: String,
    pub filename: String,
    pub audio: String, // Base64-encoded WAV bytes
}

/// One time-aligned span in a batch transcription result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSpan {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Reply from the batch transcription service.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchTranscribeResponse {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub segments: Vec<BatchSpan>,
    #[serde(default)]
    pub error: Option<String>,
}
