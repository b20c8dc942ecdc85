mod client;
mod messages;

pub use client::NatsClient;
pub use messages::{
    AudioFrameMessage, BatchSpan, BatchTranscribeRequest, BatchTranscribeResponse,
    RecognizerResultMessage,
};
