use anyhow::{Context, Result};
use futures::stream::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::nats::{NatsClient, RecognizerResultMessage};

/// One event from the streaming recognizer.
#[derive(Debug, Clone)]
pub enum RecognitionEvent {
    /// Recognized text. Interim results (`is_final == false`) refresh engine
    /// liveness but are never accepted as segments.
    Result { text: String, is_final: bool },
    /// An engine-reported error. "no-speech" is benign and does not trigger
    /// a restart.
    Error { message: String },
}

/// The continuous, low-latency streaming recognizer.
///
/// Implementations may silently stop emitting without any termination
/// signal; callers must detect that via staleness, not via an error event.
#[async_trait::async_trait]
pub trait PrimaryRecognizer: Send + Sync {
    /// Start (or restart) recognition and return the event stream. The
    /// stream closing means the engine ended; the supervisor restarts it.
    async fn start(&self) -> Result<mpsc::Receiver<RecognitionEvent>>;

    /// Stop recognition and tear down the current stream.
    async fn stop(&self) -> Result<()>;
}

/// Primary recognizer backed by the streaming STT service on NATS.
pub struct NatsPrimaryRecognizer {
    client: Arc<NatsClient>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl NatsPrimaryRecognizer {
    pub fn new(client: Arc<NatsClient>) -> Self {
        Self {
            client,
            listener: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl PrimaryRecognizer for NatsPrimaryRecognizer {
    async fn start(&self) -> Result<mpsc::Receiver<RecognitionEvent>> {
        // Tear down any previous listener before resubscribing
        self.stop().await?;

        let mut subscriber = self
            .client
            .subscribe_recognizer()
            .await
            .context("Failed to start streaming recognizer")?;
        let channel = self.client.channel().to_string();
        let (tx, rx) = mpsc::channel(100);

        let task = tokio::spawn(async move {
            info!("Recognizer listener task started");

            while let Some(msg) = subscriber.next().await {
                let result: RecognizerResultMessage = match serde_json::from_slice(&msg.payload) {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("Failed to parse recognizer message: {}", e);
                        continue;
                    }
                };

                if result.session_id != channel {
                    continue;
                }

                let event = RecognitionEvent::Result {
                    text: result.text,
                    is_final: !result.partial,
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }

            info!("Recognizer listener task stopped");
        });

        *self.listener.lock().await = Some(task);
        Ok(rx)
    }

    async fn stop(&self) -> Result<()> {
        if let Some(task) = self.listener.lock().await.take() {
            task.abort();
        }
        Ok(())
    }
}
