//! Background lifecycle monitoring
//!
//! The host delivers a binary visibility signal. Going hidden opens a
//! background gap and forces an out-of-band snapshot; coming back resolves
//! the gap and, if recording was active, restarts the primary engine (its
//! live connection cannot be trusted after the host may have suspended
//! timers and sockets).

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::session::DayService;

/// Binary visibility transition reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityEvent {
    Hidden,
    Visible,
}

/// Tracks the single "backgrounded since" timestamp and drives the day
/// service on transitions.
pub struct LifecycleMonitor {
    service: Arc<DayService>,
    backgrounded_at: Option<Instant>,
}

impl LifecycleMonitor {
    pub fn new(service: Arc<DayService>) -> Self {
        Self {
            service,
            backgrounded_at: None,
        }
    }

    pub async fn handle(&mut self, event: VisibilityEvent) {
        match event {
            VisibilityEvent::Hidden => {
                if self.backgrounded_at.is_some() {
                    warn!("hidden signal while already backgrounded, ignoring");
                    return;
                }
                self.backgrounded_at = Some(Instant::now());
                info!("app backgrounded");
                self.service.on_backgrounded().await;
            }
            VisibilityEvent::Visible => {
                match self.backgrounded_at.take() {
                    Some(since) => {
                        debug!(gap_ms = since.elapsed().as_millis() as u64, "app foregrounded");
                    }
                    None => debug!("visible signal without a preceding hidden, resolving anyway"),
                }
                self.service.on_foregrounded().await;
            }
        }
    }

    /// Drain visibility events until the channel closes.
    pub async fn run(mut self, mut events: mpsc::Receiver<VisibilityEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        debug!("lifecycle monitor stopped");
    }
}
