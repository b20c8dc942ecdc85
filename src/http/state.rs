use std::sync::Arc;
use tokio::sync::mpsc;

use crate::lifecycle::VisibilityEvent;
use crate::persist::RecoveryCoordinator;
use crate::session::DayService;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The single day-session orchestrator
    pub service: Arc<DayService>,

    /// Cold-start recovery decisions
    pub recovery: Arc<RecoveryCoordinator>,

    /// Visibility signals forwarded to the lifecycle monitor
    pub lifecycle: mpsc::Sender<VisibilityEvent>,
}

impl AppState {
    pub fn new(
        service: Arc<DayService>,
        recovery: Arc<RecoveryCoordinator>,
        lifecycle: mpsc::Sender<VisibilityEvent>,
    ) -> Self {
        Self {
            service,
            recovery,
            lifecycle,
        }
    }
}
