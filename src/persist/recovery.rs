use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::store::SnapshotStore;
use crate::model::DaySession;

/// What the caller sees about a resumable session before deciding.
#[derive(Debug, Clone, Serialize)]
pub struct RecoverySummary {
    pub day_id: String,
    pub start_date: String,
    pub started_at: DateTime<Utc>,
    pub group_count: usize,
    pub session_count: usize,
    pub segment_count: usize,
}

impl RecoverySummary {
    fn of(session: &DaySession) -> Self {
        Self {
            day_id: session.id.clone(),
            start_date: session.start_date.clone(),
            started_at: session.start_time,
            group_count: session.session_groups.len(),
            session_count: session.session_count(),
            segment_count: session.segment_count(),
        }
    }
}

/// Cold-start recovery: finds the single unfinished day session and holds
/// it until the caller decides to resume, discard, or start fresh. Never
/// auto-resumes.
pub struct RecoveryCoordinator {
    store: Arc<dyn SnapshotStore>,
    pending: Mutex<Option<DaySession>>,
}

impl RecoveryCoordinator {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            pending: Mutex::new(None),
        }
    }

    /// Query the store for an unfinished session and surface its summary.
    pub async fn check(&self) -> Result<Option<RecoverySummary>> {
        let active = self.store.get_active().await?;
        let summary = active.as_ref().map(RecoverySummary::of);

        if let Some(summary) = &summary {
            info!(
                day_id = %summary.day_id,
                segments = summary.segment_count,
                "recoverable day session found"
            );
        }

        *self.pending.lock().await = active;
        Ok(summary)
    }

    /// Summary of the currently pending recoverable session, if any.
    pub async fn pending(&self) -> Option<RecoverySummary> {
        self.pending.lock().await.as_ref().map(RecoverySummary::of)
    }

    /// Hand the pending session to the caller for re-activation. The
    /// snapshot stays in the store; the resumed session keeps persisting
    /// under the same id.
    pub async fn resume(&self) -> Result<DaySession> {
        match self.pending.lock().await.take() {
            Some(session) => Ok(session),
            None => bail!("no recoverable day session"),
        }
    }

    /// Inspecting the pending session and deciding against it: delete the
    /// snapshot.
    pub async fn discard(&self) -> Result<()> {
        let session = match self.pending.lock().await.take() {
            Some(session) => session,
            None => bail!("no recoverable day session"),
        };
        self.store.delete(&session.id).await?;
        info!(day_id = %session.id, "recoverable day session discarded");
        Ok(())
    }

    /// Delete whatever unfinished snapshot exists without inspecting its
    /// content.
    pub async fn start_fresh(&self) -> Result<()> {
        self.pending.lock().await.take();
        if let Some(active) = self.store.get_active().await? {
            self.store.delete(&active.id).await?;
            info!(day_id = %active.id, "stale day session cleared for a fresh start");
        }
        Ok(())
    }
}
