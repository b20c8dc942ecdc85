use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::model::{DaySession, DayStatus};

/// Durable key-value persistence for day-session snapshots.
///
/// Supports lookup by status (the single active record) and by date. The
/// store enforces that at most one snapshot is `active` at a time.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Upsert the full serialized aggregate, keyed by day-session id.
    async fn put(&self, session: &DaySession) -> Result<()>;

    /// The single snapshot whose status is `active`, if any.
    async fn get_active(&self) -> Result<Option<DaySession>>;

    /// All snapshots whose start date matches `date` (`YYYY-MM-DD`).
    async fn get_by_date(&self, date: &str) -> Result<Vec<DaySession>>;

    /// Remove a snapshot once its session is finalized, discarded, or
    /// recovered elsewhere.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Snapshot store writing one JSON file per day session.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create snapshot directory: {:?}", dir))?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn load_all(&self) -> Result<Vec<DaySession>> {
        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .context("Failed to read snapshot directory")?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Failed to read snapshot {:?}: {}", path, e);
                    continue;
                }
            };
            match serde_json::from_slice::<DaySession>(&bytes) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!("Skipping unreadable snapshot {:?}: {}", path, e),
            }
        }

        Ok(sessions)
    }
}

#[async_trait::async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn put(&self, session: &DaySession) -> Result<()> {
        if session.status == DayStatus::Active {
            let conflicting = self
                .load_all()
                .await?
                .into_iter()
                .any(|s| s.status == DayStatus::Active && s.id != session.id);
            if conflicting {
                bail!("another active day session snapshot already exists");
            }
        }

        let bytes = serde_json::to_vec_pretty(session)?;
        let path = self.path_for(&session.id);

        // Write-then-rename so a crash mid-write never truncates the
        // previous snapshot.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("Failed to write snapshot: {:?}", tmp))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to commit snapshot: {:?}", path))?;

        debug!(day_id = %session.id, bytes = bytes.len(), "snapshot persisted");
        Ok(())
    }

    async fn get_active(&self) -> Result<Option<DaySession>> {
        let mut active: Vec<DaySession> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|s| s.status == DayStatus::Active)
            .collect();

        if active.len() > 1 {
            warn!(
                count = active.len(),
                "multiple active snapshots found, using the most recent"
            );
        }
        active.sort_by_key(|s| s.start_time);
        Ok(active.pop())
    }

    async fn get_by_date(&self, date: &str) -> Result<Vec<DaySession>> {
        let mut sessions: Vec<DaySession> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|s| s.start_date == date)
            .collect();
        sessions.sort_by_key(|s| s.start_time);
        Ok(sessions)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete snapshot: {:?}", path)),
        }
    }
}
