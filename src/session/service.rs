use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use super::stats::DayStats;
use crate::audio::AudioCapture;
use crate::engine::{
    EngineMode, FailoverConfig, FallbackTranscriber, HybridController, PrimaryRecognizer,
    SegmentSink,
};
use crate::model::{
    DayRecorder, DaySession, EngineKind, ReplacementSegment, TranscriptionSegment,
};
use crate::persist::SnapshotStore;

/// A request rejected before any engine work was attempted: the group is
/// unknown, still open, or has no buffered audio. Callers can correct and
/// retry these; they are not engine or transport failures.
#[derive(Debug)]
pub struct RejectedRequest(String);

impl RejectedRequest {
    fn new(message: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(Self(message.into()))
    }
}

impl std::fmt::Display for RejectedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for RejectedRequest {}

/// Orchestrates the day-session lifecycle: wires the failover controller
/// into the single-writer recorder, runs the silence-check and snapshot
/// timers, and keeps every mutation durably snapshotted.
pub struct DayService {
    config: SessionConfig,
    recorder: Arc<Mutex<DayRecorder>>,
    controller: HybridController,
    store: Arc<dyn SnapshotStore>,
    capture: Arc<dyn AudioCapture>,
    fallback: Arc<dyn FallbackTranscriber>,
    /// Held across every day/group transition. A failed start's rollback
    /// can then only ever stop an engine this same call started.
    transitions: Mutex<()>,
    persist_task: Mutex<Option<JoinHandle<()>>>,
    silence_task: Mutex<Option<JoinHandle<()>>>,
}

/// Sink feeding accepted engine results into the recorder. The global
/// order is assigned under the recorder lock, synchronously, so results
/// whose network calls completed out of order can never race for the same
/// order value.
struct RecorderSink {
    recorder: Arc<Mutex<DayRecorder>>,
    store: Arc<dyn SnapshotStore>,
}

#[async_trait::async_trait]
impl SegmentSink for RecorderSink {
    async fn accept(&self, text: String, source: EngineKind) {
        let snapshot = {
            let mut recorder = self.recorder.lock().await;
            match recorder.add_segment(&text, source, Utc::now()) {
                Ok(order) => {
                    debug!(order, ?source, "segment accepted");
                    recorder.snapshot()
                }
                Err(e) => {
                    debug!("dropping engine result: {}", e);
                    None
                }
            }
        };

        // Persist immediately after every segment addition
        if let Some(snapshot) = snapshot {
            if let Err(e) = self.store.put(&snapshot).await {
                warn!("Snapshot after segment failed, skipping cycle: {}", e);
            }
        }
    }

    async fn interim(&self, text: String) {
        self.recorder.lock().await.set_interim_text(text);
    }
}

impl DayService {
    pub fn new(
        config: SessionConfig,
        failover: FailoverConfig,
        primary: Arc<dyn PrimaryRecognizer>,
        fallback: Arc<dyn FallbackTranscriber>,
        capture: Arc<dyn AudioCapture>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let recorder = Arc::new(Mutex::new(DayRecorder::new()));
        let sink = Arc::new(RecorderSink {
            recorder: Arc::clone(&recorder),
            store: Arc::clone(&store),
        });
        let controller = HybridController::new(
            failover,
            primary,
            Arc::clone(&fallback),
            Arc::clone(&capture),
            sink,
        );

        Self {
            config,
            recorder,
            controller,
            store,
            capture,
            fallback,
            transitions: Mutex::new(()),
            persist_task: Mutex::new(None),
            silence_task: Mutex::new(None),
        }
    }

    /// Begin a new day session. Refuses while an unresolved recoverable
    /// snapshot exists; the caller must go through recovery first.
    pub async fn start_day(&self) -> Result<String> {
        let _transition = self.transitions.lock().await;
        {
            let recorder = self.recorder.lock().await;
            if recorder.is_day_active() {
                bail!("a day session is already active");
            }
        }
        if let Some(stale) = self.store.get_active().await? {
            bail!(
                "an unfinished day session ({}) exists; resolve recovery before starting a new day",
                stale.id
            );
        }

        let (day_id, snapshot) = {
            let mut recorder = self.recorder.lock().await;
            let day_id = recorder.start_day(Utc::now())?;
            (day_id, recorder.snapshot())
        };
        self.persist_snapshot(snapshot).await;
        self.spawn_timers().await;
        Ok(day_id)
    }

    /// Re-activate a recovered day session. Order counters are restored
    /// inside the recorder; recording stays off until the caller starts a
    /// group.
    pub async fn resume_day(&self, session: DaySession) -> Result<String> {
        let _transition = self.transitions.lock().await;
        let (day_id, snapshot) = {
            let mut recorder = self.recorder.lock().await;
            recorder.recover(session)?;
            let day_id = recorder
                .day()
                .map(|d| d.id.clone())
                .expect("recover just set the day");
            (day_id, recorder.snapshot())
        };
        self.persist_snapshot(snapshot).await;
        self.spawn_timers().await;
        info!(%day_id, "day session resumed");
        Ok(day_id)
    }

    /// End the day session, closing any open group (which flushes the
    /// fallback pipeline) and persisting the completed aggregate.
    pub async fn stop_day(&self) -> Result<DaySession> {
        let _transition = self.transitions.lock().await;
        let recording = self.recorder.lock().await.is_recording();
        if recording {
            self.stop_group_locked().await?;
        }

        if let Some(task) = self.persist_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.silence_task.lock().await.take() {
            task.abort();
        }

        let day = {
            let mut recorder = self.recorder.lock().await;
            recorder.stop_day(Utc::now())?
        };

        // Keep the completed snapshot durable until the backend collaborator
        // takes over; get_active ignores completed records.
        if let Err(e) = self.store.put(&day).await {
            warn!("Failed to persist completed day session: {}", e);
        }
        Ok(day)
    }

    /// Start a session group ("recording on") and the recognition engines.
    /// If the primary engine cannot be acquired, no group is created.
    pub async fn start_group(&self) -> Result<String> {
        let _transition = self.transitions.lock().await;
        self.recorder.lock().await.ensure_can_start_group()?;

        self.controller
            .start()
            .await
            .context("Failed to start recognition")?;

        let (group_id, snapshot) = {
            let mut recorder = self.recorder.lock().await;
            match recorder.start_group(Utc::now()) {
                Ok(group_id) => (group_id, recorder.snapshot()),
                Err(e) => {
                    drop(recorder);
                    // Roll back the engine start; no partial state remains
                    if let Err(stop_err) = self.controller.stop().await {
                        warn!("Rollback of recognition start failed: {}", stop_err);
                    }
                    return Err(e);
                }
            }
        };
        self.persist_snapshot(snapshot).await;
        Ok(group_id)
    }

    /// Stop the open session group ("recording off"). The controller stops
    /// first so a fallback flush still lands inside the closing group.
    pub async fn stop_group(&self) -> Result<()> {
        let _transition = self.transitions.lock().await;
        self.stop_group_locked().await
    }

    async fn stop_group_locked(&self) -> Result<()> {
        {
            let recorder = self.recorder.lock().await;
            if !recorder.is_recording() {
                bail!("no session group is recording");
            }
        }

        if let Err(e) = self.controller.stop().await {
            warn!("Failed to stop recognition cleanly: {}", e);
        }

        let snapshot = {
            let mut recorder = self.recorder.lock().await;
            recorder.stop_group(Utc::now())?;
            recorder.snapshot()
        };
        self.persist_snapshot(snapshot).await;
        Ok(())
    }

    /// Record a background excursion and snapshot immediately; the host may
    /// suspend us at any moment once hidden.
    pub async fn on_backgrounded(&self) {
        let snapshot = {
            let mut recorder = self.recorder.lock().await;
            recorder.on_backgrounded(Utc::now());
            recorder.snapshot()
        };
        self.persist_snapshot(snapshot).await;
    }

    /// Resolve the background gap. The primary engine's connection is
    /// assumed dead after any backgrounding, so an active recording forces
    /// an engine restart.
    pub async fn on_foregrounded(&self) {
        let (gap, recording) = {
            let mut recorder = self.recorder.lock().await;
            let gap = recorder.on_foregrounded(Utc::now());
            (gap, recorder.is_recording())
        };

        if let Some(gap) = gap {
            info!(gap_secs = gap.num_seconds(), "returned to foreground");
        }
        if recording {
            if let Err(e) = self.controller.force_restart().await {
                warn!("Engine restart after foregrounding failed: {}", e);
            }
        }
    }

    /// Re-transcribe a closed group's full audio with the fallback engine
    /// and atomically replace the group's transcript. All-or-nothing: any
    /// failure leaves the original segments unchanged.
    pub async fn retranscribe_group(&self, group_id: &str) -> Result<usize> {
        let (start, end) = {
            let recorder = self.recorder.lock().await;
            match recorder.group_span(group_id) {
                Some((start, Some(end))) => (start, end),
                Some((_, None)) => {
                    return Err(RejectedRequest::new(format!(
                        "session group {} is still open",
                        group_id
                    )))
                }
                None => {
                    return Err(RejectedRequest::new(format!(
                        "unknown session group: {}",
                        group_id
                    )))
                }
            }
        };

        let clip = self.capture.clip_range(start, end)?;
        if clip.is_empty() {
            return Err(RejectedRequest::new(format!(
                "no buffered audio covers session group {}",
                group_id
            )));
        }
        let wav_bytes = clip.to_wav_bytes()?;

        let transcription = self
            .fallback
            .transcribe(wav_bytes, &format!("{}.wav", group_id))
            .await
            .context("Group re-transcription failed")?;

        let replacements: Vec<ReplacementSegment> = if transcription.spans.is_empty() {
            transcription
                .texts()
                .into_iter()
                .map(|text| ReplacementSegment {
                    offset_secs: 0.0,
                    text,
                })
                .collect()
        } else {
            transcription
                .spans
                .iter()
                .filter(|s| !s.text.trim().is_empty())
                .map(|s| ReplacementSegment {
                    offset_secs: s.start_secs,
                    text: s.text.trim().to_string(),
                })
                .collect()
        };

        let (replaced, snapshot) = {
            let mut recorder = self.recorder.lock().await;
            let replaced = recorder.replace_group_segments(group_id, replacements)?;
            (replaced, recorder.snapshot())
        };
        self.persist_snapshot(snapshot).await;
        Ok(replaced)
    }

    /// Flag segments the external backend reports as stored.
    pub async fn mark_uploaded(&self, ids: &[String]) -> usize {
        let (marked, snapshot) = {
            let mut recorder = self.recorder.lock().await;
            let marked = recorder.mark_uploaded(ids);
            (marked, recorder.snapshot())
        };
        if marked > 0 {
            self.persist_snapshot(snapshot).await;
        }
        marked
    }

    /// Serialize and persist the current aggregate right now.
    pub async fn persist_now(&self) {
        let snapshot = self.recorder.lock().await.snapshot();
        self.persist_snapshot(snapshot).await;
    }

    pub async fn stats(&self) -> DayStats {
        let (snapshot, recording, interim) = {
            let recorder = self.recorder.lock().await;
            (
                recorder.snapshot(),
                recorder.is_recording(),
                recorder.interim_text().to_string(),
            )
        };
        let mode = match self.controller.mode().await {
            EngineMode::Primary => "primary",
            EngineMode::Fallback => "fallback",
        };

        match snapshot {
            Some(day) => DayStats {
                day_active: true,
                recording,
                duration_secs: (Utc::now() - day.start_time).num_milliseconds() as f64 / 1000.0,
                group_count: day.session_groups.len(),
                session_count: day.session_count(),
                segment_count: day.segment_count(),
                gap_count: day.gaps.len(),
                day_id: Some(day.id),
                started_at: Some(day.start_time),
                engine_mode: mode.to_string(),
                pending_uploads: self.controller.pending_uploads(),
                interim_text: interim,
            },
            None => DayStats {
                day_active: false,
                recording: false,
                day_id: None,
                started_at: None,
                duration_secs: 0.0,
                group_count: 0,
                session_count: 0,
                segment_count: 0,
                gap_count: 0,
                engine_mode: mode.to_string(),
                pending_uploads: self.controller.pending_uploads(),
                interim_text: String::new(),
            },
        }
    }

    /// Every accepted segment so far, in global order.
    pub async fn transcript(&self) -> Vec<TranscriptionSegment> {
        self.recorder.lock().await.transcript()
    }

    async fn persist_snapshot(&self, snapshot: Option<DaySession>) {
        if let Some(snapshot) = snapshot {
            if let Err(e) = self.store.put(&snapshot).await {
                warn!("Snapshot write failed, skipping cycle: {}", e);
            }
        }
    }

    async fn spawn_timers(&self) {
        let recorder = Arc::clone(&self.recorder);
        let store = Arc::clone(&self.store);
        let interval = self.config.snapshot_interval;
        let persist_loop = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = {
                    let recorder = recorder.lock().await;
                    if !recorder.is_day_active() {
                        continue;
                    }
                    recorder.snapshot()
                };
                if let Some(snapshot) = snapshot {
                    if let Err(e) = store.put(&snapshot).await {
                        warn!("Periodic snapshot failed, skipping cycle: {}", e);
                    }
                }
            }
        });
        if let Some(old) = self.persist_task.lock().await.replace(persist_loop) {
            old.abort();
        }

        let recorder = Arc::clone(&self.recorder);
        let store = Arc::clone(&self.store);
        let check_interval = self.config.silence_check_interval;
        let timeout = chrono::Duration::from_std(self.config.silence_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let silence_loop = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = {
                    let mut recorder = recorder.lock().await;
                    if recorder.check_silence(Utc::now(), timeout) {
                        recorder.snapshot()
                    } else {
                        None
                    }
                };
                if let Some(snapshot) = snapshot {
                    if let Err(e) = store.put(&snapshot).await {
                        warn!("Snapshot after silence split failed: {}", e);
                    }
                }
            }
        });
        if let Some(old) = self.silence_task.lock().await.replace(silence_loop) {
            old.abort();
        }
    }
}
