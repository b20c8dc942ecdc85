use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::fallback::{FallbackTranscriber, Transcription};
use super::primary::{PrimaryRecognizer, RecognitionEvent};
use crate::audio::{AudioCapture, AudioClip};
use crate::model::EngineKind;

/// Where accepted segments and interim text go. Order assignment happens
/// inside the sink, synchronously, at the moment a result is accepted.
#[async_trait::async_trait]
pub trait SegmentSink: Send + Sync {
    async fn accept(&self, text: String, source: EngineKind);
    async fn interim(&self, text: String);
}

/// Which engine is currently the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    Primary,
    Fallback,
}

/// Tuning for the failover state machine.
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Max tolerated time without any primary result before failing over.
    pub staleness_threshold: Duration,
    /// How often the liveness watchdog checks the primary engine.
    pub health_check_interval: Duration,
    /// Fixed length of fallback transcription windows.
    pub chunk_duration: Duration,
    /// How long the fallback pipeline keeps running after the primary
    /// engine recovers, to avoid losing speech in the handoff gap.
    pub transition_overlap: Duration,
    /// Retries per fallback window before its audio is dropped.
    pub upload_retries: u32,
    /// Pause before restarting a primary engine whose stream ended.
    pub restart_delay: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: Duration::from_secs(10 * 60),
            health_check_interval: Duration::from_secs(15),
            chunk_duration: Duration::from_secs(30),
            transition_overlap: Duration::from_secs(5),
            upload_retries: 2,
            restart_delay: Duration::from_millis(100),
        }
    }
}

struct EngineState {
    mode: EngineMode,
    last_primary_result: Instant,
    /// Start of the fallback window currently being buffered.
    last_chunk_boundary: Instant,
}

struct Inner {
    config: FailoverConfig,
    primary: Arc<dyn PrimaryRecognizer>,
    fallback: Arc<dyn FallbackTranscriber>,
    capture: Arc<dyn AudioCapture>,
    sink: Arc<dyn SegmentSink>,

    state: Mutex<EngineState>,
    active: AtomicBool,

    /// In-flight fallback uploads; observability only, never throttling.
    pending_uploads: AtomicUsize,
    consecutive_failures: AtomicUsize,

    event_task: Mutex<Option<JoinHandle<()>>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
    chunk_task: Mutex<Option<JoinHandle<()>>>,
}

/// The hybrid recognition failover state machine.
///
/// Starts in PRIMARY and stays there as long as the streaming recognizer
/// keeps producing results. A health-check watchdog fails over to the
/// buffered fallback pipeline when the primary goes stale; the first
/// finalized primary result brings it back, with an overlap window so no
/// speech is lost at the boundary.
pub struct HybridController {
    inner: Arc<Inner>,
}

impl HybridController {
    pub fn new(
        config: FailoverConfig,
        primary: Arc<dyn PrimaryRecognizer>,
        fallback: Arc<dyn FallbackTranscriber>,
        capture: Arc<dyn AudioCapture>,
        sink: Arc<dyn SegmentSink>,
    ) -> Self {
        let now = Instant::now();
        Self {
            inner: Arc::new(Inner {
                config,
                primary,
                fallback,
                capture,
                sink,
                state: Mutex::new(EngineState {
                    mode: EngineMode::Primary,
                    last_primary_result: now,
                    last_chunk_boundary: now,
                }),
                active: AtomicBool::new(false),
                pending_uploads: AtomicUsize::new(0),
                consecutive_failures: AtomicUsize::new(0),
                event_task: Mutex::new(None),
                health_task: Mutex::new(None),
                chunk_task: Mutex::new(None),
            }),
        }
    }

    /// Reset the clock, enter PRIMARY, start the primary engine and the
    /// health-check watchdog. Fails (with nothing left running) when the
    /// primary engine cannot be acquired.
    pub async fn start(&self) -> Result<()> {
        if self.inner.active.swap(true, Ordering::SeqCst) {
            warn!("Failover controller already started");
            return Ok(());
        }

        {
            let mut state = self.inner.state.lock().await;
            state.mode = EngineMode::Primary;
            state.last_primary_result = Instant::now();
        }
        self.inner.consecutive_failures.store(0, Ordering::SeqCst);

        let rx = match self.inner.primary.start().await {
            Ok(rx) => rx,
            Err(e) => {
                self.inner.active.store(false, Ordering::SeqCst);
                return Err(e).context("Failed to start primary recognition engine");
            }
        };

        let inner = Arc::clone(&self.inner);
        *self.inner.event_task.lock().await = Some(tokio::spawn(async move {
            Inner::run_event_loop(inner, rx).await;
        }));

        let inner = Arc::clone(&self.inner);
        *self.inner.health_task.lock().await = Some(tokio::spawn(async move {
            Inner::run_health_check(inner).await;
        }));

        info!("Failover controller started in primary mode");
        Ok(())
    }

    /// Halt both engines. When in FALLBACK, the last partial window is
    /// flushed (awaited) before this returns, so no audio is silently
    /// dropped at session end.
    pub async fn stop(&self) -> Result<()> {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(task) = self.inner.health_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.inner.event_task.lock().await.take() {
            task.abort();
        }
        if let Err(e) = self.inner.primary.stop().await {
            warn!("Failed to stop primary engine: {}", e);
        }

        let in_fallback = {
            let state = self.inner.state.lock().await;
            state.mode == EngineMode::Fallback
        };
        if in_fallback {
            // Blocking flush of whatever the current window holds
            Inner::flush_partial_window(&self.inner).await;
        }
        if let Some(task) = self.inner.chunk_task.lock().await.take() {
            task.abort();
        }

        self.inner.state.lock().await.mode = EngineMode::Primary;
        info!("Failover controller stopped");
        Ok(())
    }

    /// Tear down whichever engine is active and restart in PRIMARY. Used
    /// after a background/foreground cycle, where the primary engine's live
    /// connection cannot be trusted. Any partial fallback buffer is
    /// discarded.
    pub async fn force_restart(&self) -> Result<()> {
        info!("Forcing primary engine restart");

        if let Some(task) = self.inner.event_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.inner.health_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.inner.chunk_task.lock().await.take() {
            task.abort();
        }
        if let Err(e) = self.inner.primary.stop().await {
            warn!("Failed to stop primary engine: {}", e);
        }

        {
            let mut state = self.inner.state.lock().await;
            state.mode = EngineMode::Primary;
            state.last_primary_result = Instant::now();
        }

        if !self.inner.active.load(Ordering::SeqCst) {
            return Ok(());
        }

        let rx = self
            .inner
            .primary
            .start()
            .await
            .context("Failed to restart primary recognition engine")?;

        let inner = Arc::clone(&self.inner);
        *self.inner.event_task.lock().await = Some(tokio::spawn(async move {
            Inner::run_event_loop(inner, rx).await;
        }));
        let inner = Arc::clone(&self.inner);
        *self.inner.health_task.lock().await = Some(tokio::spawn(async move {
            Inner::run_health_check(inner).await;
        }));

        Ok(())
    }

    pub async fn mode(&self) -> EngineMode {
        self.inner.state.lock().await.mode
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn pending_uploads(&self) -> usize {
        self.inner.pending_uploads.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> usize {
        self.inner.consecutive_failures.load(Ordering::SeqCst)
    }
}

impl Inner {
    /// Supervised primary event loop: forwards results, refreshes liveness,
    /// and restarts the engine when its stream ends or reports a hard
    /// error. Silent stalls are the health check's job, not ours.
    async fn run_event_loop(inner: Arc<Inner>, mut rx: mpsc::Receiver<RecognitionEvent>) {
        loop {
            while let Some(event) = rx.recv().await {
                if !inner.active.load(Ordering::SeqCst) {
                    return;
                }
                match event {
                    RecognitionEvent::Result { text, is_final } => {
                        Inner::on_primary_result(&inner, text, is_final).await;
                    }
                    RecognitionEvent::Error { message } => {
                        if message == "no-speech" {
                            continue;
                        }
                        warn!("Primary engine error: {}, restarting", message);
                        break;
                    }
                }
            }

            if !inner.active.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(inner.config.restart_delay).await;
            if !inner.active.load(Ordering::SeqCst) {
                return;
            }

            if let Err(e) = inner.primary.stop().await {
                warn!("Failed to stop primary engine before restart: {}", e);
            }
            match inner.primary.start().await {
                Ok(new_rx) => {
                    info!("Primary engine restarted");
                    rx = new_rx;
                }
                Err(e) => {
                    error!("Primary engine restart failed: {}", e);
                    // Old receiver is closed; the outer loop paces retries
                }
            }
        }
    }

    async fn on_primary_result(inner: &Arc<Inner>, text: String, is_final: bool) {
        let recovered = {
            let mut state = inner.state.lock().await;
            state.last_primary_result = Instant::now();

            if is_final && state.mode == EngineMode::Fallback {
                state.mode = EngineMode::Primary;
                true
            } else {
                false
            }
        };

        if recovered {
            info!(
                overlap_secs = inner.config.transition_overlap.as_secs(),
                "Primary engine recovered, retiring fallback after overlap"
            );
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                Inner::retire_fallback(inner).await;
            });
        }

        if is_final {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                inner.sink.accept(trimmed.to_string(), EngineKind::Primary).await;
            }
        } else {
            inner.sink.interim(text).await;
        }
    }

    /// Liveness watchdog. The primary engine can stop emitting without any
    /// end or error callback, so staleness of its last result is the only
    /// reliable failure signal.
    async fn run_health_check(inner: Arc<Inner>) {
        let mut ticker = tokio::time::interval(inner.config.health_check_interval);
        ticker.tick().await; // first tick is immediate

        loop {
            ticker.tick().await;
            if !inner.active.load(Ordering::SeqCst) {
                return;
            }

            let missed = {
                let mut state = inner.state.lock().await;
                if state.mode != EngineMode::Primary {
                    continue;
                }
                let elapsed = state.last_primary_result.elapsed();
                if elapsed < inner.config.staleness_threshold {
                    continue;
                }
                state.mode = EngineMode::Fallback;
                state.last_chunk_boundary = Instant::now();
                elapsed
            };

            Inner::enter_fallback(&inner, missed).await;
        }
    }

    async fn enter_fallback(inner: &Arc<Inner>, missed: Duration) {
        warn!(
            missed_secs = missed.as_secs(),
            "No primary result within staleness threshold, failing over"
        );

        // Recover the missed span from the capture buffer, out-of-band
        match inner.capture.recent_clip(missed) {
            Ok(clip) if !clip.is_empty() => {
                let inner = Arc::clone(inner);
                tokio::spawn(async move {
                    Inner::upload_clip(inner, clip, "missed-span-recovery").await;
                });
            }
            Ok(_) => debug!("No buffered audio for the missed span"),
            Err(e) => warn!("Failed to slice missed-span recovery clip: {}", e),
        }

        // Continuous buffered-chunk pipeline until the primary recovers
        let chunk_loop = {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                Inner::run_chunk_loop(inner).await;
            })
        };
        if let Some(old) = inner.chunk_task.lock().await.replace(chunk_loop) {
            old.abort();
        }
    }

    /// Slice and submit one fixed-length fallback window per tick. Uploads
    /// are fire-and-forget; only the timer serializes chunk boundaries.
    async fn run_chunk_loop(inner: Arc<Inner>) {
        let mut ticker = tokio::time::interval(inner.config.chunk_duration);
        ticker.tick().await; // first tick is immediate

        loop {
            ticker.tick().await;
            if !inner.active.load(Ordering::SeqCst) {
                return;
            }

            let window = {
                let mut state = inner.state.lock().await;
                if state.mode != EngineMode::Fallback {
                    // Retired during the overlap; the flush handles the rest
                    return;
                }
                let window = state.last_chunk_boundary.elapsed();
                state.last_chunk_boundary = Instant::now();
                window
            };

            match inner.capture.recent_clip(window) {
                Ok(clip) if !clip.is_empty() => {
                    let inner = Arc::clone(&inner);
                    tokio::spawn(async move {
                        Inner::upload_clip(inner, clip, "fallback-window").await;
                    });
                }
                Ok(_) => debug!("Fallback window contained no audio"),
                Err(e) => warn!("Failed to slice fallback window: {}", e),
            }
        }
    }

    /// FALLBACK → PRIMARY teardown: keep the fallback pipeline alive for
    /// the overlap window, then flush the partial buffer and stop it.
    async fn retire_fallback(inner: Arc<Inner>) {
        tokio::time::sleep(inner.config.transition_overlap).await;

        {
            let state = inner.state.lock().await;
            if state.mode == EngineMode::Fallback {
                // Failed over again during the overlap; leave the pipeline alone
                return;
            }
        }

        Inner::flush_partial_window(&inner).await;
        if let Some(task) = inner.chunk_task.lock().await.take() {
            task.abort();
        }
        info!("Fallback pipeline retired");
    }

    /// Upload whatever audio accumulated since the last chunk boundary.
    /// Awaited by callers that must not drop the handoff-gap audio.
    async fn flush_partial_window(inner: &Arc<Inner>) {
        let window = {
            let mut state = inner.state.lock().await;
            let window = state.last_chunk_boundary.elapsed();
            state.last_chunk_boundary = Instant::now();
            window
        };
        if window.is_zero() {
            return;
        }

        match inner.capture.recent_clip(window) {
            Ok(clip) if !clip.is_empty() => {
                Inner::upload_clip(Arc::clone(inner), clip, "fallback-flush").await;
            }
            Ok(_) => debug!("Nothing to flush from the fallback buffer"),
            Err(e) => warn!("Failed to slice fallback flush clip: {}", e),
        }
    }

    /// Transcribe one clip with the retry budget and feed the result to the
    /// sink. Failures are counted and logged but never fatal: after the
    /// budget the window's audio is dropped and the pipeline carries on.
    async fn upload_clip(inner: Arc<Inner>, clip: AudioClip, label: &'static str) {
        inner.pending_uploads.fetch_add(1, Ordering::SeqCst);
        let result = Inner::try_transcribe(&inner, &clip, label).await;
        inner.pending_uploads.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(transcription) => {
                inner.consecutive_failures.store(0, Ordering::SeqCst);
                for text in transcription.texts() {
                    inner.sink.accept(text, EngineKind::Fallback).await;
                }
            }
            Err(e) => {
                let failures = inner.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    label,
                    consecutive_failures = failures,
                    clip_ms = clip.duration_ms(),
                    "Dropping fallback window after exhausting retries: {}",
                    e
                );
            }
        }
    }

    async fn try_transcribe(
        inner: &Arc<Inner>,
        clip: &AudioClip,
        label: &str,
    ) -> Result<Transcription> {
        let wav_bytes = clip.to_wav_bytes()?;
        let filename = format!("{}-{}.wav", label, chrono::Utc::now().timestamp_millis());

        let mut last_err = None;
        for attempt in 0..=inner.config.upload_retries {
            match inner
                .fallback
                .transcribe(wav_bytes.clone(), &filename)
                .await
            {
                Ok(transcription) => return Ok(transcription),
                Err(e) => {
                    warn!(attempt, label, "Fallback transcription attempt failed: {}", e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("at least one attempt was made"))
    }
}
