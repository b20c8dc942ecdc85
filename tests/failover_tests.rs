// Tests for the hybrid failover state machine
//
// The controller keeps time with tokio's clock, so these run under
// start_paused and advance virtual time instead of sleeping for real.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use allday_scribe::audio::{AudioCapture, AudioClip};
use allday_scribe::engine::{
    EngineMode, FailoverConfig, FallbackTranscriber, HybridController, PrimaryRecognizer,
    RecognitionEvent, SegmentSink, Transcription,
};
use allday_scribe::model::EngineKind;

// ============================================================================
// Mocks
// ============================================================================

/// Primary engine driven by the test through an injected sender. Never
/// emits on its own; the sender is kept alive so the stream stays open.
struct ScriptedPrimary {
    tx: Mutex<Option<mpsc::Sender<RecognitionEvent>>>,
    fail_start: AtomicBool,
    starts: AtomicUsize,
}

impl ScriptedPrimary {
    fn new() -> Self {
        Self {
            tx: Mutex::new(None),
            fail_start: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
        }
    }

    async fn emit(&self, event: RecognitionEvent) {
        let tx = self
            .tx
            .lock()
            .unwrap()
            .clone()
            .expect("primary not started");
        tx.send(event).await.expect("event loop dropped receiver");
    }
}

#[async_trait::async_trait]
impl PrimaryRecognizer for ScriptedPrimary {
    async fn start(&self) -> Result<mpsc::Receiver<RecognitionEvent>> {
        if self.fail_start.load(Ordering::SeqCst) {
            bail!("recognizer unavailable");
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        *self.tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Capture buffer returning a fixed one-second clip; records every
/// requested window length.
struct FixedCapture {
    requests: Mutex<Vec<Duration>>,
}

impl FixedCapture {
    fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requested(&self) -> Vec<Duration> {
        self.requests.lock().unwrap().clone()
    }
}

impl AudioCapture for FixedCapture {
    fn recent_clip(&self, duration: Duration) -> Result<AudioClip> {
        self.requests.lock().unwrap().push(duration);
        Ok(AudioClip {
            samples: vec![0i16; 16000],
            sample_rate: 16000,
            channels: 1,
        })
    }

    fn clip_range(
        &self,
        _start: chrono::DateTime<chrono::Utc>,
        _end: chrono::DateTime<chrono::Utc>,
    ) -> Result<AudioClip> {
        self.recent_clip(Duration::from_secs(1))
    }
}

/// Fallback engine that succeeds with a canned text, or fails every call.
struct CannedFallback {
    text: &'static str,
    fail: bool,
    calls: AtomicUsize,
}

impl CannedFallback {
    fn ok(text: &'static str) -> Self {
        Self {
            text,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            text: "",
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FallbackTranscriber for CannedFallback {
    async fn transcribe(&self, _wav_bytes: Vec<u8>, _filename: &str) -> Result<Transcription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("batch service unreachable");
        }
        Ok(Transcription {
            text: self.text.to_string(),
            spans: Vec::new(),
        })
    }
}

#[derive(Default)]
struct CollectingSink {
    accepted: Mutex<Vec<(String, EngineKind)>>,
    interim: Mutex<Vec<String>>,
}

impl CollectingSink {
    fn accepted(&self) -> Vec<(String, EngineKind)> {
        self.accepted.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SegmentSink for CollectingSink {
    async fn accept(&self, text: String, source: EngineKind) {
        self.accepted.lock().unwrap().push((text, source));
    }

    async fn interim(&self, text: String) {
        self.interim.lock().unwrap().push(text);
    }
}

fn test_config() -> FailoverConfig {
    FailoverConfig {
        staleness_threshold: Duration::from_secs(10),
        health_check_interval: Duration::from_secs(1),
        chunk_duration: Duration::from_secs(30),
        transition_overlap: Duration::from_secs(5),
        upload_retries: 2,
        restart_delay: Duration::from_millis(100),
    }
}

struct Fixture {
    controller: HybridController,
    primary: Arc<ScriptedPrimary>,
    fallback: Arc<CannedFallback>,
    capture: Arc<FixedCapture>,
    sink: Arc<CollectingSink>,
}

fn fixture(fallback: CannedFallback) -> Fixture {
    let primary = Arc::new(ScriptedPrimary::new());
    let fallback = Arc::new(fallback);
    let capture = Arc::new(FixedCapture::new());
    let sink = Arc::new(CollectingSink::default());
    let controller = HybridController::new(
        test_config(),
        Arc::clone(&primary) as Arc<dyn PrimaryRecognizer>,
        Arc::clone(&fallback) as Arc<dyn FallbackTranscriber>,
        Arc::clone(&capture) as Arc<dyn AudioCapture>,
        Arc::clone(&sink) as Arc<dyn SegmentSink>,
    );
    Fixture {
        controller,
        primary,
        fallback,
        capture,
        sink,
    }
}

/// Let spawned tasks run to their next await point.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_starts_in_primary_mode() -> Result<()> {
    let f = fixture(CannedFallback::ok("unused"));
    f.controller.start().await?;

    assert!(f.controller.is_active());
    assert_eq!(f.controller.mode().await, EngineMode::Primary);
    assert_eq!(f.primary.starts.load(Ordering::SeqCst), 1);

    f.controller.stop().await?;
    assert!(!f.controller.is_active());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_leaves_controller_inactive() {
    let f = fixture(CannedFallback::ok("unused"));
    f.primary.fail_start.store(true, Ordering::SeqCst);

    assert!(f.controller.start().await.is_err());
    assert!(!f.controller.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_staleness_triggers_failover_and_missed_span_recovery() -> Result<()> {
    let f = fixture(CannedFallback::ok("recovered speech"));
    f.controller.start().await?;

    // Just under the threshold: still primary
    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(f.controller.mode().await, EngineMode::Primary);

    // Cross the threshold and let the watchdog fire
    tokio::time::sleep(Duration::from_secs(3)).await;
    settle().await;
    assert_eq!(f.controller.mode().await, EngineMode::Fallback);

    // The whole missed span was sliced from the buffer and transcribed
    let requested = f.capture.requested();
    assert!(
        requested.iter().any(|d| *d >= Duration::from_secs(10)),
        "missed-span clip should cover at least the staleness threshold, got {:?}",
        requested
    );
    assert_eq!(
        f.sink.accepted(),
        vec![("recovered speech".to_string(), EngineKind::Fallback)]
    );

    f.controller.stop().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_fallback_chunks_on_schedule() -> Result<()> {
    let f = fixture(CannedFallback::ok("chunk text"));
    f.controller.start().await?;

    // Enter fallback
    tokio::time::sleep(Duration::from_secs(12)).await;
    settle().await;
    assert_eq!(f.controller.mode().await, EngineMode::Fallback);
    let after_entry = f.fallback.calls();

    // Two full chunk windows elapse
    tokio::time::sleep(Duration::from_secs(61)).await;
    settle().await;

    assert_eq!(
        f.fallback.calls(),
        after_entry + 2,
        "one batch upload per elapsed chunk window"
    );

    f.controller.stop().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_final_primary_result_recovers_with_overlap() -> Result<()> {
    let f = fixture(CannedFallback::ok("tail text"));
    f.controller.start().await?;

    tokio::time::sleep(Duration::from_secs(12)).await;
    settle().await;
    assert_eq!(f.controller.mode().await, EngineMode::Fallback);
    let calls_in_fallback = f.fallback.calls();

    // The primary comes back with a finalized result
    f.primary
        .emit(RecognitionEvent::Result {
            text: "primary is back".to_string(),
            is_final: true,
        })
        .await;
    settle().await;

    // Authority flips immediately
    assert_eq!(f.controller.mode().await, EngineMode::Primary);
    assert!(f
        .sink
        .accepted()
        .contains(&("primary is back".to_string(), EngineKind::Primary)));

    // The fallback pipeline keeps the overlap window, then flushes its
    // partial buffer exactly once
    tokio::time::sleep(Duration::from_secs(6)).await;
    settle().await;
    assert_eq!(f.fallback.calls(), calls_in_fallback + 1);

    // No further fallback uploads after retirement, as long as the
    // primary stays live
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(5)).await;
        f.primary
            .emit(RecognitionEvent::Result {
                text: "still here".to_string(),
                is_final: false,
            })
            .await;
        settle().await;
    }
    assert_eq!(f.fallback.calls(), calls_in_fallback + 1);
    assert_eq!(f.controller.mode().await, EngineMode::Primary);

    f.controller.stop().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_interim_results_refresh_liveness_but_are_not_accepted() -> Result<()> {
    let f = fixture(CannedFallback::ok("unused"));
    f.controller.start().await?;

    // Keep emitting interim results past the staleness threshold
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_secs(5)).await;
        f.primary
            .emit(RecognitionEvent::Result {
                text: "thinking...".to_string(),
                is_final: false,
            })
            .await;
        settle().await;
    }

    assert_eq!(f.controller.mode().await, EngineMode::Primary);
    assert!(f.sink.accepted().is_empty(), "interim text is never a segment");
    assert!(!f.sink.interim.lock().unwrap().is_empty());

    f.controller.stop().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_upload_retry_budget_then_drop() -> Result<()> {
    let f = fixture(CannedFallback::failing());
    f.controller.start().await?;

    tokio::time::sleep(Duration::from_secs(12)).await;
    settle().await;

    // The missed-span recovery clip burns one attempt plus two retries
    assert_eq!(f.fallback.calls(), 3);
    assert_eq!(f.controller.consecutive_failures(), 1);
    assert!(f.sink.accepted().is_empty(), "failed windows produce no segments");
    assert_eq!(f.controller.pending_uploads(), 0);

    f.controller.stop().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_in_fallback_flushes_partial_window() -> Result<()> {
    let f = fixture(CannedFallback::ok("flushed tail"));
    f.controller.start().await?;

    tokio::time::sleep(Duration::from_secs(12)).await;
    settle().await;
    assert_eq!(f.controller.mode().await, EngineMode::Fallback);
    let before = f.fallback.calls();

    // Partway into a chunk window, recording stops
    tokio::time::sleep(Duration::from_secs(7)).await;
    f.controller.stop().await?;

    assert_eq!(f.fallback.calls(), before + 1, "stop flushes the partial window");
    assert!(f
        .sink
        .accepted()
        .contains(&("flushed tail".to_string(), EngineKind::Fallback)));
    assert_eq!(f.controller.mode().await, EngineMode::Primary);
    assert!(!f.controller.is_active());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_force_restart_returns_to_primary() -> Result<()> {
    let f = fixture(CannedFallback::ok("unused"));
    f.controller.start().await?;

    tokio::time::sleep(Duration::from_secs(12)).await;
    settle().await;
    assert_eq!(f.controller.mode().await, EngineMode::Fallback);

    f.controller.force_restart().await?;
    settle().await;

    assert_eq!(f.controller.mode().await, EngineMode::Primary);
    assert!(f.controller.is_active());
    assert!(
        f.primary.starts.load(Ordering::SeqCst) >= 2,
        "restart re-acquires the primary engine"
    );

    // The liveness clock was reset; no immediate re-failover
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(f.controller.mode().await, EngineMode::Primary);

    f.controller.stop().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_blank_final_results_are_dropped() -> Result<()> {
    let f = fixture(CannedFallback::ok("unused"));
    f.controller.start().await?;

    f.primary
        .emit(RecognitionEvent::Result {
            text: "   ".to_string(),
            is_final: true,
        })
        .await;
    f.primary
        .emit(RecognitionEvent::Result {
            text: " kept ".to_string(),
            is_final: true,
        })
        .await;
    settle().await;

    assert_eq!(
        f.sink.accepted(),
        vec![("kept".to_string(), EngineKind::Primary)]
    );

    f.controller.stop().await?;
    Ok(())
}
