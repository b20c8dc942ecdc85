// Integration tests for the day-session orchestrator
//
// These drive DayService end to end with mock engines and a real
// file-backed snapshot store.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};

use allday_scribe::audio::{AudioCapture, AudioClip};
use allday_scribe::engine::{
    FailoverConfig, FallbackTranscriber, PrimaryRecognizer, RecognitionEvent, Transcription,
};
use allday_scribe::model::{DayRecorder, DayStatus, EngineKind};
use allday_scribe::persist::{FileSnapshotStore, SnapshotStore};
use allday_scribe::session::{DayService, RejectedRequest, SessionConfig};

// ============================================================================
// Mocks
// ============================================================================

/// Primary engine with a scriptable failure gate: the next `fail_next`
/// start calls wait for `release` and then fail, so tests can hold a
/// caller inside engine acquisition.
struct ScriptedPrimary {
    gate: Semaphore,
    gated_failures: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    tx: Mutex<Option<mpsc::Sender<RecognitionEvent>>>,
}

impl ScriptedPrimary {
    fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            gated_failures: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            tx: Mutex::new(None),
        }
    }

    fn fail_next(&self, n: usize) {
        self.gated_failures.store(n, Ordering::SeqCst);
    }

    fn release(&self) {
        self.gate.add_permits(1);
    }

    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
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
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.gated_failures.load(Ordering::SeqCst) > 0 {
            self.gated_failures.fetch_sub(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await.expect("gate closed");
            bail!("recognizer unavailable");
        }
        let (tx, rx) = mpsc::channel(16);
        *self.tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct InertFallback;

#[async_trait::async_trait]
impl FallbackTranscriber for InertFallback {
    async fn transcribe(&self, _wav_bytes: Vec<u8>, _filename: &str) -> Result<Transcription> {
        Ok(Transcription::default())
    }
}

/// Capture buffer with nothing in it.
struct InertCapture;

impl AudioCapture for InertCapture {
    fn recent_clip(&self, _duration: Duration) -> Result<AudioClip> {
        Ok(AudioClip {
            samples: Vec::new(),
            sample_rate: 16000,
            channels: 1,
        })
    }

    fn clip_range(
        &self,
        _start: chrono::DateTime<chrono::Utc>,
        _end: chrono::DateTime<chrono::Utc>,
    ) -> Result<AudioClip> {
        self.recent_clip(Duration::from_secs(0))
    }
}

struct Fixture {
    service: Arc<DayService>,
    primary: Arc<ScriptedPrimary>,
    store: Arc<dyn SnapshotStore>,
    _dir: TempDir,
}

fn fixture() -> Result<Fixture> {
    let dir = TempDir::new()?;
    let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(dir.path())?);
    let primary = Arc::new(ScriptedPrimary::new());
    let service = Arc::new(DayService::new(
        SessionConfig::default(),
        FailoverConfig::default(),
        Arc::clone(&primary) as Arc<dyn PrimaryRecognizer>,
        Arc::new(InertFallback) as Arc<dyn FallbackTranscriber>,
        Arc::new(InertCapture) as Arc<dyn AudioCapture>,
        Arc::clone(&store),
    ));
    Ok(Fixture {
        service,
        primary,
        store,
        _dir: dir,
    })
}

/// Poll until the transcript reaches `count` segments; sink and snapshot
/// work happen on spawned tasks.
async fn wait_for_segments(service: &DayService, count: usize) {
    for _ in 0..200 {
        if service.transcript().await.len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("transcript never reached {} segments", count);
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_start_day_refuses_with_unresolved_snapshot() -> Result<()> {
    let f = fixture()?;

    // A stale active snapshot from a previous run sits in the store
    let mut recorder = DayRecorder::new();
    recorder.start_day(chrono::Utc::now())?;
    let stale = recorder.snapshot().expect("day is active");
    f.store.put(&stale).await?;

    assert!(
        f.service.start_day().await.is_err(),
        "recovery must be resolved before a new day starts"
    );

    f.store.delete(&stale.id).await?;
    let day_id = f.service.start_day().await?;
    assert!(f.service.stats().await.day_active);
    assert_ne!(day_id, stale.id);

    Ok(())
}

#[tokio::test]
async fn test_start_group_failure_leaves_nothing_partially_started() -> Result<()> {
    let f = fixture()?;
    f.service.start_day().await?;

    // Engine acquisition fails outright (gate pre-released, no blocking)
    f.primary.fail_next(1);
    f.primary.release();
    assert!(f.service.start_group().await.is_err());

    let stats = f.service.stats().await;
    assert!(stats.day_active);
    assert!(!stats.recording, "no group may exist without recognition");
    assert_eq!(stats.group_count, 0);

    // The next attempt starts cleanly
    f.service.start_group().await?;
    assert!(f.service.stats().await.recording);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_start_group_failure_cannot_stop_winner() -> Result<()> {
    let f = fixture()?;
    f.service.start_day().await?;

    // Caller A is held inside engine acquisition, which will then fail
    f.primary.fail_next(1);
    let service = Arc::clone(&f.service);
    let caller_a = tokio::spawn(async move { service.start_group().await });
    while f.primary.starts() == 0 {
        tokio::task::yield_now().await;
    }

    // Caller B arrives while A is mid-start
    let service = Arc::clone(&f.service);
    let caller_b = tokio::spawn(async move { service.start_group().await });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    f.primary.release();
    let first = caller_a.await?;
    let second = caller_b.await?;

    assert!(first.is_err(), "the gated acquisition fails");
    second.expect("the second caller starts cleanly after the failure");

    // The winner's group is recording with a live engine behind it
    let stats = f.service.stats().await;
    assert!(stats.recording);
    assert_eq!(
        f.primary.stops(),
        0,
        "the failed caller must not tear down the winner's engine"
    );
    assert_eq!(f.primary.starts(), 2);

    Ok(())
}

#[tokio::test]
async fn test_accepted_segment_is_snapshotted_immediately() -> Result<()> {
    let f = fixture()?;
    f.service.start_day().await?;
    f.service.start_group().await?;

    f.primary
        .emit(RecognitionEvent::Result {
            text: "hello from primary".to_string(),
            is_final: true,
        })
        .await;
    wait_for_segments(&f.service, 1).await;

    let transcript = f.service.transcript().await;
    assert_eq!(transcript[0].content, "hello from primary");
    assert_eq!(transcript[0].source, EngineKind::Primary);

    // The per-segment snapshot lands without waiting for the timer
    let mut persisted = 0;
    for _ in 0..200 {
        persisted = f
            .store
            .get_active()
            .await?
            .map(|d| d.segment_count())
            .unwrap_or(0);
        if persisted == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(persisted, 1);

    Ok(())
}

#[tokio::test]
async fn test_stop_day_persists_completed_snapshot() -> Result<()> {
    let f = fixture()?;
    f.service.start_day().await?;
    f.service.start_group().await?;
    f.primary
        .emit(RecognitionEvent::Result {
            text: "kept".to_string(),
            is_final: true,
        })
        .await;
    wait_for_segments(&f.service, 1).await;

    // Day ends while still recording; the open group is folded in
    let day = f.service.stop_day().await?;
    assert_eq!(day.status, DayStatus::Completed);
    assert_eq!(day.segment_count(), 1);
    assert!(f.primary.stops() >= 1, "recognition stops with the group");

    let stats = f.service.stats().await;
    assert!(!stats.day_active);
    assert!(!stats.recording);

    // The completed record stays durable but is invisible to recovery
    assert!(f.store.get_active().await?.is_none());
    assert_eq!(f.store.get_by_date(&day.start_date).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_retranscribe_preconditions_are_rejections() -> Result<()> {
    let f = fixture()?;
    f.service.start_day().await?;

    let err = f
        .service
        .retranscribe_group("group-missing")
        .await
        .unwrap_err();
    assert!(
        err.downcast_ref::<RejectedRequest>().is_some(),
        "unknown group is a caller mistake, not an engine failure"
    );

    let group_id = f.service.start_group().await?;
    let err = f.service.retranscribe_group(&group_id).await.unwrap_err();
    assert!(
        err.downcast_ref::<RejectedRequest>().is_some(),
        "an open group cannot be re-transcribed yet"
    );

    f.service.stop_group().await?;
    let err = f.service.retranscribe_group(&group_id).await.unwrap_err();
    assert!(
        err.downcast_ref::<RejectedRequest>().is_some(),
        "a group with no buffered audio is rejected before any engine work"
    );

    Ok(())
}
