use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which engine produced a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Low-latency continuous streaming recognizer.
    Primary,
    /// Buffered, chunk-based batch transcriber.
    Fallback,
}

/// Day session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayStatus {
    Active,
    Completed,
}

/// One atomic recognized span of text.
///
/// `order` is strictly increasing within the owning session and globally
/// monotonic within a day session. Segments are never renumbered except on
/// bulk replacement of a group's transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub id: String,

    /// Id of the owning speech session.
    pub session_id: String,

    /// Recognized text.
    pub content: String,

    /// Engine that produced this segment.
    pub source: EngineKind,

    /// Global order within the day session.
    pub order: u64,

    /// Milliseconds elapsed since the day session started.
    pub elapsed_ms: u64,

    /// Wall-clock time the segment was accepted.
    pub wall_clock: DateTime<Utc>,

    /// Set by the external backend collaborator once the segment is stored
    /// durably server-side.
    pub uploaded_to_backend: bool,
}

/// One continuous utterance run bounded by silence.
///
/// `end_time` is `None` iff this is the currently open session. A session
/// with zero segments is discarded, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechSession {
    pub id: String,
    pub group_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub segments: Vec<TranscriptionSegment>,
    pub order: u64,
}

/// One explicit "recording on" interval within a day session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionGroup {
    pub id: String,
    pub day_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub sessions: Vec<SpeechSession>,
    pub order: u64,
}

/// One background excursion. `end_time` is `None` until the app returns to
/// the foreground; at most one unresolved gap exists at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundGap {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Top-level aggregate spanning an entire recording day. The unit of durable
/// snapshotting and crash recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaySession {
    pub id: String,
    /// Calendar date the session started, as `YYYY-MM-DD`.
    pub start_date: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: DayStatus,
    pub session_groups: Vec<SessionGroup>,
    pub gaps: Vec<BackgroundGap>,
}

impl DaySession {
    /// Total segments across all persisted groups and sessions.
    pub fn segment_count(&self) -> usize {
        self.session_groups
            .iter()
            .flat_map(|g| &g.sessions)
            .map(|s| s.segments.len())
            .sum()
    }

    /// Total finalized speech sessions across all groups.
    pub fn session_count(&self) -> usize {
        self.session_groups.iter().map(|g| g.sessions.len()).sum()
    }

    /// All segments across the day, sorted by global order.
    pub fn flattened_segments(&self) -> Vec<TranscriptionSegment> {
        let mut segments: Vec<TranscriptionSegment> = self
            .session_groups
            .iter()
            .flat_map(|g| &g.sessions)
            .flat_map(|s| &s.segments)
            .cloned()
            .collect();
        segments.sort_by_key(|s| s.order);
        segments
    }
}

/// A replacement segment produced by re-transcribing a group's full audio,
/// with its offset from the group start.
#[derive(Debug, Clone)]
pub struct ReplacementSegment {
    pub offset_secs: f64,
    pub text: String,
}

pub(crate) fn new_entity_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}
