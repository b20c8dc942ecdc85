use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about the current day session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayStats {
    /// Whether a day session is active
    pub day_active: bool,

    /// Whether a session group is currently recording
    pub recording: bool,

    /// Id of the active day session, if any
    pub day_id: Option<String>,

    /// When the day session started
    pub started_at: Option<DateTime<Utc>>,

    /// Day session duration in seconds
    pub duration_secs: f64,

    /// Closed session groups so far
    pub group_count: usize,

    /// Finalized speech sessions so far
    pub session_count: usize,

    /// Accepted segments so far (including the open session)
    pub segment_count: usize,

    /// Background gaps recorded so far
    pub gap_count: usize,

    /// Which engine is currently authoritative ("primary" or "fallback")
    pub engine_mode: String,

    /// Fallback uploads currently in flight (observability only)
    pub pending_uploads: usize,

    /// Recognizer text not yet finalized into a segment
    pub interim_text: String,
}
