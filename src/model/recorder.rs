use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::types::{
    new_entity_id, BackgroundGap, DaySession, DayStatus, EngineKind, ReplacementSegment,
    SessionGroup, SpeechSession, TranscriptionSegment,
};

/// Single-writer reducer owning the day-session aggregate.
///
/// All mutation goes through `&mut self` methods that take an explicit `now`,
/// so transitions are deterministic and testable without a clock. Order
/// counters are scoped to this aggregate and recomputed from persisted
/// max-order values on recovery; they are never process-wide globals.
///
/// The currently open group and session are held outside the aggregate and
/// folded in on close (and, non-destructively, on snapshot), so snapshots
/// never observe a partially committed mutation.
#[derive(Debug, Default)]
pub struct DayRecorder {
    day: Option<DaySession>,
    current_group: Option<SessionGroup>,
    current_session: Option<SpeechSession>,
    last_speech_time: Option<DateTime<Utc>>,
    interim_text: String,

    segment_order: u64,
    session_order: u64,
    group_order: u64,
}

impl DayRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new day session. Fails if one is already active.
    pub fn start_day(&mut self, now: DateTime<Utc>) -> Result<String> {
        if self.day.is_some() {
            bail!("a day session is already active");
        }

        self.segment_order = 0;
        self.session_order = 0;
        self.group_order = 0;

        let day = DaySession {
            id: new_entity_id("day"),
            start_date: now.format("%Y-%m-%d").to_string(),
            start_time: now,
            end_time: None,
            status: DayStatus::Active,
            session_groups: Vec::new(),
            gaps: Vec::new(),
        };

        info!(day_id = %day.id, date = %day.start_date, "day session started");
        let id = day.id.clone();
        self.day = Some(day);
        Ok(id)
    }

    /// End the day session, folding in any open group, and return the
    /// completed aggregate.
    pub fn stop_day(&mut self, now: DateTime<Utc>) -> Result<DaySession> {
        if self.day.is_none() {
            bail!("no active day session");
        }
        if self.current_group.is_some() {
            self.stop_group(now)?;
        }

        let mut day = self.day.take().expect("checked above");
        day.end_time = Some(now);
        day.status = DayStatus::Completed;

        self.current_group = None;
        self.current_session = None;
        self.last_speech_time = None;
        self.interim_text.clear();

        info!(
            day_id = %day.id,
            groups = day.session_groups.len(),
            segments = day.segment_count(),
            "day session completed"
        );
        Ok(day)
    }

    /// Verify a group could be started right now, without starting one.
    /// Used to check preconditions before acquiring external capabilities.
    pub fn ensure_can_start_group(&self) -> Result<()> {
        if self.day.is_none() {
            bail!("no active day session");
        }
        if self.current_group.is_some() {
            bail!("a session group is already recording");
        }
        Ok(())
    }

    /// Open a new session group ("recording on").
    pub fn start_group(&mut self, now: DateTime<Utc>) -> Result<String> {
        self.ensure_can_start_group()?;
        let day = self.day.as_ref().expect("checked above");

        let group = SessionGroup {
            id: new_entity_id("group"),
            day_id: day.id.clone(),
            start_time: now,
            end_time: None,
            sessions: Vec::new(),
            order: self.group_order,
        };
        self.group_order += 1;

        info!(group_id = %group.id, order = group.order, "session group started");
        let id = group.id.clone();
        self.current_group = Some(group);
        self.current_session = None;
        self.last_speech_time = None;
        Ok(id)
    }

    /// Close the open session group ("recording off"), folding the open
    /// session into it first. A zero-segment open session is discarded.
    pub fn stop_group(&mut self, now: DateTime<Utc>) -> Result<()> {
        let day = match self.day.as_mut() {
            Some(day) => day,
            None => bail!("no active day session"),
        };
        let mut group = match self.current_group.take() {
            Some(group) => group,
            None => bail!("no session group is recording"),
        };

        if let Some(mut session) = self.current_session.take() {
            if session.segments.is_empty() {
                debug!(session_id = %session.id, "discarding empty speech session");
            } else {
                session.end_time = Some(now);
                group.sessions.push(session);
            }
        }

        group.end_time = Some(now);
        info!(
            group_id = %group.id,
            sessions = group.sessions.len(),
            "session group stopped"
        );
        day.session_groups.push(group);

        self.last_speech_time = None;
        self.interim_text.clear();
        Ok(())
    }

    /// Accept one recognized segment into the model.
    ///
    /// Opens a new speech session if none is open. The global order is
    /// assigned here, synchronously, so two segments can never race for the
    /// same order value regardless of how their network calls interleaved.
    pub fn add_segment(
        &mut self,
        content: &str,
        source: EngineKind,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let day = match self.day.as_ref() {
            Some(day) => day,
            None => bail!("no active day session"),
        };
        let group = match self.current_group.as_ref() {
            Some(group) => group,
            None => bail!("no session group is recording"),
        };

        let session = self.current_session.get_or_insert_with(|| {
            let session = SpeechSession {
                id: new_entity_id("session"),
                group_id: group.id.clone(),
                start_time: now,
                end_time: None,
                segments: Vec::new(),
                order: self.session_order,
            };
            self.session_order += 1;
            debug!(session_id = %session.id, order = session.order, "speech session opened");
            session
        });

        let elapsed_ms = (now - day.start_time).num_milliseconds().max(0) as u64;
        let segment = TranscriptionSegment {
            id: new_entity_id("seg"),
            session_id: session.id.clone(),
            content: content.to_string(),
            source,
            order: self.segment_order,
            elapsed_ms,
            wall_clock: now,
            uploaded_to_backend: false,
        };
        self.segment_order += 1;

        let order = segment.order;
        session.segments.push(segment);
        self.last_speech_time = Some(now);
        self.interim_text.clear();
        Ok(order)
    }

    /// Finalize the open speech session if nothing has arrived for
    /// `timeout`. Returns true when a session was closed.
    pub fn check_silence(&mut self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let last = match self.last_speech_time {
            Some(last) => last,
            None => return false,
        };
        let has_segments = self
            .current_session
            .as_ref()
            .map(|s| !s.segments.is_empty())
            .unwrap_or(false);
        if !has_segments || now - last < timeout {
            return false;
        }

        self.finalize_session(now);
        true
    }

    /// Close the open speech session and append it to the open group.
    /// No-op when the session is empty (it is discarded instead).
    pub fn finalize_session(&mut self, now: DateTime<Utc>) {
        let group = match self.current_group.as_mut() {
            Some(group) => group,
            None => return,
        };
        let mut session = match self.current_session.take() {
            Some(session) => session,
            None => return,
        };
        if session.segments.is_empty() {
            return;
        }

        session.end_time = Some(now);
        info!(
            session_id = %session.id,
            segments = session.segments.len(),
            "speech session finalized after silence"
        );
        group.sessions.push(session);
        self.last_speech_time = None;
    }

    /// Record the start of a background excursion. At most one unresolved
    /// gap may exist; a duplicate signal is ignored.
    pub fn on_backgrounded(&mut self, now: DateTime<Utc>) {
        let day = match self.day.as_mut() {
            Some(day) => day,
            None => return,
        };
        if day.gaps.last().is_some_and(|g| g.end_time.is_none()) {
            warn!("background signal while a gap is already open, ignoring");
            return;
        }
        day.gaps.push(BackgroundGap {
            start_time: now,
            end_time: None,
        });
        debug!("background gap opened");
    }

    /// Resolve the open background gap, returning its duration.
    pub fn on_foregrounded(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        let day = self.day.as_mut()?;
        let gap = day.gaps.last_mut()?;
        if gap.end_time.is_some() {
            return None;
        }
        gap.end_time = Some(now);
        let duration = now - gap.start_time;
        info!(gap_secs = duration.num_seconds(), "background gap resolved");
        Some(duration)
    }

    pub fn set_interim_text(&mut self, text: String) {
        self.interim_text = text;
    }

    pub fn interim_text(&self) -> &str {
        &self.interim_text
    }

    /// Serialize the full aggregate with the open group and session folded
    /// in, as if closed. Pure read: repeated snapshots with no intervening
    /// mutation are identical (no id or order churn).
    pub fn snapshot(&self) -> Option<DaySession> {
        let mut day = self.day.clone()?;

        if let Some(group) = &self.current_group {
            let mut group = group.clone();
            if let Some(session) = &self.current_session {
                if !session.segments.is_empty() {
                    group.sessions.push(session.clone());
                }
            }
            day.session_groups.push(group);
        }

        Some(day)
    }

    /// Re-activate a persisted day session, restoring order counters from
    /// the max observed order at each level so newly created entities never
    /// collide with persisted ones.
    pub fn recover(&mut self, session: DaySession) -> Result<()> {
        if self.day.is_some() {
            bail!("cannot recover while a day session is active");
        }

        let mut max_group = 0;
        let mut max_session = 0;
        let mut max_segment = 0;
        for group in &session.session_groups {
            max_group = max_group.max(group.order + 1);
            for sess in &group.sessions {
                max_session = max_session.max(sess.order + 1);
                for seg in &sess.segments {
                    max_segment = max_segment.max(seg.order + 1);
                }
            }
        }

        self.group_order = max_group;
        self.session_order = max_session;
        self.segment_order = max_segment;

        info!(
            day_id = %session.id,
            groups = session.session_groups.len(),
            segments = session.segment_count(),
            next_segment_order = max_segment,
            "day session recovered"
        );

        self.day = Some(DaySession {
            status: DayStatus::Active,
            end_time: None,
            ..session
        });
        self.current_group = None;
        self.current_session = None;
        self.last_speech_time = None;
        self.interim_text.clear();
        Ok(())
    }

    /// Atomically replace a closed group's transcript with a single
    /// synthetic speech session built from a re-transcription of the
    /// group's full audio. All-or-nothing: any failure leaves the group's
    /// original sessions untouched.
    pub fn replace_group_segments(
        &mut self,
        group_id: &str,
        replacements: Vec<ReplacementSegment>,
    ) -> Result<usize> {
        if replacements.is_empty() {
            bail!("re-transcription produced no segments, keeping original transcript");
        }
        let day_start = match self.day.as_ref() {
            Some(day) => day.start_time,
            None => bail!("no active day session"),
        };
        let day = self.day.as_mut().expect("checked above");
        let group = match day.session_groups.iter_mut().find(|g| g.id == group_id) {
            Some(group) => group,
            None => bail!("unknown session group: {group_id}"),
        };

        let group_offset_ms = (group.start_time - day_start).num_milliseconds().max(0) as u64;
        let mut session = SpeechSession {
            id: new_entity_id("session"),
            group_id: group.id.clone(),
            start_time: group.start_time,
            end_time: group.end_time,
            segments: Vec::new(),
            order: self.session_order,
        };
        self.session_order += 1;

        for replacement in replacements {
            let offset_ms = (replacement.offset_secs * 1000.0).max(0.0) as u64;
            let wall_clock = group.start_time + Duration::milliseconds(offset_ms as i64);
            session.segments.push(TranscriptionSegment {
                id: new_entity_id("seg"),
                session_id: session.id.clone(),
                content: replacement.text,
                source: EngineKind::Fallback,
                order: self.segment_order,
                elapsed_ms: group_offset_ms + offset_ms,
                wall_clock,
                uploaded_to_backend: false,
            });
            self.segment_order += 1;
        }

        let replaced = session.segments.len();
        info!(
            group_id,
            discarded_sessions = group.sessions.len(),
            new_segments = replaced,
            "group transcript replaced by re-transcription"
        );
        group.sessions = vec![session];
        Ok(replaced)
    }

    /// Mark segments as stored by the external backend. Returns how many
    /// segments were found and flagged.
    pub fn mark_uploaded(&mut self, ids: &[String]) -> usize {
        let day = match self.day.as_mut() {
            Some(day) => day,
            None => return 0,
        };
        let mut marked = 0;
        let all = day
            .session_groups
            .iter_mut()
            .flat_map(|g| g.sessions.iter_mut())
            .chain(self.current_session.iter_mut())
            .flat_map(|s| s.segments.iter_mut());
        for segment in all {
            if ids.contains(&segment.id) && !segment.uploaded_to_backend {
                segment.uploaded_to_backend = true;
                marked += 1;
            }
        }
        marked
    }

    /// Start and end of a closed group's audio span.
    pub fn group_span(
        &self,
        group_id: &str,
    ) -> Option<(DateTime<Utc>, Option<DateTime<Utc>>)> {
        self.day
            .as_ref()?
            .session_groups
            .iter()
            .find(|g| g.id == group_id)
            .map(|g| (g.start_time, g.end_time))
    }

    pub fn day(&self) -> Option<&DaySession> {
        self.day.as_ref()
    }

    pub fn is_day_active(&self) -> bool {
        self.day.is_some()
    }

    /// Whether a session group is currently recording.
    pub fn is_recording(&self) -> bool {
        self.current_group.is_some()
    }

    pub fn last_speech_time(&self) -> Option<DateTime<Utc>> {
        self.last_speech_time
    }

    /// Every segment accepted so far, including the open session, in global
    /// order.
    pub fn transcript(&self) -> Vec<TranscriptionSegment> {
        self.snapshot()
            .map(|day| day.flattened_segments())
            .unwrap_or_default()
    }
}
