//! Day-session data model
//!
//! This module provides the hierarchical transcript aggregate
//! (`DaySession` → `SessionGroup` → `SpeechSession` → `TranscriptionSegment`)
//! and the `DayRecorder` reducer that owns all mutation of it, including
//! silence-based session splitting, background gap tracking, and the order
//! counters that keep the transcript globally monotonic.

mod recorder;
mod types;

pub use recorder::DayRecorder;
pub use types::{
    BackgroundGap, DaySession, DayStatus, EngineKind, ReplacementSegment, SessionGroup,
    SpeechSession, TranscriptionSegment,
};
