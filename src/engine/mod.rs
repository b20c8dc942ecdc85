//! Recognition engines and the hybrid failover state machine
//!
//! Two engine seams: `PrimaryRecognizer` (continuous streaming, low latency,
//! may silently die) and `FallbackTranscriber` (buffered batch windows,
//! higher accuracy). `HybridController` arbitrates which one is the source
//! of truth at any moment.

pub mod failover;
pub mod fallback;
pub mod primary;

pub use failover::{EngineMode, FailoverConfig, HybridController, SegmentSink};
pub use fallback::{FallbackTranscriber, NatsFallbackTranscriber, TranscribedSpan, Transcription};
pub use primary::{NatsPrimaryRecognizer, PrimaryRecognizer, RecognitionEvent};
