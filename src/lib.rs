pub mod audio;
pub mod config;
pub mod engine;
pub mod http;
pub mod lifecycle;
pub mod model;
pub mod nats;
pub mod persist;
pub mod session;

pub use audio::{AudioCapture, AudioClip, AudioFrame, RingBuffer};
pub use config::Config;
pub use engine::{
    EngineMode, FailoverConfig, FallbackTranscriber, HybridController, PrimaryRecognizer,
    SegmentSink,
};
pub use http::{create_router, AppState};
pub use lifecycle::{LifecycleMonitor, VisibilityEvent};
pub use model::{DayRecorder, DaySession, EngineKind, TranscriptionSegment};
pub use nats::NatsClient;
pub use persist::{FileSnapshotStore, RecoveryCoordinator, SnapshotStore};
pub use session::{DayService, DayStats, RejectedRequest, SessionConfig};
