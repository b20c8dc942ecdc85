use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime knobs for the day-session orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Silence after which the open speech session is finalized.
    /// Default: 60 seconds
    pub silence_timeout: Duration,

    /// How often the silence check runs.
    /// Default: 5 seconds
    pub silence_check_interval: Duration,

    /// How often the aggregate is snapshotted while a day is active.
    /// Default: 10 seconds
    pub snapshot_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            silence_timeout: Duration::from_secs(60),
            silence_check_interval: Duration::from_secs(5),
            snapshot_interval: Duration::from_secs(10),
        }
    }
}
