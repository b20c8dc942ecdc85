use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::engine::FailoverConfig;
use crate::session::SessionConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub nats: NatsConfig,
    pub audio: AudioConfig,
    pub recording: RecordingConfig,
    pub failover: FailoverSettings,
    pub snapshots: SnapshotConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct NatsConfig {
    pub url: String,
    /// Channel identifier shared with the host capture pipeline and the
    /// recognizer services.
    pub channel: String,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// How far back the capture ring buffer can reach, in seconds.
    pub buffer_capacity_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct RecordingConfig {
    pub silence_timeout_secs: u64,
    pub silence_check_interval_secs: u64,
    pub snapshot_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct FailoverSettings {
    pub staleness_secs: u64,
    pub health_check_interval_secs: u64,
    pub chunk_duration_secs: u64,
    pub transition_overlap_secs: u64,
    pub upload_retries: u32,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotConfig {
    pub dir: String,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            silence_timeout: Duration::from_secs(self.recording.silence_timeout_secs),
            silence_check_interval: Duration::from_secs(
                self.recording.silence_check_interval_secs,
            ),
            snapshot_interval: Duration::from_secs(self.recording.snapshot_interval_secs),
        }
    }

    pub fn failover_config(&self) -> FailoverConfig {
        FailoverConfig {
            staleness_threshold: Duration::from_secs(self.failover.staleness_secs),
            health_check_interval: Duration::from_secs(self.failover.health_check_interval_secs),
            chunk_duration: Duration::from_secs(self.failover.chunk_duration_secs),
            transition_overlap: Duration::from_secs(self.failover.transition_overlap_secs),
            upload_retries: self.failover.upload_retries,
            ..FailoverConfig::default()
        }
    }
}
