//! Day-session orchestration
//!
//! This module provides the `DayService` abstraction that manages:
//! - Day and session-group lifecycle toggles
//! - The hybrid failover controller feeding the single-writer recorder
//! - Silence-based session splitting on a timer
//! - Periodic and event-driven durable snapshots
//! - Group re-transcription and transcript queries

mod config;
mod service;
mod stats;

pub use config::SessionConfig;
pub use service::{DayService, RejectedRequest};
pub use stats::DayStats;
