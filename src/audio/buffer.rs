use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use super::frame::{AudioClip, AudioFrame};

/// Read access to the raw capture buffer.
///
/// Reads are non-destructive slices: retrieving a clip never removes data
/// from the write path, so the failover controller can recover a missed span
/// while capture continues.
pub trait AudioCapture: Send + Sync {
    /// The last `duration` of captured audio as a self-contained clip.
    fn recent_clip(&self, duration: Duration) -> Result<AudioClip>;

    /// Captured audio between two wall-clock instants.
    fn clip_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<AudioClip>;
}

struct StampedFrame {
    wall_clock: DateTime<Utc>,
    frame: AudioFrame,
}

struct RingState {
    frames: VecDeque<StampedFrame>,
}

/// Bounded in-memory audio buffer written by the capture pipeline and read
/// (by slicing) by the failover controller and the group re-transcription
/// path.
pub struct RingBuffer {
    state: Mutex<RingState>,
    sample_rate: u32,
    channels: u16,
    capacity: chrono::Duration,
}

impl RingBuffer {
    /// `capacity` bounds how far back clips can reach; frames older than
    /// that relative to the newest frame are evicted on write.
    pub fn new(sample_rate: u32, channels: u16, capacity: Duration) -> Self {
        Self {
            state: Mutex::new(RingState {
                frames: VecDeque::new(),
            }),
            sample_rate,
            channels,
            capacity: chrono::Duration::from_std(capacity)
                .unwrap_or_else(|_| chrono::Duration::hours(2)),
        }
    }

    /// Append a frame stamped with the current wall clock.
    pub fn push(&self, frame: AudioFrame) {
        self.push_at(frame, Utc::now());
    }

    /// Append a frame with an explicit wall-clock stamp (as carried by the
    /// capture transport).
    pub fn push_at(&self, frame: AudioFrame, wall_clock: DateTime<Utc>) {
        let mut state = self.state.lock().expect("ring buffer lock poisoned");
        state.frames.push_back(StampedFrame { wall_clock, frame });

        let horizon = wall_clock - self.capacity;
        let mut evicted = 0;
        while state
            .frames
            .front()
            .is_some_and(|f| f.wall_clock < horizon)
        {
            state.frames.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            debug!(evicted, "evicted audio frames past buffer capacity");
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    fn collect(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> AudioClip {
        let state = self.state.lock().expect("ring buffer lock poisoned");
        let samples: Vec<i16> = state
            .frames
            .iter()
            .filter(|f| f.wall_clock >= start && f.wall_clock <= end)
            .flat_map(|f| f.frame.samples.iter().copied())
            .collect();

        AudioClip {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

impl AudioCapture for RingBuffer {
    fn recent_clip(&self, duration: Duration) -> Result<AudioClip> {
        let newest = {
            let state = self.state.lock().expect("ring buffer lock poisoned");
            state.frames.back().map(|f| f.wall_clock)
        };
        let newest = match newest {
            Some(newest) => newest,
            None => {
                return Ok(AudioClip {
                    samples: Vec::new(),
                    sample_rate: self.sample_rate,
                    channels: self.channels,
                })
            }
        };
        let span = chrono::Duration::from_std(duration)
            .unwrap_or_else(|_| chrono::Duration::hours(2));
        Ok(self.collect(newest - span, newest))
    }

    fn clip_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<AudioClip> {
        Ok(self.collect(start, end))
    }
}
