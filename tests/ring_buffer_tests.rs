// Tests for the capture ring buffer and clip encoding

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::time::Duration;

use allday_scribe::audio::{AudioCapture, AudioClip, AudioFrame, RingBuffer};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 9, 8, 0, 0).unwrap()
}

/// One second of audio at 16 kHz mono, filled with a marker value.
fn frame(marker: i16, offset_secs: i64) -> (AudioFrame, DateTime<Utc>) {
    (
        AudioFrame {
            samples: vec![marker; 16000],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: (offset_secs * 1000).max(0) as u64,
        },
        t0() + ChronoDuration::seconds(offset_secs),
    )
}

#[test]
fn test_recent_clip_is_anchored_on_newest_frame() -> Result<()> {
    let buffer = RingBuffer::new(16000, 1, Duration::from_secs(3600));
    for (i, marker) in [10i16, 20, 30, 40].iter().enumerate() {
        let (f, at) = frame(*marker, i as i64);
        buffer.push_at(f, at);
    }

    // The last ~2 seconds: frames at t=2 and t=3 (inclusive bounds also
    // catch the frame exactly at the window start, t=1)
    let clip = buffer.recent_clip(Duration::from_secs(2))?;
    assert_eq!(clip.sample_rate, 16000);
    assert_eq!(clip.channels, 1);
    assert_eq!(clip.samples.len(), 3 * 16000);
    assert_eq!(clip.samples[0], 20);
    assert_eq!(clip.samples[2 * 16000], 40);

    Ok(())
}

#[test]
fn test_reads_are_non_destructive() -> Result<()> {
    let buffer = RingBuffer::new(16000, 1, Duration::from_secs(3600));
    for i in 0..5 {
        let (f, at) = frame(i as i16, i);
        buffer.push_at(f, at);
    }

    let first = buffer.recent_clip(Duration::from_secs(10))?;
    let second = buffer.recent_clip(Duration::from_secs(10))?;
    assert_eq!(first.samples, second.samples, "Slicing must not consume frames");
    assert_eq!(first.samples.len(), 5 * 16000);

    Ok(())
}

#[test]
fn test_empty_buffer_yields_empty_clip() -> Result<()> {
    let buffer = RingBuffer::new(16000, 1, Duration::from_secs(3600));

    let clip = buffer.recent_clip(Duration::from_secs(30))?;
    assert!(clip.is_empty());
    assert_eq!(clip.duration_ms(), 0);
    assert_eq!(clip.sample_rate, 16000, "Format metadata survives an empty slice");

    Ok(())
}

#[test]
fn test_clip_range_selects_wall_clock_window() -> Result<()> {
    let buffer = RingBuffer::new(16000, 1, Duration::from_secs(3600));
    for i in 0..10 {
        let (f, at) = frame(i as i16, i);
        buffer.push_at(f, at);
    }

    let clip = buffer.clip_range(
        t0() + ChronoDuration::seconds(3),
        t0() + ChronoDuration::seconds(5),
    )?;
    // Frames at t=3, 4, 5
    assert_eq!(clip.samples.len(), 3 * 16000);
    assert_eq!(clip.samples[0], 3);
    assert_eq!(clip.samples[2 * 16000], 5);

    // A window before capture started is empty
    let clip = buffer.clip_range(
        t0() - ChronoDuration::seconds(100),
        t0() - ChronoDuration::seconds(50),
    )?;
    assert!(clip.is_empty());

    Ok(())
}

#[test]
fn test_frames_past_capacity_are_evicted() -> Result<()> {
    let buffer = RingBuffer::new(16000, 1, Duration::from_secs(5));
    for i in 0..20 {
        let (f, at) = frame(i as i16, i);
        buffer.push_at(f, at);
    }

    let clip = buffer.recent_clip(Duration::from_secs(3600))?;
    // Only frames within 5s of the newest (t=19) survive: t=14..=19
    assert_eq!(clip.samples.len(), 6 * 16000);
    assert_eq!(clip.samples[0], 14);

    Ok(())
}

#[test]
fn test_clip_duration_accounts_for_channels() {
    let mono = AudioClip {
        samples: vec![0; 16000],
        sample_rate: 16000,
        channels: 1,
    };
    assert_eq!(mono.duration_ms(), 1000);

    let stereo = AudioClip {
        samples: vec![0; 16000],
        sample_rate: 16000,
        channels: 2,
    };
    assert_eq!(stereo.duration_ms(), 500);
}

#[test]
fn test_wav_encoding_produces_valid_riff() -> Result<()> {
    let clip = AudioClip {
        samples: vec![100i16; 1600],
        sample_rate: 16000,
        channels: 1,
    };

    let bytes = clip.to_wav_bytes()?;
    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(&bytes[8..12], b"WAVE");
    // 44-byte canonical header plus two bytes per 16-bit sample
    assert_eq!(bytes.len(), 44 + 1600 * 2);

    Ok(())
}
