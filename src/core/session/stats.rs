//! Process-wide relay counters.
//!
//! Monotonic atomics shared by all sessions. Sessions only ever increment
//! them; nothing reads them back into session logic.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::machine::FrameDisposition;

#[derive(Debug, Default)]
pub struct RelayStats {
    frames_received: AtomicU64,
    frames_forwarded: AtomicU64,
    frames_suppressed: AtomicU64,
    audio_deltas_sent: AtomicU64,
    audio_deltas_dropped: AtomicU64,
    responses_completed: AtomicU64,
    interruptions: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub frames_forwarded: u64,
    pub frames_suppressed: u64,
    pub audio_deltas_sent: u64,
    pub audio_deltas_dropped: u64,
    pub responses_completed: u64,
    pub interruptions: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one input frame by what the session did with it.
    pub fn record_frame(&self, disposition: FrameDisposition) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        match disposition {
            FrameDisposition::Forwarded => {
                self.frames_forwarded.fetch_add(1, Ordering::Relaxed);
            }
            FrameDisposition::Suppressed | FrameDisposition::Held => {
                self.frames_suppressed.fetch_add(1, Ordering::Relaxed);
            }
            FrameDisposition::Silent | FrameDisposition::Ignored => {}
        }
    }

    pub fn record_audio_delta_sent(&self) {
        self.audio_deltas_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_deltas_dropped(&self, count: u64) {
        if count > 0 {
            self.audio_deltas_dropped.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn record_response_completed(&self) {
        self.responses_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_interruption(&self) {
        self.interruptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            frames_suppressed: self.frames_suppressed.load(Ordering::Relaxed),
            audio_deltas_sent: self.audio_deltas_sent.load(Ordering::Relaxed),
            audio_deltas_dropped: self.audio_deltas_dropped.load(Ordering::Relaxed),
            responses_completed: self.responses_completed.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
        }
    }
}
