//! Barge-in detection while the assistant is speaking.
//!
//! The detector is driven by two calls: [`InterruptionDetector::observe`] for
//! every energy sample and [`InterruptionDetector::poll`] when the owner's
//! timer reaches [`InterruptionDetector::deadline`]. It never sleeps itself,
//! so the caller decides which clock drives it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

/// Default energy level (0-100) above which input is treated as likely speech.
pub const DEFAULT_INTERRUPT_THRESHOLD: f32 = 60.0;

/// Default time the level must stay above threshold before firing.
pub const DEFAULT_CONFIRMATION_MS: u64 = 300;

/// Default minimum interval between two interruptions.
pub const DEFAULT_COOLDOWN_MS: u64 = 1000;

/// Detector tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptionConfig {
    /// Energy level threshold on the 0-100 scale.
    pub threshold: f32,
    /// Confirmation window in milliseconds.
    pub confirmation_ms: u64,
    /// Cooldown between interruptions in milliseconds.
    pub cooldown_ms: u64,
}

impl Default for InterruptionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_INTERRUPT_THRESHOLD,
            confirmation_ms: DEFAULT_CONFIRMATION_MS,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
        }
    }
}

impl InterruptionConfig {
    pub fn confirmation(&self) -> Duration {
        Duration::from_millis(self.confirmation_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Result of feeding one sample to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorOutcome {
    /// Nothing in progress.
    Idle,
    /// Level is above threshold and the confirmation window is running.
    Pending,
    /// A pending attempt ended because the level dropped or speaking stopped.
    Cancelled,
    /// Interruption confirmed.
    Fired,
}

/// Sustained-energy interruption detector.
#[derive(Debug, Clone)]
pub struct InterruptionDetector {
    config: InterruptionConfig,
    pending_since: Option<Instant>,
    last_fired: Option<Instant>,
}

impl InterruptionDetector {
    pub fn new(config: InterruptionConfig) -> Self {
        Self {
            config,
            pending_since: None,
            last_fired: None,
        }
    }

    pub fn config(&self) -> &InterruptionConfig {
        &self.config
    }

    /// Whether a confirmation window is currently running.
    pub fn is_pending(&self) -> bool {
        self.pending_since.is_some()
    }

    pub fn last_fired(&self) -> Option<Instant> {
        self.last_fired
    }

    /// Feed one energy sample.
    ///
    /// `speaking` must reflect whether the session is in the speaking state at
    /// `now`; outside of it nothing can fire and any attempt is dropped.
    pub fn observe(&mut self, level: f32, speaking: bool, now: Instant) -> DetectorOutcome {
        if !speaking {
            return self.cancel();
        }

        if level > self.config.threshold {
            if self.pending_since.is_none() {
                debug!(level, "Interruption attempt started");
                self.pending_since = Some(now);
            }
            if self.poll(speaking, now) {
                DetectorOutcome::Fired
            } else {
                DetectorOutcome::Pending
            }
        } else {
            self.cancel()
        }
    }

    /// Check a running attempt against the clock.
    ///
    /// Returns true exactly once per confirmed interruption. The level is
    /// assumed unchanged since the last [`observe`](Self::observe) call.
    pub fn poll(&mut self, speaking: bool, now: Instant) -> bool {
        let Some(since) = self.pending_since else {
            return false;
        };
        if !speaking {
            self.pending_since = None;
            return false;
        }
        if now.saturating_duration_since(since) < self.config.confirmation() {
            return false;
        }
        if let Some(last) = self.last_fired
            && now.saturating_duration_since(last) < self.config.cooldown()
        {
            return false;
        }

        self.pending_since = None;
        self.last_fired = Some(now);
        debug!("Interruption confirmed");
        true
    }

    /// Earliest instant at which [`poll`](Self::poll) could fire.
    pub fn deadline(&self) -> Option<Instant> {
        let since = self.pending_since?;
        let confirmed_at = since + self.config.confirmation();
        let cooled_at = self
            .last_fired
            .map(|last| last + self.config.cooldown())
            .unwrap_or(confirmed_at);
        Some(confirmed_at.max(cooled_at))
    }

    /// Record an interruption raised elsewhere, such as an explicit client
    /// request. Starts the cooldown and drops any running attempt.
    pub fn note_interruption(&mut self, now: Instant) {
        self.pending_since = None;
        self.last_fired = Some(now);
    }

    /// Drop any running attempt. Cooldown history is kept.
    pub fn reset(&mut self) {
        self.pending_since = None;
    }

    fn cancel(&mut self) -> DetectorOutcome {
        if self.pending_since.take().is_some() {
            debug!("Interruption attempt cancelled");
            DetectorOutcome::Cancelled
        } else {
            DetectorOutcome::Idle
        }
    }
}

impl Default for InterruptionDetector {
    fn default() -> Self {
        Self::new(InterruptionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_sustained_energy_fires_once() {
        let mut detector = InterruptionDetector::default();
        let t0 = Instant::now();

        assert_eq!(detector.observe(80.0, true, t0), DetectorOutcome::Pending);
        assert_eq!(detector.observe(75.0, true, t0 + ms(100)), DetectorOutcome::Pending);
        assert_eq!(detector.observe(90.0, true, t0 + ms(200)), DetectorOutcome::Pending);
        assert_eq!(detector.observe(85.0, true, t0 + ms(300)), DetectorOutcome::Fired);
        assert!(!detector.is_pending());

        // Still loud right after: a new attempt starts but cannot fire inside the cooldown.
        assert_eq!(detector.observe(85.0, true, t0 + ms(400)), DetectorOutcome::Pending);
        assert_eq!(detector.observe(85.0, true, t0 + ms(800)), DetectorOutcome::Pending);
        assert_eq!(detector.observe(85.0, true, t0 + ms(1200)), DetectorOutcome::Pending);
    }

    #[test]
    fn test_drop_below_threshold_cancels() {
        let mut detector = InterruptionDetector::default();
        let t0 = Instant::now();

        detector.observe(80.0, true, t0);
        assert_eq!(detector.observe(30.0, true, t0 + ms(150)), DetectorOutcome::Cancelled);
        assert!(!detector.poll(true, t0 + ms(400)));
        assert_eq!(detector.observe(30.0, true, t0 + ms(500)), DetectorOutcome::Idle);
        assert!(detector.last_fired().is_none());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let mut detector = InterruptionDetector::default();
        let t0 = Instant::now();
        assert_eq!(detector.observe(60.0, true, t0), DetectorOutcome::Idle);
        assert_eq!(detector.observe(60.0, true, t0 + ms(500)), DetectorOutcome::Idle);
    }

    #[test]
    fn test_not_speaking_never_fires() {
        let mut detector = InterruptionDetector::default();
        let t0 = Instant::now();
        assert_eq!(detector.observe(95.0, false, t0), DetectorOutcome::Idle);
        assert_eq!(detector.observe(95.0, false, t0 + ms(400)), DetectorOutcome::Idle);

        detector.observe(95.0, true, t0 + ms(500));
        // Speaking ended before the window elapsed.
        assert!(!detector.poll(false, t0 + ms(900)));
        assert!(!detector.is_pending());
    }

    #[test]
    fn test_poll_fires_at_deadline_without_new_samples() {
        let mut detector = InterruptionDetector::default();
        let t0 = Instant::now();
        detector.observe(70.0, true, t0);

        let deadline = detector.deadline().unwrap();
        assert_eq!(deadline, t0 + ms(300));
        assert!(!detector.poll(true, t0 + ms(299)));
        assert!(detector.poll(true, deadline));
        assert!(!detector.poll(true, deadline + ms(10)));
        assert!(detector.deadline().is_none());
    }

    #[test]
    fn test_cooldown_then_second_interruption() {
        let mut detector = InterruptionDetector::default();
        let t0 = Instant::now();

        detector.observe(70.0, true, t0);
        assert!(detector.poll(true, t0 + ms(300)));

        detector.observe(70.0, true, t0 + ms(500));
        // Confirmation elapses at 800ms but cooldown holds until 1300ms.
        assert_eq!(detector.deadline(), Some(t0 + ms(1300)));
        assert!(!detector.poll(true, t0 + ms(800)));
        assert!(detector.poll(true, t0 + ms(1300)));
    }

    #[test]
    fn test_reset_keeps_cooldown() {
        let mut detector = InterruptionDetector::default();
        let t0 = Instant::now();
        detector.observe(70.0, true, t0);
        assert!(detector.poll(true, t0 + ms(300)));
        detector.observe(70.0, true, t0 + ms(400));
        detector.reset();
        assert!(!detector.is_pending());
        assert_eq!(detector.last_fired(), Some(t0 + ms(300)));
    }

    #[test]
    fn test_external_interruption_starts_cooldown() {
        let mut detector = InterruptionDetector::default();
        let t0 = Instant::now();
        detector.observe(70.0, true, t0);
        detector.note_interruption(t0 + ms(100));
        assert!(!detector.is_pending());
        assert_eq!(detector.last_fired(), Some(t0 + ms(100)));

        detector.observe(70.0, true, t0 + ms(200));
        assert!(!detector.poll(true, t0 + ms(800)));
        assert_eq!(detector.deadline(), Some(t0 + ms(1100)));
        assert!(detector.poll(true, t0 + ms(1100)));
    }

    #[test]
    fn test_custom_config() {
        let mut detector = InterruptionDetector::new(InterruptionConfig {
            threshold: 20.0,
            confirmation_ms: 50,
            cooldown_ms: 0,
        });
        let t0 = Instant::now();
        assert_eq!(detector.observe(25.0, true, t0), DetectorOutcome::Pending);
        assert_eq!(detector.observe(25.0, true, t0 + ms(50)), DetectorOutcome::Fired);
        assert_eq!(detector.observe(25.0, true, t0 + ms(60)), DetectorOutcome::Pending);
        assert_eq!(detector.observe(25.0, true, t0 + ms(110)), DetectorOutcome::Fired);
    }
}
