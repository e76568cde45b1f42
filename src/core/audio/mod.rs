//! Audio primitives shared by the relay and its clients.
//!
//! - [`pcm`]: PCM16 encode/decode
//! - [`gate`]: per-frame significance gate and FFT energy meter
//! - [`interruption`]: sustained-energy barge-in detector
//! - [`playback`]: gapless, cancellable clip scheduler for client playback

pub mod gate;
pub mod interruption;
pub mod pcm;
pub mod playback;

pub use gate::{
    DEFAULT_SILENCE_THRESHOLD, EnergyMeter, VoiceActivityGate, mean_abs_amplitude,
    mean_abs_amplitude_pcm,
};
pub use interruption::{DetectorOutcome, InterruptionConfig, InterruptionDetector};
pub use pcm::{BYTES_PER_MS, PCM_SAMPLE_RATE, PcmBuffer};
pub use playback::{AudioSink, PlaybackConfig, PlaybackError, PlaybackScheduler, PlaybackStatus};
