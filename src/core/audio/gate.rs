//! Voice activity gate and energy meter.
//!
//! Two separate signals are derived from microphone audio:
//!
//! - [`VoiceActivityGate`] is a per-frame decision: does this frame carry
//!   enough amplitude to be worth sending upstream?
//! - [`EnergyMeter`] is a continuously sampled 0-100 level computed in the
//!   frequency domain. It feeds the interruption detector and UI feedback.
//!
//! Both are O(frame size) and allocation-free after construction.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::pcm;

/// Default mean absolute amplitude below which a frame counts as silence.
pub const DEFAULT_SILENCE_THRESHOLD: f32 = 0.001;

/// Default FFT size of the energy meter.
pub const DEFAULT_ENERGY_FFT_SIZE: usize = 256;

/// Default smoothing between successive spectra (0 = none).
pub const DEFAULT_ENERGY_SMOOTHING: f32 = 0.8;

/// Decibel range mapped onto the 0-255 byte scale.
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

// =============================================================================
// Gate
// =============================================================================

/// Per-frame significance gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceActivityGate {
    silence_threshold: f32,
}

impl Default for VoiceActivityGate {
    fn default() -> Self {
        Self::new(DEFAULT_SILENCE_THRESHOLD)
    }
}

impl VoiceActivityGate {
    /// Create a gate; negative or NaN thresholds fall back to the default.
    pub fn new(silence_threshold: f32) -> Self {
        let silence_threshold = if silence_threshold.is_finite() && silence_threshold >= 0.0 {
            silence_threshold
        } else {
            DEFAULT_SILENCE_THRESHOLD
        };
        Self { silence_threshold }
    }

    pub fn silence_threshold(&self) -> f32 {
        self.silence_threshold
    }

    /// True iff the mean absolute amplitude of `frame` exceeds the threshold.
    pub fn has_significant_audio(&self, frame: &[f32]) -> bool {
        mean_abs_amplitude(frame) > self.silence_threshold
    }

    /// Same decision made directly on PCM16 bytes, without decoding.
    pub fn has_significant_pcm(&self, bytes: &[u8]) -> bool {
        mean_abs_amplitude_pcm(bytes) > self.silence_threshold
    }
}

/// Mean absolute amplitude of normalized samples. Empty frames are silent.
pub fn mean_abs_amplitude(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f32 = frame
        .iter()
        .map(|s| if s.is_finite() { s.abs() } else { 0.0 })
        .sum();
    sum / frame.len() as f32
}

/// Mean absolute amplitude of PCM16 little-endian bytes.
pub fn mean_abs_amplitude_pcm(bytes: &[u8]) -> f32 {
    let samples = bytes.len() / pcm::BYTES_PER_SAMPLE;
    if samples == 0 {
        return 0.0;
    }
    let sum: f64 = bytes
        .chunks_exact(pcm::BYTES_PER_SAMPLE)
        .map(|pair| f64::from(pcm::decode_sample(i16::from_le_bytes([pair[0], pair[1]])).abs()))
        .sum();
    (sum / samples as f64) as f32
}

// =============================================================================
// Energy meter
// =============================================================================

/// Frequency-domain energy level on a 0-100 scale.
///
/// Each call windows the most recent `fft_size` samples (Hann), takes the
/// magnitude of the positive-frequency bins, smooths them against the previous
/// spectrum, maps each bin from decibels onto 0-255, and rescales the average
/// bin value to 0-100.
pub struct EnergyMeter {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    smoothing: f32,
}

impl std::fmt::Debug for EnergyMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnergyMeter")
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .finish()
    }
}

impl Default for EnergyMeter {
    fn default() -> Self {
        Self::new(DEFAULT_ENERGY_FFT_SIZE, DEFAULT_ENERGY_SMOOTHING)
    }
}

impl EnergyMeter {
    /// Create a meter. `fft_size` is raised to at least 32; `smoothing` is clamped to `[0, 1)`.
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let fft_size = fft_size.max(32);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch_len = fft.get_inplace_scratch_len();

        let window = (0..fft_size)
            .map(|i| {
                0.5 * (1.0
                    - (2.0 * std::f32::consts::PI * i as f32 / (fft_size - 1) as f32).cos())
            })
            .collect();

        Self {
            fft,
            fft_size,
            window,
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            smoothed: vec![0.0; fft_size / 2],
            smoothing: if smoothing.is_finite() {
                smoothing.clamp(0.0, 0.99)
            } else {
                0.0
            },
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Forget the smoothed spectrum.
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|m| *m = 0.0);
    }

    /// Sample the level of the latest audio. Short frames are zero-padded at the front.
    pub fn level(&mut self, frame: &[f32]) -> f32 {
        let n = self.fft_size;
        let tail = &frame[frame.len().saturating_sub(n)..];
        let pad = n - tail.len();

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { tail[i - pad] };
            let sample = if sample.is_finite() { sample } else { 0.0 };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let bins = n / 2;
        let mut total = 0.0f32;
        for k in 0..bins {
            let magnitude = self.buffer[k].norm() / n as f32;
            let smoothed = self.smoothing * self.smoothed[k] + (1.0 - self.smoothing) * magnitude;
            self.smoothed[k] = smoothed;
            total += magnitude_to_byte(smoothed);
        }

        let average = total / bins as f32;
        (average / 255.0 * 100.0).clamp(0.0, 100.0)
    }

    /// Level of a PCM16 frame.
    pub fn level_pcm(&mut self, bytes: &[u8], scratch: &mut Vec<f32>) -> f32 {
        pcm::decode_into(bytes, scratch);
        self.level(scratch)
    }
}

#[inline]
fn magnitude_to_byte(magnitude: f32) -> f32 {
    if magnitude <= 0.0 {
        return 0.0;
    }
    let db = 20.0 * magnitude.log10();
    ((db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS) * 255.0)
        .floor()
        .clamp(0.0, 255.0)
}
