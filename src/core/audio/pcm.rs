//! PCM16 codec.
//!
//! Converts between normalized `f32` samples in `[-1.0, 1.0]` and 16-bit signed
//! little-endian linear PCM, the only audio format carried on either link.
//!
//! Encoding is asymmetric: negative samples scale by 32768 and non-negative
//! samples by 32767, so both ends of the range map onto `i16` without overflow.
//! Decoding divides every sample by 32768.

use bytes::{BufMut, Bytes, BytesMut};

/// Fixed sample rate of every audio frame on both links (24 kHz).
pub const PCM_SAMPLE_RATE: u32 = 24_000;

/// Number of bytes per PCM16 sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Bytes of mono PCM16 audio per millisecond at [`PCM_SAMPLE_RATE`].
pub const BYTES_PER_MS: usize = (PCM_SAMPLE_RATE as usize / 1000) * BYTES_PER_SAMPLE;

/// A decoded clip ready for an audio sink.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    /// Interleaved samples in `[-1.0, 1.0)`.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmBuffer {
    /// Playback duration of the buffer.
    pub fn duration(&self) -> std::time::Duration {
        let nanos = self.frames() as u64 * 1_000_000_000 / u64::from(self.sample_rate.max(1));
        std::time::Duration::from_nanos(nanos)
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }
}

/// Encode one sample.
#[inline]
pub fn encode_sample(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Decode one sample.
#[inline]
pub fn decode_sample(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Encode normalized samples into PCM16 little-endian bytes.
///
/// NaN encodes as silence.
pub fn encode(samples: &[f32]) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        let sample = if sample.is_nan() { 0.0 } else { sample };
        out.put_i16_le(encode_sample(sample));
    }
    out.freeze()
}

/// Decode PCM16 little-endian bytes into normalized samples.
///
/// The caller owns the even-length contract; a trailing odd byte is ignored.
pub fn decode(bytes: &[u8]) -> Vec<f32> {
    let mut out = Vec::with_capacity(bytes.len() / BYTES_PER_SAMPLE);
    decode_into(bytes, &mut out);
    out
}

/// Decode into a reusable buffer, replacing its contents.
///
/// Used on the per-frame path so a session keeps one scratch allocation.
pub fn decode_into(bytes: &[u8], out: &mut Vec<f32>) {
    out.clear();
    out.extend(
        bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| decode_sample(i16::from_le_bytes([pair[0], pair[1]]))),
    );
}

/// Decode into a clip tagged with its sample rate and channel count.
pub fn decode_buffer(bytes: &[u8], sample_rate: u32, channels: u16) -> PcmBuffer {
    PcmBuffer {
        samples: decode(bytes),
        sample_rate,
        channels: channels.max(1),
    }
}

/// Truncate a byte slice to an even length so it holds whole samples.
#[inline]
pub fn truncate_to_even(bytes: &[u8]) -> &[u8] {
    &bytes[..bytes.len() & !1]
}

/// Duration in milliseconds of `len` bytes of mono PCM16 at [`PCM_SAMPLE_RATE`].
#[inline]
pub fn bytes_to_ms(len: usize) -> u64 {
    (len / BYTES_PER_MS) as u64
}
