//! G.711 µ-law helpers for 8 kHz telephony audio.

use std::time::Duration;

/// Telephony sample rate for µ-law audio.
pub const MULAW_SAMPLE_RATE: u32 = 8000;

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

/// Decode one µ-law byte to a 16-bit linear sample.
pub fn mulaw_to_linear(byte: u8) -> i16 {
    let b = !byte;
    let sign = b & 0x80;
    let exponent = (b >> 4) & 0x07;
    let mantissa = (b & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encode a 16-bit linear sample as µ-law.
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign: u8 = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0
    };
    magnitude = magnitude.min(MULAW_CLIP) + MULAW_BIAS;

    let highest_bit = 31 - (magnitude as u32).leading_zeros() as i32;
    let exponent = (highest_bit - 7).clamp(0, 7);
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    !(sign | ((exponent as u8) << 4) | mantissa as u8)
}

/// Decode µ-law audio to normalized `f32` samples in [-1.0, 1.0].
pub fn decode_mulaw(data: &[u8]) -> Vec<f32> {
    data.iter()
        .map(|&b| mulaw_to_linear(b) as f32 / 32768.0)
        .collect()
}

/// Playback duration of a µ-law buffer in milliseconds (one byte per sample).
pub fn mulaw_duration_ms(bytes: usize) -> u64 {
    (bytes as u64 * 1000) / MULAW_SAMPLE_RATE as u64
}

/// Playback duration of a µ-law buffer.
pub fn mulaw_duration(bytes: usize) -> Duration {
    Duration::from_micros(bytes as u64 * 1_000_000 / MULAW_SAMPLE_RATE as u64)
}
