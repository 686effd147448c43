//! PCM byte/sample conversion and level metering.
//!
//! Device buffers are little-endian byte streams. 16-bit streams are signed
//! integers; 32-bit streams are IEEE floats (the shared-mode mix format of
//! loopback endpoints).

use crate::models::audio_models::AudioFormat;

/// Interpret little-endian bytes as 16-bit PCM. A trailing odd byte is ignored.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Serialize 16-bit PCM as little-endian bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Normalize raw device bytes to `[-1.0, 1.0]` floats.
///
/// Formats other than 16-bit integer and 32-bit float yield no samples.
pub fn normalized_samples(bytes: &[u8], format: &AudioFormat) -> Vec<f32> {
    match format.bits_per_sample {
        16 => bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
            .collect(),
        32 => bytes
            .chunks_exact(4)
            .map(|quad| f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]))
            .collect(),
        _ => Vec::new(),
    }
}

/// Scale a normalized sample back to 16-bit PCM, clamping out-of-range input.
pub fn float_to_sample(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// RMS level of normalized samples.
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Peak absolute level of normalized samples.
pub fn peak_level(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

/// `(rms, peak)` of a raw device buffer.
pub fn levels(bytes: &[u8], format: &AudioFormat) -> (f32, f32) {
    let samples = normalized_samples(bytes, format);
    (rms_level(&samples), peak_level(&samples))
}
