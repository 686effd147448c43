use std::fmt;

use serde::{Deserialize, Serialize};

/// Which side of the echo path a device captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioTrackType {
    /// Near-end microphone.
    Mic,
    /// Far-end system output captured via loopback.
    System,
}

/// PCM layout of a raw device stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    /// Mono 16-bit PCM at `sample_rate`.
    pub const fn mono_16(sample_rate: u32) -> Self {
        Self::new(sample_rate, 1, 16)
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize).div_ceil(8)
    }

    /// Bytes occupied by one sample across all channels.
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Samples per channel in a period of `period_ms`.
    pub fn frames_per_period(&self, period_ms: u32) -> usize {
        (self.sample_rate as u64 * period_ms as u64 / 1000) as usize
    }

    /// Byte length of a period of `period_ms`, e.g. 320 bytes for 20 ms of 8 kHz mono 16-bit.
    pub fn bytes_per_period(&self, period_ms: u32) -> usize {
        self.frames_per_period(period_ms) * self.block_align()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz/{}ch/{}bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

/// One captured device buffer.
///
/// Device callbacks over-allocate their buffers; only the first
/// `valid_bytes` bytes carry audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Vec<u8>,
    valid_bytes: usize,
}

impl AudioFrame {
    /// Copies the valid prefix out of a callback buffer.
    pub fn from_callback(buffer: &[u8], valid_bytes: usize) -> Self {
        let valid_bytes = valid_bytes.min(buffer.len());
        Self {
            data: buffer[..valid_bytes].to_vec(),
            valid_bytes,
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        let valid_bytes = data.len();
        Self { data, valid_bytes }
    }

    /// The audio-carrying prefix.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.valid_bytes]
    }

    pub fn valid_bytes(&self) -> usize {
        self.valid_bytes
    }

    /// Sample count implied by the valid byte count.
    pub fn sample_count(&self, bytes_per_sample: usize) -> usize {
        if bytes_per_sample == 0 {
            return 0;
        }
        self.valid_bytes / bytes_per_sample
    }

    pub fn is_empty(&self) -> bool {
        self.valid_bytes == 0
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.data.truncate(self.valid_bytes);
        self.data
    }
}

/// A capture device as reported by a backend's enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioSource {
    /// Enumeration index; -1 denotes the system default device.
    pub index: i32,
    pub id: String,
    pub name: String,
    pub source_type: AudioTrackType,
    pub is_default: bool,
}

/// Real-time level metering (RMS and peak, 0.0–1.0) for both streams.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioLevels {
    pub near_level: f32,
    pub reference_level: f32,
    pub peak_near_level: f32,
    pub peak_reference_level: f32,
}

/// Counters for debugging a running pipeline.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineDiagnostics {
    pub session_id: String,
    pub started_at: Option<String>,
    pub near_callback_count: u64,
    pub reference_callback_count: u64,
    pub frames_written: u64,
    pub frames_drained: u64,
    pub reference_frames_dropped: u64,
    pub encoded_samples: u64,
    pub encoded_bytes: u64,
    pub filter_failures: u64,
    pub encoder_failures: u64,
    pub reinitializations: u64,
    pub near_format: String,
    pub reference_format: String,
}
