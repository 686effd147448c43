use serde::{Deserialize, Serialize};

use super::audio_models::AudioFormat;
use super::error::CaptureError;

/// Device index meaning "the system default capture device".
pub const DEFAULT_DEVICE_INDEX: i32 = -1;

/// Near-end capture bit depth; fixed for the device lifetime.
pub const DEVICE_BITS_PER_SAMPLE: u16 = 16;

/// Near-end capture channel count; fixed for the device lifetime.
pub const DEVICE_CHANNELS: u16 = 1;

/// Near-end sample rate used until a codec format is negotiated.
pub const DEFAULT_SOURCE_SAMPLE_RATE: u32 = 8000;

pub const DEFAULT_PERIOD_MS: u32 = 20;
pub const DEFAULT_BUFFER_COUNT: u32 = 2;

/// Binding parameters for the near-end capture device.
///
/// Only `sample_rate` may change over the device lifetime, and changing it
/// means reopening the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureDeviceConfig {
    /// Enumeration index, or [`DEFAULT_DEVICE_INDEX`].
    pub device_index: i32,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Duration of audio delivered per callback.
    pub period_ms: u32,
    pub buffer_count: u32,
}

impl CaptureDeviceConfig {
    /// Mono 16-bit capture on `device_index` at `sample_rate`, 20 ms periods.
    pub fn new(device_index: i32, sample_rate: u32) -> Self {
        Self {
            device_index,
            sample_rate,
            ..Self::default()
        }
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels, self.bits_per_sample)
    }

    /// Valid byte count of one full callback buffer.
    pub fn bytes_per_period(&self) -> usize {
        self.format().bytes_per_period(self.period_ms)
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.sample_rate == 0 {
            return Err(CaptureError::ConfigurationFailed(
                "sample rate must be positive".into(),
            ));
        }
        if self.period_ms == 0 {
            return Err(CaptureError::ConfigurationFailed(
                "callback period must be positive".into(),
            ));
        }
        if self.buffer_count == 0 {
            return Err(CaptureError::ConfigurationFailed(
                "at least one capture buffer is required".into(),
            ));
        }
        if self.channels != DEVICE_CHANNELS || self.bits_per_sample != DEVICE_BITS_PER_SAMPLE {
            return Err(CaptureError::ConfigurationFailed(format!(
                "near-end capture must be {}-channel {}-bit, got {}-channel {}-bit",
                DEVICE_CHANNELS, DEVICE_BITS_PER_SAMPLE, self.channels, self.bits_per_sample
            )));
        }
        if self.device_index < DEFAULT_DEVICE_INDEX {
            return Err(CaptureError::ConfigurationFailed(format!(
                "invalid device index {}",
                self.device_index
            )));
        }
        Ok(())
    }
}

impl Default for CaptureDeviceConfig {
    fn default() -> Self {
        Self {
            device_index: DEFAULT_DEVICE_INDEX,
            sample_rate: DEFAULT_SOURCE_SAMPLE_RATE,
            channels: DEVICE_CHANNELS,
            bits_per_sample: DEVICE_BITS_PER_SAMPLE,
            period_ms: DEFAULT_PERIOD_MS,
            buffer_count: DEFAULT_BUFFER_COUNT,
        }
    }
}

/// Processing stages enabled in the echo filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterFeatures {
    pub cancel_echo: bool,
    pub suppress_noise: bool,
    pub auto_gain: bool,
}

impl Default for FilterFeatures {
    fn default() -> Self {
        Self {
            cancel_echo: true,
            suppress_noise: true,
            auto_gain: true,
        }
    }
}

/// Construction parameters of an echo filter.
///
/// Immutable once the filter is built; a format change large enough to
/// matter means building a new filter, never mutating this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoSessionConfig {
    pub near_format: AudioFormat,
    /// Loopback format; also the fixed format the reference device is opened with.
    pub far_format: AudioFormat,
    pub near_delay_ms: u32,
    pub far_delay_ms: u32,
    pub features: FilterFeatures,
}

impl Default for EchoSessionConfig {
    fn default() -> Self {
        Self {
            near_format: AudioFormat::mono_16(DEFAULT_SOURCE_SAMPLE_RATE),
            far_format: AudioFormat::new(44100, 2, 32),
            near_delay_ms: 100,
            far_delay_ms: 250,
            features: FilterFeatures::default(),
        }
    }
}

/// Top-level configuration of an echo-cancelled microphone source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfiguration {
    /// Microphone index, or [`DEFAULT_DEVICE_INDEX`].
    pub device_index: i32,

    /// When false, no devices are opened and lifecycle calls only track state.
    pub enable_source: bool,

    pub echo: EchoSessionConfig,

    /// Reference frames held while the filter is busy; oldest are dropped beyond this.
    pub reference_queue_capacity: usize,

    pub period_ms: u32,
    pub buffer_count: u32,
}

impl PipelineConfiguration {
    pub fn from_json_str(json: &str) -> Result<Self, CaptureError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CaptureError::ConfigurationFailed(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.reference_queue_capacity == 0 {
            return Err(CaptureError::ConfigurationFailed(
                "reference queue capacity must be positive".into(),
            ));
        }
        for (side, format) in [("near", self.echo.near_format), ("far", self.echo.far_format)] {
            if format.sample_rate == 0 || format.channels == 0 || format.bits_per_sample == 0 {
                return Err(CaptureError::ConfigurationFailed(format!(
                    "{} format must have non-zero rate, channels and bit depth",
                    side
                )));
            }
        }
        self.device_config(self.echo.near_format.sample_rate).validate()
    }

    /// Near-end device parameters at `sample_rate`.
    pub fn device_config(&self, sample_rate: u32) -> CaptureDeviceConfig {
        CaptureDeviceConfig {
            device_index: self.device_index,
            sample_rate,
            period_ms: self.period_ms,
            buffer_count: self.buffer_count,
            ..CaptureDeviceConfig::default()
        }
    }
}

impl Default for PipelineConfiguration {
    fn default() -> Self {
        Self {
            device_index: DEFAULT_DEVICE_INDEX,
            enable_source: true,
            echo: EchoSessionConfig::default(),
            reference_queue_capacity: 50,
            period_ms: DEFAULT_PERIOD_MS,
            buffer_count: DEFAULT_BUFFER_COUNT,
        }
    }
}
