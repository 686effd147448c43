use std::sync::Arc;

use parking_lot::RwLock;

use crate::models::codec_format::AudioCodecFormat;
use crate::models::error::CaptureError;
use crate::processing::pcm;
use crate::traits::audio_encoder::AudioEncoder;

/// One encoded frame ready for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSample {
    /// Frame duration in RTP clock units (samples per channel at the clock rate).
    pub duration_units: u32,
    pub data: Vec<u8>,
}

/// Hands cancelled PCM to the codec encoder in the currently selected format.
///
/// Near-end capture runs at the selected format's clock rate, so one mono
/// sample is one RTP clock unit.
pub struct FrameCodecBridge {
    encoder: Arc<dyn AudioEncoder>,
    format: RwLock<Option<AudioCodecFormat>>,
}

impl FrameCodecBridge {
    pub fn new(encoder: Arc<dyn AudioEncoder>, format: Option<AudioCodecFormat>) -> Self {
        Self {
            encoder,
            format: RwLock::new(format),
        }
    }

    pub fn set_format(&self, format: AudioCodecFormat) {
        *self.format.write() = Some(format);
    }

    /// Drop the selected format; later encodes fail until one is set.
    pub fn clear_format(&self) {
        *self.format.write() = None;
    }

    pub fn format(&self) -> Option<AudioCodecFormat> {
        self.format.read().clone()
    }

    pub fn supported_formats(&self) -> Vec<AudioCodecFormat> {
        self.encoder.supported_formats()
    }

    /// Encode little-endian 16-bit PCM bytes.
    pub fn encode_bytes(&self, bytes: &[u8]) -> Result<EncodedSample, CaptureError> {
        self.encode_samples(&pcm::bytes_to_samples(bytes))
    }

    pub fn encode_samples(&self, samples: &[i16]) -> Result<EncodedSample, CaptureError> {
        let format = self
            .format()
            .ok_or_else(|| CaptureError::EncodingFailed("no codec format selected".into()))?;
        let data = self.encoder.encode(samples, &format)?;
        Ok(EncodedSample {
            duration_units: samples.len() as u32,
            data,
        })
    }
}
