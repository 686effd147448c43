use crate::models::codec_format::AudioCodecFormat;
use crate::models::error::CaptureError;

/// Codec encoder fed with cancelled PCM.
pub trait AudioEncoder: Send + Sync {
    /// Formats this encoder can produce, in order of preference.
    fn supported_formats(&self) -> Vec<AudioCodecFormat>;

    /// Encode mono or interleaved 16-bit PCM in `format`.
    fn encode(&self, pcm: &[i16], format: &AudioCodecFormat) -> Result<Vec<u8>, CaptureError>;
}
