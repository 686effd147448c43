use crate::models::codec_format::AudioCodecFormat;
use crate::models::error::CaptureError;
use crate::models::state::PipelineState;

/// Capability surface a media session drives an encoded audio source through.
///
/// Lifecycle calls are idempotent and never fail; problems surface through
/// the registered delegates instead.
pub trait EncodedAudioSource: Send {
    fn state(&self) -> PipelineState;

    /// Begin capturing both streams. Transitions: idle → started.
    fn start(&mut self);

    /// Halt near-end capture only. Transitions: started → paused.
    fn pause(&mut self);

    /// Restart near-end capture. Transitions: paused → started.
    fn resume(&mut self);

    /// Tear down both devices. Transitions: any → closed (terminal).
    fn close(&mut self);

    fn is_paused(&self) -> bool;

    /// Candidate codec formats offered in negotiation.
    fn source_formats(&self) -> Vec<AudioCodecFormat>;

    /// Narrow the candidate set to formats accepted by `filter`.
    fn restrict_formats(&mut self, filter: &dyn Fn(&AudioCodecFormat) -> bool);

    /// Apply the negotiated format, reopening the microphone if its clock rate differs.
    fn set_source_format(&mut self, format: AudioCodecFormat);

    fn has_encoded_subscribers(&self) -> bool;

    /// Inject externally captured raw PCM.
    ///
    /// Sources that only emit filter-processed, pre-encoded samples return
    /// [`CaptureError::UnsupportedOperation`].
    fn external_raw_sample(
        &mut self,
        sample_rate: u32,
        duration_ms: u32,
        samples: &[i16],
    ) -> Result<(), CaptureError>;
}
