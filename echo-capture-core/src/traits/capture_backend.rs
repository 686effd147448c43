use std::sync::Arc;

use crate::models::audio_models::{AudioFormat, AudioSource};
use crate::models::config::CaptureDeviceConfig;
use crate::models::error::CaptureError;

/// Callback invoked when a device buffer is filled.
///
/// Parameters:
/// - `buffer`: the device buffer; may be longer than the audio it carries.
/// - `valid_bytes`: length of the audio-carrying prefix of `buffer`.
pub type FrameCallback = Arc<dyn Fn(&[u8], usize) + Send + Sync + 'static>;

/// An opened capture device.
///
/// Recording control is fire-and-forget: `start_recording` and
/// `stop_recording` toggle the hardware and return, and buffers arrive on a
/// driver-owned thread through the subscribed [`FrameCallback`].
pub trait CaptureDevice: Send {
    /// Format the device was opened with.
    fn format(&self) -> AudioFormat;

    /// Route data-available notifications to `callback`, replacing any previous subscriber.
    fn subscribe(&mut self, callback: FrameCallback);

    /// Detach the current subscriber. Buffers arriving afterwards are discarded.
    fn unsubscribe(&mut self);

    fn start_recording(&mut self) -> Result<(), CaptureError>;

    fn stop_recording(&mut self) -> Result<(), CaptureError>;
}

/// Host API for index-addressable input devices (microphones).
pub trait CaptureDeviceBackend: Send + Sync {
    /// Number of capture devices currently present.
    fn device_count(&self) -> usize;

    /// Enumerate capture devices; index -1 is the default device.
    fn list_devices(&self) -> Result<Vec<AudioSource>, CaptureError>;

    /// Bind the device at `config.device_index` with the given format and buffering.
    fn open(&self, config: &CaptureDeviceConfig) -> Result<Box<dyn CaptureDevice>, CaptureError>;
}

/// Host API for capturing what the default output device is playing.
pub trait LoopbackBackend: Send + Sync {
    fn is_available(&self) -> bool;

    /// Open loopback capture on the default render device at a fixed `format`.
    fn open_default(&self, format: AudioFormat) -> Result<Box<dyn CaptureDevice>, CaptureError>;
}
