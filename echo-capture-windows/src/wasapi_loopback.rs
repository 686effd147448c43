//! WASAPI loopback backend for the far-end reference.
//!
//! Captures the mix going to the default render endpoint using
//! `AUDCLNT_STREAMFLAGS_LOOPBACK`. No special permissions are needed, and
//! DRM-protected audio arrives as silence.

use windows::Win32::Media::Audio::eRender;

use echo_capture_core::models::audio_models::AudioFormat;
use echo_capture_core::models::error::CaptureError;
use echo_capture_core::traits::capture_backend::{CaptureDevice, LoopbackBackend};

use crate::device_enumerator::{ComGuard, DeviceEnumerator};
use crate::wasapi_stream::{Endpoint, WasapiStream};

/// Period of loopback frames.
const LOOPBACK_PERIOD_MS: u32 = 10;
const LOOPBACK_BUFFER_COUNT: u32 = 4;

/// Loopback capture of the default render endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct WasapiLoopbackBackend;

impl WasapiLoopbackBackend {
    pub fn new() -> Self {
        Self
    }
}

impl LoopbackBackend for WasapiLoopbackBackend {
    fn is_available(&self) -> bool {
        match has_render_endpoint() {
            Ok(available) => available,
            Err(e) => {
                log::warn!("render endpoint lookup failed: {}", e);
                false
            }
        }
    }

    fn open_default(&self, format: AudioFormat) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        log::debug!("opening WASAPI loopback at {}", format);
        Ok(Box::new(WasapiStream::new(
            Endpoint::DefaultRenderLoopback,
            format,
            LOOPBACK_PERIOD_MS,
            LOOPBACK_BUFFER_COUNT,
        )))
    }
}

fn has_render_endpoint() -> Result<bool, CaptureError> {
    let _com = ComGuard::init()?;
    let enumerator = DeviceEnumerator::new()?;
    let available = enumerator.default_endpoint(eRender).is_ok();
    Ok(available)
}
