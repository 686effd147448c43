//! WASAPI microphone backend.
//!
//! Binds capture endpoints by enumeration index and opens them in shared
//! mode at the requested sample rate, mono 16-bit.

use echo_capture_core::models::audio_models::AudioSource;
use echo_capture_core::models::config::CaptureDeviceConfig;
use echo_capture_core::models::error::CaptureError;
use echo_capture_core::traits::capture_backend::{CaptureDevice, CaptureDeviceBackend};

use crate::device_enumerator::{ComGuard, DeviceEnumerator};
use crate::wasapi_stream::{Endpoint, WasapiStream};

/// Microphone capture through WASAPI capture endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct WasapiCaptureBackend;

impl WasapiCaptureBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureDeviceBackend for WasapiCaptureBackend {
    fn device_count(&self) -> usize {
        match count_capture_devices() {
            Ok(count) => count,
            Err(e) => {
                log::warn!("capture endpoint enumeration failed: {}", e);
                0
            }
        }
    }

    fn list_devices(&self) -> Result<Vec<AudioSource>, CaptureError> {
        let _com = ComGuard::init()?;
        let enumerator = DeviceEnumerator::new()?;
        let devices = enumerator.list_capture_devices()?;
        Ok(devices)
    }

    fn open(&self, config: &CaptureDeviceConfig) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        config.validate()?;
        let endpoint = resolve_endpoint(config.device_index)?;
        log::debug!("opening WASAPI capture {:?} at {}Hz", endpoint, config.sample_rate);
        Ok(Box::new(WasapiStream::new(
            endpoint,
            config.format(),
            config.period_ms,
            config.buffer_count,
        )))
    }
}

fn count_capture_devices() -> Result<usize, CaptureError> {
    let _com = ComGuard::init()?;
    let enumerator = DeviceEnumerator::new()?;
    let count = enumerator.capture_device_count()?;
    Ok(count)
}

fn resolve_endpoint(device_index: i32) -> Result<Endpoint, CaptureError> {
    let _com = ComGuard::init()?;
    let enumerator = DeviceEnumerator::new()?;
    let endpoint = match enumerator.capture_device_id(device_index)? {
        Some(id) => Endpoint::Capture(id),
        None => Endpoint::DefaultCapture,
    };
    Ok(endpoint)
}
