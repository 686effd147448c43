//! Windows microphone privacy check.
//!
//! On Windows 10 1803+ microphone access is governed by
//! Settings > Privacy > Microphone. Unpackaged desktop apps get no consent
//! prompt; a disabled toggle shows up as a failed activation.

use windows::Win32::Foundation::E_ACCESSDENIED;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::CLSCTX_ALL;

use echo_capture_core::models::error::CaptureError;

use crate::device_enumerator::{ComGuard, DeviceEnumerator};

/// Whether the default microphone can be activated.
///
/// Returns `Ok(false)` when no capture endpoint exists or access is
/// denied or the device is held exclusively elsewhere.
pub fn check_microphone_permission() -> Result<bool, CaptureError> {
    let _com = ComGuard::init()?;
    let device = match DeviceEnumerator::new()?.default_endpoint(eCapture) {
        Ok(device) => device,
        Err(CaptureError::DeviceUnavailable) => return Ok(false),
        Err(e) => return Err(e),
    };

    let activation: windows::core::Result<IAudioClient> = unsafe { device.Activate(CLSCTX_ALL, None) };
    match activation {
        Ok(_) => Ok(true),
        Err(e) if e.code() == E_ACCESSDENIED || e.code() == AUDCLNT_E_DEVICE_IN_USE => Ok(false),
        Err(e) => {
            log::warn!("unexpected error checking microphone access: {}", e);
            Ok(true)
        }
    }
}

/// Loopback capture needs no permission on Windows.
pub fn check_loopback_permission() -> bool {
    true
}
