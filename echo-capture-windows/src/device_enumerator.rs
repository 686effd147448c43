//! Windows audio device enumeration via the MMDevice API.
//!
//! Capture endpoints are addressed by their position in the active
//! endpoint collection, with -1 standing for the console default.

use windows::core::*;
use windows::Win32::Devices::FunctionDiscovery::*;
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::StructuredStorage::PropVariantClear;
use windows::Win32::System::Com::*;
use windows::Win32::System::Variant::*;

use echo_capture_core::models::audio_models::{AudioSource, AudioTrackType};
use echo_capture_core::models::config::DEFAULT_DEVICE_INDEX;
use echo_capture_core::models::error::CaptureError;

pub(crate) fn backend_error(call: &str, e: Error) -> CaptureError {
    CaptureError::Backend(format!("{} failed: {}", call, e))
}

/// Keeps COM initialized on the current thread for its lifetime.
///
/// A thread already initialized in another apartment is used as is and
/// left initialized on drop.
pub(crate) struct ComGuard {
    owned: bool,
}

impl ComGuard {
    pub(crate) fn init() -> std::result::Result<Self, CaptureError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            return Ok(Self { owned: false });
        }
        hr.ok().map_err(|e| backend_error("CoInitializeEx", e))?;
        Ok(Self { owned: true })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.owned {
            unsafe { CoUninitialize() };
        }
    }
}

/// Audio device enumerator using the Windows MMDevice API.
///
/// Requires COM to be initialized on the calling thread.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    pub fn new() -> std::result::Result<Self, CaptureError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| backend_error("MMDeviceEnumerator creation", e))?;
            Ok(Self { enumerator })
        }
    }

    /// Number of active capture endpoints.
    pub fn capture_device_count(&self) -> std::result::Result<usize, CaptureError> {
        unsafe {
            let count = self
                .capture_collection()?
                .GetCount()
                .map_err(|e| backend_error("GetCount", e))?;
            Ok(count as usize)
        }
    }

    /// MMDevice id of the capture endpoint at `index`, or `None` for the
    /// default sentinel.
    pub fn capture_device_id(&self, index: i32) -> std::result::Result<Option<String>, CaptureError> {
        if index == DEFAULT_DEVICE_INDEX {
            return Ok(None);
        }
        let count = self.capture_device_count()?;
        if count == 0 {
            return Err(CaptureError::DeviceUnavailable);
        }
        if index < 0 || index as usize >= count {
            return Err(CaptureError::DeviceIndexOutOfRange {
                index,
                max_index: count as i32 - 1,
            });
        }
        unsafe {
            let device = self
                .capture_collection()?
                .Item(index as u32)
                .map_err(|e| backend_error("IMMDeviceCollection::Item", e))?;
            Ok(Some(Self::device_id(&device)?))
        }
    }

    /// Active capture endpoints, led by a `-1` entry for the default.
    pub fn list_capture_devices(&self) -> std::result::Result<Vec<AudioSource>, CaptureError> {
        unsafe {
            let collection = self.capture_collection()?;
            let count = collection.GetCount().map_err(|e| backend_error("GetCount", e))?;
            let default_id = self
                .default_endpoint(eCapture)
                .ok()
                .and_then(|d| Self::device_id(&d).ok());

            let mut devices = Vec::with_capacity(count as usize + 1);
            if let Some(id) = &default_id {
                devices.push(AudioSource {
                    index: DEFAULT_DEVICE_INDEX,
                    id: id.clone(),
                    name: "Default Microphone".into(),
                    source_type: AudioTrackType::Mic,
                    is_default: true,
                });
            }

            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let Ok(id) = Self::device_id(&device) else {
                    continue;
                };
                let name = Self::friendly_name(&device).unwrap_or_else(|| format!("Device {}", i));
                devices.push(AudioSource {
                    index: i as i32,
                    is_default: default_id.as_deref() == Some(id.as_str()),
                    id,
                    name,
                    source_type: AudioTrackType::Mic,
                });
            }

            Ok(devices)
        }
    }

    /// The console default endpoint for `data_flow`.
    pub fn default_endpoint(&self, data_flow: EDataFlow) -> std::result::Result<IMMDevice, CaptureError> {
        unsafe {
            self.enumerator
                .GetDefaultAudioEndpoint(data_flow, eConsole)
                .map_err(|_| CaptureError::DeviceUnavailable)
        }
    }

    pub fn device_by_id(&self, id: &str) -> std::result::Result<IMMDevice, CaptureError> {
        let wide_id: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
        unsafe {
            self.enumerator
                .GetDevice(PCWSTR(wide_id.as_ptr()))
                .map_err(|e| backend_error("IMMDeviceEnumerator::GetDevice", e))
        }
    }

    fn capture_collection(&self) -> std::result::Result<IMMDeviceCollection, CaptureError> {
        unsafe {
            self.enumerator
                .EnumAudioEndpoints(eCapture, DEVICE_STATE_ACTIVE)
                .map_err(|e| backend_error("EnumAudioEndpoints", e))
        }
    }

    fn device_id(device: &IMMDevice) -> std::result::Result<String, CaptureError> {
        unsafe {
            let id = device.GetId().map_err(|e| backend_error("GetId", e))?;
            let text = id.to_string().unwrap_or_default();
            CoTaskMemFree(Some(id.0 as *const _));
            Ok(text)
        }
    }

    /// Read PKEY_Device_FriendlyName from the device property store.
    fn friendly_name(device: &IMMDevice) -> Option<String> {
        unsafe {
            let store = device.OpenPropertyStore(STGM_READ).ok()?;
            let mut prop = store.GetValue(&PKEY_Device_FriendlyName).ok()?;

            let name = if prop.Anonymous.Anonymous.vt == VT_LPWSTR {
                let pwsz = prop.Anonymous.Anonymous.Anonymous.pwszVal;
                if pwsz.is_null() {
                    None
                } else {
                    pwsz.to_string().ok()
                }
            } else {
                None
            };

            PropVariantClear(&mut prop).ok();
            name
        }
    }
}
