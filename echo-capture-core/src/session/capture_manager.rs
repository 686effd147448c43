use std::sync::Arc;

use crate::models::audio_models::{AudioFrame, AudioSource};
use crate::models::config::{CaptureDeviceConfig, DEFAULT_DEVICE_INDEX};
use crate::models::error::CaptureError;
use crate::processing::callback_gate::CallbackGate;
use crate::traits::capture_backend::{CaptureDevice, CaptureDeviceBackend, FrameCallback};

/// Receives each captured frame on the device thread.
pub type FrameHandler = Arc<dyn Fn(&AudioFrame) + Send + Sync + 'static>;

/// Receives device problems; lifecycle calls never return them.
pub type ErrorSink = Arc<dyn Fn(&CaptureError) + Send + Sync + 'static>;

/// A device together with its subscription gate.
pub(crate) struct BoundDevice {
    device: Box<dyn CaptureDevice>,
    gate: Arc<CallbackGate>,
    recording: bool,
}

impl BoundDevice {
    /// Subscribe `handler` to `device` behind a fresh gate.
    pub(crate) fn bind(mut device: Box<dyn CaptureDevice>, handler: FrameHandler) -> Self {
        let gate = Arc::new(CallbackGate::new());
        let callback: FrameCallback = {
            let gate = Arc::clone(&gate);
            Arc::new(move |buffer: &[u8], valid_bytes: usize| {
                gate.run(|| handler(&AudioFrame::from_callback(buffer, valid_bytes)));
            })
        };
        device.subscribe(callback);
        Self {
            device,
            gate,
            recording: false,
        }
    }

    pub(crate) fn is_recording(&self) -> bool {
        self.recording
    }

    /// Begin recording unless already recording.
    pub(crate) fn start(&mut self) -> Result<(), CaptureError> {
        if !self.recording {
            self.device.start_recording()?;
            self.recording = true;
        }
        Ok(())
    }

    /// Stop recording unless already stopped.
    pub(crate) fn stop(&mut self) -> Result<(), CaptureError> {
        if self.recording {
            self.recording = false;
            self.device.stop_recording()?;
        }
        Ok(())
    }

    /// Unsubscribe, wait out in-flight callbacks, then stop the hardware.
    pub(crate) fn release(mut self) -> Result<(), CaptureError> {
        self.device.unsubscribe();
        self.gate.close();
        self.stop()
    }
}

/// Owns the near-end (microphone) capture device.
///
/// Channel count and bit depth are fixed at mono 16-bit; only the sample
/// rate varies between bindings. Binding failures are reported through the
/// [`ErrorSink`] and leave any previous binding untouched.
pub struct CaptureDeviceManager<B: CaptureDeviceBackend> {
    backend: B,
    template: CaptureDeviceConfig,
    handler: FrameHandler,
    on_error: ErrorSink,
    bound: Option<BoundDevice>,
    config: Option<CaptureDeviceConfig>,
}

impl<B: CaptureDeviceBackend> CaptureDeviceManager<B> {
    /// `template` supplies the period and buffer count of every binding.
    pub fn new(
        backend: B,
        template: CaptureDeviceConfig,
        handler: FrameHandler,
        on_error: ErrorSink,
    ) -> Self {
        Self {
            backend,
            template,
            handler,
            on_error,
            bound: None,
            config: None,
        }
    }

    /// Bind the device at `device_index` at `sample_rate`.
    ///
    /// The new device is opened before the previous one is touched; only
    /// once that succeeds is the previous device detached and stopped, and
    /// the new one subscribed, so frames from two devices never interleave.
    /// A failed open leaves the previous binding as it was. Returns whether
    /// a device is now bound at the requested parameters.
    pub fn open(&mut self, device_index: i32, sample_rate: u32) -> bool {
        let config = CaptureDeviceConfig {
            device_index,
            sample_rate,
            ..self.template
        };
        if let Err(e) = self.check_device(&config) {
            self.report(e);
            return false;
        }

        let device = match self.backend.open(&config) {
            Ok(device) => device,
            Err(e) => {
                self.report(e);
                return false;
            }
        };

        self.release_bound();
        log::debug!(
            "capture device {} bound at {}Hz, {} ms period",
            device_index,
            sample_rate,
            config.period_ms
        );
        self.bound = Some(BoundDevice::bind(device, Arc::clone(&self.handler)));
        self.config = Some(config);
        true
    }

    pub fn start(&mut self) {
        let result = match self.bound.as_mut() {
            Some(bound) => bound.start(),
            None => Ok(()),
        };
        if let Err(e) = result {
            self.report(e);
        }
    }

    pub fn stop(&mut self) {
        let result = match self.bound.as_mut() {
            Some(bound) => bound.stop(),
            None => Ok(()),
        };
        if let Err(e) = result {
            self.report(e);
        }
    }

    pub fn pause(&mut self) {
        self.stop();
    }

    pub fn resume(&mut self) {
        self.start();
    }

    /// Unsubscribe and stop the device, then release it.
    pub fn close(&mut self) {
        self.release_bound();
        self.config = None;
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.bound.as_ref().is_some_and(BoundDevice::is_recording)
    }

    /// Parameters of the current binding.
    pub fn config(&self) -> Option<CaptureDeviceConfig> {
        self.config
    }

    pub fn list_devices(&self) -> Result<Vec<AudioSource>, CaptureError> {
        self.backend.list_devices()
    }

    fn check_device(&self, config: &CaptureDeviceConfig) -> Result<(), CaptureError> {
        let count = self.backend.device_count();
        if count == 0 {
            return Err(CaptureError::DeviceUnavailable);
        }
        let max_index = count as i32 - 1;
        if config.device_index > max_index || config.device_index < DEFAULT_DEVICE_INDEX {
            return Err(CaptureError::DeviceIndexOutOfRange {
                index: config.device_index,
                max_index,
            });
        }
        config.validate()
    }

    fn release_bound(&mut self) {
        if let Some(bound) = self.bound.take() {
            if let Err(e) = bound.release() {
                self.report(e);
            }
        }
    }

    fn report(&self, error: CaptureError) {
        log::warn!("{}", error);
        (self.on_error)(&error);
    }
}

impl<B: CaptureDeviceBackend> Drop for CaptureDeviceManager<B> {
    fn drop(&mut self) {
        self.release_bound();
    }
}
