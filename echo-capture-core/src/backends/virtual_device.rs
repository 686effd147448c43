//! In-memory capture backends for running the pipeline without hardware.
//!
//! Frames are pushed by hand through a [`VirtualDeviceHandle`], which also
//! records every control call the pipeline makes against the device.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::audio_models::{AudioFormat, AudioSource, AudioTrackType};
use crate::models::config::{CaptureDeviceConfig, DEFAULT_DEVICE_INDEX};
use crate::models::error::CaptureError;
use crate::traits::capture_backend::{
    CaptureDevice, CaptureDeviceBackend, FrameCallback, LoopbackBackend,
};

/// Padding appended to pushed frames, mimicking over-allocated driver buffers.
const BUFFER_SLACK: usize = 16;

struct VirtualDeviceState {
    config: CaptureDeviceConfig,
    format: AudioFormat,
    callback: Option<FrameCallback>,
    recording: bool,
    starts: usize,
    stops: usize,
    events: Vec<&'static str>,
}

/// Test-side view of an opened virtual device.
#[derive(Clone)]
pub struct VirtualDeviceHandle {
    state: Arc<Mutex<VirtualDeviceState>>,
}

impl VirtualDeviceHandle {
    fn new(config: CaptureDeviceConfig, format: AudioFormat) -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualDeviceState {
                config,
                format,
                callback: None,
                recording: false,
                starts: 0,
                stops: 0,
                events: Vec::new(),
            })),
        }
    }

    /// Deliver `bytes` as one captured buffer.
    ///
    /// Returns `false` (and drops the frame) unless the device is recording
    /// and has a subscriber. The callback runs on the calling thread.
    pub fn push_frame(&self, bytes: &[u8]) -> bool {
        let callback = {
            let state = self.state.lock();
            if !state.recording {
                return false;
            }
            match &state.callback {
                Some(callback) => Arc::clone(callback),
                None => return false,
            }
        };

        let mut buffer = bytes.to_vec();
        buffer.resize(bytes.len() + BUFFER_SLACK, 0);
        callback(&buffer, bytes.len());
        true
    }

    /// Deliver one period of silence sized from the device configuration.
    pub fn push_silence(&self) -> bool {
        let bytes = {
            let state = self.state.lock();
            state.format.bytes_per_period(state.config.period_ms)
        };
        self.push_frame(&vec![0u8; bytes])
    }

    pub fn config(&self) -> CaptureDeviceConfig {
        self.state.lock().config
    }

    pub fn format(&self) -> AudioFormat {
        self.state.lock().format
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().recording
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.lock().callback.is_some()
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().starts
    }

    pub fn stop_count(&self) -> usize {
        self.state.lock().stops
    }

    /// Control calls in order: `subscribe`, `unsubscribe`, `start`, `stop`.
    pub fn events(&self) -> Vec<&'static str> {
        self.state.lock().events.clone()
    }
}

struct VirtualDevice {
    handle: VirtualDeviceHandle,
}

impl CaptureDevice for VirtualDevice {
    fn format(&self) -> AudioFormat {
        self.handle.format()
    }

    fn subscribe(&mut self, callback: FrameCallback) {
        let mut state = self.handle.state.lock();
        state.callback = Some(callback);
        state.events.push("subscribe");
    }

    fn unsubscribe(&mut self) {
        let mut state = self.handle.state.lock();
        state.callback = None;
        state.events.push("unsubscribe");
    }

    fn start_recording(&mut self) -> Result<(), CaptureError> {
        let mut state = self.handle.state.lock();
        state.recording = true;
        state.starts += 1;
        state.events.push("start");
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<(), CaptureError> {
        let mut state = self.handle.state.lock();
        state.recording = false;
        state.stops += 1;
        state.events.push("stop");
        Ok(())
    }
}

/// Shared log of devices opened through a backend.
#[derive(Default)]
struct OpenedDevices {
    handles: Mutex<Vec<VirtualDeviceHandle>>,
}

impl OpenedDevices {
    fn record(&self, handle: VirtualDeviceHandle) -> Box<dyn CaptureDevice> {
        self.handles.lock().push(handle.clone());
        Box::new(VirtualDevice { handle })
    }

    fn last(&self) -> Option<VirtualDeviceHandle> {
        self.handles.lock().last().cloned()
    }

    fn all(&self) -> Vec<VirtualDeviceHandle> {
        self.handles.lock().clone()
    }
}

/// A microphone backend with a fixed number of virtual devices.
///
/// Clones share state, so a test can keep one clone and hand another to
/// the pipeline.
#[derive(Clone)]
pub struct VirtualCaptureBackend {
    device_count: usize,
    opened: Arc<OpenedDevices>,
    failing_opens: Arc<AtomicUsize>,
}

impl VirtualCaptureBackend {
    pub fn new(device_count: usize) -> Self {
        Self {
            device_count,
            opened: Arc::new(OpenedDevices::default()),
            failing_opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `count` otherwise valid opens fail with a backend error.
    pub fn fail_next_opens(&self, count: usize) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    /// The most recently opened device.
    pub fn last_opened(&self) -> Option<VirtualDeviceHandle> {
        self.opened.last()
    }

    pub fn opened(&self) -> Vec<VirtualDeviceHandle> {
        self.opened.all()
    }

    pub fn open_count(&self) -> usize {
        self.opened.handles.lock().len()
    }
}

impl CaptureDeviceBackend for VirtualCaptureBackend {
    fn device_count(&self) -> usize {
        self.device_count
    }

    fn list_devices(&self) -> Result<Vec<AudioSource>, CaptureError> {
        let mut devices = Vec::with_capacity(self.device_count + 1);
        if self.device_count > 0 {
            devices.push(AudioSource {
                index: DEFAULT_DEVICE_INDEX,
                id: "virtual-default".into(),
                name: "Default Virtual Microphone".into(),
                source_type: AudioTrackType::Mic,
                is_default: true,
            });
        }
        for index in 0..self.device_count {
            devices.push(AudioSource {
                index: index as i32,
                id: format!("virtual-mic-{}", index),
                name: format!("Virtual Microphone {}", index),
                source_type: AudioTrackType::Mic,
                is_default: false,
            });
        }
        Ok(devices)
    }

    fn open(&self, config: &CaptureDeviceConfig) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        if self.device_count == 0 {
            return Err(CaptureError::DeviceUnavailable);
        }
        if config.device_index >= self.device_count as i32 {
            return Err(CaptureError::DeviceIndexOutOfRange {
                index: config.device_index,
                max_index: self.device_count as i32 - 1,
            });
        }
        let failing = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CaptureError::Backend(format!(
                "virtual device {} refused to open",
                config.device_index
            )));
        }
        let handle = VirtualDeviceHandle::new(*config, config.format());
        Ok(self.opened.record(handle))
    }
}

/// A loopback backend whose devices deliver frames at the requested format.
#[derive(Clone)]
pub struct VirtualLoopbackBackend {
    available: bool,
    opened: Arc<OpenedDevices>,
}

impl VirtualLoopbackBackend {
    pub fn new() -> Self {
        Self {
            available: true,
            opened: Arc::new(OpenedDevices::default()),
        }
    }

    /// A backend reporting no output endpoint.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn last_opened(&self) -> Option<VirtualDeviceHandle> {
        self.opened.last()
    }

    pub fn opened(&self) -> Vec<VirtualDeviceHandle> {
        self.opened.all()
    }
}

impl Default for VirtualLoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBackend for VirtualLoopbackBackend {
    fn is_available(&self) -> bool {
        self.available
    }

    fn open_default(&self, format: AudioFormat) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        if !self.available {
            return Err(CaptureError::DeviceUnavailable);
        }
        let config = CaptureDeviceConfig {
            sample_rate: format.sample_rate,
            channels: format.channels,
            bits_per_sample: format.bits_per_sample,
            period_ms: 10,
            ..CaptureDeviceConfig::default()
        };
        Ok(self.opened.record(VirtualDeviceHandle::new(config, format)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_default_then_indexed_devices() {
        let devices = VirtualCaptureBackend::new(2).list_devices().unwrap();
        let indices: Vec<i32> = devices.iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![-1, 0, 1]);
        assert!(devices[0].is_default);
    }

    #[test]
    fn frames_flow_only_while_recording() {
        let backend = VirtualCaptureBackend::new(1);
        let mut device = backend.open(&CaptureDeviceConfig::new(0, 8000)).unwrap();
        let handle = backend.last_opened().unwrap();
        let received = Arc::new(AtomicUsize::new(0));
        {
            let received = Arc::clone(&received);
            device.subscribe(Arc::new(move |buffer: &[u8], valid: usize| {
                assert_eq!(buffer.len(), valid + BUFFER_SLACK);
                received.fetch_add(valid, Ordering::SeqCst);
            }));
        }

        assert!(!handle.push_silence());
        device.start_recording().unwrap();
        assert!(handle.push_silence());
        device.stop_recording().unwrap();
        assert!(!handle.push_silence());

        assert_eq!(received.load(Ordering::SeqCst), 320);
    }

    #[test]
    fn injected_open_failures_are_consumed_in_order() {
        let backend = VirtualCaptureBackend::new(1);
        backend.fail_next_opens(2);
        let config = CaptureDeviceConfig::new(0, 8000);

        assert!(matches!(backend.open(&config), Err(CaptureError::Backend(_))));
        assert!(backend.open(&config).is_err());
        assert!(backend.open(&config).is_ok());
        assert_eq!(backend.open_count(), 1);
    }

    #[test]
    fn open_rejects_out_of_range_index() {
        let backend = VirtualCaptureBackend::new(1);
        assert!(backend.open(&CaptureDeviceConfig::new(3, 8000)).is_err());
        assert_eq!(backend.open_count(), 0);
    }
}
