use crate::models::audio_models::AudioFormat;
use crate::models::error::CaptureError;
use crate::session::capture_manager::{BoundDevice, ErrorSink, FrameHandler};
use crate::traits::capture_backend::LoopbackBackend;

/// Owns the far-end (system loopback) capture device.
///
/// The format is fixed when the manager is opened and is never touched by
/// codec renegotiation. There is no pause: the echo keeps happening while
/// the microphone is paused, so the reference keeps flowing until `close`.
pub struct ReferenceCaptureManager<L: LoopbackBackend> {
    backend: L,
    handler: FrameHandler,
    on_error: ErrorSink,
    bound: Option<BoundDevice>,
    format: Option<AudioFormat>,
}

impl<L: LoopbackBackend> ReferenceCaptureManager<L> {
    pub fn new(backend: L, handler: FrameHandler, on_error: ErrorSink) -> Self {
        Self {
            backend,
            handler,
            on_error,
            bound: None,
            format: None,
        }
    }

    /// Bind loopback capture on the default output device.
    pub fn open(&mut self, format: AudioFormat) -> bool {
        if !self.backend.is_available() {
            self.report(CaptureError::Backend(
                "no loopback capture endpoint is available".into(),
            ));
            return false;
        }

        self.release_bound();

        match self.backend.open_default(format) {
            Ok(device) => {
                log::debug!(
                    "loopback capture bound at {}Hz, {} channels, {}-bit",
                    format.sample_rate,
                    format.channels,
                    format.bits_per_sample
                );
                self.bound = Some(BoundDevice::bind(device, self.handler.clone()));
                self.format = Some(format);
                true
            }
            Err(e) => {
                self.report(e);
                false
            }
        }
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

    /// Unsubscribe and stop the device, then release it.
    pub fn close(&mut self) {
        self.release_bound();
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.bound.as_ref().is_some_and(BoundDevice::is_recording)
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    fn release_bound(&mut self) {
        if let Some(bound) = self.bound.take() {
            if let Err(e) = bound.release() {
                self.report(e);
            }
        }
    }

    fn report(&self, error: CaptureError) {
        log::warn!("loopback: {}", error);
        (self.on_error)(&error);
    }
}

impl<L: LoopbackBackend> Drop for ReferenceCaptureManager<L> {
    fn drop(&mut self) {
        self.release_bound();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::backends::virtual_device::VirtualLoopbackBackend;
    use crate::models::audio_models::AudioFrame;

    fn manager(
        backend: &VirtualLoopbackBackend,
    ) -> (
        ReferenceCaptureManager<VirtualLoopbackBackend>,
        Arc<AtomicUsize>,
        Arc<Mutex<Vec<CaptureError>>>,
    ) {
        let frames = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let handler: FrameHandler = {
            let frames = Arc::clone(&frames);
            Arc::new(move |_: &AudioFrame| {
                frames.fetch_add(1, Ordering::SeqCst);
            })
        };
        let on_error: ErrorSink = {
            let errors = Arc::clone(&errors);
            Arc::new(move |e: &CaptureError| errors.lock().push(e.clone()))
        };
        (
            ReferenceCaptureManager::new(backend.clone(), handler, on_error),
            frames,
            errors,
        )
    }

    #[test]
    fn opens_at_fixed_format_and_forwards_frames() {
        let backend = VirtualLoopbackBackend::new();
        let (mut reference, frames, _) = manager(&backend);
        let format = AudioFormat::new(44100, 2, 32);

        assert!(reference.open(format));
        reference.start();
        let device = backend.last_opened().unwrap();

        assert_eq!(device.format(), format);
        assert!(device.push_frame(&[0u8; 64]));
        assert_eq!(frames.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unavailable_loopback_is_reported() {
        let backend = VirtualLoopbackBackend::unavailable();
        let (mut reference, _, errors) = manager(&backend);

        assert!(!reference.open(AudioFormat::new(48000, 2, 16)));
        assert!(matches!(errors.lock()[0], CaptureError::Backend(_)));
        reference.start();
        assert!(!reference.is_recording());
    }

    #[test]
    fn close_detaches_then_stops() {
        let backend = VirtualLoopbackBackend::new();
        let (mut reference, frames, _) = manager(&backend);
        reference.open(AudioFormat::new(44100, 2, 32));
        reference.start();
        let device = backend.last_opened().unwrap();

        reference.close();
        reference.close();

        assert_eq!(device.events(), vec!["subscribe", "start", "unsubscribe", "stop"]);
        assert!(!device.push_frame(&[0u8; 64]));
        assert_eq!(frames.load(Ordering::SeqCst), 0);
    }
}
