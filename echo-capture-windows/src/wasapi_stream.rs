//! Shared-mode WASAPI stream delivering fixed-period PCM frames.
//!
//! The stream asks the audio engine for the caller's format with
//! `AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM`, so the engine resamples and
//! converts from the endpoint's mix format. Packets are re-cut into frames
//! of exactly one period before they reach the subscriber.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use windows::core::w;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Media::Audio::*;
use windows::Win32::Media::Multimedia::WAVE_FORMAT_IEEE_FLOAT;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::{AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW};

use echo_capture_core::models::audio_models::AudioFormat;
use echo_capture_core::models::error::CaptureError;
use echo_capture_core::traits::capture_backend::{CaptureDevice, FrameCallback};

use crate::device_enumerator::{backend_error, ComGuard, DeviceEnumerator};

/// 100-nanosecond units per millisecond.
const HNS_PER_MS: i64 = 10_000;

/// Which endpoint a stream reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// The default capture endpoint.
    DefaultCapture,
    /// A capture endpoint by MMDevice id.
    Capture(String),
    /// The default render endpoint, read through loopback.
    DefaultRenderLoopback,
}

type SharedCallback = Arc<Mutex<Option<FrameCallback>>>;

/// A WASAPI stream opened at a fixed format.
///
/// COM objects live only on the capture thread; the struct itself holds
/// plain data, the subscriber slot and the thread handle.
pub struct WasapiStream {
    endpoint: Endpoint,
    format: AudioFormat,
    period_ms: u32,
    buffer_count: u32,
    callback: SharedCallback,
    running: Arc<AtomicBool>,
    capture_handle: Option<thread::JoinHandle<()>>,
}

impl WasapiStream {
    pub fn new(endpoint: Endpoint, format: AudioFormat, period_ms: u32, buffer_count: u32) -> Self {
        Self {
            endpoint,
            format,
            period_ms,
            buffer_count,
            callback: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            capture_handle: None,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn join(&mut self) {
        if let Some(handle) = self.capture_handle.take() {
            if handle.join().is_err() {
                log::error!("WASAPI capture thread panicked");
            }
        }
    }
}

impl CaptureDevice for WasapiStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn subscribe(&mut self, callback: FrameCallback) {
        *self.callback.lock() = Some(callback);
    }

    fn unsubscribe(&mut self) {
        *self.callback.lock() = None;
    }

    fn start_recording(&mut self) -> Result<(), CaptureError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // A previous thread may have exited on its own after an error.
        self.join();

        let running = Arc::clone(&self.running);
        let callback = Arc::clone(&self.callback);
        let settings = StreamSettings {
            endpoint: self.endpoint.clone(),
            format: self.format,
            period_ms: self.period_ms,
            buffer_count: self.buffer_count,
        };
        let name = match self.endpoint {
            Endpoint::DefaultRenderLoopback => "wasapi-loopback-capture",
            _ => "wasapi-mic-capture",
        };

        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                if let Err(e) = capture_loop(&running, &settings, &callback) {
                    log::error!("{} stopped: {}", name, e);
                }
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CaptureError::Backend(format!("failed to spawn capture thread: {}", e))
            })?;

        self.capture_handle = Some(handle);
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        self.join();
        Ok(())
    }
}

impl Drop for WasapiStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.join();
    }
}

struct StreamSettings {
    endpoint: Endpoint,
    format: AudioFormat,
    period_ms: u32,
    buffer_count: u32,
}

fn wave_format(format: &AudioFormat) -> WAVEFORMATEX {
    let block_align = format.block_align() as u16;
    let tag = if format.bits_per_sample == 32 {
        WAVE_FORMAT_IEEE_FLOAT as u16
    } else {
        WAVE_FORMAT_PCM as u16
    };
    WAVEFORMATEX {
        wFormatTag: tag,
        nChannels: format.channels,
        nSamplesPerSec: format.sample_rate,
        nAvgBytesPerSec: format.sample_rate * block_align as u32,
        nBlockAlign: block_align,
        wBitsPerSample: format.bits_per_sample,
        cbSize: 0,
    }
}

/// Capture thread body.
///
/// 1. Initialize COM (MTA) for this thread
/// 2. Resolve the endpoint and activate `IAudioClient`
/// 3. Initialize shared mode at the requested format
/// 4. Register with MMCSS and start
/// 5. Poll packets and emit one frame per full period
fn capture_loop(
    running: &AtomicBool,
    settings: &StreamSettings,
    callback: &Mutex<Option<FrameCallback>>,
) -> Result<(), CaptureError> {
    let _com = ComGuard::init()?;

    let enumerator = DeviceEnumerator::new()?;
    let device = match &settings.endpoint {
        Endpoint::DefaultCapture => enumerator.default_endpoint(eCapture)?,
        Endpoint::Capture(id) => enumerator.device_by_id(id)?,
        Endpoint::DefaultRenderLoopback => enumerator.default_endpoint(eRender)?,
    };

    let mut stream_flags = AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM | AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY;
    if settings.endpoint == Endpoint::DefaultRenderLoopback {
        stream_flags |= AUDCLNT_STREAMFLAGS_LOOPBACK;
    }

    let format = wave_format(&settings.format);
    let buffer_duration = settings.period_ms as i64 * settings.buffer_count.max(1) as i64 * HNS_PER_MS;
    let block_align = settings.format.block_align();
    let period_bytes = settings.format.bytes_per_period(settings.period_ms);
    let poll = Duration::from_millis((settings.period_ms / 2).max(1) as u64);

    unsafe {
        let audio_client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| backend_error("IAudioClient activation", e))?;

        audio_client
            .Initialize(
                AUDCLNT_SHAREMODE_SHARED,
                stream_flags,
                buffer_duration,
                0,
                &format,
                None,
            )
            .map_err(|e| {
                CaptureError::ConfigurationFailed(format!(
                    "IAudioClient::Initialize at {} failed: {}",
                    settings.format, e
                ))
            })?;

        let capture_client: IAudioCaptureClient = audio_client
            .GetService()
            .map_err(|e| backend_error("IAudioCaptureClient", e))?;

        let mmcss = MmcssRegistration::pro_audio();
        if mmcss.is_none() {
            log::debug!("MMCSS registration unavailable; capturing at normal priority");
        }

        audio_client
            .Start()
            .map_err(|e| backend_error("IAudioClient::Start", e))?;

        log::debug!(
            "WASAPI stream started at {}, {} ms period",
            settings.format,
            settings.period_ms
        );

        let mut pending: Vec<u8> = Vec::with_capacity(period_bytes * 2);
        // Delivered buffers are over-allocated; only the period prefix is valid.
        let mut frame = vec![0u8; period_bytes + block_align];

        let result = (|| -> Result<(), CaptureError> {
            while running.load(Ordering::SeqCst) {
                thread::sleep(poll);

                let mut packet_length = capture_client
                    .GetNextPacketSize()
                    .map_err(|e| backend_error("GetNextPacketSize", e))?;

                while packet_length > 0 {
                    let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                    let mut num_frames: u32 = 0;
                    let mut flags: u32 = 0;

                    capture_client
                        .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                        .map_err(|e| backend_error("GetBuffer", e))?;

                    let bytes = num_frames as usize * block_align;
                    if bytes > 0 {
                        if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 || buffer_ptr.is_null() {
                            pending.resize(pending.len() + bytes, 0);
                        } else {
                            pending.extend_from_slice(std::slice::from_raw_parts(buffer_ptr, bytes));
                        }
                    }

                    capture_client
                        .ReleaseBuffer(num_frames)
                        .map_err(|e| backend_error("ReleaseBuffer", e))?;

                    packet_length = capture_client
                        .GetNextPacketSize()
                        .map_err(|e| backend_error("GetNextPacketSize", e))?;
                }

                while period_bytes > 0 && pending.len() >= period_bytes {
                    frame[..period_bytes].copy_from_slice(&pending[..period_bytes]);
                    pending.drain(..period_bytes);
                    let subscriber = callback.lock().clone();
                    if let Some(subscriber) = subscriber {
                        subscriber(&frame, period_bytes);
                    }
                }
            }
            Ok(())
        })();

        let _ = audio_client.Stop();
        result
    }
}

/// The calling thread's MMCSS "Pro Audio" registration, reverted on drop.
///
/// Must be dropped on the thread that created it.
struct MmcssRegistration {
    handle: HANDLE,
}

impl MmcssRegistration {
    fn pro_audio() -> Option<Self> {
        let mut task_index: u32 = 0;
        let handle = unsafe { AvSetMmThreadCharacteristicsW(w!("Pro Audio"), &mut task_index) }.ok()?;
        Some(Self { handle })
    }
}

impl Drop for MmcssRegistration {
    fn drop(&mut self) {
        if unsafe { AvRevertMmThreadCharacteristics(self.handle) }.is_err() {
            log::debug!("AvRevertMmThreadCharacteristics failed");
        }
    }
}
