use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::models::audio_models::{AudioFormat, AudioFrame, AudioLevels, AudioSource, PipelineDiagnostics};
use crate::models::codec_format::AudioCodecFormat;
use crate::models::config::PipelineConfiguration;
use crate::models::error::CaptureError;
use crate::models::state::PipelineState;
use crate::processing::codec_bridge::{EncodedSample, FrameCodecBridge};
use crate::processing::pcm;
use crate::session::capture_manager::{CaptureDeviceManager, ErrorSink, FrameHandler};
use crate::session::echo_canceller::EchoCanceller;
use crate::session::format_manager::FormatManager;
use crate::session::reference_manager::ReferenceCaptureManager;
use crate::traits::audio_encoder::AudioEncoder;
use crate::traits::audio_source::EncodedAudioSource;
use crate::traits::capture_backend::{CaptureDeviceBackend, LoopbackBackend};
use crate::traits::echo_filter::EchoFilter;
use crate::traits::pipeline_delegate::PipelineDelegate;

/// Counters and meters written from the device threads.
#[derive(Default)]
struct Telemetry {
    diagnostics: PipelineDiagnostics,
    levels: AudioLevels,
}

/// State reachable from both capture callbacks.
struct Shared {
    delegates: RwLock<Vec<Arc<dyn PipelineDelegate>>>,
    telemetry: Mutex<Telemetry>,
}

impl Shared {
    /// Delegates are snapshotted so none is called with the list locked.
    fn delegates(&self) -> Vec<Arc<dyn PipelineDelegate>> {
        self.delegates.read().clone()
    }

    fn report(&self, error: &CaptureError) {
        for delegate in self.delegates() {
            delegate.on_error(error);
        }
    }

    fn emit(&self, sample: &EncodedSample) {
        {
            let mut t = self.telemetry.lock();
            t.diagnostics.encoded_samples += 1;
            t.diagnostics.encoded_bytes += sample.data.len() as u64;
        }
        for delegate in self.delegates() {
            delegate.on_encoded_sample(sample.duration_units, &sample.data);
        }
    }

    fn notify_state(&self, state: PipelineState) {
        for delegate in self.delegates() {
            delegate.on_state_changed(state);
        }
    }

    fn filter_failed(&self, error: CaptureError) {
        log::warn!("echo filter failed, frame dropped: {}", error);
        self.telemetry.lock().diagnostics.filter_failures += 1;
        self.report(&error);
    }

    fn encoder_failed(&self, error: CaptureError) {
        log::warn!("encoder failed, frame dropped: {}", error);
        self.telemetry.lock().diagnostics.encoder_failures += 1;
        self.report(&error);
    }

    fn record_near(&self, frame: &AudioFrame, format: &AudioFormat) {
        let (rms, peak) = pcm::levels(frame.bytes(), format);
        let mut t = self.telemetry.lock();
        t.diagnostics.near_callback_count += 1;
        t.levels.near_level = rms;
        t.levels.peak_near_level = peak;
    }

    fn record_reference(&self, frame: &AudioFrame, format: &AudioFormat) {
        let (rms, peak) = pcm::levels(frame.bytes(), format);
        let mut t = self.telemetry.lock();
        t.diagnostics.reference_callback_count += 1;
        t.levels.reference_level = rms;
        t.levels.peak_reference_level = peak;
    }
}

/// Assembles an [`EchoCancelledSource`].
///
/// Delegates added here are registered before any device is opened, so
/// they also hear about failures during construction.
pub struct EchoCancelledSourceBuilder<B: CaptureDeviceBackend, L: LoopbackBackend> {
    capture_backend: B,
    loopback_backend: L,
    encoder: Arc<dyn AudioEncoder>,
    config: PipelineConfiguration,
    delegates: Vec<Arc<dyn PipelineDelegate>>,
}

impl<B: CaptureDeviceBackend, L: LoopbackBackend> EchoCancelledSourceBuilder<B, L> {
    pub fn new(capture_backend: B, loopback_backend: L, encoder: Arc<dyn AudioEncoder>) -> Self {
        Self {
            capture_backend,
            loopback_backend,
            encoder,
            config: PipelineConfiguration::default(),
            delegates: Vec::new(),
        }
    }

    pub fn config(mut self, config: PipelineConfiguration) -> Self {
        self.config = config;
        self
    }

    pub fn delegate(mut self, delegate: Arc<dyn PipelineDelegate>) -> Self {
        self.delegates.push(delegate);
        self
    }

    /// Validate the configuration, build the filter `F`, and bind devices.
    ///
    /// Device problems do not fail the build; they reach the delegates as
    /// errors and leave the affected device unbound. Only an invalid
    /// configuration or a filter that cannot be constructed is returned.
    pub fn build<F: EchoFilter + 'static>(self) -> Result<EchoCancelledSource<B, L, F>, CaptureError> {
        let config = self.config;
        config.validate()?;

        let canceller = Arc::new(EchoCanceller::<F>::from_session(
            &config.echo,
            config.reference_queue_capacity,
        )?);
        let formats = FormatManager::new(self.encoder.supported_formats());
        let bridge = Arc::new(FrameCodecBridge::new(self.encoder, formats.selected().cloned()));

        let near_format = config.echo.near_format;
        let far_format = config.echo.far_format;
        let source_rate = near_format.sample_rate;

        let shared = Arc::new(Shared {
            delegates: RwLock::new(self.delegates),
            telemetry: Mutex::new(Telemetry::default()),
        });
        {
            let mut t = shared.telemetry.lock();
            t.diagnostics.session_id = uuid::Uuid::new_v4().to_string();
            t.diagnostics.near_format = AudioFormat::mono_16(source_rate).to_string();
            t.diagnostics.reference_format = far_format.to_string();
        }

        let on_error: ErrorSink = {
            let shared = Arc::clone(&shared);
            Arc::new(move |error: &CaptureError| shared.report(error))
        };

        let near_handler: FrameHandler = {
            let shared = Arc::clone(&shared);
            let canceller = Arc::clone(&canceller);
            let bridge = Arc::clone(&bridge);
            let device_format = AudioFormat::mono_16(source_rate);
            Arc::new(move |frame: &AudioFrame| {
                shared.record_near(frame, &device_format);
                let capacity = frame.sample_count(device_format.bytes_per_sample());
                let result = canceller.process(frame.bytes(), capacity, |cancelled, _echo| {
                    match bridge.encode_samples(cancelled) {
                        Ok(sample) => shared.emit(&sample),
                        Err(e) => shared.encoder_failed(e),
                    }
                });
                if let Err(e) = result {
                    shared.filter_failed(e);
                }
            })
        };

        let reference_handler: FrameHandler = {
            let shared = Arc::clone(&shared);
            let canceller = Arc::clone(&canceller);
            Arc::new(move |frame: &AudioFrame| {
                shared.record_reference(frame, &far_format);
                if let Err(e) = canceller.register_played(frame.bytes()) {
                    shared.filter_failed(e);
                }
            })
        };

        let mut capture = CaptureDeviceManager::new(
            self.capture_backend,
            config.device_config(source_rate),
            near_handler,
            Arc::clone(&on_error),
        );
        let mut reference =
            ReferenceCaptureManager::new(self.loopback_backend, reference_handler, on_error);

        if config.enable_source {
            capture.open(config.device_index, source_rate);
            reference.open(far_format);
        } else {
            log::debug!("source disabled; no capture devices opened");
        }

        Ok(EchoCancelledSource {
            config,
            capture,
            reference,
            canceller,
            bridge,
            formats,
            shared,
            state: PipelineState::Idle,
            closed: AtomicBool::new(false),
            source_rate,
        })
    }
}

/// An echo-cancelled microphone source.
///
/// Near-end frames from the microphone are cancelled against the system
/// output captured by loopback, then encoded at the negotiated codec
/// format and handed to every [`PipelineDelegate`]:
///
/// ```text
/// [Loopback] ── register_played ──┐
///                                 ├─▶ [EchoCanceller] ─drain─▶ [FrameCodecBridge] ─▶ delegates
/// [Microphone] ───── write ───────┘
/// ```
///
/// Lifecycle calls never fail; problems are delivered through
/// [`PipelineDelegate::on_error`]. Pause and resume act on the microphone
/// only, the loopback keeps feeding the filter until `close`.
pub struct EchoCancelledSource<B, L, F>
where
    B: CaptureDeviceBackend,
    L: LoopbackBackend,
    F: EchoFilter + 'static,
{
    config: PipelineConfiguration,
    capture: CaptureDeviceManager<B>,
    reference: ReferenceCaptureManager<L>,
    canceller: Arc<EchoCanceller<F>>,
    bridge: Arc<FrameCodecBridge>,
    formats: FormatManager,
    shared: Arc<Shared>,
    state: PipelineState,
    closed: AtomicBool,
    /// Clock rate the microphone is configured for.
    source_rate: u32,
}

impl<B, L, F> EchoCancelledSource<B, L, F>
where
    B: CaptureDeviceBackend,
    L: LoopbackBackend,
    F: EchoFilter + 'static,
{
    pub fn add_delegate(&self, delegate: Arc<dyn PipelineDelegate>) {
        self.shared.delegates.write().push(delegate);
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Begin capture on both devices. Only acts from `Idle`.
    pub fn start(&mut self) {
        let Some(next) = self.transition(PipelineState::on_start) else {
            return;
        };
        self.capture.start();
        self.reference.start();
        {
            let mut t = self.shared.telemetry.lock();
            if t.diagnostics.started_at.is_none() {
                t.diagnostics.started_at = Some(chrono::Utc::now().to_rfc3339());
            }
        }
        self.set_state(next);
    }

    /// Stop the microphone. The loopback keeps running.
    pub fn pause(&mut self) {
        let Some(next) = self.transition(PipelineState::on_pause) else {
            return;
        };
        self.capture.pause();
        self.set_state(next);
    }

    pub fn resume(&mut self) {
        let Some(next) = self.transition(PipelineState::on_resume) else {
            return;
        };
        self.capture.resume();
        self.set_state(next);
    }

    /// Detach and stop both devices. Later lifecycle calls are no-ops.
    pub fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.capture.close();
        self.reference.close();
        self.set_state(PipelineState::Closed);
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn source_formats(&self) -> Vec<AudioCodecFormat> {
        self.formats.source_formats()
    }

    pub fn selected_format(&self) -> Option<AudioCodecFormat> {
        self.formats.selected().cloned()
    }

    /// Narrow the offered formats. A selection that is filtered out is
    /// replaced by the first remaining candidate.
    pub fn restrict_formats(&mut self, filter: &dyn Fn(&AudioCodecFormat) -> bool) {
        let before = self.formats.selected().cloned();
        self.formats.restrict(filter);
        match self.formats.selected().cloned() {
            Some(selected) if Some(&selected) != before.as_ref() => self.apply_format(selected),
            Some(_) => {}
            None => {
                log::warn!("no codec formats remain after restriction");
                self.bridge.clear_format();
            }
        }
    }

    /// Select the codec format, reopening the microphone if its clock rate
    /// differs from the rate the device is configured for.
    pub fn set_source_format(&mut self, format: AudioCodecFormat) {
        self.formats.set_selected(format.clone());
        self.apply_format(format);
    }

    pub fn has_encoded_subscribers(&self) -> bool {
        !self.shared.delegates.read().is_empty()
    }

    /// Raw samples cannot be injected: every emitted sample comes out of
    /// the filter.
    pub fn external_raw_sample(
        &mut self,
        sample_rate: u32,
        duration_ms: u32,
        _samples: &[i16],
    ) -> Result<(), CaptureError> {
        log::warn!(
            "rejected external raw sample ({}Hz, {} ms)",
            sample_rate,
            duration_ms
        );
        Err(CaptureError::UnsupportedOperation(
            "an echo-cancelled source does not accept external raw samples".into(),
        ))
    }

    /// The source as seen by a media session, or `None` when the source is
    /// disabled in the configuration.
    pub fn media_endpoint(&mut self) -> Option<&mut dyn EncodedAudioSource> {
        if self.config.enable_source {
            Some(self)
        } else {
            None
        }
    }

    pub fn list_capture_devices(&self) -> Result<Vec<AudioSource>, CaptureError> {
        self.capture.list_devices()
    }

    pub fn diagnostics(&self) -> PipelineDiagnostics {
        let stats = self.canceller.stats();
        let mut diagnostics = self.shared.telemetry.lock().diagnostics.clone();
        diagnostics.frames_written = stats.frames_written;
        diagnostics.frames_drained = stats.frames_drained;
        diagnostics.reference_frames_dropped = stats.reference_dropped;
        diagnostics
    }

    pub fn levels(&self) -> AudioLevels {
        self.shared.telemetry.lock().levels
    }

    pub fn config(&self) -> &PipelineConfiguration {
        &self.config
    }

    /// Clock rate the microphone is configured for.
    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    fn transition(&self, step: fn(PipelineState) -> Option<PipelineState>) -> Option<PipelineState> {
        if self.is_closed() {
            return None;
        }
        step(self.state)
    }

    fn set_state(&mut self, next: PipelineState) {
        log::debug!("pipeline {:?} -> {:?}", self.state, next);
        self.state = next;
        self.shared.notify_state(next);
    }

    fn apply_format(&mut self, format: AudioCodecFormat) {
        self.bridge.set_format(format.clone());

        if self.is_closed() || format.clock_rate == self.source_rate {
            return;
        }

        log::debug!(
            "adjusting capture rate from {} to {}",
            self.source_rate,
            format.clock_rate
        );

        if !self.config.enable_source {
            self.source_rate = format.clock_rate;
            return;
        }

        if !self.capture.open(self.config.device_index, format.clock_rate) {
            return;
        }
        self.source_rate = format.clock_rate;
        {
            let mut t = self.shared.telemetry.lock();
            t.diagnostics.reinitializations += 1;
            t.diagnostics.near_format = AudioFormat::mono_16(format.clock_rate).to_string();
        }
        if self.state.is_started() {
            self.capture.start();
        }
    }
}

impl<B, L, F> EncodedAudioSource for EchoCancelledSource<B, L, F>
where
    B: CaptureDeviceBackend,
    L: LoopbackBackend,
    F: EchoFilter + 'static,
{
    fn state(&self) -> PipelineState {
        EchoCancelledSource::state(self)
    }

    fn start(&mut self) {
        EchoCancelledSource::start(self)
    }

    fn pause(&mut self) {
        EchoCancelledSource::pause(self)
    }

    fn resume(&mut self) {
        EchoCancelledSource::resume(self)
    }

    fn close(&mut self) {
        EchoCancelledSource::close(self)
    }

    fn is_paused(&self) -> bool {
        EchoCancelledSource::is_paused(self)
    }

    fn source_formats(&self) -> Vec<AudioCodecFormat> {
        EchoCancelledSource::source_formats(self)
    }

    fn restrict_formats(&mut self, filter: &dyn Fn(&AudioCodecFormat) -> bool) {
        EchoCancelledSource::restrict_formats(self, filter)
    }

    fn set_source_format(&mut self, format: AudioCodecFormat) {
        EchoCancelledSource::set_source_format(self, format)
    }

    fn has_encoded_subscribers(&self) -> bool {
        EchoCancelledSource::has_encoded_subscribers(self)
    }

    fn external_raw_sample(
        &mut self,
        sample_rate: u32,
        duration_ms: u32,
        samples: &[i16],
    ) -> Result<(), CaptureError> {
        EchoCancelledSource::external_raw_sample(self, sample_rate, duration_ms, samples)
    }
}
