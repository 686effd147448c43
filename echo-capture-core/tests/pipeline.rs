use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use echo_capture_core::processing::pcm;
use echo_capture_core::{
    AudioCodecFormat, AudioEncoder, CaptureError, ChannelDelegate, EchoCancelledSource,
    EchoCancelledSourceBuilder, PassthroughFilter, PipelineConfiguration, PipelineDelegate,
    PipelineEvent, PipelineState, VirtualCaptureBackend, VirtualLoopbackBackend,
};

type Source = EchoCancelledSource<VirtualCaptureBackend, VirtualLoopbackBackend, PassthroughFilter>;

struct LinearEncoder;

impl AudioEncoder for LinearEncoder {
    fn supported_formats(&self) -> Vec<AudioCodecFormat> {
        vec![
            AudioCodecFormat::pcmu(),
            AudioCodecFormat::pcma(),
            AudioCodecFormat::new(9, "G722", 16000, 1),
        ]
    }

    fn encode(&self, samples: &[i16], _format: &AudioCodecFormat) -> Result<Vec<u8>, CaptureError> {
        Ok(pcm::samples_to_bytes(samples))
    }
}

/// Fails every encode after the first `ok` calls.
struct FlakyEncoder {
    ok: Mutex<usize>,
}

impl AudioEncoder for FlakyEncoder {
    fn supported_formats(&self) -> Vec<AudioCodecFormat> {
        vec![AudioCodecFormat::pcmu()]
    }

    fn encode(&self, samples: &[i16], _format: &AudioCodecFormat) -> Result<Vec<u8>, CaptureError> {
        let mut ok = self.ok.lock();
        if *ok == 0 {
            return Err(CaptureError::EncodingFailed("encoder exhausted".into()));
        }
        *ok -= 1;
        Ok(pcm::samples_to_bytes(samples))
    }
}

#[derive(Default)]
struct CountingDelegate {
    samples: Mutex<Vec<u32>>,
    errors: Mutex<Vec<CaptureError>>,
}

impl PipelineDelegate for CountingDelegate {
    fn on_encoded_sample(&self, duration_units: u32, _sample: &[u8]) {
        self.samples.lock().push(duration_units);
    }

    fn on_error(&self, error: &CaptureError) {
        self.errors.lock().push(error.clone());
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn build(
    mic: &VirtualCaptureBackend,
    loopback: &VirtualLoopbackBackend,
    config: PipelineConfiguration,
) -> (Source, Receiver<PipelineEvent>) {
    init_logging();
    let (tx, rx) = mpsc::channel();
    let source = EchoCancelledSourceBuilder::new(mic.clone(), loopback.clone(), Arc::new(LinearEncoder))
        .config(config)
        .delegate(Arc::new(ChannelDelegate::new(tx)))
        .build::<PassthroughFilter>()
        .unwrap();
    (source, rx)
}

fn config_for(device_index: i32) -> PipelineConfiguration {
    PipelineConfiguration {
        device_index,
        ..PipelineConfiguration::default()
    }
}

fn encoded(events: &Receiver<PipelineEvent>) -> Vec<(u32, Vec<u8>)> {
    events
        .try_iter()
        .filter_map(|e| match e {
            PipelineEvent::EncodedSample {
                duration_units,
                sample,
            } => Some((duration_units, sample)),
            _ => None,
        })
        .collect()
}

#[test]
fn index_beyond_device_list_reports_error_and_binds_nothing() {
    let mic = VirtualCaptureBackend::new(2);
    let (mut source, events) = build(&mic, &VirtualLoopbackBackend::new(), config_for(5));

    let errors: Vec<CaptureError> = events
        .try_iter()
        .filter_map(|e| match e {
            PipelineEvent::Error(error) => Some(error),
            _ => None,
        })
        .collect();
    assert_eq!(
        errors,
        vec![CaptureError::DeviceIndexOutOfRange {
            index: 5,
            max_index: 1
        }]
    );
    assert_eq!(
        errors[0].to_string(),
        "the requested audio input device index 5 exceeds the maximum index of 1"
    );
    assert_eq!(mic.open_count(), 0);

    source.start();
    assert_eq!(source.state(), PipelineState::Started);
}

#[test]
fn twenty_ms_frames_reach_the_encoder_at_full_length() {
    let mic = VirtualCaptureBackend::new(1);
    let (mut source, events) = build(&mic, &VirtualLoopbackBackend::new(), config_for(0));
    source.start();
    let device = mic.last_opened().unwrap();
    assert_eq!(device.config().sample_rate, 8000);
    assert_eq!(device.config().period_ms, 20);

    for _ in 0..5 {
        assert!(device.push_silence());
    }

    let samples = encoded(&events);
    assert_eq!(samples.len(), 5);
    assert!(samples.iter().all(|(units, bytes)| *units == 160 && bytes.len() == 320));
}

#[test]
fn reference_audio_keeps_flowing_while_paused() {
    let mic = VirtualCaptureBackend::new(1);
    let loopback = VirtualLoopbackBackend::new();
    let (mut source, events) = build(&mic, &loopback, config_for(0));
    source.start();
    source.pause();
    let mic_device = mic.last_opened().unwrap();
    let reference = loopback.last_opened().unwrap();

    assert!(!mic_device.push_silence());
    for _ in 0..3 {
        assert!(reference.push_silence());
    }

    let diagnostics = source.diagnostics();
    assert_eq!(diagnostics.near_callback_count, 0);
    assert_eq!(diagnostics.reference_callback_count, 3);
    assert!(encoded(&events).is_empty());

    source.resume();
    assert!(mic_device.push_silence());
    assert_eq!(encoded(&events).len(), 1);
}

#[test]
fn device_control_follows_state_transitions_exactly() {
    let mic = VirtualCaptureBackend::new(1);
    let loopback = VirtualLoopbackBackend::new();
    let (mut source, _events) = build(&mic, &loopback, config_for(0));

    source.pause();
    source.resume();
    source.start();
    source.start();
    source.pause();
    source.start();
    source.resume();
    source.resume();
    source.close();
    source.close();
    source.start();

    let mic_device = mic.last_opened().unwrap();
    let reference = loopback.last_opened().unwrap();
    assert_eq!(
        mic_device.events(),
        vec!["subscribe", "start", "stop", "start", "unsubscribe", "stop"]
    );
    assert_eq!(reference.events(), vec!["subscribe", "start", "unsubscribe", "stop"]);
}

#[test]
fn close_while_paused_does_not_stop_the_microphone_twice() {
    let mic = VirtualCaptureBackend::new(1);
    let (mut source, _events) = build(&mic, &VirtualLoopbackBackend::new(), config_for(0));
    source.start();
    source.pause();
    source.close();

    let device = mic.last_opened().unwrap();
    assert_eq!(device.stop_count(), 1);
    assert_eq!(device.events(), vec!["subscribe", "start", "stop", "unsubscribe"]);
}

#[test]
fn reinitialization_only_on_clock_rate_change() {
    let mic = VirtualCaptureBackend::new(1);
    let (mut source, events) = build(&mic, &VirtualLoopbackBackend::new(), config_for(0));
    source.start();

    source.set_source_format(AudioCodecFormat::pcma());
    source.set_source_format(AudioCodecFormat::pcmu());
    assert_eq!(mic.open_count(), 1);

    source.set_source_format(AudioCodecFormat::new(9, "G722", 16000, 1));
    assert_eq!(mic.open_count(), 2);

    let device = mic.last_opened().unwrap();
    assert_eq!(device.config().sample_rate, 16000);
    assert_eq!(device.config().device_index, 0);
    assert!(device.is_recording());

    encoded(&events);
    assert!(device.push_silence());
    assert_eq!(encoded(&events), vec![(320, vec![0u8; 640])]);
}

#[test]
fn encoder_failure_drops_frame_and_pipeline_continues() {
    init_logging();
    let mic = VirtualCaptureBackend::new(1);
    let delegate = Arc::new(CountingDelegate::default());
    let mut source = EchoCancelledSourceBuilder::new(
        mic.clone(),
        VirtualLoopbackBackend::new(),
        Arc::new(FlakyEncoder { ok: Mutex::new(2) }),
    )
    .config(config_for(0))
    .delegate(Arc::clone(&delegate) as Arc<dyn PipelineDelegate>)
    .build::<PassthroughFilter>()
    .unwrap();
    source.start();
    let device = mic.last_opened().unwrap();

    for _ in 0..4 {
        device.push_silence();
    }

    assert_eq!(delegate.samples.lock().len(), 2);
    assert_eq!(delegate.errors.lock().len(), 2);
    let diagnostics = source.diagnostics();
    assert_eq!(diagnostics.encoder_failures, 2);
    assert_eq!(diagnostics.frames_drained, 4);
}

#[test]
fn late_delegates_receive_subsequent_samples() {
    let mic = VirtualCaptureBackend::new(1);
    let (mut source, _events) = build(&mic, &VirtualLoopbackBackend::new(), config_for(0));
    source.start();
    let device = mic.last_opened().unwrap();
    device.push_silence();

    let late = Arc::new(CountingDelegate::default());
    source.add_delegate(Arc::clone(&late) as Arc<dyn PipelineDelegate>);
    device.push_silence();

    assert_eq!(*late.samples.lock(), vec![160]);
}

#[test]
fn concurrent_device_threads_lose_no_cancelled_frames() {
    let mic = VirtualCaptureBackend::new(1);
    let loopback = VirtualLoopbackBackend::new();
    let (mut source, events) = build(&mic, &loopback, config_for(0));
    source.start();
    let near = mic.last_opened().unwrap();
    let far = loopback.last_opened().unwrap();

    let near_thread = thread::spawn(move || {
        for _ in 0..200 {
            near.push_silence();
        }
    });
    let far_thread = thread::spawn(move || {
        for _ in 0..400 {
            far.push_silence();
        }
    });
    near_thread.join().unwrap();
    far_thread.join().unwrap();

    assert_eq!(encoded(&events).len(), 200);
    let diagnostics = source.diagnostics();
    assert_eq!(diagnostics.frames_written, 200);
    assert_eq!(diagnostics.reference_callback_count, 400);
}

#[test]
fn configuration_loads_from_json() {
    let config = PipelineConfiguration::from_json_str(r#"{ "device_index": 1, "reference_queue_capacity": 8 }"#)
        .unwrap();
    let mic = VirtualCaptureBackend::new(2);
    let (source, _events) = build(&mic, &VirtualLoopbackBackend::new(), config);

    assert_eq!(mic.last_opened().unwrap().config().device_index, 1);
    assert_eq!(source.config().reference_queue_capacity, 8);
    assert_eq!(source.list_capture_devices().unwrap().len(), 3);
}
