//! [`EchoFilter`] backed by the `aec3` crate, a Rust port of WebRTC AEC3.
//!
//! AEC3 works on mono 10 ms blocks at 16, 32 or 48 kHz. Near-end audio at
//! any other rate is resampled into the nearest engine rate and back out;
//! far-end audio is downmixed and resampled into the engine rate as it is
//! registered, so the engine always sees render before the capture it
//! cancels.

use std::collections::VecDeque;

use aec3::voip::VoipAec3;

use crate::models::audio_models::AudioFormat;
use crate::models::config::EchoSessionConfig;
use crate::models::error::CaptureError;
use crate::processing::pcm;
use crate::processing::resampler::{downmix, LinearResampler};
use crate::traits::echo_filter::{EchoFilter, FilterRead};

const ENGINE_RATES: [u32; 3] = [16000, 32000, 48000];

/// Far-end blocks retained as echo estimates.
const ECHO_HISTORY: usize = 64;

/// The engine rate used for a near-end stream at `rate`.
fn engine_rate(rate: u32) -> u32 {
    ENGINE_RATES
        .iter()
        .copied()
        .find(|r| *r >= rate)
        .unwrap_or(ENGINE_RATES[ENGINE_RATES.len() - 1])
}

fn engine_error(call: &str, e: impl std::fmt::Debug) -> CaptureError {
    CaptureError::FilterFailed(format!("AEC3 {} failed: {:?}", call, e))
}

/// WebRTC AEC3 echo canceller.
///
/// Feature mapping: `cancel_echo` switches the engine on (off leaves the
/// near-end audio untouched apart from framing); `suppress_noise` enables
/// the engine's high-pass pre-filter. `auto_gain` has no AEC3 counterpart
/// and is ignored. The session's near and far delays are summed into the
/// engine's initial delay estimate.
pub struct Aec3Filter {
    /// `None` when echo cancellation is disabled.
    aec: Option<VoipAec3>,
    near_format: AudioFormat,
    far_format: AudioFormat,
    block_samples: usize,
    near_in: LinearResampler,
    near_out: LinearResampler,
    far_in: LinearResampler,
    capture: VecDeque<f32>,
    render: VecDeque<f32>,
    output: VecDeque<i16>,
    echo: VecDeque<Vec<i16>>,
    capture_block: Vec<f32>,
    render_block: Vec<f32>,
    cancelled_block: Vec<f32>,
}

impl Aec3Filter {
    /// Sample rate the engine runs at.
    pub fn engine_rate(&self) -> u32 {
        self.near_in.target_rate()
    }

    pub fn is_cancelling(&self) -> bool {
        self.aec.is_some()
    }

    /// Cancelled near-end samples waiting to be read.
    pub fn pending_samples(&self) -> usize {
        self.output.len()
    }

    fn feed_render(&mut self) -> Result<(), CaptureError> {
        while self.render.len() >= self.block_samples {
            self.render_block.clear();
            self.render_block.extend(self.render.drain(..self.block_samples));
            if let Some(aec) = self.aec.as_mut() {
                aec.handle_render_frame(&self.render_block)
                    .map_err(|e| engine_error("handle_render_frame", e))?;
            }
            if self.echo.len() == ECHO_HISTORY {
                self.echo.pop_front();
            }
            self.echo
                .push_back(self.render_block.iter().copied().map(pcm::float_to_sample).collect());
        }
        Ok(())
    }

    fn process_capture(&mut self) -> Result<(), CaptureError> {
        while self.capture.len() >= self.block_samples {
            self.capture_block.clear();
            self.capture_block.extend(self.capture.drain(..self.block_samples));
            match self.aec.as_mut() {
                Some(aec) => {
                    aec.process_capture_frame(&self.capture_block, false, &mut self.cancelled_block)
                        .map_err(|e| engine_error("process_capture_frame", e))?;
                }
                None => self.cancelled_block.copy_from_slice(&self.capture_block),
            }
            let resampled = self.near_out.process(&self.cancelled_block);
            self.output.extend(resampled.into_iter().map(pcm::float_to_sample));
        }
        Ok(())
    }
}

impl EchoFilter for Aec3Filter {
    fn from_session(session: &EchoSessionConfig) -> Result<Self, CaptureError> {
        let near_rate = session.near_format.sample_rate;
        if near_rate == 0 || session.far_format.sample_rate == 0 {
            return Err(CaptureError::FilterFailed(
                "AEC3 needs non-zero near and far sample rates".into(),
            ));
        }
        let rate = engine_rate(near_rate);
        let block_samples = (rate / 100) as usize;

        let features = session.features;
        let aec = if features.cancel_echo {
            let delay_ms = session.near_delay_ms.saturating_add(session.far_delay_ms);
            let aec = VoipAec3::builder(rate as usize, 1, 1)
                .enable_high_pass(features.suppress_noise)
                .initial_delay_ms(delay_ms.min(i32::MAX as u32) as i32)
                .build()
                .map_err(|e| engine_error("initialization", e))?;
            Some(aec)
        } else {
            None
        };
        if features.auto_gain {
            log::debug!("AEC3 has no gain control stage; auto_gain ignored");
        }

        log::debug!(
            "AEC3 filter: near {} via {}Hz engine, far {}, initial delay {} ms",
            session.near_format,
            rate,
            session.far_format,
            session.near_delay_ms.saturating_add(session.far_delay_ms)
        );

        Ok(Self {
            aec,
            near_format: session.near_format,
            far_format: session.far_format,
            block_samples,
            near_in: LinearResampler::new(near_rate, rate),
            near_out: LinearResampler::new(rate, near_rate),
            far_in: LinearResampler::new(session.far_format.sample_rate, rate),
            capture: VecDeque::new(),
            render: VecDeque::new(),
            output: VecDeque::new(),
            echo: VecDeque::with_capacity(ECHO_HISTORY),
            capture_block: Vec::with_capacity(block_samples),
            render_block: Vec::with_capacity(block_samples),
            cancelled_block: vec![0.0; block_samples],
        })
    }

    fn register_played(&mut self, frame: &[u8]) -> Result<(), CaptureError> {
        let samples = pcm::normalized_samples(frame, &self.far_format);
        let mono = downmix(&samples, self.far_format.channels);
        self.render.extend(self.far_in.process(&mono));
        self.feed_render()
    }

    fn write(&mut self, frame: &[u8]) -> Result<(), CaptureError> {
        let samples = pcm::normalized_samples(frame, &self.near_format);
        let mono = downmix(&samples, self.near_format.channels);
        self.capture.extend(self.near_in.process(&mono));
        self.process_capture()
    }

    fn read(&mut self, out: &mut [i16]) -> Result<FilterRead, CaptureError> {
        let wanted = out.len();
        if wanted == 0 || self.output.len() < wanted {
            return Ok(FilterRead::empty());
        }

        for (slot, sample) in out.iter_mut().zip(self.output.drain(..wanted)) {
            *slot = sample;
        }

        Ok(FilterRead {
            frame_ready: true,
            samples: wanted,
            more_pending: self.output.len() >= wanted,
            played_echo: self.echo.pop_front(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use crate::models::config::FilterFeatures;
    use crate::session::echo_canceller::EchoCanceller;

    fn session(near_rate: u32, features: FilterFeatures) -> EchoSessionConfig {
        EchoSessionConfig {
            near_format: AudioFormat::mono_16(near_rate),
            features,
            ..EchoSessionConfig::default()
        }
    }

    fn bypass() -> FilterFeatures {
        FilterFeatures {
            cancel_echo: false,
            ..FilterFeatures::default()
        }
    }

    fn far_frame(value: f32) -> Vec<u8> {
        // 10 ms of 44.1 kHz stereo float.
        let mut bytes = Vec::with_capacity(441 * 8);
        for _ in 0..441 * 2 {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn engine_rate_rounds_up_to_a_supported_rate() {
        assert_eq!(engine_rate(8000), 16000);
        assert_eq!(engine_rate(16000), 16000);
        assert_eq!(engine_rate(44100), 48000);
        assert_eq!(engine_rate(96000), 48000);
    }

    #[test]
    fn narrowband_session_runs_the_engine_at_16k() {
        let filter = Aec3Filter::from_session(&EchoSessionConfig::default()).unwrap();
        assert_eq!(filter.engine_rate(), 16000);
        assert!(filter.is_cancelling());
    }

    #[test]
    fn each_period_drains_exactly_one_frame() {
        let canceller =
            EchoCanceller::<Aec3Filter>::from_session(&session(16000, FilterFeatures::default()), 16)
                .unwrap();

        for _ in 0..50 {
            canceller.register_played(&far_frame(0.1)).unwrap();
            canceller.register_played(&far_frame(0.1)).unwrap();
            let delivered = canceller
                .process(&[0u8; 640], 320, |frame, _| assert_eq!(frame.len(), 320))
                .unwrap();
            assert_eq!(delivered, 1);
        }
    }

    #[test]
    fn narrowband_frames_survive_the_rate_round_trip() {
        let canceller =
            EchoCanceller::<Aec3Filter>::from_session(&session(8000, FilterFeatures::default()), 16)
                .unwrap();

        let mut drained = 0;
        for _ in 0..50 {
            drained += canceller.process(&[0u8; 320], 160, |_, _| {}).unwrap();
        }
        assert_eq!(drained, 50);
    }

    #[test]
    fn disabled_cancellation_passes_audio_through() {
        let mut filter = Aec3Filter::from_session(&session(8000, bypass())).unwrap();
        assert!(!filter.is_cancelling());
        filter.register_played(&far_frame(0.8)).unwrap();

        let mut out = [0i16; 160];
        filter.write(&pcm::samples_to_bytes(&[1000i16; 160])).unwrap();
        let read = filter.read(&mut out).unwrap();

        assert!(read.frame_ready);
        assert!(!read.more_pending);
        assert_eq!(read.played_echo.map(|echo| echo.len()), Some(160));
        assert!(out.iter().all(|s| (*s - 1000).abs() <= 1), "{:?}", &out[..8]);
    }

    #[test]
    fn cancellation_keeps_pace_with_a_concurrent_reference() {
        let canceller = Arc::new(
            EchoCanceller::<Aec3Filter>::from_session(&session(16000, FilterFeatures::default()), 16)
                .unwrap(),
        );

        let reference = {
            let canceller = Arc::clone(&canceller);
            thread::spawn(move || {
                for _ in 0..200 {
                    canceller.register_played(&far_frame(0.2)).unwrap();
                }
            })
        };

        let mut drained = 0;
        for _ in 0..100 {
            drained += canceller.process(&[0u8; 640], 320, |_, _| {}).unwrap();
        }
        reference.join().unwrap();

        assert_eq!(drained, 100);
    }
}
