use std::collections::VecDeque;

use crate::models::audio_models::AudioFormat;
use crate::models::config::EchoSessionConfig;
use crate::models::error::CaptureError;
use crate::processing::pcm;
use crate::traits::echo_filter::{EchoFilter, FilterRead};

/// Internal block length, matching the 10 ms framing of common AEC engines.
const BLOCK_MS: u32 = 10;

/// Far-end frames retained for echo estimates.
const PLAYED_HISTORY: usize = 64;

/// An [`EchoFilter`] that re-blocks near-end audio without altering it.
///
/// It reproduces the framing behaviour of a real canceller: audio becomes
/// readable only in whole 10 ms blocks, and a read hands out exactly one
/// caller-sized frame once enough blocks are ready. Device periods that are
/// not a multiple of the block therefore yield zero frames on some writes
/// and several on others. The oldest registered far-end frame is reported
/// as the echo estimate. It removes no echo: use it in tests and where the
/// `aec3` feature is off.
#[derive(Debug)]
pub struct PassthroughFilter {
    block_samples: usize,
    far_format: AudioFormat,
    pending: VecDeque<i16>,
    played: VecDeque<Vec<i16>>,
    /// Near-end samples written since creation.
    written: u64,
    /// Near-end samples read since creation.
    taken: u64,
}

impl PassthroughFilter {
    pub fn block_samples(&self) -> usize {
        self.block_samples
    }

    /// Near-end samples written but not yet read.
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Unread samples that lie inside completed blocks.
    ///
    /// Block boundaries are counted from the start of the stream, so a
    /// partial read does not shift them.
    fn ready_samples(&self) -> usize {
        let block = self.block_samples as u64;
        let completed = self.written / block * block;
        completed.saturating_sub(self.taken) as usize
    }
}

impl EchoFilter for PassthroughFilter {
    fn from_session(session: &EchoSessionConfig) -> Result<Self, CaptureError> {
        let block_samples = session.near_format.frames_per_period(BLOCK_MS)
            * session.near_format.channels as usize;
        if block_samples == 0 {
            return Err(CaptureError::FilterFailed(format!(
                "near-end rate {}Hz is too low for {} ms blocks",
                session.near_format.sample_rate, BLOCK_MS
            )));
        }
        Ok(Self {
            block_samples,
            far_format: session.far_format,
            pending: VecDeque::new(),
            played: VecDeque::with_capacity(PLAYED_HISTORY),
            written: 0,
            taken: 0,
        })
    }

    fn register_played(&mut self, frame: &[u8]) -> Result<(), CaptureError> {
        if self.played.len() == PLAYED_HISTORY {
            self.played.pop_front();
        }
        let samples = pcm::normalized_samples(frame, &self.far_format)
            .into_iter()
            .map(pcm::float_to_sample)
            .collect();
        self.played.push_back(samples);
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> Result<(), CaptureError> {
        let samples = pcm::bytes_to_samples(frame);
        self.written += samples.len() as u64;
        self.pending.extend(samples);
        Ok(())
    }

    fn read(&mut self, out: &mut [i16]) -> Result<FilterRead, CaptureError> {
        let wanted = out.len();
        if wanted == 0 || self.ready_samples() < wanted {
            return Ok(FilterRead::empty());
        }

        for (slot, sample) in out.iter_mut().zip(self.pending.drain(..wanted)) {
            *slot = sample;
        }
        self.taken += wanted as u64;

        Ok(FilterRead {
            frame_ready: true,
            samples: wanted,
            more_pending: self.ready_samples() >= wanted,
            played_echo: self.played.pop_front(),
        })
    }
}
