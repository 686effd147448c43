use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::models::config::EchoSessionConfig;
use crate::models::error::CaptureError;
use crate::processing::frame_queue::FrameQueue;
use crate::traits::echo_filter::{EchoFilter, FilterRead};

/// Consecutive reads that report `more_pending` without producing a frame
/// before a drain is abandoned. Productive reads are never limited.
const MAX_IDLE_READS: usize = 64;

/// Counters maintained by [`EchoCanceller`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancellerStats {
    pub frames_written: u64,
    pub frames_drained: u64,
    pub reference_registered: u64,
    pub reference_dropped: u64,
}

/// The meeting point of the near-end and far-end streams.
///
/// The filter sits behind a single mutex, so a write, a read, or a
/// registration always completes before the next one starts. Far-end frames
/// first land in a bounded [`FrameQueue`]: the reference thread hands them
/// to the filter only if it can take the lock without waiting, otherwise
/// the near-end thread flushes them just before its next write. The
/// reference callback therefore never waits on cancellation work.
///
/// Threading contract: `register_played` from the reference thread only;
/// `write`, `read` and `process` from the near-end thread only.
pub struct EchoCanceller<F: EchoFilter> {
    filter: Mutex<F>,
    reference: Mutex<FrameQueue>,
    frames_written: AtomicU64,
    frames_drained: AtomicU64,
    reference_registered: AtomicU64,
}

impl<F: EchoFilter> EchoCanceller<F> {
    pub fn new(filter: F, reference_capacity: usize) -> Self {
        Self {
            filter: Mutex::new(filter),
            reference: Mutex::new(FrameQueue::new(reference_capacity)),
            frames_written: AtomicU64::new(0),
            frames_drained: AtomicU64::new(0),
            reference_registered: AtomicU64::new(0),
        }
    }

    /// Build the filter from `session` and wrap it.
    pub fn from_session(
        session: &EchoSessionConfig,
        reference_capacity: usize,
    ) -> Result<Self, CaptureError> {
        Ok(Self::new(F::from_session(session)?, reference_capacity))
    }

    /// Register a far-end frame. Never waits on the filter lock.
    pub fn register_played(&self, frame: &[u8]) -> Result<(), CaptureError> {
        let evicted = self.reference.lock().push(frame.to_vec());
        if evicted {
            log::debug!("reference queue full, dropped oldest far-end frame");
        }
        self.reference_registered.fetch_add(1, Ordering::Relaxed);

        match self.filter.try_lock() {
            Some(mut filter) => self.flush_reference(&mut filter),
            None => Ok(()),
        }
    }

    /// Queue a near-end frame for cancellation.
    pub fn write(&self, frame: &[u8]) -> Result<(), CaptureError> {
        let mut filter = self.filter.lock();
        self.flush_reference(&mut filter)?;
        filter.write(frame)?;
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Attempt to read one cancelled frame into `out`.
    pub fn read(&self, out: &mut [i16]) -> Result<FilterRead, CaptureError> {
        let read = self.filter.lock().read(out)?;
        if read.frame_ready {
            self.frames_drained.fetch_add(1, Ordering::Relaxed);
        }
        Ok(read)
    }

    /// Write one near-end frame, then drain every frame it made ready.
    ///
    /// `sink` receives each cancelled frame (at most `out_capacity` samples)
    /// with the filter's far-end echo estimate, in output order, before this
    /// call returns. Returns the number of frames delivered.
    pub fn process<S>(&self, frame: &[u8], out_capacity: usize, mut sink: S) -> Result<usize, CaptureError>
    where
        S: FnMut(&[i16], Option<&[i16]>),
    {
        self.write(frame)?;

        let mut out = vec![0i16; out_capacity];
        let mut delivered = 0;
        let mut idle = 0;
        loop {
            let read = self.read(&mut out)?;
            if read.frame_ready {
                let samples = read.samples.min(out.len());
                sink(&out[..samples], read.played_echo.as_deref());
                delivered += 1;
                idle = 0;
            } else {
                idle += 1;
            }
            if !read.more_pending {
                return Ok(delivered);
            }
            if idle == MAX_IDLE_READS {
                log::warn!(
                    "echo filter reported pending output for {} reads without a frame; abandoning drain",
                    MAX_IDLE_READS
                );
                return Ok(delivered);
            }
        }
    }

    /// Far-end frames waiting for the filter lock.
    pub fn queued_reference_frames(&self) -> usize {
        self.reference.lock().len()
    }

    pub fn stats(&self) -> CancellerStats {
        CancellerStats {
            frames_written: self.frames_written.load(Ordering::Relaxed),
            frames_drained: self.frames_drained.load(Ordering::Relaxed),
            reference_registered: self.reference_registered.load(Ordering::Relaxed),
            reference_dropped: self.reference.lock().dropped(),
        }
    }

    /// Hand every queued far-end frame to the filter, oldest first.
    ///
    /// If the filter rejects a frame, that frame and the ones behind it are
    /// counted as dropped.
    fn flush_reference(&self, filter: &mut F) -> Result<(), CaptureError> {
        let frames = self.reference.lock().drain_all();
        let total = frames.len();
        for (i, frame) in frames.iter().enumerate() {
            if let Err(e) = filter.register_played(frame) {
                self.reference.lock().record_dropped(total - i);
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::thread;

    use crate::processing::passthrough_filter::PassthroughFilter;

    /// Makes `script[n]` frames ready on the n-th write, in a single batch.
    struct ScriptedFilter {
        script: VecDeque<usize>,
        ready: usize,
        events: Vec<&'static str>,
        /// Registrations accepted before `register_played` starts failing.
        accept_played: Option<usize>,
        /// Reads that report `more_pending` without a frame.
        stalled_reads: usize,
    }

    impl ScriptedFilter {
        fn new(script: &[usize]) -> Self {
            Self {
                script: script.iter().copied().collect(),
                ready: 0,
                events: Vec::new(),
                accept_played: None,
                stalled_reads: 0,
            }
        }
    }

    impl EchoFilter for ScriptedFilter {
        fn from_session(_session: &EchoSessionConfig) -> Result<Self, CaptureError> {
            Ok(Self::new(&[]))
        }

        fn register_played(&mut self, _frame: &[u8]) -> Result<(), CaptureError> {
            if let Some(accept) = self.accept_played.as_mut() {
                if *accept == 0 {
                    return Err(CaptureError::FilterFailed("reference rejected".into()));
                }
                *accept -= 1;
            }
            self.events.push("played");
            Ok(())
        }

        fn write(&mut self, _frame: &[u8]) -> Result<(), CaptureError> {
            self.events.push("write");
            self.ready += self.script.pop_front().unwrap_or(0);
            Ok(())
        }

        fn read(&mut self, out: &mut [i16]) -> Result<FilterRead, CaptureError> {
            if self.stalled_reads > 0 {
                self.stalled_reads -= 1;
                return Ok(FilterRead {
                    more_pending: true,
                    ..FilterRead::empty()
                });
            }
            if self.ready == 0 {
                return Ok(FilterRead::empty());
            }
            self.ready -= 1;
            out.fill(self.ready as i16);
            Ok(FilterRead {
                frame_ready: true,
                samples: out.len(),
                more_pending: self.ready > 0,
                played_echo: None,
            })
        }
    }

    #[test]
    fn drain_retrieves_exactly_the_frames_made_ready() {
        let script = [0, 1, 2, 5, 0, 3];
        let canceller = EchoCanceller::new(ScriptedFilter::new(&script), 8);

        for expected in script {
            let mut seen = 0;
            let delivered = canceller
                .process(&[0u8; 320], 160, |frame, _| {
                    assert_eq!(frame.len(), 160);
                    seen += 1;
                })
                .unwrap();
            assert_eq!(delivered, expected);
            assert_eq!(seen, expected);
        }

        let stats = canceller.stats();
        assert_eq!(stats.frames_written, script.len() as u64);
        assert_eq!(stats.frames_drained, 11);
    }

    #[test]
    fn large_batches_are_drained_completely() {
        let canceller = EchoCanceller::new(ScriptedFilter::new(&[1500]), 8);

        let delivered = canceller.process(&[0u8; 320], 160, |_, _| {}).unwrap();

        assert_eq!(delivered, 1500);
        assert_eq!(canceller.filter.lock().ready, 0);
        assert_eq!(canceller.stats().frames_drained, 1500);
    }

    #[test]
    fn idle_reads_between_frames_do_not_end_the_drain() {
        let mut filter = ScriptedFilter::new(&[3]);
        filter.stalled_reads = MAX_IDLE_READS - 1;
        let canceller = EchoCanceller::new(filter, 8);

        let delivered = canceller.process(&[0u8; 320], 160, |_, _| {}).unwrap();
        assert_eq!(delivered, 3);
    }

    #[test]
    fn stalled_filter_abandons_the_drain() {
        let mut filter = ScriptedFilter::new(&[2]);
        filter.stalled_reads = MAX_IDLE_READS + 10;
        let canceller = EchoCanceller::new(filter, 8);

        let delivered = canceller.process(&[0u8; 320], 160, |_, _| {}).unwrap();

        assert_eq!(delivered, 0);
        assert_eq!(canceller.filter.lock().stalled_reads, 10);
    }

    #[test]
    fn rejected_reference_frames_are_counted_as_dropped() {
        let mut filter = ScriptedFilter::new(&[0]);
        filter.accept_played = Some(1);
        let canceller = EchoCanceller::new(filter, 8);
        {
            let _busy = canceller.filter.lock();
            for _ in 0..4 {
                canceller.register_played(&[0, 0]).unwrap();
            }
        }

        let result = canceller.write(&[0, 0]);

        assert!(matches!(result, Err(CaptureError::FilterFailed(_))));
        assert_eq!(canceller.queued_reference_frames(), 0);
        let stats = canceller.stats();
        assert_eq!(stats.reference_registered, 4);
        assert_eq!(stats.reference_dropped, 3);
        assert_eq!(stats.frames_written, 0);
    }

    #[test]
    fn queued_reference_is_flushed_before_write() {
        let canceller = EchoCanceller::new(ScriptedFilter::new(&[0]), 8);
        {
            // Hold the filter so registration has to queue.
            let _busy = canceller.filter.lock();
            canceller.register_played(&[1, 2]).unwrap();
            canceller.register_played(&[3, 4]).unwrap();
        }
        assert_eq!(canceller.queued_reference_frames(), 2);

        canceller.write(&[0, 0]).unwrap();

        assert_eq!(canceller.queued_reference_frames(), 0);
        assert_eq!(canceller.filter.lock().events, vec!["played", "played", "write"]);
    }

    #[test]
    fn idle_filter_takes_reference_immediately() {
        let canceller = EchoCanceller::new(ScriptedFilter::new(&[]), 8);
        canceller.register_played(&[1, 2]).unwrap();

        assert_eq!(canceller.queued_reference_frames(), 0);
        assert_eq!(canceller.filter.lock().events, vec!["played"]);
    }

    #[test]
    fn reference_overflow_drops_oldest() {
        let canceller = EchoCanceller::new(ScriptedFilter::new(&[]), 2);
        {
            let _busy = canceller.filter.lock();
            for _ in 0..5 {
                canceller.register_played(&[0, 0]).unwrap();
            }
        }
        let stats = canceller.stats();
        assert_eq!(stats.reference_registered, 5);
        assert_eq!(stats.reference_dropped, 3);
        assert_eq!(canceller.queued_reference_frames(), 2);
    }

    #[test]
    fn concurrent_streams_lose_no_near_end_frames() {
        let session = EchoSessionConfig::default();
        let canceller = Arc::new(
            EchoCanceller::<PassthroughFilter>::from_session(&session, 16).unwrap(),
        );

        let reference = {
            let canceller = Arc::clone(&canceller);
            thread::spawn(move || {
                let far = vec![0u8; 441 * 8];
                for _ in 0..500 {
                    canceller.register_played(&far).unwrap();
                }
            })
        };

        let mut drained = 0;
        for _ in 0..500 {
            drained += canceller.process(&[0u8; 320], 160, |_, _| {}).unwrap();
        }
        reference.join().unwrap();

        assert_eq!(drained, 500);
        assert_eq!(canceller.stats().reference_registered, 500);
    }
}
