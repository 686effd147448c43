/// Streaming linear-interpolation resampler for mono audio.
///
/// Unlike a one-shot resample of each buffer, the read position and the
/// last input sample carry over between calls, so a stream cut into
/// device-sized chunks resamples without seams at chunk boundaries.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    source_rate: u32,
    target_rate: u32,
    /// Input samples advanced per output sample.
    step: f64,
    /// Read position; 0.0 is `previous`, 1.0 the first sample of the next chunk.
    position: f64,
    previous: Option<f32>,
}

impl LinearResampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            source_rate,
            target_rate,
            step: source_rate as f64 / target_rate.max(1) as f64,
            position: 0.0,
            previous: None,
        }
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    pub fn is_passthrough(&self) -> bool {
        self.source_rate == self.target_rate
    }

    /// Resample the next chunk of the stream.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() || input.is_empty() {
            return input.to_vec();
        }

        let previous = *self.previous.get_or_insert(input[0]);
        let at = |k: usize| if k == 0 { previous } else { input[k - 1] };
        let len = input.len() as f64;

        let mut output = Vec::with_capacity((len / self.step) as usize + 1);
        while self.position < len {
            let index = self.position as usize;
            let fraction = (self.position - index as f64) as f32;
            output.push(at(index) * (1.0 - fraction) + at(index + 1) * fraction);
            self.position += self.step;
        }

        self.position -= len;
        self.previous = input.last().copied();
        output
    }

    /// Forget stream history.
    pub fn reset(&mut self) {
        self.position = 0.0;
        self.previous = None;
    }
}

/// Average interleaved channels down to mono.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
