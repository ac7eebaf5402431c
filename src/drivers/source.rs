use std::collections::VecDeque;
use std::time::{Duration, SystemTime};
use ndarray::Array2;
use crate::drivers::SweepError;
/// One acquisition block, `samples x channels`, at a fixed sample rate.
#[derive(Clone, Debug)]
pub struct SampleBlock {
    pub started_at: SystemTime,
    pub sample_rate_hz: f64,
    pub samples: Array2<f64>, // samples x channels
}
impl SampleBlock {
    pub fn new(sample_rate_hz: f64, samples: Array2<f64>) -> Self {
        Self {
            started_at: SystemTime::now(),
            sample_rate_hz,
            samples,
        }
    }
    pub fn validate(&self) -> Result<(), SweepError> {
        if !(self.sample_rate_hz > 0.0) {
            return Err(SweepError::InvalidSampleRate);
        }
        Ok(())
    }
    /// Fails unless the block was acquired at `expected_hz`.
    pub fn check_rate(&self, expected_hz: f64) -> Result<(), SweepError> {
        if !same_rate(self.sample_rate_hz, expected_hz) {
            return Err(SweepError::SampleRateMismatch {
                expected: expected_hz,
                actual: self.sample_rate_hz,
            });
        }
        Ok(())
    }
    pub fn num_channels(&self) -> usize {
        self.samples.ncols()
    }
    pub fn num_samples(&self) -> usize {
        self.samples.nrows()
    }
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.num_samples() as f64 / self.sample_rate_hz)
    }
}
/// Rates equal up to float noise.
pub fn same_rate(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs())
}
/// Anything that can hand out acquisition blocks in time order.
pub trait SampleSource {
    fn next_block(&mut self) -> Result<Option<SampleBlock>, SweepError>;
}
/// In-memory source useful for tests and deterministic playback.
pub struct ManualSource {
    queue: VecDeque<SampleBlock>,
}
impl ManualSource {
    pub fn new(blocks: impl IntoIterator<Item = SampleBlock>) -> Self {
        Self {
            queue: blocks.into_iter().collect(),
        }
    }
    pub fn push(&mut self, block: SampleBlock) {
        self.queue.push_back(block);
    }
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}
impl SampleSource for ManualSource {
    fn next_block(&mut self) -> Result<Option<SampleBlock>, SweepError> {
        Ok(self.queue.pop_front())
    }
}
/// Builds a block where every column follows `f(row_index, column)`.
pub fn block_from_fn(
    sample_rate_hz: f64,
    rows: usize,
    columns: usize,
    f: impl Fn(usize, usize) -> f64,
) -> SampleBlock {
    SampleBlock::new(
        sample_rate_hz,
        Array2::from_shape_fn((rows, columns), |(r, c)| f(r, c)),
    )
}
