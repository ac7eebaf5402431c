use ndarray::{s, Array2, ArrayView2};
use crate::drivers::SweepError;
/// Fixed-capacity multi-channel sample store (`capacity x channels`).
///
/// Rows are kept in acquisition order: the newest sample is always the last
/// row. `reset` only rewinds the fill counter, the stored samples stay in
/// place until they are shifted out by new data.
#[derive(Clone, Debug)]
pub struct RingBuffer {
    data: Array2<f64>,
    sample_rate_hz: f64,
    counter: usize,
    total_seen: u64,
}
impl RingBuffer {
    pub fn new(sample_rate_hz: f64, n_channels: usize, capacity: usize) -> Result<Self, SweepError> {
        if !(sample_rate_hz > 0.0) {
            return Err(SweepError::InvalidSampleRate);
        }
        if capacity == 0 || n_channels == 0 {
            return Err(SweepError::InvalidConfig(format!(
                "ring buffer needs a non-empty shape, got {capacity} x {n_channels}"
            )));
        }
        Ok(Self {
            data: Array2::zeros((capacity, n_channels)),
            sample_rate_hz,
            counter: 0,
            total_seen: 0,
        })
    }
    /// Capacity is `floor(seconds * fs)` samples.
    pub fn with_duration(
        sample_rate_hz: f64,
        n_channels: usize,
        seconds: f64,
    ) -> Result<Self, SweepError> {
        if !(sample_rate_hz > 0.0) {
            return Err(SweepError::InvalidSampleRate);
        }
        let capacity = (seconds * sample_rate_hz).floor().max(0.0) as usize;
        Self::new(sample_rate_hz, n_channels, capacity)
    }
    pub fn capacity(&self) -> usize {
        self.data.nrows()
    }
    pub fn n_channels(&self) -> usize {
        self.data.ncols()
    }
    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }
    pub fn counter(&self) -> usize {
        self.counter
    }
    pub fn total_seen(&self) -> u64 {
        self.total_seen
    }
    pub fn data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }
    pub fn add_data(&mut self, block: ArrayView2<'_, f64>) -> Result<(), SweepError> {
        if block.ncols() != self.n_channels() {
            return Err(SweepError::ChannelMismatch {
                expected: self.n_channels(),
                actual: block.ncols(),
            });
        }
        let incoming = block.nrows();
        if incoming == 0 {
            return Ok(());
        }
        let capacity = self.capacity();
        if incoming >= capacity {
            self.data
                .assign(&block.slice(s![incoming - capacity.., ..]));
        } else {
            let kept = self.data.slice(s![incoming.., ..]).to_owned();
            self.data.slice_mut(s![..capacity - incoming, ..]).assign(&kept);
            self.data
                .slice_mut(s![capacity - incoming.., ..])
                .assign(&block);
        }
        self.counter = (self.counter + incoming).min(capacity);
        self.total_seen += incoming as u64;
        Ok(())
    }
    pub fn is_filled(&self) -> bool {
        self.counter >= self.capacity()
    }
    pub fn reset(&mut self) {
        self.counter = 0;
    }
    /// Timestamps (seconds since the first sample ever added) of the last `n` rows.
    pub fn get_times(&self, n: usize) -> Vec<f64> {
        let ts = 1.0 / self.sample_rate_hz;
        let first = self.total_seen as f64 - n as f64;
        (0..n).map(|i| (first + i as f64) * ts).collect()
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    #[test]
    fn fills_after_capacity_rows() {
        let mut buffer = RingBuffer::new(10.0, 2, 4).unwrap();
        buffer.add_data(array![[1.0, 10.0], [2.0, 20.0]].view()).unwrap();
        assert!(!buffer.is_filled());
        buffer.add_data(array![[3.0, 30.0], [4.0, 40.0]].view()).unwrap();
        assert!(buffer.is_filled());
        assert_eq!(buffer.data().column(0).to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }
    #[test]
    fn undersized_blocks_shift_fifo() {
        let mut buffer = RingBuffer::new(10.0, 1, 3).unwrap();
        for v in 1..=5 {
            buffer.add_data(array![[v as f64]].view()).unwrap();
        }
        assert_eq!(buffer.data().column(0).to_vec(), vec![3.0, 4.0, 5.0]);
        assert_eq!(buffer.counter(), 3);
        assert_eq!(buffer.total_seen(), 5);
    }
    #[test]
    fn oversized_block_keeps_most_recent_rows() {
        let mut buffer = RingBuffer::new(10.0, 1, 3).unwrap();
        let block = Array2::from_shape_fn((7, 1), |(r, _)| r as f64);
        buffer.add_data(block.view()).unwrap();
        assert!(buffer.is_filled());
        assert_eq!(buffer.data().column(0).to_vec(), vec![4.0, 5.0, 6.0]);
        assert_eq!(buffer.total_seen(), 7);
    }
    #[test]
    fn reset_keeps_contents_and_total() {
        let mut buffer = RingBuffer::new(10.0, 1, 2).unwrap();
        buffer.add_data(array![[1.0], [2.0]].view()).unwrap();
        buffer.reset();
        assert!(!buffer.is_filled());
        assert_eq!(buffer.counter(), 0);
        assert_eq!(buffer.total_seen(), 2);
        assert_eq!(buffer.data().column(0).to_vec(), vec![1.0, 2.0]);
    }
    #[test]
    fn column_mismatch_is_rejected() {
        let mut buffer = RingBuffer::new(10.0, 2, 2).unwrap();
        let err = buffer.add_data(array![[1.0]].view()).unwrap_err();
        assert!(matches!(
            err,
            SweepError::ChannelMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }
    #[test]
    fn times_continue_across_resets() {
        let mut buffer = RingBuffer::with_duration(4.0, 1, 1.0).unwrap();
        assert_eq!(buffer.capacity(), 4);
        buffer.add_data(Array2::zeros((4, 1)).view()).unwrap();
        buffer.reset();
        buffer.add_data(Array2::zeros((2, 1)).view()).unwrap();
        assert_eq!(buffer.get_times(3), vec![0.75, 1.0, 1.25]);
    }
    #[test]
    fn empty_shape_is_a_config_error() {
        assert!(RingBuffer::with_duration(1000.0, 2, 0.0).is_err());
        assert!(RingBuffer::new(0.0, 2, 4).is_err());
    }
}
