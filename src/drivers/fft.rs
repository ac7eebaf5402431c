use std::f64::consts::PI;
use std::sync::Arc;
use ndarray::{Array2, ArrayView2};
use rustfft::{num_complex::Complex64, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use crate::drivers::{RingBuffer, SweepError};
/// Normalisation applied to the averaged periodogram.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scaling {
    /// V²/Hz
    Density,
    /// V²
    Spectrum,
}
impl Default for Scaling {
    fn default() -> Self {
        Scaling::Density
    }
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PsdParams {
    pub sample_rate_hz: f64,
    /// nFFT = 2^n_fft_exp
    pub n_fft_exp: u32,
    pub n_avg: usize,
    #[serde(default)]
    pub scaling: Scaling,
}
impl PsdParams {
    pub fn n_fft(&self) -> usize {
        1usize << self.n_fft_exp
    }
    pub fn n_bins(&self) -> usize {
        self.n_fft() / 2 + 1
    }
    pub fn buffer_size(&self) -> usize {
        self.n_fft() * self.n_avg
    }
    /// `rfftfreq(nFFT, 1/fs)`
    pub fn frequencies(&self) -> Vec<f64> {
        let df = self.sample_rate_hz / self.n_fft() as f64;
        (0..self.n_bins()).map(|k| k as f64 * df).collect()
    }
    pub fn validate(&self) -> Result<(), SweepError> {
        if !(self.sample_rate_hz > 0.0) {
            return Err(SweepError::InvalidSampleRate);
        }
        if !(1..=24).contains(&self.n_fft_exp) {
            return Err(SweepError::InvalidConfig(format!(
                "FFT exponent must be within 1..=24, got {}",
                self.n_fft_exp
            )));
        }
        if self.n_avg == 0 {
            return Err(SweepError::InvalidConfig(
                "PSD averaging count must be at least one".into(),
            ));
        }
        Ok(())
    }
}
/// One-sided PSD for every channel.
#[derive(Clone, Debug)]
pub struct Spectrum {
    pub freqs: Vec<f64>,
    pub psd: Array2<f64>, // bins x channels
}
fn hann_periodic(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos())
        .collect()
}
/// Welch averaged periodogram along axis 0: Hann window, half-segment overlap,
/// per-segment mean removal, one-sided output.
pub fn welch(
    data: ArrayView2<'_, f64>,
    sample_rate_hz: f64,
    fft: &Arc<dyn Fft<f64>>,
    window: &[f64],
    scaling: Scaling,
) -> Result<Spectrum, SweepError> {
    let nperseg = window.len();
    let (rows, channels) = data.dim();
    if nperseg == 0 || rows < nperseg || channels == 0 {
        return Err(SweepError::SpectrumShape {
            required: nperseg,
            rows,
            channels,
        });
    }
    let step = nperseg - nperseg / 2;
    let n_segments = (rows - nperseg) / step + 1;
    let n_bins = nperseg / 2 + 1;
    let scale = match scaling {
        Scaling::Density => 1.0 / (sample_rate_hz * window.iter().map(|w| w * w).sum::<f64>()),
        Scaling::Spectrum => 1.0 / window.iter().sum::<f64>().powi(2),
    };
    let mut psd = Array2::<f64>::zeros((n_bins, channels));
    let mut scratch = vec![Complex64::new(0.0, 0.0); nperseg];
    for (ch, column) in data.columns().into_iter().enumerate() {
        for seg in 0..n_segments {
            let start = seg * step;
            let segment = column.slice(ndarray::s![start..start + nperseg]);
            let mean = segment.sum() / nperseg as f64;
            for ((slot, x), w) in scratch.iter_mut().zip(segment.iter()).zip(window) {
                *slot = Complex64::new((x - mean) * w, 0.0);
            }
            fft.process(&mut scratch);
            for k in 0..n_bins {
                let mut p = scratch[k].norm_sqr() * scale;
                let is_nyquist = nperseg % 2 == 0 && k == nperseg / 2;
                if k != 0 && !is_nyquist {
                    p *= 2.0;
                }
                psd[[k, ch]] += p;
            }
        }
    }
    psd.mapv_inplace(|p| p / n_segments as f64);
    let df = sample_rate_hz / nperseg as f64;
    Ok(Spectrum {
        freqs: (0..n_bins).map(|k| k as f64 * df).collect(),
        psd,
    })
}
/// Collects `nFFT * n_avg` samples on its own buffer and emits one Welch PSD per fill.
pub struct SpectralEstimator {
    params: PsdParams,
    buffer: RingBuffer,
    fft: Arc<dyn Fft<f64>>,
    window: Vec<f64>,
}
impl SpectralEstimator {
    pub fn new(params: PsdParams, n_channels: usize) -> Result<Self, SweepError> {
        params.validate()?;
        let buffer = RingBuffer::new(params.sample_rate_hz, n_channels, params.buffer_size())?;
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(params.n_fft());
        let window = hann_periodic(params.n_fft());
        Ok(Self {
            params,
            buffer,
            fft,
            window,
        })
    }
    pub fn n_bins(&self) -> usize {
        self.params.n_bins()
    }
    pub fn buffer(&self) -> &RingBuffer {
        &self.buffer
    }
    pub fn add_data(&mut self, block: ArrayView2<'_, f64>) -> Result<(), SweepError> {
        self.buffer.add_data(block)
    }
    /// Computes and rewinds once the buffer is full; `None` while still collecting.
    pub fn poll(&mut self) -> Option<Result<Spectrum, SweepError>> {
        if !self.buffer.is_filled() {
            return None;
        }
        let result = self.compute(self.buffer.data());
        self.buffer.reset();
        Some(result)
    }
    pub fn compute(&self, data: ArrayView2<'_, f64>) -> Result<Spectrum, SweepError> {
        welch(
            data,
            self.params.sample_rate_hz,
            &self.fft,
            &self.window,
            self.params.scaling,
        )
    }
    pub fn reset(&mut self) {
        self.buffer.reset();
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    fn params(exp: u32, n_avg: usize, scaling: Scaling) -> PsdParams {
        PsdParams {
            sample_rate_hz: 1000.0,
            n_fft_exp: exp,
            n_avg,
            scaling,
        }
    }
    #[test]
    fn bin_count_follows_exponent() {
        for exp in [3u32, 8, 10] {
            let p = params(exp, 2, Scaling::Density);
            let mut estimator = SpectralEstimator::new(p.clone(), 2).unwrap();
            let rows = p.buffer_size();
            estimator
                .add_data(Array2::from_shape_fn((rows, 2), |(r, _)| r as f64).view())
                .unwrap();
            let spectrum = estimator.poll().unwrap().unwrap();
            assert_eq!(spectrum.freqs.len(), (1usize << (exp - 1)) + 1);
            assert_eq!(spectrum.psd.dim(), (spectrum.freqs.len(), 2));
            let last = *spectrum.freqs.last().unwrap();
            assert!((last - 500.0).abs() < 1e-9);
            assert_eq!(spectrum.freqs, p.frequencies());
        }
    }
    #[test]
    fn poll_waits_for_fill_then_rewinds() {
        let p = params(4, 2, Scaling::Density);
        let mut estimator = SpectralEstimator::new(p, 1).unwrap();
        estimator.add_data(Array2::zeros((20, 1)).view()).unwrap();
        assert!(estimator.poll().is_none());
        estimator.add_data(Array2::zeros((12, 1)).view()).unwrap();
        assert!(estimator.poll().is_some());
        assert!(!estimator.buffer().is_filled());
        assert!(estimator.poll().is_none());
    }
    #[test]
    fn on_bin_sine_power_with_spectrum_scaling() {
        let p = params(6, 4, Scaling::Spectrum);
        let n = p.n_fft();
        let k0 = 8;
        let amplitude = 2.0;
        let estimator = SpectralEstimator::new(p.clone(), 1).unwrap();
        let data = Array2::from_shape_fn((p.buffer_size(), 1), |(r, _)| {
            amplitude * (2.0 * PI * k0 as f64 * r as f64 / n as f64).cos()
        });
        let spectrum = estimator.compute(data.view()).unwrap();
        assert!((spectrum.psd[[k0, 0]] - amplitude * amplitude / 2.0).abs() < 1e-9);
        assert!(spectrum.psd[[0, 0]].abs() < 1e-12);
    }
    #[test]
    fn white_noise_density_integrates_to_variance() {
        let p = params(8, 32, Scaling::Density);
        let estimator = SpectralEstimator::new(p.clone(), 1).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let data = Array2::from_shape_fn((p.buffer_size(), 1), |_| rng.gen_range(-1.0..1.0));
        let spectrum = estimator.compute(data.view()).unwrap();
        let df = p.sample_rate_hz / p.n_fft() as f64;
        let power: f64 = spectrum.psd.column(0).sum() * df;
        assert!((power - 1.0 / 3.0).abs() < 0.05, "power {power}");
    }
    #[test]
    fn short_buffer_is_a_shape_error() {
        let estimator = SpectralEstimator::new(params(6, 1, Scaling::Density), 1).unwrap();
        let err = estimator.compute(Array2::zeros((10, 1)).view()).unwrap_err();
        assert!(matches!(err, SweepError::SpectrumShape { rows: 10, .. }));
    }
    #[test]
    fn invalid_params_are_rejected() {
        assert!(SpectralEstimator::new(params(0, 1, Scaling::Density), 1).is_err());
        assert!(SpectralEstimator::new(params(8, 0, Scaling::Density), 1).is_err());
    }
}
