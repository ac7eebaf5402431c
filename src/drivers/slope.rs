use log::{debug, warn};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use crate::drivers::{RingBuffer, SweepError};
/// How per-channel slopes are combined into a single settled/not-settled verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StabilityCriteria {
    #[serde(rename = "All channels", alias = "all")]
    AllChannels,
    #[serde(rename = "One Channel", alias = "one")]
    OneChannel,
    #[serde(rename = "Mean", alias = "mean")]
    Mean,
}
impl Default for StabilityCriteria {
    fn default() -> Self {
        StabilityCriteria::AllChannels
    }
}
impl StabilityCriteria {
    /// An empty slope set is never stable.
    pub fn is_stable(self, slopes: &[f64], max_slope: f64) -> bool {
        if slopes.is_empty() {
            return false;
        }
        match self {
            StabilityCriteria::AllChannels => slopes.iter().all(|s| *s < max_slope),
            StabilityCriteria::OneChannel => slopes.iter().any(|s| *s < max_slope),
            StabilityCriteria::Mean => {
                let mean = slopes.iter().sum::<f64>() / slopes.len() as f64;
                mean < max_slope
            }
        }
    }
}
/// First-degree least-squares fit of one column.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearFit {
    /// Absolute slope in units per second.
    pub slope: f64,
    /// Fitted value at the most recent sample.
    pub intercept: f64,
}
/// Fits `y = a + b t` with `t = i / fs` and reports `|b|` plus the fitted value at the last sample.
pub fn fit_line(values: ArrayView1<'_, f64>, sample_rate_hz: f64) -> LinearFit {
    let n = values.len();
    if n == 0 {
        return LinearFit {
            slope: f64::NAN,
            intercept: f64::NAN,
        };
    }
    if n == 1 {
        return LinearFit {
            slope: 0.0,
            intercept: values[0],
        };
    }
    let ts = 1.0 / sample_rate_hz;
    let t_mean = (n - 1) as f64 * ts / 2.0;
    let y_mean = values.sum() / n as f64;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dt = i as f64 * ts - t_mean;
        sxy += dt * (y - y_mean);
        sxx += dt * dt;
    }
    let b = sxy / sxx;
    let a = y_mean - b * t_mean;
    LinearFit {
        slope: b.abs(),
        intercept: a + b * (n - 1) as f64 * ts,
    }
}
#[derive(Clone, Debug)]
pub struct SlopeReport {
    pub slopes: Vec<f64>,      // one per buffer column
    pub intercepts: Vec<f64>,  // one per buffer column
    pub stable: bool,
    /// Set when stability came from the timeout fallback rather than the slopes.
    pub forced: bool,
}
/// Decides DC settling from a filled buffer window.
pub struct SlopeEstimator {
    max_slope: f64,
    criteria: StabilityCriteria,
    timeout_cycles: u32,
    unstable_cycles: u32,
}
impl SlopeEstimator {
    pub fn new(
        max_slope: f64,
        criteria: StabilityCriteria,
        timeout_cycles: u32,
    ) -> Result<Self, SweepError> {
        if !(max_slope > 0.0) {
            return Err(SweepError::InvalidConfig(format!(
                "maximum slope must be positive, got {max_slope}"
            )));
        }
        if timeout_cycles == 0 {
            return Err(SweepError::InvalidConfig(
                "stabilization timeout must be at least one cycle".into(),
            ));
        }
        Ok(Self {
            max_slope,
            criteria,
            timeout_cycles,
            unstable_cycles: 0,
        })
    }
    pub fn max_slope(&self) -> f64 {
        self.max_slope
    }
    pub fn criteria(&self) -> StabilityCriteria {
        self.criteria
    }
    pub fn unstable_cycles(&self) -> u32 {
        self.unstable_cycles
    }
    pub fn reset_timeout(&mut self) {
        self.unstable_cycles = 0;
    }
    pub fn fit_columns(buffer: &RingBuffer) -> Vec<LinearFit> {
        buffer
            .data()
            .columns()
            .into_iter()
            .map(|column| fit_line(column, buffer.sample_rate_hz()))
            .collect()
    }
    /// Fits every column; only `columns` take part in the stability verdict.
    pub fn evaluate(&mut self, buffer: &RingBuffer, columns: &[usize]) -> SlopeReport {
        let fits = Self::fit_columns(buffer);
        let judged: Vec<f64> = columns
            .iter()
            .filter_map(|&c| fits.get(c).map(|f| f.slope))
            .collect();
        let mut stable = self.criteria.is_stable(&judged, self.max_slope);
        let mut forced = false;
        if stable {
            self.unstable_cycles = 0;
        } else {
            self.unstable_cycles += 1;
            if self.unstable_cycles >= self.timeout_cycles {
                warn!(
                    "stabilization timeout after {} cycles, capturing anyway (slopes {:?})",
                    self.unstable_cycles, judged
                );
                self.unstable_cycles = 0;
                stable = true;
                forced = true;
            }
        }
        debug!("slopes {:?} stable={} forced={}", judged, stable, forced);
        SlopeReport {
            slopes: fits.iter().map(|f| f.slope).collect(),
            intercepts: fits.iter().map(|f| f.intercept).collect(),
            stable,
            forced,
        }
    }
}
