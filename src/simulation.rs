use std::sync::{Arc, Mutex, MutexGuard};
use log::debug;
use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use crate::drivers::{SampleBlock, SampleSource, SweepError};
use crate::engine::BiasActuator;
use crate::types::{BiasChange, BiasSetpoint};

/// Transfer curve and settling behaviour of the simulated transistors.
#[derive(Clone, Debug)]
pub struct DeviceModel {
    /// Charge neutrality point (V).
    pub dirac_v: f64,
    /// Conductance at the Dirac point (S).
    pub min_conductance: f64,
    /// Conductance gain away from the Dirac point (S/V²).
    pub curvature: f64,
    /// Settling time constant after a bias step (s).
    pub tau_s: f64,
    /// Peak noise amplitude (A).
    pub noise_a: f64,
    /// Gate leakage conductance (S).
    pub gate_leakage_s: f64,
}

impl Default for DeviceModel {
    fn default() -> Self {
        Self {
            dirac_v: -0.2,
            min_conductance: 2e-4,
            curvature: 1e-3,
            tau_s: 0.05,
            noise_a: 1e-9,
            gate_leakage_s: 1e-9,
        }
    }
}

impl DeviceModel {
    /// Steady-state drain current of column `column`.
    pub fn drain_current(&self, setpoint: &BiasSetpoint, column: usize) -> f64 {
        let spread = 1.0 + 0.1 * column as f64 + 0.05 * setpoint.point.digital_index as f64;
        let dv = setpoint.vgs - self.dirac_v;
        setpoint.vds * spread * (self.min_conductance + self.curvature * dv * dv)
    }
}

struct DeviceState {
    model: DeviceModel,
    rng: StdRng,
    start_levels: Vec<f64>,
    targets: Vec<f64>,
    elapsed: usize,
    remaining_blocks: Option<usize>,
}

impl DeviceState {
    fn level(&self, column: usize, t: f64) -> f64 {
        let target = self.targets[column];
        target + (self.start_levels[column] - target) * (-t / self.model.tau_s).exp()
    }
    fn noise(&mut self) -> f64 {
        let n = self.model.noise_a;
        if n <= 0.0 {
            return 0.0;
        }
        // sum of uniforms, roughly gaussian
        (0..4).map(|_| self.rng.gen_range(-n..n)).sum::<f64>() / 2.0
    }
}

/// Bench stand-in that both produces sample blocks and accepts bias changes.
///
/// Clones share the same device, so one handle can feed samples while another
/// sits behind the sweep engine as its actuator.
#[derive(Clone)]
pub struct SimulatedDevice {
    sample_rate_hz: f64,
    block_rows: usize,
    n_columns: usize,
    gate_column: Option<usize>,
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    pub fn new(sample_rate_hz: f64, block_rows: usize, n_columns: usize, seed: u64) -> Self {
        Self {
            sample_rate_hz,
            block_rows,
            n_columns,
            gate_column: None,
            state: Arc::new(Mutex::new(DeviceState {
                model: DeviceModel::default(),
                rng: StdRng::seed_from_u64(seed),
                start_levels: vec![0.0; n_columns],
                targets: vec![0.0; n_columns],
                elapsed: 0,
                remaining_blocks: None,
            })),
        }
    }

    pub fn with_model(self, model: DeviceModel) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.model = model;
        }
        self
    }

    /// Column carrying the gate leakage current.
    pub fn with_gate(mut self, column: usize) -> Self {
        self.gate_column = Some(column);
        self
    }

    /// Stops producing after `blocks` more blocks.
    pub fn with_block_limit(self, blocks: usize) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.remaining_blocks = Some(blocks);
        }
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, DeviceState>, SweepError> {
        self.state
            .lock()
            .map_err(|_| SweepError::Actuator("simulated device state poisoned".into()))
    }
}

impl SampleSource for SimulatedDevice {
    fn next_block(&mut self) -> Result<Option<SampleBlock>, SweepError> {
        let mut state = self.lock()?;
        if let Some(remaining) = state.remaining_blocks.as_mut() {
            if *remaining == 0 {
                return Ok(None);
            }
            *remaining -= 1;
        }
        let ts = 1.0 / self.sample_rate_hz;
        let start = state.elapsed;
        let mut samples = Array2::zeros((self.block_rows, self.n_columns));
        for r in 0..self.block_rows {
            let t = (start + r) as f64 * ts;
            for c in 0..self.n_columns {
                samples[[r, c]] = state.level(c, t) + state.noise();
            }
        }
        state.elapsed += self.block_rows;
        Ok(Some(SampleBlock::new(self.sample_rate_hz, samples)))
    }
}

impl BiasActuator for SimulatedDevice {
    fn apply(&mut self, change: BiasChange, setpoint: &BiasSetpoint) -> Result<(), SweepError> {
        if !setpoint.vgs.is_finite() || !setpoint.vds.is_finite() {
            return Err(SweepError::Actuator(format!(
                "refusing non-finite bias Vgs={} Vds={}",
                setpoint.vgs, setpoint.vds
            )));
        }
        let gate_column = self.gate_column;
        let mut state = self.lock()?;
        let t = state.elapsed as f64 / self.sample_rate_hz;
        let now: Vec<f64> = (0..self.n_columns).map(|c| state.level(c, t)).collect();
        let targets: Vec<f64> = (0..self.n_columns)
            .map(|c| match gate_column {
                Some(g) if g == c => setpoint.vgs * state.model.gate_leakage_s,
                _ => state.model.drain_current(setpoint, c),
            })
            .collect();
        state.start_levels = now;
        state.targets = targets;
        state.elapsed = 0;
        debug!(
            "{:?}: Vgs={} Vds={} {}",
            change,
            setpoint.vgs,
            setpoint.vds,
            setpoint.digital_label.as_deref().unwrap_or("")
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BiasPoint;

    fn setpoint(vgs: f64, vds: f64) -> BiasSetpoint {
        BiasSetpoint {
            point: BiasPoint::default(),
            vgs,
            vds,
            digital_label: None,
        }
    }

    #[test]
    fn settles_towards_transfer_curve() {
        let model = DeviceModel { noise_a: 0.0, ..DeviceModel::default() };
        let mut device = SimulatedDevice::new(1000.0, 100, 2, 1).with_model(model.clone());
        let sp = setpoint(0.1, 0.05);
        device.apply(BiasChange::Initial, &sp).unwrap();
        let first = device.next_block().unwrap().unwrap();
        assert_eq!(first.samples.dim(), (100, 2));
        assert_eq!(first.samples[[0, 0]], 0.0);
        let mut last = first;
        for _ in 0..9 {
            last = device.next_block().unwrap().unwrap();
        }
        let target = model.drain_current(&sp, 1);
        assert!((last.samples[[99, 1]] - target).abs() < target * 1e-6);
    }

    #[test]
    fn gate_column_reports_leakage() {
        let model = DeviceModel { noise_a: 0.0, tau_s: 1e-4, ..DeviceModel::default() };
        let mut device = SimulatedDevice::new(1000.0, 50, 2, 1).with_model(model).with_gate(1);
        device.apply(BiasChange::Gate, &setpoint(-0.3, 0.1)).unwrap();
        let block = device.next_block().unwrap().unwrap();
        assert!((block.samples[[49, 1]] + 0.3e-9).abs() < 1e-15);
    }

    #[test]
    fn clones_share_one_device() {
        let mut source = SimulatedDevice::new(500.0, 10, 1, 3).with_block_limit(2);
        let mut actuator = source.clone();
        actuator.apply(BiasChange::Initial, &setpoint(0.0, 0.1)).unwrap();
        assert!(source.next_block().unwrap().is_some());
        assert!(source.next_block().unwrap().is_some());
        assert!(source.next_block().unwrap().is_none());
    }

    #[test]
    fn non_finite_bias_is_refused() {
        let mut device = SimulatedDevice::new(500.0, 10, 1, 3);
        let err = device.apply(BiasChange::Gate, &setpoint(f64::NAN, 0.1)).unwrap_err();
        assert!(matches!(err, SweepError::Actuator(_)));
    }
}
