// src/controller.rs
use std::collections::VecDeque;
use log::{debug, error, info, warn};
use crate::config::SweepConfig;
use crate::drivers::{
    PsdParams, RingBuffer, SampleBlock, SlopeEstimator, SlopeReport, SpectralEstimator, Spectrum,
    SweepError,
};
use crate::record::{ResultRecord, ResultStore};
use crate::types::{BiasPoint, BiasSetpoint, SweepEvent, SweepState};

/// Bias-sweep state machine.
///
/// Blocks go in through [`add_data`](Self::add_data), decisions come out of
/// [`poll`](Self::poll). Vg advances fastest, then Vd, then the digital column.
/// A block that arrives while a filled buffer still waits for `poll` is queued.
/// Queued blocks are replayed in arrival order while the bias stays put, and
/// dropped as soon as the bias point changes.
pub struct SweepController {
    vgs: Vec<f64>,
    vds: Vec<f64>,
    n_columns: usize,
    gate_column: Option<usize>,
    psd_params: Option<PsdParams>,
    dc_buffer: RingBuffer,
    slope: SlopeEstimator,
    spectral: Option<SpectralEstimator>,
    store: ResultStore,
    state: SweepState,
    point: BiasPoint,
    cycle: u32,
    planned_cycles: u32,
    settle_samples: usize,
    settle_remaining: usize,
    pending: VecDeque<SampleBlock>,
}

impl SweepController {
    pub fn new(config: &SweepConfig) -> Result<Self, SweepError> {
        let channels = config.validate()?;
        let vgs = config.vg_sweep.values();
        let vds = config.vd_sweep.values();
        let stability = &config.stability;
        let dc_buffer = RingBuffer::new(
            config.dc_sample_rate_hz,
            config.n_columns,
            config.dc_buffer_len(),
        )?;
        let slope = SlopeEstimator::new(
            stability.max_slope,
            stability.criteria,
            stability.timeout_cycles,
        )?;
        let spectral = config
            .psd
            .as_ref()
            .map(|p| SpectralEstimator::new(p.clone(), config.n_columns))
            .transpose()?;
        let gate_column = config.gate.as_ref().map(|g| g.column);
        let store = ResultStore::new(
            &vgs,
            &vds,
            channels,
            gate_column.is_some(),
            config.psd.as_ref(),
        );
        let settle_samples = (stability.settle_delay_s * config.dc_sample_rate_hz).round() as usize;
        info!(
            "sweep ready: {} Vg x {} Vd x {} digital, {} channels, AC {}",
            vgs.len(),
            vds.len(),
            store.channels().digital_len(),
            store.channels().entries().len(),
            spectral
                .as_ref()
                .map_or_else(|| "off".to_owned(), |s| format!("{} bins", s.n_bins()))
        );
        Ok(Self {
            vgs,
            vds,
            n_columns: config.n_columns,
            gate_column,
            psd_params: config.psd.clone(),
            dc_buffer,
            slope,
            spectral,
            store,
            state: SweepState::WaitStab,
            point: BiasPoint::default(),
            cycle: 0,
            planned_cycles: config.engine.cycles,
            settle_samples,
            settle_remaining: settle_samples,
            pending: VecDeque::new(),
        })
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    pub fn bias_point(&self) -> BiasPoint {
        self.point
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// Number of passes the sweep is configured to run.
    pub fn planned_cycles(&self) -> u32 {
        self.planned_cycles
    }

    pub fn record(&self) -> &ResultRecord {
        self.store.record()
    }

    pub fn dc_buffer(&self) -> &RingBuffer {
        &self.dc_buffer
    }

    pub fn psd_buffer(&self) -> Option<&RingBuffer> {
        self.spectral.as_ref().map(SpectralEstimator::buffer)
    }

    /// Blocks waiting for a filled buffer to be consumed.
    pub fn pending_blocks(&self) -> usize {
        self.pending.len()
    }

    /// Bias values of the current point.
    pub fn setpoint(&self) -> BiasSetpoint {
        BiasSetpoint {
            point: self.point,
            vgs: self.vgs[self.point.vg_index],
            vds: self.vds[self.point.vd_index],
            digital_label: self
                .store
                .channels()
                .digital_label(self.point.digital_index)
                .map(String::from),
        }
    }

    pub fn add_data(&mut self, block: SampleBlock) -> Result<(), SweepError> {
        block.validate()?;
        block.check_rate(self.dc_buffer.sample_rate_hz())?;
        if block.num_channels() != self.n_columns {
            return Err(SweepError::ChannelMismatch {
                expected: self.n_columns,
                actual: block.num_channels(),
            });
        }
        if self.state.is_terminal() {
            debug!("{:?}: ignoring {} samples", self.state, block.num_samples());
            return Ok(());
        }
        if !self.pending.is_empty() || self.awaiting_poll() {
            debug!("buffer full, queueing {} samples", block.num_samples());
            self.pending.push_back(block);
            return Ok(());
        }
        self.route(block);
        Ok(())
    }

    /// Processes filled buffers and queued blocks until no more progress can be made.
    /// Events come out in the order they happened.
    pub fn poll(&mut self) -> Vec<SweepEvent> {
        let mut events = Vec::new();
        loop {
            if self.process_filled(&mut events) {
                continue;
            }
            if self.state.is_terminal() {
                self.pending.clear();
                break;
            }
            match self.pending.pop_front() {
                Some(block) => self.route(block),
                None => break,
            }
        }
        events
    }

    /// Moves to the next bias point, or to `End` after the last one.
    pub fn next_bias_point(&mut self) -> Result<SweepEvent, SweepError> {
        if self.state.is_terminal() {
            return Err(SweepError::SweepFinished);
        }
        self.slope.reset_timeout();
        self.dc_buffer.reset();
        if let Some(spectral) = &mut self.spectral {
            spectral.reset();
        }
        // acquired under the old bias
        if !self.pending.is_empty() {
            let blocks = self.pending.len();
            let samples: usize = self.pending.drain(..).map(|b| b.num_samples()).sum();
            info!("discarding {blocks} queued blocks ({samples} samples) from before the bias change");
        }
        let digital_len = self.store.channels().digital_len();
        let p = &mut self.point;
        let advanced: Option<fn(BiasSetpoint) -> SweepEvent> = if p.vg_index + 1 < self.vgs.len() {
            p.vg_index += 1;
            Some(SweepEvent::NextVg)
        } else if p.vd_index + 1 < self.vds.len() {
            p.vg_index = 0;
            p.vd_index += 1;
            Some(SweepEvent::NextVd)
        } else if p.digital_index + 1 < digital_len {
            p.vg_index = 0;
            p.vd_index = 0;
            p.digital_index += 1;
            Some(SweepEvent::NextDigital)
        } else {
            None
        };
        match advanced {
            Some(event) => {
                self.state = SweepState::WaitStab;
                self.settle_remaining = self.settle_samples;
                let setpoint = self.setpoint();
                info!(
                    "next bias ({}, {}, {}): Vgs={} Vds={} {}",
                    setpoint.point.vg_index,
                    setpoint.point.vd_index,
                    setpoint.point.digital_index,
                    setpoint.vgs,
                    setpoint.vds,
                    setpoint.digital_label.as_deref().unwrap_or("")
                );
                Ok(event(setpoint))
            }
            None => {
                self.state = SweepState::End;
                info!("sweep cycle {} complete", self.cycle);
                Ok(SweepEvent::Completed {
                    cycle: self.cycle,
                    record: Box::new(self.store.record().clone()),
                })
            }
        }
    }

    /// Aborts the pass. A PSD capture in flight is dropped without touching the record.
    pub fn stop(&mut self) {
        if self.state == SweepState::Stopped {
            return;
        }
        info!("sweep stopped in {:?} at {:?}", self.state, self.point);
        self.state = SweepState::Stopped;
        self.dc_buffer.reset();
        if let Some(spectral) = &mut self.spectral {
            spectral.reset();
        }
        self.pending.clear();
    }

    /// Starts the next cycle on a fresh record and returns its first setpoint.
    pub fn restart(&mut self) -> BiasSetpoint {
        self.cycle += 1;
        self.store = ResultStore::new(
            &self.vgs,
            &self.vds,
            self.store.channels().clone(),
            self.gate_column.is_some(),
            self.psd_params.as_ref(),
        );
        self.point = BiasPoint::default();
        self.state = SweepState::WaitStab;
        self.settle_remaining = self.settle_samples;
        self.slope.reset_timeout();
        self.dc_buffer.reset();
        if let Some(spectral) = &mut self.spectral {
            spectral.reset();
        }
        self.pending.clear();
        info!("starting cycle {}", self.cycle);
        self.setpoint()
    }

    fn awaiting_poll(&self) -> bool {
        match self.state {
            SweepState::WaitStab => self.dc_buffer.is_filled(),
            SweepState::WaitPsd => self
                .spectral
                .as_ref()
                .map_or(false, |s| s.buffer().is_filled()),
            SweepState::End | SweepState::Stopped => false,
        }
    }

    fn route(&mut self, block: SampleBlock) {
        let result = match self.state {
            SweepState::WaitStab => {
                let skip = self.settle_remaining.min(block.num_samples());
                self.settle_remaining -= skip;
                if skip > 0 {
                    debug!("settling: discarded {} samples, {} to go", skip, self.settle_remaining);
                }
                self.dc_buffer
                    .add_data(block.samples.slice(ndarray::s![skip.., ..]))
            }
            SweepState::WaitPsd => match &mut self.spectral {
                Some(spectral) => spectral.add_data(block.samples.view()),
                None => Ok(()),
            },
            SweepState::End | SweepState::Stopped => Ok(()),
        };
        if let Err(e) = result {
            error!("dropping block: {e}");
        }
    }

    fn process_filled(&mut self, events: &mut Vec<SweepEvent>) -> bool {
        match self.state {
            SweepState::WaitStab if self.dc_buffer.is_filled() => {
                self.evaluate_dc(events);
                true
            }
            SweepState::WaitPsd => {
                let polled = self.spectral.as_mut().and_then(SpectralEstimator::poll);
                match polled {
                    Some(result) => {
                        self.finish_psd(result, events);
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }

    fn evaluate_dc(&mut self, events: &mut Vec<SweepEvent>) {
        let point = self.point;
        let columns = self.store.channels().active_columns(point.digital_index);
        let report = self.slope.evaluate(&self.dc_buffer, &columns);
        self.dc_buffer.reset();
        if report.stable {
            self.store_dc(&report, events);
        }
    }

    /// Writes a settled window and moves on to the PSD capture or the next point.
    fn store_dc(&mut self, report: &SlopeReport, events: &mut Vec<SweepEvent>) {
        let point = self.point;
        let BiasPoint { vg_index: vg, vd_index: vd, digital_index: d } = point;
        match self.store.save_dc(&report.intercepts, &report.slopes, vg, vd, d) {
            Ok(_) => {
                info!(
                    "DC saved at ({vg}, {vd}, {d}){}",
                    if report.forced { " after timeout" } else { "" }
                );
                events.push(SweepEvent::DcSaved { point, forced: report.forced });
            }
            Err(e) => {
                warn!("DC save failed at {point:?}, cells left empty: {e}");
                events.push(SweepEvent::DcFailed { point, reason: e.to_string() });
            }
        }
        if let Some(column) = self.gate_column {
            if let Some(ig) = report.intercepts.get(column) {
                if let Err(e) = self.store.save_gate_dc(*ig, vg, vd, d) {
                    error!("gate save failed at {point:?}: {e}");
                }
            }
        }
        if let Some(spectral) = &mut self.spectral {
            spectral.reset();
            self.state = SweepState::WaitPsd;
            events.push(SweepEvent::PsdStarted { point });
        } else {
            self.advance(events);
        }
    }

    fn finish_psd(&mut self, result: Result<Spectrum, SweepError>, events: &mut Vec<SweepEvent>) {
        let point = self.point;
        let saved = result.and_then(|spectrum| {
            self.store.save_ac(
                spectrum.psd.view(),
                &spectrum.freqs,
                point.vg_index,
                point.vd_index,
                point.digital_index,
            )
        });
        match saved {
            Ok(_) => {
                info!("PSD saved at {point:?}");
                events.push(SweepEvent::PsdSaved { point });
            }
            Err(e) => {
                warn!("PSD failed at {point:?}, row left empty: {e}");
                events.push(SweepEvent::PsdFailed { point, reason: e.to_string() });
            }
        }
        self.advance(events);
    }

    fn advance(&mut self, events: &mut Vec<SweepEvent>) {
        match self.next_bias_point() {
            Ok(event) => events.push(event),
            Err(e) => debug!("not advancing: {e}"),
        }
    }
}
