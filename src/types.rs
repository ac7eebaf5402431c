// src/types.rs
use serde::{Deserialize, Serialize};
use crate::drivers::SampleBlock;
use crate::record::ResultRecord;

/// Current sweep coordinate. Vg advances fastest, then Vd, then the digital column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BiasPoint {
    pub vg_index: usize,
    pub vd_index: usize,
    pub digital_index: usize,
}

impl BiasPoint {
    pub fn new(vg_index: usize, vd_index: usize, digital_index: usize) -> Self {
        Self { vg_index, vd_index, digital_index }
    }
}

/// Which axis moved when a new bias was requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BiasChange {
    /// First point of a sweep (or of a new cycle).
    Initial,
    Gate,
    Drain,
    Digital,
}

/// Bias values the actuator should apply for a point.
#[derive(Clone, Debug, PartialEq)]
pub struct BiasSetpoint {
    pub point: BiasPoint,
    pub vgs: f64,
    pub vds: f64,
    pub digital_label: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepState {
    /// Waiting for the DC signal to settle.
    WaitStab,
    /// Collecting samples for the noise spectrum.
    WaitPsd,
    /// All axes exhausted.
    End,
    /// Aborted through `stop()`.
    Stopped,
}

impl SweepState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SweepState::End | SweepState::Stopped)
    }
}

/// What one `poll` produced, in the order it happened.
#[derive(Clone, Debug)]
pub enum SweepEvent {
    DcSaved { point: BiasPoint, forced: bool },
    /// Settled, but the DC cells could not be written and stay NaN.
    DcFailed { point: BiasPoint, reason: String },
    PsdStarted { point: BiasPoint },
    PsdSaved { point: BiasPoint },
    /// The AC row of this point stays NaN.
    PsdFailed { point: BiasPoint, reason: String },
    NextVg(BiasSetpoint),
    NextVd(BiasSetpoint),
    NextDigital(BiasSetpoint),
    Completed { cycle: u32, record: Box<ResultRecord> },
}

impl SweepEvent {
    /// Bias request carried by this event, if any.
    pub fn bias_request(&self) -> Option<(BiasChange, &BiasSetpoint)> {
        match self {
            SweepEvent::NextVg(s) => Some((BiasChange::Gate, s)),
            SweepEvent::NextVd(s) => Some((BiasChange::Drain, s)),
            SweepEvent::NextDigital(s) => Some((BiasChange::Digital, s)),
            _ => None,
        }
    }
}

// producer -> engine
#[derive(Debug)]
pub enum EngineCommand {
    AddData(SampleBlock),
    Stop,
}

// engine -> caller
#[derive(Debug)]
pub enum EngineMessage {
    Log(String),
    Event(SweepEvent),
    Saved { cycle: u32, path: std::path::PathBuf },
    Error(String),
    Finished,
}
