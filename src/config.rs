use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::channels::{ChannelEntry, ChannelIndexMap};
use crate::drivers::{same_rate, PsdParams, StabilityCriteria, SweepError};

/// Bias values of one axis, either listed or spaced linearly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisSpec {
    Values { values: Vec<f64> },
    Linspace { start: f64, stop: f64, points: usize },
}

impl AxisSpec {
    pub fn values(&self) -> Vec<f64> {
        match self {
            AxisSpec::Values { values } => values.clone(),
            AxisSpec::Linspace { start, stop, points } => match points {
                0 => Vec::new(),
                1 => vec![*start],
                n => {
                    let step = (stop - start) / (*n - 1) as f64;
                    (0..*n).map(|i| start + step * i as f64).collect()
                }
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StabilityConfig {
    /// Slope bound in signal units per second.
    pub max_slope: f64,
    /// Unstable evaluations tolerated before a capture is forced.
    pub timeout_cycles: u32,
    /// Length of the DC settling window.
    pub buffer_seconds: f64,
    #[serde(default)]
    pub criteria: StabilityCriteria,
    /// Acquired time discarded after every bias change.
    #[serde(default)]
    pub settle_delay_s: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    pub column: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_cycles")]
    pub cycles: u32,
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_cycles() -> u32 {
    1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            cycles: default_cycles(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// File naming handed to the persistence side: `{folder}/{wafer}-{device}-{name}-Cy{cycle}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveConfig {
    pub folder: PathBuf,
    pub wafer: String,
    pub device: String,
    pub name: String,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("."),
            wafer: "wafer".into(),
            device: "device".into(),
            name: "sweep".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub vg_sweep: AxisSpec,
    pub vd_sweep: AxisSpec,
    pub stability: StabilityConfig,
    pub dc_sample_rate_hz: f64,
    /// Columns carried by every sample block.
    pub n_columns: usize,
    pub channels: Vec<ChannelEntry>,
    #[serde(default)]
    pub digital_columns: Vec<String>,
    /// Present when AC (noise) characterization is enabled.
    #[serde(default)]
    pub psd: Option<PsdParams>,
    /// Present when gate leakage is monitored.
    #[serde(default)]
    pub gate: Option<GateConfig>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub save: SaveConfig,
}

impl SweepConfig {
    pub fn from_json_str(text: &str) -> Result<Self, SweepError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, SweepError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn ac_enabled(&self) -> bool {
        self.psd.is_some()
    }

    pub fn channel_map(&self) -> Result<ChannelIndexMap, SweepError> {
        ChannelIndexMap::new(
            self.channels.clone(),
            self.digital_columns.clone(),
            self.n_columns,
        )
    }

    /// DC window length in samples.
    pub fn dc_buffer_len(&self) -> usize {
        (self.stability.buffer_seconds * self.dc_sample_rate_hz).floor().max(0.0) as usize
    }

    /// Checks everything the controller relies on; a sweep never starts on a bad config.
    pub fn validate(&self) -> Result<ChannelIndexMap, SweepError> {
        let vgs = self.vg_sweep.values();
        let vds = self.vd_sweep.values();
        if vgs.is_empty() {
            return Err(SweepError::EmptyAxis("Vg"));
        }
        if vds.is_empty() {
            return Err(SweepError::EmptyAxis("Vd"));
        }
        if vgs.iter().chain(&vds).any(|v| !v.is_finite()) {
            return Err(SweepError::InvalidConfig("bias values must be finite".into()));
        }
        if !(self.dc_sample_rate_hz > 0.0) {
            return Err(SweepError::InvalidSampleRate);
        }
        if self.n_columns == 0 {
            return Err(SweepError::InvalidConfig("blocks must carry at least one column".into()));
        }
        let s = &self.stability;
        if !(s.max_slope > 0.0) {
            return Err(SweepError::InvalidConfig(format!(
                "maximum slope must be positive, got {}",
                s.max_slope
            )));
        }
        if s.timeout_cycles == 0 {
            return Err(SweepError::InvalidConfig(
                "stabilization timeout must be at least one cycle".into(),
            ));
        }
        if self.dc_buffer_len() < 2 {
            return Err(SweepError::InvalidConfig(format!(
                "a {} s window at {} Hz holds fewer than two samples",
                s.buffer_seconds, self.dc_sample_rate_hz
            )));
        }
        if !(s.settle_delay_s >= 0.0) {
            return Err(SweepError::InvalidConfig("settle delay must not be negative".into()));
        }
        if let Some(psd) = &self.psd {
            psd.validate()?;
            // DC and PSD buffers are fed from the same stream
            if !same_rate(psd.sample_rate_hz, self.dc_sample_rate_hz) {
                return Err(SweepError::SampleRateMismatch {
                    expected: self.dc_sample_rate_hz,
                    actual: psd.sample_rate_hz,
                });
            }
        }
        if self.engine.cycles == 0 {
            return Err(SweepError::InvalidConfig("at least one cycle is required".into()));
        }
        let channels = self.channel_map()?;
        if let Some(gate) = &self.gate {
            if gate.column >= self.n_columns {
                return Err(SweepError::ChannelMapping(format!(
                    "gate column {} outside {} block columns",
                    gate.column, self.n_columns
                )));
            }
            if channels.reserved_columns().contains(&gate.column) {
                return Err(SweepError::ChannelMapping(format!(
                    "gate column {} also carries channel data",
                    gate.column
                )));
            }
        }
        Ok(channels)
    }

    /// Small two-channel sweep used by the demo binary.
    pub fn demo() -> Self {
        Self {
            vg_sweep: AxisSpec::Linspace { start: 0.0, stop: -0.4, points: 5 },
            vd_sweep: AxisSpec::Values { values: vec![0.05, 0.1] },
            stability: StabilityConfig {
                max_slope: 1e-7,
                timeout_cycles: 10,
                buffer_seconds: 0.5,
                criteria: StabilityCriteria::AllChannels,
                settle_delay_s: 0.1,
            },
            dc_sample_rate_hz: 1000.0,
            n_columns: 3,
            channels: vec![
                ChannelEntry { name: "Ch01".into(), column: 0 },
                ChannelEntry { name: "Ch02".into(), column: 1 },
            ],
            digital_columns: Vec::new(),
            psd: Some(PsdParams {
                sample_rate_hz: 1000.0,
                n_fft_exp: 8,
                n_avg: 4,
                scaling: Default::default(),
            }),
            gate: Some(GateConfig { column: 2 }),
            engine: EngineConfig::default(),
            save: SaveConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linspace_matches_endpoints() {
        let axis = AxisSpec::Linspace { start: 0.0, stop: -0.3, points: 4 };
        let values = axis.values();
        assert_eq!(values.len(), 4);
        assert!((values[3] + 0.3).abs() < 1e-12);
        assert!((values[1] + 0.1).abs() < 1e-12);
        assert_eq!(AxisSpec::Linspace { start: 0.2, stop: 1.0, points: 1 }.values(), vec![0.2]);
    }

    #[test]
    fn parses_json_with_defaults() {
        let text = r#"{
            "vg_sweep": {"start": 0.0, "stop": -0.4, "points": 3},
            "vd_sweep": {"values": [0.1]},
            "stability": {"max_slope": 1e-10, "timeout_cycles": 5, "buffer_seconds": 1.0,
                          "criteria": "One Channel"},
            "dc_sample_rate_hz": 1000.0,
            "n_columns": 2,
            "channels": [{"name": "Ch04Col1", "column": 0}, {"name": "Ch05Col1", "column": 1}],
            "digital_columns": ["Col1"],
            "psd": {"sample_rate_hz": 1000.0, "n_fft_exp": 8, "n_avg": 50, "scaling": "spectrum"}
        }"#;
        let config = SweepConfig::from_json_str(text).unwrap();
        assert_eq!(config.stability.criteria, StabilityCriteria::OneChannel);
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.stability.settle_delay_s, 0.0);
        assert!(config.ac_enabled());
        assert!(config.gate.is_none());
        let channels = config.validate().unwrap();
        assert!(channels.is_multiplexed());
    }

    #[test]
    fn shipped_example_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/sweep.example.json");
        let config = SweepConfig::from_json_file(path).unwrap();
        let channels = config.validate().unwrap();
        assert_eq!(channels.digital_len(), 2);
        assert_eq!(config.vg_sweep.values().len(), 11);
        assert_eq!(config.save.wafer, "B12");
    }

    #[test]
    fn demo_config_is_valid() {
        assert!(SweepConfig::demo().validate().is_ok());
    }

    #[test]
    fn construction_errors() {
        let mut config = SweepConfig::demo();
        config.vg_sweep = AxisSpec::Values { values: vec![] };
        assert!(matches!(config.validate(), Err(SweepError::EmptyAxis("Vg"))));

        let mut config = SweepConfig::demo();
        config.vd_sweep = AxisSpec::Linspace { start: 0.0, stop: 1.0, points: 0 };
        assert!(matches!(config.validate(), Err(SweepError::EmptyAxis("Vd"))));

        let mut config = SweepConfig::demo();
        config.gate = Some(GateConfig { column: 1 });
        assert!(matches!(config.validate(), Err(SweepError::ChannelMapping(_))));

        let mut config = SweepConfig::demo();
        config.stability.timeout_cycles = 0;
        assert!(config.validate().is_err());

        let mut config = SweepConfig::demo();
        config.stability.buffer_seconds = 0.001;
        assert!(config.validate().is_err());

        let mut config = SweepConfig::demo();
        config.digital_columns = vec!["Col1".into()];
        assert!(matches!(config.validate(), Err(SweepError::ChannelMapping(_))));
    }

    #[test]
    fn psd_rate_must_match_the_dc_stream() {
        let mut config = SweepConfig::demo();
        if let Some(psd) = config.psd.as_mut() {
            psd.sample_rate_hz = 5000.0;
        }
        assert!(matches!(
            config.validate(),
            Err(SweepError::SampleRateMismatch { expected, actual }) if expected == 1000.0 && actual == 5000.0
        ));
    }
}
