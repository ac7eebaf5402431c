use std::collections::BTreeMap;
use std::time::SystemTime;
use log::debug;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use crate::channels::ChannelIndexMap;
use crate::drivers::{PsdParams, SweepError};
/// DC operating points of one channel, indexed `[vg, vd]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DcRecord {
    pub name: String,
    #[serde(with = "grid")]
    pub ids: Array2<f64>,
    #[serde(with = "grid")]
    pub dev: Array2<f64>,
    pub vgs: Vec<f64>,
    pub vds: Vec<f64>,
    pub created_at: SystemTime,
}
/// Gate leakage: `ig[key]` is indexed `[vg, vd]`, one grid per digital position
/// (see [`gate_key`]).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GateRecord {
    #[serde(with = "grid::map")]
    pub ig: BTreeMap<String, Array2<f64>>,
    pub vgs: Vec<f64>,
    pub vds: Vec<f64>,
    pub created_at: SystemTime,
}
/// Noise spectra of one channel: `psd["Vd{i}"]` is indexed `[vg, frequency bin]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcRecord {
    pub name: String,
    #[serde(with = "grid::map")]
    pub psd: BTreeMap<String, Array2<f64>>,
    pub fpsd: Vec<f64>,
    pub vgs: Vec<f64>,
    pub vds: Vec<f64>,
    pub created_at: SystemTime,
}
/// Everything one sweep pass produces.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultRecord {
    pub dc: BTreeMap<String, DcRecord>,
    #[serde(default)]
    pub gate: Option<GateRecord>,
    #[serde(default)]
    pub ac: Option<BTreeMap<String, AcRecord>>,
}
fn nan_free(grid: &Array2<f64>) -> bool {
    grid.iter().all(|v| !v.is_nan())
}
impl ResultRecord {
    pub fn channel_names(&self) -> Vec<&str> {
        self.dc.keys().map(String::as_str).collect()
    }
    /// True when every DC, gate and AC cell has been written.
    pub fn is_complete(&self) -> bool {
        let dc = self
            .dc
            .values()
            .all(|r| nan_free(&r.ids) && nan_free(&r.dev));
        let gate = self
            .gate
            .as_ref()
            .map_or(true, |g| g.ig.values().all(nan_free));
        let ac = self.ac.as_ref().map_or(true, |ac| {
            ac.values()
                .all(|r| r.psd.values().all(nan_free) && !r.fpsd.is_empty())
        });
        dc && gate && ac
    }
}
pub fn psd_key(vd_index: usize) -> String {
    format!("Vd{vd_index}")
}
/// Gate grid key: the digital label, or `Ig` when multiplexing is off.
pub fn gate_key(digital_label: Option<&str>) -> String {
    digital_label.unwrap_or("Ig").to_owned()
}
/// Owns the result record of one sweep run and writes cells into it.
pub struct ResultStore {
    vgs: Vec<f64>,
    vds: Vec<f64>,
    channels: ChannelIndexMap,
    n_bins: usize,
    record: ResultRecord,
}
impl ResultStore {
    pub fn new(
        vgs: &[f64],
        vds: &[f64],
        channels: ChannelIndexMap,
        gate: bool,
        psd: Option<&PsdParams>,
    ) -> Self {
        let now = SystemTime::now();
        let names = channels.sorted_names();
        let (dc, gate) =
            Self::init_dc_record(vgs, vds, &names, channels.digital_labels(), gate, now);
        let ac = psd.map(|p| Self::init_ac_record(vgs, vds, &p.frequencies(), &names, now));
        Self {
            vgs: vgs.to_vec(),
            vds: vds.to_vec(),
            n_bins: psd.map_or(0, PsdParams::n_bins),
            channels,
            record: ResultRecord { dc, gate, ac },
        }
    }
    pub fn init_dc_record(
        vgs: &[f64],
        vds: &[f64],
        names: &[String],
        digital_labels: &[String],
        gate: bool,
        created_at: SystemTime,
    ) -> (BTreeMap<String, DcRecord>, Option<GateRecord>) {
        let shape = (vgs.len(), vds.len());
        let dc = names
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    DcRecord {
                        name: name.clone(),
                        ids: Array2::from_elem(shape, f64::NAN),
                        dev: Array2::from_elem(shape, f64::NAN),
                        vgs: vgs.to_vec(),
                        vds: vds.to_vec(),
                        created_at,
                    },
                )
            })
            .collect();
        let keys: Vec<String> = if digital_labels.is_empty() {
            vec![gate_key(None)]
        } else {
            digital_labels.iter().map(|l| gate_key(Some(l))).collect()
        };
        let gate = gate.then(|| GateRecord {
            ig: keys
                .into_iter()
                .map(|k| (k, Array2::from_elem(shape, f64::NAN)))
                .collect(),
            vgs: vgs.to_vec(),
            vds: vds.to_vec(),
            created_at,
        });
        (dc, gate)
    }
    pub fn init_ac_record(
        vgs: &[f64],
        vds: &[f64],
        fpsd: &[f64],
        names: &[String],
        created_at: SystemTime,
    ) -> BTreeMap<String, AcRecord> {
        names
            .iter()
            .map(|name| {
                let psd = (0..vds.len())
                    .map(|i| (psd_key(i), Array2::from_elem((vgs.len(), fpsd.len()), f64::NAN)))
                    .collect();
                (
                    name.clone(),
                    AcRecord {
                        name: name.clone(),
                        psd,
                        fpsd: fpsd.to_vec(),
                        vgs: vgs.to_vec(),
                        vds: vds.to_vec(),
                        created_at,
                    },
                )
            })
            .collect()
    }
    pub fn record(&self) -> &ResultRecord {
        &self.record
    }
    pub fn channels(&self) -> &ChannelIndexMap {
        &self.channels
    }
    pub fn is_complete(&self) -> bool {
        self.record.is_complete()
    }
    fn check_point(&self, vg: usize, vd: usize) -> Result<(), SweepError> {
        if vg >= self.vgs.len() || vd >= self.vds.len() {
            return Err(SweepError::IndexOutOfRange(format!(
                "({vg}, {vd}) outside {}x{}",
                self.vgs.len(),
                self.vds.len()
            )));
        }
        Ok(())
    }
    /// Writes the `(vg, vd)` cell of every channel acquired at `digital_index`.
    /// `ids`/`dev` are indexed by block column.
    pub fn save_dc(
        &mut self,
        ids: &[f64],
        dev: &[f64],
        vg: usize,
        vd: usize,
        digital_index: usize,
    ) -> Result<usize, SweepError> {
        self.check_point(vg, vd)?;
        let active = self.channels.active(digital_index);
        if let Some((name, column)) = active
            .iter()
            .find(|(_, c)| *c >= ids.len() || *c >= dev.len())
        {
            debug!("no dc value for {name} at column {column}");
            return Err(SweepError::ChannelMismatch {
                expected: column + 1,
                actual: ids.len().min(dev.len()),
            });
        }
        for (name, column) in &active {
            if let Some(rec) = self.record.dc.get_mut(*name) {
                rec.ids[[vg, vd]] = ids[*column];
                rec.dev[[vg, vd]] = dev[*column];
            }
        }
        Ok(active.len())
    }
    /// Writes one PSD row (all bins) at `psd["Vd{vd}"][vg, :]` for every acquired channel.
    /// `psd` is `bins x block columns`; nothing is written unless every row fits.
    pub fn save_ac(
        &mut self,
        psd: ArrayView2<'_, f64>,
        freqs: &[f64],
        vg: usize,
        vd: usize,
        digital_index: usize,
    ) -> Result<usize, SweepError> {
        self.check_point(vg, vd)?;
        let n_bins = self.n_bins;
        let ac = self
            .record
            .ac
            .as_mut()
            .ok_or_else(|| SweepError::InvalidConfig("AC characterization is disabled".into()))?;
        let active = self.channels.active(digital_index);
        let max_column = active.iter().map(|(_, c)| *c).max().unwrap_or(0);
        if psd.nrows() != n_bins || freqs.len() != n_bins || max_column >= psd.ncols() {
            return Err(SweepError::SpectrumShape {
                required: n_bins,
                rows: psd.nrows(),
                channels: psd.ncols(),
            });
        }
        let key = psd_key(vd);
        for (name, column) in &active {
            if let Some(rec) = ac.get_mut(*name) {
                if let Some(grid) = rec.psd.get_mut(&key) {
                    grid.row_mut(vg).assign(&psd.column(*column));
                }
                rec.fpsd = freqs.to_vec();
            }
        }
        Ok(active.len())
    }
    /// Writes the gate current of `(vg, vd)` into the grid of `digital_index`.
    pub fn save_gate_dc(
        &mut self,
        ig: f64,
        vg: usize,
        vd: usize,
        digital_index: usize,
    ) -> Result<(), SweepError> {
        self.check_point(vg, vd)?;
        if digital_index >= self.channels.digital_len() {
            return Err(SweepError::IndexOutOfRange(format!(
                "digital index {digital_index} outside {} positions",
                self.channels.digital_len()
            )));
        }
        let key = gate_key(self.channels.digital_label(digital_index));
        let gate = self
            .record
            .gate
            .as_mut()
            .ok_or_else(|| SweepError::InvalidConfig("gate monitoring is disabled".into()))?;
        let grid = gate
            .ig
            .get_mut(&key)
            .ok_or_else(|| SweepError::IndexOutOfRange(format!("no gate grid {key}")))?;
        grid[[vg, vd]] = ig;
        Ok(())
    }
}
/// NaN-preserving serde for `Array2<f64>`: NaN cells are written as `null`.
mod grid {
    use std::collections::BTreeMap;
    use ndarray::Array2;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    #[derive(Serialize, Deserialize)]
    struct GridRepr {
        shape: [usize; 2],
        data: Vec<Option<f64>>,
    }
    impl GridRepr {
        fn from_array(grid: &Array2<f64>) -> Self {
            Self {
                shape: [grid.nrows(), grid.ncols()],
                data: grid
                    .iter()
                    .map(|v| if v.is_nan() { None } else { Some(*v) })
                    .collect(),
            }
        }
        fn into_array(self) -> Result<Array2<f64>, String> {
            let [rows, cols] = self.shape;
            let data = self.data.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
            Array2::from_shape_vec((rows, cols), data).map_err(|e| e.to_string())
        }
    }
    pub fn serialize<S: Serializer>(grid: &Array2<f64>, s: S) -> Result<S::Ok, S::Error> {
        GridRepr::from_array(grid).serialize(s)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Array2<f64>, D::Error> {
        GridRepr::deserialize(d)?.into_array().map_err(D::Error::custom)
    }
    pub mod map {
        use super::*;
        pub fn serialize<S: Serializer>(
            grids: &BTreeMap<String, Array2<f64>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            grids
                .iter()
                .map(|(k, v)| (k.as_str(), GridRepr::from_array(v)))
                .collect::<BTreeMap<_, _>>()
                .serialize(s)
        }
        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<BTreeMap<String, Array2<f64>>, D::Error> {
            BTreeMap::<String, GridRepr>::deserialize(d)?
                .into_iter()
                .map(|(k, g)| g.into_array().map(|a| (k, a)))
                .collect::<Result<_, _>>()
                .map_err(D::Error::custom)
        }
    }
}
