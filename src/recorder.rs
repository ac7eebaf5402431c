use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use log::info;
use crate::config::SaveConfig;
use crate::drivers::SweepError;
use crate::record::ResultRecord;

/// Durable storage for finished sweep records.
pub trait RecordSink {
    fn save(&mut self, record: &ResultRecord, cycle: u32) -> Result<PathBuf, SweepError>;
}

/// Writes one JSON file per cycle: `{folder}/{wafer}-{device}-{name}-Cy{cycle}.json`.
pub struct JsonRecordStore {
    settings: SaveConfig,
}

impl JsonRecordStore {
    pub fn new(settings: SaveConfig) -> Self {
        Self { settings }
    }

    pub fn path_for(&self, cycle: u32) -> PathBuf {
        let s = &self.settings;
        s.folder
            .join(format!("{}-{}-{}-Cy{}.json", s.wafer, s.device, s.name, cycle))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<ResultRecord, SweepError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

impl RecordSink for JsonRecordStore {
    fn save(&mut self, record: &ResultRecord, cycle: u32) -> Result<PathBuf, SweepError> {
        fs::create_dir_all(&self.settings.folder)?;
        let path = self.path_for(cycle);
        let mut w = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(&mut w, record)?;
        w.flush()?;
        info!("record saved: {}", path.display());
        Ok(path)
    }
}

/// Keeps records in memory, for tests and dry runs.
#[derive(Default)]
pub struct MemorySink {
    pub records: Vec<(u32, ResultRecord)>,
}

impl RecordSink for MemorySink {
    fn save(&mut self, record: &ResultRecord, cycle: u32) -> Result<PathBuf, SweepError> {
        self.records.push((cycle, record.clone()));
        Ok(PathBuf::from(format!("memory://Cy{cycle}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelEntry, ChannelIndexMap};
    use crate::drivers::{PsdParams, Scaling};
    use crate::record::ResultStore;
    use ndarray::Array2;

    fn temp_folder(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("gfet_sweep_{tag}_{nanos}"))
    }

    #[test]
    fn file_name_follows_save_settings() {
        let store = JsonRecordStore::new(SaveConfig {
            folder: PathBuf::from("/data"),
            wafer: "B12".into(),
            device: "D3".into(),
            name: "noise".into(),
        });
        assert_eq!(store.path_for(2), PathBuf::from("/data/B12-D3-noise-Cy2.json"));
    }

    #[test]
    fn record_round_trips_through_disk() {
        let channels = ChannelIndexMap::new(
            vec![
                ChannelEntry { name: "Ch01".into(), column: 0 },
                ChannelEntry { name: "Ch02".into(), column: 1 },
            ],
            vec![],
            2,
        )
        .unwrap();
        let params = PsdParams {
            sample_rate_hz: 1000.0,
            n_fft_exp: 3,
            n_avg: 1,
            scaling: Scaling::Density,
        };
        let vgs = [0.0, -0.1];
        let mut store = ResultStore::new(&vgs, &[0.1], channels, true, Some(&params));
        for vg in 0..2 {
            store.save_dc(&[1.0 + vg as f64, 2.0], &[1e-3, 2e-3], vg, 0, 0).unwrap();
            store.save_gate_dc(1e-9, vg, 0, 0).unwrap();
            let psd = Array2::from_elem((params.n_bins(), 2), 1e-12);
            store.save_ac(psd.view(), &params.frequencies(), vg, 0, 0).unwrap();
        }
        assert!(store.is_complete());

        let folder = temp_folder("roundtrip");
        let mut sink = JsonRecordStore::new(SaveConfig {
            folder: folder.clone(),
            ..SaveConfig::default()
        });
        let path = sink.save(store.record(), 0).unwrap();
        assert!(path.ends_with("wafer-device-sweep-Cy0.json"));

        let back = JsonRecordStore::load(&path).unwrap();
        assert_eq!(back.channel_names(), vec!["Ch01", "Ch02"]);
        assert!(back.is_complete());
        assert_eq!(back.dc["Ch01"].ids.dim(), (2, 1));
        assert_eq!(back.dc["Ch01"].ids[[1, 0]], 2.0);
        let ac = back.ac.as_ref().unwrap();
        assert_eq!(ac["Ch02"].psd["Vd0"].dim(), (2, 5));
        assert_eq!(ac["Ch02"].fpsd, params.frequencies());
        fs::remove_dir_all(&folder).ok();
    }

    #[test]
    fn unwritten_cells_come_back_as_nan() {
        let channels = ChannelIndexMap::new(
            vec![ChannelEntry { name: "Ch01".into(), column: 0 }],
            vec![],
            1,
        )
        .unwrap();
        let store = ResultStore::new(&[0.0], &[0.1, 0.2], channels, false, None);
        let folder = temp_folder("partial");
        let mut sink = JsonRecordStore::new(SaveConfig {
            folder: folder.clone(),
            ..SaveConfig::default()
        });
        let path = sink.save(store.record(), 3).unwrap();
        let back = JsonRecordStore::load(&path).unwrap();
        assert!(back.dc["Ch01"].ids.iter().all(|v| v.is_nan()));
        assert!(back.gate.is_none());
        assert!(back.ac.is_none());
        fs::remove_dir_all(&folder).ok();
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = JsonRecordStore::load(temp_folder("missing").join("nope.json")).unwrap_err();
        assert!(matches!(err, SweepError::Io(_)));
    }
}
