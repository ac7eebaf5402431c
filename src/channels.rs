use serde::{Deserialize, Serialize};
use crate::drivers::SweepError;
/// One acquisition channel and the block column it is read from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub name: String,
    pub column: usize,
}
/// A channel takes part in a digital column when its name ends with the column label
/// (`"Ch04Col1"` belongs to `"Col1"`).
///
/// Suffix matching is kept exactly; names such as `"Ch04Col11"` would also match
/// `"Col1"`, so labels must not be suffixes of one another.
pub fn matches_digital(channel_name: &str, digital_label: &str) -> bool {
    channel_name.ends_with(digital_label)
}
/// Channel name -> column mapping, fixed for the duration of a sweep.
///
/// Without digital columns every channel is read from its own column. With digital
/// columns only the channels matching the active label are acquired, and they occupy
/// the block columns in the order they were configured (`j = 0, 1, ...`).
#[derive(Clone, Debug)]
pub struct ChannelIndexMap {
    entries: Vec<ChannelEntry>,
    digital_labels: Vec<String>,
    n_columns: usize,
}
impl ChannelIndexMap {
    pub fn new(
        entries: Vec<ChannelEntry>,
        mut digital_labels: Vec<String>,
        n_columns: usize,
    ) -> Result<Self, SweepError> {
        if entries.is_empty() {
            return Err(SweepError::ChannelMapping("no channels configured".into()));
        }
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|e| e.name == entry.name) {
                return Err(SweepError::ChannelMapping(format!(
                    "channel {} listed twice",
                    entry.name
                )));
            }
        }
        digital_labels.sort();
        digital_labels.dedup();
        let map = Self {
            entries,
            digital_labels,
            n_columns,
        };
        if map.is_multiplexed() {
            for label in &map.digital_labels {
                let count = map.count_for(label);
                if count == 0 {
                    return Err(SweepError::ChannelMapping(format!(
                        "digital column {label} matches no channel"
                    )));
                }
                if count > n_columns {
                    return Err(SweepError::ChannelMapping(format!(
                        "digital column {label} selects {count} channels but blocks carry {n_columns} columns"
                    )));
                }
            }
            if let Some(orphan) = map
                .entries
                .iter()
                .find(|e| !map.digital_labels.iter().any(|l| matches_digital(&e.name, l)))
            {
                return Err(SweepError::ChannelMapping(format!(
                    "channel {} matches no digital column",
                    orphan.name
                )));
            }
        } else if let Some(bad) = map.entries.iter().find(|e| e.column >= n_columns) {
            return Err(SweepError::ChannelMapping(format!(
                "channel {} uses column {} but blocks carry {} columns",
                bad.name, bad.column, n_columns
            )));
        }
        Ok(map)
    }
    fn count_for(&self, label: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| matches_digital(&e.name, label))
            .count()
    }
    pub fn is_multiplexed(&self) -> bool {
        !self.digital_labels.is_empty()
    }
    pub fn n_columns(&self) -> usize {
        self.n_columns
    }
    pub fn entries(&self) -> &[ChannelEntry] {
        &self.entries
    }
    /// Sorted digital labels; empty when multiplexing is off.
    pub fn digital_labels(&self) -> &[String] {
        &self.digital_labels
    }
    /// Number of positions on the digital axis (1 when multiplexing is off).
    pub fn digital_len(&self) -> usize {
        self.digital_labels.len().max(1)
    }
    pub fn digital_label(&self, digital_index: usize) -> Option<&str> {
        self.digital_labels.get(digital_index).map(String::as_str)
    }
    pub fn sorted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.name.clone()).collect();
        names.sort();
        names
    }
    /// Channels acquired at `digital_index`, each paired with the block column holding its data.
    pub fn active(&self, digital_index: usize) -> Vec<(&str, usize)> {
        match self.digital_label(digital_index) {
            Some(label) => self
                .entries
                .iter()
                .filter(|e| matches_digital(&e.name, label))
                .enumerate()
                .map(|(j, e)| (e.name.as_str(), j))
                .collect(),
            None => self
                .entries
                .iter()
                .map(|e| (e.name.as_str(), e.column))
                .collect(),
        }
    }
    /// Block columns that carry channel data at `digital_index`.
    pub fn active_columns(&self, digital_index: usize) -> Vec<usize> {
        self.active(digital_index).into_iter().map(|(_, c)| c).collect()
    }
    /// Columns that may carry channel data at any point of the sweep.
    pub fn reserved_columns(&self) -> Vec<usize> {
        let mut columns: Vec<usize> = (0..self.digital_len())
            .flat_map(|d| self.active_columns(d))
            .collect();
        columns.sort_unstable();
        columns.dedup();
        columns
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    fn entry(name: &str, column: usize) -> ChannelEntry {
        ChannelEntry {
            name: name.into(),
            column,
        }
    }
    #[test]
    fn plain_map_uses_fixed_columns() {
        let map = ChannelIndexMap::new(vec![entry("Ch02", 1), entry("Ch01", 0)], vec![], 2).unwrap();
        assert!(!map.is_multiplexed());
        assert_eq!(map.digital_len(), 1);
        assert_eq!(map.active(0), vec![("Ch02", 1), ("Ch01", 0)]);
        assert_eq!(map.sorted_names(), vec!["Ch01".to_string(), "Ch02".to_string()]);
    }
    #[test]
    fn multiplexed_map_counts_sequentially() {
        let map = ChannelIndexMap::new(
            vec![
                entry("Ch04Col2", 3),
                entry("Ch04Col1", 0),
                entry("Ch05Col1", 1),
                entry("Ch05Col2", 2),
            ],
            vec!["Col2".into(), "Col1".into()],
            2,
        )
        .unwrap();
        assert_eq!(map.digital_labels(), ["Col1".to_string(), "Col2".to_string()]);
        assert_eq!(map.active(0), vec![("Ch04Col1", 0), ("Ch05Col1", 1)]);
        assert_eq!(map.active(1), vec![("Ch04Col2", 0), ("Ch05Col2", 1)]);
        assert_eq!(map.reserved_columns(), vec![0, 1]);
    }
    #[test]
    fn suffix_predicate() {
        assert!(matches_digital("Ch04Col1", "Col1"));
        assert!(!matches_digital("Ch04Col1", "Col2"));
        assert!(!matches_digital("Col1Ch04", "Col1"));
    }
    #[test]
    fn mapping_errors_are_fatal() {
        assert!(ChannelIndexMap::new(vec![], vec![], 2).is_err());
        assert!(ChannelIndexMap::new(vec![entry("Ch01", 2)], vec![], 2).is_err());
        assert!(ChannelIndexMap::new(vec![entry("Ch01", 0), entry("Ch01", 1)], vec![], 2).is_err());
        // label without channels
        assert!(ChannelIndexMap::new(vec![entry("Ch01Col1", 0)], vec!["Col1".into(), "Col3".into()], 2).is_err());
        // channel without label
        assert!(ChannelIndexMap::new(vec![entry("Ch01Col1", 0), entry("Ch02Col9", 1)], vec!["Col1".into()], 2).is_err());
        // more channels per label than block columns
        assert!(ChannelIndexMap::new(
            vec![entry("AC1", 0), entry("BC1", 1), entry("CC1", 2)],
            vec!["C1".into()],
            2
        )
        .is_err());
    }
}
