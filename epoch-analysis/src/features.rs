//! Feature matrix
//!
//! One row per epoch, one column per magnitude in the dataset's feature
//! list. Rows are labelled 1 when the epoch's syscall is in the affected
//! set.

use crate::epochs::EpochDataset;
use serde::{Deserialize, Serialize};

/// Syscalls labelled as affected when the caller names none (`mmap` on x86-64)
pub const DEFAULT_AFFECTED_SYSCALLS: &[i64] = &[9];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    /// Column headers
    pub features: Vec<u32>,
    /// Access counts per epoch, in column order
    pub rows: Vec<Vec<u64>>,
    pub labels: Vec<u8>,
}

impl FeatureMatrix {
    pub fn build(dataset: &EpochDataset, affected: &[i64]) -> Self {
        let rows = dataset
            .epochs
            .iter()
            .map(|epoch| {
                dataset
                    .features
                    .iter()
                    .map(|m| epoch.magnitudes.get(m).copied().unwrap_or(0))
                    .collect()
            })
            .collect();
        let labels = dataset
            .epochs
            .iter()
            .map(|epoch| u8::from(affected.contains(&epoch.syscall)))
            .collect();

        Self {
            features: dataset.features.clone(),
            rows,
            labels,
        }
    }

    /// Build with `DEFAULT_AFFECTED_SYSCALLS`
    pub fn with_default_labels(dataset: &EpochDataset) -> Self {
        Self::build(dataset, DEFAULT_AFFECTED_SYSCALLS)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn positive_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l == 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE: &str = "\
SysCall 9
R 0x10 8 0x5
R 0x18 8 0x64
R 0x20 8 0x64
SysCall 12
W 0x28 8 0x3e8
";

    #[test]
    fn test_matrix_columns_follow_features() {
        let dataset = EpochDataset::from_reader(TRACE.as_bytes()).unwrap();
        let matrix = FeatureMatrix::with_default_labels(&dataset);

        // 0x5 -> 0, 0x64 = 100 -> 2, 0x3e8 = 1000 -> 3
        assert_eq!(matrix.features, vec![0, 2, 3]);
        assert_eq!(matrix.rows, vec![vec![1, 2, 0], vec![0, 0, 1]]);
        assert_eq!(matrix.labels, vec![1, 0]);
        assert_eq!(matrix.row_count(), 2);
        assert_eq!(matrix.positive_count(), 1);
    }

    #[test]
    fn test_custom_affected_set() {
        let dataset = EpochDataset::from_reader(TRACE.as_bytes()).unwrap();
        let matrix = FeatureMatrix::build(&dataset, &[9, 12]);
        assert_eq!(matrix.labels, vec![1, 1]);

        let matrix = FeatureMatrix::build(&dataset, &[]);
        assert_eq!(matrix.positive_count(), 0);
    }

    #[test]
    fn test_empty_dataset() {
        let dataset = EpochDataset::from_reader("#\n#eof\n".as_bytes()).unwrap();
        let matrix = FeatureMatrix::with_default_labels(&dataset);
        assert!(matrix.features.is_empty());
        assert_eq!(matrix.row_count(), 0);
    }
}
