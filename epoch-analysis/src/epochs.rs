//! Syscall epochs
//!
//! A syscall epoch is the run of memory accesses that follows one syscall
//! up to the next. Each epoch is summarised by a histogram of the decimal
//! order of magnitude of the values it touched.

use crate::parser::{TraceParser, TraceRecord};
use crate::{AnalysisError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Memory accesses following one syscall
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallEpoch {
    /// Syscall that opened the epoch
    pub syscall: i64,
    /// `floor(log10(value))` -> number of accesses
    pub magnitudes: BTreeMap<u32, u64>,
}

impl SyscallEpoch {
    fn new(syscall: i64) -> Self {
        Self {
            syscall,
            magnitudes: BTreeMap::new(),
        }
    }

    /// Accesses counted in this epoch
    pub fn access_count(&self) -> u64 {
        self.magnitudes.values().sum()
    }
}

/// Decimal order of magnitude of a value token
///
/// `None` for zero, for tokens that are not hex, and for values beyond
/// 128 bits.
pub fn value_magnitude(token: &str) -> Option<u32> {
    let digits = token.strip_prefix("0x").unwrap_or(token);
    let value = u128::from_str_radix(digits, 16).ok()?;
    value.checked_ilog10()
}

/// Builds epochs from a stream of records
#[derive(Debug, Default)]
pub struct EpochCollector {
    current: Option<SyscallEpoch>,
    epochs: Vec<SyscallEpoch>,
    features: BTreeSet<u32>,
    skipped: u64,
}

impl EpochCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one record
    pub fn push(&mut self, record: &TraceRecord) {
        match record {
            TraceRecord::Syscall(number) => {
                if let Some(done) = self.current.replace(SyscallEpoch::new(*number)) {
                    self.epochs.push(done);
                }
            }
            TraceRecord::Memory(memory) => {
                // Accesses before the first syscall belong to no epoch.
                let Some(epoch) = self.current.as_mut() else {
                    return;
                };
                match memory.value.as_deref().and_then(value_magnitude) {
                    Some(magnitude) => {
                        *epoch.magnitudes.entry(magnitude).or_insert(0) += 1;
                        self.features.insert(magnitude);
                    }
                    None => self.skipped += 1,
                }
            }
            TraceRecord::Eof => {
                if let Some(done) = self.current.take() {
                    self.epochs.push(done);
                }
            }
            TraceRecord::Comment => {}
        }
    }

    /// Close the open epoch and return the dataset
    pub fn finish(mut self) -> EpochDataset {
        if let Some(done) = self.current.take() {
            self.epochs.push(done);
        }
        tracing::debug!(
            "Collected {} epochs, {} features, skipped {} accesses without a usable value",
            self.epochs.len(),
            self.features.len(),
            self.skipped
        );
        EpochDataset {
            epochs: self.epochs,
            features: self.features.into_iter().collect(),
        }
    }
}

/// Epochs of one trace plus the magnitudes seen anywhere in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochDataset {
    pub epochs: Vec<SyscallEpoch>,
    /// Sorted, distinct magnitudes
    pub features: Vec<u32>,
}

impl EpochDataset {
    /// Parse a whole trace
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut collector = EpochCollector::new();
        for record in TraceParser::new(reader) {
            collector.push(&record?);
        }
        Ok(collector.finish())
    }

    pub fn epoch_count(&self) -> usize {
        self.epochs.len()
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(AnalysisError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(AnalysisError::from)
    }
}

/// Load the epochs of a trace file
pub fn load_dataset(path: impl AsRef<Path>) -> anyhow::Result<EpochDataset> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open trace {}", path.display()))?;
    let dataset = EpochDataset::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse trace {}", path.display()))?;
    tracing::info!("Loaded {} epochs from {}", dataset.epoch_count(), path.display());
    Ok(dataset)
}
