//! Epoch Analysis - Offline processing of memory access traces
//!
//! This crate reads the text traces written by `mem_tracer`, splits them
//! into syscall epochs and turns each epoch into a magnitude histogram
//! suitable for classification. It also digests and diffs traces so that
//! reruns of a deterministic program can be checked for identical output.

pub mod digest;
pub mod epochs;
pub mod features;
pub mod parser;

pub use digest::{digest_bytes, digest_reader, first_divergence, Divergence};
pub use epochs::{load_dataset, value_magnitude, EpochCollector, EpochDataset, SyscallEpoch};
pub use features::{FeatureMatrix, DEFAULT_AFFECTED_SYSCALLS};
pub use parser::{parse_hex, parse_line, MemoryRecord, TraceParser, TraceRecord};

/// Error type for trace analysis
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed trace line {line_no}: {line:?}")]
    Malformed { line_no: usize, line: String },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;
