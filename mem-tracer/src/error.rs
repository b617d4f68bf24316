//! Error types for trace capture

use thiserror::Error;

/// Errors raised while capturing or emitting a trace
#[derive(Debug, Error)]
pub enum TraceError {
    /// The output stream could not be written or flushed
    #[error("trace output failed: {0}")]
    Io(#[from] std::io::Error),

    /// Guest memory could not be read while rendering a value or
    /// dereferencing a syscall argument block
    #[error("guest memory fault reading {len} bytes at {address:#x}")]
    MemoryFault {
        /// First address of the failed read
        address: u64,
        /// Number of bytes requested
        len: usize,
    },

    /// The instrumentation engine rejected its startup arguments
    #[error("instrumentation engine failed to initialise\n{0}")]
    EngineInit(String),

    /// An event arrived after the trailer was written
    #[error("trace already finished")]
    Finished,
}

/// Result type for capture operations
pub type Result<T> = std::result::Result<T, TraceError>;
