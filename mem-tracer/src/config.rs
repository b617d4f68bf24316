//! Session configuration and target platform description

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Trace file written when no output path is configured
pub const DEFAULT_OUTPUT_PATH: &str = "MemTrace.out";

/// How values of non-scalar widths (anything but 1/2/4/8 bytes) are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteEncoding {
    /// `0x` followed by every byte as unpadded lowercase hex.
    ///
    /// This is the historical format. It cannot be parsed back
    /// unambiguously (`0x1a` may be one byte or two).
    #[default]
    Compact,
    /// `0x` followed by exactly two hex digits per byte
    Padded,
}

/// Configuration of a trace session
///
/// Fixed when the session starts and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Destination of the trace
    pub output_path: PathBuf,
    /// Whether memory contents are written next to addresses
    pub emit_values: bool,
    /// Rendering of non-scalar values
    pub byte_encoding: ByteEncoding,
}

impl TraceConfig {
    /// Create a configuration with the default byte encoding
    pub fn new(output_path: impl Into<PathBuf>, emit_values: bool) -> Self {
        Self {
            output_path: output_path.into(),
            emit_values,
            byte_encoding: ByteEncoding::default(),
        }
    }

    /// Select the rendering used for non-scalar values
    pub fn with_byte_encoding(mut self, byte_encoding: ByteEncoding) -> Self {
        self.byte_encoding = byte_encoding;
        self
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_PATH, true)
    }
}

/// Operating system of the traced program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Os {
    Linux,
    MacOs,
    Windows,
    Other,
}

/// Instruction set architecture of the traced program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    /// 32-bit x86
    Ia32,
    /// x86-64
    Intel64,
}

impl Arch {
    /// Size of a guest pointer in bytes
    pub fn pointer_bytes(self) -> usize {
        match self {
            Arch::Ia32 => 4,
            Arch::Intel64 => 8,
        }
    }

    /// Width of the address and value columns: `0x` plus two digits per byte
    pub fn address_field_width(self) -> usize {
        2 + 2 * self.pointer_bytes()
    }
}

/// Target the traced program runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// The platform this crate was compiled for
    pub fn host() -> Self {
        let os = if cfg!(target_os = "linux") {
            Os::Linux
        } else if cfg!(target_os = "macos") {
            Os::MacOs
        } else if cfg!(target_os = "windows") {
            Os::Windows
        } else {
            Os::Other
        };
        let arch = if cfg!(target_pointer_width = "32") {
            Arch::Ia32
        } else {
            Arch::Intel64
        };
        Self { os, arch }
    }
}

/// Usage banner shown when the instrumentation engine rejects its arguments
pub fn usage() -> String {
    format!(
        "This tool produces a memory address trace.\n\
         For each (dynamic) instruction reading or writing to memory the ip and ea are recorded\n\
         \n\
         -o <file>       specify trace file name [default {DEFAULT_OUTPUT_PATH}]\n\
         -values <0|1>   output memory values read and written [default 1]\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TraceConfig::default();
        assert_eq!(config.output_path, PathBuf::from("MemTrace.out"));
        assert!(config.emit_values);
        assert_eq!(config.byte_encoding, ByteEncoding::Compact);
    }

    #[test]
    fn test_config_from_partial_json() {
        let config = TraceConfig::from_json(r#"{"emit_values": false}"#).unwrap();
        assert_eq!(config.output_path, PathBuf::from(DEFAULT_OUTPUT_PATH));
        assert!(!config.emit_values);

        let config = TraceConfig::from_json(r#"{"output_path": "t.out", "byte_encoding": "padded"}"#)
            .unwrap();
        assert_eq!(config.output_path, PathBuf::from("t.out"));
        assert_eq!(config.byte_encoding, ByteEncoding::Padded);
    }

    #[test]
    fn test_address_field_width() {
        assert_eq!(Arch::Ia32.address_field_width(), 10);
        assert_eq!(Arch::Intel64.address_field_width(), 18);
    }

    #[test]
    fn test_usage_mentions_knobs() {
        let text = usage();
        assert!(text.contains("-o <file>"));
        assert!(text.contains("MemTrace.out"));
        assert!(text.contains("-values"));
    }
}
