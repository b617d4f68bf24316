//! Value formatter
//!
//! Renders the bytes of a memory operand as a trace token. The rules follow
//! a stream in hexadecimal mode with the numeric-base prefix enabled:
//! non-zero integers get a `0x` prefix and zero is printed bare.

use crate::config::ByteEncoding;
use std::fmt::Write as _;

/// Render an integer with the base prefix, leaving zero bare
pub fn hex_with_base(value: u64) -> String {
    if value == 0 {
        "0".to_string()
    } else {
        format!("{value:#x}")
    }
}

/// Rendered value of one memory operand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueToken {
    /// Zero-width operand; nothing is written
    Empty,
    /// 1, 2, 4 or 8 byte operand read as an unsigned little-endian integer.
    /// The writer right-justifies it in the address-width column.
    Scalar(u64),
    /// Any other width, already rendered and written without padding
    Bytes(String),
}

impl ValueToken {
    /// Render `bytes` according to their width
    pub fn render(bytes: &[u8], encoding: ByteEncoding) -> Self {
        match bytes.len() {
            0 => ValueToken::Empty,
            1 | 2 | 4 | 8 => ValueToken::Scalar(le_scalar(bytes)),
            _ => ValueToken::Bytes(render_bytes(bytes, encoding)),
        }
    }

    /// Append the token to `line`, padding scalars to `field_width`
    pub fn write_into(&self, line: &mut String, field_width: usize) {
        match self {
            ValueToken::Empty => {}
            ValueToken::Scalar(value) => {
                let _ = write!(line, "{:>field_width$}", hex_with_base(*value));
            }
            ValueToken::Bytes(text) => line.push_str(text),
        }
    }
}

/// Little-endian integer of at most eight bytes
fn le_scalar(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

fn render_bytes(bytes: &[u8], encoding: ByteEncoding) -> String {
    match encoding {
        ByteEncoding::Compact => {
            let mut text = String::with_capacity(2 + bytes.len() * 2);
            text.push_str("0x");
            for byte in bytes {
                let _ = write!(text, "{byte:x}");
            }
            text
        }
        ByteEncoding::Padded => format!("0x{}", hex::encode(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn rendered(bytes: &[u8], encoding: ByteEncoding, width: usize) -> String {
        let mut line = String::new();
        ValueToken::render(bytes, encoding).write_into(&mut line, width);
        line
    }

    #[test]
    fn test_hex_with_base() {
        assert_eq!(hex_with_base(0), "0");
        assert_eq!(hex_with_base(0x2a), "0x2a");
        assert_eq!(hex_with_base(u64::MAX), "0xffffffffffffffff");
    }

    #[test]
    fn test_zero_width_is_empty() {
        assert_eq!(ValueToken::render(&[], ByteEncoding::Compact), ValueToken::Empty);
        assert_eq!(rendered(&[], ByteEncoding::Compact, 18), "");
    }

    #[test]
    fn test_scalar_widths() {
        assert_eq!(ValueToken::render(&[0x2a], ByteEncoding::Compact), ValueToken::Scalar(0x2a));
        assert_eq!(
            ValueToken::render(&[0x34, 0x12], ByteEncoding::Compact),
            ValueToken::Scalar(0x1234)
        );
        assert_eq!(
            ValueToken::render(&[0xef, 0xbe, 0xad, 0xde], ByteEncoding::Compact),
            ValueToken::Scalar(0xdeadbeef)
        );
        assert_eq!(
            ValueToken::render(&0x0102_0304_0506_0708u64.to_le_bytes(), ByteEncoding::Compact),
            ValueToken::Scalar(0x0102_0304_0506_0708)
        );
    }

    #[test]
    fn test_scalar_is_right_justified() {
        assert_eq!(rendered(&[0x2a, 0, 0, 0], ByteEncoding::Compact, 18), format!("{:>18}", "0x2a"));
        assert_eq!(rendered(&[0, 0], ByteEncoding::Compact, 10), format!("{:>10}", "0"));
    }

    #[test]
    fn test_non_scalar_compact_is_unpadded() {
        // 3 bytes: 0x01, 0xab, 0x00 -> "1", "ab", "0"
        assert_eq!(rendered(&[0x01, 0xab, 0x00], ByteEncoding::Compact, 18), "0x1ab0");
        let sixteen = [0x10u8; 16];
        assert_eq!(rendered(&sixteen, ByteEncoding::Compact, 18), format!("0x{}", "10".repeat(16)));
    }

    #[test]
    fn test_non_scalar_padded() {
        assert_eq!(rendered(&[0x01, 0xab, 0x00], ByteEncoding::Padded, 18), "0x01ab00");
    }

    #[test]
    fn test_width_law_random_patterns() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..256 {
            for width in [1usize, 2, 4, 8] {
                let bytes: Vec<u8> = (0..width).map(|_| rng.gen()).collect();
                let text = rendered(&bytes, ByteEncoding::Compact, 18);
                let token = text.trim_start();
                let parsed = u64::from_str_radix(token.trim_start_matches("0x"), 16).unwrap();
                assert_eq!(parsed, le_scalar(&bytes));
            }

            let width = rng.gen_range(9..40);
            let bytes: Vec<u8> = (0..width).map(|_| rng.gen()).collect();
            let text = rendered(&bytes, ByteEncoding::Compact, 18);
            let expected: String = bytes.iter().map(|b| format!("{b:x}")).collect();
            assert_eq!(text, format!("0x{expected}"));
        }
    }
}
