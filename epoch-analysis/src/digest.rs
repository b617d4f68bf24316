//! Trace digests and comparison
//!
//! Traces of the same deterministic run must be byte-identical. A digest
//! gives a cheap equality check; `first_divergence` pinpoints the line
//! where two traces stop agreeing.

use crate::Result;
use sha2::{Digest, Sha256};
use std::io::{BufRead, Read};

/// Lowercase hex SHA-256 of `bytes`
pub fn digest_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Lowercase hex SHA-256 of everything `reader` yields
pub fn digest_reader<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// First line at which two traces differ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    /// 1-based line number
    pub line_no: usize,
    /// `None` when the left trace has already ended
    pub left: Option<String>,
    pub right: Option<String>,
}

/// Compare two traces line by line; `None` when they are identical
pub fn first_divergence<L: BufRead, R: BufRead>(left: L, right: R) -> Result<Option<Divergence>> {
    let mut left = left.lines();
    let mut right = right.lines();
    let mut line_no = 0;
    loop {
        line_no += 1;
        let l = left.next().transpose()?;
        let r = right.next().transpose()?;
        match (l, r) {
            (None, None) => return Ok(None),
            (l, r) if l == r => continue,
            (left, right) => {
                tracing::debug!("Traces diverge at line {}", line_no);
                return Ok(Some(Divergence { line_no, left, right }));
            }
        }
    }
}
