//! Trace text parser
//!
//! Reads the line format written by `mem_tracer` back into records.

use crate::{AnalysisError, Result};
use mem_tracer::Direction;
use std::io::BufRead;

/// A memory line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRecord {
    pub direction: Direction,
    pub address: u64,
    pub size: usize,
    /// Value token as written, if the line has one
    pub value: Option<String>,
}

/// One parsed trace line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceRecord {
    /// Header banner line
    Comment,
    /// `SysCall <n>`
    Syscall(i64),
    Memory(MemoryRecord),
    /// `#eof`
    Eof,
}

/// Parse a hex token with or without a `0x` prefix
pub fn parse_hex(token: &str) -> Option<u64> {
    let digits = token.strip_prefix("0x").unwrap_or(token);
    u64::from_str_radix(digits, 16).ok()
}

/// Parse one line; blank lines yield `None`
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<TraceRecord>> {
    let malformed = || AnalysisError::Malformed {
        line_no,
        line: line.to_string(),
    };

    let mut tokens = line.split_whitespace();
    let Some(first) = tokens.next() else {
        return Ok(None);
    };

    if first == "#eof" {
        return Ok(Some(TraceRecord::Eof));
    }
    if first.starts_with('#') {
        return Ok(Some(TraceRecord::Comment));
    }
    if first == "SysCall" {
        let number = tokens
            .next()
            .and_then(|t| t.parse::<i64>().ok())
            .ok_or_else(malformed)?;
        return Ok(Some(TraceRecord::Syscall(number)));
    }

    let mut tag = first.chars();
    let direction = match (tag.next(), tag.next()) {
        (Some(c), None) => Direction::from_tag(c).ok_or_else(malformed)?,
        _ => return Err(malformed()),
    };
    let address = tokens.next().and_then(parse_hex).ok_or_else(malformed)?;
    let size = tokens
        .next()
        .and_then(|t| t.parse::<usize>().ok())
        .ok_or_else(malformed)?;
    let value = tokens.next().map(str::to_string);
    if tokens.next().is_some() {
        return Err(malformed());
    }

    Ok(Some(TraceRecord::Memory(MemoryRecord {
        direction,
        address,
        size,
        value,
    })))
}

/// Iterator over the records of a trace
pub struct TraceParser<R> {
    lines: std::io::Lines<R>,
    line_no: usize,
}

impl<R: BufRead> TraceParser<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> Iterator for TraceParser<R> {
    type Item = Result<TraceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(err.into())),
            };
            self.line_no += 1;
            match parse_line(self.line_no, &line) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
