//! Trace record writer
//!
//! Each event becomes one text line. A line is rendered completely before
//! the output lock is taken and appended with a single `write_all`, so
//! lines from concurrent threads never interleave.

use crate::config::{ByteEncoding, Platform, TraceConfig};
use crate::engine::GuestMemory;
use crate::format::{hex_with_base, ValueToken};
use crate::trace::{MemoryEvent, SyscallEvent};
use crate::Result;
use std::fmt::Write as _;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Banner written when the trace is opened
pub const TRACE_HEADER: &str = "#\n# Memory Access Trace \n#\n";

/// Marker written when the trace is closed
pub const TRACE_TRAILER: &str = "#eof\n";

/// Line-oriented writer of trace records
#[derive(Debug)]
pub struct TraceWriter<W: Write> {
    out: Mutex<W>,
    emit_values: bool,
    byte_encoding: ByteEncoding,
    address_width: usize,
}

impl<W: Write> TraceWriter<W> {
    pub fn new(out: W, config: &TraceConfig, platform: Platform) -> Self {
        Self {
            out: Mutex::new(out),
            emit_values: config.emit_values,
            byte_encoding: config.byte_encoding,
            address_width: platform.arch.address_field_width(),
        }
    }

    pub fn write_header(&self) -> Result<()> {
        self.append(TRACE_HEADER)
    }

    /// Write the end marker and flush
    pub fn write_trailer(&self) -> Result<()> {
        let mut out = self.lock();
        out.write_all(TRACE_TRAILER.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    pub fn write_syscall(&self, event: &SyscallEvent) -> Result<()> {
        self.append(&syscall_line(event))
    }

    /// Write a memory line, reading the operand's current bytes from
    /// `memory` when values are enabled and the access is not a prefetch
    ///
    /// If the value cannot be read the line is still written, without a
    /// value, before the fault is returned.
    pub fn write_memory<M: GuestMemory + ?Sized>(&self, event: &MemoryEvent, memory: &M) -> Result<()> {
        let value = if self.emit_values && !event.is_prefetch {
            let mut bytes = vec![0u8; event.size];
            if let Err(err) = memory.read_bytes(event.effective_address, &mut bytes) {
                self.append(&self.memory_line(event, None))?;
                return Err(err);
            }
            Some(ValueToken::render(&bytes, self.byte_encoding))
        } else {
            None
        };
        self.append(&self.memory_line(event, value.as_ref()))
    }

    /// Render a memory line; `value` is `None` when no value is written
    pub fn memory_line(&self, event: &MemoryEvent, value: Option<&ValueToken>) -> String {
        let width = self.address_width;
        let mut line = String::with_capacity(2 * width + 8);
        let _ = write!(
            line,
            "{} {:>width$} {:>2} ",
            event.direction.tag(),
            hex_with_base(event.effective_address),
            event.size
        );
        if let Some(value) = value {
            value.write_into(&mut line, width);
        }
        line.push('\n');
        line
    }

    pub fn flush(&self) -> Result<()> {
        self.lock().flush()?;
        Ok(())
    }

    /// Recover the underlying stream
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, line: &str) -> Result<()> {
        self.lock().write_all(line.as_bytes())?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, W> {
        self.out.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Syscall number in signed decimal
pub fn syscall_line(event: &SyscallEvent) -> String {
    format!("SysCall {}\n", event.number as i64)
}
