//! Memory Tracer - Memory access and syscall capture for instrumented programs
//!
//! This crate is the capture side of a dynamic binary instrumentation tool.
//! An instrumentation engine presents every instruction of a running
//! program; the tracer decides which probes to attach and turns each probe
//! firing into one line of a text trace:
//!
//! ```text
//! #
//! # Memory Access Trace
//! #
//! SysCall 12
//! R             0x1000  4               0x2a
//! W             0x2000  8         0xdeadbeef
//! #eof
//! ```
//!
//! # Overview
//!
//! * Every standard memory read (including a second read operand) is
//!   recorded before the instruction executes.
//! * Every standard memory write is captured before execution (address and
//!   size) and emitted after it, on the fall-through or the taken branch,
//!   so the recorded value is the one the instruction stored.
//! * Every syscall entry is recorded with its number; arguments are decoded,
//!   including layouts where the arguments are passed by pointer.
//!
//! # Usage
//!
//! ```no_run
//! use mem_tracer::{Engine, Platform, TraceConfig, TraceSession};
//!
//! fn trace<E: Engine>(engine: &mut E) -> anyhow::Result<i32> {
//!     let session = TraceSession::open_for(engine, TraceConfig::default(), Platform::host())?;
//!     session.run(engine)
//! }
//! ```
//!
//! # Limitations
//!
//! * Only standard memory operands are traced; gathers/scatters and other
//!   operands the engine reports as non-standard are skipped.
//! * Values are read from guest memory as little-endian integers.

pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod pending;
pub mod session;
pub mod syscall;
pub mod trace;
pub mod tracer;
pub mod writer;

pub use classify::{classify, InsertPoint, Probe, ProbeAction, ReadOperand};
pub use config::{usage, Arch, ByteEncoding, Os, Platform, TraceConfig, DEFAULT_OUTPUT_PATH};
pub use engine::{Engine, GuestMemory, InstructionInfo, ProbeContext, ThreadId, Tool};
pub use error::{Result, TraceError};
pub use format::ValueToken;
pub use pending::{PendingWrite, PendingWrites};
pub use session::TraceSession;
pub use syscall::{ArgumentLayout, SyscallDecoder};
pub use trace::{Direction, MemoryEvent, SyscallEvent, TraceStats};
pub use tracer::MemTracer;
pub use writer::{TraceWriter, TRACE_HEADER, TRACE_TRAILER};
