//! Guest Sim - Reference instrumentation engine for the memory tracer
//!
//! A small software machine that plays the role of a dynamic binary
//! instrumentation engine. It discovers each instruction of a guest
//! program, asks the tool which probes to attach, and fires them around
//! execution with a context exposing operand addresses, syscall registers
//! and guest memory.
//!
//! # Usage
//!
//! ```
//! use guest_sim::programs;
//! use mem_tracer::{TraceConfig, TraceSession};
//!
//! let platform = guest_sim::default_platform();
//! let mut machine = programs::counter_machine(platform).unwrap();
//! let session = TraceSession::with_writer(Vec::new(), TraceConfig::default(), platform).unwrap();
//! let exit_code = session.run(&mut machine).unwrap();
//! assert_eq!(exit_code, 0);
//! ```

pub mod isa;
pub mod machine;
pub mod programs;

pub use isa::{Mem, Op, Reg, INSN_SIZE, NUM_REGS, SP};
pub use machine::{default_platform, GuestRam, GuestThread, Machine, DEFAULT_CODE_BASE, FAULT_EXIT_CODE, KILLED_EXIT_CODE};

use mem_tracer::ThreadId;
use thiserror::Error;

/// Errors building a guest machine
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("instruction {pc} names register r{reg}, which does not exist")]
    InvalidRegister { pc: usize, reg: Reg },

    #[error("instruction {pc} jumps to {target}, outside the program")]
    InvalidTarget { pc: usize, target: usize },

    #[error("instruction {pc} uses a {size} byte register operand")]
    InvalidSize { pc: usize, size: usize },

    #[error("{len} bytes at {address:#x} do not fit in guest memory")]
    OutOfMemory { address: u64, len: usize },

    #[error("no thread with id {0}")]
    UnknownThread(ThreadId),
}

/// Result type for machine construction
pub type Result<T> = std::result::Result<T, MachineError>;
