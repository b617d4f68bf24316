//! Contract with the instrumentation engine
//!
//! The engine discovers instructions, asks the [`Tool`] which probes to
//! attach to each one, and later fires those probes with a
//! [`ProbeContext`] describing the dynamic execution.

use crate::classify::{Probe, ReadOperand};
use crate::Result;

/// Identifier of a traced thread
pub type ThreadId = u32;

/// Read access to the traced program's memory
pub trait GuestMemory {
    /// Fill `buf` with the bytes starting at `address`
    ///
    /// Returns [`crate::TraceError::MemoryFault`] if any byte is unmapped.
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> Result<()>;
}

/// Static properties of one instruction, as classified by the engine
pub trait InstructionInfo {
    fn is_syscall(&self) -> bool;
    /// Execution can continue at the next instruction
    fn has_fall_through(&self) -> bool;
    fn is_branch_or_call(&self) -> bool;
    /// All memory operands are plain loads/stores (no gathers, no
    /// engine-specific exotic operands)
    fn is_standard_memop(&self) -> bool;
    fn is_memory_read(&self) -> bool;
    fn has_memory_read2(&self) -> bool;
    fn is_memory_write(&self) -> bool;
    fn is_prefetch(&self) -> bool;
}

/// Dynamic state available to a probe when it fires
pub trait ProbeContext: GuestMemory {
    fn thread_id(&self) -> ThreadId;
    fn instruction_pointer(&self) -> u64;
    /// Effective address of a read operand
    fn memory_read_ea(&self, operand: ReadOperand) -> u64;
    /// Size shared by both read operands
    fn memory_read_size(&self) -> usize;
    fn memory_write_ea(&self) -> u64;
    fn memory_write_size(&self) -> usize;
    fn syscall_number(&self) -> u64;
    /// Raw syscall argument register `index` (0..6)
    fn syscall_argument(&self, index: usize) -> u64;
}

/// Callbacks an engine drives
pub trait Tool {
    /// Decide the probes for one static instruction. Called once per
    /// instruction; the engine caches the result.
    fn instrument<I: InstructionInfo>(&self, ins: &I) -> Vec<Probe>;

    /// Handle one probe firing
    fn on_probe<C: ProbeContext>(&self, probe: &Probe, ctx: &C) -> Result<()>;

    /// Process teardown
    fn fini(&self, exit_code: i32) -> Result<()>;
}

/// An instrumentation engine hosting the traced program
pub trait Engine {
    /// Check the engine's startup arguments without running anything.
    /// Called before the trace output is opened.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Run the traced program to completion under `tool` and return its
    /// exit code. Blocks until the program terminates.
    fn start_program<T: Tool>(&mut self, tool: &T) -> Result<i32>;
}
