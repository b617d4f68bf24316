//! Sample guest programs

use crate::isa::{Mem, Op};
use crate::machine::Machine;
use crate::Result;
use mem_tracer::{Arch, Platform};

/// Start of guest RAM used by the samples
pub const DATA_BASE: u64 = 0x1000;

/// Size of guest RAM used by the samples
pub const DATA_SIZE: usize = 0x1000;

/// Initial stack pointer; the stack grows down from the end of RAM
pub const STACK_TOP: u64 = DATA_BASE + DATA_SIZE as u64;

/// Loop counter of the counter program
pub const COUNTER: u64 = DATA_BASE;

/// Iterations of the counter program
pub const COUNTER_START: u64 = 3;

/// Number of the `exit` syscall on `platform`
pub fn exit_syscall(platform: Platform) -> u64 {
    match platform.arch {
        Arch::Intel64 => 60,
        Arch::Ia32 => 1,
    }
}

/// Counts [`COUNTER`] down to zero, calling a subroutine each round, then
/// copies and compares a 16-byte buffer, prefetches a line and exits with 0
///
/// Touches every kind of probe: reads, writes emitted after execution and
/// on taken branches, a double read, a non-scalar value, a prefetch and a
/// syscall.
pub fn counter_program(platform: Platform) -> Vec<Op> {
    vec![
        // 0
        Op::MovImm { dst: 1, imm: COUNTER },
        // 1: loop head
        Op::Load { dst: 2, src: Mem::at(1, 0), size: 8 },
        Op::Call { target: 10 },
        Op::DecBranchNz { counter: Mem::at(1, 0), size: 8, target: 1 },
        // 4
        Op::Copy { dst: Mem::abs(DATA_BASE + 0x18), src: Mem::abs(DATA_BASE + 0x8), size: 16 },
        Op::CompareMem { flag: 3, a: Mem::abs(DATA_BASE + 0x8), b: Mem::abs(DATA_BASE + 0x18), size: 16 },
        Op::Prefetch { src: Mem::abs(DATA_BASE + 0x40), size: 64 },
        Op::MovImm { dst: 0, imm: exit_syscall(platform) },
        Op::MovImm { dst: 1, imm: 0 },
        Op::Syscall,
        // 10: subroutine, records the counter it saw
        Op::Store { dst: Mem::at(1, 0x30), src: 2, size: 4 },
        Op::Ret,
    ]
}

/// [`counter_program`] loaded with its data and one thread
pub fn counter_machine(platform: Platform) -> Result<Machine> {
    let mut machine = Machine::new(counter_program(platform), DATA_BASE, DATA_SIZE, platform)?;
    machine.load(COUNTER, &COUNTER_START.to_le_bytes())?;
    let buffer: Vec<u8> = (1..=16).collect();
    machine.load(DATA_BASE + 0x8, &buffer)?;
    machine.spawn(0, STACK_TOP)?;
    Ok(machine)
}
