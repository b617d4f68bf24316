//! Guest instruction set
//!
//! Just enough instruction shapes to exercise every classification the
//! tracer distinguishes: plain and predicated loads/stores, two-operand
//! memory compares, memory-to-memory copies, prefetches, calls and returns
//! through the stack, conditional branches that also write memory, and
//! syscalls.

use mem_tracer::InstructionInfo;

/// Register index
pub type Reg = usize;

/// Number of general purpose registers
pub const NUM_REGS: usize = 16;

/// Stack pointer
pub const SP: Reg = 15;

/// Bytes per instruction; instruction addresses are `code_base + pc * INSN_SIZE`
pub const INSN_SIZE: u64 = 4;

/// Memory operand `[base + disp]`, or an absolute address when `base` is `None`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mem {
    pub base: Option<Reg>,
    pub disp: i64,
}

impl Mem {
    /// `[base + disp]`
    pub fn at(base: Reg, disp: i64) -> Self {
        Self {
            base: Some(base),
            disp,
        }
    }

    /// Absolute address
    pub fn abs(address: u64) -> Self {
        Self {
            base: None,
            disp: address as i64,
        }
    }

    /// Effective address under `regs`
    pub fn ea(&self, regs: &[u64; NUM_REGS]) -> u64 {
        let base = self.base.map_or(0, |r| regs[r]);
        base.wrapping_add(self.disp as u64)
    }
}

/// One guest instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `dst = imm`
    MovImm { dst: Reg, imm: u64 },
    /// `dst = dst + src`
    Add { dst: Reg, src: Reg },
    /// Zero-extending load of `size` (1..=8) bytes
    Load { dst: Reg, src: Mem, size: usize },
    /// Store of the low `size` (1..=8) bytes of `src`
    Store { dst: Mem, src: Reg, size: usize },
    /// `Load` that only executes when `pred` is non-zero
    LoadIf { pred: Reg, dst: Reg, src: Mem, size: usize },
    /// `Store` that only executes when `pred` is non-zero
    StoreIf { pred: Reg, dst: Mem, src: Reg, size: usize },
    /// Copy `size` bytes from `src` to `dst`
    Copy { dst: Mem, src: Mem, size: usize },
    /// `flag = (a == b)` over `size` bytes
    CompareMem { flag: Reg, a: Mem, b: Mem, size: usize },
    /// Cache hint; touches no memory
    Prefetch { src: Mem, size: usize },
    /// Load through an operand the engine does not model as standard
    Gather { dst: Reg, src: Mem, size: usize },
    /// Push the return address and jump
    Call { target: usize },
    /// Pop the return address and jump to it
    Ret,
    Jump { target: usize },
    /// Jump if `reg == 0`
    BranchIfZero { reg: Reg, target: usize },
    /// Decrement the `size`-byte counter in memory; jump if it is now non-zero
    DecBranchNz { counter: Mem, size: usize, target: usize },
    /// Number in r0, arguments in r1..=r6, result in r0
    Syscall,
    /// Stop the thread with exit code r0
    Halt,
}

impl Op {
    /// Jump target, for instructions that have one
    pub fn target(&self) -> Option<usize> {
        match *self {
            Op::Call { target }
            | Op::Jump { target }
            | Op::BranchIfZero { target, .. }
            | Op::DecBranchNz { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Registers named by the instruction
    pub fn registers(&self) -> Vec<Reg> {
        let mem = |m: &Mem| m.base.into_iter();
        match self {
            Op::MovImm { dst, .. } => vec![*dst],
            Op::Add { dst, src } => vec![*dst, *src],
            Op::Load { dst, src, .. } | Op::Gather { dst, src, .. } => {
                std::iter::once(*dst).chain(mem(src)).collect()
            }
            Op::Store { dst, src, .. } => std::iter::once(*src).chain(mem(dst)).collect(),
            Op::LoadIf { pred, dst, src, .. } => [*pred, *dst].into_iter().chain(mem(src)).collect(),
            Op::StoreIf { pred, dst, src, .. } => [*pred, *src].into_iter().chain(mem(dst)).collect(),
            Op::Copy { dst, src, .. } => mem(dst).chain(mem(src)).collect(),
            Op::CompareMem { flag, a, b, .. } => std::iter::once(*flag).chain(mem(a)).chain(mem(b)).collect(),
            Op::Prefetch { src, .. } => mem(src).collect(),
            Op::BranchIfZero { reg, .. } => vec![*reg],
            Op::DecBranchNz { counter, .. } => mem(counter).collect(),
            Op::Call { .. } | Op::Ret | Op::Jump { .. } | Op::Syscall | Op::Halt => Vec::new(),
        }
    }

    /// Widths that must be register sized (1..=8 bytes)
    pub fn scalar_size(&self) -> Option<usize> {
        match *self {
            Op::Load { size, .. }
            | Op::Store { size, .. }
            | Op::LoadIf { size, .. }
            | Op::StoreIf { size, .. }
            | Op::Gather { size, .. }
            | Op::DecBranchNz { size, .. } => Some(size),
            _ => None,
        }
    }
}

impl InstructionInfo for Op {
    fn is_syscall(&self) -> bool {
        matches!(self, Op::Syscall)
    }

    fn has_fall_through(&self) -> bool {
        !matches!(self, Op::Call { .. } | Op::Ret | Op::Jump { .. } | Op::Halt)
    }

    fn is_branch_or_call(&self) -> bool {
        matches!(
            self,
            Op::Call { .. }
                | Op::Ret
                | Op::Jump { .. }
                | Op::BranchIfZero { .. }
                | Op::DecBranchNz { .. }
        )
    }

    fn is_standard_memop(&self) -> bool {
        !matches!(self, Op::Gather { .. })
    }

    fn is_memory_read(&self) -> bool {
        matches!(
            self,
            Op::Load { .. }
                | Op::LoadIf { .. }
                | Op::Copy { .. }
                | Op::CompareMem { .. }
                | Op::Prefetch { .. }
                | Op::Gather { .. }
                | Op::Ret
                | Op::DecBranchNz { .. }
        )
    }

    fn has_memory_read2(&self) -> bool {
        matches!(self, Op::CompareMem { .. })
    }

    fn is_memory_write(&self) -> bool {
        matches!(
            self,
            Op::Store { .. }
                | Op::StoreIf { .. }
                | Op::Copy { .. }
                | Op::Call { .. }
                | Op::DecBranchNz { .. }
        )
    }

    fn is_prefetch(&self) -> bool {
        matches!(self, Op::Prefetch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mem_tracer::{classify, InsertPoint, ProbeAction};

    #[test]
    fn test_effective_address() {
        let mut regs = [0u64; NUM_REGS];
        regs[3] = 0x1000;
        assert_eq!(Mem::at(3, 0x10).ea(&regs), 0x1010);
        assert_eq!(Mem::at(3, -8).ea(&regs), 0xff8);
        assert_eq!(Mem::abs(0x2000).ea(&regs), 0x2000);
    }

    #[test]
    fn test_call_is_traced_on_taken_branch_only() {
        let points: Vec<_> = classify(&Op::Call { target: 0 })
            .iter()
            .map(|p| (p.point, p.action))
            .collect();
        assert_eq!(
            points,
            vec![
                (InsertPoint::Before, ProbeAction::CaptureWrite),
                (InsertPoint::TakenBranch, ProbeAction::EmitWrite),
            ]
        );
    }

    #[test]
    fn test_gather_is_not_traced() {
        let op = Op::Gather {
            dst: 0,
            src: Mem::abs(0),
            size: 8,
        };
        assert!(op.is_memory_read());
        assert!(classify(&op).is_empty());
    }

    #[test]
    fn test_registers_and_targets() {
        let op = Op::CompareMem {
            flag: 1,
            a: Mem::at(2, 0),
            b: Mem::abs(0),
            size: 4,
        };
        assert_eq!(op.registers(), vec![1, 2]);
        assert_eq!(op.target(), None);
        assert_eq!(Op::BranchIfZero { reg: 4, target: 7 }.target(), Some(7));
    }
}
