//! Event classifier
//!
//! Maps a static instruction to the probes the engine must attach to it.

use crate::engine::InstructionInfo;
use serde::{Deserialize, Serialize};

/// Where a probe fires relative to its instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InsertPoint {
    Before,
    /// On the fall-through path after execution
    After,
    /// On the taken edge of a branch or call
    TakenBranch,
}

/// Which of the two read operands a probe refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadOperand {
    First,
    Second,
}

/// What a probe does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeAction {
    /// Decode and emit a syscall line
    Syscall,
    /// Emit a read line for one read operand
    Read { operand: ReadOperand, prefetch: bool },
    /// Remember the write operand's address and size
    CaptureWrite,
    /// Emit the write line for the remembered operand
    EmitWrite,
}

/// One callback attached to an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Probe {
    pub point: InsertPoint,
    pub action: ProbeAction,
    /// Fire only if the instruction's predicate holds for this execution
    pub predicated: bool,
}

impl Probe {
    pub fn new(point: InsertPoint, action: ProbeAction) -> Self {
        Self {
            point,
            action,
            predicated: false,
        }
    }

    pub fn predicated(point: InsertPoint, action: ProbeAction) -> Self {
        Self {
            point,
            action,
            predicated: true,
        }
    }
}

/// Probes for `ins`, in the order they must fire at each insert point
pub fn classify<I: InstructionInfo + ?Sized>(ins: &I) -> Vec<Probe> {
    let mut probes = Vec::new();

    if ins.is_syscall() && ins.has_fall_through() {
        probes.push(Probe::new(InsertPoint::Before, ProbeAction::Syscall));
    }

    let standard = ins.is_standard_memop();
    let prefetch = ins.is_prefetch();

    if ins.is_memory_read() && standard {
        probes.push(Probe::predicated(
            InsertPoint::Before,
            ProbeAction::Read {
                operand: ReadOperand::First,
                prefetch,
            },
        ));
    }

    if ins.has_memory_read2() && standard {
        probes.push(Probe::predicated(
            InsertPoint::Before,
            ProbeAction::Read {
                operand: ReadOperand::Second,
                prefetch,
            },
        ));
    }

    if ins.is_memory_write() && standard {
        // The address is only valid before execution; the value only after.
        probes.push(Probe::predicated(InsertPoint::Before, ProbeAction::CaptureWrite));

        if ins.has_fall_through() {
            probes.push(Probe::new(InsertPoint::After, ProbeAction::EmitWrite));
        }
        if ins.is_branch_or_call() {
            probes.push(Probe::new(InsertPoint::TakenBranch, ProbeAction::EmitWrite));
        }
    }

    probes
}
