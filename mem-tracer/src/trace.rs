//! Data structures for captured events

use serde::{Deserialize, Serialize};

/// Direction of a memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    /// Tag written at the start of a memory line
    pub fn tag(self) -> char {
        match self {
            Direction::Read => 'R',
            Direction::Write => 'W',
        }
    }

    /// Inverse of [`Direction::tag`]
    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'R' => Some(Direction::Read),
            'W' => Some(Direction::Write),
            _ => None,
        }
    }
}

/// One memory operand of one dynamic instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEvent {
    /// Read or write
    pub direction: Direction,
    /// Address of the instruction performing the access
    pub instruction_address: u64,
    /// Runtime address the operand resolved to
    pub effective_address: u64,
    /// Operand width in bytes
    pub size: usize,
    /// Prefetch operands never carry a value
    pub is_prefetch: bool,
}

impl MemoryEvent {
    pub fn read(instruction_address: u64, effective_address: u64, size: usize, is_prefetch: bool) -> Self {
        Self {
            direction: Direction::Read,
            instruction_address,
            effective_address,
            size,
            is_prefetch,
        }
    }

    pub fn write(instruction_address: u64, effective_address: u64, size: usize) -> Self {
        Self {
            direction: Direction::Write,
            instruction_address,
            effective_address,
            size,
            is_prefetch: false,
        }
    }
}

/// One dynamic system call entry, with its arguments already decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallEvent {
    /// Address of the syscall instruction
    pub instruction_address: u64,
    /// Syscall number
    pub number: u64,
    /// The six platform-width arguments
    pub args: [u64; 6],
}

/// Running totals of emitted lines by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStats {
    pub reads: u64,
    pub writes: u64,
    pub syscalls: u64,
}

impl TraceStats {
    /// Total number of event lines
    pub fn total(&self) -> u64 {
        self.reads + self.writes + self.syscalls
    }
}
