//! Guest machine and its instrumentation engine
//!
//! Runs a program over flat guest memory with any number of cooperatively
//! scheduled threads, calling into a [`Tool`] the way a binary
//! instrumentation engine would: each static instruction is instrumented
//! once, and its probes fire before execution, after a fall-through, or on
//! a taken branch.

use crate::isa::{Op, Reg, INSN_SIZE, NUM_REGS, SP};
use crate::{MachineError, Result};
use mem_tracer::{
    usage, Arch, Engine, GuestMemory, InsertPoint, Os, Platform, Probe, ProbeContext,
    ReadOperand, ThreadId, Tool, TraceError,
};
use std::collections::HashMap;

/// Where instruction 0 lives in the guest address space
pub const DEFAULT_CODE_BASE: u64 = 0x40_0000;

/// Exit code of a program killed by a memory fault (128 + SIGSEGV)
pub const FAULT_EXIT_CODE: i32 = 139;

/// Exit code of a program stopped by the step limit (128 + SIGKILL)
pub const KILLED_EXIT_CODE: i32 = 137;

/// Flat, little-endian guest memory
#[derive(Debug, Clone)]
pub struct GuestRam {
    base: u64,
    bytes: Vec<u8>,
}

impl GuestRam {
    pub fn new(base: u64, size: usize) -> Self {
        Self {
            base,
            bytes: vec![0; size],
        }
    }

    pub fn write_bytes(&mut self, address: u64, data: &[u8]) -> mem_tracer::Result<()> {
        let range = self.range(address, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Read `size` (at most 8) bytes as a zero-extended integer
    pub fn read_uint(&self, address: u64, size: usize) -> mem_tracer::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_bytes(address, &mut buf[..size])?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Write the low `size` (at most 8) bytes of `value`
    pub fn write_uint(&mut self, address: u64, size: usize, value: u64) -> mem_tracer::Result<()> {
        self.write_bytes(address, &value.to_le_bytes()[..size])
    }

    fn range(&self, address: u64, len: usize) -> mem_tracer::Result<std::ops::Range<usize>> {
        let fault = || TraceError::MemoryFault { address, len };
        let start = address.checked_sub(self.base).ok_or_else(fault)?;
        let end = start.checked_add(len as u64).ok_or_else(fault)?;
        if end > self.bytes.len() as u64 {
            return Err(fault());
        }
        Ok(start as usize..end as usize)
    }
}

impl GuestMemory for GuestRam {
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> mem_tracer::Result<()> {
        let range = self.range(address, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }
}

/// Architectural state of one guest thread
#[derive(Debug, Clone)]
pub struct GuestThread {
    pub tid: ThreadId,
    pub regs: [u64; NUM_REGS],
    pub pc: usize,
    pub exit_code: Option<i32>,
}

/// Memory operands of one dynamic instruction, resolved before it executes
#[derive(Debug, Clone, Copy, Default)]
struct Operands {
    read_ea: [u64; 2],
    read_size: usize,
    write_ea: u64,
    write_size: usize,
    /// False when a predicated instruction skips its memory operand
    predicate: bool,
}

/// How control left an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    FallThrough,
    Taken,
    /// `exit`: only this thread stops
    Exit(i32),
    /// `exit_group`: every thread stops
    ExitGroup(i32),
    Fault,
}

/// What one scheduled step did to its thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Running,
    Exited(i32),
    GroupExited(i32),
    Faulted,
}

/// A guest program loaded into memory, ready to run
#[derive(Debug)]
pub struct Machine {
    program: Vec<Op>,
    code_base: u64,
    ram: GuestRam,
    platform: Platform,
    threads: Vec<GuestThread>,
    quantum: usize,
    max_steps: u64,
}

impl Machine {
    /// Load `program` with `memory_size` bytes of RAM at `memory_base`
    ///
    /// Rejects programs that name unknown registers, jump outside the
    /// program, or use a register-sized operand wider than 8 bytes.
    pub fn new(program: Vec<Op>, memory_base: u64, memory_size: usize, platform: Platform) -> Result<Self> {
        for (pc, op) in program.iter().enumerate() {
            if let Some(reg) = op.registers().into_iter().find(|&r| r >= NUM_REGS) {
                return Err(MachineError::InvalidRegister { pc, reg });
            }
            if let Some(target) = op.target().filter(|&t| t >= program.len()) {
                return Err(MachineError::InvalidTarget { pc, target });
            }
            if let Some(size) = op.scalar_size().filter(|s| !(1..=8).contains(s)) {
                return Err(MachineError::InvalidSize { pc, size });
            }
        }

        Ok(Self {
            program,
            code_base: DEFAULT_CODE_BASE,
            ram: GuestRam::new(memory_base, memory_size),
            platform,
            threads: Vec::new(),
            quantum: 1,
            max_steps: 1_000_000,
        })
    }

    /// Instructions each thread runs before the next one is scheduled
    pub fn with_quantum(mut self, quantum: usize) -> Self {
        self.quantum = quantum.max(1);
        self
    }

    /// Total instructions after which the program is killed
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Start a thread at `entry` with stack pointer `stack_top`
    pub fn spawn(&mut self, entry: usize, stack_top: u64) -> Result<ThreadId> {
        if entry >= self.program.len() {
            return Err(MachineError::InvalidTarget {
                pc: entry,
                target: entry,
            });
        }
        let tid = self.threads.len() as ThreadId;
        let mut regs = [0u64; NUM_REGS];
        regs[SP] = stack_top;
        self.threads.push(GuestThread {
            tid,
            regs,
            pc: entry,
            exit_code: None,
        });
        Ok(tid)
    }

    /// Set a register of a spawned thread
    pub fn set_register(&mut self, tid: ThreadId, reg: Reg, value: u64) -> Result<()> {
        let thread = self
            .threads
            .get_mut(tid as usize)
            .ok_or(MachineError::UnknownThread(tid))?;
        let slot = thread
            .regs
            .get_mut(reg)
            .ok_or(MachineError::InvalidRegister { pc: thread.pc, reg })?;
        *slot = value;
        Ok(())
    }

    /// Initialise guest memory
    pub fn load(&mut self, address: u64, data: &[u8]) -> Result<()> {
        self.ram.write_bytes(address, data).map_err(|_| MachineError::OutOfMemory {
            address,
            len: data.len(),
        })
    }

    pub fn ram(&self) -> &GuestRam {
        &self.ram
    }

    pub fn threads(&self) -> &[GuestThread] {
        &self.threads
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Guest address of instruction `pc`
    pub fn instruction_address(&self, pc: usize) -> u64 {
        self.code_base + pc as u64 * INSN_SIZE
    }

    fn pointer_bytes(&self) -> usize {
        self.platform.arch.pointer_bytes()
    }

    fn exit_flow(&self, number: u64, code: i32) -> Option<Flow> {
        match (self.platform.arch, number) {
            (Arch::Intel64, 60) | (Arch::Ia32, 1) => Some(Flow::Exit(code)),
            (Arch::Intel64, 231) | (Arch::Ia32, 252) => Some(Flow::ExitGroup(code)),
            _ => None,
        }
    }

    fn operands(&self, op: &Op, regs: &[u64; NUM_REGS]) -> Operands {
        let mut ops = Operands {
            predicate: true,
            ..Operands::default()
        };
        let ptr = self.pointer_bytes();
        match *op {
            Op::Load { src, size, .. } | Op::Gather { src, size, .. } | Op::Prefetch { src, size } => {
                ops.read_ea[0] = src.ea(regs);
                ops.read_size = size;
            }
            Op::LoadIf { pred, src, size, .. } => {
                ops.read_ea[0] = src.ea(regs);
                ops.read_size = size;
                ops.predicate = regs[pred] != 0;
            }
            Op::Store { dst, size, .. } => {
                ops.write_ea = dst.ea(regs);
                ops.write_size = size;
            }
            Op::StoreIf { pred, dst, size, .. } => {
                ops.write_ea = dst.ea(regs);
                ops.write_size = size;
                ops.predicate = regs[pred] != 0;
            }
            Op::Copy { dst, src, size } => {
                ops.read_ea[0] = src.ea(regs);
                ops.read_size = size;
                ops.write_ea = dst.ea(regs);
                ops.write_size = size;
            }
            Op::CompareMem { a, b, size, .. } => {
                ops.read_ea = [a.ea(regs), b.ea(regs)];
                ops.read_size = size;
            }
            Op::Call { .. } => {
                ops.write_ea = regs[SP].wrapping_sub(ptr as u64);
                ops.write_size = ptr;
            }
            Op::Ret => {
                ops.read_ea[0] = regs[SP];
                ops.read_size = ptr;
            }
            Op::DecBranchNz { counter, size, .. } => {
                let ea = counter.ea(regs);
                ops.read_ea[0] = ea;
                ops.read_size = size;
                ops.write_ea = ea;
                ops.write_size = size;
            }
            Op::MovImm { .. } | Op::Add { .. } | Op::Jump { .. } | Op::BranchIfZero { .. } => {}
            Op::Syscall | Op::Halt => {}
        }
        ops
    }

    /// Execute one instruction of thread `idx`
    fn execute(&mut self, idx: usize, op: Op, ops: &Operands) -> mem_tracer::Result<Flow> {
        let ptr = self.pointer_bytes();
        let next_ip = self.instruction_address(self.threads[idx].pc + 1);
        let regs = self.threads[idx].regs;
        let mut flow = Flow::FallThrough;

        match op {
            Op::MovImm { dst, imm } => self.threads[idx].regs[dst] = imm,
            Op::Add { dst, src } => {
                self.threads[idx].regs[dst] = regs[dst].wrapping_add(regs[src]);
            }
            Op::Load { dst, size, .. } | Op::Gather { dst, size, .. } => {
                self.threads[idx].regs[dst] = self.ram.read_uint(ops.read_ea[0], size)?;
            }
            Op::LoadIf { dst, size, .. } => {
                if ops.predicate {
                    self.threads[idx].regs[dst] = self.ram.read_uint(ops.read_ea[0], size)?;
                }
            }
            Op::Store { src, size, .. } => self.ram.write_uint(ops.write_ea, size, regs[src])?,
            Op::StoreIf { src, size, .. } => {
                if ops.predicate {
                    self.ram.write_uint(ops.write_ea, size, regs[src])?;
                }
            }
            Op::Copy { size, .. } => {
                let mut buf = vec![0u8; size];
                self.ram.read_bytes(ops.read_ea[0], &mut buf)?;
                self.ram.write_bytes(ops.write_ea, &buf)?;
            }
            Op::CompareMem { flag, size, .. } => {
                let mut a = vec![0u8; size];
                let mut b = vec![0u8; size];
                self.ram.read_bytes(ops.read_ea[0], &mut a)?;
                self.ram.read_bytes(ops.read_ea[1], &mut b)?;
                self.threads[idx].regs[flag] = u64::from(a == b);
            }
            Op::Prefetch { .. } => {}
            Op::Call { target } => {
                self.ram.write_uint(ops.write_ea, ptr, next_ip)?;
                let thread = &mut self.threads[idx];
                thread.regs[SP] = ops.write_ea;
                thread.pc = target;
                return Ok(Flow::Taken);
            }
            Op::Ret => {
                let return_ip = self.ram.read_uint(ops.read_ea[0], ptr)?;
                let Some(pc) = self.pc_of(return_ip) else {
                    tracing::warn!("Return to non-code address {:#x}", return_ip);
                    return Ok(Flow::Fault);
                };
                let thread = &mut self.threads[idx];
                thread.regs[SP] = regs[SP].wrapping_add(ptr as u64);
                thread.pc = pc;
                return Ok(Flow::Taken);
            }
            Op::Jump { target } => {
                self.threads[idx].pc = target;
                return Ok(Flow::Taken);
            }
            Op::BranchIfZero { reg, target } => {
                if regs[reg] == 0 {
                    self.threads[idx].pc = target;
                    return Ok(Flow::Taken);
                }
            }
            Op::DecBranchNz { size, target, .. } => {
                let value = self.ram.read_uint(ops.read_ea[0], size)?.wrapping_sub(1);
                self.ram.write_uint(ops.write_ea, size, value)?;
                let mask = if size == 8 { u64::MAX } else { (1u64 << (size * 8)) - 1 };
                if value & mask != 0 {
                    self.threads[idx].pc = target;
                    return Ok(Flow::Taken);
                }
            }
            Op::Syscall => match self.exit_flow(regs[0], regs[1] as i32) {
                Some(exit) => flow = exit,
                None => self.threads[idx].regs[0] = 0,
            },
            Op::Halt => return Ok(Flow::Exit(regs[0] as i32)),
        }

        if flow == Flow::FallThrough {
            self.threads[idx].pc += 1;
        }
        Ok(flow)
    }

    fn pc_of(&self, address: u64) -> Option<usize> {
        let offset = address.checked_sub(self.code_base)?;
        if offset % INSN_SIZE != 0 {
            return None;
        }
        let pc = (offset / INSN_SIZE) as usize;
        (pc < self.program.len()).then_some(pc)
    }

    /// Run one instruction of thread `idx` with its probes
    fn step<T: Tool>(
        &mut self,
        idx: usize,
        tool: &T,
        plans: &mut HashMap<usize, Vec<Probe>>,
    ) -> mem_tracer::Result<Outcome> {
        let pc = self.threads[idx].pc;
        let Some(op) = self.program.get(pc).copied() else {
            tracing::warn!("Thread {} ran off the end of the program", self.threads[idx].tid);
            return Ok(Outcome::Faulted);
        };

        let probes: &[Probe] = plans.entry(pc).or_insert_with(|| {
            let probes = tool.instrument(&op);
            tracing::debug!("Instrumented {:?} at pc {} with {} probe(s)", op, pc, probes.len());
            probes
        });

        let ip = self.instruction_address(pc);
        let ops = self.operands(&op, &self.threads[idx].regs);

        self.fire(tool, probes, InsertPoint::Before, idx, ip, &ops)?;

        let flow = match self.execute(idx, op, &ops) {
            Ok(flow) => flow,
            Err(TraceError::MemoryFault { address, len }) => {
                tracing::warn!(
                    "Guest fault at {:#x}: {} byte access to {:#x}",
                    ip,
                    len,
                    address
                );
                return Ok(Outcome::Faulted);
            }
            Err(err) => return Err(err),
        };

        match flow {
            Flow::FallThrough => self.fire(tool, probes, InsertPoint::After, idx, ip, &ops)?,
            Flow::Taken => self.fire(tool, probes, InsertPoint::TakenBranch, idx, ip, &ops)?,
            Flow::Exit(code) => return Ok(Outcome::Exited(code)),
            Flow::ExitGroup(code) => return Ok(Outcome::GroupExited(code)),
            Flow::Fault => return Ok(Outcome::Faulted),
        }
        Ok(Outcome::Running)
    }

    fn fire<T: Tool>(
        &self,
        tool: &T,
        probes: &[Probe],
        point: InsertPoint,
        idx: usize,
        ip: u64,
        ops: &Operands,
    ) -> mem_tracer::Result<()> {
        let ctx = SimContext {
            ram: &self.ram,
            thread: &self.threads[idx],
            ip,
            ops,
        };
        for probe in probes.iter().filter(|p| p.point == point) {
            if probe.predicated && !ops.predicate {
                continue;
            }
            tool.on_probe(probe, &ctx)?;
        }
        Ok(())
    }
}

impl Engine for Machine {
    fn init(&mut self) -> mem_tracer::Result<()> {
        if self.program.is_empty() {
            return Err(TraceError::EngineInit(format!("empty program\n{}", usage())));
        }
        if self.threads.is_empty() {
            return Err(TraceError::EngineInit(format!("no thread to run\n{}", usage())));
        }
        Ok(())
    }

    fn start_program<T: Tool>(&mut self, tool: &T) -> mem_tracer::Result<i32> {
        self.init()?;

        tracing::info!(
            "Starting guest program: {} instructions, {} thread(s)",
            self.program.len(),
            self.threads.len()
        );

        let mut plans = HashMap::new();
        let mut exit_code = 0;
        let mut steps = 0u64;

        'run: while self.threads.iter().any(|t| t.exit_code.is_none()) {
            for idx in 0..self.threads.len() {
                for _ in 0..self.quantum {
                    if self.threads[idx].exit_code.is_some() {
                        break;
                    }
                    if steps >= self.max_steps {
                        tracing::warn!("Step limit {} reached, killing program", self.max_steps);
                        exit_code = KILLED_EXIT_CODE;
                        self.kill_all(exit_code);
                        break 'run;
                    }
                    steps += 1;

                    let outcome = match self.step(idx, tool, &mut plans) {
                        Ok(outcome) => outcome,
                        // A probe dereferenced bad guest memory: the guest takes the fault.
                        Err(TraceError::MemoryFault { address, .. }) => {
                            tracing::warn!("Probe faulted on guest address {:#x}", address);
                            Outcome::Faulted
                        }
                        Err(err) => return Err(err),
                    };

                    match outcome {
                        Outcome::Running => {}
                        Outcome::Exited(code) => {
                            tracing::debug!("Thread {} exited with {}", self.threads[idx].tid, code);
                            self.threads[idx].exit_code = Some(code);
                            exit_code = code;
                        }
                        Outcome::GroupExited(code) => {
                            tracing::debug!("Thread {} ended the process with {}", self.threads[idx].tid, code);
                            exit_code = code;
                            self.kill_all(code);
                            break 'run;
                        }
                        Outcome::Faulted => {
                            exit_code = FAULT_EXIT_CODE;
                            self.kill_all(exit_code);
                            break 'run;
                        }
                    }
                }
            }
        }

        tracing::info!("Guest program finished after {} steps, exit code {}", steps, exit_code);
        tool.fini(exit_code)?;
        Ok(exit_code)
    }
}

impl Machine {
    fn kill_all(&mut self, code: i32) {
        for thread in self.threads.iter_mut().filter(|t| t.exit_code.is_none()) {
            thread.exit_code = Some(code);
        }
    }
}

/// Probe view of one dynamic instruction
struct SimContext<'a> {
    ram: &'a GuestRam,
    thread: &'a GuestThread,
    ip: u64,
    ops: &'a Operands,
}

impl GuestMemory for SimContext<'_> {
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> mem_tracer::Result<()> {
        self.ram.read_bytes(address, buf)
    }
}

impl ProbeContext for SimContext<'_> {
    fn thread_id(&self) -> ThreadId {
        self.thread.tid
    }

    fn instruction_pointer(&self) -> u64 {
        self.ip
    }

    fn memory_read_ea(&self, operand: ReadOperand) -> u64 {
        match operand {
            ReadOperand::First => self.ops.read_ea[0],
            ReadOperand::Second => self.ops.read_ea[1],
        }
    }

    fn memory_read_size(&self) -> usize {
        self.ops.read_size
    }

    fn memory_write_ea(&self) -> u64 {
        self.ops.write_ea
    }

    fn memory_write_size(&self) -> usize {
        self.ops.write_size
    }

    fn syscall_number(&self) -> u64 {
        self.thread.regs[0]
    }

    fn syscall_argument(&self, index: usize) -> u64 {
        self.thread.regs.get(1 + index).copied().unwrap_or(0)
    }
}

/// Linux x86-64, the default guest platform
pub fn default_platform() -> Platform {
    Platform::new(Os::Linux, Arch::Intel64)
}
