//! Memory tracer tool
//!
//! Ties the classifier, the pending-write slots, the syscall decoder and
//! the record writer together behind the [`Tool`] callbacks.

use crate::classify::{classify, Probe, ProbeAction, ReadOperand};
use crate::config::{Platform, TraceConfig};
use crate::engine::{InstructionInfo, ProbeContext, Tool};
use crate::pending::PendingWrites;
use crate::syscall::SyscallDecoder;
use crate::trace::{MemoryEvent, TraceStats};
use crate::writer::TraceWriter;
use crate::{Result, TraceError};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Captures memory accesses and syscalls into a text trace
#[derive(Debug)]
pub struct MemTracer<W: Write> {
    writer: TraceWriter<W>,
    pending: PendingWrites,
    decoder: SyscallDecoder,
    finished: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    syscalls: AtomicU64,
}

impl<W: Write> MemTracer<W> {
    pub fn new(out: W, config: &TraceConfig, platform: Platform) -> Self {
        Self {
            writer: TraceWriter::new(out, config, platform),
            pending: PendingWrites::new(),
            decoder: SyscallDecoder::new(platform),
            finished: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            syscalls: AtomicU64::new(0),
        }
    }

    /// Syscall decoder, for registering extra argument layouts
    pub fn decoder_mut(&mut self) -> &mut SyscallDecoder {
        &mut self.decoder
    }

    /// Write the trace header
    pub fn begin(&self) -> Result<()> {
        self.writer.write_header()
    }

    /// Decode the syscall at `ctx` and emit its line
    pub fn record_syscall<C: ProbeContext>(&self, ctx: &C) -> Result<()> {
        let event = self.decoder.decode(ctx)?;
        tracing::trace!(
            "syscall {} at {:#x} args {:x?}",
            event.number,
            event.instruction_address,
            event.args
        );
        self.writer.write_syscall(&event)?;
        self.syscalls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Emit a read line for one read operand
    pub fn record_read<C: ProbeContext>(&self, ctx: &C, operand: ReadOperand, prefetch: bool) -> Result<()> {
        let event = MemoryEvent::read(
            ctx.instruction_pointer(),
            ctx.memory_read_ea(operand),
            ctx.memory_read_size(),
            prefetch,
        );
        let written = self.writer.write_memory(&event, ctx);
        count_line(&self.reads, &written);
        written
    }

    /// Park the write operand's address and size until the value exists
    pub fn capture_write<C: ProbeContext>(&self, ctx: &C) {
        self.pending
            .capture(ctx.thread_id(), ctx.memory_write_ea(), ctx.memory_write_size());
    }

    /// Emit the write parked by this thread, reading its value now
    pub fn emit_write<C: ProbeContext>(&self, ctx: &C) -> Result<()> {
        let Some(write) = self.pending.take(ctx.thread_id()) else {
            // Predicated-off store: the capture never fired.
            tracing::debug!(
                "No pending write for thread {} at {:#x}",
                ctx.thread_id(),
                ctx.instruction_pointer()
            );
            return Ok(());
        };

        let event = MemoryEvent::write(ctx.instruction_pointer(), write.address, write.size);
        let written = self.writer.write_memory(&event, ctx);
        count_line(&self.writes, &written);
        written
    }

    /// Write the trailer and flush. Returns `false` if already finished.
    pub fn finish(&self) -> Result<bool> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        if !self.pending.is_empty() {
            tracing::warn!("{} write(s) never reached an emission point", self.pending.len());
        }
        self.writer.write_trailer()?;
        Ok(true)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> TraceStats {
        TraceStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            syscalls: self.syscalls.load(Ordering::Relaxed),
        }
    }

    /// Recover the output stream
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

/// Count a memory line unless the output itself failed; a value fault
/// still leaves the line in the trace
fn count_line(counter: &AtomicU64, written: &Result<()>) {
    if !matches!(written, Err(TraceError::Io(_))) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl<W: Write> Tool for MemTracer<W> {
    fn instrument<I: InstructionInfo>(&self, ins: &I) -> Vec<Probe> {
        classify(ins)
    }

    fn on_probe<C: ProbeContext>(&self, probe: &Probe, ctx: &C) -> Result<()> {
        if self.is_finished() {
            tracing::warn!("Probe {:?} fired after the trace was finished", probe.action);
            return Err(TraceError::Finished);
        }

        match probe.action {
            ProbeAction::Syscall => self.record_syscall(ctx),
            ProbeAction::Read { operand, prefetch } => self.record_read(ctx, operand, prefetch),
            ProbeAction::CaptureWrite => {
                self.capture_write(ctx);
                Ok(())
            }
            ProbeAction::EmitWrite => self.emit_write(ctx),
        }
    }

    fn fini(&self, exit_code: i32) -> Result<()> {
        tracing::debug!("Traced program exited with code {}", exit_code);
        self.finish().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::InsertPoint;
    use crate::config::{Arch, Os};
    use crate::engine::{GuestMemory, ThreadId};
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Context with a little writable memory, so tests can change values
    /// between the before and after probes
    struct Ctx {
        tid: ThreadId,
        ip: u64,
        read_ea: [u64; 2],
        read_size: usize,
        write_ea: u64,
        write_size: usize,
        syscall: u64,
        args: [u64; 6],
        base: u64,
        memory: Vec<u8>,
    }

    impl Ctx {
        fn new() -> Self {
            Self {
                tid: 0,
                ip: 0x400000,
                read_ea: [0; 2],
                read_size: 0,
                write_ea: 0,
                write_size: 0,
                syscall: 0,
                args: [0; 6],
                base: 0x1000,
                memory: vec![0; 0x100],
            }
        }

        fn poke(&mut self, address: u64, bytes: &[u8]) {
            let start = (address - self.base) as usize;
            self.memory[start..start + bytes.len()].copy_from_slice(bytes);
        }
    }

    impl GuestMemory for Ctx {
        fn read_bytes(&self, address: u64, buf: &mut [u8]) -> Result<()> {
            let start = (address - self.base) as usize;
            buf.copy_from_slice(&self.memory[start..start + buf.len()]);
            Ok(())
        }
    }

    impl ProbeContext for Ctx {
        fn thread_id(&self) -> ThreadId {
            self.tid
        }
        fn instruction_pointer(&self) -> u64 {
            self.ip
        }
        fn memory_read_ea(&self, operand: ReadOperand) -> u64 {
            match operand {
                ReadOperand::First => self.read_ea[0],
                ReadOperand::Second => self.read_ea[1],
            }
        }
        fn memory_read_size(&self) -> usize {
            self.read_size
        }
        fn memory_write_ea(&self) -> u64 {
            self.write_ea
        }
        fn memory_write_size(&self) -> usize {
            self.write_size
        }
        fn syscall_number(&self) -> u64 {
            self.syscall
        }
        fn syscall_argument(&self, index: usize) -> u64 {
            self.args[index]
        }
    }

    fn tracer(emit_values: bool) -> MemTracer<Vec<u8>> {
        MemTracer::new(
            Vec::new(),
            &TraceConfig::new("unused", emit_values),
            Platform::new(Os::Linux, Arch::Intel64),
        )
    }

    fn lines(tracer: MemTracer<Vec<u8>>) -> Vec<String> {
        String::from_utf8(tracer.into_inner())
            .unwrap()
            .lines()
            .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect()
    }

    const CAPTURE: Probe = Probe {
        point: InsertPoint::Before,
        action: ProbeAction::CaptureWrite,
        predicated: true,
    };
    const EMIT: Probe = Probe {
        point: InsertPoint::After,
        action: ProbeAction::EmitWrite,
        predicated: false,
    };

    #[test]
    fn test_write_value_is_read_after_execution() {
        let t = tracer(true);
        let mut ctx = Ctx::new();
        ctx.write_ea = 0x1010;
        ctx.write_size = 4;
        ctx.poke(0x1010, &1u32.to_le_bytes());

        t.on_probe(&CAPTURE, &ctx).unwrap();
        // The instruction executes and changes both the value and the
        // context's notion of the write operand.
        ctx.poke(0x1010, &0xdeadbeefu32.to_le_bytes());
        ctx.write_ea = 0;
        t.on_probe(&EMIT, &ctx).unwrap();

        assert_eq!(t.stats().writes, 1);
        assert_eq!(lines(t), ["W 0x1010 4 0xdeadbeef"]);
    }

    #[test]
    fn test_emit_without_capture_emits_nothing() {
        let t = tracer(true);
        let ctx = Ctx::new();
        t.on_probe(&EMIT, &ctx).unwrap();
        assert_eq!(t.stats().total(), 0);
        assert!(lines(t).is_empty());
    }

    #[test]
    fn test_interleaved_threads_keep_their_writes() {
        let t = tracer(false);
        let mut a = Ctx::new();
        a.tid = 1;
        a.write_ea = 0x1000;
        a.write_size = 8;
        let mut b = Ctx::new();
        b.tid = 2;
        b.write_ea = 0x1080;
        b.write_size = 2;

        t.on_probe(&CAPTURE, &a).unwrap();
        t.on_probe(&CAPTURE, &b).unwrap();
        t.on_probe(&EMIT, &a).unwrap();
        t.on_probe(&EMIT, &b).unwrap();

        assert_eq!(lines(t), ["W 0x1000 8", "W 0x1080 2"]);
    }

    #[test]
    fn test_two_reads_share_the_read_size() {
        let t = tracer(true);
        let mut ctx = Ctx::new();
        ctx.read_ea = [0x1000, 0x1008];
        ctx.read_size = 1;
        ctx.poke(0x1000, &[0x11]);
        ctx.poke(0x1008, &[0x22]);

        t.record_read(&ctx, ReadOperand::First, false).unwrap();
        t.record_read(&ctx, ReadOperand::Second, false).unwrap();
        assert_eq!(lines(t), ["R 0x1000 1 0x11", "R 0x1008 1 0x22"]);
    }

    #[test]
    fn test_syscall_probe() {
        let t = tracer(true);
        let mut ctx = Ctx::new();
        ctx.syscall = 60;
        ctx.args = [3, 0, 0, 0, 0, 0];
        let probe = Probe::new(InsertPoint::Before, ProbeAction::Syscall);
        t.on_probe(&probe, &ctx).unwrap();
        assert_eq!(t.stats().syscalls, 1);
        assert_eq!(lines(t), ["SysCall 60"]);
    }

    #[test]
    fn test_concurrent_threads_never_split_lines() {
        const THREADS: u32 = 8;
        const ROUNDS: u64 = 200;

        let t = Arc::new(tracer(true));
        let handles: Vec<_> = (0..THREADS)
            .map(|tid| {
                let t = Arc::clone(&t);
                std::thread::spawn(move || {
                    let slot = 0x1000 + u64::from(tid) * 0x10;
                    let mut ctx = Ctx::new();
                    ctx.tid = tid;
                    ctx.write_ea = slot;
                    ctx.write_size = 8;
                    ctx.read_ea = [slot, slot];
                    ctx.read_size = 8;
                    for round in 1..=ROUNDS {
                        t.on_probe(&CAPTURE, &ctx).unwrap();
                        ctx.poke(slot, &((round << 8) | u64::from(tid)).to_le_bytes());
                        t.on_probe(&EMIT, &ctx).unwrap();
                        t.record_read(&ctx, ReadOperand::First, false).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let t = Arc::try_unwrap(t).ok().unwrap();
        let stats = t.stats();
        assert_eq!(stats.writes, u64::from(THREADS) * ROUNDS);
        assert_eq!(stats.reads, u64::from(THREADS) * ROUNDS);

        let text = String::from_utf8(t.into_inner()).unwrap();
        let hex = |field: &str| u64::from_str_radix(field.trim_start_matches("0x"), 16).unwrap();
        let mut per_thread: HashMap<u64, (u64, u64)> = HashMap::new();
        for line in text.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            assert_eq!(fields.len(), 4, "incomplete line {line:?}");
            assert_eq!(fields[2], "8");
            let tid = (hex(fields[1]) - 0x1000) / 0x10;
            // Every value carries the id of the thread that wrote it
            assert_eq!(hex(fields[3]) & 0xff, tid);

            let counts = per_thread.entry(tid).or_default();
            match fields[0] {
                "W" => counts.0 += 1,
                "R" => counts.1 += 1,
                other => panic!("unexpected tag {other:?}"),
            }
        }

        assert_eq!(text.lines().count() as u64, stats.total());
        assert_eq!(per_thread.len(), THREADS as usize);
        assert!(per_thread.values().all(|&counts| counts == (ROUNDS, ROUNDS)));
    }

    #[test]
    fn test_finish_is_idempotent_and_final() {
        let t = tracer(true);
        t.begin().unwrap();
        assert!(t.finish().unwrap());
        assert!(!t.finish().unwrap());
        t.fini(0).unwrap();

        let ctx = Ctx::new();
        assert!(matches!(t.on_probe(&EMIT, &ctx), Err(TraceError::Finished)));
        assert_eq!(lines(t), ["#", "# Memory Access Trace", "#", "#eof"]);
    }
}
