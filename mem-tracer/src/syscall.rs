//! Syscall argument decoding
//!
//! Arguments normally arrive in six registers. A few syscalls on a few
//! platforms pass a pointer to an argument block instead; those are kept
//! in a registry keyed by syscall number and platform so the general path
//! never branches on the target.

use crate::config::{Arch, Os, Platform};
use crate::engine::{GuestMemory, ProbeContext};
use crate::trace::SyscallEvent;
use crate::Result;
use std::collections::HashMap;

/// Number of argument registers captured per syscall
pub const SYSCALL_ARG_COUNT: usize = 6;

/// `mmap` on 32-bit Linux (the old_mmap entry, arguments by pointer)
pub const LINUX_IA32_MMAP: u64 = 90;

/// Where a syscall's arguments live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentLayout {
    /// The six argument registers, as captured
    Registers,
    /// Argument 0 points at six consecutive pointer-width words
    IndirectBlock,
}

/// Normalises raw syscall arguments for one target platform
#[derive(Debug, Clone)]
pub struct SyscallDecoder {
    platform: Platform,
    layouts: HashMap<(u64, Platform), ArgumentLayout>,
}

impl SyscallDecoder {
    /// Decoder with the built-in special cases
    pub fn new(platform: Platform) -> Self {
        let mut decoder = Self::without_special_cases(platform);
        decoder.register(
            LINUX_IA32_MMAP,
            Platform::new(Os::Linux, Arch::Ia32),
            ArgumentLayout::IndirectBlock,
        );
        decoder
    }

    /// Decoder that uses the register layout for every syscall
    pub fn without_special_cases(platform: Platform) -> Self {
        Self {
            platform,
            layouts: HashMap::new(),
        }
    }

    /// Add or replace the layout of `number` on `platform`
    pub fn register(&mut self, number: u64, platform: Platform, layout: ArgumentLayout) {
        self.layouts.insert((number, platform), layout);
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Layout of `number` on this decoder's platform
    pub fn layout(&self, number: u64) -> ArgumentLayout {
        self.layouts
            .get(&(number, self.platform))
            .copied()
            .unwrap_or(ArgumentLayout::Registers)
    }

    /// Decode the syscall the context is stopped at
    pub fn decode<C: ProbeContext>(&self, ctx: &C) -> Result<SyscallEvent> {
        let raw = std::array::from_fn(|i| ctx.syscall_argument(i));
        self.decode_raw(ctx.instruction_pointer(), ctx.syscall_number(), raw, ctx)
    }

    /// Decode from already-captured registers
    ///
    /// The argument block pointer is not validated; an unreadable block
    /// surfaces as the memory fault the guest itself would take.
    pub fn decode_raw<M: GuestMemory + ?Sized>(
        &self,
        instruction_address: u64,
        number: u64,
        raw: [u64; SYSCALL_ARG_COUNT],
        memory: &M,
    ) -> Result<SyscallEvent> {
        let args = match self.layout(number) {
            ArgumentLayout::Registers => raw,
            ArgumentLayout::IndirectBlock => {
                tracing::debug!(
                    "Syscall {} reads its arguments from block at {:#x}",
                    number,
                    raw[0]
                );
                read_argument_block(memory, raw[0], self.platform.arch.pointer_bytes())?
            }
        };

        Ok(SyscallEvent {
            instruction_address,
            number,
            args,
        })
    }
}

/// Read six little-endian words of `word_bytes` each starting at `address`
fn read_argument_block<M: GuestMemory + ?Sized>(
    memory: &M,
    address: u64,
    word_bytes: usize,
) -> Result<[u64; SYSCALL_ARG_COUNT]> {
    let mut block = vec![0u8; word_bytes * SYSCALL_ARG_COUNT];
    memory.read_bytes(address, &mut block)?;

    let mut args = [0u64; SYSCALL_ARG_COUNT];
    for (arg, word) in args.iter_mut().zip(block.chunks_exact(word_bytes)) {
        let mut buf = [0u8; 8];
        buf[..word_bytes].copy_from_slice(word);
        *arg = u64::from_le_bytes(buf);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TraceError;

    /// Flat memory starting at `base`
    struct FlatMemory {
        base: u64,
        bytes: Vec<u8>,
    }

    impl GuestMemory for FlatMemory {
        fn read_bytes(&self, address: u64, buf: &mut [u8]) -> Result<()> {
            let fault = TraceError::MemoryFault {
                address,
                len: buf.len(),
            };
            let start = address.checked_sub(self.base).ok_or(fault)? as usize;
            let src = self
                .bytes
                .get(start..start + buf.len())
                .ok_or(TraceError::MemoryFault {
                    address,
                    len: buf.len(),
                })?;
            buf.copy_from_slice(src);
            Ok(())
        }
    }

    fn ia32_block(base: u64, words: [u32; 6]) -> FlatMemory {
        FlatMemory {
            base,
            bytes: words.iter().flat_map(|w| w.to_le_bytes()).collect(),
        }
    }

    #[test]
    fn test_register_layout_passes_through() {
        let decoder = SyscallDecoder::new(Platform::new(Os::Linux, Arch::Intel64));
        let memory = FlatMemory {
            base: 0,
            bytes: vec![],
        };
        let event = decoder
            .decode_raw(0x401000, 9, [1, 2, 3, 4, 5, 6], &memory)
            .unwrap();
        assert_eq!(event.number, 9);
        assert_eq!(event.instruction_address, 0x401000);
        assert_eq!(event.args, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_ia32_mmap_reads_argument_block() {
        let decoder = SyscallDecoder::new(Platform::new(Os::Linux, Arch::Ia32));
        let memory = ia32_block(0x8000, [0, 0x1000, 3, 0x22, 0xffff_ffff, 0]);
        let event = decoder
            .decode_raw(0x1234, LINUX_IA32_MMAP, [0x8000, 9, 9, 9, 9, 9], &memory)
            .unwrap();
        assert_eq!(event.args, [0, 0x1000, 3, 0x22, 0xffff_ffff, 0]);
    }

    #[test]
    fn test_mmap_number_on_other_platforms_is_untouched() {
        let memory = ia32_block(0x8000, [7; 6]);
        for platform in [
            Platform::new(Os::Linux, Arch::Intel64),
            Platform::new(Os::MacOs, Arch::Ia32),
        ] {
            let decoder = SyscallDecoder::new(platform);
            assert_eq!(decoder.layout(LINUX_IA32_MMAP), ArgumentLayout::Registers);
            let event = decoder
                .decode_raw(0, LINUX_IA32_MMAP, [0x8000, 1, 2, 3, 4, 5], &memory)
                .unwrap();
            assert_eq!(event.args, [0x8000, 1, 2, 3, 4, 5]);
        }
    }

    #[test]
    fn test_unreadable_block_is_a_fault() {
        let decoder = SyscallDecoder::new(Platform::new(Os::Linux, Arch::Ia32));
        let memory = ia32_block(0x8000, [0; 6]);
        let err = decoder
            .decode_raw(0, LINUX_IA32_MMAP, [0x9000, 0, 0, 0, 0, 0], &memory)
            .unwrap_err();
        assert!(matches!(err, TraceError::MemoryFault { address: 0x9000, len: 24 }));
    }

    #[test]
    fn test_registered_special_case() {
        let platform = Platform::new(Os::Linux, Arch::Intel64);
        let mut decoder = SyscallDecoder::without_special_cases(platform);
        decoder.register(500, platform, ArgumentLayout::IndirectBlock);

        let memory = FlatMemory {
            base: 0x100,
            bytes: [10u64, 20, 30, 40, 50, 60]
                .iter()
                .flat_map(|w| w.to_le_bytes())
                .collect(),
        };
        let event = decoder.decode_raw(0, 500, [0x100, 0, 0, 0, 0, 0], &memory).unwrap();
        assert_eq!(event.args, [10, 20, 30, 40, 50, 60]);
        assert_eq!(decoder.layout(501), ArgumentLayout::Registers);
    }
}
