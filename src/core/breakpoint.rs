//! Address-conditional breakpoint registry (spec.md §4.2).
//!
//! Grounded in `original_source/breakpoint.c`: entries are gated at
//! `add()` time by machine architecture and ROM CRC, then dispatched
//! from the CPU's instruction-fetch hook (or, for watchpoints, from the
//! bus read/write hooks). A handler may add or remove breakpoints —
//! including the one currently firing — so dispatch snapshots the
//! remaining work before invoking the handler and restarts the scan if
//! `PC` moved underneath it, exactly as `bp_instruction_hook` does.

use crate::crc::{crc32_block, CRC32_RESET};

/// Which machine architectures a breakpoint is valid on (`BP_DRAGON` /
/// `BP_COCO` in the original).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchMask(pub u8);
impl ArchMask {
    pub const DRAGON: ArchMask = ArchMask(1 << 0);
    pub const COCO: ArchMask = ArchMask(1 << 1);
    pub const BOTH: ArchMask = ArchMask(Self::DRAGON.0 | Self::COCO.0);

    pub fn contains(self, arch: ArchMask) -> bool {
        self.0 & arch.0 == arch.0
    }
}

/// Gate on a named CRC list membership (spec.md §4.2), checked against
/// a slice of the currently-installed ROM.
pub struct CrcCondition {
    pub rom_offset: usize,
    pub length: usize,
    pub expect_crc: u32,
}

impl CrcCondition {
    fn matches(&self, rom: &[u8]) -> bool {
        let end = (self.rom_offset + self.length).min(rom.len());
        if self.rom_offset >= end {
            return false;
        }
        crc32_block(CRC32_RESET, &rom[self.rom_offset..end]) == self.expect_crc
    }
}

/// Gates installation: the breakpoint is silently dropped by `add()` if
/// this condition is not satisfied.
pub struct InstallCondition {
    pub arch: ArchMask,
    pub crc: Option<CrcCondition>,
}

impl Default for InstallCondition {
    fn default() -> Self {
        Self {
            arch: ArchMask::BOTH,
            crc: None,
        }
    }
}

/// SAM-register qualifier: the breakpoint only matches while
/// `(sam_bits & match_mask) == match_cond`, e.g. "ROM banked in, page 0".
#[derive(Debug, Clone, Copy, Default)]
pub struct SamQualifier {
    pub match_mask: u16,
    pub match_cond: u16,
}

impl SamQualifier {
    fn matches(&self, sam_register: u16) -> bool {
        (sam_register & self.match_mask) == self.match_cond
    }
}

pub type Handler<Ctx> = Box<dyn FnMut(&mut Ctx, u16)>;

struct Breakpoint<Ctx> {
    address: u16,
    address_end: u16,
    qualifier: SamQualifier,
    handler: Handler<Ctx>,
}

/// One of the registry's three lists (spec.md §3 "Breakpoint").
#[derive(Default)]
struct BreakpointList<Ctx> {
    entries: Vec<Breakpoint<Ctx>>,
}

impl<Ctx> BreakpointList<Ctx> {
    fn add(&mut self, bp: Breakpoint<Ctx>) {
        self.entries.push(bp);
    }

    fn remove_at(&mut self, address: u16) {
        self.entries.retain(|b| b.address != address);
    }
}

/// The registry, parameterised over the context type handlers receive
/// (in practice [`crate::machine::Machine`]); kept generic so the
/// registry can be unit-tested without constructing a whole machine.
#[derive(Default)]
pub struct BreakpointRegistry<Ctx> {
    instruction: BreakpointList<Ctx>,
    watch_read: BreakpointList<Ctx>,
    watch_write: BreakpointList<Ctx>,
}

impl<Ctx> BreakpointRegistry<Ctx> {
    pub fn new() -> Self {
        Self {
            instruction: BreakpointList::default(),
            watch_read: BreakpointList::default(),
            watch_write: BreakpointList::default(),
        }
    }

    /// Attempt to install an instruction breakpoint. Silently skipped
    /// if `condition` is not satisfied by `arch`/`rom`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_instruction(
        &mut self,
        address: u16,
        address_end: u16,
        qualifier: SamQualifier,
        condition: &InstallCondition,
        arch: ArchMask,
        rom: &[u8],
        handler: Handler<Ctx>,
    ) {
        if !condition.arch.contains(arch) {
            return;
        }
        if let Some(crc) = &condition.crc {
            if !crc.matches(rom) {
                return;
            }
        }
        self.instruction.add(Breakpoint {
            address,
            address_end,
            qualifier,
            handler,
        });
    }

    pub fn add_watch_read(&mut self, address: u16, address_end: u16, handler: Handler<Ctx>) {
        self.watch_read.add(Breakpoint {
            address,
            address_end,
            qualifier: SamQualifier::default(),
            handler,
        });
    }

    pub fn add_watch_write(&mut self, address: u16, address_end: u16, handler: Handler<Ctx>) {
        self.watch_write.add(Breakpoint {
            address,
            address_end,
            qualifier: SamQualifier::default(),
            handler,
        });
    }

    pub fn remove_instruction(&mut self, address: u16) {
        self.instruction.remove_at(address);
    }

    pub fn has_instruction_breakpoints(&self) -> bool {
        !self.instruction.entries.is_empty()
    }

    /// Dispatch the instruction hook. `pc_of` reads the context's
    /// current PC; a handler may change it, in which case the scan
    /// restarts from the top (spec.md §4.2 "trap + continue").
    pub fn dispatch_instruction(&mut self, ctx: &mut Ctx, sam_register: u16, pc_of: impl Fn(&Ctx) -> u16) {
        let mut pc = pc_of(ctx);
        let mut i = 0;
        while i < self.instruction.entries.len() {
            let (matched, qual) = {
                let bp = &self.instruction.entries[i];
                (bp.address <= pc && pc <= bp.address_end, bp.qualifier)
            };
            if matched && qual.matches(sam_register) {
                (self.instruction.entries[i].handler)(ctx, pc);
                let new_pc = pc_of(ctx);
                if new_pc != pc {
                    pc = new_pc;
                    i = 0;
                    continue;
                }
            }
            i += 1;
        }
    }

    fn dispatch_watch(list: &mut BreakpointList<Ctx>, ctx: &mut Ctx, addr: u16) {
        let mut i = 0;
        while i < list.entries.len() {
            let hit = {
                let bp = &list.entries[i];
                bp.address <= addr && addr <= bp.address_end
            };
            if hit {
                (list.entries[i].handler)(ctx, addr);
            }
            i += 1;
        }
    }

    pub fn dispatch_watch_read(&mut self, ctx: &mut Ctx, addr: u16) {
        Self::dispatch_watch(&mut self.watch_read, ctx, addr);
    }

    pub fn dispatch_watch_write(&mut self, ctx: &mut Ctx, addr: u16) {
        Self::dispatch_watch(&mut self.watch_write, ctx, addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_skipped_when_architecture_does_not_match() {
        let mut reg: BreakpointRegistry<i32> = BreakpointRegistry::new();
        let cond = InstallCondition {
            arch: ArchMask::DRAGON,
            crc: None,
        };
        reg.add_instruction(
            0x1000,
            0x1000,
            SamQualifier::default(),
            &cond,
            ArchMask::COCO,
            &[],
            Box::new(|_ctx, _pc| {}),
        );
        assert!(!reg.has_instruction_breakpoints());
    }

    #[test]
    fn handler_that_moves_pc_restarts_scan() {
        let mut reg: BreakpointRegistry<u16> = BreakpointRegistry::new();
        let cond = InstallCondition::default();
        reg.add_instruction(
            0x2000,
            0x2000,
            SamQualifier::default(),
            &cond,
            ArchMask::BOTH,
            &[],
            Box::new(|ctx: &mut u16, _pc| *ctx = 0x3000),
        );
        reg.add_instruction(
            0x3000,
            0x3000,
            SamQualifier::default(),
            &cond,
            ArchMask::BOTH,
            &[],
            Box::new(|ctx: &mut u16, _pc| *ctx = 0x4000),
        );
        let mut pc: u16 = 0x2000;
        reg.dispatch_instruction(&mut pc, 0, |ctx| *ctx);
        assert_eq!(pc, 0x4000);
    }
}
