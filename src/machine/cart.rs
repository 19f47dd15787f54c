//! Cartridge port: a common trait for everything that can be plugged
//! into the expansion slot, plus the generic ROM cart (spec.md §6,
//! SPEC_FULL.md §4.11). Grounded in `original_source/cart.c` and
//! `cart.h`'s `struct cart`/`cart_configure` dispatch.

use crate::core::floppy::vdrive::Drives;
use crate::core::scheduler::{EventId, EventQueue, EventTag};
use crate::core::tick::Tick;

pub mod deltados;
pub mod dragondos;
pub mod rsdos;

/// Which cartridge kind a config names (`enum cart_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartType {
    Rom,
    DragonDos,
    RsDos,
    DeltaDos,
}

/// The signal lines a cartridge can assert back into the machine
/// (`signal_firq`/`signal_nmi`/`signal_halt` delegates in the
/// original). Implemented by [`crate::machine::Machine`]; kept as a
/// trait so cart code never reaches into CPU internals directly.
pub trait CartSignals {
    fn set_firq(&mut self, asserted: bool);
    fn set_nmi(&mut self, asserted: bool);
    fn set_halt(&mut self, asserted: bool);
    /// DragonDOS's `PIA_SET_Cx1(PIA1.b)`/`PIA_RESET_Cx1(PIA1.b)`: the
    /// WD279x DRQ line wired to PIA1 side B's `Cx1` input. RS-DOS and
    /// Delta never call this -- they either gate halt directly or don't
    /// expose DRQ to the PIA at all.
    fn set_drq(&mut self, asserted: bool);
}

/// Everything pluggable into the expansion port. Disk-controller carts
/// need the machine's single shared drive set and event queue, so
/// those are threaded through explicitly rather than owned by the cart
/// (matching [`crate::core::floppy::wd279x::Fdc`]'s own calling
/// convention).
pub trait Cartridge {
    fn read(&mut self, drives: &mut Drives, addr: u16, p2: bool) -> u8;
    fn write(&mut self, drives: &mut Drives, queue: &mut EventQueue, now: Tick, addr: u16, p2: bool, value: u8, signals: &mut dyn CartSignals);
    fn reset(&mut self, drives: &mut Drives, queue: &mut EventQueue, now: Tick);
    fn attach(&mut self, queue: &mut EventQueue, now: Tick);
    fn detach(&mut self, queue: &mut EventQueue);
    /// Service a due event this cart scheduled (`EventTag::CartFirqPulse`
    /// for [`RomCart`], WD279x state transitions for the DOS carts via
    /// their own `EventTag::FdcState`/`FdcIndexPulse*` handling).
    fn service(&mut self, drives: &mut Drives, queue: &mut EventQueue, now: Tick, signals: &mut dyn CartSignals);
}

/// A stub seam for DriveWire-style remote disk access over a host TCP
/// socket (spec.md Non-goal: no host networking in the core).
/// SPEC_FULL.md §4.11 keeps this as a trait only, never implemented
/// here.
pub trait BeckerPort {
    fn read(&mut self) -> Option<u8>;
    fn write(&mut self, byte: u8);
    fn connected(&self) -> bool {
        false
    }
}

/// A plain ROM cartridge (`rom_configure`/`attach_rom`/`do_firq`):
/// bytes come straight from `rom_data`, and -- when autorun is enabled
/// -- attaching pulses FIRQ once a tenth of a second later, waking a
/// machine sitting at BASIC's "cold start" idle loop into running the
/// cart.
pub struct RomCart {
    pub rom_data: Vec<u8>,
    pub autorun: bool,
    firq_event: Option<EventId>,
}

impl RomCart {
    pub fn new(rom_data: Vec<u8>, autorun: bool) -> Self {
        Self { rom_data, autorun, firq_event: None }
    }
}

impl Cartridge for RomCart {
    fn read(&mut self, _drives: &mut Drives, addr: u16, p2: bool) -> u8 {
        let base = if p2 { 0x2000 } else { 0 };
        let offset = base + (addr as usize & 0x1fff);
        self.rom_data.get(offset).copied().unwrap_or(0xff)
    }

    fn write(&mut self, _drives: &mut Drives, _queue: &mut EventQueue, _now: Tick, _addr: u16, _p2: bool, _value: u8, _signals: &mut dyn CartSignals) {}

    fn reset(&mut self, _drives: &mut Drives, _queue: &mut EventQueue, _now: Tick) {}

    fn attach(&mut self, queue: &mut EventQueue, now: Tick) {
        if self.autorun {
            self.firq_event = Some(queue.schedule(now + crate::machine::tape::OSCILLATOR_RATE / 10, EventTag::CartFirqPulse));
        }
    }

    fn detach(&mut self, queue: &mut EventQueue) {
        if let Some(id) = self.firq_event.take() {
            queue.dequeue(id);
        }
    }

    fn service(&mut self, _drives: &mut Drives, queue: &mut EventQueue, now: Tick, signals: &mut dyn CartSignals) {
        if self.firq_event.is_some() {
            signals.set_firq(true);
            self.firq_event = Some(queue.schedule(now + crate::machine::tape::OSCILLATOR_RATE / 10, EventTag::CartFirqPulse));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct NullSignals {
        firq: bool,
    }
    impl CartSignals for NullSignals {
        fn set_firq(&mut self, asserted: bool) {
            self.firq = asserted;
        }
        fn set_nmi(&mut self, _asserted: bool) {}
        fn set_halt(&mut self, _asserted: bool) {}
        fn set_drq(&mut self, _asserted: bool) {}
    }

    #[test]
    fn rom_cart_reads_second_bank_via_p2() {
        let mut rom = vec![0u8; 0x4000];
        rom[0x2000] = 0x42;
        let mut cart = RomCart::new(rom, false);
        let mut drives = Drives::new();
        assert_eq!(cart.read(&mut drives, 0x0000, true), 0x42);
        assert_eq!(cart.read(&mut drives, 0x0000, false), 0x00);
    }

    #[test]
    fn autorun_attach_schedules_and_pulses_firq() {
        let mut cart = RomCart::new(vec![0; 0x4000], true);
        let mut queue = EventQueue::new();
        let mut drives = Drives::new();
        let mut sig = NullSignals::default();
        cart.attach(&mut queue, 0);
        assert!(queue.pending(crate::machine::tape::OSCILLATOR_RATE / 10));
        let (_, tag) = queue.pop_due(crate::machine::tape::OSCILLATOR_RATE / 10).unwrap();
        assert_eq!(tag, EventTag::CartFirqPulse);
        cart.service(&mut drives, &mut queue, crate::machine::tape::OSCILLATOR_RATE / 10, &mut sig);
        assert!(sig.firq);
    }
}
