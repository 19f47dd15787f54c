//! Delta System cartridge (spec.md §6, SPEC_FULL.md §4.11). Grounded
//! in `original_source/deltados.c`: a WD2791 decoded at `addr&7` 0-3,
//! and an `FF44` latch decoded on `addr&4`. Unlike DragonDOS and
//! RS-DOS, `deltados_configure` wires all four FDC delegate slots
//! (`set_drq`/`reset_drq`/`set_intrq`/`reset_intrq`) to `NULL` -- the
//! real hardware polls WD279x status directly rather than routing its
//! DRQ/INTRQ lines anywhere, so this cart never touches [`CartSignals`]
//! beyond the ones every cart shares.

use crate::core::floppy::vdrive::Drives;
use crate::core::floppy::wd279x::{Fdc, WdType};
use crate::core::scheduler::EventQueue;
use crate::core::tick::Tick;

use super::{CartSignals, Cartridge};

pub struct Delta {
    fdc: Fdc,
    latch: u8,
}

impl Delta {
    pub fn new() -> Self {
        Self { fdc: Fdc::new(WdType::Wd2791), latch: 0 }
    }

    /// `FF44` latch write: drive select (bits 0-1), side select (bit
    /// 2), density (bit 3, inverted -- `ic1_density` in the original is
    /// true for double density, so `octet & 0x08` set means DOUBLE;
    /// the inverted flag passed to `wd279x_set_density` there still
    /// means "single", matching DragonDOS/RS-DOS's convention).
    fn ff44_write(&mut self, drives: &mut Drives, queue: &mut EventQueue, now: Tick, octet: u8) {
        self.latch = octet;
        drives.set_drive(octet as usize & 0x03, queue, now);
        drives.set_head(if octet & 0x04 != 0 { 1 } else { 0 });
        self.fdc.set_dden(drives, octet & 0x08 == 0);
    }
}

impl Cartridge for Delta {
    fn read(&mut self, drives: &mut Drives, addr: u16, _p2: bool) -> u8 {
        match addr & 7 {
            0..=3 => self.fdc.read(drives, (addr & 3) as u8),
            _ => 0x7e,
        }
    }

    fn write(&mut self, drives: &mut Drives, queue: &mut EventQueue, now: Tick, addr: u16, _p2: bool, value: u8, _signals: &mut dyn CartSignals) {
        if addr & 7 <= 3 {
            self.fdc.write(drives, queue, now, (addr & 3) as u8, value);
        }
        if addr & 4 != 0 {
            self.ff44_write(drives, queue, now, value);
        }
    }

    fn reset(&mut self, drives: &mut Drives, queue: &mut EventQueue, now: Tick) {
        self.fdc.reset(drives, queue);
        self.ff44_write(drives, queue, now, 0);
    }

    fn attach(&mut self, _queue: &mut EventQueue, _now: Tick) {}
    fn detach(&mut self, _queue: &mut EventQueue) {}

    fn service(&mut self, drives: &mut Drives, queue: &mut EventQueue, now: Tick, _signals: &mut dyn CartSignals) {
        self.fdc.service(drives, queue, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_write_selects_drive_side_and_density() {
        let mut cart = Delta::new();
        let mut drives = Drives::new();
        let mut queue = EventQueue::new();
        let mut sig = NullSig;
        // drive 2, side 1, double density (bit 0x08 clear).
        cart.write(&mut drives, &mut queue, 0, 0xff44, false, 0b0000_0110, &mut sig);
        assert_eq!(cart.latch & 0x03, 2);
        assert_eq!(cart.latch & 0x04, 0x04);
    }

    #[test]
    fn addr_outside_latch_bit_leaves_latch_untouched() {
        let mut cart = Delta::new();
        let mut drives = Drives::new();
        let mut queue = EventQueue::new();
        let mut sig = NullSig;
        cart.write(&mut drives, &mut queue, 0, 0xff44, false, 0x06, &mut sig);
        cart.write(&mut drives, &mut queue, 0, 0xff41, false, 0xff, &mut sig);
        assert_eq!(cart.latch, 0x06);
    }

    struct NullSig;
    impl CartSignals for NullSig {
        fn set_firq(&mut self, _a: bool) {}
        fn set_nmi(&mut self, _a: bool) {}
        fn set_halt(&mut self, _a: bool) {}
        fn set_drq(&mut self, _a: bool) {}
    }
}
