//! DragonDOS cartridge (spec.md §6, SPEC_FULL.md §4.11). Grounded in
//! `original_source/dragondos.c`: a WD2797 decoded at `addr&15` 0-3, and
//! an `FF48` latch (drive select / motor / density / precomp / NMI
//! enable) decoded whenever `addr&8` is set.

use crate::core::floppy::vdrive::Drives;
use crate::core::floppy::wd279x::{Fdc, WdType};
use crate::core::scheduler::EventQueue;
use crate::core::tick::Tick;

use super::{CartSignals, Cartridge};

pub struct DragonDos {
    fdc: Fdc,
    latch: u8,
    nmi_enable: bool,
    prev_intrq: bool,
    prev_drq: bool,
}

impl DragonDos {
    pub fn new() -> Self {
        Self { fdc: Fdc::new(WdType::Wd2797), latch: 0, nmi_enable: false, prev_intrq: false, prev_drq: false }
    }

    /// `FF48` latch write: drive select (bits 0-1), motor enable (bit
    /// 2), density (bit 3, inverted -- see below), precomp (bit 4), NMI
    /// enable (bit 5).
    fn ff48_write(&mut self, drives: &mut Drives, queue: &mut EventQueue, now: Tick, octet: u8) {
        self.latch = octet;
        self.nmi_enable = octet & 0x20 != 0;
        drives.set_drive(octet as usize & 0x03, queue, now);
        // Octet bit 0x08 set means single density in the original's own
        // debug log, the inverse of `Fdc::set_dden`'s meaning.
        self.fdc.set_dden(drives, octet & 0x08 == 0);
    }

    /// Push the FDC's DRQ/INTRQ edges out to the PIA1.b `Cx1` line and
    /// CPU NMI the way `set_drq_handler`/`set_intrq_handler` do, since
    /// our [`Fdc`] exposes level state rather than calling delegates
    /// itself.
    fn poll_signals(&mut self, signals: &mut dyn CartSignals) {
        let drq = self.fdc.drq();
        if drq != self.prev_drq {
            signals.set_drq(drq);
            self.prev_drq = drq;
        }
        let intrq = self.fdc.intrq();
        if intrq != self.prev_intrq {
            signals.set_nmi(intrq && self.nmi_enable);
            self.prev_intrq = intrq;
        }
    }
}

impl Cartridge for DragonDos {
    fn read(&mut self, drives: &mut Drives, addr: u16, _p2: bool) -> u8 {
        match addr & 15 {
            0..=3 => self.fdc.read(drives, (addr & 3) as u8),
            _ => 0x7e,
        }
    }

    fn write(&mut self, drives: &mut Drives, queue: &mut EventQueue, now: Tick, addr: u16, _p2: bool, value: u8, signals: &mut dyn CartSignals) {
        if addr & 15 <= 3 {
            self.fdc.write(drives, queue, now, (addr & 3) as u8, value);
        }
        if addr & 8 != 0 {
            self.ff48_write(drives, queue, now, value);
        }
        self.poll_signals(signals);
    }

    fn reset(&mut self, drives: &mut Drives, queue: &mut EventQueue, now: Tick) {
        self.fdc.reset(drives, queue);
        self.prev_drq = false;
        self.prev_intrq = false;
        self.ff48_write(drives, queue, now, 0);
    }

    fn attach(&mut self, _queue: &mut EventQueue, _now: Tick) {}
    fn detach(&mut self, _queue: &mut EventQueue) {}

    fn service(&mut self, drives: &mut Drives, queue: &mut EventQueue, now: Tick, signals: &mut dyn CartSignals) {
        self.fdc.service(drives, queue, now);
        self.poll_signals(signals);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_write_selects_drive_and_density() {
        let mut cart = DragonDos::new();
        let mut drives = Drives::new();
        let mut queue = EventQueue::new();
        struct Sig;
        impl CartSignals for Sig {
            fn set_firq(&mut self, _a: bool) {}
            fn set_nmi(&mut self, _a: bool) {}
            fn set_halt(&mut self, _a: bool) {}
            fn set_drq(&mut self, _a: bool) {}
        }
        let mut sig = Sig;
        // drive 1, motor on, single density (bit 0x08 set)
        cart.write(&mut drives, &mut queue, 0, 0xff48, false, 0b0000_1101, &mut sig);
        assert_eq!(cart.latch & 0x03, 1);
        assert!(cart.nmi_enable == false);
    }

    #[test]
    fn nmi_enable_bit_is_latched() {
        let mut cart = DragonDos::new();
        let mut drives = Drives::new();
        let mut queue = EventQueue::new();
        struct Sig;
        impl CartSignals for Sig {
            fn set_firq(&mut self, _a: bool) {}
            fn set_nmi(&mut self, _a: bool) {}
            fn set_halt(&mut self, _a: bool) {}
            fn set_drq(&mut self, _a: bool) {}
        }
        let mut sig = Sig;
        cart.write(&mut drives, &mut queue, 0, 0xff48, false, 0x20, &mut sig);
        assert!(cart.nmi_enable);
    }
}
