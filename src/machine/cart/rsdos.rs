//! RS-DOS (Tandy) cartridge (spec.md §6, SPEC_FULL.md §4.11). Grounded
//! in `original_source/rsdos.c`: a WD2793 decoded at `addr&15` 8-11,
//! an `FF40` latch decoded on the complementary half of the page, and
//! a HALT-based CPU wait-state scheme tied to the FDC's DRQ/INTRQ
//! lines rather than DragonDOS's PIA-line/NMI wiring.

use crate::core::floppy::vdrive::Drives;
use crate::core::floppy::wd279x::{Fdc, WdType};
use crate::core::scheduler::EventQueue;
use crate::core::tick::Tick;

use super::{CartSignals, Cartridge};

pub struct RsDos {
    fdc: Fdc,
    latch: u8,
    density_single: bool,
    drq_flag: bool,
    intrq_flag: bool,
    halt_enable: bool,
    prev_drq: bool,
    prev_intrq: bool,
}

impl RsDos {
    pub fn new() -> Self {
        Self {
            fdc: Fdc::new(WdType::Wd2793),
            latch: 0,
            density_single: false,
            drq_flag: false,
            intrq_flag: false,
            halt_enable: false,
            prev_drq: false,
            prev_intrq: false,
        }
    }

    /// `FF40` latch write. The octet is XORed by `0x20` before decode
    /// (the original's `octet ^= 0x20`, an inverted-density convention
    /// carried over from the real PIA wiring). Drive select is one-hot
    /// across bits 0/1/2 rather than DragonDOS's 2-bit binary field --
    /// the first matching bit wins and an all-clear field leaves drive
    /// 0 selected.
    fn ff40_write(&mut self, drives: &mut Drives, queue: &mut EventQueue, now: Tick, octet_raw: u8, signals: &mut dyn CartSignals) {
        let octet = octet_raw ^ 0x20;
        let drive = if octet & 0x01 != 0 {
            0
        } else if octet & 0x02 != 0 {
            1
        } else if octet & 0x04 != 0 {
            2
        } else {
            0
        };
        drives.set_head(if octet & 0x40 != 0 { 1 } else { 0 });
        self.latch = octet;
        drives.set_drive(drive, queue, now);
        self.density_single = octet & 0x20 != 0;
        self.fdc.set_dden(drives, !self.density_single);
        if self.density_single && self.intrq_flag {
            signals.set_nmi(true);
        }
        self.halt_enable = octet & 0x80 != 0;
        if self.intrq_flag {
            self.halt_enable = false;
        }
        signals.set_halt(self.halt_enable && !self.drq_flag);
    }

    fn set_drq(&mut self, signals: &mut dyn CartSignals) {
        self.drq_flag = true;
        signals.set_halt(false);
    }

    fn reset_drq(&mut self, signals: &mut dyn CartSignals) {
        self.drq_flag = false;
        if self.halt_enable {
            signals.set_halt(true);
        }
    }

    fn set_intrq(&mut self, signals: &mut dyn CartSignals) {
        self.intrq_flag = true;
        self.halt_enable = false;
        signals.set_halt(false);
        if !self.density_single {
            signals.set_nmi(true);
        }
    }

    fn reset_intrq(&mut self, signals: &mut dyn CartSignals) {
        self.intrq_flag = false;
        signals.set_nmi(false);
    }

    fn poll_signals(&mut self, signals: &mut dyn CartSignals) {
        let drq = self.fdc.drq();
        if drq != self.prev_drq {
            if drq {
                self.set_drq(signals);
            } else {
                self.reset_drq(signals);
            }
            self.prev_drq = drq;
        }
        let intrq = self.fdc.intrq();
        if intrq != self.prev_intrq {
            if intrq {
                self.set_intrq(signals);
            } else {
                self.reset_intrq(signals);
            }
            self.prev_intrq = intrq;
        }
    }
}

impl Cartridge for RsDos {
    fn read(&mut self, drives: &mut Drives, addr: u16, _p2: bool) -> u8 {
        match addr & 15 {
            8..=11 => self.fdc.read(drives, (addr & 3) as u8),
            _ => 0x7e,
        }
    }

    fn write(&mut self, drives: &mut Drives, queue: &mut EventQueue, now: Tick, addr: u16, _p2: bool, value: u8, signals: &mut dyn CartSignals) {
        if (8..=11).contains(&(addr & 15)) {
            self.fdc.write(drives, queue, now, (addr & 3) as u8, value);
        }
        if addr & 8 == 0 {
            self.ff40_write(drives, queue, now, value, signals);
        }
        self.poll_signals(signals);
    }

    fn reset(&mut self, drives: &mut Drives, queue: &mut EventQueue, now: Tick) {
        self.fdc.reset(drives, queue);
        self.drq_flag = false;
        self.intrq_flag = false;
        self.prev_drq = false;
        self.prev_intrq = false;
        // ff40_write(0, ...) at reset, minus the halt/nmi signal edges --
        // the machine's own reset path clears CPU halt/NMI state directly.
        self.latch = 0x20;
        drives.set_head(0);
        drives.set_drive(0, queue, now);
        self.density_single = true;
        self.fdc.set_dden(drives, false);
        self.halt_enable = false;
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

    struct Sig {
        halt: bool,
        nmi: bool,
    }
    impl CartSignals for Sig {
        fn set_firq(&mut self, _a: bool) {}
        fn set_nmi(&mut self, a: bool) {
            self.nmi = a;
        }
        fn set_halt(&mut self, a: bool) {
            self.halt = a;
        }
        fn set_drq(&mut self, _a: bool) {}
    }

    #[test]
    fn one_hot_drive_select_picks_first_matching_bit() {
        let mut cart = RsDos::new();
        let mut drives = Drives::new();
        let mut queue = EventQueue::new();
        let mut sig = Sig { halt: false, nmi: false };
        // bits 0x01 and 0x02 both set: drive 0 wins (checked first).
        cart.write(&mut drives, &mut queue, 0, 0xff40, false, 0x03, &mut sig);
        let octet = 0x03u8 ^ 0x20;
        assert_eq!(cart.latch, octet);
    }

    #[test]
    fn halt_asserted_when_enabled_and_drq_not_pending() {
        let mut cart = RsDos::new();
        let mut drives = Drives::new();
        let mut queue = EventQueue::new();
        let mut sig = Sig { halt: false, nmi: false };
        // 0x80 ^ 0x20 = 0xa0, so the raw octet to set halt_enable (bit
        // 0x80 post-XOR) is 0x80 ^ 0x20 = 0xa0.
        cart.write(&mut drives, &mut queue, 0, 0xff40, false, 0xa0, &mut sig);
        assert!(cart.halt_enable);
        assert!(sig.halt);
    }

    #[test]
    fn drq_set_clears_halt_even_while_enabled() {
        let mut cart = RsDos::new();
        let mut drives = Drives::new();
        let mut queue = EventQueue::new();
        let mut sig = Sig { halt: false, nmi: false };
        cart.write(&mut drives, &mut queue, 0, 0xff40, false, 0xa0, &mut sig);
        assert!(sig.halt);
        cart.set_drq(&mut sig);
        assert!(!sig.halt);
        assert!(cart.drq_flag);
    }
}
