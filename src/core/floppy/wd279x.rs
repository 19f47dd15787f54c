//! WD279x floppy disk controller command state machine (spec.md
//! §4.7.1). Grounded almost statement-for-statement on
//! `original_source/wd279x.c`'s `state_machine` function: its `NEXT_STATE`
//! macro (schedule a follow-up state after a tick delay, return to the
//! caller) becomes [`Fdc::schedule_next`] plus an early `return`, and its
//! `GOTO_STATE` macro (switch state immediately, no delay) becomes a
//! same-iteration `continue` of the `loop` in [`Fdc::run`].

use crate::crc::{crc16_byte, CRC16_RESET};

use super::super::scheduler::{EventId, EventQueue, EventTag};
use super::super::tick::Tick;
use super::vdrive::Drives;

const OSCILLATOR_RATE: u32 = 14_318_180;
const BYTE_TIME: u32 = OSCILLATOR_RATE / 31250;

const fn w_millisec(ms: u32) -> u32 {
    (OSCILLATOR_RATE / 1000) * ms
}
const fn w_microsec(us: u32) -> u32 {
    (OSCILLATOR_RATE * us) / 1_000_000
}

const STATUS_NOT_READY: u8 = 1 << 7;
const STATUS_WRITE_PROTECT: u8 = 1 << 6;
#[allow(dead_code)]
const STATUS_HEAD_LOADED: u8 = 1 << 5;
const STATUS_RECORD_TYPE: u8 = 1 << 5;
const STATUS_SEEK_ERROR: u8 = 1 << 4;
const STATUS_RNF: u8 = 1 << 4;
const STATUS_CRC_ERROR: u8 = 1 << 3;
const STATUS_TRACK_0: u8 = 1 << 2;
const STATUS_LOST_DATA: u8 = 1 << 2;
const STATUS_INDEX_PULSE: u8 = 1 << 1;
const STATUS_DRQ: u8 = 1 << 1;
const STATUS_BUSY: u8 = 1;

const STEPPING_RATE: [u32; 4] = [6, 12, 20, 30];
const SECTOR_SIZE: [[u32; 4]; 2] = [[256, 512, 1024, 128], [128, 256, 512, 1024]];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WdType {
    Wd2791,
    Wd2793,
    Wd2795,
    Wd2797,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AcceptCommand,
    Type1Step1,
    Type1Step2,
    Type1Step3,
    VerifyTrack1,
    VerifyTrack2,
    Type2Step1,
    Type2Step2,
    ReadSector1,
    ReadSector2,
    ReadSector3,
    WriteSector1,
    WriteSector2,
    WriteSector3,
    WriteSector4,
    WriteSector5,
    WriteSector6,
    Type3Step1,
    ReadAddress1,
    ReadAddress2,
    ReadAddress3,
    WriteTrack1,
    WriteTrack2,
    WriteTrack2b,
    WriteTrack3,
}

/// One WD279x family member plus whichever drive is currently
/// selected on its bus. `Machine` owns one of these per floppy
/// controller and a `Drives` per cable.
pub struct Fdc {
    variant: WdType,
    has_sso: bool,
    has_length_flag: bool,
    has_inverted_data: bool,

    status_register: u8,
    track_register: u8,
    sector_register: u8,
    data_register: u8,
    command_register: u8,

    state: State,
    state_event: Option<EventId>,

    direction: i32,
    side: u8,
    step_delay: u32,
    is_step_cmd: bool,
    double_density: bool,
    crc: u16,
    dam: u8,
    bytes_left: u32,
    index_holes_count: u32,
    track_register_tmp: u8,

    /// `INTRQ` output pin. Unlike `DRQ` this has no status-register
    /// bit of its own on real silicon.
    intrq: bool,
}

impl Fdc {
    pub fn new(variant: WdType) -> Self {
        Self {
            variant,
            has_sso: matches!(variant, WdType::Wd2795 | WdType::Wd2797),
            has_length_flag: matches!(variant, WdType::Wd2795 | WdType::Wd2797),
            has_inverted_data: matches!(variant, WdType::Wd2791 | WdType::Wd2795),
            status_register: 0,
            track_register: 0,
            sector_register: 0,
            data_register: 0,
            command_register: 0,
            state: State::AcceptCommand,
            state_event: None,
            direction: -1,
            side: 0,
            step_delay: STEPPING_RATE[0],
            is_step_cmd: false,
            double_density: false,
            crc: CRC16_RESET,
            dam: 0,
            bytes_left: 0,
            index_holes_count: 0,
            track_register_tmp: 0,
            intrq: false,
        }
    }

    pub fn variant(&self) -> WdType {
        self.variant
    }

    pub fn intrq(&self) -> bool {
        self.intrq
    }

    pub fn drq(&self) -> bool {
        self.status_register & STATUS_DRQ != 0
    }

    pub fn reset(&mut self, drives: &mut Drives, queue: &mut EventQueue) {
        if let Some(id) = self.state_event.take() {
            queue.dequeue(id);
        }
        self.status_register = 0;
        self.track_register = 0;
        self.sector_register = 0;
        self.data_register = 0;
        self.command_register = 0;
        self.state = State::AcceptCommand;
        self.direction = -1;
        drives.set_direction(false);
        self.side = 0;
        if self.has_sso {
            drives.set_head(0);
        }
        self.intrq = false;
    }

    pub fn set_dden(&mut self, drives: &mut Drives, dden: bool) {
        self.double_density = dden;
        drives.set_dden(dden);
    }

    /// Register read (`A & 3`: status/track/sector/data).
    pub fn read(&mut self, drives: &Drives, reg: u8) -> u8 {
        let mut d = match reg & 3 {
            0 => {
                self.intrq = false;
                if drives.ready() {
                    self.status_register &= !STATUS_NOT_READY;
                } else {
                    self.status_register |= STATUS_NOT_READY;
                }
                if (self.command_register & 0xf0) == 0xd0 || (self.command_register & 0x80) == 0x00 {
                    if drives.track_zero() {
                        self.status_register |= STATUS_TRACK_0;
                    } else {
                        self.status_register &= !STATUS_TRACK_0;
                    }
                    if drives.index_pulse() {
                        self.status_register |= STATUS_INDEX_PULSE;
                    } else {
                        self.status_register &= !STATUS_INDEX_PULSE;
                    }
                }
                self.status_register
            }
            1 => self.track_register,
            2 => self.sector_register,
            _ => {
                self.reset_drq();
                self.data_register
            }
        };
        if self.has_inverted_data {
            d = !d;
        }
        d
    }

    /// Register write. Dispatches FORCE INTERRUPT (`0xD0`-`0xDF`)
    /// immediately; any other command is ignored while busy, else
    /// runs the state machine straight away (spec.md §4.7.1).
    pub fn write(&mut self, drives: &mut Drives, queue: &mut EventQueue, now: Tick, reg: u8, value: u8) {
        let value = if self.has_inverted_data { !value } else { value };
        match reg & 3 {
            0 => {
                self.intrq = false;
                self.command_register = value;
                if (value & 0xf0) == 0xd0 {
                    if (value & 0x0f) == 0 {
                        if let Some(id) = self.state_event.take() {
                            queue.dequeue(id);
                        }
                        self.status_register &= !STATUS_BUSY;
                        return;
                    }
                    if value & 0x08 != 0 {
                        if let Some(id) = self.state_event.take() {
                            queue.dequeue(id);
                        }
                        self.status_register &= !STATUS_BUSY;
                        self.intrq = true;
                        return;
                    }
                    return;
                }
                if self.status_register & STATUS_BUSY != 0 {
                    log::debug!(target: "core::floppy::wd279x", "command received while busy");
                    return;
                }
                self.state = State::AcceptCommand;
                self.run(drives, queue, now);
            }
            1 => self.track_register = value,
            2 => self.sector_register = value,
            _ => {
                self.reset_drq();
                self.data_register = value;
            }
        }
    }

    /// Called back when `EventTag::FdcState` fires.
    pub fn service(&mut self, drives: &mut Drives, queue: &mut EventQueue, now: Tick) {
        self.state_event = None;
        self.run(drives, queue, now);
    }

    fn set_drq(&mut self) {
        self.status_register |= STATUS_DRQ;
    }
    fn reset_drq(&mut self) {
        self.status_register &= !STATUS_DRQ;
    }

    fn schedule_next(&mut self, state: State, delay: u32, queue: &mut EventQueue, now: Tick) {
        self.state = state;
        if let Some(id) = self.state_event.take() {
            queue.dequeue(id);
        }
        self.state_event = Some(queue.schedule(now.wrapping_add(delay), EventTag::FdcState));
    }

    fn vread(&mut self, drives: &mut Drives) -> u8 {
        let b = drives.read();
        self.crc = crc16_byte(self.crc, b);
        b
    }

    fn vwrite(&mut self, drives: &mut Drives, b: u8) {
        drives.write(b);
        self.crc = crc16_byte(self.crc, b);
    }

    fn write_crc16(&mut self, drives: &mut Drives) {
        let c = self.crc;
        self.vwrite(drives, (c >> 8) as u8);
        self.vwrite(drives, (c & 0xff) as u8);
    }

    fn reset_crc_preamble(&mut self) {
        self.crc = CRC16_RESET;
        if self.double_density {
            self.crc = crc16_byte(self.crc, 0xa1);
            self.crc = crc16_byte(self.crc, 0xa1);
            self.crc = crc16_byte(self.crc, 0xa1);
        }
    }

    /// The command state machine. One call either runs straight
    /// through to completion (when every step is a same-tick
    /// `GOTO_STATE`) or returns early having scheduled a follow-up
    /// `EventTag::FdcState` -- in which case [`Fdc::service`] resumes
    /// it from whatever state was scheduled.
    fn run(&mut self, drives: &mut Drives, queue: &mut EventQueue, now: Tick) {
        loop {
            match self.state {
                State::AcceptCommand => {
                    let cr = self.command_register;
                    // RESTORE / SEEK / STEP / STEP-IN / STEP-OUT
                    if cr & 0x80 == 0 {
                        self.status_register |= STATUS_BUSY;
                        self.status_register &= !(STATUS_CRC_ERROR | STATUS_SEEK_ERROR);
                        self.reset_drq();
                        self.step_delay = STEPPING_RATE[(cr & 3) as usize];
                        self.is_step_cmd = false;
                        if cr & 0xe0 == 0x20 {
                            self.is_step_cmd = true;
                        } else if cr & 0xe0 == 0x40 {
                            self.is_step_cmd = true;
                            self.direction = 1;
                            drives.set_direction(true);
                        } else if cr & 0xe0 == 0x60 {
                            self.is_step_cmd = true;
                            self.direction = -1;
                            drives.set_direction(false);
                        }
                        if self.is_step_cmd {
                            self.state = if cr & 0x10 != 0 { State::Type1Step2 } else { State::Type1Step3 };
                            continue;
                        }
                        if cr & 0xf0 == 0x00 {
                            self.track_register = 0xff;
                            self.data_register = 0x00;
                        }
                        self.state = State::Type1Step1;
                        continue;
                    }

                    // READ/WRITE SECTOR
                    if cr & 0xc0 == 0x80 {
                        self.status_register |= STATUS_BUSY;
                        self.status_register &= !(STATUS_LOST_DATA | STATUS_RNF | (1 << 5) | (1 << 6));
                        self.reset_drq();
                        if !drives.ready() {
                            self.status_register &= !STATUS_BUSY;
                            self.intrq = true;
                            return;
                        }
                        drives.set_head(if (if self.has_sso { cr & 0x02 } else { cr & 0x08 }) != 0 { 1 } else { 0 });
                        if cr & 0x04 != 0 {
                            self.schedule_next(State::Type2Step1, w_millisec(30), queue, now);
                            return;
                        }
                        self.state = State::Type2Step1;
                        continue;
                    }

                    // READ ADDRESS / READ TRACK / WRITE TRACK
                    if (cr & 0xf9) == 0xc0 || (cr & 0xf9) == 0xe0 || (cr & 0xf9) == 0xf0 {
                        self.status_register |= STATUS_BUSY;
                        self.status_register &= !(STATUS_LOST_DATA | (1 << 4) | (1 << 5));
                        if cr & 0xf0 == 0xf0 {
                            self.reset_drq();
                        }
                        if !drives.ready() {
                            self.status_register &= !STATUS_BUSY;
                            self.intrq = true;
                            return;
                        }
                        drives.set_head(if (if self.has_sso { cr & 0x02 } else { cr & 0x08 }) != 0 { 1 } else { 0 });
                        if cr & 0x04 != 0 {
                            self.schedule_next(State::Type3Step1, w_millisec(30), queue, now);
                            return;
                        }
                        self.state = State::Type3Step1;
                        continue;
                    }

                    log::warn!(target: "core::floppy::wd279x", "unknown command {:#04x}", cr);
                    return;
                }

                State::Type1Step1 => {
                    if self.data_register == self.track_register {
                        self.state = State::VerifyTrack1;
                        continue;
                    }
                    if self.data_register > self.track_register {
                        self.direction = 1;
                        drives.set_direction(true);
                    } else {
                        self.direction = -1;
                        drives.set_direction(false);
                    }
                    self.state = State::Type1Step2;
                    continue;
                }

                State::Type1Step2 => {
                    self.track_register = (self.track_register as i32 + self.direction) as u8;
                    self.state = State::Type1Step3;
                    continue;
                }

                State::Type1Step3 => {
                    if drives.track_zero() && self.direction == -1 {
                        self.track_register = 0;
                        // The flow chart implies no delay here, but
                        // real disk software depends on one anyway.
                        self.schedule_next(State::VerifyTrack1, w_millisec(self.step_delay), queue, now);
                        return;
                    }
                    drives.step(queue, now);
                    if self.is_step_cmd {
                        self.schedule_next(State::VerifyTrack1, w_millisec(self.step_delay), queue, now);
                        return;
                    }
                    self.schedule_next(State::Type1Step1, w_millisec(self.step_delay), queue, now);
                    return;
                }

                State::VerifyTrack1 => {
                    if self.command_register & 0x04 == 0 {
                        self.status_register &= !STATUS_BUSY;
                        self.intrq = true;
                        return;
                    }
                    self.index_holes_count = 0;
                    let delay = drives.time_to_next_idam(now);
                    self.schedule_next(State::VerifyTrack2, delay, queue, now);
                    return;
                }

                State::VerifyTrack2 => {
                    let found = drives.next_idam();
                    if drives.new_index_pulse() {
                        self.index_holes_count += 1;
                        if self.index_holes_count >= 5 {
                            self.status_register &= !STATUS_BUSY;
                            self.status_register |= STATUS_SEEK_ERROR;
                            self.intrq = true;
                            return;
                        }
                    }
                    if !found {
                        let delay = drives.time_to_next_idam(now);
                        self.schedule_next(State::VerifyTrack2, delay, queue, now);
                        return;
                    }
                    self.reset_crc_preamble();
                    let _ = self.vread(drives);
                    if self.track_register != self.vread(drives) {
                        let delay = drives.time_to_next_idam(now);
                        self.schedule_next(State::VerifyTrack2, delay, queue, now);
                        return;
                    }
                    for _ in 0..5 {
                        let _ = self.vread(drives);
                    }
                    if self.crc != 0 {
                        self.status_register |= STATUS_CRC_ERROR;
                        let delay = drives.time_to_next_idam(now);
                        self.schedule_next(State::VerifyTrack2, delay, queue, now);
                        return;
                    }
                    self.status_register &= !(STATUS_CRC_ERROR | STATUS_BUSY);
                    self.intrq = true;
                    return;
                }

                State::Type2Step1 => {
                    if self.command_register & 0x20 != 0 && drives.write_protect() {
                        self.status_register &= !STATUS_BUSY;
                        self.status_register |= STATUS_WRITE_PROTECT;
                        self.intrq = true;
                        return;
                    }
                    self.index_holes_count = 0;
                    let delay = drives.time_to_next_idam(now);
                    self.schedule_next(State::Type2Step2, delay, queue, now);
                    return;
                }

                State::Type2Step2 => {
                    let found = drives.next_idam();
                    if drives.new_index_pulse() {
                        self.index_holes_count += 1;
                        if self.index_holes_count >= 5 {
                            self.status_register &= !STATUS_BUSY;
                            self.status_register |= STATUS_RNF;
                            self.intrq = true;
                            return;
                        }
                    }
                    if !found {
                        let delay = drives.time_to_next_idam(now);
                        self.schedule_next(State::Type2Step2, delay, queue, now);
                        return;
                    }
                    self.reset_crc_preamble();
                    let _ = self.vread(drives);
                    if self.track_register != self.vread(drives) {
                        let delay = drives.time_to_next_idam(now);
                        self.schedule_next(State::Type2Step2, delay, queue, now);
                        return;
                    }
                    let side = self.vread(drives);
                    if self.side != side && (self.has_sso || self.command_register & 0x02 != 0) {
                        let delay = drives.time_to_next_idam(now);
                        self.schedule_next(State::Type2Step2, delay, queue, now);
                        return;
                    }
                    if self.sector_register != self.vread(drives) {
                        let delay = drives.time_to_next_idam(now);
                        self.schedule_next(State::Type2Step2, delay, queue, now);
                        return;
                    }
                    let size_code = self.vread(drives);
                    self.bytes_left = if self.has_length_flag {
                        SECTOR_SIZE[if self.command_register & 0x08 != 0 { 1 } else { 0 }][(size_code & 3) as usize]
                    } else {
                        SECTOR_SIZE[1][(size_code & 3) as usize]
                    };
                    let _ = self.vread(drives);
                    let _ = self.vread(drives);
                    if self.crc != 0 {
                        self.status_register |= STATUS_CRC_ERROR;
                        let delay = drives.time_to_next_idam(now);
                        self.schedule_next(State::Type2Step2, delay, queue, now);
                        return;
                    }

                    if self.command_register & 0x20 == 0 {
                        let bytes_to_scan = if self.double_density { 43 } else { 30 };
                        let mut scanned = 0;
                        self.dam = 0;
                        loop {
                            self.reset_crc_preamble();
                            let tmp = self.vread(drives);
                            if tmp == 0xfb || tmp == 0xf8 {
                                self.dam = tmp;
                            }
                            scanned += 1;
                            if !(scanned < bytes_to_scan && self.dam == 0) {
                                break;
                            }
                        }
                        if self.dam == 0 {
                            let delay = drives.time_to_next_byte(now);
                            self.schedule_next(State::Type2Step2, delay, queue, now);
                            return;
                        }
                        let delay = drives.time_to_next_byte(now);
                        self.schedule_next(State::ReadSector1, delay, queue, now);
                        return;
                    }
                    drives.skip();
                    drives.skip();
                    let delay = drives.time_to_next_byte(now);
                    self.schedule_next(State::WriteSector1, delay, queue, now);
                    return;
                }

                State::ReadSector1 => {
                    self.status_register |= (!self.dam & 1) << 5;
                    self.data_register = self.vread(drives);
                    self.bytes_left -= 1;
                    self.set_drq();
                    let delay = drives.time_to_next_byte(now);
                    self.schedule_next(State::ReadSector2, delay, queue, now);
                    return;
                }

                State::ReadSector2 => {
                    if self.status_register & STATUS_DRQ != 0 {
                        self.status_register |= STATUS_LOST_DATA;
                    }
                    if self.bytes_left > 0 {
                        self.data_register = self.vread(drives);
                        self.bytes_left -= 1;
                        self.set_drq();
                        let delay = drives.time_to_next_byte(now);
                        self.schedule_next(State::ReadSector2, delay, queue, now);
                        return;
                    }
                    let _ = self.vread(drives);
                    let _ = self.vread(drives);
                    let delay = drives.time_to_next_byte(now);
                    self.schedule_next(State::ReadSector3, delay, queue, now);
                    return;
                }

                State::ReadSector3 => {
                    if self.crc != 0 {
                        self.status_register |= STATUS_CRC_ERROR;
                    }
                    // Multi-sector reads (command bit 0x10, "M") are
                    // not chained across sectors here.
                    self.status_register &= !STATUS_BUSY;
                    self.intrq = true;
                    return;
                }

                State::WriteSector1 => {
                    self.set_drq();
                    for _ in 0..8 {
                        drives.skip();
                    }
                    let delay = drives.time_to_next_byte(now);
                    self.schedule_next(State::WriteSector2, delay, queue, now);
                    return;
                }

                State::WriteSector2 => {
                    if self.status_register & STATUS_DRQ != 0 {
                        self.status_register &= !STATUS_BUSY;
                        self.reset_drq();
                        self.status_register |= STATUS_LOST_DATA;
                        self.intrq = true;
                        return;
                    }
                    drives.skip();
                    let delay = drives.time_to_next_byte(now);
                    self.schedule_next(State::WriteSector3, delay, queue, now);
                    return;
                }

                State::WriteSector3 => {
                    if self.double_density {
                        for _ in 0..11 {
                            drives.skip();
                        }
                        for _ in 0..12 {
                            self.vwrite(drives, 0);
                        }
                    } else {
                        for _ in 0..6 {
                            self.vwrite(drives, 0);
                        }
                    }
                    let delay = drives.time_to_next_byte(now);
                    self.schedule_next(State::WriteSector4, delay, queue, now);
                    return;
                }

                State::WriteSector4 => {
                    self.reset_crc_preamble();
                    if self.command_register & 1 != 0 {
                        self.vwrite(drives, 0xf8);
                    } else {
                        self.vwrite(drives, 0xfb);
                    }
                    let delay = drives.time_to_next_byte(now);
                    self.schedule_next(State::WriteSector5, delay, queue, now);
                    return;
                }

                State::WriteSector5 => {
                    let mut data = self.data_register;
                    if self.status_register & STATUS_DRQ != 0 {
                        data = 0;
                        self.status_register |= STATUS_LOST_DATA;
                        self.reset_drq();
                    }
                    self.vwrite(drives, data);
                    self.bytes_left -= 1;
                    if self.bytes_left > 0 {
                        self.set_drq();
                        let delay = drives.time_to_next_byte(now);
                        self.schedule_next(State::WriteSector5, delay, queue, now);
                        return;
                    }
                    self.write_crc16(drives);
                    let delay = drives.time_to_next_byte(now) + w_microsec(20);
                    self.schedule_next(State::WriteSector6, delay, queue, now);
                    return;
                }

                State::WriteSector6 => {
                    self.vwrite(drives, 0xfe);
                    self.status_register &= !STATUS_BUSY;
                    self.intrq = true;
                    return;
                }

                State::Type3Step1 => {
                    match self.command_register & 0xf0 {
                        0xc0 => {
                            self.index_holes_count = 0;
                            let delay = drives.time_to_next_idam(now);
                            self.schedule_next(State::ReadAddress1, delay, queue, now);
                            return;
                        }
                        0xe0 => {
                            log::warn!(target: "core::floppy::wd279x", "read track not implemented");
                            self.status_register &= !STATUS_BUSY;
                            self.intrq = true;
                        }
                        0xf0 => {
                            self.state = State::WriteTrack1;
                            continue;
                        }
                        _ => {}
                    }
                    return;
                }

                State::ReadAddress1 => {
                    let found = drives.next_idam();
                    if drives.new_index_pulse() {
                        self.index_holes_count += 1;
                        if self.index_holes_count >= 6 {
                            self.status_register &= !STATUS_BUSY;
                            self.status_register |= STATUS_RNF;
                            self.intrq = true;
                            return;
                        }
                    }
                    if !found {
                        let delay = drives.time_to_next_idam(now);
                        self.schedule_next(State::ReadAddress1, delay, queue, now);
                        return;
                    }
                    self.reset_crc_preamble();
                    let _ = self.vread(drives);
                    let delay = drives.time_to_next_byte(now);
                    self.schedule_next(State::ReadAddress2, delay, queue, now);
                    return;
                }

                State::ReadAddress2 => {
                    self.bytes_left = 5;
                    self.data_register = self.vread(drives);
                    // At command end this is transferred to the
                    // sector register.
                    self.track_register_tmp = self.data_register;
                    self.set_drq();
                    let delay = drives.time_to_next_byte(now);
                    self.schedule_next(State::ReadAddress3, delay, queue, now);
                    return;
                }

                State::ReadAddress3 => {
                    if self.bytes_left > 0 {
                        self.data_register = self.vread(drives);
                        self.bytes_left -= 1;
                        self.set_drq();
                        let delay = drives.time_to_next_byte(now);
                        self.schedule_next(State::ReadAddress3, delay, queue, now);
                        return;
                    }
                    self.sector_register = self.track_register_tmp;
                    if self.crc != 0 {
                        self.status_register |= STATUS_CRC_ERROR;
                    }
                    self.status_register &= !STATUS_BUSY;
                    self.intrq = true;
                    return;
                }

                State::WriteTrack1 => {
                    if drives.write_protect() {
                        self.status_register &= !STATUS_BUSY;
                        self.status_register |= STATUS_WRITE_PROTECT;
                        self.intrq = true;
                        return;
                    }
                    self.set_drq();
                    self.schedule_next(State::WriteTrack2, 6 * BYTE_TIME, queue, now);
                    return;
                }

                State::WriteTrack2 => {
                    if self.status_register & STATUS_DRQ != 0 {
                        self.reset_drq();
                        self.status_register |= STATUS_LOST_DATA;
                        self.status_register &= !STATUS_BUSY;
                        self.intrq = true;
                        return;
                    }
                    let delay = drives.time_to_next_idam(now);
                    self.schedule_next(State::WriteTrack2b, delay, queue, now);
                    return;
                }

                State::WriteTrack2b => {
                    if !drives.new_index_pulse() {
                        let delay = drives.time_to_next_idam(now);
                        self.schedule_next(State::WriteTrack2b, delay, queue, now);
                        return;
                    }
                    self.state = State::WriteTrack3;
                    continue;
                }

                State::WriteTrack3 => {
                    if drives.new_index_pulse() {
                        self.reset_drq();
                        self.status_register &= !STATUS_BUSY;
                        self.intrq = true;
                        return;
                    }
                    let mut data = self.data_register;
                    if self.status_register & STATUS_DRQ != 0 {
                        data = 0;
                        self.status_register |= STATUS_LOST_DATA;
                    }
                    self.set_drq();
                    if !self.double_density {
                        if data == 0xf7 {
                            self.write_crc16(drives);
                        } else if (0xf8..=0xfb).contains(&data) {
                            self.crc = CRC16_RESET;
                            self.vwrite(drives, data);
                        } else if data == 0xfe {
                            self.crc = CRC16_RESET;
                            drives.write_idam();
                            self.crc = crc16_byte(self.crc, 0xfe);
                        } else {
                            self.vwrite(drives, data);
                        }
                    } else if data == 0xf7 {
                        self.write_crc16(drives);
                    } else if data == 0xfe {
                        drives.write_idam();
                        self.crc = crc16_byte(self.crc, 0xfe);
                    } else if data == 0xf5 {
                        self.crc = CRC16_RESET;
                        self.crc = crc16_byte(self.crc, 0xa1);
                        self.crc = crc16_byte(self.crc, 0xa1);
                        self.vwrite(drives, 0xa1);
                    } else {
                        if data == 0xf6 {
                            data = 0xc2;
                        }
                        self.vwrite(drives, data);
                    }
                    let delay = drives.time_to_next_byte(now);
                    self.schedule_next(State::WriteTrack3, delay, queue, now);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::floppy::vdrive::Disk;

    fn setup() -> (Fdc, Drives, EventQueue) {
        let mut queue = EventQueue::new();
        let mut drives = Drives::new();
        drives.insert_disk(0, Disk::blank(40, 1, 2048), &mut queue, 0);
        (Fdc::new(WdType::Wd2793), drives, queue)
    }

    #[test]
    fn force_interrupt_terminate_clears_busy_without_intrq() {
        let (mut fdc, mut drives, mut queue) = setup();
        fdc.write(&mut drives, &mut queue, 0, 0, 0x00); // RESTORE
        assert_ne!(fdc.status_register & STATUS_BUSY, 0);
        fdc.write(&mut drives, &mut queue, 0, 0, 0xD0);
        assert_eq!(fdc.status_register & STATUS_BUSY, 0);
        assert!(!fdc.intrq());
    }

    #[test]
    fn force_interrupt_immediate_sets_intrq() {
        let (mut fdc, mut drives, mut queue) = setup();
        fdc.write(&mut drives, &mut queue, 0, 0, 0x00);
        fdc.write(&mut drives, &mut queue, 0, 0, 0xD8);
        assert_eq!(fdc.status_register & STATUS_BUSY, 0);
        assert!(fdc.intrq());
    }

    #[test]
    fn command_register_updates_but_is_ignored_while_busy() {
        let (mut fdc, mut drives, mut queue) = setup();
        fdc.write(&mut drives, &mut queue, 0, 0, 0x00);
        let pending = fdc.state_event;
        fdc.write(&mut drives, &mut queue, 0, 0, 0x01);
        assert_eq!(fdc.command_register, 0x01);
        assert_eq!(fdc.state_event, pending);
        assert_ne!(fdc.status_register & STATUS_BUSY, 0);
    }

    #[test]
    fn restore_at_track_zero_forces_track_register_to_zero_then_completes() {
        let (mut fdc, mut drives, mut queue) = setup();
        fdc.track_register = 5;
        fdc.write(&mut drives, &mut queue, 0, 0, 0x00); // RESTORE, no verify bit
        assert_eq!(fdc.track_register, 0);
        assert_eq!(fdc.state, State::VerifyTrack1);
        let due = w_millisec(STEPPING_RATE[0]);
        let (_, tag) = queue.pop_due(due).expect("step delay scheduled");
        assert_eq!(tag, EventTag::FdcState);
        fdc.service(&mut drives, &mut queue, due);
        assert_eq!(fdc.status_register & STATUS_BUSY, 0);
        assert!(fdc.intrq());
    }

    #[test]
    fn inverted_data_variant_flips_status_byte_on_read() {
        let mut queue = EventQueue::new();
        let mut drives = Drives::new();
        drives.insert_disk(0, Disk::blank(40, 1, 2048), &mut queue, 0);
        let mut fdc = Fdc::new(WdType::Wd2791);
        let raw = fdc.read(&drives, 0);
        let plain = !raw;
        let mut fdc_plain = Fdc::new(WdType::Wd2793);
        assert_eq!(fdc_plain.read(&drives, 0), plain);
    }

    /// Scenario S2: a hand-built formatted track (standing in for a
    /// decoded DMK image, whose codec is out of scope) carrying one
    /// sector; a Read Sector command recovers its 256 bytes byte-for-byte
    /// with no error status set.
    #[test]
    fn read_sector_recovers_formatted_sector_contents() {
        let (mut fdc, mut drives, mut queue) = setup();
        fdc.set_dden(&mut drives, true);

        let sector_data: Vec<u8> = (0..256u16).map(|i| i as u8).collect();

        let mut id_crc = CRC16_RESET;
        for _ in 0..3 {
            id_crc = crc16_byte(id_crc, 0xa1);
        }
        for &b in &[0xfeu8, 0, 0, 1, 1] {
            id_crc = crc16_byte(id_crc, b);
        }

        let mut data_crc = CRC16_RESET;
        for _ in 0..3 {
            data_crc = crc16_byte(data_crc, 0xa1);
        }
        data_crc = crc16_byte(data_crc, 0xfb);
        for &b in &sector_data {
            data_crc = crc16_byte(data_crc, b);
        }

        for _ in 0..12 {
            drives.write(0x4e); // gap bytes: head_pos 128 -> 140
        }
        drives.write_idam(); // 0xFE mark, pos 140
        drives.write(0); // track
        drives.write(0); // side
        drives.write(1); // sector
        drives.write(1); // length code -> 256 bytes
        drives.write((id_crc >> 8) as u8);
        drives.write((id_crc & 0xff) as u8);
        drives.write(0xfb); // data address mark
        for &b in &sector_data {
            drives.write(b);
        }
        drives.write((data_crc >> 8) as u8);
        drives.write((data_crc & 0xff) as u8);

        fdc.write(&mut drives, &mut queue, 0, 1, 0); // track register
        fdc.write(&mut drives, &mut queue, 0, 2, 1); // sector register
        fdc.write(&mut drives, &mut queue, 0, 0, 0x80); // READ SECTOR

        let mut received = Vec::new();
        let mut now: Tick = 0;
        for _ in 0..2000 {
            if fdc.drq() {
                received.push(fdc.read(&drives, 3));
            }
            if fdc.intrq() {
                break;
            }
            now = now.wrapping_add(2_000_000);
            if let Some((_, EventTag::FdcState)) = queue.pop_due(now) {
                fdc.service(&mut drives, &mut queue, now);
            }
        }

        assert!(fdc.intrq(), "read sector never completed");
        assert_eq!(fdc.read(&drives, 0) & (STATUS_CRC_ERROR | STATUS_RNF), 0);
        assert_eq!(received, sector_data);
    }
}
