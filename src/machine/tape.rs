//! Cassette pulse reader/writer, CAS block framing and the motor/output
//! deck logic a PIA side drives (spec.md §4.10, §6 "Tape"). Grounded in
//! `original_source/tape.c`. Host decode of actual CAS/ASC/WAV files is
//! an external collaborator (spec.md §6); this module only consumes the
//! abstract pulse interface spec.md §3 describes.
//!
//! The fast-loader and rewrite breakpoint handlers that intercept BASIC's
//! cassette routines live in [`crate::machine::tape_fastload`], installed
//! through the breakpoint registry's public API rather than reaching
//! into this module's internals.

use crate::core::scheduler::{EventId, EventQueue, EventTag};
use crate::core::tick::{tick_delta, Tick};

pub const OSCILLATOR_RATE: u32 = 14_318_180;

/// Cycle counts for a Kansas-City-style 1200/2400 Hz encoding: a "1" bit
/// is one cycle at 2400 Hz, a "0" bit one cycle at 1200 Hz. The original
/// header these came from was not part of the retrieved source; the
/// values follow directly from the well known Dragon/CoCo cassette baud
/// rates rather than being invented.
const TAPE_BIT1_LENGTH: u32 = OSCILLATOR_RATE / 2400;
const TAPE_BIT0_LENGTH: u32 = OSCILLATOR_RATE / 1200;
const TAPE_AV_BIT_LENGTH: u32 = (TAPE_BIT0_LENGTH + TAPE_BIT1_LENGTH) / 2;

pub const TAPE_FAST: u8 = 1 << 0;
pub const TAPE_PAD: u8 = 1 << 1;
pub const TAPE_REWRITE: u8 = 1 << 2;

/// The abstract tape medium (spec.md §3 "Tape", §6): a lazy sequence of
/// `(polarity, width_in_ticks)` pulses on read, and raw level/duration
/// samples on write -- generalised from a plain polarity bit to a level
/// byte so both `tape_bit_out`'s canonical two-level encoding and
/// `tape_update_output`'s real-time port capture share one primitive,
/// exactly as `tape_sample_out` does in the original.
pub trait TapeImage {
    fn read_pulse(&mut self) -> Option<(bool, u32)>;
    fn write_sample(&mut self, level: u8, duration: u32);
    fn seek(&mut self, byte_offset: u64);
    fn tell(&self) -> u64;
    fn rewind(&mut self);
}

/// Fake-leader synthesis state (`tape_pulse_in`'s `fake_*` fields):
/// manufactures a run of `0x55` leader bytes, optionally followed by one
/// `0x3c` sync byte, ahead of a seek -- used when skipping to a named
/// file so the BASIC loader still sees a believable leader.
#[derive(Default, Clone, Copy)]
struct FakeLeader {
    count: u32,
    sync: bool,
    bit_index: u8,
    pulse_index: u8,
    bit: bool,
    byte: u8,
}

pub struct Tape {
    image: Box<dyn TapeImage>,
    fake: FakeLeader,
}

impl Tape {
    pub fn new(image: Box<dyn TapeImage>) -> Self {
        Self { image, fake: FakeLeader::default() }
    }

    pub fn seek(&mut self, byte_offset: u64) {
        self.image.seek(byte_offset);
    }

    pub fn tell(&self) -> u64 {
        self.image.tell()
    }

    pub fn rewind(&mut self) {
        self.image.rewind();
    }

    /// Arrange for the next `count` bytes of pulses to be synthesized
    /// leader instead of read from the image, with a sync byte ending
    /// the run if `with_sync` (`tape_seek_to_file`).
    pub fn prime_fake_leader(&mut self, count: u32, with_sync: bool) {
        self.fake = FakeLeader { count, sync: with_sync, ..Default::default() };
    }

    fn pulse_in(&mut self) -> Option<(bool, u32)> {
        if self.fake.count > 0 {
            if self.fake.pulse_index == 0 {
                if self.fake.bit_index == 0 {
                    if self.fake.count == 1 && self.fake.sync {
                        self.fake.byte = 0x3c;
                        self.fake.sync = false;
                    } else {
                        self.fake.byte = 0x55;
                    }
                }
                self.fake.bit = self.fake.byte & (1 << self.fake.bit_index) != 0;
            }
            let width = if self.fake.bit { TAPE_BIT1_LENGTH / 2 } else { TAPE_BIT0_LENGTH / 2 };
            let polarity = self.fake.pulse_index == 0;
            self.fake.pulse_index ^= 1;
            if self.fake.pulse_index == 0 {
                self.fake.bit_index = (self.fake.bit_index + 1) & 7;
                if self.fake.bit_index == 0 {
                    self.fake.count -= 1;
                }
            }
            return Some((polarity, width));
        }
        self.image.read_pulse()
    }

    pub(crate) fn bit_in(&mut self) -> Option<bool> {
        let (_, mut pulse1_width) = self.pulse_in()?;
        loop {
            let pulse0_width = pulse1_width;
            let (phase, next_width) = self.pulse_in()?;
            pulse1_width = next_width;
            let cycle_width = pulse0_width + pulse1_width;
            if phase && cycle_width >= TAPE_BIT1_LENGTH / 2 && cycle_width <= TAPE_BIT0_LENGTH * 2 {
                return Some(cycle_width < TAPE_AV_BIT_LENGTH);
            }
        }
    }

    pub fn byte_in(&mut self) -> Option<u8> {
        let mut byte = 0u8;
        for _ in 0..8 {
            let bit = self.bit_in()?;
            byte = (byte >> 1) | if bit { 0x80 } else { 0 };
        }
        Some(byte)
    }

    pub fn bit_out(&mut self, bit: bool, rewrite_bit_count: &mut u8) {
        let width = if bit { TAPE_BIT1_LENGTH / 2 } else { TAPE_BIT0_LENGTH / 2 };
        self.image.write_sample(0xf8, width);
        self.image.write_sample(0x00, width);
        *rewrite_bit_count = (*rewrite_bit_count + 1) & 7;
    }

    pub fn byte_out(&mut self, mut byte: u8, rewrite_bit_count: &mut u8) {
        for _ in 0..8 {
            self.bit_out(byte & 1 != 0, rewrite_bit_count);
            byte >>= 1;
        }
    }
}

/// One parsed CAS header block (`struct tape_file`).
#[derive(Debug, Clone)]
pub struct TapeFileInfo {
    pub offset: u64,
    pub name: String,
    pub file_type: u8,
    pub ascii_flag: u8,
    pub gap_flag: u8,
    pub start_address: u16,
    pub load_address: u16,
    pub checksum_error: u8,
}

/// Scan for the `0x3c` sync byte that precedes every CAS block
/// (`block_sync`).
fn block_sync(tape: &mut Tape) -> Option<()> {
    let mut byte = 0u8;
    loop {
        let bit = tape.bit_in()?;
        byte = (byte >> 1) | if bit { 0x80 } else { 0 };
        if byte == 0x3c {
            return Some(());
        }
    }
}

/// Read one CAS block (type, size, data, checksum byte) after syncing.
/// `sum` comes back as the computed checksum minus the block's trailing
/// checksum byte, which should be zero for a good block (`block_in`).
pub(crate) fn block_in(tape: &mut Tape) -> Option<(u8, u8, Vec<u8>, u64, i32)> {
    block_sync(tape)?;
    let offset = tape.tell();
    let block_type = tape.byte_in()?;
    let size = tape.byte_in()?;
    let mut sum: i32 = block_type as i32 + size as i32;
    let mut data = Vec::with_capacity(size as usize);
    for _ in 0..size {
        let b = tape.byte_in()?;
        data.push(b);
        sum += b as i32;
    }
    let sumbyte = tape.byte_in()?;
    sum -= sumbyte as i32;
    Some((block_type, size, data, offset, sum))
}

/// Scan forward for the next named header block, matching
/// `tape_file_next`. When `skip_bad`, a malformed or non-header block
/// seeks back to just past its sync byte and keeps scanning rather than
/// giving up.
pub fn tape_file_next(tape: &mut Tape, skip_bad: bool) -> Option<TapeFileInfo> {
    loop {
        let (block_type, size, data, offset, sum) = block_in(tape)?;
        if skip_bad && (block_type != 0 || sum != 0 || size < 15) {
            tape.seek(offset);
            continue;
        }
        if block_type != 0 || size < 15 {
            continue;
        }
        let mut name_bytes = data[0..8].to_vec();
        while name_bytes.last() == Some(&b' ') {
            name_bytes.pop();
        }
        let name = String::from_utf8_lossy(&name_bytes).into_owned();
        return Some(TapeFileInfo {
            offset,
            name,
            file_type: data[8],
            ascii_flag: data[9],
            gap_flag: data[10],
            start_address: (data[11] as u16) << 8 | data[12] as u16,
            load_address: (data[13] as u16) << 8 | data[14] as u16,
            checksum_error: sum as u8,
        });
    }
}

/// Motor/output deck state a PIA hooks into (`tape_update_motor`,
/// `tape_update_output`, `waggle_bit`, `flush_output`, `tape_desync`).
pub struct TapeDeck {
    pub input: Option<Tape>,
    pub output: Option<Tape>,
    motor: bool,
    pub fast: bool,
    pub pad: bool,
    pub rewrite: bool,
    rewrite_have_sync: bool,
    rewrite_leader_count: u32,
    rewrite_bit_count: u8,
    waggle_id: Option<EventId>,
    flush_id: Option<EventId>,
    last_write_tick: Tick,
    /// The input-bit sense for PIA1 side A bit 0, updated by
    /// [`TapeDeck::service_waggle`].
    pub input_bit: bool,
}

impl Default for TapeDeck {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            motor: false,
            fast: false,
            pad: false,
            rewrite: false,
            rewrite_have_sync: false,
            rewrite_leader_count: 256,
            rewrite_bit_count: 0,
            waggle_id: None,
            flush_id: None,
            last_write_tick: 0,
            input_bit: true,
        }
    }
}

impl TapeDeck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach_input(&mut self, tape: Tape) {
        self.input = Some(tape);
        self.rewrite_have_sync = false;
        self.rewrite_leader_count = 256;
    }

    pub fn detach_input(&mut self) {
        self.input = None;
    }

    pub fn attach_output(&mut self, tape: Tape) {
        self.output = Some(tape);
        self.rewrite_bit_count = 0;
    }

    /// `tape_close_writing`: flush any still-open rewrite block and stop
    /// the flush-scheduler before dropping the output handle.
    pub fn detach_output(&mut self, queue: &mut EventQueue, output_sample: u8, now: Tick) {
        if self.rewrite {
            if let Some(out) = self.output.as_mut() {
                out.byte_out(0x55, &mut self.rewrite_bit_count);
                out.byte_out(0x55, &mut self.rewrite_bit_count);
            }
        }
        if self.output.is_some() {
            if let Some(id) = self.flush_id.take() {
                queue.dequeue(id);
            }
            self.write_output_sample(output_sample, now);
        }
        self.output = None;
    }

    fn write_output_sample(&mut self, sample: u8, now: Tick) {
        if let Some(out) = self.output.as_mut() {
            let length = tick_delta(now, self.last_write_tick).max(0) as u32;
            out.image.write_sample(sample, length);
        }
        self.last_write_tick = now;
    }

    /// Called whenever PIA1 side A's control register is written
    /// (`tape_update_motor`). `output_sample` is PIA1 side A's current
    /// port output byte, needed to flush a trailing sample on motor-off.
    pub fn on_motor_control_write(
        &mut self,
        control_register: u8,
        now: Tick,
        queue: &mut EventQueue,
        output_sample: u8,
    ) {
        let new_motor = control_register & 0x08 != 0;
        if new_motor == self.motor {
            return;
        }
        if new_motor {
            if self.input.is_some() && !self.fast && self.waggle_id.is_none() {
                self.waggle_id = Some(queue.schedule(now, EventTag::TapeEdge));
            }
            if self.output.is_some() {
                self.last_write_tick = now;
                self.flush_id = Some(queue.schedule(now + OSCILLATOR_RATE / 2, EventTag::AudioFlush));
            }
        } else {
            if let Some(id) = self.waggle_id.take() {
                queue.dequeue(id);
            }
            if let Some(id) = self.flush_id.take() {
                queue.dequeue(id);
            }
            self.write_output_sample(output_sample & 0xfc, now);
            if self.pad || self.rewrite {
                self.desync(256);
            }
        }
        self.motor = new_motor;
    }

    /// Called whenever PIA1 side A's data register is written
    /// (`tape_update_output`); a no-op while rewriting, since canonical
    /// pulses are written explicitly by the fast-loader breakpoints
    /// instead of sampled from the live port.
    pub fn on_output_write(&mut self, port_output: u8, now: Tick) {
        if !self.motor || self.output.is_none() || self.rewrite {
            return;
        }
        self.write_output_sample(port_output & 0xfc, now);
    }

    /// Due-event handler for [`EventTag::TapeEdge`] (`waggle_bit`).
    /// Re-arms itself on the queue when another pulse is available,
    /// keeping `waggle_id` current so a later motor-off can still
    /// dequeue it.
    pub fn service_waggle(&mut self, now: Tick, queue: &mut EventQueue) {
        let pulse = self.input.as_mut().and_then(|t| t.pulse_in());
        match pulse {
            None => {
                self.waggle_id = None;
            }
            Some((polarity, width)) => {
                self.input_bit = !polarity;
                self.waggle_id = Some(queue.schedule(now.wrapping_add(width), EventTag::TapeEdge));
            }
        }
    }

    /// Due-event handler for [`EventTag::AudioFlush`] (`flush_output`).
    /// Re-arms itself while the motor is still on.
    pub fn service_flush(&mut self, now: Tick, port_output: u8, queue: &mut EventQueue) {
        self.write_output_sample(port_output & 0xfc, now);
        if self.motor {
            self.flush_id = Some(queue.schedule(now.wrapping_add(OSCILLATOR_RATE / 2), EventTag::AudioFlush));
        } else {
            self.flush_id = None;
        }
    }

    /// `tape_desync`: complete the in-flight output byte, then arrange
    /// for the next write to resynchronise with `leader` bytes of fresh
    /// leader (rewrite side) and/or fake leader (pad side, read side).
    pub fn desync(&mut self, leader: u32) {
        if self.rewrite {
            while self.rewrite_bit_count != 0 {
                if let Some(out) = self.output.as_mut() {
                    out.bit_out(false, &mut self.rewrite_bit_count);
                } else {
                    self.rewrite_bit_count = 0;
                }
            }
            self.rewrite_have_sync = false;
            self.rewrite_leader_count = leader;
        }
        if self.pad {
            if let Some(input) = self.input.as_mut() {
                input.prime_fake_leader(leader, false);
            }
        }
    }

    /// `rewrite_sync`: on first BLKIN sync after a desync, emit fresh
    /// leader plus a sync byte to the output tape.
    pub fn rewrite_sync(&mut self) {
        if self.rewrite_have_sync || !self.rewrite {
            return;
        }
        if let Some(out) = self.output.as_mut() {
            for _ in 0..self.rewrite_leader_count {
                out.byte_out(0x55, &mut self.rewrite_bit_count);
            }
            out.byte_out(0x3c, &mut self.rewrite_bit_count);
        }
        self.rewrite_have_sync = true;
    }

    /// `rewrite_bitin`: re-emit the bit BITIN just decoded, once synced.
    pub fn rewrite_bitin(&mut self, bit: bool) {
        if self.rewrite && self.rewrite_have_sync {
            if let Some(out) = self.output.as_mut() {
                out.bit_out(bit, &mut self.rewrite_bit_count);
            }
        }
    }

    pub fn set_state(&mut self, flags: u8) {
        self.fast = flags & TAPE_FAST != 0;
        self.pad = flags & TAPE_PAD != 0;
        self.rewrite = flags & TAPE_REWRITE != 0;
    }

    pub fn state(&self) -> u8 {
        (if self.fast { TAPE_FAST } else { 0 })
            | (if self.pad { TAPE_PAD } else { 0 })
            | (if self.rewrite { TAPE_REWRITE } else { 0 })
    }

    pub fn is_motor_on(&self) -> bool {
        self.motor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct FakeImage {
        pulses: VecDeque<(bool, u32)>,
        written: Vec<(u8, u32)>,
        pos: u64,
    }

    impl TapeImage for FakeImage {
        fn read_pulse(&mut self) -> Option<(bool, u32)> {
            self.pulses.pop_front()
        }
        fn write_sample(&mut self, level: u8, duration: u32) {
            self.written.push((level, duration));
        }
        fn seek(&mut self, byte_offset: u64) {
            self.pos = byte_offset;
        }
        fn tell(&self) -> u64 {
            self.pos
        }
        fn rewind(&mut self) {
            self.pos = 0;
        }
    }

    fn bit_pulses(bit: bool) -> [(bool, u32); 2] {
        let half = if bit { TAPE_BIT1_LENGTH / 2 } else { TAPE_BIT0_LENGTH / 2 };
        [(true, half), (false, half)]
    }

    fn byte_pulses(byte: u8) -> Vec<(bool, u32)> {
        let mut out = Vec::new();
        for i in 0..8 {
            let bit = byte & (1 << i) != 0;
            out.extend_from_slice(&bit_pulses(bit));
        }
        out
    }

    #[test]
    fn byte_in_decodes_a_synthesized_byte() {
        let pulses: VecDeque<_> = byte_pulses(0xa5).into();
        let image = Box::new(FakeImage { pulses, written: Vec::new(), pos: 0 });
        let mut tape = Tape::new(image);
        assert_eq!(tape.byte_in(), Some(0xa5));
    }

    #[test]
    fn block_sync_finds_the_sync_byte_after_noise() {
        let mut pulses: VecDeque<(bool, u32)> = byte_pulses(0x55).into();
        pulses.extend(byte_pulses(0x3c));
        let image = Box::new(FakeImage { pulses, written: Vec::new(), pos: 0 });
        let mut tape = Tape::new(image);
        assert!(block_sync(&mut tape).is_some());
    }

    #[test]
    fn fake_leader_synthesizes_leader_then_sync_without_touching_image() {
        let image = Box::new(FakeImage { pulses: VecDeque::new(), written: Vec::new(), pos: 0 });
        let mut tape = Tape::new(image);
        tape.prime_fake_leader(2, true);
        assert_eq!(tape.byte_in(), Some(0x55));
        assert_eq!(tape.byte_in(), Some(0x3c));
    }

    #[test]
    fn motor_off_flushes_pending_output_sample() {
        let image = Box::new(FakeImage { pulses: VecDeque::new(), written: Vec::new(), pos: 0 });
        let mut deck = TapeDeck::new();
        deck.attach_output(Tape::new(image));
        let mut queue = EventQueue::new();
        deck.on_motor_control_write(0x08, 0, &mut queue, 0xfc);
        deck.on_motor_control_write(0x00, 1000, &mut queue, 0xfc);
        assert!(deck.waggle_id.is_none());
        assert!(deck.flush_id.is_none());
    }
}
