//! Virtual floppy drive set: disk/track storage, head positioning and
//! index-pulse timing (spec.md §4.7.2). Grounded in
//! `original_source/vdrive.c`, which keeps all of this as module-level
//! statics addressing whichever drive is currently selected; ported
//! here as a `Drives` struct so a [`crate::machine::Machine`] can own
//! the state directly instead of through global mutable statics.
//!
//! Head position is deliberately *not* kept continuously up to date:
//! like the original, it is only recomputed from elapsed ticks inside
//! [`Drives::time_to_next_idam`], and [`Drives::next_idam`] relies on
//! that recomputation having already happened. Callers must call
//! `time_to_next_idam` before `next_idam`, exactly as the WD279x
//! state machine in `wd279x.rs` does.

use super::super::scheduler::{EventId, EventQueue, EventTag};
use super::super::tick::{tick_delta, Tick};

pub const MAX_DRIVES: usize = 4;
pub const MAX_HEADS: usize = 2;
pub const MAX_TRACKS: usize = 256;
const MAX_IDAMS: usize = 64;
const IDAM_DENSITY_BIT: u16 = 0x8000;
const IDAM_POS_MASK: u16 = 0x3fff;

const OSCILLATOR_RATE: u32 = 14_318_180;
const BYTE_TIME: u32 = OSCILLATOR_RATE / 31250;

/// One side of one cylinder. `idams` records up to 64 IDAM positions
/// found on the track, packed as `position | density_bit`; a zero
/// entry means the slot is unused and always sorts after a real one,
/// matching `compar_idams` in the original.
#[derive(Clone)]
pub struct Track {
    pub data: Vec<u8>,
    pub idams: [u16; MAX_IDAMS],
}

impl Track {
    pub fn new(length: usize) -> Self {
        Self {
            data: vec![0; length],
            idams: [0; MAX_IDAMS],
        }
    }
}

/// Shifts every non-zero entry left over any zero holes, preserving
/// relative order, so zero entries always trail.
fn compact_idams(idams: &mut [u16; MAX_IDAMS]) {
    let mut write = 0;
    for read in 0..MAX_IDAMS {
        if idams[read] != 0 {
            if write != read {
                idams[write] = idams[read];
                idams[read] = 0;
            }
            write += 1;
        }
    }
}

/// Inserts `value` into its sorted-by-position slot, keeping the table
/// ascending with zero entries trailing (spec.md §8 property #6).
fn insert_idam_sorted(idams: &mut [u16; MAX_IDAMS], value: u16) {
    compact_idams(idams);
    let count = idams.iter().take_while(|&&s| s != 0).count();
    if count >= MAX_IDAMS {
        return;
    }
    let insert_at = idams[..count]
        .iter()
        .position(|&s| (s & IDAM_POS_MASK) >= (value & IDAM_POS_MASK))
        .unwrap_or(count);
    for i in (insert_at..count).rev() {
        idams[i + 1] = idams[i];
    }
    idams[insert_at] = value;
}

/// A disk image: `tracks[cyl][head]`.
pub struct Disk {
    pub write_protect: bool,
    /// Whether `Drives::eject_disk` is expected to flush modified
    /// track data back to a source file; the actual file IO is a
    /// host-layer concern (spec.md §4.7.3) -- the core only carries
    /// the flag and hands the disk back to the caller on eject.
    pub write_back: bool,
    pub num_heads: usize,
    pub track_length: usize,
    pub tracks: Vec<Vec<Track>>,
}

impl Disk {
    pub fn blank(num_cyls: usize, num_heads: usize, track_length: usize) -> Self {
        Self {
            write_protect: false,
            write_back: false,
            num_heads,
            track_length,
            tracks: (0..num_cyls)
                .map(|_| (0..num_heads).map(|_| Track::new(track_length)).collect())
                .collect(),
        }
    }
}

#[derive(Default)]
struct DriveSlot {
    disk: Option<Disk>,
    current_cyl: usize,
}

/// Up to four drives, one of which is "current" at a time -- the
/// controller only ever talks to whichever drive its drive-select
/// lines point at (spec.md §4.7.2). Head position, track timing and
/// the index-pulse line are tracked once for the current drive, not
/// per drive, matching the original's single set of statics.
pub struct Drives {
    slots: [DriveSlot; MAX_DRIVES],
    current: usize,
    direction: i32,
    head: usize,
    double_density: bool,
    head_incr: u32,

    head_pos: u32,
    track_start_tick: Tick,
    index_due_tick: Tick,
    index_state: bool,
    /// Edge latch: set whenever the index line rises, consumed by
    /// `new_index_pulse`. The WD279x IDAM search loop uses this to
    /// count revolutions for its seek/verify timeout.
    new_pulse: bool,
    index_event: Option<EventId>,
    index_reset_event: Option<EventId>,
}

impl Default for Drives {
    fn default() -> Self {
        Self::new()
    }
}

impl Drives {
    pub fn new() -> Self {
        Self {
            slots: [
                DriveSlot::default(),
                DriveSlot::default(),
                DriveSlot::default(),
                DriveSlot::default(),
            ],
            current: 0,
            direction: 1,
            head: 0,
            double_density: false,
            head_incr: 2,
            head_pos: 128,
            track_start_tick: 0,
            index_due_tick: 0,
            index_state: false,
            new_pulse: false,
            index_event: None,
            index_reset_event: None,
        }
    }

    pub fn insert_disk(&mut self, drive: usize, disk: Disk, queue: &mut EventQueue, now: Tick) {
        self.eject_disk(drive, queue);
        self.slots[drive].disk = Some(disk);
        self.update_signals(queue, now);
    }

    /// Removes and returns the disk in `drive`, if any. The caller is
    /// responsible for persisting it first when `disk.write_back` is
    /// set (spec.md §4.7.3) -- that is host IO, out of scope here.
    pub fn eject_disk(&mut self, drive: usize, queue: &mut EventQueue) -> Option<Disk> {
        let disk = self.slots[drive].disk.take();
        if drive == self.current && disk.is_some() {
            if let Some(id) = self.index_event.take() {
                queue.dequeue(id);
            }
            if let Some(id) = self.index_reset_event.take() {
                queue.dequeue(id);
            }
            self.index_state = false;
        }
        disk
    }

    pub fn set_drive(&mut self, drive: usize, queue: &mut EventQueue, now: Tick) {
        if drive >= MAX_DRIVES {
            return;
        }
        self.current = drive;
        self.update_signals(queue, now);
    }

    pub fn set_dden(&mut self, dden: bool) {
        self.double_density = dden;
        self.head_incr = if dden { 1 } else { 2 };
    }

    /// Side-select (`SSO`), for the two drives in the pack that carry it.
    pub fn set_head(&mut self, head: usize) {
        if head < MAX_HEADS {
            self.head = head;
        }
    }

    pub fn set_direction(&mut self, forward: bool) {
        self.direction = if forward { 1 } else { -1 };
    }

    pub fn ready(&self) -> bool {
        self.slots[self.current].disk.is_some()
    }

    pub fn track_zero(&self) -> bool {
        self.slots[self.current].current_cyl == 0
    }

    pub fn write_protect(&self) -> bool {
        self.slots[self.current]
            .disk
            .as_ref()
            .map(|d| d.write_protect)
            .unwrap_or(false)
    }

    pub fn index_pulse(&self) -> bool {
        self.index_state
    }

    pub fn head_position(&self) -> u32 {
        self.head_pos
    }

    /// Consumes and returns the index-pulse edge latch.
    pub fn new_index_pulse(&mut self) -> bool {
        std::mem::take(&mut self.new_pulse)
    }

    pub fn step(&mut self, queue: &mut EventQueue, now: Tick) {
        if self.ready() {
            let cyl = self.slots[self.current].current_cyl as i32;
            if self.direction > 0 || cyl > 0 {
                let next = (cyl + self.direction).clamp(0, MAX_TRACKS as i32 - 1);
                self.slots[self.current].current_cyl = next as usize;
            }
        }
        self.update_signals(queue, now);
    }

    pub fn write(&mut self, data: u8) {
        if !self.ready() {
            return;
        }
        let incr = self.head_incr;
        let cyl = self.slots[self.current].current_cyl;
        let head = self.head;
        let mut crossed = false;
        if let Some(disk) = self.slots[self.current].disk.as_mut() {
            if head < disk.num_heads {
                let length = disk.track_length;
                let track = &mut disk.tracks[cyl][head];
                for _ in 0..incr {
                    let pos = self.head_pos as usize;
                    if pos < track.data.len() {
                        track.data[pos] = data;
                        let mut cleared = false;
                        for slot in track.idams.iter_mut() {
                            if *slot != 0 && (*slot & IDAM_POS_MASK) as usize == pos {
                                *slot = 0;
                                cleared = true;
                            }
                        }
                        if cleared {
                            compact_idams(&mut track.idams);
                        }
                    }
                    self.head_pos += 1;
                }
                crossed = self.head_pos as usize >= length;
            } else {
                self.head_pos += incr;
            }
        }
        if crossed {
            self.set_index_high();
        }
    }

    pub fn skip(&mut self) {
        if !self.ready() {
            return;
        }
        self.head_pos += self.head_incr;
        if self.head_pos as usize >= self.track_length() {
            self.set_index_high();
        }
    }

    pub fn read(&mut self) -> u8 {
        if !self.ready() {
            return 0;
        }
        let cyl = self.slots[self.current].current_cyl;
        let head = self.head;
        let pos = self.head_pos as usize;
        let byte = self.slots[self.current]
            .disk
            .as_ref()
            .filter(|d| head < d.num_heads)
            .and_then(|d| d.tracks[cyl][head].data.get(pos))
            .copied()
            .unwrap_or(0);
        self.head_pos += self.head_incr;
        if self.head_pos as usize >= self.track_length() {
            self.set_index_high();
        }
        byte
    }

    /// Stamps an IDAM (`0xFE`) mark at the current head position and
    /// records it so later IDAM scans can find it. The pointer table is
    /// kept sorted ascending by position with zero entries trailing
    /// (spec.md §8 property #6), regardless of the order marks are
    /// stamped in.
    pub fn write_idam(&mut self) {
        if !self.ready() {
            return;
        }
        let incr = self.head_incr;
        let cyl = self.slots[self.current].current_cyl;
        let head = self.head;
        let density_bit = if self.double_density { IDAM_DENSITY_BIT } else { 0 };
        let pos = self.head_pos;
        let mut crossed = false;
        if let Some(disk) = self.slots[self.current].disk.as_mut() {
            if head < disk.num_heads {
                let length = disk.track_length;
                let track = &mut disk.tracks[cyl][head];
                if (pos + incr) as usize <= length {
                    for j in 0..incr {
                        let p = (pos + j) as usize;
                        track.data[p] = 0xfe;
                        for slot in track.idams.iter_mut() {
                            if *slot != 0 && (*slot & IDAM_POS_MASK) as usize == p {
                                *slot = 0;
                            }
                        }
                    }
                    let new_entry = (pos as u16 & IDAM_POS_MASK) | density_bit;
                    insert_idam_sorted(&mut track.idams, new_entry);
                }
                self.head_pos += incr;
                crossed = self.head_pos as usize >= length;
            } else {
                self.head_pos += incr;
            }
        }
        if crossed {
            self.set_index_high();
        }
    }

    pub fn time_to_next_byte(&self, now: Tick) -> u32 {
        let next = self
            .track_start_tick
            .wrapping_add((self.head_pos.wrapping_sub(128)).wrapping_mul(BYTE_TIME));
        let delta = tick_delta(next, now);
        if delta < 0 {
            1
        } else {
            delta as u32 + 1
        }
    }

    /// Recomputes `head_pos` from elapsed ticks and returns the delay
    /// to the next IDAM matching the controller's current density, or
    /// to the next index pulse if none is found on the rest of the
    /// track (spec.md §4.7.2).
    pub fn time_to_next_idam(&mut self, now: Tick) -> u32 {
        if !self.ready() {
            return OSCILLATOR_RATE / 5;
        }
        self.head_pos = 128 + (tick_delta(now, self.track_start_tick) as u32) / BYTE_TIME;
        let length = self.track_length() as u32;
        let density_bit = if self.double_density { IDAM_DENSITY_BIT } else { 0 };
        let mut next_pos = length;
        if let Some(track) = self.current_track() {
            for &slot in track.idams.iter() {
                if slot != 0 && (slot & IDAM_DENSITY_BIT) == density_bit {
                    let pos = (slot & IDAM_POS_MASK) as u32;
                    if self.head_pos < pos && pos < next_pos {
                        next_pos = pos;
                    }
                }
            }
        }
        if next_pos >= length {
            let d = tick_delta(self.index_due_tick, now);
            return (if d < 0 { 0 } else { d as u32 }) + 1;
        }
        let next_tick = self.track_start_tick.wrapping_add((next_pos - 128) * BYTE_TIME);
        let d = tick_delta(next_tick, now);
        if d < 0 {
            1
        } else {
            d as u32 + 1
        }
    }

    /// Moves the head to the next matching IDAM found by the most
    /// recent `time_to_next_idam` call. Returns `false` (and raises
    /// the index line) if the rest of the track has no more.
    pub fn next_idam(&mut self) -> bool {
        if !self.ready() {
            return false;
        }
        let length = self.track_length() as u32;
        let density_bit = if self.double_density { IDAM_DENSITY_BIT } else { 0 };
        let mut next_pos = length;
        if let Some(track) = self.current_track() {
            for &slot in track.idams.iter() {
                if slot != 0 && (slot & IDAM_DENSITY_BIT) == density_bit {
                    let pos = (slot & IDAM_POS_MASK) as u32;
                    if self.head_pos < pos && pos < next_pos {
                        next_pos = pos;
                    }
                }
            }
        }
        if next_pos >= length {
            self.set_index_high();
            return false;
        }
        self.head_pos = next_pos;
        true
    }

    /// Called back when the `EventTag::FdcIndexPulse` event fires:
    /// restarts the revolution (the one authoritative reset of
    /// `head_pos`/`track_start_tick`) and reschedules both the next
    /// pulse and its brief reset-to-low.
    pub fn service_index_pulse(&mut self, queue: &mut EventQueue, now: Tick) {
        if !self.ready() {
            self.index_state = false;
            return;
        }
        self.set_index_high();
        self.head_pos = 128;
        self.track_start_tick = now;
        let length = self.track_length() as u32;
        let due = now.wrapping_add(length.saturating_sub(128) * BYTE_TIME);
        self.index_due_tick = due;
        self.index_event = Some(queue.schedule(due, EventTag::FdcIndexPulse));
        let reset_due = now.wrapping_add((length.saturating_sub(128) / 100) * BYTE_TIME);
        self.index_reset_event = Some(queue.schedule(reset_due, EventTag::FdcIndexPulseReset));
    }

    /// Called back when `EventTag::FdcIndexPulseReset` fires.
    pub fn service_index_reset(&mut self) {
        self.index_state = false;
    }

    fn set_index_high(&mut self) {
        if !self.index_state {
            self.new_pulse = true;
        }
        self.index_state = true;
    }

    fn track_length(&self) -> usize {
        self.slots[self.current].disk.as_ref().map(|d| d.track_length).unwrap_or(0)
    }

    fn current_track(&self) -> Option<&Track> {
        let slot = &self.slots[self.current];
        let disk = slot.disk.as_ref()?;
        if self.head >= disk.num_heads {
            return None;
        }
        Some(&disk.tracks[slot.current_cyl][self.head])
    }

    fn update_signals(&mut self, queue: &mut EventQueue, now: Tick) {
        if !self.ready() {
            if let Some(id) = self.index_event.take() {
                queue.dequeue(id);
            }
            if let Some(id) = self.index_reset_event.take() {
                queue.dequeue(id);
            }
            self.index_state = false;
            return;
        }
        let already_queued = self.index_event.map(|id| queue.is_queued(id)).unwrap_or(false);
        if !already_queued {
            self.head_pos = 128;
            self.track_start_tick = now;
            let length = self.track_length() as u32;
            let due = now.wrapping_add(length.saturating_sub(128) * BYTE_TIME);
            self.index_due_tick = due;
            self.index_event = Some(queue.schedule(due, EventTag::FdcIndexPulse));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drives_with_disk() -> (Drives, EventQueue) {
        let mut queue = EventQueue::new();
        let mut drives = Drives::new();
        drives.insert_disk(0, Disk::blank(40, 1, 2048), &mut queue, 0);
        (drives, queue)
    }

    #[test]
    fn inserting_a_disk_becomes_ready_and_schedules_an_index_pulse() {
        let (drives, _queue) = drives_with_disk();
        assert!(drives.ready());
        assert!(drives.index_event.is_some());
    }

    #[test]
    fn write_then_read_round_trips_a_byte_at_head_position() {
        let (mut drives, _queue) = drives_with_disk();
        drives.set_dden(true);
        let start = drives.head_position();
        drives.write(0xAB);
        drives.write(0xCD);
        drives.head_pos = start;
        assert_eq!(drives.read(), 0xAB);
        assert_eq!(drives.read(), 0xCD);
    }

    #[test]
    fn write_idam_is_found_by_a_later_idam_scan() {
        let (mut drives, mut queue) = drives_with_disk();
        drives.set_dden(false);
        drives.head_pos = 200;
        drives.write_idam();
        drives.head_pos = 128;
        let _ = drives.time_to_next_idam(0);
        assert!(drives.next_idam());
        assert_eq!(drives.head_position(), 200);
        let _ = queue;
    }

    /// Property #6: the IDAM-pointer table stays sorted ascending with
    /// zero entries trailing even when marks are stamped out of
    /// position order, and a later sector write that overwrites one of
    /// the marks compacts the hole away rather than leaving it stranded
    /// mid-table.
    #[test]
    fn idam_table_stays_sorted_regardless_of_stamp_order() {
        let (mut drives, _queue) = drives_with_disk();
        drives.set_dden(false);
        for &pos in &[600u32, 200, 400] {
            drives.head_pos = pos;
            drives.write_idam();
        }
        let track = drives.current_track().unwrap();
        let positions: Vec<u16> = track.idams.iter().copied().filter(|&s| s != 0).map(|s| s & IDAM_POS_MASK).collect();
        assert_eq!(positions, vec![200, 400, 600]);
        let trailing_zero_count = track.idams.iter().filter(|&&s| s == 0).count();
        assert_eq!(trailing_zero_count, MAX_IDAMS - 3);

        drives.head_pos = 400;
        drives.write(0x00);
        let track = drives.current_track().unwrap();
        let positions: Vec<u16> = track.idams.iter().copied().filter(|&s| s != 0).map(|s| s & IDAM_POS_MASK).collect();
        assert_eq!(positions, vec![200, 600]);
    }

    /// Scenario S6: a full double-density track written via repeated
    /// `write_idam()` calls (standing in for a Type-3 write-track
    /// command's 18 sector headers) leaves exactly 18 non-zero IDAM
    /// table entries.
    #[test]
    fn write_track_with_18_sectors_yields_18_idam_entries() {
        let (mut drives, _queue) = drives_with_disk();
        drives.set_dden(true);
        drives.head_pos = 128;
        const SECTOR_GAP: u32 = 100;
        for _ in 0..18 {
            drives.write_idam();
            for _ in 0..SECTOR_GAP {
                drives.write(0x00);
            }
        }
        let track = drives.current_track().unwrap();
        let count = track.idams.iter().filter(|&&s| s != 0).count();
        assert_eq!(count, 18);
    }

    #[test]
    fn stepping_off_track_zero_clears_it_and_back_restores_it() {
        let (mut drives, mut queue) = drives_with_disk();
        assert!(drives.track_zero());
        drives.set_direction(true);
        drives.step(&mut queue, 0);
        assert!(!drives.track_zero());
        drives.set_direction(false);
        drives.step(&mut queue, 0);
        assert!(drives.track_zero());
    }

    #[test]
    fn running_off_the_end_of_a_track_raises_a_fresh_index_pulse_once() {
        let (mut drives, _queue) = drives_with_disk();
        drives.head_pos = 2047;
        assert!(!drives.new_index_pulse());
        drives.skip();
        assert!(drives.index_pulse());
        assert!(drives.new_index_pulse());
        assert!(!drives.new_index_pulse());
    }
}
