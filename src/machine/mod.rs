//! Dragon 32/64 / Tandy CoCo 1/2 machine wiring: owns one of everything
//! in [`crate::core`] plus the peripherals that only make sense at the
//! whole-machine level (keyboard, joysticks, cassette deck, cartridge
//! port, ROM images) and ties them together through [`Bus`],
//! [`CartSignals`] and [`FastLoadHost`] (spec.md §4.11-§4.12).
//!
//! None of the PIA's own hook fields (`preread_hook` etc.) are used
//! here. A hook's `Ctx` is `Machine` itself, and [`Pia::read`]/
//! [`Pia::write`] need `&mut self` (the `PiaSide`) and `&mut Ctx`
//! simultaneously; since `Ctx = Machine` *owns* the very `Pia` being
//! called, driving cross-component coupling through a hook would
//! require `self.pia0` to already be mutably borrowed while also being
//! reachable through `ctx` -- not expressible without unsafe. Instead
//! every PIA wrapper method here first updates the relevant side's
//! `in_source_mask`/`in_sink_mask` directly from already-valid machine
//! state, then hands the whole `Pia` off via [`std::mem::take`] for the
//! duration of the call (spec.md §9 "Design notes" sanctions exactly
//! this pattern for `Cpu::step`; it applies identically here).

pub mod cart;
pub mod debug;
pub mod joystick;
pub mod keyboard;
pub mod romlist;
pub mod tape;
pub mod tape_fastload;

use cart::{CartSignals, CartType, Cartridge};
use debug::Handshake;
use joystick::Joysticks;
use keyboard::{Keyboard, KeyCode, Layout};
use tape::{Tape, TapeDeck};
use tape_fastload::FastLoadHost;

use crate::core::breakpoint::{ArchMask, BreakpointRegistry};
use crate::core::cpu::regs::Registers;
use crate::core::cpu::{Bus, Cpu, CpuVariant};
use crate::core::floppy::vdrive::{Disk, Drives};
use crate::core::pia::{Pia, PiaSide};
use crate::core::sam::{Region, Sam};
use crate::core::scheduler::{EventQueue, EventTag};
use crate::core::tick::{tick_after, Tick};
use crate::core::vdg::palette::Colour;
use crate::core::vdg::{Vdg, HS_RISING_EDGE, LINE_DURATION};

/// Master-oscillator ticks between successive VDG HS falling edges
/// (the VDG module counts in half-pixel units; the machine's clock
/// runs at twice that resolution).
const VDG_TICKS_PER_LINE: Tick = (LINE_DURATION * 2) as Tick;
/// Delay from HS fall to HS rise, same unit-doubling as above. SAM's
/// row-address advance (`Sam::vdg_hs_advance`) happens on the rising
/// edge, not the falling one (spec.md §4.4/§4.6).
const VDG_HS_RISE_DELAY: Tick = (HS_RISING_EDGE * 2) as Tick;

/// Placeholder byte for an unmapped or cart-less IO read (spec.md §4.5,
/// matching the `0x7e` convention the DOS cart modules already use for
/// their own unimplemented register ranges).
const OPEN_BUS: u8 = 0x7e;

/// Fixed machine parameters chosen at construction (spec.md §4.12
/// "Machine configuration"): which CPU core, which VDG timing variant,
/// and the ROM image(s) to boot from.
pub struct MachineConfig {
    pub variant: CpuVariant,
    pub is_coco: bool,
    pub is_pal: bool,
    /// VDG timing family: true selects the earlier (non-T1) part's
    /// bright-orange encoding difference (spec.md §4.6, `Vdg::new`).
    pub is_t1: bool,
    pub arch: ArchMask,
    pub keyboard_layout: Layout,
    /// 32K ROM image spanning `0x8000..0x10000`.
    pub rom: Vec<u8>,
    /// Dragon 64's second ROM bank, paged in by PIA1 side B bit 2.
    pub rom_alt: Option<Vec<u8>>,
}

pub struct Machine {
    cpu: Cpu,
    sam: Sam,
    pia0: Pia<Machine>,
    pia1: Pia<Machine>,
    vdg: Vdg,
    drives: Drives,
    cart: Option<Box<dyn Cartridge>>,
    cart_type: Option<CartType>,
    keyboard: Keyboard,
    joysticks: Joysticks,
    tape: TapeDeck,
    ram: Vec<u8>,
    rom: Vec<u8>,
    rom_alt: Option<Vec<u8>>,
    rom_bank_high: bool,
    breakpoints: BreakpointRegistry<Machine>,
    queue: EventQueue,
    now: Tick,
    in_pal_padding: bool,
    is_coco: bool,
    arch: ArchMask,
    variant: CpuVariant,

    /// Cart-asserted NMI/FIRQ/HALT lines, latched by [`CartSignalsImpl`]
    /// and applied to the live CPU at the start of the next instruction
    /// (see [`Machine::step`]) -- a cart write that lands mid-instruction
    /// can only affect the *placeholder* `Cpu` sitting in `self.cpu`
    /// while the real one is on loan to `Cpu::step`, so these three
    /// latches carry the signal across that boundary instead.
    cart_nmi: bool,
    cart_firq: bool,
    cart_halt: bool,

    video_sink: Option<Box<dyn FnMut(&[Colour])>>,
    vsync_sink: Option<Box<dyn FnMut()>>,

    /// Host filename behind each inserted disk, if any; the drive
    /// model itself (`Drives`) only knows about `Disk` image data, so
    /// the snapshot format's "attached disk filenames" chunk has to be
    /// tracked at this level.
    disk_paths: [Option<String>; 4],

    /// Run-state handshake for an external debugger (`machine::debug`),
    /// polled once per instruction in [`Machine::step`] when present.
    debug: Option<Handshake>,
}

/// Borrows just enough of `Machine` to satisfy [`CartSignals`] without
/// reaching through `Ctx` the way a `PiaSide` hook would have to.
struct CartSignalsImpl<'a> {
    pia1_b: &'a mut PiaSide<Machine>,
    cart_nmi: &'a mut bool,
    cart_firq: &'a mut bool,
    cart_halt: &'a mut bool,
}

impl<'a> CartSignals for CartSignalsImpl<'a> {
    fn set_firq(&mut self, asserted: bool) {
        *self.cart_firq = asserted;
    }
    fn set_nmi(&mut self, asserted: bool) {
        *self.cart_nmi = asserted;
    }
    fn set_halt(&mut self, asserted: bool) {
        *self.cart_halt = asserted;
    }
    /// DragonDOS's `PIA_SET_Cx1(PIA1.b)`: DRQ is wired to PIA1 side B's
    /// Cx1 input, not a data bit, so it goes through `edge` directly.
    fn set_drq(&mut self, asserted: bool) {
        self.pia1_b.edge(asserted);
    }
}

/// Whether a `PiaSide`'s Cx2 line is configured as a level output
/// (CRx bits 5-4 = 11) and, if so, what level it's driving. Used for
/// wiring that rides a control line rather than a data bit.
fn side_c2_level<Ctx>(side: &PiaSide<Ctx>) -> Option<bool> {
    if side.control_register & 0x30 == 0x30 {
        Some(side.control_register & 0x08 != 0)
    } else {
        None
    }
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        let mut m = Self {
            cpu: Cpu::new(config.variant),
            sam: Sam::new(),
            pia0: Pia::new(),
            pia1: Pia::new(),
            vdg: Vdg::new(config.is_t1, config.is_pal, config.is_coco),
            drives: Drives::new(),
            cart: None,
            cart_type: None,
            keyboard: Keyboard::new(config.keyboard_layout),
            joysticks: Joysticks::new(),
            tape: TapeDeck::new(),
            ram: vec![0u8; 0x1_0000],
            rom: config.rom,
            rom_alt: config.rom_alt,
            rom_bank_high: false,
            breakpoints: BreakpointRegistry::new(),
            queue: EventQueue::new(),
            now: 0,
            in_pal_padding: false,
            is_coco: config.is_coco,
            arch: config.arch,
            variant: config.variant,
            cart_nmi: false,
            cart_firq: false,
            cart_halt: false,
            video_sink: None,
            vsync_sink: None,
            disk_paths: Default::default(),
            debug: None,
        };
        m.reset();
        m
    }

    pub fn reset(&mut self) {
        self.cpu.reset();
        self.sam.reset();
        self.pia0.reset();
        self.pia1.reset();
        self.vdg.reset();
        self.keyboard_layout_unchanged();
        self.now = 0;
        self.in_pal_padding = false;
        self.rom_bank_high = false;
        self.cart_nmi = false;
        self.cart_firq = false;
        self.cart_halt = false;
        self.queue.clear();
        self.install_fastload_breakpoints();
        self.queue.schedule(VDG_TICKS_PER_LINE, EventTag::VdgHsFall);
        self.queue.schedule(VDG_HS_RISE_DELAY, EventTag::VdgHsRise);
        if let Some(mut cart) = self.cart.take() {
            cart.reset(&mut self.drives, &mut self.queue, self.now);
            self.cart = Some(cart);
        }
        self.sync_vdg_mode();
    }

    // A reset leaves the keyboard's held-key state alone (real hardware
    // doesn't un-press keys on a soft reset either); this exists only
    // so the intent shows up at the call site above.
    fn keyboard_layout_unchanged(&self) {}

    fn install_fastload_breakpoints(&mut self) {
        let rom = std::mem::take(&mut self.rom);
        let mut bp = std::mem::take(&mut self.breakpoints);
        let flags = self.tape.state();
        tape_fastload::install(&mut bp, self.arch, &rom, flags);
        self.breakpoints = bp;
        self.rom = rom;
    }

    /// Re-derive the fast-loader/rewrite breakpoint set after the
    /// cassette flags change. The registry has no bulk remove, so this
    /// adds a second, harmless copy of whatever was already installed
    /// (each handler redirects `PC` idempotently, so a stale duplicate
    /// simply never matches again once the first copy has fired).
    pub fn set_tape_fastload_flags(&mut self, flags: u8) {
        self.tape.set_state(flags);
        self.install_fastload_breakpoints();
    }

    pub fn now(&self) -> Tick {
        self.now
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn variant(&self) -> CpuVariant {
        self.variant
    }

    pub fn is_coco(&self) -> bool {
        self.is_coco
    }

    pub fn sam_register(&self) -> u16 {
        self.sam.register()
    }

    pub fn set_sam_register(&mut self, value: u16) {
        self.sam.set_register(value);
    }

    /// `(a.direction, a.output, a.control, b.direction, b.output, b.control)`
    /// for PIA0 (`which == 0`) or PIA1 (`which == 1`), bypassing
    /// `Pia::read`/`write` entirely so a snapshot save/restore can't
    /// trip interrupt latches or edge-sensitive side effects.
    pub fn pia_raw(&self, which: usize) -> [u8; 6] {
        let pia = if which == 0 { &self.pia0 } else { &self.pia1 };
        [
            pia.a.direction_register,
            pia.a.output_register,
            pia.a.control_register,
            pia.b.direction_register,
            pia.b.output_register,
            pia.b.control_register,
        ]
    }

    pub fn set_pia_raw(&mut self, which: usize, raw: [u8; 6]) {
        let pia = if which == 0 { &mut self.pia0 } else { &mut self.pia1 };
        pia.a.direction_register = raw[0];
        pia.a.output_register = raw[1];
        pia.a.control_register = raw[2];
        pia.b.direction_register = raw[3];
        pia.b.output_register = raw[4];
        pia.b.control_register = raw[5];
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    pub fn keyboard_mut(&mut self) -> &mut Keyboard {
        &mut self.keyboard
    }

    pub fn joysticks_mut(&mut self) -> &mut Joysticks {
        &mut self.joysticks
    }

    pub fn set_video_sink(&mut self, sink: Option<Box<dyn FnMut(&[Colour])>>) {
        self.video_sink = sink;
    }

    pub fn set_vsync_sink(&mut self, sink: Option<Box<dyn FnMut()>>) {
        self.vsync_sink = sink;
    }

    pub fn press_key(&mut self, code: KeyCode) {
        self.keyboard.press_key(code);
    }

    pub fn release_key(&mut self, code: KeyCode) {
        self.keyboard.release_key(code);
    }

    pub fn press_unicode(&mut self, c: char) {
        self.keyboard.press_unicode(c);
    }

    pub fn release_unicode(&mut self, c: char) {
        self.keyboard.release_unicode(c);
    }

    pub fn insert_disk(&mut self, drive: usize, disk: Disk) {
        self.insert_disk_with_path(drive, disk, None);
    }

    pub fn insert_disk_with_path(&mut self, drive: usize, disk: Disk, path: Option<String>) {
        self.drives.insert_disk(drive, disk, &mut self.queue, self.now);
        if let Some(slot) = self.disk_paths.get_mut(drive) {
            *slot = path;
        }
    }

    pub fn eject_disk(&mut self, drive: usize) -> Option<Disk> {
        if let Some(slot) = self.disk_paths.get_mut(drive) {
            *slot = None;
        }
        self.drives.eject_disk(drive, &mut self.queue)
    }

    pub fn disk_path(&self, drive: usize) -> Option<&str> {
        self.disk_paths.get(drive).and_then(|p| p.as_deref())
    }

    pub fn attach_tape_input(&mut self, tape: Tape) {
        self.tape.attach_input(tape);
    }

    pub fn attach_tape_output(&mut self, tape: Tape) {
        self.tape.attach_output(tape);
    }

    pub fn detach_tape_output(&mut self) {
        let out = self.pia1.a.output_register & 0xfc;
        self.tape.detach_output(&mut self.queue, out, self.now);
    }

    pub fn attach_cart(&mut self, cart_type: CartType, mut cart: Box<dyn Cartridge>) {
        self.detach_cart();
        cart.attach(&mut self.queue, self.now);
        self.cart_type = Some(cart_type);
        self.cart = Some(cart);
    }

    pub fn detach_cart(&mut self) {
        if let Some(mut cart) = self.cart.take() {
            cart.detach(&mut self.queue);
        }
        self.cart_type = None;
    }

    /// Attach a debugger's run-state handshake. Once set, [`Machine::step`]
    /// polls it before every instruction, blocking while the debugger
    /// holds the machine at [`debug::RunState::Stopped`].
    pub fn set_debug_handshake(&mut self, handshake: Option<Handshake>) {
        self.debug = handshake;
    }

    /// Register a breakpoint that drops the attached debugger's
    /// handshake to `Stopped` when `addr` is about to execute. A no-op
    /// if no handshake is attached yet when this is called, since the
    /// handler closure captures whatever `self.debug` becomes later via
    /// `ctx.debug`, not a snapshot of it now.
    pub fn install_debug_breakpoint(&mut self, addr: u16) {
        let arch = self.arch;
        let rom = std::mem::take(&mut self.rom);
        self.breakpoints.add_instruction(
            addr,
            addr,
            crate::core::breakpoint::SamQualifier::default(),
            &crate::core::breakpoint::InstallCondition::default(),
            arch,
            &rom,
            Box::new(|ctx: &mut Machine, _pc: u16| {
                if let Some(hs) = &ctx.debug {
                    hs.halt();
                }
            }),
        );
        self.rom = rom;
    }

    /// Run until the master clock has advanced by `ticks`. If a
    /// debugger handshake is attached, this blocks for as long as the
    /// debugger holds the machine `Stopped`.
    pub fn run(&mut self, ticks: Tick) {
        let deadline = self.now.wrapping_add(ticks);
        while tick_after(deadline, self.now) {
            self.step();
        }
    }

    fn step(&mut self) {
        if let Some(hs) = self.debug.clone() {
            hs.poll();
        }
        let irq = self.pia0.irq();
        let firq = self.pia1.irq() || self.cart_firq;
        let mut cpu = std::mem::replace(&mut self.cpu, Cpu::new(self.variant));
        cpu.set_irq(irq);
        cpu.set_firq(firq);
        cpu.set_nmi(self.cart_nmi);
        cpu.set_halt(self.cart_halt);
        cpu.step(self);
        let completed = cpu.instruction_complete;
        self.cpu = cpu;
        if completed {
            self.dispatch_breakpoints();
        }
    }

    fn dispatch_breakpoints(&mut self) {
        if !self.breakpoints.has_instruction_breakpoints() {
            return;
        }
        let sam_register = self.sam.register();
        let mut bp = std::mem::take(&mut self.breakpoints);
        bp.dispatch_instruction(self, sam_register, |m: &Machine| m.cpu.regs.pc);
        self.breakpoints = bp;
    }

    fn check_watch_read(&mut self, addr: u16) {
        let mut bp = std::mem::take(&mut self.breakpoints);
        bp.dispatch_watch_read(self, addr);
        self.breakpoints = bp;
    }

    fn check_watch_write(&mut self, addr: u16) {
        let mut bp = std::mem::take(&mut self.breakpoints);
        bp.dispatch_watch_write(self, addr);
        self.breakpoints = bp;
    }

    fn advance(&mut self, ticks: u32) {
        self.now = self.now.wrapping_add(ticks);
        self.drain_queue();
    }

    fn drain_queue(&mut self) {
        while let Some((_, tag)) = self.queue.pop_due(self.now) {
            match tag {
                EventTag::VdgHsFall => self.service_vdg_hs_fall(),
                EventTag::VdgHsRise => self.sam.vdg_hs_advance(),
                EventTag::VdgFsFall => {}
                EventTag::VdgFsRise => self.service_vdg_fs_rise(),
                EventTag::FdcState | EventTag::CartFirqPulse => self.service_cart(),
                EventTag::FdcIndexPulse => {
                    let now = self.now;
                    self.drives.service_index_pulse(&mut self.queue, now);
                }
                EventTag::FdcIndexPulseReset => self.drives.service_index_reset(),
                EventTag::TapeEdge => {
                    let now = self.now;
                    self.tape.service_waggle(now, &mut self.queue);
                }
                EventTag::AudioFlush => {
                    let now = self.now;
                    let out = self.pia1.a.output_register;
                    self.tape.service_flush(now, out, &mut self.queue);
                }
            }
        }
    }

    fn service_vdg_hs_fall(&mut self) {
        if self.in_pal_padding {
            let done = self.vdg.pal_padding_tick(self.now);
            if done {
                self.in_pal_padding = false;
            }
            self.queue.schedule(self.now.wrapping_add(VDG_TICKS_PER_LINE), EventTag::VdgHsFall);
            return;
        }
        let now = self.now;
        let sam = &mut self.sam;
        let ram = &self.ram;
        let video_sink = &mut self.video_sink;
        let result = self.vdg.hs_fall(
            now,
            |n, buf| sam.vdg_fetch(ram, n, buf),
            |row| {
                if let Some(sink) = video_sink.as_mut() {
                    sink(row);
                }
            },
        );
        if result.fs_fall {
            self.queue.schedule(now, EventTag::VdgFsFall);
        }
        if result.fs_rise {
            self.queue.schedule(now, EventTag::VdgFsRise);
        }
        self.in_pal_padding = result.pal_padding_active;
        self.queue.schedule(now.wrapping_add(VDG_TICKS_PER_LINE), EventTag::VdgHsFall);
        self.queue.schedule(now.wrapping_add(VDG_HS_RISE_DELAY), EventTag::VdgHsRise);
    }

    fn service_vdg_fs_rise(&mut self) {
        self.sam.vdg_fs_reset();
        if let Some(sink) = self.vsync_sink.as_mut() {
            sink();
        }
    }

    fn service_cart(&mut self) {
        let Some(mut cart) = self.cart.take() else { return };
        let now = self.now;
        {
            let mut signals = CartSignalsImpl {
                pia1_b: &mut self.pia1.b,
                cart_nmi: &mut self.cart_nmi,
                cart_firq: &mut self.cart_firq,
                cart_halt: &mut self.cart_halt,
            };
            cart.service(&mut self.drives, &mut self.queue, now, &mut signals);
        }
        self.cart = Some(cart);
    }

    fn rom_or_cart_read(&mut self, addr: u16) -> u8 {
        if addr >= 0xc000 && matches!(self.cart_type, Some(CartType::Rom)) {
            if let Some(mut cart) = self.cart.take() {
                let p2 = addr >= 0xe000;
                let v = cart.read(&mut self.drives, addr, p2);
                self.cart = Some(cart);
                return v;
            }
        }
        let rom = if self.rom_bank_high { self.rom_alt.as_ref().unwrap_or(&self.rom) } else { &self.rom };
        rom.get((addr - 0x8000) as usize).copied().unwrap_or(0xff)
    }

    fn rom_or_cart_write(&mut self, addr: u16, value: u8) {
        if addr >= 0xc000 && matches!(self.cart_type, Some(CartType::Rom)) {
            if let Some(mut cart) = self.cart.take() {
                let p2 = addr >= 0xe000;
                let now = self.now;
                {
                    let mut signals = CartSignalsImpl {
                        pia1_b: &mut self.pia1.b,
                        cart_nmi: &mut self.cart_nmi,
                        cart_firq: &mut self.cart_firq,
                        cart_halt: &mut self.cart_halt,
                    };
                    cart.write(&mut self.drives, &mut self.queue, now, addr, p2, value, &mut signals);
                }
                self.cart = Some(cart);
            }
        }
        // Plain internal ROM is read-only; a write with no cart present
        // (or a non-ROM cart, which never maps this window) is dropped.
    }

    fn cart_io_read(&mut self, addr: u16) -> u8 {
        let Some(mut cart) = self.cart.take() else { return OPEN_BUS };
        let v = cart.read(&mut self.drives, addr, false);
        self.cart = Some(cart);
        v
    }

    fn cart_io_write(&mut self, addr: u16, value: u8) {
        let Some(mut cart) = self.cart.take() else { return };
        let now = self.now;
        {
            let mut signals = CartSignalsImpl {
                pia1_b: &mut self.pia1.b,
                cart_nmi: &mut self.cart_nmi,
                cart_firq: &mut self.cart_firq,
                cart_halt: &mut self.cart_halt,
            };
            cart.write(&mut self.drives, &mut self.queue, now, addr, false, value, &mut signals);
        }
        self.cart = Some(cart);
    }

    /// Latch external input onto PIA0 side A (keyboard rows + the
    /// joystick comparator on bit 7) before handing the register access
    /// off to the generic PIA logic. Column *select* is driven by side
    /// B's output, so it's read here via `pin()` before anything is
    /// taken out of `self`.
    fn sync_pia0_inputs(&mut self) {
        let col_select = self.pia0.b.pin();
        let rows = self.keyboard.read_rows(col_select);

        // Joystick comparator select: port (right/left) and axis
        // (X/Y) ride PIA0's Cx2 output-level lines rather than a data
        // bit, matching `joystick_update`'s own comparator wiring; the
        // exact PIA/bit assignment here is an inferred simplification
        // (no corpus source), recorded in DESIGN.md.
        let vertical = side_c2_level(&self.pia0.b).unwrap_or(false);
        let port = side_c2_level(&self.pia0.a).unwrap_or(false);
        let select = ((port as u8) << 1) | vertical as u8;
        let dac = ((self.pia1.a.output_register >> 1) & 0x3f) << 2;
        let comparator = self.joysticks.comparator_bit(select, dac);

        let side_a_in = (rows & 0x7f) | if comparator { 0x80 } else { 0 };
        self.pia0.a.in_source_mask = side_a_in;
        self.pia0.a.in_sink_mask = side_a_in;
    }

    fn pia0_read(&mut self, addr: u16) -> u8 {
        self.sync_pia0_inputs();
        let mut pia0 = std::mem::take(&mut self.pia0);
        let v = pia0.read(self, (addr & 3) as u8);
        self.pia0 = pia0;
        v
    }

    fn pia0_write(&mut self, addr: u16, value: u8) {
        self.sync_pia0_inputs();
        let mut pia0 = std::mem::take(&mut self.pia0);
        pia0.write(self, (addr & 3) as u8, value);
        self.pia0 = pia0;
    }

    /// Latch the tape input bit onto PIA1 side A bit 0 (`tape_update_motor`
    /// reads it back through this same pin on real hardware).
    fn sync_pia1_inputs(&mut self) {
        let bit0 = self.tape.input_bit as u8;
        self.pia1.a.in_source_mask = bit0;
        self.pia1.a.in_sink_mask = bit0 | 0xfe;
    }

    fn pia1_read(&mut self, addr: u16) -> u8 {
        self.sync_pia1_inputs();
        let mut pia1 = std::mem::take(&mut self.pia1);
        let v = pia1.read(self, (addr & 3) as u8);
        self.pia1 = pia1;
        v
    }

    fn pia1_write(&mut self, addr: u16, value: u8) {
        self.sync_pia1_inputs();
        let mut pia1 = std::mem::take(&mut self.pia1);
        pia1.write(self, (addr & 3) as u8, value);
        self.pia1 = pia1;
        self.after_pia1_write(addr & 3);
    }

    fn after_pia1_write(&mut self, reg: u16) {
        match reg & 3 {
            0 => {
                let out = self.pia1.a.output_register;
                self.tape.on_output_write(out, self.now);
            }
            1 => {
                let cr = self.pia1.a.control_register;
                let out = self.pia1.a.output_register;
                self.tape.on_motor_control_write(cr, self.now, &mut self.queue, out);
            }
            2 => {
                if self.rom_alt.is_some() {
                    self.rom_bank_high = self.pia1.b.output_register & 0x04 != 0;
                }
                self.sync_vdg_mode();
            }
            _ => {}
        }
    }

    /// GM2-0 come from the SAM control register (already decoded by
    /// `Sam::vdg_mode`); CSS/A-G/INT-EXT ride PIA1 side B's remaining
    /// data bits (0, 1, 3 -- bit 2 is reserved for the Dragon 64 ROM
    /// bank select). Another inferred simplification, recorded in
    /// DESIGN.md.
    fn vdg_mode_bits(&self) -> u16 {
        let gm = self.sam.vdg_mode() as u16 & 0x7;
        let pb = self.pia1.b.pin();
        let css = (pb & 0x01) as u16;
        let ag = ((pb >> 1) & 0x01) as u16;
        let ext = ((pb >> 3) & 0x01) as u16;
        (ext << 8) | (ag << 7) | (gm << 4) | (css << 3)
    }

    fn sync_vdg_mode(&mut self) {
        let mode = self.vdg_mode_bits();
        let now = self.now;
        let sam = &mut self.sam;
        let ram = &self.ram;
        self.vdg.set_mode(mode, now, |n, buf| sam.vdg_fetch(ram, n, buf));
    }
}

impl Bus for Machine {
    fn read(&mut self, addr: u16) -> u8 {
        let t = self.sam.translate(addr, false);
        self.advance(t.ticks);
        let value = match t.region {
            Region::Ram => self.ram[t.ram_address as usize],
            Region::Rom | Region::IntVector => self.rom_or_cart_read(addr),
            Region::Pia0 => self.pia0_read(addr),
            Region::Pia1 => self.pia1_read(addr),
            Region::CartIo => self.cart_io_read(addr),
            Region::SamControl => OPEN_BUS,
        };
        self.check_watch_read(addr);
        value
    }

    fn write(&mut self, addr: u16, value: u8) {
        let t = self.sam.translate(addr, true);
        self.advance(t.ticks);
        match t.region {
            Region::Ram => self.ram[t.ram_address as usize] = value,
            Region::Rom | Region::IntVector => self.rom_or_cart_write(addr, value),
            Region::Pia0 => self.pia0_write(addr, value),
            Region::Pia1 => self.pia1_write(addr, value),
            Region::CartIo => self.cart_io_write(addr, value),
            Region::SamControl => {
                self.sam.write_control(addr);
                self.sync_vdg_mode();
            }
        }
        self.check_watch_write(addr);
    }
}

impl FastLoadHost for Machine {
    fn registers(&mut self) -> &mut Registers {
        &mut self.cpu.regs
    }
    fn ram(&mut self) -> &mut [u8] {
        &mut self.ram
    }
    fn tape_deck(&mut self) -> &mut TapeDeck {
        &mut self.tape
    }
    fn is_coco(&self) -> bool {
        self.is_coco
    }
}
