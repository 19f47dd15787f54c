//! MC6821 Peripheral Interface Adapter, modelled as a pair (spec.md
//! §3 "PIA side", §4.5). Grounded in `original_source/mc6821.c`, with
//! the open-drain wired-OR pin model spec.md's data model calls for
//! (`pin = (out_source | in_source) & out_sink & in_sink`) standing in
//! for the original's simpler `tied_low` mask -- multiple drivers (a
//! cassette relay, the SAM ROM-bank latch, a joystick comparator) can
//! share one physical line without the core caring which one currently
//! wins.

/// Hooks a side needs to call out to machine wiring (keyboard, sound
/// DAC, cassette pin, ROM-bank select...) without storing a
/// cross-reference to the machine itself (spec.md §9 "Design notes").
pub type SideHook<Ctx> = Box<dyn FnMut(&mut Ctx)>;

#[derive(Default)]
pub struct PiaSide<Ctx> {
    pub direction_register: u8,
    pub output_register: u8,
    pub control_register: u8,
    pub interrupt_latch: bool,
    pub irq_out: bool,

    pub in_source_mask: u8,
    pub in_sink_mask: u8,
    pub out_source_mask: u8,
    pub out_sink_mask: u8,

    pub preread_hook: Option<SideHook<Ctx>>,
    pub postwrite_hook: Option<SideHook<Ctx>>,
    pub ctl_preread_hook: Option<SideHook<Ctx>>,
    pub ctl_postwrite_hook: Option<SideHook<Ctx>>,
}

impl<Ctx> PiaSide<Ctx> {
    fn new() -> Self {
        Self {
            direction_register: 0,
            output_register: 0,
            control_register: 0,
            interrupt_latch: false,
            irq_out: false,
            in_source_mask: 0,
            in_sink_mask: 0xFF,
            out_source_mask: 0,
            out_sink_mask: 0xFF,
            preread_hook: None,
            postwrite_hook: None,
            ctl_preread_hook: None,
            ctl_postwrite_hook: None,
        }
    }

    pub fn reset(&mut self) {
        self.direction_register = 0;
        self.output_register = 0;
        self.control_register = 0;
        self.interrupt_latch = false;
        self.irq_out = false;
    }

    /// Observable pin state: wired-OR of whatever is driving high,
    /// masked by whatever is pulling low.
    pub fn pin(&self) -> u8 {
        (self.out_source_mask | self.in_source_mask) & self.out_sink_mask & self.in_sink_mask
    }

    fn ddr_selected(&self) -> bool {
        self.control_register & 0x04 == 0
    }

    fn read_data(&mut self, ctx: &mut Ctx) -> u8 {
        if self.ddr_selected() {
            self.direction_register
        } else {
            if let Some(hook) = self.preread_hook.as_mut() {
                hook(ctx);
            }
            self.interrupt_latch = false;
            self.irq_out = false;
            (self.pin() & !self.direction_register) | (self.output_register & self.direction_register)
        }
    }

    fn write_data(&mut self, ctx: &mut Ctx, value: u8) {
        if self.ddr_selected() {
            self.direction_register = value;
        } else {
            self.output_register = value;
        }
        self.out_source_mask = self.output_register & self.direction_register;
        // A bit pulls the line low when it's an output (direction=1) driving a 0.
        self.out_sink_mask = !(self.direction_register & !self.output_register);
        if let Some(hook) = self.postwrite_hook.as_mut() {
            hook(ctx);
        }
    }

    fn read_control(&mut self, ctx: &mut Ctx) -> u8 {
        if let Some(hook) = self.ctl_preread_hook.as_mut() {
            hook(ctx);
        }
        self.control_register | ((self.interrupt_latch as u8) << 7)
    }

    fn write_control(&mut self, ctx: &mut Ctx, value: u8) {
        self.control_register = value & 0x3F;
        if self.control_register & 0x01 != 0 {
            if self.interrupt_latch {
                self.irq_out = true;
            }
        } else {
            self.irq_out = false;
        }
        if let Some(hook) = self.ctl_postwrite_hook.as_mut() {
            hook(ctx);
        }
    }

    /// Apply a rising or falling edge on the side's Cx1 input line.
    /// `rising` is the edge's polarity; the side only latches an
    /// interrupt when it matches the configured edge (CRx bit 1).
    pub fn edge(&mut self, rising: bool) {
        let wants_rising = self.control_register & 0x02 != 0;
        if rising == wants_rising {
            self.interrupt_latch = true;
            if self.control_register & 0x01 != 0 {
                self.irq_out = true;
            }
        }
    }
}

/// One MC6821: side A and side B.
pub struct Pia<Ctx> {
    pub a: PiaSide<Ctx>,
    pub b: PiaSide<Ctx>,
}

impl<Ctx> Pia<Ctx> {
    pub fn new() -> Self {
        Self {
            a: PiaSide::new(),
            b: PiaSide::new(),
        }
    }

    pub fn reset(&mut self) {
        self.a.reset();
        self.b.reset();
    }

    /// Read one of the four memory-mapped registers
    /// (`(A1,A0)` select PDRA/DDRA, CRA, PDRB/DDRB, CRB).
    pub fn read(&mut self, ctx: &mut Ctx, reg: u8) -> u8 {
        match reg & 3 {
            0 => self.a.read_data(ctx),
            1 => self.a.read_control(ctx),
            2 => self.b.read_data(ctx),
            _ => self.b.read_control(ctx),
        }
    }

    pub fn write(&mut self, ctx: &mut Ctx, reg: u8, value: u8) {
        match reg & 3 {
            0 => self.a.write_data(ctx, value),
            1 => self.a.write_control(ctx, value),
            2 => self.b.write_data(ctx, value),
            _ => self.b.write_control(ctx, value),
        }
    }

    pub fn irq(&self) -> bool {
        self.a.irq_out || self.b.irq_out
    }
}

impl<Ctx> Default for Pia<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_data_register_clears_interrupt_latch() {
        let mut pia: Pia<()> = Pia::new();
        pia.a.control_register = 0x04; // PDR selected
        pia.a.interrupt_latch = true;
        pia.a.irq_out = true;
        let mut ctx = ();
        let _ = pia.read(&mut ctx, 0);
        assert!(!pia.a.interrupt_latch);
        assert!(!pia.a.irq_out);
    }

    #[test]
    fn write_to_ddr_when_cr_bit2_clear() {
        let mut pia: Pia<()> = Pia::new();
        pia.a.control_register = 0x00; // DDR selected
        let mut ctx = ();
        pia.write(&mut ctx, 0, 0xAA);
        assert_eq!(pia.a.direction_register, 0xAA);
    }

    #[test]
    fn cx1_edge_raises_irq_only_when_enabled_and_polarity_matches() {
        let mut pia: Pia<()> = Pia::new();
        pia.a.control_register = 0x03; // active-high edge, interrupt enabled
        pia.a.edge(true);
        assert!(pia.a.interrupt_latch);
        assert!(pia.a.irq_out);

        let mut pia2: Pia<()> = Pia::new();
        pia2.a.control_register = 0x03;
        pia2.a.edge(false); // wrong polarity: no latch
        assert!(!pia2.a.interrupt_latch);
    }
}
