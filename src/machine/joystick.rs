//! Joystick ports: axis/button read callbacks plus the PIA-driven
//! single-bit-DAC comparator used to read an analog joystick through a
//! digital pin (spec.md §4.9). Grounded in `original_source/joystick.c`
//! (`joystick_update`'s port-select decode and DAC comparison).

/// One analog axis or digital button source, supplied by the host
/// input back-end (spec.md §6 "Host input").
pub type AxisRead = Box<dyn FnMut() -> u8>;
pub type ButtonRead = Box<dyn FnMut() -> bool>;

#[derive(Default)]
pub struct Port {
    pub x: Option<AxisRead>,
    pub y: Option<AxisRead>,
    pub button: Option<ButtonRead>,
}

impl Port {
    fn axis(&mut self, vertical: bool) -> u8 {
        match (vertical, self.y.as_mut(), self.x.as_mut()) {
            (true, Some(f), _) => f(),
            (false, _, Some(f)) => f(),
            _ => 127,
        }
    }

    fn pressed(&mut self) -> bool {
        self.button.as_mut().map(|f| f()).unwrap_or(false)
    }
}

/// Two logical joystick ports ("right"/"left" internally, matching the
/// original's own comment that the hardware considers the right
/// joystick port 0).
#[derive(Default)]
pub struct Joysticks {
    pub right: Port,
    pub left: Port,
}

impl Joysticks {
    pub fn new() -> Self {
        Self::default()
    }

    fn port_mut(&mut self, index: usize) -> &mut Port {
        if index == 0 {
            &mut self.right
        } else {
            &mut self.left
        }
    }

    /// Compare the selected axis against the SAM single-bit sound DAC
    /// ramp and return the resulting PIA0 side-A bit 7 state: `true`
    /// means the axis value is at or above the current DAC output,
    /// matching `joystick_update`'s `PIA0.a.port_input` bit.
    pub fn comparator_bit(&mut self, select: u8, dac_value: u8) -> bool {
        let port_index = (select & 0x02) >> 1;
        let vertical = select & 0x01 != 0;
        let value = self.port_mut(port_index as usize).axis(vertical);
        value >= dac_value
    }

    pub fn button(&mut self, port: usize) -> bool {
        self.port_mut(port).pressed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparator_trips_high_when_axis_at_or_above_dac() {
        let mut js = Joysticks::new();
        js.right.x = Some(Box::new(|| 200));
        assert!(js.comparator_bit(0b00, 150));
        assert!(!js.comparator_bit(0b00, 250));
    }

    #[test]
    fn unconnected_axis_defaults_to_centre() {
        let mut js = Joysticks::new();
        assert!(js.comparator_bit(0b00, 127));
        assert!(!js.comparator_bit(0b00, 128));
    }
}
