//! The twelve colour indices the 6847 can generate (spec.md §4.6.3).
//! Converting an index to RGB is a host concern (composite-output
//! reproduction is an explicit non-goal); the core only ever produces
//! these indices.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Colour {
    Green = 0,
    Yellow = 1,
    Blue = 2,
    Red = 3,
    White = 4,
    Cyan = 5,
    Magenta = 6,
    Orange = 7,
    Black = 8,
    DarkGreen = 9,
    DarkOrange = 10,
    BrightOrange = 11,
}

impl Colour {
    pub fn index(self) -> u8 {
        self as u8
    }
}
