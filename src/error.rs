//! Error kinds for the emulation core.
//!
//! Matches spec.md §7: recoverable device errors are reported through
//! WD279x status bits rather than this enum (they never stop emulation),
//! but the remaining three kinds need a type callers can match on.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineError {
    /// Host I/O failed while writing back a disk image or reading a tape.
    /// The machine keeps running; the caller should warn the user.
    HostIo(String),
    /// Unknown ROM list entry, unreadable ROM file, or no viable
    /// fallback configuration — reported before the machine starts.
    Config(String),
    /// A breakpoint handler invoked the trap primitive. Carries the
    /// gdb-style signal number the original debug protocol used.
    DebugTrap(TrapSignal),
}

/// gdb remote-protocol signal numbers, used only as trap codes -- the
/// core never raises an actual Unix signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapSignal {
    Int = 2,
    Ill = 4,
    Trap = 5,
    Fpe = 8,
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineError::HostIo(msg) => write!(f, "host I/O error: {msg}"),
            MachineError::Config(msg) => write!(f, "configuration error: {msg}"),
            MachineError::DebugTrap(sig) => write!(f, "debug trap: {sig:?}"),
        }
    }
}

impl std::error::Error for MachineError {}
