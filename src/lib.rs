//! `dragoncore`: a cycle-accurate Dragon 32/64 and Tandy CoCo 1/2
//! emulation core (6809/6309 CPU, SAM, MC6847 VDG, dual MC6821 PIAs,
//! WD279x floppy controller, cassette and cartridge ports) plus the
//! machine wiring, snapshot format and configuration layer built on
//! top of it. No host display, audio, or windowing lives here -- see
//! `main.rs` for a minimal headless driver.

pub mod config;
pub mod core;
pub mod crc;
pub mod error;
pub mod machine;
pub mod snapshot;
