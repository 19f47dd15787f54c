//! WD279x floppy disk controller and the virtual drives it talks to
//! (spec.md §4.7). Grounded in `original_source/wd279x.c` and
//! `vdrive.c`.

pub mod vdrive;
pub mod wd279x;
