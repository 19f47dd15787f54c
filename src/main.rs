//! Minimal headless driver: loads a ROM (and optionally a cartridge and
//! disk images), runs the machine for a fixed number of ticks, and
//! exits. No display, audio or windowing lives here -- see
//! `dragoncore::machine` for the emulation core itself.

use std::path::PathBuf;

use dragoncore::config::{Config, CpuVariant, Model};
use dragoncore::core::breakpoint::ArchMask;
use dragoncore::core::cpu::CpuVariant as CoreCpuVariant;
use dragoncore::core::floppy::vdrive::Disk;
use dragoncore::machine::cart::{CartType, RomCart};
use dragoncore::machine::keyboard::Layout;
use dragoncore::machine::{Machine, MachineConfig};

/// Default run length when `--cycles` isn't given: one second of
/// master-oscillator ticks at the PAL rate (spec.md §3 "Tick").
const DEFAULT_TICKS: u32 = 14_318_180 / 4;

struct Args {
    rom: PathBuf,
    rom_alt: Option<PathBuf>,
    cart: Option<PathBuf>,
    cart_autorun: bool,
    disks: [Option<PathBuf>; 4],
    model: Model,
    cpu_variant: CpuVariant,
    cycles: u32,
}

fn parse_args() -> Result<Args, String> {
    let config = Config::load();
    let mut rom = config.rom_path.clone().map(PathBuf::from);
    let mut rom_alt = config.rom_alt_path.clone().map(PathBuf::from);
    let mut cart = None;
    let mut cart_autorun = true;
    let mut disks: [Option<PathBuf>; 4] = Default::default();
    for (i, slot) in config.default_disks.iter().enumerate() {
        disks[i] = slot.clone().map(PathBuf::from);
    }
    let mut model = config.model;
    let mut cpu_variant = config.cpu_variant;
    let mut cycles = DEFAULT_TICKS;

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < raw.len() {
        let arg = raw[i].as_str();
        let mut next = || {
            i += 1;
            raw.get(i).cloned().ok_or_else(|| format!("{arg} needs a value"))
        };
        match arg {
            "--rom" => rom = Some(PathBuf::from(next()?)),
            "--rom-alt" => rom_alt = Some(PathBuf::from(next()?)),
            "--cart" => cart = Some(PathBuf::from(next()?)),
            "--no-autorun" => cart_autorun = false,
            "--disk0" => disks[0] = Some(PathBuf::from(next()?)),
            "--disk1" => disks[1] = Some(PathBuf::from(next()?)),
            "--disk2" => disks[2] = Some(PathBuf::from(next()?)),
            "--disk3" => disks[3] = Some(PathBuf::from(next()?)),
            "--model" => {
                model = match next()?.as_str() {
                    "dragon32" => Model::Dragon32,
                    "dragon64" => Model::Dragon64,
                    "dragon200e" => Model::Dragon200E,
                    "coco1" => Model::Coco1,
                    "coco2" => Model::Coco2,
                    other => return Err(format!("unknown model '{other}'")),
                }
            }
            "--cycles" => cycles = next()?.parse().map_err(|_| "bad --cycles value".to_string())?,
            "--cpu" => {
                cpu_variant = match next()?.as_str() {
                    "6809" => CpuVariant::M6809,
                    "6309" => CpuVariant::H6309,
                    other => return Err(format!("unknown CPU variant '{other}'")),
                }
            }
            other => return Err(format!("unrecognised argument '{other}'")),
        }
        i += 1;
    }

    let rom = rom.ok_or_else(|| "no ROM given (pass --rom or set rom_path in config)".to_string())?;
    Ok(Args { rom, rom_alt, cart, cart_autorun, disks, model, cpu_variant, cycles })
}

fn model_params(model: Model) -> (bool, bool, Layout, ArchMask) {
    match model {
        Model::Dragon32 => (false, true, Layout::Dragon, ArchMask::DRAGON),
        Model::Dragon64 => (false, true, Layout::Dragon, ArchMask::DRAGON),
        Model::Dragon200E => (false, true, Layout::Dragon200E, ArchMask::DRAGON),
        Model::Coco1 => (true, true, Layout::Coco, ArchMask::COCO),
        Model::Coco2 => (true, true, Layout::Coco, ArchMask::COCO),
    }
}

fn load_rom(path: &std::path::Path) -> Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|e| format!("cannot read ROM {}: {e}", path.display()))
}

fn main() {
    env_logger::init();

    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("dragoncore-run: {e}");
            std::process::exit(2);
        }
    };

    let rom = match load_rom(&args.rom) {
        Ok(r) => r,
        Err(e) => {
            log::error!(target: "main", "{e}");
            std::process::exit(1);
        }
    };
    let rom_alt = match args.rom_alt.as_deref().map(load_rom).transpose() {
        Ok(r) => r,
        Err(e) => {
            log::error!(target: "main", "{e}");
            std::process::exit(1);
        }
    };

    let (is_coco, is_pal, keyboard_layout, arch) = model_params(args.model);
    let is_t1 = false;
    let variant = match args.cpu_variant {
        CpuVariant::M6809 => CoreCpuVariant::M6809,
        CpuVariant::H6309 => CoreCpuVariant::H6309,
    };

    let mut machine = Machine::new(MachineConfig {
        variant,
        is_coco,
        is_pal,
        is_t1,
        arch,
        keyboard_layout,
        rom,
        rom_alt,
    });

    if let Some(cart_path) = &args.cart {
        match load_rom(cart_path) {
            Ok(data) => {
                machine.attach_cart(CartType::Rom, Box::new(RomCart::new(data, args.cart_autorun)));
                log::info!(target: "main", "attached cartridge {}", cart_path.display());
            }
            Err(e) => log::error!(target: "main", "{e}"),
        }
    }

    // Disk image decode (.dsk/.vdk/.jvc) is a host-layer concern, same
    // as tape file decode (machine/tape.rs); every named slot gets a
    // blank formattable disk so drive presence can still be exercised
    // headlessly.
    for (drive, path) in args.disks.iter().enumerate() {
        if let Some(path) = path {
            let disk = Disk::blank(80, 1, 6250);
            machine.insert_disk_with_path(drive, disk, Some(path.display().to_string()));
            log::info!(target: "main", "drive {drive}: blank disk standing in for {}", path.display());
        }
    }

    log::info!(target: "main", "running {} ticks", args.cycles);
    machine.run(args.cycles);
    log::info!(target: "main", "stopped at tick {}", machine.now());
}
