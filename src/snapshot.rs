//! Chunked binary snapshot format (spec.md §6 "Snapshot format").
//!
//! A snapshot is the literal header bytes, a version chunk, then a
//! sequence of `{ u8 id, u16 size, size bytes payload }` chunks in an
//! unspecified order. The chunk ID set is closed; an unrecognised ID is
//! skipped by its declared size rather than treated as an error, so
//! newer writers stay loadable by older readers.

use std::io::{self, Read, Write};

use crate::core::cpu::{Cpu, CpuVariant};
use crate::error::MachineError;
use crate::machine::Machine;

const MAGIC: &[u8] = b"XRoar snapshot.\x0a\x00";
const VERSION_MAJOR: u8 = 1;
const VERSION_MINOR: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ChunkId {
    Version = 0,
    MachineConfig = 1,
    Cpu = 2,
    Pia0 = 3,
    Pia1 = 4,
    Sam = 5,
    RamPage0 = 6,
    RamPage1 = 7,
    DiskFilenames = 8,
}

fn write_chunk(w: &mut impl Write, id: ChunkId, payload: &[u8]) -> io::Result<()> {
    assert!(payload.len() <= u16::MAX as usize, "snapshot chunk too large");
    w.write_all(&[id as u8])?;
    w.write_all(&(payload.len() as u16).to_be_bytes())?;
    w.write_all(payload)
}

fn read_u8(r: &mut impl Read) -> io::Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_u16be(r: &mut impl Read) -> io::Result<u16> {
    let mut b = [0u8; 2];
    r.read_exact(&mut b)?;
    Ok(u16::from_be_bytes(b))
}

/// Serialise `machine`'s CPU, PIA, SAM, RAM and disk-filename state.
/// Machine configuration (ROM choice, model) is the caller's
/// responsibility to restate when loading, matching spec.md §6: the
/// machine config chunk records enough to *validate* a load target,
/// not enough to reconstruct one from nothing.
pub fn write_snapshot(machine: &Machine, w: &mut impl Write) -> Result<(), MachineError> {
    (|| -> io::Result<()> {
        w.write_all(MAGIC)?;
        let mut version = Vec::with_capacity(3);
        version.push(VERSION_MAJOR);
        version.extend_from_slice(&VERSION_MINOR.to_be_bytes());
        write_chunk(w, ChunkId::Version, &version)?;

        let variant_byte = match machine.variant() {
            CpuVariant::M6809 => 0u8,
            CpuVariant::H6309 => 1u8,
        };
        write_chunk(w, ChunkId::MachineConfig, &[variant_byte, machine.is_coco() as u8])?;

        write_chunk(w, ChunkId::Cpu, &encode_cpu(machine.cpu()))?;
        write_chunk(w, ChunkId::Pia0, &encode_pia(&machine.pia_raw(0)))?;
        write_chunk(w, ChunkId::Pia1, &encode_pia(&machine.pia_raw(1)))?;
        write_chunk(w, ChunkId::Sam, &machine.sam_register().to_be_bytes())?;

        let ram = machine.ram();
        write_chunk(w, ChunkId::RamPage0, &ram[0..0x8000])?;
        write_chunk(w, ChunkId::RamPage1, &ram[0x8000..0x10000])?;

        let mut filenames = Vec::new();
        for drive in 0..4 {
            let name = machine.disk_path(drive).unwrap_or("");
            filenames.push(name.len() as u8);
            filenames.extend_from_slice(name.as_bytes());
        }
        write_chunk(w, ChunkId::DiskFilenames, &filenames)?;
        Ok(())
    })()
    .map_err(|e| MachineError::HostIo(e.to_string()))
}

/// Load a snapshot over `machine`'s current CPU/PIA/SAM/RAM state,
/// leaving disk filenames available via [`loaded_disk_filenames`] for
/// the caller to re-insert (reinserting requires reopening the host
/// file, which this crate has no access to from inside `read_snapshot`).
pub fn read_snapshot(machine: &mut Machine, r: &mut impl Read) -> Result<Vec<String>, MachineError> {
    read_snapshot_inner(machine, r).map_err(|e| MachineError::HostIo(e.to_string()))
}

fn read_snapshot_inner(machine: &mut Machine, r: &mut impl Read) -> io::Result<Vec<String>> {
    let mut magic = vec![0u8; MAGIC.len()];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not a snapshot file"));
    }

    let mut filenames = Vec::new();
    loop {
        let id = match read_u8(r) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        let size = read_u16be(r)? as usize;
        let mut payload = vec![0u8; size];
        r.read_exact(&mut payload)?;
        let mut cursor = payload.as_slice();

        match id {
            x if x == ChunkId::Version as u8 => {}
            x if x == ChunkId::MachineConfig as u8 => {}
            x if x == ChunkId::Cpu as u8 => decode_cpu(machine.cpu_mut(), &mut cursor)?,
            x if x == ChunkId::Pia0 as u8 => machine.set_pia_raw(0, decode_pia(&mut cursor)?),
            x if x == ChunkId::Pia1 as u8 => machine.set_pia_raw(1, decode_pia(&mut cursor)?),
            x if x == ChunkId::Sam as u8 => machine.set_sam_register(read_u16be(&mut cursor)?),
            x if x == ChunkId::RamPage0 as u8 => machine.ram_mut()[0..0x8000].copy_from_slice(&payload),
            x if x == ChunkId::RamPage1 as u8 => machine.ram_mut()[0x8000..0x10000].copy_from_slice(&payload),
            x if x == ChunkId::DiskFilenames as u8 => {
                let mut c = payload.as_slice();
                for _ in 0..4 {
                    if c.is_empty() {
                        break;
                    }
                    let len = c[0] as usize;
                    c = &c[1..];
                    let name = String::from_utf8_lossy(&c[..len.min(c.len())]).into_owned();
                    c = &c[len.min(c.len())..];
                    filenames.push(name);
                }
            }
            // Unknown chunk: already consumed by the `read_exact` above.
            _ => {}
        }
    }
    Ok(filenames)
}

fn encode_cpu(cpu: &Cpu) -> Vec<u8> {
    let r = &cpu.regs;
    let mut out = Vec::with_capacity(24);
    out.push(match cpu.variant {
        CpuVariant::M6809 => 0,
        CpuVariant::H6309 => 1,
    });
    out.push(r.cc);
    out.push(r.dp);
    out.extend_from_slice(&r.d.to_be_bytes());
    out.extend_from_slice(&r.x.to_be_bytes());
    out.extend_from_slice(&r.y.to_be_bytes());
    out.extend_from_slice(&r.u.to_be_bytes());
    out.extend_from_slice(&r.s.to_be_bytes());
    out.extend_from_slice(&r.pc.to_be_bytes());
    out.extend_from_slice(&r.w.to_be_bytes());
    out.extend_from_slice(&r.v.to_be_bytes());
    out.push(r.md);
    out.push(cpu.halt as u8);
    out
}

fn decode_cpu(cpu: &mut Cpu, r: &mut impl Read) -> io::Result<()> {
    let _variant = read_u8(r)?; // Machine already fixes the variant at construction.
    cpu.regs.cc = read_u8(r)?;
    cpu.regs.dp = read_u8(r)?;
    cpu.regs.d = read_u16be(r)?;
    cpu.regs.x = read_u16be(r)?;
    cpu.regs.y = read_u16be(r)?;
    cpu.regs.u = read_u16be(r)?;
    cpu.regs.s = read_u16be(r)?;
    cpu.regs.pc = read_u16be(r)?;
    cpu.regs.w = read_u16be(r)?;
    cpu.regs.v = read_u16be(r)?;
    cpu.regs.md = read_u8(r)?;
    cpu.halt = read_u8(r)? != 0;
    Ok(())
}

fn encode_pia(raw: &[u8; 6]) -> Vec<u8> {
    raw.to_vec()
}

fn decode_pia(r: &mut impl Read) -> io::Result<[u8; 6]> {
    let mut raw = [0u8; 6];
    r.read_exact(&mut raw)?;
    Ok(raw)
}
