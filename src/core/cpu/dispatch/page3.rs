//! `0x11`-prefixed opcode map (spec.md §4.3.5): `CMPU`/`CMPS`, `SWI3`,
//! the HD6309 `TFM` block-copy family (`0x38`-`0x3B`), and a
//! functionally-plausible rendition of `DIVD`/`DIVQ`/`BITMD`/`LDMD`
//! (exact cycle counts and bit-for-bit `MD`/`CC` edge-case fidelity
//! for these four are out of scope per the division-semantics open
//! question -- divide-by-zero traps to the illegal-instruction vector,
//! which is the behaviour callers can actually observe).

use crate::core::cpu::regs::{CC_C, CC_F, CC_I, CC_V, MD_DIV0, MD_NATIVE};
use crate::core::cpu::{Bus, Cpu, CpuState, TfmReg, TfmState, VEC_ILLEGAL, VEC_SWI3};

use super::Mode;

pub(crate) fn execute<B: Bus>(cpu: &mut Cpu, bus: &mut B, opcode: u8) {
    match opcode {
        0x38..=0x3B => begin_tfm(cpu, bus, opcode),
        0x3C => bitmd(cpu, bus),
        0x3D => ldmd(cpu, bus),
        0x3F => {
            cpu.push_irq_registers(bus, true);
            cpu.take_interrupt(bus, CC_F | CC_I, VEC_SWI3);
        }
        0x83 => {
            let v = cpu.read_operand16(bus, Mode::Immediate);
            cpu.op_cmp16(cpu.regs.u, v);
        }
        0x93 => {
            let v = cpu.read_operand16(bus, Mode::Direct);
            cpu.op_cmp16(cpu.regs.u, v);
        }
        0xA3 => {
            let v = cpu.read_operand16(bus, Mode::Indexed);
            cpu.op_cmp16(cpu.regs.u, v);
        }
        0xB3 => {
            let v = cpu.read_operand16(bus, Mode::Extended);
            cpu.op_cmp16(cpu.regs.u, v);
        }
        0x8C => {
            let v = cpu.read_operand16(bus, Mode::Immediate);
            cpu.op_cmp16(cpu.regs.s, v);
        }
        0x9C => {
            let v = cpu.read_operand16(bus, Mode::Direct);
            cpu.op_cmp16(cpu.regs.s, v);
        }
        0xAC => {
            let v = cpu.read_operand16(bus, Mode::Indexed);
            cpu.op_cmp16(cpu.regs.s, v);
        }
        0xBC => {
            let v = cpu.read_operand16(bus, Mode::Extended);
            cpu.op_cmp16(cpu.regs.s, v);
        }
        0x88 => {
            let v = cpu.read_operand8(bus, Mode::Immediate);
            divd(cpu, bus, v);
        }
        0x98 => {
            let v = cpu.read_operand8(bus, Mode::Direct);
            divd(cpu, bus, v);
        }
        0xA8 => {
            let v = cpu.read_operand8(bus, Mode::Indexed);
            divd(cpu, bus, v);
        }
        0xB8 => {
            let v = cpu.read_operand8(bus, Mode::Extended);
            divd(cpu, bus, v);
        }
        0x89 => {
            let v = cpu.read_operand16(bus, Mode::Immediate);
            divq(cpu, bus, v);
        }
        0x99 => {
            let v = cpu.read_operand16(bus, Mode::Direct);
            divq(cpu, bus, v);
        }
        0xA9 => {
            let v = cpu.read_operand16(bus, Mode::Indexed);
            divq(cpu, bus, v);
        }
        0xB9 => {
            let v = cpu.read_operand16(bus, Mode::Extended);
            divq(cpu, bus, v);
        }
        _ => cpu.illegal_instruction(bus),
    }
}

fn tfm_reg(sel: u8) -> Option<TfmReg> {
    match sel & 0xF {
        0x0 => Some(TfmReg::D),
        0x1 => Some(TfmReg::X),
        0x2 => Some(TfmReg::Y),
        0x3 => Some(TfmReg::U),
        0x4 => Some(TfmReg::S),
        _ => None,
    }
}

/// `TFM r+,r+` / `r-,r-` / `r+,r` / `r,r+` (opcodes `0x38`-`0x3B`).
/// An out-of-range register selector in the postbyte is itself an
/// illegal-instruction condition on real HD6309 silicon, not merely
/// an unimplemented case.
fn begin_tfm<B: Bus>(cpu: &mut Cpu, bus: &mut B, opcode: u8) {
    let postbyte = cpu.fetch_byte(bus);
    let src_sel = postbyte >> 4;
    let dest_sel = postbyte & 0xF;
    let (Some(src), Some(dest)) = (tfm_reg(src_sel), tfm_reg(dest_sel)) else {
        cpu.illegal_instruction(bus);
        return;
    };
    let (src_mod, dest_mod) = match opcode {
        0x38 => (1, 1),
        0x39 => (-1, -1),
        0x3A => (1, 0),
        0x3B => (0, 1),
        _ => unreachable!(),
    };
    cpu.tfm = Some(TfmState {
        src,
        dest,
        src_mod,
        dest_mod,
        data: 0,
    });
    // Rewind PC to the `0x11` prefix byte: if an interrupt lands
    // mid-transfer, the pushed return address must point back at this
    // instruction so RTI re-enters it and resumes from the
    // already-advanced src/dest registers, rather than skipping past
    // an unfinished copy.
    cpu.regs.pc = cpu.regs.pc.wrapping_sub(3);
    cpu.state = CpuState::Tfm;
}

fn bitmd<B: Bus>(cpu: &mut Cpu, bus: &mut B) {
    let v = cpu.fetch_byte(bus);
    let r = cpu.regs.md & v;
    cpu.regs.cc_set(crate::core::cpu::regs::CC_Z, r == 0);
}

fn ldmd<B: Bus>(cpu: &mut Cpu, bus: &mut B) {
    let v = cpu.fetch_byte(bus);
    cpu.regs.md = (cpu.regs.md & (MD_DIV0 | crate::core::cpu::regs::MD_ILLEGAL)) | (v & MD_NATIVE);
}

/// 16-bit dividend (`D`) / 8-bit divisor -> 8-bit quotient in `B`,
/// 8-bit remainder in `A`.
fn divd<B: Bus>(cpu: &mut Cpu, bus: &mut B, divisor: u8) {
    if divisor == 0 {
        cpu.regs.md |= MD_DIV0;
        cpu.push_irq_registers(bus, true);
        cpu.take_interrupt(bus, CC_F | CC_I, VEC_ILLEGAL);
        return;
    }
    let dividend = cpu.regs.d as i16;
    let divisor_s = divisor as i8 as i16;
    let quotient = dividend / divisor_s;
    let remainder = dividend % divisor_s;
    cpu.regs.cc_set(CC_C, quotient & 1 != 0);
    cpu.regs.cc_set(CC_V, quotient > i8::MAX as i16 || quotient < i8::MIN as i16);
    cpu.regs.set_b(quotient as u8);
    cpu.regs.set_a(remainder as u8);
    cpu.regs.set_nz8(cpu.regs.b());
}

/// 32-bit dividend (`D:W`) / 16-bit divisor -> 16-bit quotient in
/// `D`, 16-bit remainder in `W`.
fn divq<B: Bus>(cpu: &mut Cpu, bus: &mut B, divisor: u16) {
    if divisor == 0 {
        cpu.regs.md |= MD_DIV0;
        cpu.push_irq_registers(bus, true);
        cpu.take_interrupt(bus, CC_F | CC_I, VEC_ILLEGAL);
        return;
    }
    let dividend = cpu.regs.q() as i32;
    let divisor_s = divisor as i16 as i32;
    let quotient = dividend / divisor_s;
    let remainder = dividend % divisor_s;
    cpu.regs.cc_set(CC_C, quotient & 1 != 0);
    cpu.regs.cc_set(CC_V, quotient > i16::MAX as i32 || quotient < i16::MIN as i32);
    cpu.regs.d = quotient as u16;
    cpu.regs.w = remainder as u16;
    cpu.regs.set_nz16(cpu.regs.d);
}
