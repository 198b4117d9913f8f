//! 64-bit USSE instruction encoding
//!
//! Word layout shared by every opcode (word 1 is the high word):
//!
//! ```text
//! word1  31:27 opcode      26:24 predicate   23:20 repeat-1   19:16 mask
//!        15    skipinv     14    nosched     13:11 dest bank  10:4  dest num
//!        3:0   opcode specific
//! word0  31:29 src0 bank   28:22 src0 num
//!        21:19 src1 bank   18:12 src1 num
//!        11:9  src2 bank   8:2   src2 num    1:0   opcode specific
//! ```
//!
//! Opcodes that carry no register operands reuse the operand fields for
//! their own payload (LIMM, SMBO, SMLSI).

use bytemuck::{Pod, Zeroable};
use usp_core::EncodeError;

use crate::inst::{Inst, InstExtra, InstFlags, TestCond};
use crate::target::Target;
use crate::types::{DataFmt, Opcode, Operand, RegBank};

/// One encoded instruction, low word first
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct HwInst(pub [u32; 2]);

impl HwInst {
    pub fn low(&self) -> u32 {
        self.0[0]
    }

    pub fn high(&self) -> u32 {
        self.0[1]
    }

    pub fn opcode(&self) -> Opcode {
        Opcode::from((self.high() >> 27) as u8)
    }

    pub fn as_u64(&self) -> u64 {
        ((self.high() as u64) << 32) | self.low() as u64
    }
}

/// Byte view of an encoded program
pub fn as_bytes(insts: &[HwInst]) -> &[u8] {
    bytemuck::cast_slice(insts)
}

const MAX_REG_NUM: u32 = 0x7F;

/// Checks that `value` fits in `bits`
fn field(opcode: Opcode, name: &'static str, value: u32, bits: u32) -> Result<u32, EncodeError> {
    if value >> bits != 0 {
        return Err(EncodeError::FieldOverflow {
            opcode: opcode.name(),
            field: name,
            value,
        });
    }
    Ok(value)
}

/// Register numbers share one 7-bit operand field
fn reg_num(opcode: Opcode, name: &'static str, num: u32) -> Result<u32, EncodeError> {
    if num > MAX_REG_NUM {
        return Err(EncodeError::FieldOverflow {
            opcode: opcode.name(),
            field: name,
            value: num,
        });
    }
    Ok(num)
}

fn invalid(opcode: Opcode, operand: &'static str) -> EncodeError {
    EncodeError::InvalidOperand {
        opcode: opcode.name(),
        operand,
    }
}

/// Encoder state for one instruction
struct Words {
    opcode: Opcode,
    low: u32,
    high: u32,
}

impl Words {
    fn new(inst: &Inst) -> Result<Self, EncodeError> {
        let opcode = inst.opcode;
        let mut high = (opcode as u32) << 27;

        if let Some(pred) = inst.pred {
            let code = match (pred.num, pred.negate) {
                (n @ 0..=3, false) => n as u32 + 1,
                (n @ 0..=2, true) => n as u32 + 5,
                _ => return Err(invalid(opcode, "predicate")),
            };
            high |= code << 24;
        }

        let repeat = field(opcode, "repeat", inst.repeat.max(1) as u32 - 1, 4)?;
        high |= repeat << 20;
        high |= field(opcode, "mask", inst.mask as u32, 4)? << 16;
        if inst.flags.contains(InstFlags::SKIP_INVALID) {
            high |= 1 << 15;
        }
        if inst.flags.contains(InstFlags::NO_SCHED) {
            high |= 1 << 14;
        }

        Ok(Self {
            opcode,
            low: 0,
            high,
        })
    }

    fn dest(&mut self, dest: &Operand) -> Result<(), EncodeError> {
        if !dest.bank.is_writable() {
            return Err(invalid(self.opcode, "destination"));
        }
        let num = reg_num(self.opcode, "dest", dest.num)?;
        self.high |= (dest.bank as u32) << 11 | num << 4;
        Ok(())
    }

    fn src(&mut self, idx: usize, src: &Operand) -> Result<(), EncodeError> {
        let num = reg_num(self.opcode, "src", src.num)?;
        let shift = 22 - 10 * idx as u32;
        self.low |= ((src.bank as u32) << 7 | num) << shift;
        Ok(())
    }

    /// Replaces the mask field with an opcode specific value
    fn set_mask_field(&mut self, value: u32) {
        self.high = (self.high & !(0xF << 16)) | (value & 0xF) << 16;
    }

    fn set_repeat_field(&mut self, value: u32) {
        self.high = (self.high & !(0xF << 20)) | (value & 0xF) << 20;
    }

    fn finish(self) -> HwInst {
        HwInst([self.low, self.high])
    }
}

/// Register operands for the common dest/src0..2 form
fn encode_operands(w: &mut Words, inst: &Inst) -> Result<(), EncodeError> {
    if let Some(dest) = &inst.dest {
        w.dest(dest)?;
    }
    for (i, src) in inst.srcs.iter().enumerate() {
        if let Some(src) = src {
            w.src(i, src)?;
        }
    }
    Ok(())
}

fn neg_bits(inst: &Inst) -> u32 {
    inst.srcs
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.filter(|s| s.negate).map(|_| 1 << i))
        .fold(0, |acc, b| acc | b)
}

fn encode_alu(inst: &Inst) -> Result<HwInst, EncodeError> {
    let mut w = Words::new(inst)?;
    if inst.dest.is_none() {
        return Err(invalid(inst.opcode, "destination"));
    }
    encode_operands(&mut w, inst)?;
    w.high |= neg_bits(inst) & 0x7;
    Ok(w.finish())
}

fn encode_limm(inst: &Inst) -> Result<HwInst, EncodeError> {
    let mut w = Words::new(inst)?;
    let dest = inst.dest.ok_or_else(|| invalid(inst.opcode, "destination"))?;
    w.dest(&dest)?;
    match inst.srcs[0] {
        Some(Operand {
            bank: RegBank::Immediate,
            num,
            ..
        }) => w.low = num,
        _ => return Err(invalid(inst.opcode, "immediate")),
    }
    Ok(w.finish())
}

fn encode_test(inst: &Inst) -> Result<HwInst, EncodeError> {
    let mut w = Words::new(inst)?;
    match inst.dest {
        Some(d) if d.bank == RegBank::Pred => w.dest(&d)?,
        _ => return Err(invalid(inst.opcode, "predicate destination")),
    }
    for (i, src) in inst.srcs.iter().enumerate() {
        if let Some(src) = src {
            w.src(i, src)?;
        }
    }
    w.high |= match inst.extra {
        InstExtra::Test {
            cond: TestCond::NonZero,
        } => 1,
        _ => 0,
    };
    Ok(w.finish())
}

fn encode_pck(inst: &Inst) -> Result<HwInst, EncodeError> {
    let mut w = Words::new(inst)?;
    let dest = inst.dest.ok_or_else(|| invalid(inst.opcode, "destination"))?;
    let src0 = inst.srcs[0].ok_or_else(|| invalid(inst.opcode, "source"))?;
    if dest.fmt == DataFmt::C10 || src0.fmt == DataFmt::C10 {
        return Err(EncodeError::Unavailable {
            opcode: "pckunpck.c10",
        });
    }
    w.dest(&dest)?;
    w.src(0, &src0)?;

    let mut comps = src0.comp as u32 & 0x3;
    if let Some(src1) = inst.srcs[1] {
        if src1.fmt != src0.fmt {
            return Err(invalid(inst.opcode, "second source format"));
        }
        w.src(1, &src1)?;
        comps |= (src1.comp as u32 & 0x3) << 2;
    }
    comps |= field(inst.opcode, "dest comp", dest.comp as u32, 2)? << 4;
    // src2 is never used by PCKUNPCK, its number field carries the channel selects
    w.low |= comps << 2;

    w.set_mask_field(src0.fmt as u32);
    w.high |= dest.fmt as u32 & 0xF;
    let scale = matches!(inst.extra, InstExtra::Pck { scale: true });
    w.low |= scale as u32 | (inst.srcs[1].is_some() as u32) << 1;
    Ok(w.finish())
}

fn encode_firh(inst: &Inst) -> Result<HwInst, EncodeError> {
    let mut w = Words::new(inst)?;
    encode_operands(&mut w, inst)?;
    let comp = |i: usize| inst.srcs[i].map_or(0, |s| s.comp as u32 & 0x3);
    w.set_repeat_field(comp(0) | comp(1) << 2);
    w.low |= comp(2);
    let coeffs = match inst.extra {
        InstExtra::Firh { coeffs } => coeffs as u32,
        _ => 0,
    };
    w.high |= field(inst.opcode, "coeffs", coeffs, 4)?;
    Ok(w.finish())
}

fn encode_smp(inst: &Inst, target: &Target) -> Result<HwInst, EncodeError> {
    let InstExtra::Smp {
        dim,
        proj,
        drc,
        regs,
        state_words,
    } = inst.extra
    else {
        return Err(invalid(inst.opcode, "sample control"));
    };
    let mut w = Words::new(inst)?;
    let dest = inst.dest.ok_or_else(|| invalid(inst.opcode, "destination"))?;
    if dest.bank == RegBank::Output && !target.smp_to_output {
        return Err(invalid(inst.opcode, "output destination"));
    }
    encode_operands(&mut w, inst)?;

    if !(1..=3).contains(&dim) {
        return Err(EncodeError::FieldOverflow {
            opcode: inst.opcode.name(),
            field: "dim",
            value: dim as u32,
        });
    }
    let drc = field(inst.opcode, "drc", drc as u32, 1)?;
    w.high |= (dim as u32 - 1) | (proj as u32) << 2 | drc << 3;

    // Bytes written to the last register, only contiguous low lanes are encodable
    let lanes = inst.mask as u32;
    if lanes == 0 || lanes & (lanes + 1) != 0 {
        return Err(invalid(inst.opcode, "mask"));
    }
    w.low |= lanes.count_ones() - 1;

    let regs = field(inst.opcode, "regs", (regs as u32).max(1) - 1, 2)?;
    let words = (state_words as u32).saturating_sub(3);
    w.set_mask_field(regs | field(inst.opcode, "state words", words, 1)? << 2);
    Ok(w.finish())
}

fn encode_ld(inst: &Inst, target: &Target) -> Result<HwInst, EncodeError> {
    let InstExtra::Ld { count, drc } = inst.extra else {
        return Err(invalid(inst.opcode, "load control"));
    };
    let mut w = Words::new(inst)?;
    encode_operands(&mut w, inst)?;
    let count = (count as u32).max(1);
    if count > target.max_repeat {
        return Err(EncodeError::FieldOverflow {
            opcode: inst.opcode.name(),
            field: "count",
            value: count,
        });
    }
    w.set_repeat_field(count - 1);
    w.high |= field(inst.opcode, "drc", drc as u32, 1)?;
    Ok(w.finish())
}

fn encode_control(inst: &Inst, target: &Target) -> Result<HwInst, EncodeError> {
    let mut w = Words::new(inst)?;
    match inst.extra {
        InstExtra::Wdf { drc } => {
            if drc as u32 >= target.num_drcs {
                return Err(EncodeError::FieldOverflow {
                    opcode: inst.opcode.name(),
                    field: "drc",
                    value: drc as u32,
                });
            }
            w.high |= drc as u32;
        }
        InstExtra::Setfc { c10 } => {
            if !target.c10 {
                return Err(EncodeError::Unavailable {
                    opcode: inst.opcode.name(),
                });
            }
            w.high |= c10 as u32;
        }
        InstExtra::Smbo { bases } => {
            for (i, &base) in bases[1..].iter().enumerate() {
                w.low |= field(inst.opcode, "base", base as u32, 10)? << (10 * i);
            }
            w.high |= field(inst.opcode, "base", bases[0] as u32, 10)?;
        }
        InstExtra::Smlsi { incs } => {
            w.low = u32::from_le_bytes(incs.map(|i| i as u8));
        }
        _ => {}
    }
    Ok(w.finish())
}

/// Encodes one instruction for `target`
pub fn encode(inst: &Inst, target: &Target) -> Result<HwInst, EncodeError> {
    let encoded = match inst.opcode {
        Opcode::Mov | Opcode::And | Opcode::Or | Opcode::Sopwm | Opcode::Fmad | Opcode::Frc => {
            encode_alu(inst)
        }
        Opcode::Limm => encode_limm(inst),
        Opcode::Test => encode_test(inst),
        Opcode::Pckunpck => encode_pck(inst),
        Opcode::Firh => encode_firh(inst),
        Opcode::Smp => encode_smp(inst, target),
        Opcode::Ld => encode_ld(inst, target),
        Opcode::Nop | Opcode::Wdf | Opcode::Setfc | Opcode::Smbo | Opcode::Smlsi => {
            encode_control(inst, target)
        }
    }?;
    tracing::trace!("{:016x}  {}", encoded.as_u64(), inst);
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use usp_core::CoreKind;

    fn target() -> Target {
        Target::for_core(CoreKind::Sgx543)
    }

    #[test]
    fn test_header_fields() {
        let inst = Inst::new(Opcode::And)
            .dest(Operand::temp(5))
            .srcs(&[Operand::pa(3), Operand::fpconst(24)])
            .repeat(4)
            .mask(0x3)
            .pred(1, true);
        let hw = encode(&inst, &target()).unwrap();
        let high = hw.high();
        assert_eq!(hw.opcode(), Opcode::And);
        assert_eq!((high >> 24) & 0x7, 6);
        assert_eq!((high >> 20) & 0xF, 3);
        assert_eq!((high >> 16) & 0xF, 0x3);
        assert_eq!((high >> 15) & 1, 1);
        assert_eq!((high >> 4) & 0x7F, 5);

        let low = hw.low();
        assert_eq!(low >> 29, RegBank::PrimAttr as u32);
        assert_eq!((low >> 22) & 0x7F, 3);
        assert_eq!((low >> 19) & 0x7, RegBank::FpConst as u32);
        assert_eq!((low >> 12) & 0x7F, 24);
    }

    #[test]
    fn test_limm_carries_full_word() {
        let inst = Inst::new(Opcode::Limm)
            .dest(Operand::temp(0))
            .src(0, Operand::imm(0x3B80_0000));
        let hw = encode(&inst, &target()).unwrap();
        assert_eq!(hw.low(), 0x3B80_0000);
    }

    #[test]
    fn test_register_range() {
        let inst = Inst::new(Opcode::Mov)
            .dest(Operand::temp(200))
            .src(0, Operand::temp(0));
        assert!(matches!(
            encode(&inst, &target()),
            Err(EncodeError::FieldOverflow { field: "dest", .. })
        ));

        let inst = Inst::new(Opcode::Mov)
            .dest(Operand::temp(MAX_REG_NUM))
            .src(0, Operand::temp(MAX_REG_NUM + 1));
        assert!(matches!(
            encode(&inst, &target()),
            Err(EncodeError::FieldOverflow { field: "src", value: 128, .. })
        ));
        let inst = Inst::new(Opcode::Mov)
            .dest(Operand::temp(MAX_REG_NUM))
            .src(0, Operand::temp(0));
        assert!(encode(&inst, &target()).is_ok());
    }

    #[test]
    fn test_unwritable_dest() {
        let inst = Inst::new(Opcode::Mov)
            .dest(Operand::sa(1))
            .src(0, Operand::temp(0));
        assert!(matches!(
            encode(&inst, &target()),
            Err(EncodeError::InvalidOperand { .. })
        ));
    }

    #[test]
    fn test_smp_fields() {
        let inst = Inst::new(Opcode::Smp)
            .dest(Operand::temp(8))
            .srcs(&[Operand::pa(0), Operand::sa(4)])
            .extra(InstExtra::Smp {
                dim: 2,
                proj: true,
                drc: 1,
                regs: 4,
                state_words: 4,
            });
        let high = encode(&inst, &target()).unwrap().high();
        assert_eq!(high & 0x3, 1);
        assert_eq!((high >> 2) & 1, 1);
        assert_eq!((high >> 3) & 1, 1);
        assert_eq!((high >> 16) & 0x3, 3);
        assert_eq!((high >> 18) & 0x1, 1);
    }

    #[test]
    fn test_setfc_needs_c10() {
        let inst = Inst::new(Opcode::Setfc).extra(InstExtra::Setfc { c10: true });
        assert!(encode(&inst, &target()).is_err());
        assert!(encode(&inst, &Target::for_core(CoreKind::Sgx540)).is_ok());
    }

    #[test]
    fn test_byte_view() {
        let insts = [HwInst([1, 2]), HwInst([3, 4])];
        assert_eq!(as_bytes(&insts).len(), 16);
    }
}
