//! Structured USSE instructions
//!
//! Code generation works on [`Inst`] values so that already emitted
//! instructions can still be inspected and patched (destination renaming,
//! clobber queries) before they are encoded.

use bitflags::bitflags;
use std::fmt;

use crate::types::*;

bitflags! {
    /// Per-instruction metadata handed to the block manager
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InstFlags: u16 {
        /// Don't execute for invalid pixels (encoded)
        const SKIP_INVALID = 0x0001;
        /// Don't interleave other instructions here (encoded)
        const NO_SCHED = 0x0002;
        const FETCH = 0x0004;
        const STATE_LOAD = 0x0008;
        const UNPACK = 0x0010;
        const INTERNAL_SAVE = 0x0020;
        const INTERNAL_RESTORE = 0x0040;
        const COORD_NORMALISE = 0x0080;
        const CSC = 0x0100;
        const MOE = 0x0200;
    }
}

/// Instruction predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pred {
    pub num: u8,
    pub negate: bool,
}

/// TEST condition on the ALU result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestCond {
    Zero,
    NonZero,
}

/// Opcode specific fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstExtra {
    None,
    /// Normalise integer sources to [0, 1] / [-1, 1]
    Pck { scale: bool },
    /// FIRH coefficient set
    Firh { coeffs: u8 },
    Test { cond: TestCond },
    Smp {
        dim: u8,
        proj: bool,
        drc: u8,
        /// Registers written by the fetch
        regs: u8,
        /// Texture state words read from the state source
        state_words: u8,
    },
    Ld { count: u8, drc: u8 },
    Wdf { drc: u8 },
    /// Colour format control; C10 mode changes SOP lanes to 10-bit channels
    Setfc { c10: bool },
    Smbo { bases: [u16; 4] },
    Smlsi { incs: [i8; 4] },
}

/// Write footprint of an instruction in one register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub bank: RegBank,
    pub num: u32,
    /// Byte lanes, or channel lanes for C10 destinations
    pub lanes: u8,
}

/// One USSE instruction before encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst {
    pub opcode: Opcode,
    pub pred: Option<Pred>,
    /// Iteration count, 1 for a single execution
    pub repeat: u8,
    /// Destination write mask (see [`Slot::lanes`])
    pub mask: u8,
    pub dest: Option<Operand>,
    pub srcs: [Option<Operand>; 3],
    pub extra: InstExtra,
    pub flags: InstFlags,
}

impl Inst {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            pred: None,
            repeat: 1,
            mask: 0xF,
            dest: None,
            srcs: [None; 3],
            extra: InstExtra::None,
            flags: InstFlags::SKIP_INVALID,
        }
    }

    pub fn dest(mut self, dest: Operand) -> Self {
        self.dest = Some(dest);
        self
    }

    pub fn src(mut self, idx: usize, src: Operand) -> Self {
        self.srcs[idx] = Some(src);
        self
    }

    pub fn srcs(mut self, srcs: &[Operand]) -> Self {
        for (i, s) in srcs.iter().enumerate().take(3) {
            self.srcs[i] = Some(*s);
        }
        self
    }

    pub fn repeat(mut self, repeat: u8) -> Self {
        self.repeat = repeat.max(1);
        self
    }

    pub fn mask(mut self, mask: u8) -> Self {
        self.mask = mask;
        self
    }

    pub fn extra(mut self, extra: InstExtra) -> Self {
        self.extra = extra;
        self
    }

    pub fn pred(mut self, num: u8, negate: bool) -> Self {
        self.pred = Some(Pred { num, negate });
        self
    }

    pub fn flags(mut self, flags: InstFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Second source of a two-source PCKUNPCK
    fn is_pck_pair(&self) -> bool {
        self.opcode == Opcode::Pckunpck && self.srcs[1].is_some()
    }

    /// Registers and lanes written by this instruction
    pub fn written_slots(&self) -> Vec<Slot> {
        let Some(dest) = self.dest else {
            return Vec::new();
        };
        let mut slots = Vec::new();
        let mut push = |num: u32, lanes: u8| {
            if lanes != 0 {
                slots.push(Slot {
                    bank: dest.bank,
                    num,
                    lanes,
                })
            }
        };

        match self.opcode {
            Opcode::Smp => {
                let regs = match self.extra {
                    InstExtra::Smp { regs, .. } => regs as u32,
                    _ => 1,
                };
                // The mask selects the lanes of the last register of a partial chunk
                for r in 0..regs {
                    push(dest.num + r, if r + 1 == regs { self.mask } else { 0xF });
                }
            }
            Opcode::Ld => {
                let count = match self.extra {
                    InstExtra::Ld { count, .. } => count as u32,
                    _ => 1,
                };
                for r in 0..count {
                    push(dest.num + r, 0xF);
                }
            }
            Opcode::Pckunpck => {
                let chans = if self.is_pck_pair() { 2 } else { self.repeat as u32 };
                for i in 0..chans {
                    let (reg, lanes) = chan_slot(dest.fmt, dest.comp as u32 + i);
                    push(dest.num + reg, lanes);
                }
            }
            Opcode::Test => push(dest.num, 0x1),
            _ if dest.fmt == DataFmt::C10 => {
                for i in 0..self.repeat as u32 {
                    for chan in 0..4 {
                        if self.mask & (1 << chan) != 0 {
                            let (reg, lanes) = chan_slot(DataFmt::C10, chan);
                            push(dest.num + i * 2 + reg, lanes);
                        }
                    }
                }
            }
            _ => {
                for i in 0..self.repeat as u32 {
                    push(dest.num + i, self.mask);
                }
            }
        }
        slots
    }

    /// Registers read by this instruction, in issue order
    pub fn read_regs(&self) -> Vec<(RegBank, u32)> {
        let mut regs = Vec::new();
        let mut push = |op: &Operand, count: u32| {
            if matches!(op.bank, RegBank::Immediate | RegBank::FpConst) {
                return;
            }
            for r in 0..count {
                regs.push((op.bank, op.num + r));
            }
        };

        match (self.opcode, self.extra) {
            (Opcode::Smp, InstExtra::Smp { dim, proj, state_words, .. }) => {
                if let Some(coord) = &self.srcs[0] {
                    push(coord, dim as u32 + proj as u32);
                }
                if let Some(state) = &self.srcs[1] {
                    push(state, state_words as u32);
                }
                if let Some(lod) = &self.srcs[2] {
                    push(lod, 1);
                }
            }
            (Opcode::Pckunpck, _) if self.is_pck_pair() => {
                for src in self.srcs.iter().flatten() {
                    push(src, 1);
                }
            }
            (Opcode::Pckunpck, _) => {
                if let Some(src) = &self.srcs[0] {
                    let per_reg = src.fmt.chans_per_reg();
                    let first = src.comp as u32 / per_reg;
                    let last = (src.comp as u32 + self.repeat as u32 - 1) / per_reg;
                    let mut op = *src;
                    op.num += first;
                    push(&op, last - first + 1);
                }
            }
            (Opcode::Ld, _) | (Opcode::Firh, _) | (Opcode::Test, _) | (Opcode::Limm, _) => {
                for src in self.srcs.iter().flatten() {
                    push(src, 1);
                }
            }
            _ => {
                let stride = if self.dest.map(|d| d.fmt) == Some(DataFmt::C10) {
                    2
                } else {
                    1
                };
                for src in self.srcs.iter().flatten() {
                    let count = (self.repeat as u32 - 1) * stride + 1;
                    push(src, count);
                }
            }
        }
        regs
    }

    /// Does this instruction read register `num` of `bank`?
    pub fn reads_reg(&self, bank: RegBank, num: u32) -> bool {
        self.read_regs().iter().any(|&(b, n)| b == bank && n == num)
    }

    /// Does this instruction write any lane of register `num` of `bank`?
    pub fn writes_reg(&self, bank: RegBank, num: u32) -> bool {
        self.written_slots()
            .iter()
            .any(|s| s.bank == bank && s.num == num)
    }

    /// Move every reference to `count` registers starting at `from` onto `to`
    pub fn rename(&mut self, bank: RegBank, from: u32, count: u32, to: Operand) {
        let rename_one = |op: &mut Operand| {
            if op.bank == bank && op.num >= from && op.num < from + count {
                op.num = to.num + (op.num - from);
                op.bank = to.bank;
            }
        };
        if let Some(dest) = self.dest.as_mut() {
            rename_one(dest);
        }
        for src in self.srcs.iter_mut().flatten() {
            rename_one(src);
        }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(pred) = self.pred {
            write!(f, "{}p{} ", if pred.negate { "!" } else { "" }, pred.num)?;
        }
        write!(f, "{}", self.opcode.name())?;
        if self.repeat > 1 {
            write!(f, ".rpt{}", self.repeat)?;
        }
        if let Some(dest) = &self.dest {
            if self.opcode == Opcode::Pckunpck {
                write!(f, ".{}", dest.fmt.name())?;
                if let Some(src) = &self.srcs[0] {
                    write!(f, ".{}", src.fmt.name())?;
                }
            }
        }

        let mut operands = Vec::new();
        if let Some(dest) = &self.dest {
            if self.mask != 0xF && !matches!(self.opcode, Opcode::Pckunpck) {
                operands.push(format!("{}.m{:x}", dest, self.mask));
            } else {
                operands.push(dest.to_string());
            }
        }
        operands.extend(self.srcs.iter().flatten().map(|s| s.to_string()));
        if !operands.is_empty() {
            write!(f, " {}", operands.join(", "))?;
        }

        match self.extra {
            InstExtra::None => Ok(()),
            InstExtra::Pck { scale } => {
                if scale {
                    write!(f, " [scale]")
                } else {
                    Ok(())
                }
            }
            InstExtra::Firh { coeffs } => write!(f, " [coeffs {}]", coeffs),
            InstExtra::Test { cond } => write!(f, " [{:?}]", cond),
            InstExtra::Smp { dim, proj, drc, regs, .. } => write!(
                f,
                " [{}d{}, drc{}, {} regs]",
                dim,
                if proj { " proj" } else { "" },
                drc,
                regs
            ),
            InstExtra::Ld { count, drc } => write!(f, " [{} words, drc{}]", count, drc),
            InstExtra::Wdf { drc } => write!(f, " drc{}", drc),
            InstExtra::Setfc { c10 } => write!(f, " {}", if c10 { "c10" } else { "u8" }),
            InstExtra::Smbo { bases } => write!(f, " {:?}", bases),
            InstExtra::Smlsi { incs } => write!(f, " {:?}", incs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smp_footprint() {
        let inst = Inst::new(Opcode::Smp)
            .dest(Operand::temp(4))
            .srcs(&[Operand::pa(0), Operand::sa(8)])
            .extra(InstExtra::Smp {
                dim: 2,
                proj: false,
                drc: 0,
                regs: 2,
                state_words: 4,
            });
        let slots = inst.written_slots();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[1].num, 5);
        assert!(inst.reads_reg(RegBank::PrimAttr, 1));
        assert!(!inst.reads_reg(RegBank::PrimAttr, 2));
        assert!(inst.reads_reg(RegBank::SecAttr, 11));
    }

    #[test]
    fn test_pck_channel_stepping() {
        // Four U8 channels of one register unpacked to four F32 registers
        let inst = Inst::new(Opcode::Pckunpck)
            .dest(Operand::output(0).with_fmt(DataFmt::F32))
            .src(0, Operand::temp(2).with_fmt(DataFmt::U8))
            .repeat(4);
        let written: Vec<u32> = inst.written_slots().iter().map(|s| s.num).collect();
        assert_eq!(written, vec![0, 1, 2, 3]);
        assert_eq!(inst.read_regs(), vec![(RegBank::Temp, 2)]);
    }

    #[test]
    fn test_pck_pair_footprint() {
        let inst = Inst::new(Opcode::Pckunpck)
            .dest(Operand::temp(0).with_fmt(DataFmt::F16).with_comp(0))
            .srcs(&[Operand::temp(4), Operand::temp(5)]);
        let slots = inst.written_slots();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].lanes | slots[1].lanes, 0xF);
    }

    #[test]
    fn test_c10_footprint() {
        let inst = Inst::new(Opcode::Sopwm)
            .dest(Operand::temp(6).with_fmt(DataFmt::C10))
            .src(0, Operand::temp(1).with_fmt(DataFmt::U8))
            .mask(0b1001);
        let slots = inst.written_slots();
        assert_eq!(slots.len(), 2);
        assert_eq!((slots[0].num, slots[0].lanes), (6, 0x1));
        assert_eq!((slots[1].num, slots[1].lanes), (7, 0x1));
    }

    #[test]
    fn test_rename() {
        let mut inst = Inst::new(Opcode::And)
            .dest(Operand::temp(3))
            .srcs(&[Operand::temp(3), Operand::fpconst(7)])
            .repeat(2);
        inst.rename(RegBank::Temp, 2, 2, Operand::output(8));
        assert_eq!(inst.dest.unwrap(), Operand::output(9));
        assert_eq!(inst.srcs[0].unwrap().bank, RegBank::Output);
        assert_eq!(inst.srcs[1].unwrap(), Operand::fpconst(7));
    }

    #[test]
    fn test_display() {
        let inst = Inst::new(Opcode::Wdf).extra(InstExtra::Wdf { drc: 1 });
        assert_eq!(inst.to_string(), "wdf drc1");
        let inst = Inst::new(Opcode::And)
            .dest(Operand::temp(1))
            .srcs(&[Operand::pa(0), Operand::fpconst(3)])
            .repeat(2);
        assert_eq!(inst.to_string(), "and.rpt2 r1, pa0, c3");
    }
}
