//! USSE type definitions
//!
//! Opcodes, register banks, data formats and operands.

use serde::{Deserialize, Serialize};
use std::fmt;

//=============================================================================
// OPCODES
//=============================================================================

/// USSE opcodes used by the sample generator
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Nop = 0x00,
    Mov = 0x01,
    And = 0x02,
    Or = 0x03,
    Test = 0x04,
    Limm = 0x05,
    Pckunpck = 0x06,
    Sopwm = 0x07,
    Firh = 0x08,
    Fmad = 0x09,
    Frc = 0x0A,
    Smp = 0x0B,
    Ld = 0x0C,
    Wdf = 0x0D,
    Setfc = 0x0E,
    Smbo = 0x0F,
    Smlsi = 0x10,
}

impl From<u8> for Opcode {
    fn from(v: u8) -> Self {
        match v {
            0x01 => Opcode::Mov,
            0x02 => Opcode::And,
            0x03 => Opcode::Or,
            0x04 => Opcode::Test,
            0x05 => Opcode::Limm,
            0x06 => Opcode::Pckunpck,
            0x07 => Opcode::Sopwm,
            0x08 => Opcode::Firh,
            0x09 => Opcode::Fmad,
            0x0A => Opcode::Frc,
            0x0B => Opcode::Smp,
            0x0C => Opcode::Ld,
            0x0D => Opcode::Wdf,
            0x0E => Opcode::Setfc,
            0x0F => Opcode::Smbo,
            0x10 => Opcode::Smlsi,
            _ => Opcode::Nop,
        }
    }
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Mov => "mov",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Test => "test",
            Opcode::Limm => "limm",
            Opcode::Pckunpck => "pckunpck",
            Opcode::Sopwm => "sopwm",
            Opcode::Firh => "firh",
            Opcode::Fmad => "fmad",
            Opcode::Frc => "frc",
            Opcode::Smp => "smp",
            Opcode::Ld => "ld",
            Opcode::Wdf => "wdf",
            Opcode::Setfc => "setfc",
            Opcode::Smbo => "smbo",
            Opcode::Smlsi => "smlsi",
        }
    }

    /// Instructions that only change control state
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Opcode::Nop | Opcode::Wdf | Opcode::Setfc | Opcode::Smbo | Opcode::Smlsi
        )
    }
}

//=============================================================================
// REGISTERS
//=============================================================================

/// Register bank
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegBank {
    Temp = 0,
    PrimAttr = 1,
    Output = 2,
    SecAttr = 3,
    FpConst = 4,
    Immediate = 5,
    Internal = 6,
    Pred = 7,
}

impl From<u8> for RegBank {
    fn from(v: u8) -> Self {
        match v & 0x7 {
            0 => RegBank::Temp,
            1 => RegBank::PrimAttr,
            2 => RegBank::Output,
            3 => RegBank::SecAttr,
            4 => RegBank::FpConst,
            5 => RegBank::Immediate,
            6 => RegBank::Internal,
            _ => RegBank::Pred,
        }
    }
}

impl RegBank {
    pub fn prefix(self) -> &'static str {
        match self {
            RegBank::Temp => "r",
            RegBank::PrimAttr => "pa",
            RegBank::Output => "o",
            RegBank::SecAttr => "sa",
            RegBank::FpConst => "c",
            RegBank::Immediate => "#",
            RegBank::Internal => "i",
            RegBank::Pred => "p",
        }
    }

    /// Banks an instruction may write
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            RegBank::Temp | RegBank::PrimAttr | RegBank::Output | RegBank::Internal | RegBank::Pred
        )
    }
}

/// Data format of a channel or register
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFmt {
    U8 = 0,
    S8 = 1,
    U16 = 2,
    S16 = 3,
    F16 = 4,
    F32 = 5,
    U24 = 6,
    U32 = 7,
    S32 = 8,
    C10 = 9,
}

impl From<u8> for DataFmt {
    fn from(v: u8) -> Self {
        match v {
            0 => DataFmt::U8,
            1 => DataFmt::S8,
            2 => DataFmt::U16,
            3 => DataFmt::S16,
            4 => DataFmt::F16,
            6 => DataFmt::U24,
            7 => DataFmt::U32,
            8 => DataFmt::S32,
            9 => DataFmt::C10,
            _ => DataFmt::F32,
        }
    }
}

impl DataFmt {
    /// Width of one channel in bits
    pub fn bits(self) -> u32 {
        match self {
            DataFmt::U8 | DataFmt::S8 => 8,
            DataFmt::U16 | DataFmt::S16 | DataFmt::F16 => 16,
            DataFmt::U24 => 24,
            DataFmt::F32 | DataFmt::U32 | DataFmt::S32 => 32,
            DataFmt::C10 => 10,
        }
    }

    /// Channels held by one 32-bit register when used as a register format
    pub fn chans_per_reg(self) -> u32 {
        match self {
            DataFmt::U8 | DataFmt::S8 | DataFmt::C10 => 4,
            DataFmt::U16 | DataFmt::S16 | DataFmt::F16 => 2,
            DataFmt::U24 | DataFmt::F32 | DataFmt::U32 | DataFmt::S32 => 1,
        }
    }

    /// Registers spanned by a four channel vector
    pub fn regs_for_vec4(self) -> u32 {
        match self {
            DataFmt::C10 => 2,
            f => 4 / f.chans_per_reg(),
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, DataFmt::S8 | DataFmt::S16 | DataFmt::S32)
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataFmt::F16 | DataFmt::F32)
    }

    pub fn is_integer_dest(self) -> bool {
        matches!(self, DataFmt::U32 | DataFmt::S32)
    }

    pub fn name(self) -> &'static str {
        match self {
            DataFmt::U8 => "u8",
            DataFmt::S8 => "s8",
            DataFmt::U16 => "u16",
            DataFmt::S16 => "s16",
            DataFmt::F16 => "f16",
            DataFmt::F32 => "f32",
            DataFmt::U24 => "u24",
            DataFmt::U32 => "u32",
            DataFmt::S32 => "s32",
            DataFmt::C10 => "c10",
        }
    }
}

/// Register placement of channel `chan` of a vector in format `fmt`.
///
/// Returns the register offset and the lane mask inside that register. For
/// C10 the first three channels share the first register and alpha sits
/// alone in the second.
pub fn chan_slot(fmt: DataFmt, chan: u32) -> (u32, u8) {
    match fmt {
        DataFmt::C10 => {
            if chan < 3 {
                (0, 1 << chan)
            } else {
                (1, 0x1)
            }
        }
        DataFmt::U8 | DataFmt::S8 => (chan / 4, 1 << (chan % 4)),
        DataFmt::U16 | DataFmt::S16 | DataFmt::F16 => (chan / 2, 0x3 << (2 * (chan % 2))),
        DataFmt::U24 | DataFmt::F32 | DataFmt::U32 | DataFmt::S32 => (chan, 0xF),
    }
}

/// Channel selector used by texture swizzles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Swizzle {
    X,
    Y,
    Z,
    W,
    Zero,
    One,
}

impl Swizzle {
    pub const IDENTITY: [Swizzle; 4] = [Swizzle::X, Swizzle::Y, Swizzle::Z, Swizzle::W];

    pub fn chan(self) -> Option<usize> {
        match self {
            Swizzle::X => Some(0),
            Swizzle::Y => Some(1),
            Swizzle::Z => Some(2),
            Swizzle::W => Some(3),
            Swizzle::Zero | Swizzle::One => None,
        }
    }

    pub fn from_chan(chan: usize) -> Self {
        match chan {
            0 => Swizzle::X,
            1 => Swizzle::Y,
            2 => Swizzle::Z,
            _ => Swizzle::W,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Swizzle::X => 'x',
            Swizzle::Y => 'y',
            Swizzle::Z => 'z',
            Swizzle::W => 'w',
            Swizzle::Zero => '0',
            Swizzle::One => '1',
        }
    }
}

//=============================================================================
// OPERANDS
//=============================================================================

/// Instruction operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand {
    pub bank: RegBank,
    /// Register number, or the value for immediates
    pub num: u32,
    pub fmt: DataFmt,
    /// First channel (in `fmt` units) within the register
    pub comp: u8,
    pub negate: bool,
}

impl Operand {
    pub const fn new(bank: RegBank, num: u32) -> Self {
        Self {
            bank,
            num,
            fmt: DataFmt::F32,
            comp: 0,
            negate: false,
        }
    }

    pub const fn temp(num: u32) -> Self {
        Self::new(RegBank::Temp, num)
    }

    pub const fn pa(num: u32) -> Self {
        Self::new(RegBank::PrimAttr, num)
    }

    pub const fn sa(num: u32) -> Self {
        Self::new(RegBank::SecAttr, num)
    }

    pub const fn output(num: u32) -> Self {
        Self::new(RegBank::Output, num)
    }

    pub const fn internal(num: u32) -> Self {
        Self::new(RegBank::Internal, num)
    }

    pub const fn fpconst(index: u32) -> Self {
        Self::new(RegBank::FpConst, index)
    }

    pub const fn imm(value: u32) -> Self {
        Self::new(RegBank::Immediate, value)
    }

    pub const fn pred(num: u32) -> Self {
        Self::new(RegBank::Pred, num)
    }

    pub fn with_fmt(mut self, fmt: DataFmt) -> Self {
        self.fmt = fmt;
        self
    }

    pub fn with_comp(mut self, comp: u8) -> Self {
        self.comp = comp;
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    /// Same bank and format, `by` registers further on
    pub fn offset(mut self, by: u32) -> Self {
        self.num += by;
        self
    }

    pub fn is_reg(&self) -> bool {
        !matches!(self.bank, RegBank::Immediate)
    }

    pub fn same_reg(&self, other: &Operand) -> bool {
        self.bank == other.bank && self.num == other.num && self.is_reg()
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negate {
            write!(f, "-")?;
        }
        match self.bank {
            RegBank::Immediate => write!(f, "#0x{:x}", self.num),
            bank => {
                write!(f, "{}{}", bank.prefix(), self.num)?;
                if self.comp != 0 {
                    write!(f, ".{}", self.comp)?;
                }
                Ok(())
            }
        }
    }
}
