//! Per-core capability descriptions
//!
//! Everything that differs between SGX revisions is resolved once into a
//! [`Target`] and consulted by the generator, instead of being tested at
//! each emission site.

use usp_core::CoreKind;

use crate::types::{Operand, Swizzle};

/// Values held by the hardware constant bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialConst {
    Zero,
    OneF32,
    HalfF32,
    AllOnes,
    /// 0x7FFFFFFF, clears the float sign bit
    AbsMask,
    SignBit8,
    SignBit16,
    SignExt8,
    SignExt16,
}

impl SpecialConst {
    pub fn value(self) -> u32 {
        match self {
            SpecialConst::Zero => 0,
            SpecialConst::OneF32 => 0x3F80_0000,
            SpecialConst::HalfF32 => 0x3F00_0000,
            SpecialConst::AllOnes => 0xFFFF_FFFF,
            SpecialConst::AbsMask => 0x7FFF_FFFF,
            SpecialConst::SignBit8 => 0x0000_0080,
            SpecialConst::SignBit16 => 0x0000_8000,
            SpecialConst::SignExt8 => 0xFFFF_FF00,
            SpecialConst::SignExt16 => 0xFFFF_0000,
        }
    }
}

const CONSTS_VEC34: &[(SpecialConst, u32)] = &[
    (SpecialConst::Zero, 0),
    (SpecialConst::OneF32, 1),
    (SpecialConst::HalfF32, 2),
    (SpecialConst::AllOnes, 23),
    (SpecialConst::AbsMask, 24),
    (SpecialConst::SignBit8, 40),
    (SpecialConst::SignBit16, 41),
    (SpecialConst::SignExt8, 42),
    (SpecialConst::SignExt16, 43),
];

const CONSTS_SCALAR: &[(SpecialConst, u32)] = &[
    (SpecialConst::Zero, 0),
    (SpecialConst::OneF32, 1),
    (SpecialConst::HalfF32, 2),
    (SpecialConst::AllOnes, 12),
    (SpecialConst::AbsMask, 13),
    (SpecialConst::SignBit8, 20),
    (SpecialConst::SignBit16, 21),
    (SpecialConst::SignExt8, 22),
    (SpecialConst::SignExt16, 23),
];

use Swizzle::{One as S1, Zero as S0, W, X, Y, Z};

/// Swizzles the TAG swizzle unit can apply, with their state encoding
const HW_SWIZZLES: &[([Swizzle; 4], u8)] = &[
    ([X, Y, Z, W], 0),
    ([Z, Y, X, W], 1),
    ([W, Z, Y, X], 2),
    ([Y, Z, W, X], 3),
    ([X, Y, Z, S1], 4),
    ([Z, Y, X, S1], 5),
    ([X, X, X, Y], 6),
    ([X, X, X, S1], 7),
    ([S0, S0, S0, X], 8),
    ([X, X, X, X], 9),
];

/// Capabilities of one SGX core revision
#[derive(Debug, Clone)]
pub struct Target {
    pub core: CoreKind,
    pub num_temps: u32,
    pub pa_bank_size: u32,
    pub sa_bank_size: u32,
    /// Iterator / command list entries
    pub max_iterators: u32,
    pub num_internal_regs: u32,
    /// Texture state words per chunk
    pub tex_state_words: u32,
    pub max_chunks: usize,
    pub max_repeat: u32,
    pub num_drcs: u32,
    /// TAG can unpack to F16/F32 during the fetch
    pub tag_conversion: bool,
    /// TAG has a fixed swizzle unit
    pub hw_swizzle: bool,
    /// C10 register format is available
    pub c10: bool,
    /// TAG replicates luminance into R, G and B when unpacking
    pub tag_replicates_luminance: bool,
    /// SMP may write output registers
    pub smp_to_output: bool,
    consts: &'static [(SpecialConst, u32)],
}

impl Target {
    pub fn for_core(core: CoreKind) -> Self {
        let base = Self {
            core,
            num_temps: 64,
            pa_bank_size: 64,
            sa_bank_size: 128,
            max_iterators: 31,
            num_internal_regs: 3,
            tex_state_words: 3,
            max_chunks: 4,
            max_repeat: 16,
            num_drcs: 2,
            tag_conversion: false,
            hw_swizzle: false,
            c10: true,
            tag_replicates_luminance: false,
            smp_to_output: false,
            consts: CONSTS_SCALAR,
        };

        match core {
            CoreKind::Sgx530 | CoreKind::Sgx540 => base,
            CoreKind::Sgx545 => Self {
                num_temps: 128,
                pa_bank_size: 128,
                tex_state_words: 4,
                tag_conversion: true,
                ..base
            },
            CoreKind::Sgx543 | CoreKind::Sgx544 | CoreKind::Sgx554 => Self {
                num_temps: 128,
                pa_bank_size: 128,
                sa_bank_size: 256,
                tex_state_words: 4,
                tag_conversion: true,
                hw_swizzle: true,
                c10: false,
                tag_replicates_luminance: true,
                smp_to_output: true,
                consts: CONSTS_VEC34,
                ..base
            },
        }
    }

    /// Index of a constant in the hardware constant bank
    pub fn const_index(&self, c: SpecialConst) -> u32 {
        self.consts
            .iter()
            .find(|(k, _)| *k == c)
            .map(|(_, idx)| *idx)
            .unwrap_or(0)
    }

    pub fn special_const(&self, c: SpecialConst) -> Operand {
        Operand::fpconst(self.const_index(c))
    }

    /// Value of a constant bank entry, if it is one of the special constants
    pub fn const_value(&self, index: u32) -> Option<u32> {
        self.consts
            .iter()
            .find(|(_, idx)| *idx == index)
            .map(|(k, _)| k.value())
    }

    /// State encoding for a TAG swizzle, if the unit exists and supports it
    pub fn hw_swizzle_code(&self, swizzle: [Swizzle; 4]) -> Option<u8> {
        if !self.hw_swizzle {
            return None;
        }
        HW_SWIZZLES
            .iter()
            .find(|(pattern, _)| *pattern == swizzle)
            .map(|(_, code)| *code)
    }

    /// First supported swizzle agreeing with every lane that has a requirement
    pub fn find_hw_swizzle(&self, required: [Option<Swizzle>; 4]) -> Option<([Swizzle; 4], u8)> {
        if !self.hw_swizzle {
            return None;
        }
        HW_SWIZZLES
            .iter()
            .find(|(pattern, _)| {
                pattern
                    .iter()
                    .zip(required.iter())
                    .all(|(p, r)| r.map_or(true, |r| r == *p))
            })
            .copied()
    }

    /// Iterator cap after a configured limit
    pub fn iterator_cap(&self, limit: Option<u32>) -> u32 {
        limit.map_or(self.max_iterators, |l| l.min(self.max_iterators))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_capabilities() {
        let t = Target::for_core(CoreKind::Sgx543);
        assert!(t.tag_conversion && t.hw_swizzle && !t.c10);
        assert_eq!(t.max_iterators, 31);
        assert_eq!(t.tex_state_words, 4);

        let t = Target::for_core(CoreKind::Sgx530);
        assert!(!t.tag_conversion && !t.hw_swizzle && t.c10);
        assert_eq!(t.tex_state_words, 3);

        let t = Target::for_core(CoreKind::Sgx545);
        assert!(t.tag_conversion && !t.hw_swizzle);
    }

    #[test]
    fn test_special_consts() {
        let t = Target::for_core(CoreKind::Sgx544);
        let idx = t.const_index(SpecialConst::AbsMask);
        assert_eq!(t.const_value(idx), Some(0x7FFF_FFFF));
        assert_ne!(
            idx,
            Target::for_core(CoreKind::Sgx540).const_index(SpecialConst::AbsMask)
        );
    }

    #[test]
    fn test_hw_swizzle_table() {
        let t = Target::for_core(CoreKind::Sgx543);
        assert_eq!(t.hw_swizzle_code(Swizzle::IDENTITY), Some(0));
        assert_eq!(t.hw_swizzle_code([Z, Y, X, W]), Some(1));
        assert_eq!(t.hw_swizzle_code([S0, S0, S0, X]), Some(8));
        assert_eq!(t.hw_swizzle_code([Y, Y, Y, Y]), None);
        assert_eq!(
            Target::for_core(CoreKind::Sgx545).hw_swizzle_code(Swizzle::IDENTITY),
            None
        );
    }

    #[test]
    fn test_find_hw_swizzle() {
        let t = Target::for_core(CoreKind::Sgx543);
        assert_eq!(
            t.find_hw_swizzle([Some(Z), None, Some(X), None]),
            Some(([Z, Y, X, W], 1))
        );
        assert_eq!(t.find_hw_swizzle([None, None, None, Some(S1)]), Some(([X, Y, Z, S1], 4)));
        assert_eq!(t.find_hw_swizzle([Some(Y), Some(Y), None, None]), None);
    }

    #[test]
    fn test_iterator_cap() {
        let t = Target::for_core(CoreKind::Sgx543);
        assert_eq!(t.iterator_cap(None), 31);
        assert_eq!(t.iterator_cap(Some(8)), 8);
        assert_eq!(t.iterator_cap(Some(64)), 31);
    }
}
