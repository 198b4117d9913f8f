//! MOE (multiple operand enhancement) state
//!
//! Repeated instructions step their operands by a per-operand increment and
//! add a per-operand base offset. The state persists from one instruction to
//! the next, so a block of generated code has to establish the state it was
//! written for.

use crate::inst::{Inst, InstExtra, InstFlags};
use crate::types::Opcode;

/// Operand order used by the MOE registers: dest, src0, src1, src2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MoeState {
    pub incs: [i8; 4],
    pub bases: [u16; 4],
}

impl Default for MoeState {
    fn default() -> Self {
        Self {
            incs: [1; 4],
            bases: [0; 4],
        }
    }
}

impl MoeState {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Instructions switching from `self` to the default state
    pub fn reset_insts(&self) -> Vec<Inst> {
        let default = Self::default();
        let mut insts = Vec::new();
        if self.incs != default.incs {
            insts.push(
                Inst::new(Opcode::Smlsi)
                    .extra(InstExtra::Smlsi { incs: default.incs })
                    .flags(InstFlags::MOE),
            );
        }
        if self.bases != default.bases {
            insts.push(
                Inst::new(Opcode::Smbo)
                    .extra(InstExtra::Smbo {
                        bases: default.bases,
                    })
                    .flags(InstFlags::MOE),
            );
        }
        insts
    }
}
