//! USSE hardware description for uspgen
//!
//! The SGX universal scalable shader engine executes fixed-width 64-bit
//! instructions. This crate models:
//! - opcodes, register banks and data formats
//! - a structured instruction form used while generating code
//! - one encoder per opcode producing the 64-bit hardware word
//! - per-core capability records and hardware constant tables

pub mod csc;
pub mod encode;
pub mod inst;
pub mod moe;
pub mod target;
pub mod types;

pub use csc::{ColorSpace, CscCoeffs};
pub use encode::{encode, HwInst};
pub use inst::{Inst, InstExtra, InstFlags, Pred, Slot, TestCond};
pub use moe::MoeState;
pub use target::{SpecialConst, Target};
pub use types::*;
