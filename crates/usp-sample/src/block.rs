//! Instruction blocks receiving the generated code

use usp_core::{ResourceError, Result};
use usp_hw::{HwInst, InstFlags, MoeState, Opcode};

/// Owner of the instruction blocks generated code is appended to
pub trait InstBlockManager {
    /// Makes sure `count` more instructions fit in `block`
    fn reserve(&mut self, block: u32, count: usize) -> Result<()>;

    fn insert(&mut self, block: u32, inst: HwInst, opcode: Opcode, flags: InstFlags) -> Result<()>;

    /// MOE state on entry to the code appended next
    fn moe_state(&self, block: u32) -> MoeState;

    fn set_moe_after(&mut self, block: u32, state: MoeState);
}

/// An encoded instruction with its metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInst {
    pub hw: HwInst,
    pub opcode: Opcode,
    pub flags: InstFlags,
}

#[derive(Debug, Clone)]
pub struct InstBlock {
    pub id: u32,
    pub capacity: usize,
    pub insts: Vec<BlockInst>,
    pub moe_before: MoeState,
    pub moe_after: MoeState,
}

/// A list of fixed capacity instruction blocks
#[derive(Debug, Clone, Default)]
pub struct InstStream {
    blocks: Vec<InstBlock>,
}

impl InstStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&mut self, capacity: usize, moe: MoeState) -> Result<u32> {
        let id = u32::try_from(self.blocks.len())
            .map_err(|_| ResourceError::TooManyBlocks(self.blocks.len()))?;
        self.blocks.try_reserve(1)?;
        self.blocks.push(InstBlock {
            id,
            capacity,
            insts: Vec::new(),
            moe_before: moe,
            moe_after: moe,
        });
        Ok(id)
    }

    pub fn block(&self, id: u32) -> Option<&InstBlock> {
        self.blocks.get(id as usize)
    }

    pub fn blocks(&self) -> &[InstBlock] {
        &self.blocks
    }

    fn block_mut(&mut self, id: u32) -> Result<&mut InstBlock> {
        Ok(self
            .blocks
            .get_mut(id as usize)
            .ok_or(ResourceError::UnknownBlock(id))?)
    }

    /// All encoded words, block after block
    pub fn words(&self) -> Vec<HwInst> {
        self.blocks
            .iter()
            .flat_map(|b| b.insts.iter().map(|i| i.hw))
            .collect()
    }
}

impl InstBlockManager for InstStream {
    fn reserve(&mut self, block: u32, count: usize) -> Result<()> {
        let b = self.block_mut(block)?;
        if b.insts.len() + count > b.capacity {
            return Err(ResourceError::BlockFull {
                block,
                capacity: b.capacity,
            }
            .into());
        }
        b.insts.try_reserve(count)?;
        Ok(())
    }

    fn insert(&mut self, block: u32, inst: HwInst, opcode: Opcode, flags: InstFlags) -> Result<()> {
        let b = self.block_mut(block)?;
        if b.insts.len() >= b.capacity {
            return Err(ResourceError::BlockFull {
                block,
                capacity: b.capacity,
            }
            .into());
        }
        b.insts.push(BlockInst {
            hw: inst,
            opcode,
            flags,
        });
        Ok(())
    }

    fn moe_state(&self, block: u32) -> MoeState {
        self.block(block).map(|b| b.moe_after).unwrap_or_default()
    }

    fn set_moe_after(&mut self, block: u32, state: MoeState) {
        if let Some(b) = self.blocks.get_mut(block as usize) {
            b.moe_after = state;
        }
    }
}
