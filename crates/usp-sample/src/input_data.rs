//! Registry of data iterated into primary attributes before the shader runs

use usp_hw::Operand;

use crate::desc::CoordSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    /// Another iterated attribute of the shader
    Attribute(usize),
    Coord(CoordSource),
    /// Chunk pre-sampled for a sample
    Chunk { sample: usize, chunk: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEntry {
    pub kind: InputKind,
    /// First primary attribute register
    pub pa: u32,
    pub regs: u32,
    /// Reuses the iteration of an earlier entry
    pub shared: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InputData {
    entries: Vec<InputEntry>,
    next_pa: u32,
}

impl InputData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.next_pa = 0;
    }

    /// Adds an iteration using one iterator slot; returns its first register
    pub fn add(&mut self, kind: InputKind, regs: u32) -> u32 {
        let pa = self.next_pa;
        self.entries.push(InputEntry {
            kind,
            pa,
            regs,
            shared: false,
        });
        self.next_pa += regs;
        pa
    }

    /// Makes `kind` resolve to registers of an existing iteration
    pub fn add_shared(&mut self, kind: InputKind, pa: u32, regs: u32) {
        self.entries.push(InputEntry {
            kind,
            pa,
            regs,
            shared: true,
        });
    }

    fn find(&self, kind: &InputKind) -> Option<&InputEntry> {
        self.entries.iter().find(|e| e.kind == *kind)
    }

    pub fn coord(&self, source: &CoordSource) -> Option<Operand> {
        self.find(&InputKind::Coord(*source))
            .map(|e| Operand::pa(e.pa))
    }

    pub fn chunk(&self, sample: usize, chunk: usize) -> Option<Operand> {
        self.find(&InputKind::Chunk { sample, chunk })
            .map(|e| Operand::pa(e.pa))
    }

    pub fn entries(&self) -> &[InputEntry] {
        &self.entries
    }

    pub fn slots_used(&self) -> u32 {
        self.entries.iter().filter(|e| !e.shared).count() as u32
    }

    pub fn pa_used(&self) -> u32 {
        self.next_pa
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry() {
        let mut input = InputData::new();
        let coord = CoordSource::Iterated {
            slot: 1,
            centroid: false,
        };
        input.add(InputKind::Attribute(0), 4);
        let pa = input.add(InputKind::Coord(coord), 2);
        assert_eq!(pa, 4);
        let chunk_pa = input.add(InputKind::Chunk { sample: 0, chunk: 0 }, 1);
        input.add_shared(InputKind::Chunk { sample: 3, chunk: 0 }, chunk_pa, 1);

        assert_eq!(input.coord(&coord), Some(Operand::pa(4)));
        assert_eq!(input.chunk(3, 0), Some(Operand::pa(6)));
        assert_eq!(input.chunk(3, 1), None);
        assert_eq!(input.slots_used(), 3);
        assert_eq!(input.pa_used(), 7);

        input.clear();
        assert_eq!(input.slots_used(), 0);
    }
}
