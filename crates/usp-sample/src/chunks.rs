//! Global chunk scheduling
//!
//! Non-dependent samples can have their texture chunks fetched by the
//! iterators before the shader starts, at the price of one command list
//! entry and some primary attribute registers per chunk. This pass decides,
//! for the whole shader, which chunks are pre-sampled and which are left to
//! an SMP in the shader, and lays out the iterated data.
//!
//! The decision is tried in order of decreasing generosity:
//!
//! 1. every chunk of every sample gets its own iteration;
//! 2. samples fetching the same data share iterations;
//! 3. a greedy allocation starting from "iterate every coordinate and
//!    sample everything in the shader", giving chunks to the coordinate
//!    groups that free the most resources per chunk first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use usp_core::{ResourceError, Result, UspError};
use usp_hw::{DataFmt, Swizzle};

use crate::chan_info::MAX_CHUNKS;
use crate::context::UspContext;
use crate::desc::CoordSource;
use crate::input_data::{InputData, InputKind};
use crate::shader::Shader;

/// How the final layout was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePhase {
    /// Every chunk pre-sampled on its own
    Naive,
    /// Every chunk pre-sampled, identical fetches shared
    Grouped,
    /// Part of the chunks pre-sampled, the rest sampled in the shader
    Greedy,
}

/// Result of [`decide_chunks_sampling`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSchedule {
    pub phase: SchedulePhase,
    pub slots_used: u32,
    pub pa_used: u32,
}

/// Command list entries and registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Usage {
    slots: i64,
    regs: i64,
}

impl Usage {
    fn new(slots: i64, regs: i64) -> Self {
        Self { slots, regs }
    }

    fn add(self, slots: i64, regs: i64) -> Self {
        Self::new(self.slots + slots, self.regs + regs)
    }

    fn fits(self, cap: i64, budget: i64) -> bool {
        self.slots <= cap && self.regs <= budget
    }
}

/// Samples reading identical data: same coordinates, texture, projection,
/// dimension and texture unit conversion
#[derive(Debug, Clone, PartialEq, Eq)]
struct FetchKey {
    coord: CoordSource,
    texture: usize,
    proj: bool,
    dim: u8,
    unpack: Option<DataFmt>,
    hw_swizzle: Option<[Swizzle; 4]>,
}

#[derive(Debug)]
struct SubGroup {
    key: FetchKey,
    samples: Vec<usize>,
    /// Chunks any member reads
    chunks: u8,
    regs: [u32; MAX_CHUNKS],
    /// Chunks pre-sampled so far
    allocated: u8,
}

impl SubGroup {
    fn missing(&self) -> u8 {
        self.chunks & !self.allocated
    }
}

#[derive(Debug)]
struct CoordGroup {
    coord: CoordSource,
    regs: u32,
    /// Iterated anyway for a dependent sample
    fixed: bool,
    subs: Vec<usize>,
}

/// Completing group `group` saves `gain` for `units` chunks
#[derive(Debug, PartialEq, Eq)]
struct Priority {
    gain: u64,
    units: u64,
    group: usize,
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.gain * other.units)
            .cmp(&(other.gain * self.units))
            .then_with(|| other.group.cmp(&self.group))
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Planner {
    cap: i64,
    budget: i64,
    /// Attributes and coordinates iterated whatever the decision
    fixed: Usage,
    fixed_coords: Vec<(CoordSource, u32)>,
    groups: Vec<CoordGroup>,
    subs: Vec<SubGroup>,
    /// Non-dependent samples that read texture data
    candidates: Vec<usize>,
}

/// Register and slot counts reported in errors
fn saturate(v: i64) -> u32 {
    u32::try_from(v.max(0)).unwrap_or(u32::MAX)
}

fn coord_regs_of(table: &[(CoordSource, u32)], coord: &CoordSource) -> u32 {
    table
        .iter()
        .find(|(c, _)| c == coord)
        .map_or(0, |(_, r)| *r)
}

fn bump(table: &mut Vec<(CoordSource, u32)>, coord: CoordSource, regs: u32) {
    match table.iter_mut().find(|(c, _)| *c == coord) {
        Some((_, r)) => *r = (*r).max(regs),
        None => table.push((coord, regs)),
    }
}

impl Planner {
    fn new(ctx: &UspContext, shader: &Shader) -> Result<Self> {
        let mut fixed = Usage::default();
        for regs in &shader.info.iterated_attrs {
            fixed = fixed.add(1, *regs as i64);
        }

        let mut candidates = Vec::new();
        let mut coord_regs = Vec::new();
        let mut fixed_coords = Vec::new();
        for (i, sample) in shader.samples.iter().enumerate() {
            let desc = &sample.desc;
            if desc.non_dependent {
                if sample.chan_info()?.chunk_mask == 0 {
                    continue;
                }
                candidates.push(i);
                bump(&mut coord_regs, desc.coord, desc.coord_regs());
            } else if desc.coord.is_iterated() {
                bump(&mut coord_regs, desc.coord, desc.coord_regs());
                bump(&mut fixed_coords, desc.coord, 0);
            }
        }
        for (coord, regs) in fixed_coords.iter_mut() {
            *regs = coord_regs_of(&coord_regs, coord);
            fixed = fixed.add(1, *regs as i64);
        }

        let mut groups: Vec<CoordGroup> = Vec::new();
        let mut subs: Vec<SubGroup> = Vec::new();
        for &i in &candidates {
            let sample = &shader.samples[i];
            let info = sample.chan_info()?;
            let key = FetchKey {
                coord: sample.desc.coord,
                texture: sample.desc.texture,
                proj: sample.desc.proj,
                dim: sample.desc.dim,
                unpack: sample.decision.unpack,
                hw_swizzle: sample.decision.hw_swizzle,
            };

            let g = match groups.iter().position(|g| g.coord == key.coord) {
                Some(g) => g,
                None => {
                    groups.push(CoordGroup {
                        coord: key.coord,
                        regs: coord_regs_of(&coord_regs, &key.coord),
                        fixed: fixed_coords.iter().any(|(c, _)| *c == key.coord),
                        subs: Vec::new(),
                    });
                    groups.len() - 1
                }
            };
            let existing = groups[g].subs.iter().copied().find(|&s| subs[s].key == key);
            let s = match existing {
                Some(s) => s,
                None => {
                    subs.push(SubGroup {
                        key,
                        samples: Vec::new(),
                        chunks: 0,
                        regs: [0; MAX_CHUNKS],
                        allocated: 0,
                    });
                    groups[g].subs.push(subs.len() - 1);
                    subs.len() - 1
                }
            };
            let sub = &mut subs[s];
            sub.samples.push(i);
            sub.chunks |= info.chunk_mask;
            for k in 0..MAX_CHUNKS {
                sub.regs[k] = sub.regs[k].max(info.chunk_regs[k]);
            }
        }

        Ok(Self {
            cap: ctx.target.max_iterators as i64,
            budget: ctx.pa_budget() as i64,
            fixed,
            fixed_coords,
            groups,
            subs,
            candidates,
        })
    }

    fn naive_usage(&self, shader: &Shader) -> Result<Usage> {
        let mut usage = self.fixed;
        for &i in &self.candidates {
            let info = shader.samples[i].chan_info()?;
            for k in (0..MAX_CHUNKS).filter(|k| info.chunk_mask & (1 << k) != 0) {
                usage = usage.add(1, info.chunk_regs[k] as i64);
            }
        }
        Ok(usage)
    }

    fn grouped_usage(&self) -> Usage {
        self.subs.iter().fold(self.fixed, |usage, sub| {
            (0..MAX_CHUNKS)
                .filter(|k| sub.chunks & (1 << k) != 0)
                .fold(usage, |u, k| u.add(1, sub.regs[k] as i64))
        })
    }

    /// Every coordinate iterated, nothing pre-sampled
    fn baseline(&self) -> Usage {
        self.groups
            .iter()
            .filter(|g| !g.fixed)
            .fold(self.fixed, |u, g| u.add(1, g.regs as i64))
    }

    /// (sub-group, chunk, registers) of the group with `allocated` state `want`
    fn units(&self, group: usize, want: bool) -> Vec<(usize, usize, u32)> {
        let mut units = Vec::new();
        for &s in &self.groups[group].subs {
            let sub = &self.subs[s];
            for k in 0..MAX_CHUNKS {
                let bit = 1 << k;
                if sub.chunks & bit != 0 && (sub.allocated & bit != 0) == want {
                    units.push((s, k, sub.regs[k]));
                }
            }
        }
        units
    }

    fn complete(&self, group: usize) -> bool {
        self.groups[group]
            .subs
            .iter()
            .all(|&s| self.subs[s].missing() == 0)
    }

    /// Cost of the group's coordinate iteration, refunded once it is complete
    fn refund(&self, group: usize) -> Usage {
        let g = &self.groups[group];
        if g.fixed {
            Usage::default()
        } else {
            Usage::new(1, g.regs as i64)
        }
    }

    fn greedy(&mut self) -> Usage {
        let mut usage = self.baseline();

        let mut queue = BinaryHeap::new();
        for group in 0..self.groups.len() {
            let units = self.units(group, false).len() as u64;
            if units == 0 {
                continue;
            }
            let refund = self.refund(group);
            queue.push(Priority {
                gain: (refund.slots + refund.regs) as u64,
                units,
                group,
            });
        }

        while let Some(Priority { group, .. }) = queue.pop() {
            let units = self.units(group, false);
            let refund = self.refund(group);
            for (n, &(s, k, regs)) in units.iter().enumerate() {
                let mut next = usage.add(1, regs as i64);
                if n + 1 == units.len() {
                    next = next.add(-refund.slots, -refund.regs);
                }
                if !next.fits(self.cap, self.budget) {
                    tracing::trace!("coordinate group {} stops after {} chunks", group, n);
                    break;
                }
                usage = next;
                self.subs[s].allocated |= 1 << k;
            }
        }

        self.rescue_stranded(&mut usage);
        usage
    }

    /// A group missing a single chunk may complete by taking the slot of a
    /// lone chunk of a group that cannot complete anyway.
    fn rescue_stranded(&mut self, usage: &mut Usage) {
        for group in 0..self.groups.len() {
            if self.groups[group].fixed {
                continue;
            }
            let missing = self.units(group, false);
            let [(s, k, regs)] = missing[..] else {
                continue;
            };
            let refund = self.refund(group);
            let completed = usage.add(1 - refund.slots, regs as i64 - refund.regs);
            if completed.fits(self.cap, self.budget) {
                *usage = completed;
                self.subs[s].allocated |= 1 << k;
                continue;
            }

            for other in 0..self.groups.len() {
                if other == group || self.complete(other) {
                    continue;
                }
                let [(s2, k2, regs2)] = self.units(other, true)[..] else {
                    continue;
                };
                let swapped = completed.add(-1, -(regs2 as i64));
                if swapped.fits(self.cap, self.budget) {
                    tracing::trace!(
                        "moving a chunk slot from coordinate group {} to {}",
                        other,
                        group
                    );
                    self.subs[s2].allocated &= !(1 << k2);
                    self.subs[s].allocated |= 1 << k;
                    *usage = swapped;
                    break;
                }
            }
        }
    }

    /// Registers attributes and coordinates that are iterated in every layout
    fn commit_fixed(&self, shader: &Shader, input: &mut InputData) {
        for (i, regs) in shader.info.iterated_attrs.iter().enumerate() {
            input.add(InputKind::Attribute(i), *regs);
        }
        for (coord, regs) in &self.fixed_coords {
            input.add(InputKind::Coord(*coord), *regs);
        }
    }

    /// One iteration per chunk per sample
    fn commit_naive(&self, shader: &mut Shader) -> Result<()> {
        let mut input = InputData::new();
        self.commit_fixed(shader, &mut input);
        for &i in &self.candidates {
            let sample = &mut shader.samples[i];
            let info = sample.chan_info()?.clone();
            for k in (0..MAX_CHUNKS).filter(|k| info.chunk_mask & (1 << k) != 0) {
                input.add(InputKind::Chunk { sample: i, chunk: k }, info.chunk_regs[k]);
            }
            sample.non_dep_chunks = info.chunk_mask;
        }
        shader.input_data = input;
        Ok(())
    }

    /// Iterations per sub-group, coordinates for incomplete groups
    fn commit_groups(&self, shader: &mut Shader) {
        let mut input = InputData::new();
        self.commit_fixed(shader, &mut input);
        for (g, group) in self.groups.iter().enumerate() {
            if !group.fixed && !self.complete(g) {
                input.add(InputKind::Coord(group.coord), group.regs);
            }
        }
        for sub in &self.subs {
            for k in (0..MAX_CHUNKS).filter(|k| sub.allocated & (1 << k) != 0) {
                let mut pa = None;
                for &i in &sub.samples {
                    let reads = shader.samples[i]
                        .chan_info
                        .as_ref()
                        .is_some_and(|info| info.chunk_mask & (1 << k) != 0);
                    if !reads {
                        continue;
                    }
                    let kind = InputKind::Chunk { sample: i, chunk: k };
                    match pa {
                        None => pa = Some(input.add(kind, sub.regs[k])),
                        Some(pa) => input.add_shared(kind, pa, sub.regs[k]),
                    }
                }
            }
            for &i in &sub.samples {
                shader.samples[i].non_dep_chunks = sub.allocated;
            }
        }
        shader.input_data = input;
    }
}

/// Decides which chunks of non-dependent samples the iterators pre-sample
/// and fills the shader's input data registry.
pub fn decide_chunks_sampling(ctx: &UspContext, shader: &mut Shader) -> Result<ChunkSchedule> {
    let mut planner = Planner::new(ctx, shader)?;
    let (cap, budget) = (planner.cap, planner.budget);

    let phase = if planner.naive_usage(shader)?.fits(cap, budget) {
        planner.commit_naive(shader)?;
        SchedulePhase::Naive
    } else if planner.grouped_usage().fits(cap, budget) {
        for sub in planner.subs.iter_mut() {
            sub.allocated = sub.chunks;
        }
        planner.commit_groups(shader);
        SchedulePhase::Grouped
    } else {
        let baseline = planner.baseline();
        if baseline.slots > cap {
            return Err(ResourceError::IteratorSlots {
                needed: saturate(baseline.slots),
                available: saturate(cap),
            }
            .into());
        }
        if baseline.regs > budget {
            return Err(ResourceError::PaRegisters {
                needed: saturate(baseline.regs),
                available: saturate(budget),
            }
            .into());
        }
        let usage = planner.greedy();
        tracing::trace!("greedy layout: {} slots, {} registers", usage.slots, usage.regs);
        planner.commit_groups(shader);
        SchedulePhase::Greedy
    };

    // Lay the samples out again with their final pre-sampled chunks
    for &i in &planner.candidates {
        let sample = &mut shader.samples[i];
        sample.data_add(ctx, &shader.textures)?;
    }

    let schedule = ChunkSchedule {
        phase,
        slots_used: shader.input_data.slots_used(),
        pa_used: shader.input_data.pa_used(),
    };
    if schedule.slots_used as i64 > cap || schedule.pa_used as i64 > budget {
        return Err(UspError::Internal(format!(
            "chunk schedule exceeds its budget: {} slots, {} registers",
            schedule.slots_used, schedule.pa_used
        )));
    }
    tracing::debug!(
        "chunk schedule {:?}: {}/{} slots, {}/{} PA registers",
        schedule.phase,
        schedule.slots_used,
        cap,
        schedule.pa_used,
        budget
    );
    Ok(schedule)
}
