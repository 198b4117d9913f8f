//! Fetch phase of a sample
//!
//! Emits, in order: MOE fix-up, internal register saves, texture state
//! loads, coordinate normalisation, the SMP instructions with their waits,
//! the depth sign fix, the YUV conversion and the internal register
//! restores. Every stage is optional and none is retried.

use usp_core::{EmitError, ResourceError, Result, UspError};
use usp_hw::{
    DataFmt, Inst, InstExtra, InstFlags, Opcode, Operand, SpecialConst,
};

use crate::chan_info::{ChanSource, TexChanInfo, TexType, MAX_CHUNKS};
use crate::context::UspContext;
use crate::desc::{CoordSource, Filter, ShaderInfo, TextureDesc};
use crate::input_data::InputData;
use crate::sample::Sample;

/// Shader-wide state needed while generating one sample
pub struct GenEnv<'a> {
    pub ctx: &'a UspContext,
    pub info: &'a ShaderInfo,
    pub texture: &'a TextureDesc,
    pub input: &'a InputData,
}

/// Hands out `n` consecutive temporaries after `offset` already used ones
pub(crate) fn alloc_temps(env: &GenEnv, used: &mut u32, offset: u32, n: u32) -> Result<Operand> {
    let first = env.info.temp_base + offset + *used;
    *used += n;
    let total = offset + *used;
    let available = env.ctx.config.limits.max_sample_temps;
    if total > available {
        return Err(ResourceError::Temps {
            needed: total,
            available,
        }
        .into());
    }
    Ok(Operand::temp(first))
}

fn temps(env: &GenEnv, sample: &mut Sample, n: u32) -> Result<Operand> {
    alloc_temps(env, &mut sample.temps_used, 0, n)
}

pub(crate) fn chunks(mask: u8) -> impl Iterator<Item = usize> {
    (0..MAX_CHUNKS).filter(move |k| mask & (1 << k) != 0)
}

/// Internal registers saved around the fetch
#[derive(Debug, Default)]
struct InternalState {
    /// Live and not saved
    live: u8,
    saved: Vec<(u32, Operand)>,
}

fn internal_moves(dest: Operand, src: Operand, c10: bool, flags: InstFlags) -> Vec<Inst> {
    if c10 {
        // Colour channels and alpha sit in different halves
        let dest = dest.with_fmt(DataFmt::C10);
        let src = src.with_fmt(DataFmt::C10);
        vec![
            Inst::new(Opcode::Mov).dest(dest).src(0, src).mask(0x7).flags(flags),
            Inst::new(Opcode::Mov).dest(dest).src(0, src).mask(0x8).flags(flags),
        ]
    } else {
        vec![Inst::new(Opcode::Mov).dest(dest).src(0, src).flags(flags)]
    }
}

fn save_internals(env: &GenEnv, sample: &mut Sample, state: &mut InternalState) -> Result<()> {
    let c10 = sample.desc.internals_c10;
    for i in 0..env.ctx.target.num_internal_regs {
        if state.live & (1 << i) == 0 {
            continue;
        }
        let temp = temps(env, sample, if c10 { 2 } else { 1 })?;
        sample.insts.extend(internal_moves(
            temp,
            Operand::internal(i),
            c10,
            InstFlags::INTERNAL_SAVE,
        ));
        state.saved.push((i, temp));
        state.live &= !(1 << i);
    }
    Ok(())
}

fn restore_internals(sample: &mut Sample, state: &InternalState) {
    let c10 = sample.desc.internals_c10;
    for &(i, temp) in &state.saved {
        sample.insts.extend(internal_moves(
            Operand::internal(i),
            temp,
            c10,
            InstFlags::INTERNAL_RESTORE,
        ));
    }
}

/// Waits for outstanding fetches and loads; internal registers do not survive it
fn emit_wdf(sample: &mut Sample, state: &InternalState, drc: u8) -> Result<()> {
    if state.live != 0 {
        return Err(EmitError::InternalRegLive(state.live.trailing_zeros()).into());
    }
    sample
        .insts
        .push(Inst::new(Opcode::Wdf).extra(InstExtra::Wdf { drc }));
    Ok(())
}

/// Texture state operand per fetched chunk. Returns whether a memory load
/// is outstanding.
fn load_state(
    env: &GenEnv,
    sample: &mut Sample,
    fetch_mask: u8,
) -> Result<([Option<Operand>; MAX_CHUNKS], bool)> {
    let words = env.ctx.target.tex_state_words;
    let mut states = [None; MAX_CHUNKS];
    let mut idxs = Vec::new();
    for k in chunks(fetch_mask) {
        let idx = sample.decision.ctrl_idx[k].ok_or_else(|| {
            UspError::Internal(format!("sample {} chunk {} has no texture state", sample.id, k))
        })?;
        idxs.push((k, idx as u32));
    }

    if !env.ctx.config.codegen.tex_state_in_memory {
        for (k, idx) in idxs {
            states[k] = Some(Operand::sa(env.info.tex_state_sa_base + idx * words));
        }
        return Ok((states, false));
    }

    let base = env.info.tex_state_mem_base.ok_or_else(|| {
        ResourceError::MissingInputData("texture state table address".to_string())
    })?;
    let mut i = 0;
    while i < idxs.len() {
        // Entries adjacent in the table come in with a single load
        let mut run = 1;
        while i + run < idxs.len() && idxs[i + run].1 == idxs[i].1 + run as u32 {
            run += 1;
        }
        let count = words * run as u32;
        let dest = temps(env, sample, count)?;
        sample.insts.push(
            Inst::new(Opcode::Ld)
                .dest(dest)
                .srcs(&[Operand::sa(base), Operand::imm(idxs[i].1 * words)])
                .extra(InstExtra::Ld {
                    count: count as u8,
                    drc: 0,
                })
                .flags(InstFlags::STATE_LOAD),
        );
        for (j, &(k, _)) in idxs[i..i + run].iter().enumerate() {
            states[k] = Some(dest.offset(words * j as u32));
        }
        i += run;
    }
    Ok((states, true))
}

/// Register holding the coordinates the SMP reads
fn coordinates(env: &GenEnv, sample: &mut Sample) -> Result<Operand> {
    let src = match sample.desc.coord {
        CoordSource::Register { bank, num } => Operand::new(bank, num),
        source => env.input.coord(&source).ok_or_else(|| {
            ResourceError::MissingInputData(format!("coordinates of sample {}", sample.id))
        })?,
    };
    if env.texture.normalised {
        return Ok(src);
    }
    if sample.desc.proj {
        return Err(EmitError::ProjectedUnnormalised.into());
    }
    normalise_coords(env, sample, src)
}

fn limm(dest: Operand, value: f32) -> Inst {
    Inst::new(Opcode::Limm)
        .dest(dest)
        .src(0, Operand::imm(value.to_bits()))
        .flags(InstFlags::COORD_NORMALISE)
}

/// Converts texel coordinates to [0, 1].
///
/// Point sampling snaps to the texel centre: `(floor(x) + 0.5) / size`.
/// FRC computes `frac(src0) - src1`, so `frac(x) - x` gives `-floor(x)`.
/// Linear filtering only scales, centring would shift the filter footprint.
fn normalise_coords(env: &GenEnv, sample: &mut Sample, src: Operand) -> Result<Operand> {
    let dim = sample.desc.dim as usize;
    let sizes: Vec<f32> = (0..dim).map(|a| env.texture.axis_size(a) as f32).collect();
    let square = sizes.iter().all(|s| *s == sizes[0]);
    let linear = env.texture.filter == Filter::Linear;
    let consts = if square { 1 } else { dim };

    let out = temps(env, sample, dim as u32)?;
    let rcp = temps(env, sample, consts as u32)?;
    let centre = if linear {
        None
    } else {
        Some(temps(env, sample, consts as u32)?)
    };

    for (i, size) in sizes.iter().take(consts).enumerate() {
        sample.insts.push(limm(rcp.offset(i as u32), 1.0 / size));
        if let Some(centre) = centre {
            sample.insts.push(limm(centre.offset(i as u32), 0.5 / size));
        }
    }

    let zero = env.ctx.target.special_const(SpecialConst::Zero);
    for a in 0..dim {
        let c = if square { 0 } else { a as u32 };
        let x = src.offset(a as u32);
        let dst = out.offset(a as u32);
        let flags = InstFlags::COORD_NORMALISE;
        match centre {
            None => sample.insts.push(
                Inst::new(Opcode::Fmad)
                    .dest(dst)
                    .srcs(&[x, rcp.offset(c), zero])
                    .flags(flags),
            ),
            Some(centre) => {
                sample.insts.push(Inst::new(Opcode::Frc).dest(dst).srcs(&[x, x]).flags(flags));
                sample
                    .insts
                    .push(Inst::new(Opcode::Mov).dest(dst).src(0, dst.negated()).flags(flags));
                sample.insts.push(
                    Inst::new(Opcode::Fmad)
                        .dest(dst)
                        .srcs(&[dst, rcp.offset(c), centre.offset(c)])
                        .flags(flags),
                );
            }
        }
    }
    Ok(out)
}

/// Data operand for a channel source inside the fetched chunks
pub(crate) fn chunk_operand(sample: &Sample, src: &ChanSource) -> Result<Operand> {
    match *src {
        ChanSource::Data {
            chunk, reg, fmt, ..
        } => {
            let loc = sample.chunk_locs[chunk].ok_or(EmitError::MissingChunkData(chunk))?;
            Ok(loc.offset(reg).with_fmt(fmt).with_comp(src.comp()))
        }
        _ => Err(UspError::Internal(format!(
            "sample {}: {:?} has no chunk data",
            sample.id, src
        ))),
    }
}

/// Converts YUV chunks to RGB in a U8 staging register
fn emit_csc(env: &GenEnv, sample: &mut Sample, info: &TexChanInfo, yuv: &[ChanSource; 3]) -> Result<TexChanInfo> {
    let y = chunk_operand(sample, &yuv[0])?;
    let u = chunk_operand(sample, &yuv[1])?;
    let v = chunk_operand(sample, &yuv[2])?;
    let staging = temps(env, sample, 1)?.with_fmt(DataFmt::U8);

    let mut live = 0u8;
    for src in &info.chans {
        if let ChanSource::Csc { rgb } = src {
            live |= 1 << rgb;
        }
    }
    for p in 0..3 {
        if live & (1 << p) == 0 {
            continue;
        }
        sample.insts.push(
            Inst::new(Opcode::Firh)
                .dest(staging)
                .srcs(&[y, u, v])
                .mask(1 << p)
                .extra(InstExtra::Firh {
                    coeffs: env.texture.colorspace.coeff_set(p),
                })
                .flags(InstFlags::CSC),
        );
    }

    sample.chunk_locs = [Some(staging), None, None, None];
    Ok(info.after_csc())
}

/// Emits the fetch phase into `sample.insts`
pub fn emit_fetch(env: &GenEnv, sample: &mut Sample) -> Result<()> {
    let info = sample.chan_info()?.clone();
    let target = &env.ctx.target;

    if sample.desc.live_internals >> target.num_internal_regs != 0 {
        return Err(UspError::InvalidSample(
            sample.id,
            format!("internal register mask {:#x}", sample.desc.live_internals),
        ));
    }
    if sample.desc.internals_c10 && !target.c10 {
        return Err(EmitError::UnsupportedDestFormat("c10").into());
    }

    let moe = sample.moe.reset_insts();
    sample.insts.extend(moe);

    let mut internals = InternalState {
        live: sample.desc.live_internals,
        saved: Vec::new(),
    };
    if internals.live != 0 && info.chunk_mask != info.non_dep_chunk_mask {
        save_internals(env, sample, &mut internals)?;
    }

    for k in chunks(info.non_dep_chunk_mask) {
        let loc = env.input.chunk(sample.id, k).ok_or_else(|| {
            ResourceError::MissingInputData(format!("chunk {} of sample {}", k, sample.id))
        })?;
        sample.chunk_locs[k] = Some(loc);
    }

    let fetch_mask = info.fetch_mask();
    if fetch_mask != 0 {
        let (states, mem_loaded) = load_state(env, sample, fetch_mask)?;
        let coord = coordinates(env, sample)?;
        if mem_loaded {
            emit_wdf(sample, &internals, 0)?;
        }

        for k in chunks(fetch_mask) {
            let regs = info.chunk_regs[k];
            let dest = temps(env, sample, regs)?;
            let state = states[k].ok_or(EmitError::MissingChunkData(k))?;
            sample.insts.push(
                Inst::new(Opcode::Smp)
                    .dest(dest)
                    .srcs(&[coord, state])
                    .mask(info.chunk_lanes[k])
                    .extra(InstExtra::Smp {
                        dim: sample.desc.dim,
                        proj: sample.desc.proj,
                        drc: 0,
                        regs: regs as u8,
                        state_words: target.tex_state_words as u8,
                    })
                    .flags(InstFlags::FETCH),
            );
            sample.chunk_locs[k] = Some(dest);
        }
        emit_wdf(sample, &internals, 0)?;

        if env.texture.format.is_float_depth() {
            let abs = target.special_const(SpecialConst::AbsMask);
            for k in chunks(fetch_mask) {
                let loc = sample.chunk_locs[k].ok_or(EmitError::MissingChunkData(k))?;
                sample.insts.push(
                    Inst::new(Opcode::And)
                        .dest(loc)
                        .srcs(&[loc, abs])
                        .repeat(info.chunk_regs[k] as u8)
                        .flags(InstFlags::FETCH),
                );
            }
            sample.depth_fixed = true;
        }
    }

    let info = match (info.tex_type, info.yuv) {
        (TexType::Yuv, Some(yuv)) => emit_csc(env, sample, &info, &yuv)?,
        _ => info,
    };
    restore_internals(sample, &internals);

    tracing::debug!(
        "sample {}: {} fetch instructions, fetched chunks {:#x}",
        sample.id,
        sample.insts.len(),
        fetch_mask
    );
    sample.chan_info = Some(info);
    Ok(())
}
