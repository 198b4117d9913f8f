//! Unpack phase of a sample
//!
//! Moves the fetched chunk data into the destination registers, converting
//! each channel to the destination format. Chunks whose layout already
//! matches the destination are redirected so the SMP writes them in place.

use usp_core::{EmitError, Result, UspError};
use usp_hw::{
    chan_slot, DataFmt, Inst, InstExtra, InstFlags, Opcode, Operand, RegBank, SpecialConst,
    TestCond,
};

use crate::chan_info::{ChanSource, ConstVal, TexChanInfo, TexType, MAX_CHUNKS};
use crate::fetch::{alloc_temps, chunk_operand, chunks, GenEnv};
use crate::sample::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Value {
    Const(ConstVal),
    Data(Operand),
}

/// Register and lanes written for one destination channel
type Write = (RegBank, u32, u8);

/// Operand of channel `c` of a vector in `fmt` starting at `base`
fn dest_chan(base: Operand, fmt: DataFmt, c: usize) -> Operand {
    let (reg, _) = chan_slot(fmt, c as u32);
    let comp = match fmt {
        DataFmt::C10 if c == 3 => 0,
        DataFmt::C10 => c,
        f => c % f.chans_per_reg() as usize,
    };
    base.offset(reg).with_fmt(fmt).with_comp(comp as u8)
}

fn src_lanes(src: &Operand) -> u8 {
    chan_slot(src.fmt, src.comp as u32).1
}

/// Register-stepping operands: whole consecutive registers
fn reg_adjacent(a: &Operand, b: &Operand) -> bool {
    a.bank == b.bank && a.fmt == b.fmt && a.comp == 0 && b.comp == 0 && b.num == a.num + 1
}

/// Channel-stepping operands: consecutive channels of one format
fn chan_adjacent(a: &Operand, b: &Operand) -> bool {
    let per_reg = a.fmt.chans_per_reg();
    let linear = |op: &Operand| op.num * per_reg + op.comp as u32;
    a.bank == b.bank && a.fmt == b.fmt && linear(b) == linear(a) + 1
}

/// Integer data read as a normalised value
fn pck_scale(src: &Operand, dst: DataFmt) -> bool {
    src.fmt.is_float() != dst.is_float()
}

fn unsupported(src: DataFmt, dst: DataFmt) -> UspError {
    EmitError::UnsupportedPack {
        src: src.name(),
        dst: dst.name(),
    }
    .into()
}

struct Unpacker<'a> {
    env: &'a GenEnv<'a>,
    dest: Operand,
    /// Temporaries used by the fetch phase
    base: u32,
    insts: Vec<Inst>,
    temps_used: u32,
    merge: bool,
}

impl Unpacker<'_> {
    fn temp(&mut self, n: u32) -> Result<Operand> {
        alloc_temps(self.env, &mut self.temps_used, self.base, n)
    }

    fn special(&self, c: SpecialConst) -> Operand {
        self.env.ctx.target.special_const(c)
    }

    fn float_const(&self, v: ConstVal) -> Operand {
        self.special(match v {
            ConstVal::Zero => SpecialConst::Zero,
            ConstVal::One => SpecialConst::OneF32,
        })
    }

    /// Copies source registers that another channel overwrites before
    /// they are read.
    fn relocate(&mut self, values: &mut [Option<Value>; 4], writes: &[Option<Write>; 4]) -> Result<()> {
        let mut copies: Vec<(RegBank, u32, Operand)> = Vec::new();
        for a in 0..4 {
            let Some(Value::Data(src)) = values[a] else {
                continue;
            };
            let lanes = src_lanes(&src);
            let clobbered = writes.iter().enumerate().any(|(b, w)| {
                b != a
                    && matches!(w, Some((bank, num, l))
                        if *bank == src.bank && *num == src.num && l & lanes != 0)
            });
            if !clobbered {
                continue;
            }
            let copy = match copies.iter().find(|(b, n, _)| *b == src.bank && *n == src.num) {
                Some(&(_, _, t)) => t,
                None => {
                    let t = self.temp(1)?;
                    self.insts.push(
                        Inst::new(Opcode::Mov)
                            .dest(t)
                            .src(0, Operand::new(src.bank, src.num)),
                    );
                    copies.push((src.bank, src.num, t));
                    t
                }
            };
            values[a] = Some(Value::Data(Operand {
                bank: copy.bank,
                num: copy.num,
                ..src
            }));
        }
        if !copies.is_empty() {
            tracing::trace!("relocated {} source registers", copies.len());
        }
        Ok(())
    }

    /// Groups channels with data sources into repeatable runs
    fn runs(
        &self,
        values: &[Option<Value>; 4],
        want: impl Fn(&Operand) -> bool,
        adjacent: fn(&Operand, &Operand) -> bool,
    ) -> Vec<(usize, u8, Operand)> {
        let max_repeat = self.env.ctx.target.max_repeat;
        let mut runs: Vec<(usize, u8, Operand)> = Vec::new();
        let mut last: Option<(usize, Operand)> = None;
        for (c, value) in values.iter().enumerate() {
            let src = match value {
                Some(Value::Data(src)) if want(src) => *src,
                _ => {
                    last = None;
                    continue;
                }
            };
            if let (Some((prev_c, prev)), Some(run)) = (last, runs.last_mut()) {
                if self.merge
                    && prev_c + 1 == c
                    && adjacent(&prev, &src)
                    && (run.1 as u32) < max_repeat
                {
                    run.1 += 1;
                    last = Some((c, src));
                    continue;
                }
            }
            runs.push((c, 1, src));
            last = Some((c, src));
        }
        runs
    }

    fn pck(&mut self, dest: Operand, src: Operand, repeat: u8) {
        let scale = pck_scale(&src, dest.fmt);
        self.insts.push(
            Inst::new(Opcode::Pckunpck)
                .dest(dest)
                .src(0, src)
                .repeat(repeat)
                .extra(InstExtra::Pck { scale }),
        );
    }

    fn unpack_f32(&mut self, values: &[Option<Value>; 4], clear_sign: bool) -> Result<()> {
        let fmt = DataFmt::F32;
        for (c, value) in values.iter().enumerate() {
            match value {
                Some(Value::Const(v)) => {
                    let k = self.float_const(*v);
                    self.insts.push(
                        Inst::new(Opcode::Mov)
                            .dest(dest_chan(self.dest, fmt, c))
                            .src(0, k),
                    );
                }
                Some(Value::Data(src)) if src.fmt.is_integer_dest() => {
                    return Err(unsupported(src.fmt, fmt));
                }
                _ => {}
            }
        }

        let mask = self.special(if clear_sign {
            SpecialConst::AbsMask
        } else {
            SpecialConst::AllOnes
        });
        for (c, n, src) in self.runs(values, |s| s.fmt == DataFmt::F32, reg_adjacent) {
            self.insts.push(
                Inst::new(Opcode::And)
                    .dest(dest_chan(self.dest, fmt, c))
                    .srcs(&[src, mask])
                    .repeat(n),
            );
        }
        for (c, n, src) in self.runs(values, |s| s.fmt != DataFmt::F32, chan_adjacent) {
            self.pck(dest_chan(self.dest, fmt, c), src, n);
        }
        Ok(())
    }

    fn unpack_f16(&mut self, values: &[Option<Value>; 4]) -> Result<()> {
        let fmt = DataFmt::F16;
        let operand = |v: Value| -> Result<Operand> {
            match v {
                Value::Const(k) => Ok(self.float_const(k)),
                Value::Data(src) if src.fmt.is_integer_dest() => Err(unsupported(src.fmt, fmt)),
                Value::Data(src) => Ok(src),
            }
        };
        let mut pairs = Vec::new();
        for r in 0..2 {
            let (a, b) = (2 * r, 2 * r + 1);
            let ops = (
                values[a].map(&operand).transpose()?,
                values[b].map(&operand).transpose()?,
            );
            pairs.push((a, ops));
        }

        for (a, ops) in pairs {
            let dest = dest_chan(self.dest, fmt, a);
            match ops {
                (Some(x), Some(y)) if x.fmt == y.fmt => {
                    // Both halves of the register in one go
                    self.insts.push(
                        Inst::new(Opcode::Pckunpck)
                            .dest(dest)
                            .srcs(&[x, y])
                            .extra(InstExtra::Pck {
                                scale: pck_scale(&x, fmt),
                            }),
                    );
                }
                (x, y) => {
                    if let Some(x) = x {
                        self.pck(dest, x, 1);
                    }
                    if let Some(y) = y {
                        self.pck(dest_chan(self.dest, fmt, a + 1), y, 1);
                    }
                }
            }
        }
        Ok(())
    }

    fn unpack_u8(&mut self, to: Operand, values: &[Option<Value>; 4]) -> Result<()> {
        let fmt = DataFmt::U8;
        let mut masked: Vec<(Operand, u8)> = Vec::new();
        let mut rest = [None; 4];
        for (c, value) in values.iter().enumerate() {
            match value {
                // Already in the right lane, a masked move keeps it there
                Some(Value::Data(src)) if src.fmt == fmt && src.comp as usize == c => {
                    let reg = src.with_comp(0);
                    match masked.iter_mut().find(|(r, _)| r.same_reg(&reg)) {
                        Some((_, mask)) => *mask |= 1 << c,
                        None => masked.push((reg, 1 << c)),
                    }
                }
                Some(Value::Data(src)) if src.fmt.is_integer_dest() => {
                    return Err(unsupported(src.fmt, fmt));
                }
                Some(Value::Const(v)) => {
                    let k = self.float_const(*v);
                    self.pck(dest_chan(to, fmt, c), k, 1);
                }
                v => rest[c] = *v,
            }
        }
        for (src, mask) in masked {
            self.insts.push(
                Inst::new(Opcode::Sopwm)
                    .dest(to.with_fmt(fmt).with_comp(0))
                    .src(0, src)
                    .mask(mask),
            );
        }
        for (c, n, src) in self.runs(&rest, |_| true, chan_adjacent) {
            self.pck(dest_chan(to, fmt, c), src, n);
        }
        Ok(())
    }

    /// C10 has no direct conversion, go through a U8 register
    fn unpack_c10(&mut self, values: &[Option<Value>; 4]) -> Result<()> {
        let staging = self.temp(1)?.with_fmt(DataFmt::U8);
        self.unpack_u8(staging, values)?;

        let mask = (0..4)
            .filter(|c| values[*c].is_some())
            .fold(0u8, |m, c| m | 1 << c);
        self.insts
            .push(Inst::new(Opcode::Setfc).extra(InstExtra::Setfc { c10: true }));
        self.insts.push(
            Inst::new(Opcode::Sopwm)
                .dest(self.dest.with_fmt(DataFmt::C10))
                .src(0, staging.with_fmt(DataFmt::C10))
                .mask(mask),
        );
        self.insts
            .push(Inst::new(Opcode::Setfc).extra(InstExtra::Setfc { c10: false }));
        Ok(())
    }

    fn unpack_integer(&mut self, values: &[Option<Value>; 4], fmt: DataFmt) -> Result<()> {
        for (c, value) in values.iter().enumerate() {
            let dest = dest_chan(self.dest, fmt, c);
            match value {
                Some(Value::Const(ConstVal::Zero)) => {
                    let zero = self.special(SpecialConst::Zero);
                    self.insts.push(Inst::new(Opcode::Mov).dest(dest).src(0, zero));
                }
                Some(Value::Const(ConstVal::One)) => {
                    self.insts
                        .push(Inst::new(Opcode::Limm).dest(dest).src(0, Operand::imm(1)));
                }
                Some(Value::Data(src)) if src.fmt.is_float() => {
                    return Err(unsupported(src.fmt, fmt));
                }
                Some(Value::Data(src)) if src.fmt == DataFmt::S8 || src.fmt == DataFmt::S16 => {
                    let (bit, ext) = if src.fmt == DataFmt::S8 {
                        (SpecialConst::SignBit8, SpecialConst::SignExt8)
                    } else {
                        (SpecialConst::SignBit16, SpecialConst::SignExt16)
                    };
                    self.pck(dest, *src, 1);
                    let (bit, ext) = (self.special(bit), self.special(ext));
                    self.insts.push(
                        Inst::new(Opcode::Test)
                            .dest(Operand::pred(0))
                            .srcs(&[dest, bit])
                            .extra(InstExtra::Test {
                                cond: TestCond::NonZero,
                            }),
                    );
                    self.insts.push(
                        Inst::new(Opcode::Or)
                            .dest(dest)
                            .srcs(&[dest, ext])
                            .pred(0, false),
                    );
                }
                _ => {}
            }
        }

        for (c, n, src) in self.runs(values, |s| s.fmt.bits() == 32, reg_adjacent) {
            self.insts.push(
                Inst::new(Opcode::Mov)
                    .dest(dest_chan(self.dest, fmt, c))
                    .src(0, src)
                    .repeat(n),
            );
        }
        let unsigned = |s: &Operand| s.fmt.bits() < 32 && !s.fmt.is_signed() && !s.fmt.is_float();
        for (c, n, src) in self.runs(values, unsigned, chan_adjacent) {
            self.pck(dest_chan(self.dest, fmt, c), src, n);
        }
        Ok(())
    }
}

/// Moves temporaries above a released range down over it
fn release_temps(env: &GenEnv, sample: &mut Sample, first: u32, count: u32) {
    let end = env.info.temp_base + sample.temps_used;
    let from = first + count;
    if from < end {
        let to = Operand::temp(first);
        for inst in &mut sample.insts {
            inst.rename(RegBank::Temp, from, end - from, to);
        }
        for loc in sample.chunk_locs.iter_mut().flatten() {
            if loc.bank == RegBank::Temp && loc.num >= from && loc.num < end {
                loc.num -= count;
            }
        }
    }
    sample.temps_used -= count;
}

/// Lets the SMP write chunks straight into the destination when the
/// fetched layout already matches it. Returns the channels placed.
fn place_direct(env: &GenEnv, sample: &mut Sample, info: &TexChanInfo) -> u8 {
    let dest = sample.desc.dest;
    let target = &env.ctx.target;
    let bank_ok = match dest.bank {
        RegBank::Temp | RegBank::PrimAttr => true,
        RegBank::Output => target.smp_to_output,
        _ => false,
    };
    if !bank_ok || info.tex_type == TexType::Yuv {
        return 0;
    }

    let temp_area = env.info.temp_base..env.info.temp_base + env.ctx.config.limits.max_sample_temps;
    let mut placed = 0u8;
    for k in chunks(info.fetch_mask()) {
        let Some(loc) = sample.chunk_locs[k] else {
            continue;
        };
        let regs = info.chunk_regs[k];

        let mut delta = None;
        let mut chans = 0u8;
        let mut lanes = [0u8; 4];
        for c in 0..4 {
            let src = info.chans[c];
            let ChanSource::Data { chunk, reg, fmt, .. } = src else {
                continue;
            };
            if !info.is_live(c) || chunk != k || fmt != info.dest_fmt {
                continue;
            }
            let (dreg, dlanes) = info.dest_slot(c);
            let slanes = chan_slot(fmt, src.comp() as u32).1;
            let d = dreg as i64 - reg as i64;
            if dlanes != slanes || *delta.get_or_insert(d) != d {
                continue;
            }
            chans |= 1 << c;
            lanes[reg as usize] |= slanes;
        }
        let Some(delta) = delta else {
            continue;
        };
        let first = dest.num as i64 + delta;
        if first < 0 {
            continue;
        }
        let first = first as u32;
        let range = first..first + regs;

        // Every lane the fetch writes must belong to a placed channel
        let stray = sample
            .insts
            .iter()
            .flat_map(|i| i.written_slots())
            .filter(|s| s.bank == loc.bank && s.num >= loc.num && s.num < loc.num + regs)
            .any(|s| s.lanes & !lanes[(s.num - loc.num) as usize] != 0);
        if stray {
            continue;
        }
        if dest.bank == RegBank::Temp
            && range.start < temp_area.end
            && temp_area.start < range.end
        {
            continue;
        }
        let busy = sample.insts.iter().any(|i| {
            range
                .clone()
                .any(|r| i.reads_reg(dest.bank, r) || i.writes_reg(dest.bank, r))
        });
        // Pre-sampled and already placed chunks are still read by the unpack
        let live_data = (0..MAX_CHUNKS).filter(|&j| j != k).any(|j| {
            sample.chunk_locs[j].is_some_and(|l| {
                l.bank == dest.bank
                    && l.num < range.end
                    && range.start < l.num + info.chunk_regs[j]
            })
        });
        if busy || live_data {
            continue;
        }

        let to = Operand::new(dest.bank, first);
        for inst in &mut sample.insts {
            inst.rename(loc.bank, loc.num, regs, to);
        }
        sample.chunk_locs[k] = Some(to.with_fmt(loc.fmt));
        release_temps(env, sample, loc.num, regs);
        placed |= chans;
        tracing::trace!("sample {}: chunk {} fetched into {}", sample.id, k, to);
    }
    placed
}

/// Emits the unpack phase into `sample.unpack`
pub fn emit_unpack(env: &GenEnv, sample: &mut Sample) -> Result<()> {
    let info = sample.chan_info()?.clone();
    let dest_fmt = info.dest_fmt;
    match dest_fmt {
        DataFmt::C10 if !env.ctx.target.c10 => {
            return Err(EmitError::UnsupportedDestFormat(dest_fmt.name()).into());
        }
        DataFmt::U32 | DataFmt::S32 if sample.desc.non_dependent => {
            return Err(EmitError::NonDependentInteger(dest_fmt.name()).into());
        }
        DataFmt::F32 | DataFmt::F16 | DataFmt::U8 | DataFmt::C10 | DataFmt::U32 | DataFmt::S32 => {}
        _ => return Err(EmitError::UnsupportedDestFormat(dest_fmt.name()).into()),
    }

    let placed = if env.ctx.config.codegen.direct_sampling {
        place_direct(env, sample, &info)
    } else {
        0
    };

    let dest = sample.desc.dest.operand().with_fmt(dest_fmt);
    let mut values = [None; 4];
    let mut writes = [None; 4];
    for c in 0..4 {
        if !info.is_live(c) || placed & (1 << c) != 0 {
            continue;
        }
        values[c] = Some(match info.chans[c] {
            ChanSource::Const(v) => Value::Const(v),
            src @ ChanSource::Data { .. } => Value::Data(chunk_operand(sample, &src)?),
            src => {
                return Err(UspError::Internal(format!(
                    "sample {}: channel {} unresolved ({:?})",
                    sample.id, c, src
                )))
            }
        });
        // C10 results are staged and only written once every source is read
        if dest_fmt != DataFmt::C10 {
            let (reg, lanes) = info.dest_slot(c);
            writes[c] = Some((dest.bank, dest.num + reg, lanes));
        }
    }

    let mut unpacker = Unpacker {
        env,
        dest,
        base: sample.temps_used,
        insts: Vec::new(),
        temps_used: 0,
        merge: env.ctx.config.codegen.merge_unpack,
    };
    unpacker.relocate(&mut values, &writes)?;
    match dest_fmt {
        DataFmt::F32 => {
            let clear_sign = env.texture.format.is_float_depth() && !sample.depth_fixed;
            unpacker.unpack_f32(&values, clear_sign)?
        }
        DataFmt::F16 => unpacker.unpack_f16(&values)?,
        DataFmt::U8 => unpacker.unpack_u8(dest, &values)?,
        DataFmt::C10 => unpacker.unpack_c10(&values)?,
        fmt => unpacker.unpack_integer(&values, fmt)?,
    }

    let mut insts = unpacker.insts;
    for inst in &mut insts {
        inst.flags |= InstFlags::UNPACK;
    }
    tracing::debug!(
        "sample {}: {} unpack instructions, channels {:#x} placed directly",
        sample.id,
        insts.len(),
        placed
    );
    sample.unpack.insts = insts;
    sample.unpack.temps_used = unpacker.temps_used;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::UspContext;
    use crate::desc::{CoordSource, RegRef, SampleDesc, ShaderInfo, TextureDesc};
    use crate::fetch::emit_fetch;
    use crate::format::TexFormat;
    use crate::input_data::{InputData, InputKind};
    use usp_core::{Config, CoreKind};
    use usp_hw::{MoeState, Swizzle};

    fn desc(dest_fmt: DataFmt) -> SampleDesc {
        SampleDesc::new(
            0,
            CoordSource::Register {
                bank: RegBank::Temp,
                num: 0,
            },
            RegRef::new(RegBank::Temp, 4),
            dest_fmt,
        )
    }

    fn generate_with(
        ctx: &UspContext,
        texture: TextureDesc,
        desc: SampleDesc,
        input: &InputData,
    ) -> Result<Sample> {
        let info = ShaderInfo::default();
        let mut sample = Sample::create(ctx, &info, desc, MoeState::default())?;
        sample.data_add(ctx, std::slice::from_ref(&texture))?;
        for k in 0..MAX_CHUNKS {
            sample.decision.ctrl_idx[k] = Some(k);
        }
        let env = GenEnv {
            ctx,
            info: &info,
            texture: &texture,
            input,
        };
        emit_fetch(&env, &mut sample)?;
        emit_unpack(&env, &mut sample)?;
        Ok(sample)
    }

    fn generate(ctx: &UspContext, texture: TexFormat, desc: SampleDesc) -> Result<Sample> {
        generate_with(ctx, TextureDesc::new(texture), desc, &InputData::new())
    }

    fn opcodes(sample: &Sample) -> Vec<Opcode> {
        sample.unpack.insts.iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn test_direct_placement() {
        let ctx = UspContext::default();
        let sample = generate(&ctx, TexFormat::Rgba8, desc(DataFmt::U8)).unwrap();
        assert!(sample.unpack.insts.is_empty());
        let smp = sample.insts.iter().find(|i| i.opcode == Opcode::Smp).unwrap();
        assert_eq!(smp.dest.unwrap().num, 4);
        assert_eq!(sample.temps_used, 0);
    }

    #[test]
    fn test_partial_mask_not_placed() {
        let ctx = UspContext::default();
        // The SMP writes alpha too, which must not reach the destination
        let sample = generate(&ctx, TexFormat::Rgba8, desc(DataFmt::U8).mask(0x7)).unwrap();
        assert_eq!(opcodes(&sample), vec![Opcode::Sopwm]);
        assert_eq!(sample.unpack.insts[0].mask, 0x7);
        assert!(sample.unpack.insts[0].flags.contains(InstFlags::UNPACK));
    }

    #[test]
    fn test_f32_from_u8() {
        let mut config = Config::default();
        config.target.core = CoreKind::Sgx530;
        let ctx = UspContext::new(config);
        let sample = generate(&ctx, TexFormat::Rgba8, desc(DataFmt::F32)).unwrap();
        assert_eq!(opcodes(&sample), vec![Opcode::Pckunpck]);
        let pck = &sample.unpack.insts[0];
        assert_eq!(pck.repeat, 4);
        assert_eq!(pck.extra, InstExtra::Pck { scale: true });

        let mut config = Config::default();
        config.target.core = CoreKind::Sgx530;
        config.codegen.merge_unpack = false;
        let ctx = UspContext::new(config);
        let sample = generate(&ctx, TexFormat::Rgba8, desc(DataFmt::F32)).unwrap();
        assert_eq!(sample.unpack.insts.len(), 4);
    }

    #[test]
    fn test_f32_constants_and_moves() {
        let mut config = Config::default();
        config.codegen.direct_sampling = false;
        let ctx = UspContext::new(config);
        let sample = generate(&ctx, TexFormat::RgF32, desc(DataFmt::F32)).unwrap();
        // Blue and alpha come from the constant bank
        let movs: Vec<_> = sample
            .unpack
            .insts
            .iter()
            .filter(|i| i.opcode == Opcode::Mov)
            .collect();
        assert_eq!(movs.len(), 2);
        assert_eq!(movs[0].srcs[0].unwrap().bank, RegBank::FpConst);
        let ands: Vec<_> = sample
            .unpack
            .insts
            .iter()
            .filter(|i| i.opcode == Opcode::And)
            .collect();
        assert_eq!(ands.len(), 1);
        assert_eq!(ands[0].repeat, 2);
    }

    #[test]
    fn test_f16_pairs() {
        let mut config = Config::default();
        config.target.core = CoreKind::Sgx530;
        let ctx = UspContext::new(config);
        let sample = generate(
            &ctx,
            TexFormat::RgbaF16,
            desc(DataFmt::F16).swizzle([Swizzle::Y, Swizzle::X, Swizzle::Z, Swizzle::W]),
        )
        .unwrap();
        // Blue and alpha land in place, red and green swap through one pack
        assert_eq!(opcodes(&sample), vec![Opcode::Pckunpck]);
        let pck = &sample.unpack.insts[0];
        assert_eq!(pck.srcs[0].unwrap().comp, 1);
        assert_eq!(pck.srcs[1].unwrap().comp, 0);
        let smps: Vec<_> = sample
            .insts
            .iter()
            .filter(|i| i.opcode == Opcode::Smp)
            .collect();
        assert_eq!(smps[1].dest.unwrap().num, 5);
    }

    #[test]
    fn test_integer_sign_extension() {
        let mut config = Config::default();
        config.target.core = CoreKind::Sgx530;
        let ctx = UspContext::new(config);
        let sample = generate(&ctx, TexFormat::Rgba8Snorm, desc(DataFmt::S32).mask(0x1)).unwrap();
        assert_eq!(
            opcodes(&sample),
            vec![Opcode::Pckunpck, Opcode::Test, Opcode::Or]
        );
        assert_eq!(sample.unpack.insts[2].pred.map(|p| p.num), Some(0));
        assert_eq!(
            sample.unpack.insts[1].srcs[1],
            Some(ctx.target.special_const(SpecialConst::SignBit8))
        );
    }

    #[test]
    fn test_integer_rejections() {
        let ctx = UspContext::default();
        assert!(matches!(
            generate(&ctx, TexFormat::RgbaU32, desc(DataFmt::F32)),
            Err(UspError::Emit(EmitError::UnsupportedPack { src: "u32", dst: "f32" }))
        ));
        assert!(matches!(
            generate(&ctx, TexFormat::RgbaF16, desc(DataFmt::U32)),
            Err(UspError::Emit(EmitError::UnsupportedPack { .. }))
        ));
    }

    #[test]
    fn test_non_dependent_integer_rejected() {
        let ctx = UspContext::default();
        let coord = CoordSource::Iterated {
            slot: 0,
            centroid: false,
        };
        let mut input = InputData::new();
        for chunk in 0..4 {
            input.add(InputKind::Chunk { sample: 0, chunk }, 1);
        }
        let mut d = desc(DataFmt::U32).non_dependent();
        d.coord = coord;
        assert!(matches!(
            generate_with(&ctx, TextureDesc::new(TexFormat::RgbaU32), d, &input),
            Err(UspError::Emit(EmitError::NonDependentInteger("u32")))
        ));
    }

    #[test]
    fn test_c10_staging() {
        let mut config = Config::default();
        config.target.core = CoreKind::Sgx540;
        let ctx = UspContext::new(config);
        let sample = generate(&ctx, TexFormat::Rgba8, desc(DataFmt::C10)).unwrap();
        let ops = opcodes(&sample);
        assert_eq!(
            &ops[ops.len() - 3..],
            &[Opcode::Setfc, Opcode::Sopwm, Opcode::Setfc]
        );
        let last = &sample.unpack.insts[ops.len() - 2];
        assert_eq!(last.dest.unwrap().fmt, DataFmt::C10);
        assert_eq!(last.mask, 0xF);

        let ctx = UspContext::default();
        assert!(matches!(
            generate(&ctx, TexFormat::Rgba8, desc(DataFmt::C10)),
            Err(UspError::Emit(EmitError::UnsupportedDestFormat("c10")))
        ));
    }

    #[test]
    fn test_clobbered_source_relocated() {
        let ctx = UspContext::default();
        let mut input = InputData::new();
        input.add(InputKind::Chunk { sample: 0, chunk: 0 }, 1);
        let mut d = SampleDesc::new(
            0,
            CoordSource::Iterated {
                slot: 0,
                centroid: false,
            },
            RegRef::new(RegBank::PrimAttr, 0),
            DataFmt::U8,
        )
        .non_dependent()
        .swizzle([Swizzle::Y, Swizzle::X, Swizzle::Z, Swizzle::W]);
        d.mask = 0xF;
        let sample = generate_with(&ctx, TextureDesc::new(TexFormat::Rgba8), d, &input).unwrap();

        let first = &sample.unpack.insts[0];
        assert_eq!(first.opcode, Opcode::Mov);
        assert_eq!(first.srcs[0].unwrap().bank, RegBank::PrimAttr);
        let copy = first.dest.unwrap();
        let packs: Vec<_> = sample
            .unpack
            .insts
            .iter()
            .filter(|i| i.opcode == Opcode::Pckunpck)
            .collect();
        assert_eq!(packs.len(), 2);
        assert!(packs.iter().all(|p| p.srcs[0].unwrap().same_reg(&copy)));
    }

    #[test]
    fn test_depth_cleared_when_presampled() {
        let ctx = UspContext::default();
        let mut input = InputData::new();
        input.add(InputKind::Chunk { sample: 0, chunk: 0 }, 1);
        let mut d = desc(DataFmt::F32).non_dependent().mask(0x1);
        d.coord = CoordSource::Iterated {
            slot: 0,
            centroid: false,
        };
        let sample =
            generate_with(&ctx, TextureDesc::new(TexFormat::DepthF32), d, &input).unwrap();
        assert!(sample.insts.iter().all(|i| i.opcode != Opcode::Smp));
        let and = &sample.unpack.insts[0];
        assert_eq!(and.opcode, Opcode::And);
        assert_eq!(
            and.srcs[1],
            Some(ctx.target.special_const(SpecialConst::AbsMask))
        );
    }

    #[test]
    fn test_presampled_chunk_not_overwritten() {
        let ctx = UspContext::default();
        let coord = CoordSource::Iterated {
            slot: 0,
            centroid: false,
        };
        let mut input = InputData::new();
        let chunk_pa = input.add(InputKind::Chunk { sample: 0, chunk: 0 }, 1);
        input.add(InputKind::Coord(coord), 2);

        // Red comes from the pre-sampled chunk in pa0, green from an SMP
        // whose destination would otherwise also be pa0
        let d = SampleDesc::new(0, coord, RegRef::new(RegBank::PrimAttr, chunk_pa), DataFmt::F32)
            .non_dependent()
            .swizzle([Swizzle::Y, Swizzle::X, Swizzle::Z, Swizzle::W]);
        let info = ShaderInfo::default();
        let texture = TextureDesc::new(TexFormat::RgF32);
        let mut sample = Sample::create(&ctx, &info, d, MoeState::default()).unwrap();
        sample.non_dep_chunks = 0x1;
        sample.data_add(&ctx, std::slice::from_ref(&texture)).unwrap();
        for k in 0..MAX_CHUNKS {
            sample.decision.ctrl_idx[k] = Some(k);
        }
        let env = GenEnv {
            ctx: &ctx,
            info: &info,
            texture: &texture,
            input: &input,
        };
        emit_fetch(&env, &mut sample).unwrap();
        emit_unpack(&env, &mut sample).unwrap();

        let smp = sample.insts.iter().find(|i| i.opcode == Opcode::Smp).unwrap();
        assert_eq!(smp.dest.unwrap().bank, RegBank::Temp);

        let insts: Vec<_> = sample.all_insts().collect();
        let last_read = insts
            .iter()
            .rposition(|i| i.reads_reg(RegBank::PrimAttr, chunk_pa))
            .unwrap();
        let first_write = insts
            .iter()
            .position(|i| i.writes_reg(RegBank::PrimAttr, chunk_pa))
            .unwrap();
        assert!(first_write > last_read);
    }
}
