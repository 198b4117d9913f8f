//! Properties every generated shader has to satisfy

use std::collections::BTreeMap;

use usp_core::{Config, CoreKind};
use usp_hw::{chan_slot, DataFmt, Inst, MoeState, RegBank, Swizzle};
use usp_sample::{
    decide_final_texture_formats, CoordSource, InputKind, InstStream, RegRef, Sample, SampleDesc,
    SchedulePhase, Shader, ShaderInfo, TexFormat, TextureDesc, UspContext,
};

fn computed() -> CoordSource {
    CoordSource::Register {
        bank: RegBank::Temp,
        num: 0,
    }
}

fn iterated(slot: u32) -> CoordSource {
    CoordSource::Iterated {
        slot,
        centroid: false,
    }
}

fn ctx_for(core: CoreKind) -> UspContext {
    let mut config = Config::default();
    config.target.core = core;
    UspContext::new(config)
}

fn stream() -> InstStream {
    let mut stream = InstStream::new();
    stream.add_block(1024, MoeState::default()).unwrap();
    stream
}

/// Lanes written inside the destination registers, by register offset
fn dest_coverage(sample: &Sample) -> BTreeMap<u32, u8> {
    let dest = sample.desc.dest;
    let span = sample.desc.dest_fmt.regs_for_vec4();
    let mut written = BTreeMap::new();
    for inst in sample.all_insts() {
        for slot in inst.written_slots() {
            if slot.bank == dest.bank && slot.num >= dest.num && slot.num < dest.num + span {
                *written.entry(slot.num - dest.num).or_insert(0u8) |= slot.lanes;
            }
        }
    }
    written
}

fn requested(sample: &Sample) -> BTreeMap<u32, u8> {
    let mut lanes = BTreeMap::new();
    for c in (0..4).filter(|c| sample.desc.mask & (1 << c) != 0) {
        let (reg, l) = chan_slot(sample.desc.dest_fmt, c);
        *lanes.entry(reg).or_insert(0u8) |= l;
    }
    lanes
}

/// Is the register written before its last read?
fn overwritten_while_live(insts: &[&Inst], bank: RegBank, num: u32) -> bool {
    let last_read = insts.iter().rposition(|i| i.reads_reg(bank, num));
    let first_write = insts.iter().position(|i| i.writes_reg(bank, num));
    matches!((first_write, last_read), (Some(w), Some(r)) if w < r)
}

fn single(ctx: &UspContext, format: TexFormat, desc: SampleDesc) -> Shader {
    let mut shader = Shader::new(ShaderInfo::default(), vec![TextureDesc::new(format)]);
    shader.add_sample(ctx, desc, MoeState::default()).unwrap();
    shader.compile(ctx, &mut stream()).unwrap();
    shader
}

fn dependent(dest_fmt: DataFmt) -> SampleDesc {
    SampleDesc::new(0, computed(), RegRef::new(RegBank::Temp, 4), dest_fmt)
}

#[test]
fn destination_coverage_is_exact() {
    let cases = [
        (CoreKind::Sgx543, TexFormat::Rgba8, dependent(DataFmt::U8)),
        (CoreKind::Sgx543, TexFormat::Rgba8, dependent(DataFmt::U8).mask(0x7)),
        (CoreKind::Sgx530, TexFormat::Rgba8, dependent(DataFmt::F32)),
        (CoreKind::Sgx530, TexFormat::Rgba8, dependent(DataFmt::F32).mask(0xA)),
        (CoreKind::Sgx543, TexFormat::RgF32, dependent(DataFmt::F32)),
        (CoreKind::Sgx543, TexFormat::RgbaF32, dependent(DataFmt::F32)),
        (
            CoreKind::Sgx530,
            TexFormat::RgbaF16,
            dependent(DataFmt::F16).swizzle([Swizzle::Y, Swizzle::X, Swizzle::Z, Swizzle::W]),
        ),
        (CoreKind::Sgx543, TexFormat::IF16, dependent(DataFmt::F16).mask(0x1)),
        (CoreKind::Sgx543, TexFormat::Rgba16, dependent(DataFmt::F32)),
        (CoreKind::Sgx543, TexFormat::Yuv420TwoPlaneUv, dependent(DataFmt::U8).mask(0x7)),
    ];
    for (core, format, desc) in cases {
        let ctx = ctx_for(core);
        let shader = single(&ctx, format, desc);
        let sample = shader.sample(0).unwrap();
        assert_eq!(
            dest_coverage(sample),
            requested(sample),
            "{:?} to {:?} on {:?}",
            format,
            sample.desc.dest_fmt,
            core
        );
    }
}

#[test]
fn matching_formats_need_no_unpack() {
    let ctx = UspContext::default();
    for (format, dest_fmt) in [
        (TexFormat::RgbaF32, DataFmt::F32),
        (TexFormat::Rgba8, DataFmt::U8),
        (TexFormat::RgbaF16, DataFmt::F16),
    ] {
        let shader = single(&ctx, format, dependent(dest_fmt));
        assert!(
            shader.sample(0).unwrap().unpack.insts.is_empty(),
            "{:?}",
            format
        );
    }
}

#[test]
fn reset_regenerates_identical_code() {
    let ctx = UspContext::default();
    let texture = TextureDesc::new(TexFormat::Rgba16).size(64, 16).unnormalised();
    let mut shader = Shader::new(ShaderInfo::default(), vec![texture]);
    shader
        .add_sample(&ctx, dependent(DataFmt::U8).mask(0xB), MoeState::default())
        .unwrap();

    let mut first = stream();
    shader.compile(&ctx, &mut first).unwrap();
    let mut second = stream();
    shader.generate_sample_code(&ctx, 0, &mut second).unwrap();

    assert!(!first.words().is_empty());
    assert_eq!(first.words(), second.words());
}

#[test]
fn schedule_stays_within_budget() {
    let mut config = Config::default();
    config.limits.reserved_pa_regs = 64;
    let ctx = UspContext::new(config);
    let info = ShaderInfo {
        iterated_attrs: vec![4, 4],
        ..ShaderInfo::default()
    };
    let textures = vec![
        TextureDesc::new(TexFormat::RgbaF32),
        TextureDesc::new(TexFormat::Rgba8),
    ];
    let mut shader = Shader::new(info, textures);
    for slot in 0..20 {
        let texture = (slot % 2) as usize;
        let dest_fmt = if texture == 0 { DataFmt::F32 } else { DataFmt::U8 };
        let desc = SampleDesc::new(texture, iterated(slot), RegRef::new(RegBank::Temp, 0), dest_fmt)
            .non_dependent();
        shader.add_sample(&ctx, desc, MoeState::default()).unwrap();
    }
    let schedule = shader.compile(&ctx, &mut stream()).unwrap();

    assert_eq!(schedule.phase, SchedulePhase::Greedy);
    assert!(schedule.slots_used <= ctx.target.max_iterators);
    assert!(schedule.pa_used <= ctx.pa_budget());
    assert_eq!(schedule.slots_used, shader.input_data.slots_used());

    // Every sample can reach either its coordinates or all of its data
    for sample in &shader.samples {
        let info = sample.chan_info().unwrap();
        let presampled = (0..4)
            .filter(|k| shader.input_data.chunk(sample.id, *k).is_some())
            .fold(0u8, |m, k| m | 1 << k);
        let complete = presampled & info.chunk_mask == info.chunk_mask;
        assert!(complete || shader.input_data.coord(&sample.desc.coord).is_some());
        assert!(sample.generated);
    }
}

#[test]
fn inconsistent_texture_uses_software_swizzle() {
    let ctx = UspContext::default();
    let mut shader = Shader::new(ShaderInfo::default(), vec![TextureDesc::new(TexFormat::Bgra8)]);
    shader
        .add_sample(&ctx, dependent(DataFmt::U8), MoeState::default())
        .unwrap();
    let mut other = dependent(DataFmt::U8).swizzle([Swizzle::X, Swizzle::X, Swizzle::X, Swizzle::X]);
    other.dest = RegRef::new(RegBank::Temp, 8);
    shader.add_sample(&ctx, other, MoeState::default()).unwrap();
    shader.compile(&ctx, &mut stream()).unwrap();
    assert!(shader.samples.iter().all(|s| s.decision.hw_swizzle.is_none()));

    // The same texture read the same way twice takes the hardware swizzle
    let mut shader = Shader::new(ShaderInfo::default(), vec![TextureDesc::new(TexFormat::Bgra8)]);
    for dest in [4, 8] {
        let mut desc = dependent(DataFmt::U8);
        desc.dest = RegRef::new(RegBank::Temp, dest);
        shader.add_sample(&ctx, desc, MoeState::default()).unwrap();
    }
    shader.compile(&ctx, &mut stream()).unwrap();
    assert!(shader.samples.iter().all(|s| s.decision.hw_swizzle.is_some()));
    assert!(shader.samples.iter().all(|s| s.unpack.insts.is_empty()));
}

#[test]
fn presampled_chunks_survive_until_read() {
    let ctx = UspContext::default();
    let cases = [
        (TexFormat::RgF32, 0x1u8, [Swizzle::Y, Swizzle::X, Swizzle::Z, Swizzle::W]),
        (TexFormat::RgbaF32, 0x5, [Swizzle::Y, Swizzle::Z, Swizzle::W, Swizzle::X]),
    ];
    for (format, presampled, swizzle) in cases {
        let mut shader = Shader::new(ShaderInfo::default(), vec![TextureDesc::new(format)]);
        let desc = SampleDesc::new(0, iterated(0), RegRef::new(RegBank::PrimAttr, 0), DataFmt::F32)
            .non_dependent()
            .swizzle(swizzle);
        shader.add_sample(&ctx, desc, MoeState::default()).unwrap();
        decide_final_texture_formats(&ctx, &mut shader).unwrap();

        // Part of the chunks arrive from the iterators, from pa0 upwards,
        // right where the destination lives
        let mut chunk_pas = Vec::new();
        for k in (0..4).filter(|k| presampled & (1 << k) != 0) {
            chunk_pas.push(shader.input_data.add(InputKind::Chunk { sample: 0, chunk: k }, 1));
        }
        shader.input_data.add(InputKind::Coord(iterated(0)), 2);
        shader.samples[0].non_dep_chunks = presampled;
        shader.generate_sample_code(&ctx, 0, &mut stream()).unwrap();

        let sample = shader.sample(0).unwrap();
        let insts: Vec<_> = sample.all_insts().collect();
        for pa in chunk_pas {
            assert!(insts.iter().any(|i| i.reads_reg(RegBank::PrimAttr, pa)));
            assert!(
                !overwritten_while_live(&insts, RegBank::PrimAttr, pa),
                "{:?}: pa{} overwritten before it is read",
                format,
                pa
            );
        }
        assert_eq!(dest_coverage(sample), requested(sample), "{:?}", format);
    }
}
