//! Shader-wide sample state and code generation driver

use usp_core::{LayoutError, Result, UspError};
use usp_hw::{encode, HwInst, Inst, InstFlags, MoeState, Opcode};

use crate::block::InstBlockManager;
use crate::chunks::{decide_chunks_sampling, ChunkSchedule};
use crate::context::UspContext;
use crate::desc::{SampleDesc, ShaderDesc, ShaderInfo, TextureDesc};
use crate::fetch::{emit_fetch, GenEnv};
use crate::input_data::InputData;
use crate::sample::Sample;
use crate::tex_formats::{decide_final_texture_formats, TexCtrlWords};
use crate::unpack::emit_unpack;

/// All samples of one shader plus the state shared between them
#[derive(Debug, Clone)]
pub struct Shader {
    pub info: ShaderInfo,
    pub textures: Vec<TextureDesc>,
    pub samples: Vec<Sample>,
    /// Texture state table the samples index into
    pub tex_ctrl_words: Vec<TexCtrlWords>,
    /// Data iterated before the shader runs
    pub input_data: InputData,
    pub schedule: Option<ChunkSchedule>,
    /// Highest temporary count of any generated sample, both phases
    pub max_temps: u32,
}

fn encode_all(insts: &[Inst], ctx: &UspContext) -> Result<Vec<(HwInst, Opcode, InstFlags)>> {
    let mut out = Vec::new();
    out.try_reserve(insts.len())?;
    for inst in insts {
        out.push((encode(inst, &ctx.target)?, inst.opcode, inst.flags));
    }
    Ok(out)
}

impl Shader {
    pub fn new(info: ShaderInfo, textures: Vec<TextureDesc>) -> Self {
        Self {
            info,
            textures,
            samples: Vec::new(),
            tex_ctrl_words: Vec::new(),
            input_data: InputData::new(),
            schedule: None,
            max_temps: 0,
        }
    }

    /// Builds a shader from a file description; every sample starts in block 0
    pub fn from_desc(ctx: &UspContext, desc: ShaderDesc) -> Result<Self> {
        let mut shader = Self::new(desc.info, desc.textures);
        for sample in desc.samples {
            shader.add_sample(ctx, sample, MoeState::default())?;
        }
        Ok(shader)
    }

    pub fn add_sample(&mut self, ctx: &UspContext, desc: SampleDesc, moe: MoeState) -> Result<usize> {
        let id = self.samples.len();
        let mut sample = Sample::create(ctx, &self.info, desc, moe).map_err(|e| match e {
            UspError::InvalidSample(_, msg) => UspError::InvalidSample(id, msg),
            e => e,
        })?;
        sample.id = id;
        sample.data_add(ctx, &self.textures)?;
        self.samples.try_reserve(1)?;
        self.samples.push(sample);
        Ok(id)
    }

    pub fn sample(&self, id: usize) -> Result<&Sample> {
        self.samples
            .get(id)
            .ok_or_else(|| UspError::InvalidSample(id, "no such sample".to_string()))
    }

    /// Places the fetch and unpack phases of a sample
    pub fn set_blocks(&mut self, id: usize, fetch: u32, unpack: u32) -> Result<()> {
        let sample = self
            .samples
            .get_mut(id)
            .ok_or_else(|| UspError::InvalidSample(id, "no such sample".to_string()))?;
        sample.block = fetch;
        sample.unpack.block = unpack;
        Ok(())
    }

    /// Generates the code of one sample and appends it to its blocks.
    ///
    /// Everything is emitted and encoded before the first instruction is
    /// handed to `blocks`, so a failing sample leaves the blocks untouched.
    pub fn generate_sample_code(
        &mut self,
        ctx: &UspContext,
        id: usize,
        blocks: &mut dyn InstBlockManager,
    ) -> Result<()> {
        let sample = self
            .samples
            .get_mut(id)
            .ok_or_else(|| UspError::InvalidSample(id, "no such sample".to_string()))?;
        let texture = self
            .textures
            .get(sample.desc.texture)
            .ok_or(LayoutError::UnknownTexture(sample.desc.texture))?;

        sample.reset();
        sample.moe = blocks.moe_state(sample.block);
        sample.data_add(ctx, &self.textures)?;

        let env = GenEnv {
            ctx,
            info: &self.info,
            texture,
            input: &self.input_data,
        };
        emit_fetch(&env, sample)?;
        emit_unpack(&env, sample)?;

        let fetch = encode_all(&sample.insts, ctx)?;
        let unpack = encode_all(&sample.unpack.insts, ctx)?;
        if sample.block == sample.unpack.block {
            blocks.reserve(sample.block, fetch.len() + unpack.len())?;
        } else {
            blocks.reserve(sample.block, fetch.len())?;
            blocks.reserve(sample.unpack.block, unpack.len())?;
        }
        for (hw, opcode, flags) in fetch {
            blocks.insert(sample.block, hw, opcode, flags)?;
        }
        for (hw, opcode, flags) in unpack {
            blocks.insert(sample.unpack.block, hw, opcode, flags)?;
        }

        // The fetch phase reset the MOE state if it was not the default
        blocks.set_moe_after(sample.block, MoeState::default());
        if sample.unpack.block != sample.block {
            blocks.set_moe_after(sample.unpack.block, MoeState::default());
        }

        sample.generated = true;
        // Unpack temporaries are allocated above the fetch ones
        let temps = sample.temps_used + sample.unpack.temps_used;
        self.max_temps = self.max_temps.max(temps);
        tracing::debug!(
            "sample {}: {} fetch and {} unpack instructions, {} temps",
            id,
            sample.insts.len(),
            sample.unpack.insts.len(),
            temps
        );
        Ok(())
    }

    /// Runs the shader-wide passes, then generates every sample
    pub fn compile(
        &mut self,
        ctx: &UspContext,
        blocks: &mut dyn InstBlockManager,
    ) -> Result<ChunkSchedule> {
        decide_final_texture_formats(ctx, self)?;
        let schedule = decide_chunks_sampling(ctx, self)?;
        self.schedule = Some(schedule);
        for id in 0..self.samples.len() {
            self.generate_sample_code(ctx, id, blocks)?;
        }
        Ok(schedule)
    }

    /// Drops every sample; instruction blocks belong to the caller
    pub fn destroy_samples(&mut self) {
        for sample in self.samples.drain(..) {
            sample.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::InstStream;
    use crate::desc::{CoordSource, RegRef};
    use crate::format::TexFormat;
    use usp_core::{Config, CoreKind, EmitError, ResourceError};
    use usp_hw::{DataFmt, RegBank};

    fn dependent(texture: usize, dest_fmt: DataFmt) -> SampleDesc {
        SampleDesc::new(
            texture,
            CoordSource::Register {
                bank: RegBank::Temp,
                num: 0,
            },
            RegRef::new(RegBank::Temp, 4),
            dest_fmt,
        )
    }

    #[test]
    fn test_add_sample_ids() {
        let ctx = UspContext::default();
        let mut shader = Shader::new(ShaderInfo::default(), vec![TextureDesc::new(TexFormat::Rgba8)]);
        assert_eq!(
            shader.add_sample(&ctx, dependent(0, DataFmt::F32), MoeState::default()).unwrap(),
            0
        );
        let err = shader.add_sample(&ctx, dependent(0, DataFmt::F32).mask(0), MoeState::default());
        assert!(matches!(err, Err(UspError::InvalidSample(1, _))));
        assert!(shader.sample(0).unwrap().chan_info.is_some());
    }

    #[test]
    fn test_generate_into_block() {
        let ctx = UspContext::default();
        let mut shader = Shader::new(ShaderInfo::default(), vec![TextureDesc::new(TexFormat::Rgba8)]);
        shader
            .add_sample(&ctx, dependent(0, DataFmt::F32), MoeState::default())
            .unwrap();
        let mut stream = InstStream::new();
        stream.add_block(64, MoeState::default()).unwrap();
        shader.compile(&ctx, &mut stream).unwrap();

        let sample = shader.sample(0).unwrap();
        assert!(sample.generated);
        let block = stream.block(0).unwrap();
        assert_eq!(block.insts.len(), sample.all_insts().count());
        assert!(block.insts.iter().any(|i| i.opcode == Opcode::Smp));
        assert_eq!(block.insts[0].hw.opcode(), block.insts[0].opcode);
    }

    #[test]
    fn test_failed_sample_leaves_block_untouched() {
        let ctx = UspContext::default();
        let mut shader = Shader::new(
            ShaderInfo::default(),
            vec![TextureDesc::new(TexFormat::RgbaU32)],
        );
        shader
            .add_sample(&ctx, dependent(0, DataFmt::F32), MoeState::default())
            .unwrap();
        let mut stream = InstStream::new();
        stream.add_block(64, MoeState::default()).unwrap();
        assert!(matches!(
            shader.compile(&ctx, &mut stream),
            Err(UspError::Emit(EmitError::UnsupportedPack { .. }))
        ));
        assert!(stream.block(0).unwrap().insts.is_empty());
    }

    #[test]
    fn test_full_block() {
        let ctx = UspContext::default();
        let mut shader = Shader::new(ShaderInfo::default(), vec![TextureDesc::new(TexFormat::Rgba8)]);
        shader
            .add_sample(&ctx, dependent(0, DataFmt::F32), MoeState::default())
            .unwrap();
        let mut stream = InstStream::new();
        stream.add_block(1, MoeState::default()).unwrap();
        stream.add_block(64, MoeState::default()).unwrap();
        shader.set_blocks(0, 0, 1).unwrap();
        assert!(matches!(
            shader.compile(&ctx, &mut stream),
            Err(UspError::Resource(ResourceError::BlockFull { block: 0, .. }))
        ));
        assert!(stream.blocks().iter().all(|b| b.insts.is_empty()));
    }

    #[test]
    fn test_destroy_keeps_blocks() {
        let ctx = UspContext::default();
        let desc = ShaderDesc {
            info: ShaderInfo::default(),
            textures: vec![TextureDesc::new(TexFormat::Rgba8)],
            samples: vec![dependent(0, DataFmt::U8), dependent(0, DataFmt::F16)],
        };
        let mut shader = Shader::from_desc(&ctx, desc).unwrap();
        let mut stream = InstStream::new();
        stream.add_block(64, MoeState::default()).unwrap();
        shader.compile(&ctx, &mut stream).unwrap();
        let words = stream.words();

        shader.destroy_samples();
        assert!(shader.samples.is_empty());
        assert_eq!(stream.words(), words);
    }

    #[test]
    fn test_moe_reset_once() {
        let ctx = UspContext::default();
        let mut shader = Shader::new(ShaderInfo::default(), vec![TextureDesc::new(TexFormat::Rgba8)]);
        shader
            .add_sample(&ctx, dependent(0, DataFmt::F32), MoeState::default())
            .unwrap();
        let mut stream = InstStream::new();
        let moe = MoeState {
            incs: [2, 1, 1, 1],
            bases: [0; 4],
        };
        stream.add_block(64, moe).unwrap();
        shader.compile(&ctx, &mut stream).unwrap();
        assert!(shader.sample(0).unwrap().insts[0].flags.contains(InstFlags::MOE));
        assert!(stream.moe_state(0).is_default());
    }

    #[test]
    fn test_max_temps_counts_both_phases() {
        let mut config = Config::default();
        config.target.core = CoreKind::Sgx540;
        let ctx = UspContext::new(config);
        let mut shader = Shader::new(ShaderInfo::default(), vec![TextureDesc::new(TexFormat::Rgba8)]);
        shader
            .add_sample(&ctx, dependent(0, DataFmt::C10), MoeState::default())
            .unwrap();
        let mut stream = InstStream::new();
        stream.add_block(64, MoeState::default()).unwrap();
        shader.compile(&ctx, &mut stream).unwrap();

        let sample = shader.sample(0).unwrap();
        assert!(sample.unpack.temps_used > 0);
        let base = shader.info.temp_base;
        let highest = sample
            .all_insts()
            .flat_map(|i| {
                let mut regs = i.read_regs();
                regs.extend(i.written_slots().iter().map(|s| (s.bank, s.num)));
                regs
            })
            .filter(|&(bank, num)| bank == RegBank::Temp && num >= base)
            .map(|(_, num)| num - base + 1)
            .max()
            .unwrap();
        assert_eq!(shader.max_temps, highest);
        assert_eq!(shader.max_temps, sample.temps_used + sample.unpack.temps_used);
    }
}
