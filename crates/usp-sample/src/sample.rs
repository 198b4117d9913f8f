//! Sample and unpack containers

use usp_core::{ResourceError, Result, UspError};
use usp_hw::{DataFmt, Inst, MoeState, Operand, Swizzle};

use crate::chan_info::{self, TexChanInfo, MAX_CHUNKS};
use crate::context::UspContext;
use crate::desc::{SampleDesc, ShaderInfo, TextureDesc};
use crate::format::{resolve_swizzle, TexFormatDesc};

/// Instructions reserved up front for one sample
const INITIAL_INSTS: usize = 32;

/// Texture format pass results for one sample
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatDecision {
    /// Format the TAG unpacks to during the fetch
    pub unpack: Option<DataFmt>,
    /// Swizzle applied by the TAG swizzle unit
    pub hw_swizzle: Option<[Swizzle; 4]>,
    /// Texture state table entry per chunk
    pub ctrl_idx: [Option<usize>; MAX_CHUNKS],
}

/// Unpack phase of a sample
#[derive(Debug, Clone, Default)]
pub struct SampleUnpack {
    pub insts: Vec<Inst>,
    pub temps_used: u32,
    pub block: u32,
}

/// One texture sample of a shader
#[derive(Debug, Clone)]
pub struct Sample {
    pub id: usize,
    pub desc: SampleDesc,
    /// MOE state the code was generated for
    pub moe: MoeState,
    pub block: u32,
    pub chan_info: Option<TexChanInfo>,
    pub decision: FormatDecision,
    /// Chunks the scheduler left to the iterators
    pub non_dep_chunks: u8,
    pub insts: Vec<Inst>,
    pub temps_used: u32,
    /// Registers holding each chunk after the fetch phase
    pub chunk_locs: [Option<Operand>; MAX_CHUNKS],
    /// Sign bit of fetched depth data already cleared
    pub depth_fixed: bool,
    pub generated: bool,
    pub unpack: SampleUnpack,
}

impl Sample {
    pub fn create(
        ctx: &UspContext,
        info: &ShaderInfo,
        desc: SampleDesc,
        moe: MoeState,
    ) -> Result<Self> {
        desc.validate().map_err(|e| UspError::InvalidSample(0, e))?;

        let available = ctx.target.num_temps.saturating_sub(info.temp_base);
        if available < ctx.config.limits.max_sample_temps {
            return Err(ResourceError::Temps {
                needed: ctx.config.limits.max_sample_temps,
                available,
            }
            .into());
        }

        let mut insts = Vec::new();
        insts.try_reserve(INITIAL_INSTS)?;
        let mut unpack_insts = Vec::new();
        unpack_insts.try_reserve(INITIAL_INSTS)?;

        let non_dep_chunks = if desc.non_dependent { 0xF } else { 0 };
        Ok(Self {
            id: 0,
            desc,
            moe,
            block: 0,
            chan_info: None,
            decision: FormatDecision::default(),
            non_dep_chunks,
            insts,
            temps_used: 0,
            chunk_locs: [None; MAX_CHUNKS],
            depth_fixed: false,
            generated: false,
            unpack: SampleUnpack {
                insts: unpack_insts,
                temps_used: 0,
                block: 0,
            },
        })
    }

    /// Clears everything produced by a previous generation
    pub fn reset(&mut self) {
        self.insts.clear();
        self.temps_used = 0;
        self.chunk_locs = [None; MAX_CHUNKS];
        self.depth_fixed = false;
        self.generated = false;
        self.unpack.insts.clear();
        self.unpack.temps_used = 0;
    }

    /// Description of the fetched data before any TAG swizzle
    pub(crate) fn unswizzled_desc(&self, ctx: &UspContext, texture: &TextureDesc) -> TexFormatDesc {
        let format = texture.format;
        self.decision
            .unpack
            .and_then(|to| format.tag_desc(to, ctx.target.tag_replicates_luminance))
            .unwrap_or_else(|| format.desc())
    }

    /// Description of the data the fetch returns, after TAG conversion and swizzle
    pub fn fetched_desc(&self, ctx: &UspContext, texture: &TextureDesc) -> TexFormatDesc {
        let base = self.unswizzled_desc(ctx, texture);
        match self.decision.hw_swizzle {
            Some(s) => base.with_hw_swizzle(s).unwrap_or(base),
            None => base,
        }
    }

    /// Physical channel or constant feeding each destination channel
    pub fn resolved_swizzle(&self, ctx: &UspContext, texture: &TextureDesc) -> [Swizzle; 4] {
        let base = self.unswizzled_desc(ctx, texture);
        let required = resolve_swizzle(&base, self.desc.swizzle);
        match self.decision.hw_swizzle {
            // Lane c of the swizzled data already holds what channel c needs
            Some(_) if base.hw_swizzle_eligible() => {
                let mut resolved = Swizzle::IDENTITY;
                for (c, r) in resolved.iter_mut().enumerate() {
                    if required[c].chan().is_none() {
                        *r = required[c];
                    }
                }
                resolved
            }
            _ => required,
        }
    }

    /// Computes and stores the channel layout
    pub fn data_add(&mut self, ctx: &UspContext, textures: &[TextureDesc]) -> Result<()> {
        let texture = textures
            .get(self.desc.texture)
            .ok_or(usp_core::LayoutError::UnknownTexture(self.desc.texture))?;
        let desc = self.fetched_desc(ctx, texture);
        let resolved = self.resolved_swizzle(ctx, texture);
        let mut info = chan_info::compute(&desc, self.desc.mask, resolved, self.desc.dest_fmt)?;
        if self.desc.non_dependent {
            info.non_dep_chunk_mask = info.chunk_mask & self.non_dep_chunks;
        }
        self.chan_info = Some(info);
        Ok(())
    }

    pub fn chan_info(&self) -> Result<&TexChanInfo> {
        self.chan_info
            .as_ref()
            .ok_or_else(|| UspError::InvalidSample(self.id, "no channel layout".to_string()))
    }

    /// Releases the sample; its instruction blocks belong to the caller
    pub fn destroy(self) {
        tracing::trace!("destroying sample {}", self.id);
    }

    /// Instructions of both phases
    pub fn all_insts(&self) -> impl Iterator<Item = &Inst> {
        self.insts.iter().chain(self.unpack.insts.iter())
    }
}
