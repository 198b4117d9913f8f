//! Texture format and swizzle decisions
//!
//! Runs once per shader before any code is generated. Decides per sample
//! whether the TAG converts the texels during the fetch, per texture whether
//! its swizzle unit can replace the software swizzle, and builds the shared
//! table of texture state words the samples index into.

use usp_core::{LayoutError, Result};
use usp_hw::{DataFmt, Swizzle};

use crate::context::UspContext;
use crate::desc::TextureDesc;
use crate::format::{resolve_swizzle, TexFormat};
use crate::sample::{FormatDecision, Sample};
use crate::shader::Shader;

/// One entry of the texture state table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TexCtrlWords {
    pub texture: usize,
    pub chunk: usize,
    pub words: [u32; 4],
}

impl TexCtrlWords {
    /// Words the target actually reads
    pub fn used_words(&self, ctx: &UspContext) -> &[u32] {
        &self.words[..(ctx.target.tex_state_words as usize).min(4)]
    }
}

fn unpack_code(unpack: Option<DataFmt>) -> u32 {
    match unpack {
        Some(DataFmt::F16) => 1,
        Some(DataFmt::F32) => 2,
        _ => 0,
    }
}

/// Conversion the TAG performs while fetching, if any
pub fn decide_unpacking_format(
    ctx: &UspContext,
    format: TexFormat,
    dest_fmt: DataFmt,
) -> Option<DataFmt> {
    if !ctx.target.tag_conversion {
        return None;
    }
    match dest_fmt {
        DataFmt::F16 | DataFmt::F32 if format.tag_unpack_legal(dest_fmt) => Some(dest_fmt),
        _ => None,
    }
}

/// Do all samples of `set` read their texture the same way?
pub fn is_texture_used_consistently(samples: &[Sample], set: &[usize]) -> bool {
    let Some(&first) = set.first() else {
        return true;
    };
    let first = &samples[first];
    set.iter().all(|&i| {
        samples[i].desc.swizzle == first.desc.swizzle
            && samples[i].decision.unpack == first.decision.unpack
    })
}

/// Hardware swizzle serving every sample of `set`, if one exists and helps
fn choose_swizzle(
    ctx: &UspContext,
    samples: &[Sample],
    texture: &TextureDesc,
    set: &[usize],
) -> Option<[Swizzle; 4]> {
    if set.is_empty() || !is_texture_used_consistently(samples, set) {
        return None;
    }
    let first = &samples[set[0]];
    let base = first.unswizzled_desc(ctx, texture);
    if !base.hw_swizzle_eligible() {
        return None;
    }
    let required = resolve_swizzle(&base, first.desc.swizzle);
    let live = set.iter().fold(0u8, |m, &i| m | samples[i].desc.mask);

    let mut lanes = [None; 4];
    for c in 0..4 {
        if live & (1 << c) != 0 && required[c].chan().is_some() {
            lanes[c] = Some(required[c]);
        }
    }
    let identity = lanes
        .iter()
        .zip(Swizzle::IDENTITY.iter())
        .all(|(l, id)| l.map_or(true, |l| l == *id));
    if identity {
        return None;
    }
    ctx.target.find_hw_swizzle(lanes).map(|(pattern, _)| pattern)
}

/// One hardware swizzle for every sample of the texture, or none at all.
/// Dependent samples are considered first; non-dependent ones must agree
/// with them, otherwise the whole texture falls back to software.
fn decide_texture_swizzle(ctx: &UspContext, shader: &mut Shader, texture: usize) {
    let (mut users, non_dependent): (Vec<usize>, Vec<usize>) = shader
        .samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.desc.texture == texture)
        .map(|(i, _)| i)
        .partition(|&i| !shader.samples[i].desc.non_dependent);
    users.extend(non_dependent);

    let chosen = if is_texture_used_consistently(&shader.samples, &users) {
        choose_swizzle(ctx, &shader.samples, &shader.textures[texture], &users)
    } else {
        tracing::trace!("texture {}: samples disagree, software swizzle", texture);
        None
    };
    for &i in &users {
        shader.samples[i].decision.hw_swizzle = chosen;
    }
}

fn state_words(
    ctx: &UspContext,
    index: usize,
    texture: &TextureDesc,
    decision: &FormatDecision,
    chunk: usize,
) -> TexCtrlWords {
    let swizzle = decision.hw_swizzle.and_then(|s| ctx.target.hw_swizzle_code(s));
    let word0 = texture.format.hw_code() as u32
        | unpack_code(decision.unpack) << 8
        | (swizzle.unwrap_or(0) as u32) << 12
        | (swizzle.is_some() as u32) << 16;
    let word1 = (index as u32) << 8 | chunk as u32;
    let word2 = (texture.width.saturating_sub(1) & 0xFFFF)
        | (texture.height.saturating_sub(1) & 0xFFFF) << 16;
    let word3 = texture.colorspace.coeff_set(0) as u32 | texture.depth.saturating_sub(1) << 8;
    TexCtrlWords {
        texture: index,
        chunk,
        words: [word0, word1, word2, word3],
    }
}

/// Decides conversion and swizzle for every sample and fills the texture
/// state table. Samples are laid out again with the decisions applied.
pub fn decide_final_texture_formats(ctx: &UspContext, shader: &mut Shader) -> Result<()> {
    for sample in &mut shader.samples {
        let texture = shader
            .textures
            .get(sample.desc.texture)
            .ok_or(LayoutError::UnknownTexture(sample.desc.texture))?;
        sample.decision = FormatDecision {
            unpack: decide_unpacking_format(ctx, texture.format, sample.desc.dest_fmt),
            ..FormatDecision::default()
        };
    }

    if ctx.target.hw_swizzle {
        for texture in 0..shader.textures.len() {
            decide_texture_swizzle(ctx, shader, texture);
        }
    }

    shader.tex_ctrl_words.clear();
    for sample in &mut shader.samples {
        sample.data_add(ctx, &shader.textures)?;
        let index = sample.desc.texture;
        let texture = &shader.textures[index];
        let chunk_mask = sample.chan_info()?.chunk_mask;
        let num_chunks = sample.fetched_desc(ctx, texture).num_chunks;
        for k in 0..num_chunks {
            if chunk_mask & (1 << k) == 0 {
                continue;
            }
            let entry = state_words(ctx, index, texture, &sample.decision, k);
            let idx = match shader.tex_ctrl_words.iter().position(|e| *e == entry) {
                Some(idx) => idx,
                None => {
                    shader.tex_ctrl_words.push(entry);
                    shader.tex_ctrl_words.len() - 1
                }
            };
            sample.decision.ctrl_idx[k] = Some(idx);
        }
    }

    tracing::debug!(
        "{} texture state entries for {} samples",
        shader.tex_ctrl_words.len(),
        shader.samples.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{CoordSource, RegRef, SampleDesc, ShaderInfo};
    use usp_core::{Config, CoreKind};
    use usp_hw::{MoeState, RegBank};

    fn sample(texture: usize, dest_fmt: DataFmt) -> SampleDesc {
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

    fn shader(ctx: &UspContext, textures: Vec<TextureDesc>, samples: Vec<SampleDesc>) -> Shader {
        let mut shader = Shader::new(ShaderInfo::default(), textures);
        for desc in samples {
            shader.add_sample(ctx, desc, MoeState::default()).unwrap();
        }
        shader
    }

    #[test]
    fn test_tag_conversion() {
        let ctx = UspContext::default();
        assert_eq!(
            decide_unpacking_format(&ctx, TexFormat::Rgba8, DataFmt::F32),
            Some(DataFmt::F32)
        );
        assert_eq!(decide_unpacking_format(&ctx, TexFormat::Rgba8, DataFmt::U8), None);
        assert_eq!(decide_unpacking_format(&ctx, TexFormat::RgbaF32, DataFmt::F32), None);

        let mut config = Config::default();
        config.target.core = CoreKind::Sgx530;
        let ctx = UspContext::new(config);
        assert_eq!(decide_unpacking_format(&ctx, TexFormat::Rgba8, DataFmt::F32), None);
    }

    #[test]
    fn test_state_table_shared() {
        let ctx = UspContext::default();
        let mut shader = shader(
            &ctx,
            vec![TextureDesc::new(TexFormat::Rgba16), TextureDesc::new(TexFormat::Rgba8)],
            vec![
                sample(0, DataFmt::U8),
                sample(0, DataFmt::U8).mask(0x3),
                sample(1, DataFmt::U8),
            ],
        );
        decide_final_texture_formats(&ctx, &mut shader).unwrap();
        // Both chunks of texture 0, one of texture 1
        assert_eq!(shader.tex_ctrl_words.len(), 3);
        assert_eq!(shader.samples[0].decision.ctrl_idx[..2], [Some(0), Some(1)]);
        assert_eq!(shader.samples[1].decision.ctrl_idx[0], Some(0));
        assert_eq!(shader.samples[1].decision.ctrl_idx[1], None);
        assert_eq!(shader.samples[2].decision.ctrl_idx[0], Some(2));
        assert_eq!(shader.tex_ctrl_words[2].used_words(&ctx).len(), 4);
    }

    #[test]
    fn test_hw_swizzle_for_consistent_texture() {
        let ctx = UspContext::default();
        let mut shader = shader(
            &ctx,
            vec![TextureDesc::new(TexFormat::Bgra8)],
            vec![sample(0, DataFmt::U8), sample(0, DataFmt::U8).mask(0x1)],
        );
        decide_final_texture_formats(&ctx, &mut shader).unwrap();
        let swz = [Swizzle::Z, Swizzle::Y, Swizzle::X, Swizzle::W];
        assert!(shader.samples.iter().all(|s| s.decision.hw_swizzle == Some(swz)));
        assert_eq!(shader.tex_ctrl_words[0].words[0] >> 16 & 1, 1);
    }

    #[test]
    fn test_conflicting_swizzles_use_software() {
        let ctx = UspContext::default();
        let mut shader = shader(
            &ctx,
            vec![TextureDesc::new(TexFormat::Bgra8)],
            vec![
                sample(0, DataFmt::U8),
                sample(0, DataFmt::U8).swizzle([Swizzle::W, Swizzle::Z, Swizzle::Y, Swizzle::X]),
            ],
        );
        assert!(!is_texture_used_consistently(&shader.samples, &[0, 1]));
        decide_final_texture_formats(&ctx, &mut shader).unwrap();
        assert!(shader.samples.iter().all(|s| s.decision.hw_swizzle.is_none()));
    }

    #[test]
    fn test_non_dependent_follows_dependent() {
        let ctx = UspContext::default();
        let mut nd = sample(0, DataFmt::U8).non_dependent();
        nd.coord = CoordSource::Iterated {
            slot: 0,
            centroid: false,
        };
        nd.dest = RegRef::new(RegBank::Temp, 8);
        let mut shader = shader(
            &ctx,
            vec![TextureDesc::new(TexFormat::Bgra8)],
            vec![sample(0, DataFmt::U8), nd],
        );
        decide_final_texture_formats(&ctx, &mut shader).unwrap();
        assert!(shader.samples[0].decision.hw_swizzle.is_some());
        assert_eq!(
            shader.samples[1].decision.hw_swizzle,
            shader.samples[0].decision.hw_swizzle
        );
        assert_eq!(shader.tex_ctrl_words.len(), 1);
    }

    #[test]
    fn test_non_dependent_disagreement_disables_hw_swizzle() {
        let ctx = UspContext::default();
        let mut nd = sample(0, DataFmt::U8)
            .non_dependent()
            .swizzle([Swizzle::X, Swizzle::X, Swizzle::X, Swizzle::X]);
        nd.coord = CoordSource::Iterated {
            slot: 0,
            centroid: false,
        };
        nd.dest = RegRef::new(RegBank::Temp, 8);
        let mut shader = shader(
            &ctx,
            vec![TextureDesc::new(TexFormat::Bgra8)],
            vec![sample(0, DataFmt::U8), nd],
        );
        assert!(!is_texture_used_consistently(&shader.samples, &[0, 1]));
        decide_final_texture_formats(&ctx, &mut shader).unwrap();
        assert!(shader.samples.iter().all(|s| s.decision.hw_swizzle.is_none()));
        // Both samples read the texture through the same state entry
        assert_eq!(shader.tex_ctrl_words.len(), 1);
        assert_eq!(shader.tex_ctrl_words[0].words[0] >> 16 & 1, 0);
    }

    #[test]
    fn test_identity_needs_no_hw_swizzle() {
        let ctx = UspContext::default();
        let mut shader = shader(
            &ctx,
            vec![TextureDesc::new(TexFormat::Rgba8)],
            vec![sample(0, DataFmt::U8)],
        );
        decide_final_texture_formats(&ctx, &mut shader).unwrap();
        assert_eq!(shader.samples[0].decision.hw_swizzle, None);
    }
}
