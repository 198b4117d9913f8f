//! Texture channel layout calculation
//!
//! Maps every live destination channel of a sample onto the fetched chunk
//! data (or a constant) and works out which chunks have to be fetched.

use usp_core::LayoutError;
use usp_hw::{chan_slot, DataFmt, Swizzle};

use crate::format::{ChanContent, TexFormatDesc};

/// Maximum number of chunks a texture can be split into
pub const MAX_CHUNKS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexType {
    Normal,
    /// Needs colour space conversion after the fetch
    Yuv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstVal {
    Zero,
    One,
}

/// Where a destination channel gets its value from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChanSource {
    Unused,
    Const(ConstVal),
    Data {
        chunk: usize,
        /// Register within the chunk
        reg: u32,
        /// Bit offset within the register
        bit: u32,
        fmt: DataFmt,
    },
    /// R, G or B output of the YUV conversion
    Csc { rgb: u8 },
}

impl ChanSource {
    /// Channel index of the data inside its register, in `fmt` units
    pub fn comp(&self) -> u8 {
        match *self {
            ChanSource::Data { bit, fmt, .. } => (bit / fmt.bits().max(8)) as u8,
            _ => 0,
        }
    }
}

/// Per-sample layout of the texture data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TexChanInfo {
    pub tex_type: TexType,
    /// Chunks that have to be fetched
    pub chunk_mask: u8,
    /// Chunks already delivered by the iterators
    pub non_dep_chunk_mask: u8,
    pub chunk_regs: [u32; MAX_CHUNKS],
    /// Lanes written in the last register of each chunk
    pub chunk_lanes: [u8; MAX_CHUNKS],
    pub chans: [ChanSource; 4],
    pub dest_fmt: DataFmt,
    pub mask: u8,
    /// Y, U and V locations of a YUV texture
    pub yuv: Option<[ChanSource; 3]>,
}

type ChanLoc = (usize, u32, u32);

/// Locates every physical channel inside the chunks
fn locate_channels(desc: &TexFormatDesc) -> Result<[Option<ChanLoc>; 4], LayoutError> {
    if desc.num_chunks == 0 || desc.num_chunks > MAX_CHUNKS {
        return Err(LayoutError::TooManyChunks(desc.num_chunks));
    }
    let mut starts = [0u32; MAX_CHUNKS + 1];
    for k in 0..desc.num_chunks {
        starts[k + 1] = starts[k] + desc.chunk_bytes[k] as u32 * 8;
    }
    let chunk_bits = starts[desc.num_chunks];
    let chan_bits: u32 = (0..4).map(|p| desc.chan_bits(p)).sum();
    if chan_bits != chunk_bits {
        return Err(LayoutError::ChunkPartition {
            chan_bits,
            chunk_bits,
        });
    }

    let mut locs = [None; 4];
    let mut offset = 0;
    let mut chunk = 0;
    for (p, loc) in locs.iter_mut().enumerate() {
        let bits = desc.chan_bits(p);
        if bits == 0 {
            continue;
        }
        while offset >= starts[chunk + 1] {
            chunk += 1;
        }
        if offset + bits > starts[chunk + 1] {
            return Err(LayoutError::ChannelSpansChunk { chan: p });
        }
        let rel = offset - starts[chunk];
        let (reg, bit) = (rel / 32, rel % 32);
        if bit + bits > 32 {
            return Err(LayoutError::ChannelSpansRegister { chan: p });
        }
        *loc = Some((chunk, reg, bit));
        offset += bits;
    }
    Ok(locs)
}

fn yuv_locations(
    desc: &TexFormatDesc,
    locs: &[Option<ChanLoc>; 4],
) -> Result<Option<[ChanSource; 3]>, LayoutError> {
    if !desc.is_yuv() {
        return Ok(None);
    }
    let mut yuv = [ChanSource::Unused; 3];
    for (slot, want) in [ChanContent::Y, ChanContent::U, ChanContent::V].iter().enumerate() {
        let mut found = desc.content.iter().enumerate().filter(|(_, c)| *c == want);
        let (p, _) = found.next().ok_or(LayoutError::InvalidYuvLayout)?;
        if found.next().is_some() || desc.fmt[p] != DataFmt::U8 {
            return Err(LayoutError::InvalidYuvLayout);
        }
        let (chunk, reg, bit) = locs[p].ok_or(LayoutError::InvalidYuvLayout)?;
        yuv[slot] = ChanSource::Data {
            chunk,
            reg,
            bit,
            fmt: DataFmt::U8,
        };
    }
    Ok(Some(yuv))
}

/// Computes the layout of a sample.
///
/// `resolved` gives, per destination channel, the physical channel or the
/// constant that feeds it (shader and format swizzles already combined).
pub fn compute(
    desc: &TexFormatDesc,
    mask: u8,
    resolved: [Swizzle; 4],
    dest_fmt: DataFmt,
) -> Result<TexChanInfo, LayoutError> {
    let locs = locate_channels(desc)?;
    let yuv = yuv_locations(desc, &locs)?;

    let mut info = TexChanInfo {
        tex_type: if yuv.is_some() {
            TexType::Yuv
        } else {
            TexType::Normal
        },
        chunk_mask: 0,
        non_dep_chunk_mask: 0,
        chunk_regs: [0; MAX_CHUNKS],
        chunk_lanes: [0; MAX_CHUNKS],
        chans: [ChanSource::Unused; 4],
        dest_fmt,
        mask: mask & 0xF,
        yuv,
    };
    for k in 0..desc.num_chunks {
        info.chunk_regs[k] = desc.chunk_regs(k);
        info.chunk_lanes[k] = desc.last_reg_lanes(k);
    }

    for c in 0..4 {
        if info.mask & (1 << c) == 0 {
            continue;
        }
        let mut p = match resolved[c] {
            Swizzle::Zero => {
                info.chans[c] = ChanSource::Const(ConstVal::Zero);
                continue;
            }
            Swizzle::One => {
                info.chans[c] = ChanSource::Const(ConstVal::One);
                continue;
            }
            s => s.chan().unwrap_or(c),
        };

        if info.tex_type == TexType::Yuv {
            if p == 3 {
                return Err(LayoutError::YuvAlphaRead);
            }
            info.chans[c] = ChanSource::Csc { rgb: p as u8 };
            continue;
        }

        // A channel replicating the requested one keeps the natural position
        if p != c && desc.replica_of[c] == Some(p as u8) && locs[c].is_some() {
            p = c;
        }

        info.chans[c] = match desc.content[p] {
            ChanContent::One if dest_fmt == DataFmt::F32 => ChanSource::Const(ConstVal::One),
            ChanContent::Zero if dest_fmt == DataFmt::F32 => ChanSource::Const(ConstVal::Zero),
            ChanContent::Data | ChanContent::One | ChanContent::Zero => {
                let (chunk, reg, bit) = locs[p].ok_or(LayoutError::InvalidContent { chan: p })?;
                ChanSource::Data {
                    chunk,
                    reg,
                    bit,
                    fmt: desc.fmt[p],
                }
            }
            _ => return Err(LayoutError::InvalidContent { chan: p }),
        };
    }

    for src in info.chans {
        match src {
            ChanSource::Data { chunk, .. } => info.chunk_mask |= 1 << chunk,
            ChanSource::Csc { .. } => {
                for (k, bytes) in desc.chunk_bytes[..desc.num_chunks].iter().enumerate() {
                    if *bytes != 0 {
                        info.chunk_mask |= 1 << k;
                    }
                }
            }
            _ => {}
        }
    }

    tracing::trace!(
        "layout {:?}: mask {:#x} chunks {:#x} {:?}",
        desc.format,
        info.mask,
        info.chunk_mask,
        info.chans
    );
    Ok(info)
}

impl TexChanInfo {
    /// Chunks fetched by the sample itself
    pub fn fetch_mask(&self) -> u8 {
        self.chunk_mask & !self.non_dep_chunk_mask
    }

    pub fn is_live(&self, c: usize) -> bool {
        self.mask & (1 << c) != 0
    }

    /// Register offset and lanes of destination channel `c`
    pub fn dest_slot(&self, c: usize) -> (u32, u8) {
        chan_slot(self.dest_fmt, c as u32)
    }

    pub fn num_chunks(&self) -> usize {
        self.chunk_regs.iter().filter(|r| **r != 0).count()
    }

    /// Layout after the YUV conversion: the RGB result sits in one U8
    /// register produced inside the shader, so nothing is pre-sampled.
    pub fn after_csc(&self) -> TexChanInfo {
        let mut lanes = 0u8;
        let chans = self.chans.map(|src| match src {
            ChanSource::Csc { rgb } => {
                lanes |= 1 << rgb;
                ChanSource::Data {
                    chunk: 0,
                    reg: 0,
                    bit: 8 * rgb as u32,
                    fmt: DataFmt::U8,
                }
            }
            other => other,
        });
        let has_data = chans.iter().any(|c| matches!(c, ChanSource::Data { .. }));
        let mut chunk_regs = [0; MAX_CHUNKS];
        let mut chunk_lanes = [0; MAX_CHUNKS];
        if has_data {
            chunk_regs[0] = 1;
            chunk_lanes[0] = lanes;
        }
        TexChanInfo {
            tex_type: TexType::Yuv,
            chunk_mask: has_data as u8,
            non_dep_chunk_mask: 0,
            chunk_regs,
            chunk_lanes,
            chans,
            dest_fmt: self.dest_fmt,
            mask: self.mask,
            yuv: None,
        }
    }
}
