//! Texture formats as seen by the texture unit
//!
//! Every logical format has a raw description of the data an SMP returns
//! when the TAG performs no conversion. The TAG can also unpack a subset of
//! formats to F16/F32 during the fetch and, on cores with a swizzle unit,
//! reorder the channels it writes. Both produce a new description.

use serde::{Deserialize, Serialize};
use usp_hw::{DataFmt, Swizzle};

/// Logical texture formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TexFormat {
    Rgba8,
    Bgra8,
    Rgbx8,
    Rgba8Snorm,
    Rgb565,
    Rgba5551,
    Rgba4444,
    A8,
    L8,
    L8A8,
    I8,
    Rgba16,
    Rgba16Snorm,
    Rg16,
    RgbaF16,
    RgF16,
    RF16,
    AF16,
    LF16,
    LaF16,
    IF16,
    RgbaF32,
    RgF32,
    RF32,
    LF32,
    IF32,
    RgbaU32,
    RgbaS32,
    RU32,
    Depth16,
    Depth24S8,
    DepthF32,
    Pvrtc2,
    Pvrtc4,
    Pvrtc2Rgb,
    Pvrtc4Rgb,
    Yuv420TwoPlaneUv,
    Yuv420TwoPlaneVu,
    Yuv420ThreePlane,
    Yuv422Yuyv,
    Yuv422Uyvy,
}

/// What a physical channel holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChanContent {
    /// Not present in the fetched data
    None,
    Data,
    /// Present, always reads as one
    One,
    /// Present, always reads as zero
    Zero,
    Y,
    U,
    V,
}

impl ChanContent {
    pub fn is_yuv(self) -> bool {
        matches!(self, ChanContent::Y | ChanContent::U | ChanContent::V)
    }
}

/// Layout of the texel data returned by the texture unit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TexFormatDesc {
    pub format: TexFormat,
    pub content: [ChanContent; 4],
    pub fmt: [DataFmt; 4],
    /// Logical channel to physical channel or constant
    pub swizzle: [Swizzle; 4],
    /// Physical channels that carry a copy of another physical channel
    pub replica_of: [Option<u8>; 4],
    /// Size of each chunk in bytes
    pub chunk_bytes: [u8; 4],
    pub num_chunks: usize,
}

use ChanContent::{Data as D, None as N, One as O, U, V, Y};
use DataFmt::{F16, F32, S16, S32, S8, U16, U24, U32, U8};
use Swizzle::{One as S1, Zero as S0, W, X, Y as SY, Z};

fn desc(
    format: TexFormat,
    content: [ChanContent; 4],
    fmt: [DataFmt; 4],
    swizzle: [Swizzle; 4],
    chunks: &[u8],
) -> TexFormatDesc {
    let mut chunk_bytes = [0; 4];
    for (dst, src) in chunk_bytes.iter_mut().zip(chunks) {
        *dst = *src;
    }
    TexFormatDesc {
        format,
        content,
        fmt,
        swizzle,
        replica_of: [None; 4],
        chunk_bytes,
        num_chunks: chunks.len().min(4),
    }
}

const RGBA: [Swizzle; 4] = [X, SY, Z, W];
const LUM: [Swizzle; 4] = [X, X, X, S1];
const LUM_ALPHA: [Swizzle; 4] = [X, X, X, SY];
const INTENSITY: [Swizzle; 4] = [X, X, X, X];
const ALPHA: [Swizzle; 4] = [S0, S0, S0, X];

impl TexFormat {
    /// Format code written into the texture state words
    pub fn hw_code(self) -> u8 {
        self as u8
    }

    pub fn is_yuv(self) -> bool {
        matches!(
            self,
            TexFormat::Yuv420TwoPlaneUv
                | TexFormat::Yuv420TwoPlaneVu
                | TexFormat::Yuv420ThreePlane
                | TexFormat::Yuv422Yuyv
                | TexFormat::Yuv422Uyvy
        )
    }

    /// 32-bit float depth, needs its sign bit cleared after the fetch
    pub fn is_float_depth(self) -> bool {
        self == TexFormat::DepthF32
    }

    fn is_unorm8(self) -> bool {
        matches!(
            self,
            TexFormat::Rgba8
                | TexFormat::Bgra8
                | TexFormat::Rgbx8
                | TexFormat::Rgb565
                | TexFormat::Rgba5551
                | TexFormat::Rgba4444
                | TexFormat::A8
                | TexFormat::L8
                | TexFormat::L8A8
                | TexFormat::I8
                | TexFormat::Pvrtc2
                | TexFormat::Pvrtc4
                | TexFormat::Pvrtc2Rgb
                | TexFormat::Pvrtc4Rgb
        )
    }

    /// Raw description, no conversion in the texture unit
    pub fn desc(self) -> TexFormatDesc {
        use TexFormat::*;
        let u8x4 = [U8; 4];
        match self {
            Rgba8 | Rgba5551 | Rgba4444 | Pvrtc2 | Pvrtc4 => desc(self, [D; 4], u8x4, RGBA, &[4]),
            Bgra8 => desc(self, [D; 4], u8x4, [Z, SY, X, W], &[4]),
            Rgbx8 | Rgb565 | Pvrtc2Rgb | Pvrtc4Rgb => {
                desc(self, [D, D, D, O], u8x4, RGBA, &[4])
            }
            Rgba8Snorm => desc(self, [D; 4], [S8; 4], RGBA, &[4]),
            A8 => desc(self, [D, N, N, N], u8x4, ALPHA, &[1]),
            L8 => desc(self, [D, N, N, N], u8x4, LUM, &[1]),
            L8A8 => desc(self, [D, D, N, N], u8x4, LUM_ALPHA, &[2]),
            I8 => desc(self, [D, N, N, N], u8x4, INTENSITY, &[1]),
            Rgba16 => desc(self, [D; 4], [U16; 4], RGBA, &[4, 4]),
            Rgba16Snorm => desc(self, [D; 4], [S16; 4], RGBA, &[4, 4]),
            Rg16 => desc(self, [D, D, N, N], [U16; 4], [X, SY, S0, S1], &[4]),
            RgbaF16 => desc(self, [D; 4], [F16; 4], RGBA, &[4, 4]),
            RgF16 => desc(self, [D, D, N, N], [F16; 4], [X, SY, S0, S1], &[4]),
            RF16 => desc(self, [D, N, N, N], [F16; 4], [X, S0, S0, S1], &[2]),
            AF16 => desc(self, [D, N, N, N], [F16; 4], ALPHA, &[2]),
            LF16 => desc(self, [D, N, N, N], [F16; 4], LUM, &[2]),
            LaF16 => desc(self, [D, D, N, N], [F16; 4], LUM_ALPHA, &[4]),
            IF16 => desc(self, [D, N, N, N], [F16; 4], INTENSITY, &[2]),
            RgbaF32 => desc(self, [D; 4], [F32; 4], RGBA, &[4, 4, 4, 4]),
            RgF32 => desc(self, [D, D, N, N], [F32; 4], [X, SY, S0, S1], &[4, 4]),
            RF32 => desc(self, [D, N, N, N], [F32; 4], [X, S0, S0, S1], &[4]),
            LF32 => desc(self, [D, N, N, N], [F32; 4], LUM, &[4]),
            IF32 => desc(self, [D, N, N, N], [F32; 4], INTENSITY, &[4]),
            RgbaU32 => desc(self, [D; 4], [U32; 4], RGBA, &[4, 4, 4, 4]),
            RgbaS32 => desc(self, [D; 4], [S32; 4], RGBA, &[4, 4, 4, 4]),
            RU32 => desc(self, [D, N, N, N], [U32; 4], [X, S0, S0, S1], &[4]),
            Depth16 => desc(self, [D, N, N, N], [U16; 4], LUM, &[2]),
            Depth24S8 => desc(self, [D, D, N, N], [U24, U8, U8, U8], LUM, &[4]),
            DepthF32 => desc(self, [D, N, N, N], [F32; 4], LUM, &[4]),
            Yuv420TwoPlaneUv => desc(self, [Y, U, V, N], u8x4, RGBA, &[1, 2]),
            Yuv420TwoPlaneVu => desc(self, [Y, V, U, N], u8x4, RGBA, &[1, 2]),
            Yuv420ThreePlane => desc(self, [Y, U, V, N], u8x4, RGBA, &[1, 1, 1]),
            Yuv422Yuyv => desc(self, [Y, U, V, N], u8x4, RGBA, &[3]),
            Yuv422Uyvy => desc(self, [U, Y, V, N], u8x4, RGBA, &[3]),
        }
    }

    /// Can the TAG unpack this format to `to` while fetching?
    pub fn tag_unpack_legal(self, to: DataFmt) -> bool {
        use TexFormat::*;
        match to {
            DataFmt::F16 => self.is_unorm8(),
            DataFmt::F32 => {
                self.is_unorm8()
                    || matches!(
                        self,
                        Rgba8Snorm
                            | Rgba16
                            | Rgba16Snorm
                            | Rg16
                            | RgbaF16
                            | RgF16
                            | RF16
                            | AF16
                            | LF16
                            | LaF16
                            | IF16
                            | Depth16
                    )
            }
            _ => false,
        }
    }

    /// Luminance formats the TAG spreads over R, G and B when unpacking
    fn replicated_desc(self, to: DataFmt) -> Option<TexFormatDesc> {
        let (content, replica_of, swizzle) = match self {
            TexFormat::L8 => ([D, D, D, O], [None, Some(0), Some(0), None], [X, X, X, W]),
            TexFormat::L8A8 => ([D; 4], [None, Some(0), Some(0), None], [X, X, X, W]),
            TexFormat::I8 => ([D; 4], [None, Some(0), Some(0), Some(0)], INTENSITY),
            _ => return None,
        };
        let mut desc = desc(self, content, [to; 4], swizzle, &[4 * to.bits() as u8 / 8]);
        desc.replica_of = replica_of;
        Some(desc)
    }

    /// Description of the data written when the TAG unpacks to `to`
    pub fn tag_desc(self, to: DataFmt, replicate: bool) -> Option<TexFormatDesc> {
        if !self.tag_unpack_legal(to) {
            return None;
        }
        if replicate {
            if let Some(desc) = self.replicated_desc(to) {
                return Some(desc);
            }
        }
        let raw = self.desc();
        let present = raw.content.iter().filter(|c| **c != N).count() as u32;
        let bytes = (present * to.bits() / 8) as u8;
        Some(desc(self, raw.content, [to; 4], raw.swizzle, &[bytes]))
    }
}

impl TexFormatDesc {
    /// Bits occupied by physical channel `p` in the fetched data
    pub fn chan_bits(&self, p: usize) -> u32 {
        match self.content[p] {
            ChanContent::None => 0,
            _ => self.fmt[p].bits(),
        }
    }

    pub fn chunk_regs(&self, chunk: usize) -> u32 {
        (self.chunk_bytes[chunk] as u32).div_ceil(4)
    }

    /// Byte lanes written in the last register of a chunk
    pub fn last_reg_lanes(&self, chunk: usize) -> u8 {
        match self.chunk_bytes[chunk] % 4 {
            0 => 0xF,
            rem => (1 << rem) - 1,
        }
    }

    pub fn is_yuv(&self) -> bool {
        self.content.iter().any(|c| c.is_yuv())
    }

    /// Single chunk with every channel present in one format
    pub fn hw_swizzle_eligible(&self) -> bool {
        self.num_chunks == 1
            && self.content.iter().all(|c| *c != N && !c.is_yuv())
            && self.fmt.iter().all(|f| *f == self.fmt[0])
    }

    /// Description after the TAG swizzle unit applies `swizzle`
    pub fn with_hw_swizzle(&self, swizzle: [Swizzle; 4]) -> Option<TexFormatDesc> {
        if !self.hw_swizzle_eligible() {
            return None;
        }
        let content = swizzle.map(|s| match s {
            Swizzle::Zero => ChanContent::Zero,
            Swizzle::One => ChanContent::One,
            s => s.chan().map_or(N, |p| self.content[p]),
        });
        Some(TexFormatDesc {
            content,
            swizzle: Swizzle::IDENTITY,
            replica_of: [None; 4],
            ..self.clone()
        })
    }
}

/// Physical channel (or constant) feeding each destination channel
pub fn resolve_swizzle(desc: &TexFormatDesc, shader: [Swizzle; 4]) -> [Swizzle; 4] {
    shader.map(|s| match s.chan() {
        Some(l) => desc.swizzle[l],
        None => s,
    })
}
