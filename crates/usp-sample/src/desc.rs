//! Input descriptions of textures, samples and shaders
//!
//! These are the values the compiler driver hands over. They also
//! deserialize from TOML so shaders can be described in files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use usp_core::{Result, UspError};
use usp_hw::{ColorSpace, DataFmt, Operand, RegBank, Swizzle};

use crate::format::TexFormat;

/// A register named by bank and number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegRef {
    pub bank: RegBank,
    pub num: u32,
}

impl RegRef {
    pub fn new(bank: RegBank, num: u32) -> Self {
        Self { bank, num }
    }

    pub fn operand(self) -> Operand {
        Operand::new(self.bank, self.num)
    }
}

/// Where the texture coordinates of a sample come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoordSource {
    /// Texture coordinate slot iterated by the hardware
    Iterated {
        slot: u32,
        #[serde(default)]
        centroid: bool,
    },
    /// Value iterated into a virtual register
    Virtual { reg: u32 },
    /// Computed by the shader
    Register { bank: RegBank, num: u32 },
}

impl CoordSource {
    /// Coordinates that have to be iterated before the shader runs
    pub fn is_iterated(&self) -> bool {
        !matches!(self, CoordSource::Register { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    #[default]
    Point,
    Linear,
}

fn one() -> u32 {
    1
}

fn yes() -> bool {
    true
}

/// One texture bound to the shader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureDesc {
    pub format: TexFormat,
    #[serde(default = "one")]
    pub width: u32,
    #[serde(default = "one")]
    pub height: u32,
    #[serde(default = "one")]
    pub depth: u32,
    #[serde(default)]
    pub filter: Filter,
    /// Coordinates are given in [0, 1] rather than texels
    #[serde(default = "yes")]
    pub normalised: bool,
    #[serde(default)]
    pub colorspace: ColorSpace,
}

impl TextureDesc {
    pub fn new(format: TexFormat) -> Self {
        Self {
            format,
            width: 1,
            height: 1,
            depth: 1,
            filter: Filter::Point,
            normalised: true,
            colorspace: ColorSpace::default(),
        }
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn unnormalised(mut self) -> Self {
        self.normalised = false;
        self
    }

    /// Size along coordinate axis `axis`
    pub fn axis_size(&self, axis: usize) -> u32 {
        match axis {
            0 => self.width,
            1 => self.height,
            _ => self.depth,
        }
        .max(1)
    }
}

fn default_dim() -> u8 {
    2
}

fn full_mask() -> u8 {
    0xF
}

fn identity() -> [Swizzle; 4] {
    Swizzle::IDENTITY
}

/// One static texture sample in the shader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleDesc {
    pub texture: usize,
    pub coord: CoordSource,
    #[serde(default = "default_dim")]
    pub dim: u8,
    #[serde(default)]
    pub proj: bool,
    /// Candidate for fetching by the iterators before the shader runs
    #[serde(default)]
    pub non_dependent: bool,
    pub dest: RegRef,
    pub dest_fmt: DataFmt,
    #[serde(default = "full_mask")]
    pub mask: u8,
    #[serde(default = "identity")]
    pub swizzle: [Swizzle; 4],
    /// Internal registers live across the sample
    #[serde(default)]
    pub live_internals: u8,
    /// Live internal registers hold C10 data
    #[serde(default)]
    pub internals_c10: bool,
}

impl SampleDesc {
    pub fn new(texture: usize, coord: CoordSource, dest: RegRef, dest_fmt: DataFmt) -> Self {
        Self {
            texture,
            coord,
            dim: 2,
            proj: false,
            non_dependent: false,
            dest,
            dest_fmt,
            mask: 0xF,
            swizzle: Swizzle::IDENTITY,
            live_internals: 0,
            internals_c10: false,
        }
    }

    pub fn mask(mut self, mask: u8) -> Self {
        self.mask = mask;
        self
    }

    pub fn swizzle(mut self, swizzle: [Swizzle; 4]) -> Self {
        self.swizzle = swizzle;
        self
    }

    pub fn non_dependent(mut self) -> Self {
        self.non_dependent = true;
        self
    }

    pub fn proj(mut self) -> Self {
        self.proj = true;
        self
    }

    pub fn dim(mut self, dim: u8) -> Self {
        self.dim = dim;
        self
    }

    pub fn live_internals(mut self, mask: u8, c10: bool) -> Self {
        self.live_internals = mask;
        self.internals_c10 = c10;
        self
    }

    /// Registers holding the coordinates
    pub fn coord_regs(&self) -> u32 {
        self.dim as u32 + self.proj as u32
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(1..=3).contains(&self.dim) {
            return Err(format!("unsupported dimension {}", self.dim));
        }
        if self.mask == 0 || self.mask > 0xF {
            return Err(format!("invalid destination mask {:#x}", self.mask));
        }
        if !self.dest.bank.is_writable() {
            return Err(format!("{:?} is not a writable destination", self.dest.bank));
        }
        if self.non_dependent && !self.coord.is_iterated() {
            return Err("non dependent sample with computed coordinates".to_string());
        }
        Ok(())
    }
}

fn default_temp_base() -> u32 {
    32
}

/// Shader-wide register assignments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderInfo {
    /// First secondary attribute holding texture state words
    #[serde(default)]
    pub tex_state_sa_base: u32,
    /// Secondary attribute holding the address of the texture state table
    #[serde(default)]
    pub tex_state_mem_base: Option<u32>,
    /// First temporary register free for sample code
    #[serde(default = "default_temp_base")]
    pub temp_base: u32,
    /// Registers of each other iterated attribute
    #[serde(default)]
    pub iterated_attrs: Vec<u32>,
}

impl Default for ShaderInfo {
    fn default() -> Self {
        Self {
            tex_state_sa_base: 0,
            tex_state_mem_base: None,
            temp_base: default_temp_base(),
            iterated_attrs: Vec::new(),
        }
    }
}

/// A whole shader as described in a file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShaderDesc {
    #[serde(default)]
    pub info: ShaderInfo,
    #[serde(default)]
    pub textures: Vec<TextureDesc>,
    #[serde(default)]
    pub samples: Vec<SampleDesc>,
}

impl ShaderDesc {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| UspError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}
