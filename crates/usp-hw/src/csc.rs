//! YUV to RGB colour-space conversion coefficients for FIRH

use serde::{Deserialize, Serialize};

/// Colour space of a YUV texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    #[default]
    Bt601Conformant,
    Bt601Full,
    Bt709Conformant,
}

/// Taps for one output channel: `out = (y*ty + u*tu + v*tv) / 256 + offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CscCoeffs {
    pub taps: [i16; 3],
    pub offset: i16,
}

const fn c(ty: i16, tu: i16, tv: i16, offset: i16) -> CscCoeffs {
    CscCoeffs {
        taps: [ty, tu, tv],
        offset,
    }
}

/// Indexed by colour space, then output channel R, G, B
const CSC_TABLE: [[CscCoeffs; 3]; 3] = [
    // BT.601, 16..235 luma
    [c(298, 0, 409, -223), c(298, -100, -208, 135), c(298, 516, 0, -277)],
    // BT.601, full range
    [c(256, 0, 359, -179), c(256, -88, -183, 135), c(256, 454, 0, -227)],
    // BT.709, 16..235 luma
    [c(298, 0, 459, -248), c(298, -55, -136, 77), c(298, 541, 0, -289)],
];

impl ColorSpace {
    fn index(self) -> usize {
        match self {
            ColorSpace::Bt601Conformant => 0,
            ColorSpace::Bt601Full => 1,
            ColorSpace::Bt709Conformant => 2,
        }
    }

    /// Coefficient set number programmed into FIRH for output channel `chan`
    pub fn coeff_set(self, chan: usize) -> u8 {
        (self.index() * 3 + chan.min(2)) as u8
    }

    pub fn coeffs(self, chan: usize) -> CscCoeffs {
        CSC_TABLE[self.index()][chan.min(2)]
    }
}

/// Coefficients for a FIRH coefficient set number
pub fn coeffs_for_set(set: u8) -> Option<CscCoeffs> {
    let set = set as usize;
    CSC_TABLE.get(set / 3).map(|row| row[set % 3])
}

/// Reference evaluation of one output channel, clamped to U8
pub fn apply(coeffs: CscCoeffs, y: u8, u: u8, v: u8) -> u8 {
    let [ty, tu, tv] = coeffs.taps;
    let sum = y as i32 * ty as i32 + u as i32 * tu as i32 + v as i32 * tv as i32;
    (sum / 256 + coeffs.offset as i32).clamp(0, 255) as u8
}
