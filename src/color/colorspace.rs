//! Built-in colorspaces. The reference space is scene-linear Rec.709.

/// Row-major 3×3 matrix.
pub type Mat3 = [f32; 9];

pub const IDENTITY: Mat3 = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

// AP1 (ACEScg) to Rec.709, Bradford D60 -> D65.
#[rustfmt::skip]
const AP1_TO_REC709: Mat3 = [
    1.705_051, -0.621_792_1, -0.083_258_87,
    -0.130_256_4, 1.140_804_7, -0.010_548_32,
    -0.024_003_36, -0.128_968_98, 1.152_972_3,
];

// AP0 (ACES2065-1) to Rec.709, Bradford D60 -> D65.
#[rustfmt::skip]
const AP0_TO_REC709: Mat3 = [
    2.521_686_2, -1.134_131, -0.387_555_2,
    -0.276_479_9, 1.372_719_1, -0.096_239_17,
    -0.015_378_065, -0.152_975_34, 1.168_353_4,
];

pub fn mat3_apply(m: &Mat3, rgb: [f32; 3]) -> [f32; 3] {
    [
        m[0] * rgb[0] + m[1] * rgb[1] + m[2] * rgb[2],
        m[3] * rgb[0] + m[4] * rgb[1] + m[5] * rgb[2],
        m[6] * rgb[0] + m[7] * rgb[1] + m[8] * rgb[2],
    ]
}

/// `a · b`: applying the result equals applying `b` then `a`.
pub fn mat3_mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [0.0; 9];
    for row in 0..3 {
        for col in 0..3 {
            out[row * 3 + col] = (0..3).map(|k| a[row * 3 + k] * b[k * 3 + col]).sum();
        }
    }
    out
}

pub fn mat3_inverse(m: &Mat3) -> Option<Mat3> {
    let m = m.map(f64::from);
    let det = m[0] * (m[4] * m[8] - m[5] * m[7]) - m[1] * (m[3] * m[8] - m[5] * m[6])
        + m[2] * (m[3] * m[7] - m[4] * m[6]);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv = [
        m[4] * m[8] - m[5] * m[7],
        m[2] * m[7] - m[1] * m[8],
        m[1] * m[5] - m[2] * m[4],
        m[5] * m[6] - m[3] * m[8],
        m[0] * m[8] - m[2] * m[6],
        m[2] * m[3] - m[0] * m[5],
        m[3] * m[7] - m[4] * m[6],
        m[1] * m[6] - m[0] * m[7],
        m[0] * m[4] - m[1] * m[3],
    ];
    Some(inv.map(|v| (v / det) as f32))
}

pub fn is_identity(m: &Mat3) -> bool {
    m.iter().zip(IDENTITY.iter()).all(|(a, b)| (a - b).abs() < 1e-5)
}

/// Encoding curve of a colorspace. `decode` maps encoded values to linear.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Transfer {
    Linear,
    Srgb,
    Rec709,
    Gamma(f32),
    AcesCct,
}

pub(crate) const ACESCCT_X_BRK: f32 = 0.007_812_5;
pub(crate) const ACESCCT_Y_BRK: f32 = 0.155_251_14;
pub(crate) const ACESCCT_A: f32 = 10.540_238;
pub(crate) const ACESCCT_B: f32 = 0.072_905_53;

impl Transfer {
    pub fn decode(self, v: f32) -> f32 {
        match self {
            Transfer::Linear => v,
            Transfer::Srgb => {
                if v <= 0.04045 {
                    v / 12.92
                } else {
                    ((v + 0.055) / 1.055).powf(2.4)
                }
            }
            Transfer::Rec709 => {
                if v < 0.081 {
                    v / 4.5
                } else {
                    ((v + 0.099) / 1.099).powf(1.0 / 0.45)
                }
            }
            Transfer::Gamma(g) => v.signum() * v.abs().powf(g),
            Transfer::AcesCct => {
                if v <= ACESCCT_Y_BRK {
                    (v - ACESCCT_B) / ACESCCT_A
                } else {
                    (v * 17.52 - 9.72).exp2()
                }
            }
        }
    }

    pub fn encode(self, v: f32) -> f32 {
        match self {
            Transfer::Linear => v,
            Transfer::Srgb => {
                if v <= 0.003_130_8 {
                    v * 12.92
                } else {
                    1.055 * v.powf(1.0 / 2.4) - 0.055
                }
            }
            Transfer::Rec709 => {
                if v < 0.018 {
                    v * 4.5
                } else {
                    1.099 * v.powf(0.45) - 0.099
                }
            }
            Transfer::Gamma(g) => v.signum() * v.abs().powf(1.0 / g),
            Transfer::AcesCct => {
                if v <= ACESCCT_X_BRK {
                    ACESCCT_A * v + ACESCCT_B
                } else {
                    (v.log2() + 9.72) / 17.52
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct ColorSpace {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    /// Linear primaries to the reference primaries.
    pub to_reference: Mat3,
    pub transfer: Transfer,
    /// Non-color data: never converted.
    pub is_data: bool,
}

pub static BUILTIN: &[ColorSpace] = &[
    ColorSpace {
        name: "lin_rec709",
        aliases: &["linear", "scene_linear", "lin_srgb"],
        to_reference: IDENTITY,
        transfer: Transfer::Linear,
        is_data: false,
    },
    ColorSpace {
        name: "srgb",
        aliases: &["srgb_texture", "srgb_display"],
        to_reference: IDENTITY,
        transfer: Transfer::Srgb,
        is_data: false,
    },
    ColorSpace {
        name: "rec709",
        aliases: &["bt709"],
        to_reference: IDENTITY,
        transfer: Transfer::Rec709,
        is_data: false,
    },
    ColorSpace {
        name: "gamma22_rec709",
        aliases: &[],
        to_reference: IDENTITY,
        transfer: Transfer::Gamma(2.2),
        is_data: false,
    },
    ColorSpace {
        name: "gamma24_rec709",
        aliases: &["rec1886"],
        to_reference: IDENTITY,
        transfer: Transfer::Gamma(2.4),
        is_data: false,
    },
    ColorSpace {
        name: "acescg",
        aliases: &["aces_cg", "lin_ap1"],
        to_reference: AP1_TO_REC709,
        transfer: Transfer::Linear,
        is_data: false,
    },
    ColorSpace {
        name: "aces2065-1",
        aliases: &["aces", "lin_ap0"],
        to_reference: AP0_TO_REC709,
        transfer: Transfer::Linear,
        is_data: false,
    },
    ColorSpace {
        name: "acescct",
        aliases: &["aces_cct"],
        to_reference: AP1_TO_REC709,
        transfer: Transfer::AcesCct,
        is_data: false,
    },
    ColorSpace {
        name: "raw",
        aliases: &["data", "non-color"],
        to_reference: IDENTITY,
        transfer: Transfer::Linear,
        is_data: true,
    },
];

/// Case-insensitive lookup by name or alias.
pub fn find(name: &str) -> Option<&'static ColorSpace> {
    BUILTIN.iter().find(|cs| {
        cs.name.eq_ignore_ascii_case(name)
            || cs.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    })
}
