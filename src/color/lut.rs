//! `.cube` LUT files (Resolve/Adobe flavour) and their evaluation.
//!
//! 3D tables are kept in file order, red varying fastest, which is also the
//! texel order of a `width = height = depth = size` 3D texture.

use std::io::BufRead;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LutError {
    #[error("cannot read LUT: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Lut1d {
    pub domain_min: [f32; 3],
    pub domain_max: [f32; 3],
    pub table: Vec<[f32; 3]>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Lut3d {
    pub size: usize,
    pub domain_min: [f32; 3],
    pub domain_max: [f32; 3],
    pub table: Vec<[f32; 3]>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CubeLut {
    OneD(Lut1d),
    ThreeD(Lut3d),
}

fn normalized(value: f32, min: f32, max: f32) -> f32 {
    let span = max - min;
    if span.abs() < f32::EPSILON {
        0.0
    } else {
        (value - min) / span
    }
}

impl Lut1d {
    pub fn size(&self) -> usize {
        self.table.len()
    }

    pub fn apply(&self, rgb: [f32; 3]) -> [f32; 3] {
        let last = (self.table.len() - 1) as f32;
        let mut out = [0.0; 3];
        for c in 0..3 {
            let t = normalized(rgb[c], self.domain_min[c], self.domain_max[c]);
            // NaN falls through clamp; map it to the first entry.
            let pos = if t.is_nan() { 0.0 } else { (t * last).clamp(0.0, last) };
            let i0 = pos.floor() as usize;
            let i1 = (i0 + 1).min(self.table.len() - 1);
            let f = pos - i0 as f32;
            out[c] = self.table[i0][c] + (self.table[i1][c] - self.table[i0][c]) * f;
        }
        out
    }
}

impl Lut3d {
    /// Samples `f` on a `size³` lattice over `[0, 1]³`.
    pub fn bake(size: usize, f: impl Fn([f32; 3]) -> [f32; 3]) -> Self {
        let step = 1.0 / (size - 1).max(1) as f32;
        let mut table = Vec::with_capacity(size * size * size);
        for b in 0..size {
            for g in 0..size {
                for r in 0..size {
                    table.push(f([r as f32 * step, g as f32 * step, b as f32 * step]));
                }
            }
        }
        Self {
            size,
            domain_min: [0.0; 3],
            domain_max: [1.0; 3],
            table,
        }
    }

    fn at(&self, r: usize, g: usize, b: usize) -> [f32; 3] {
        self.table[r + g * self.size + b * self.size * self.size]
    }

    /// Trilinear lookup, clamped to the domain.
    pub fn apply(&self, rgb: [f32; 3]) -> [f32; 3] {
        let last = (self.size - 1) as f32;
        let mut base = [0usize; 3];
        let mut next = [0usize; 3];
        let mut frac = [0.0f32; 3];
        for c in 0..3 {
            let t = normalized(rgb[c], self.domain_min[c], self.domain_max[c]);
            let pos = if t.is_nan() { 0.0 } else { (t * last).clamp(0.0, last) };
            base[c] = pos.floor() as usize;
            next[c] = (base[c] + 1).min(self.size - 1);
            frac[c] = pos - base[c] as f32;
        }
        let lerp = |a: [f32; 3], b: [f32; 3], t: f32| {
            [
                a[0] + (b[0] - a[0]) * t,
                a[1] + (b[1] - a[1]) * t,
                a[2] + (b[2] - a[2]) * t,
            ]
        };
        let along_red = |g: usize, b: usize| {
            lerp(self.at(base[0], g, b), self.at(next[0], g, b), frac[0])
        };
        let c00 = along_red(base[1], base[2]);
        let c10 = along_red(next[1], base[2]);
        let c01 = along_red(base[1], next[2]);
        let c11 = along_red(next[1], next[2]);
        let c0 = lerp(c00, c10, frac[1]);
        let c1 = lerp(c01, c11, frac[1]);
        lerp(c0, c1, frac[2])
    }
}

fn parse_floats<const N: usize>(fields: &[&str], line: usize) -> Result<[f32; N], LutError> {
    if fields.len() != N {
        return Err(LutError::Parse {
            line,
            message: format!("expected {} values, found {}", N, fields.len()),
        });
    }
    let mut out = [0.0; N];
    for (slot, field) in out.iter_mut().zip(fields) {
        *slot = field.parse().map_err(|_| LutError::Parse {
            line,
            message: format!("'{}' is not a number", field),
        })?;
    }
    Ok(out)
}

/// Largest `LUT_1D_SIZE` accepted.
pub const MAX_1D_SIZE: usize = 65536;
/// Largest `LUT_3D_SIZE` accepted.
pub const MAX_3D_SIZE: usize = 256;

fn parse_size(fields: &[&str], line: usize, max: usize) -> Result<usize, LutError> {
    match fields {
        [value] => value
            .parse::<usize>()
            .ok()
            .filter(|n| (2..=max).contains(n))
            .ok_or_else(|| LutError::Parse {
                line,
                message: format!("invalid LUT size '{}'", value),
            }),
        _ => Err(LutError::Parse {
            line,
            message: "LUT size takes one value".to_string(),
        }),
    }
}

pub fn parse_cube<R: BufRead>(reader: R) -> Result<CubeLut, LutError> {
    let mut size_1d = None;
    let mut size_3d = None;
    let mut domain_min = [0.0f32; 3];
    let mut domain_max = [1.0f32; 3];
    let mut table = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let Some(keyword) = fields.next() else {
            continue;
        };
        let rest: Vec<&str> = fields.collect();
        match keyword {
            "TITLE" => {}
            "LUT_1D_SIZE" => size_1d = Some(parse_size(&rest, line_no, MAX_1D_SIZE)?),
            "LUT_3D_SIZE" => size_3d = Some(parse_size(&rest, line_no, MAX_3D_SIZE)?),
            "DOMAIN_MIN" => domain_min = parse_floats::<3>(&rest, line_no)?,
            "DOMAIN_MAX" => domain_max = parse_floats::<3>(&rest, line_no)?,
            "LUT_1D_INPUT_RANGE" | "LUT_3D_INPUT_RANGE" => {
                let [min, max] = parse_floats::<2>(&rest, line_no)?;
                domain_min = [min; 3];
                domain_max = [max; 3];
            }
            _ => {
                let mut fields = vec![keyword];
                fields.extend(rest);
                table.push(parse_floats::<3>(&fields, line_no)?);
            }
        }
    }

    match (size_1d, size_3d) {
        (Some(_), Some(_)) => Err(LutError::Invalid(
            "file declares both LUT_1D_SIZE and LUT_3D_SIZE".to_string(),
        )),
        (None, None) => Err(LutError::Invalid("missing LUT_1D_SIZE or LUT_3D_SIZE".to_string())),
        (Some(size), None) => {
            if table.len() != size {
                return Err(LutError::Invalid(format!(
                    "expected {} entries, found {}",
                    size,
                    table.len()
                )));
            }
            Ok(CubeLut::OneD(Lut1d {
                domain_min,
                domain_max,
                table,
            }))
        }
        (None, Some(size)) => {
            let expected = size
                .checked_mul(size)
                .and_then(|n| n.checked_mul(size))
                .ok_or_else(|| LutError::Invalid(format!("LUT_3D_SIZE {} is too large", size)))?;
            if table.len() != expected {
                return Err(LutError::Invalid(format!(
                    "expected {} entries, found {}",
                    expected,
                    table.len()
                )));
            }
            Ok(CubeLut::ThreeD(Lut3d {
                size,
                domain_min,
                domain_max,
                table,
            }))
        }
    }
}

pub fn read_cube(path: &Path) -> Result<CubeLut, LutError> {
    let file = std::fs::File::open(path)?;
    parse_cube(std::io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::{CubeLut, Lut3d, LutError, MAX_1D_SIZE, MAX_3D_SIZE, parse_cube};

    fn parse(text: &str) -> Result<CubeLut, LutError> {
        parse_cube(text.as_bytes())
    }

    #[test]
    fn parses_1d_lut_with_domain() {
        let lut = parse(concat!(
            "TITLE \"half\"\n# comment\nLUT_1D_SIZE 2\n",
            "DOMAIN_MIN 0 0 0\nDOMAIN_MAX 2 2 2\n0 0 0\n1 1 1\n",
        ))
        .unwrap();
        let CubeLut::OneD(lut) = lut else {
            panic!("expected 1D LUT");
        };
        assert_eq!(lut.size(), 2);
        let out = lut.apply([1.0, 2.0, 4.0]);
        assert_abs_diff_eq!(out[0], 0.5);
        assert_abs_diff_eq!(out[1], 1.0);
        assert_abs_diff_eq!(out[2], 1.0);
    }

    #[test]
    fn identity_3d_lut_interpolates_exactly() {
        let mut text = String::from("LUT_3D_SIZE 2\n");
        for b in 0..2 {
            for g in 0..2 {
                for r in 0..2 {
                    text.push_str(&format!("{} {} {}\n", r, g, b));
                }
            }
        }
        let CubeLut::ThreeD(lut) = parse(&text).unwrap() else {
            panic!("expected 3D LUT");
        };
        let out = lut.apply([0.25, 0.5, 0.75]);
        assert_abs_diff_eq!(out[0], 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(out[2], 0.75, epsilon = 1e-6);
    }

    #[test]
    fn red_varies_fastest_in_file_order() {
        let lut = Lut3d::bake(3, |rgb| rgb);
        assert_eq!(lut.table[1], [0.5, 0.0, 0.0]);
        assert_eq!(lut.table[3], [0.0, 0.5, 0.0]);
        assert_eq!(lut.table[9], [0.0, 0.0, 0.5]);
    }

    #[test]
    fn rejects_wrong_entry_count() {
        let err = parse("LUT_3D_SIZE 2\n0 0 0\n").unwrap_err();
        assert!(matches!(err, LutError::Invalid(_)));
    }

    #[test]
    fn rejects_missing_size_and_bad_numbers() {
        assert!(matches!(parse("0 0 0\n").unwrap_err(), LutError::Invalid(_)));
        assert!(matches!(
            parse("LUT_1D_SIZE 2\n0 x 0\n1 1 1\n").unwrap_err(),
            LutError::Parse { line: 2, .. }
        ));
    }

    #[test]
    fn oversized_declarations_are_errors() {
        for text in [
            "LUT_3D_SIZE 3000000\n",
            "LUT_3D_SIZE 18446744073709551615\n",
            "LUT_1D_SIZE 99999999\n0 0 0\n",
        ] {
            assert!(matches!(parse(text).unwrap_err(), LutError::Parse { line: 1, .. }));
        }
        let at_limit = format!("LUT_3D_SIZE {}\n", MAX_3D_SIZE);
        assert!(matches!(parse(&at_limit).unwrap_err(), LutError::Invalid(_)));
        let over = format!("LUT_1D_SIZE {}\n", MAX_1D_SIZE + 1);
        assert!(matches!(parse(&over).unwrap_err(), LutError::Parse { .. }));
    }
}
