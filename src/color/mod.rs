//! Color transforms: resolving a [`TransformRequest`] into a [`Processor`]
//! that can run on the CPU or be emitted as a WGSL function.

pub mod colorspace;
pub mod display;
pub mod lut;
pub mod shader;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use colorspace::{ColorSpace, Mat3, Transfer};
use lut::{CubeLut, Lut1d, Lut3d, LutError};

/// What the user asked to convert. Exactly one per run.
#[derive(Clone, Debug, PartialEq)]
pub enum TransformRequest {
    ColorspacePair { src: String, dst: String },
    LutFile(PathBuf),
    DisplayView {
        input: String,
        display: String,
        view: String,
    },
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("unknown colorspace '{0}'")]
    UnknownColorSpace(String),
    #[error("unknown display '{0}'")]
    UnknownDisplay(String),
    #[error("display '{display}' has no view '{view}'")]
    UnknownView { display: String, view: String },
    #[error("LUT file '{}' not found", .0.display())]
    LutNotFound(PathBuf),
    #[error("cannot load LUT '{}': {source}", path.display())]
    Lut {
        path: PathBuf,
        #[source]
        source: LutError,
    },
    #[error("colorspace '{0}' has a singular primaries matrix")]
    NotInvertible(String),
}

/// Processor parameters that stay adjustable after the shader is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DynamicProperty {
    Exposure,
    Gamma,
}

impl DynamicProperty {
    pub fn uniform_name(self) -> &'static str {
        match self {
            DynamicProperty::Exposure => "exposure",
            DynamicProperty::Gamma => "gamma",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Matrix(Mat3),
    /// Encoded values to linear.
    Decode(Transfer),
    /// Linear values to encoded.
    Encode(Transfer),
    Lut1d(Arc<Lut1d>),
    Lut3d(Arc<Lut3d>),
    Tonemap,
    /// Dynamic: multiply by `2^stops`.
    Exposure(f32),
    /// Dynamic: sign-mirrored `v^(1/gamma)`.
    Gamma(f32),
}

impl Op {
    fn apply(&self, rgb: [f32; 3]) -> [f32; 3] {
        match self {
            Op::Matrix(m) => colorspace::mat3_apply(m, rgb),
            Op::Decode(t) => rgb.map(|v| t.decode(v)),
            Op::Encode(t) => rgb.map(|v| t.encode(v)),
            Op::Lut1d(lut) => lut.apply(rgb),
            Op::Lut3d(lut) => lut.apply(rgb),
            Op::Tonemap => rgb.map(display::tonemap),
            Op::Exposure(stops) => {
                let gain = stops.exp2();
                rgb.map(|v| v * gain)
            }
            Op::Gamma(gamma) => rgb.map(|v| v.signum() * v.abs().powf(1.0 / gamma)),
        }
    }

    /// Static ops that leave every value untouched. Dynamic ops never are,
    /// since their value may change after the processor is built.
    fn is_identity(&self) -> bool {
        match self {
            Op::Matrix(m) => colorspace::is_identity(m),
            Op::Decode(Transfer::Linear) | Op::Encode(Transfer::Linear) => true,
            _ => false,
        }
    }
}

/// Ordered list of ops applied to RGB triples.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Processor {
    ops: Vec<Op>,
}

impl Processor {
    pub fn new(ops: Vec<Op>) -> Self {
        Self { ops }
    }

    pub fn noop() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn is_noop(&self) -> bool {
        self.ops.iter().all(Op::is_identity)
    }

    /// Folds adjacent matrices, cancels `Encode(t)`/`Decode(t)` neighbours
    /// and drops identity ops.
    pub fn optimize(&self) -> Processor {
        let mut ops: Vec<Op> = Vec::with_capacity(self.ops.len());
        for op in self.ops.iter().filter(|op| !op.is_identity()) {
            match (ops.last(), op) {
                (Some(Op::Matrix(first)), Op::Matrix(second)) => {
                    let folded = colorspace::mat3_mul(second, first);
                    ops.pop();
                    if !colorspace::is_identity(&folded) {
                        ops.push(Op::Matrix(folded));
                    }
                }
                (Some(Op::Encode(a)), Op::Decode(b)) | (Some(Op::Decode(a)), Op::Encode(b))
                    if a == b =>
                {
                    ops.pop();
                }
                _ => ops.push(op.clone()),
            }
        }
        Processor { ops }
    }

    pub fn apply_rgb(&self, rgb: [f32; 3]) -> [f32; 3] {
        self.ops.iter().fold(rgb, |acc, op| op.apply(acc))
    }

    pub fn dynamic_properties(&self) -> Vec<(DynamicProperty, f32)> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Exposure(v) => Some((DynamicProperty::Exposure, *v)),
                Op::Gamma(v) => Some((DynamicProperty::Gamma, *v)),
                _ => None,
            })
            .collect()
    }
}

/// Lookup state for [`TransformRequest`] resolution.
#[derive(Clone, Debug)]
pub struct TransformContext {
    /// Directories searched, in order, for relative LUT paths.
    pub search_path: Vec<PathBuf>,
    /// Extra colorspace names, mapped to a built-in name or alias.
    pub aliases: BTreeMap<String, String>,
    pub exposure: f32,
    pub gamma: f32,
}

impl Default for TransformContext {
    fn default() -> Self {
        Self {
            search_path: Vec::new(),
            aliases: BTreeMap::new(),
            exposure: 0.0,
            gamma: 1.0,
        }
    }
}

impl TransformContext {
    pub fn colorspace(&self, name: &str) -> Result<&'static ColorSpace, TransformError> {
        let target = self
            .aliases
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
            .map(|(_, target)| target.as_str())
            .unwrap_or(name);
        colorspace::find(target).ok_or_else(|| TransformError::UnknownColorSpace(name.to_string()))
    }

    pub fn resolve(&self, request: &TransformRequest) -> Result<Processor, TransformError> {
        let processor = match request {
            TransformRequest::ColorspacePair { src, dst } => {
                let src = self.colorspace(src)?;
                let dst = self.colorspace(dst)?;
                if src.is_data || dst.is_data || std::ptr::eq(src, dst) {
                    Processor::noop()
                } else {
                    let mut ops = to_reference(src);
                    ops.extend(from_reference(dst)?);
                    Processor::new(ops)
                }
            }
            TransformRequest::LutFile(path) => {
                let found = self.find_lut(path)?;
                let lut = lut::read_cube(&found).map_err(|source| TransformError::Lut {
                    path: found.clone(),
                    source,
                })?;
                debug!(path = %found.display(), "loaded LUT");
                match lut {
                    CubeLut::OneD(lut) => Processor::new(vec![Op::Lut1d(Arc::new(lut))]),
                    CubeLut::ThreeD(lut) => Processor::new(vec![Op::Lut3d(Arc::new(lut))]),
                }
            }
            TransformRequest::DisplayView {
                input,
                display,
                view,
            } => {
                let input = self.colorspace(input)?;
                let display_def = display::find_display(display)
                    .ok_or_else(|| TransformError::UnknownDisplay(display.clone()))?;
                let view_def =
                    display_def
                        .find_view(view)
                        .ok_or_else(|| TransformError::UnknownView {
                            display: display.clone(),
                            view: view.clone(),
                        })?;
                if input.is_data || view_def == display::View::Raw {
                    Processor::noop()
                } else {
                    let mut ops = to_reference(input);
                    ops.push(Op::Exposure(self.exposure));
                    if view_def == display::View::Tonemapped {
                        ops.push(Op::Tonemap);
                    }
                    ops.push(Op::Encode(display_def.encoding));
                    ops.push(Op::Gamma(self.gamma));
                    Processor::new(ops)
                }
            }
        };
        Ok(processor.optimize())
    }

    fn find_lut(&self, path: &Path) -> Result<PathBuf, TransformError> {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        if path.is_absolute() {
            return Err(TransformError::LutNotFound(path.to_path_buf()));
        }
        self.search_path
            .iter()
            .map(|dir| dir.join(path))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| TransformError::LutNotFound(path.to_path_buf()))
    }
}

fn to_reference(cs: &ColorSpace) -> Vec<Op> {
    vec![Op::Decode(cs.transfer), Op::Matrix(cs.to_reference)]
}

fn from_reference(cs: &ColorSpace) -> Result<Vec<Op>, TransformError> {
    let inverse = colorspace::mat3_inverse(&cs.to_reference)
        .ok_or_else(|| TransformError::NotInvertible(cs.name.to_string()))?;
    Ok(vec![Op::Matrix(inverse), Op::Encode(cs.transfer)])
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use approx::assert_abs_diff_eq;

    use super::{
        DynamicProperty, Op, Processor, TransformContext, TransformError, TransformRequest,
        colorspace::{IDENTITY, Transfer},
    };

    fn pair(src: &str, dst: &str) -> TransformRequest {
        TransformRequest::ColorspacePair {
            src: src.to_string(),
            dst: dst.to_string(),
        }
    }

    #[test]
    fn identical_and_raw_pairs_are_noops() {
        let ctx = TransformContext::default();
        assert!(ctx.resolve(&pair("acescg", "ACEScg")).unwrap().is_noop());
        assert!(ctx.resolve(&pair("linear", "lin_rec709")).unwrap().is_noop());
        assert!(ctx.resolve(&pair("raw", "srgb")).unwrap().is_noop());
        assert!(!ctx.resolve(&pair("srgb", "acescg")).unwrap().is_noop());
    }

    #[test]
    fn srgb_to_linear_decodes() {
        let ctx = TransformContext::default();
        let processor = ctx.resolve(&pair("srgb", "lin_rec709")).unwrap();
        assert_eq!(processor.ops(), &[Op::Decode(Transfer::Srgb)]);
        let out = processor.apply_rgb([1.0, 0.5, 0.0]);
        assert_abs_diff_eq!(out[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], 0.214_041, epsilon = 1e-5);
        assert_abs_diff_eq!(out[2], 0.0);
    }

    #[test]
    fn acescg_and_acescct_share_primaries() {
        let ctx = TransformContext::default();
        let processor = ctx.resolve(&pair("acescg", "acescct")).unwrap();
        assert_eq!(processor.ops(), &[Op::Encode(Transfer::AcesCct)]);
    }

    #[test]
    fn round_trip_through_aces_preserves_values() {
        let ctx = TransformContext::default();
        let there = ctx.resolve(&pair("srgb", "aces2065-1")).unwrap();
        let back = ctx.resolve(&pair("aces2065-1", "srgb")).unwrap();
        let rgb = [0.8, 0.4, 0.1];
        let out = back.apply_rgb(there.apply_rgb(rgb));
        for c in 0..3 {
            assert_abs_diff_eq!(out[c], rgb[c], epsilon = 1e-4);
        }
    }

    #[test]
    fn optimize_folds_matrices_and_drops_identity() {
        let scale = [2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0];
        let half = [0.5, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.5];
        let processor = Processor::new(vec![
            Op::Matrix(IDENTITY),
            Op::Matrix(scale),
            Op::Matrix(half),
            Op::Decode(Transfer::Linear),
        ]);
        assert!(processor.optimize().ops().is_empty());
        assert!(!processor.is_noop());
    }

    #[test]
    fn config_aliases_extend_builtin_names() {
        let mut ctx = TransformContext::default();
        ctx.aliases
            .insert("studio_linear".to_string(), "acescg".to_string());
        assert_eq!(ctx.colorspace("Studio_Linear").unwrap().name, "acescg");
        assert!(matches!(
            ctx.colorspace("unknown").unwrap_err(),
            TransformError::UnknownColorSpace(_)
        ));
    }

    #[test]
    fn display_view_exposes_dynamic_properties() {
        let mut ctx = TransformContext::default();
        ctx.exposure = 1.0;
        let request = TransformRequest::DisplayView {
            input: "lin_rec709".to_string(),
            display: "sRGB".to_string(),
            view: "Standard".to_string(),
        };
        let processor = ctx.resolve(&request).unwrap();
        assert_eq!(
            processor.dynamic_properties(),
            vec![(DynamicProperty::Exposure, 1.0), (DynamicProperty::Gamma, 1.0)]
        );
        let out = processor.apply_rgb([0.09, 0.09, 0.09]);
        assert_abs_diff_eq!(out[0], Transfer::Srgb.encode(0.18), epsilon = 1e-5);
    }

    #[test]
    fn raw_view_and_unknown_names() {
        let ctx = TransformContext::default();
        let view = |display: &str, view: &str| TransformRequest::DisplayView {
            input: "acescg".to_string(),
            display: display.to_string(),
            view: view.to_string(),
        };
        assert!(ctx.resolve(&view("Rec.1886", "Raw")).unwrap().is_noop());
        assert!(matches!(
            ctx.resolve(&view("P3", "Standard")).unwrap_err(),
            TransformError::UnknownDisplay(_)
        ));
        assert!(matches!(
            ctx.resolve(&view("sRGB", "Filmic")).unwrap_err(),
            TransformError::UnknownView { .. }
        ));
    }

    #[test]
    fn lut_paths_resolve_through_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("invert.cube")).unwrap();
        writeln!(file, "LUT_1D_SIZE 2\n1 1 1\n0 0 0").unwrap();

        let mut ctx = TransformContext::default();
        let request = TransformRequest::LutFile("invert.cube".into());
        assert!(matches!(
            ctx.resolve(&request).unwrap_err(),
            TransformError::LutNotFound(_)
        ));

        ctx.search_path.push(dir.path().to_path_buf());
        let processor = ctx.resolve(&request).unwrap();
        let out = processor.apply_rgb([0.25, 0.5, 1.0]);
        assert_abs_diff_eq!(out[0], 0.75);
        assert_abs_diff_eq!(out[1], 0.5);
        assert_abs_diff_eq!(out[2], 0.0);
    }
}
