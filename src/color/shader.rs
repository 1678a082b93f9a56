//! WGSL generation for a [`Processor`].
//!
//! The generated source declares the processor's LUT textures and uniform
//! block in a caller-chosen bind group, starting at a caller-chosen binding,
//! and defines `apply_color_transform(vec4<f32>) -> vec4<f32>`. Alpha passes
//! through. LUTs are sampled with `textureLoad` and interpolated in the
//! shader, so `Rgba32Float` textures work without filterable-float support.

use std::fmt::Write as _;
use std::sync::Arc;

use super::colorspace::{
    ACESCCT_A, ACESCCT_B, ACESCCT_X_BRK, ACESCCT_Y_BRK, Mat3, Transfer,
};
use super::display::TONEMAP_WHITE;
use super::lut::{Lut1d, Lut3d};
use super::{DynamicProperty, Op, Processor};

pub const FUNCTION_NAME: &str = "apply_color_transform";

/// Widest row of a 1D LUT texture. Longer LUTs wrap onto further rows.
pub const MAX_LUT_WIDTH: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderMode {
    /// One op per processor step, dynamic properties as uniforms.
    Full,
    /// The whole processor baked into a single `lut_size³` 3D LUT over
    /// `[0, 1]`. Dynamic properties are frozen at their current values.
    Legacy { lut_size: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LutDimension {
    /// Stored as a 2D texture of rows at most [`MAX_LUT_WIDTH`] wide,
    /// entry `i` at `(i % width, i / width)`.
    OneD,
    /// Stored as a `size³` 3D texture, red along x.
    ThreeD,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LutTexture {
    pub name: String,
    pub binding: u32,
    pub dimension: LutDimension,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// RGBA texels, alpha 1.
    pub data: Vec<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UniformDesc {
    pub property: DynamicProperty,
    pub value: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShaderDesc {
    pub function_name: &'static str,
    pub source: String,
    pub textures: Vec<LutTexture>,
    pub uniforms: Vec<UniformDesc>,
    /// Binding of the uniform block; `None` when there are no uniforms.
    pub uniform_binding: Option<u32>,
}

impl ShaderDesc {
    /// Uniform block contents, padded to a multiple of 16 bytes.
    pub fn uniform_data(&self) -> Vec<f32> {
        let mut data: Vec<f32> = self.uniforms.iter().map(|u| u.value).collect();
        data.resize(data.len().div_ceil(4) * 4, 0.0);
        data
    }
}

pub fn generate(
    processor: &Processor,
    mode: ShaderMode,
    group: u32,
    first_binding: u32,
) -> ShaderDesc {
    match mode {
        ShaderMode::Legacy { lut_size } if !processor.is_noop() => {
            let baked = Lut3d::bake(lut_size.max(2), |rgb| processor.apply_rgb(rgb));
            let baked = Processor::new(vec![Op::Lut3d(Arc::new(baked))]);
            Generator::new(group, first_binding).run(&baked)
        }
        _ => Generator::new(group, first_binding).run(processor),
    }
}

fn lit(v: f32) -> String {
    format!("{:?}", v)
}

fn vec3_lit(v: [f32; 3]) -> String {
    format!("vec3<f32>({}, {}, {})", lit(v[0]), lit(v[1]), lit(v[2]))
}

fn matrix_expr(m: &Mat3) -> String {
    let row = |r: usize| vec3_lit([m[r * 3], m[r * 3 + 1], m[r * 3 + 2]]);
    format!(
        "vec3<f32>(dot({}, rgb), dot({}, rgb), dot({}, rgb))",
        row(0),
        row(1),
        row(2)
    )
}

fn inverse_span(min: [f32; 3], max: [f32; 3]) -> [f32; 3] {
    let mut out = [0.0; 3];
    for c in 0..3 {
        let span = max[c] - min[c];
        out[c] = if span.abs() < f32::EPSILON { 0.0 } else { 1.0 / span };
    }
    out
}

fn rgba(table: &[[f32; 3]]) -> Vec<f32> {
    table.iter().flat_map(|&[r, g, b]| [r, g, b, 1.0]).collect()
}

struct Generator {
    group: u32,
    next_binding: u32,
    helpers: Vec<(String, String)>,
    body: Vec<String>,
    textures: Vec<LutTexture>,
    uniforms: Vec<UniformDesc>,
}

impl Generator {
    fn new(group: u32, first_binding: u32) -> Self {
        Self {
            group,
            next_binding: first_binding,
            helpers: Vec::new(),
            body: Vec::new(),
            textures: Vec::new(),
            uniforms: Vec::new(),
        }
    }

    fn helper(&mut self, name: &str, source: String) {
        if !self.helpers.iter().any(|(n, _)| n == name) {
            self.helpers.push((name.to_string(), source));
        }
    }

    fn uniform(&mut self, property: DynamicProperty, value: f32) -> String {
        if !self.uniforms.iter().any(|u| u.property == property) {
            self.uniforms.push(UniformDesc { property, value });
        }
        format!("cc_uniforms.{}", property.uniform_name())
    }

    fn transfer(&mut self, transfer: Transfer, encode: bool) -> String {
        let (name, expr) = match (transfer, encode) {
            (Transfer::Linear, _) => return "rgb".to_string(),
            (Transfer::Gamma(g), false) => {
                self.pow_mirror_helper();
                return format!("cc_pow_mirror(rgb, {})", lit(g));
            }
            (Transfer::Gamma(g), true) => {
                self.pow_mirror_helper();
                return format!("cc_pow_mirror(rgb, {})", lit(1.0 / g));
            }
            (Transfer::Srgb, false) => (
                "cc_srgb_decode",
                concat!(
                    "select(pow((v + 0.055) / 1.055, ",
                    "vec3<f32>(2.4)), v / 12.92, v <= vec3<f32>(0.04045))"
                )
                .to_string(),
            ),
            (Transfer::Srgb, true) => (
                "cc_srgb_encode",
                concat!(
                    "select(1.055 * pow(v, ",
                    "vec3<f32>(1.0 / 2.4)) - 0.055, v * 12.92, v <= vec3<f32>(0.0031308))"
                )
                .to_string(),
            ),
            (Transfer::Rec709, false) => (
                "cc_rec709_decode",
                concat!(
                    "select(pow((v + 0.099) / 1.099, ",
                    "vec3<f32>(1.0 / 0.45)), v / 4.5, v < vec3<f32>(0.081))"
                )
                .to_string(),
            ),
            (Transfer::Rec709, true) => (
                "cc_rec709_encode",
                "select(1.099 * pow(v, vec3<f32>(0.45)) - 0.099, v * 4.5, v < vec3<f32>(0.018))"
                    .to_string(),
            ),
            (Transfer::AcesCct, false) => (
                "cc_acescct_decode",
                format!(
                    "select(exp2(v * 17.52 - 9.72), (v - {b}) / {a}, v <= vec3<f32>({y}))",
                    a = lit(ACESCCT_A),
                    b = lit(ACESCCT_B),
                    y = lit(ACESCCT_Y_BRK)
                ),
            ),
            (Transfer::AcesCct, true) => (
                "cc_acescct_encode",
                format!(
                    "select((log2(v) + 9.72) / 17.52, {a} * v + {b}, v <= vec3<f32>({x}))",
                    a = lit(ACESCCT_A),
                    b = lit(ACESCCT_B),
                    x = lit(ACESCCT_X_BRK)
                ),
            ),
        };
        self.helper(
            name,
            format!(
                "fn {name}(v: vec3<f32>) -> vec3<f32> {{\n    return {expr};\n}}\n"
            ),
        );
        format!("{name}(rgb)")
    }

    fn pow_mirror_helper(&mut self) {
        self.helper(
            "cc_pow_mirror",
            "fn cc_pow_mirror(v: vec3<f32>, e: f32) -> vec3<f32> {\n    \
             return sign(v) * pow(abs(v), vec3<f32>(e));\n}\n"
                .to_string(),
        );
    }

    fn lut1d(&mut self, lut: &Lut1d) -> String {
        let index = self.textures.len();
        let texture = format!("cc_lut{index}");
        let function = format!("cc_lut1d_{index}");
        let inv = inverse_span(lut.domain_min, lut.domain_max);
        let mut source = String::new();
        let size = lut.size().max(1);
        let width = size.min(MAX_LUT_WIDTH);
        let height = size.div_ceil(width);
        let _ = writeln!(source, "fn {function}(c: vec3<f32>) -> vec3<f32> {{");
        let _ = writeln!(source, "    let last = {};", size - 1);
        let _ = writeln!(
            source,
            "    let t = clamp((c - {}) * {}, vec3<f32>(0.0), vec3<f32>(1.0)) * f32(last);",
            vec3_lit(lut.domain_min),
            vec3_lit(inv)
        );
        source.push_str("    let p0 = vec3<i32>(floor(t));\n");
        source.push_str("    let p1 = min(p0 + vec3<i32>(1), vec3<i32>(last));\n");
        source.push_str("    let f = t - floor(t);\n");
        source.push_str("    return vec3<f32>(\n");
        for (axis, component) in [("x", "r"), ("y", "g"), ("z", "b")] {
            let texel = |p: &str| {
                let i = format!("{p}.{axis}");
                format!("textureLoad({texture}, vec2<i32>({i} % {width}, {i} / {width}), 0)")
            };
            let _ = writeln!(
                source,
                "        mix({}.{component}, {}.{component}, f.{axis}),",
                texel("p0"),
                texel("p1")
            );
        }
        source.push_str("    );\n}\n");
        self.helper(&function, source);
        let binding = self.take_binding();
        let mut data = rgba(&lut.table);
        data.resize(width * height * 4, 0.0);
        self.textures.push(LutTexture {
            name: texture,
            binding,
            dimension: LutDimension::OneD,
            width: width as u32,
            height: height as u32,
            depth: 1,
            data,
        });
        format!("{function}(rgb)")
    }

    fn lut3d(&mut self, lut: &Lut3d) -> String {
        let index = self.textures.len();
        let texture = format!("cc_lut{index}");
        let function = format!("cc_lut3d_{index}");
        let inv = inverse_span(lut.domain_min, lut.domain_max);
        let mut source = String::new();
        let _ = writeln!(source, "fn {function}(c: vec3<f32>) -> vec3<f32> {{");
        let _ = writeln!(source, "    let last = i32(textureDimensions({texture}).x) - 1;");
        let _ = writeln!(
            source,
            "    let t = clamp((c - {}) * {}, vec3<f32>(0.0), vec3<f32>(1.0)) * f32(last);",
            vec3_lit(lut.domain_min),
            vec3_lit(inv)
        );
        source.push_str("    let p0 = vec3<i32>(floor(t));\n");
        source.push_str("    let p1 = min(p0 + vec3<i32>(1), vec3<i32>(last));\n");
        source.push_str("    let f = t - floor(t);\n");
        for corner in 0..8 {
            let pick = |bit: usize, axis: &str| {
                if corner & bit == 0 {
                    format!("p0.{axis}")
                } else {
                    format!("p1.{axis}")
                }
            };
            let _ = writeln!(
                source,
                "    let c{corner} = textureLoad({texture}, vec3<i32>({}, {}, {}), 0).rgb;",
                pick(1, "x"),
                pick(2, "y"),
                pick(4, "z")
            );
        }
        source.push_str(
            "    let x00 = mix(c0, c1, f.x);\n\
             \x20   let x10 = mix(c2, c3, f.x);\n\
             \x20   let x01 = mix(c4, c5, f.x);\n\
             \x20   let x11 = mix(c6, c7, f.x);\n\
             \x20   return mix(mix(x00, x10, f.y), mix(x01, x11, f.y), f.z);\n}\n",
        );
        self.helper(&function, source);
        let binding = self.take_binding();
        let size = lut.size as u32;
        self.textures.push(LutTexture {
            name: texture,
            binding,
            dimension: LutDimension::ThreeD,
            width: size,
            height: size,
            depth: size,
            data: rgba(&lut.table),
        });
        format!("{function}(rgb)")
    }

    fn take_binding(&mut self) -> u32 {
        let binding = self.next_binding;
        self.next_binding += 1;
        binding
    }

    fn run(mut self, processor: &Processor) -> ShaderDesc {
        for op in processor.ops() {
            let expr = match op {
                Op::Matrix(m) => matrix_expr(m),
                Op::Decode(t) => self.transfer(*t, false),
                Op::Encode(t) => self.transfer(*t, true),
                Op::Lut1d(lut) => self.lut1d(lut),
                Op::Lut3d(lut) => self.lut3d(lut),
                Op::Tonemap => {
                    let white_sq = lit(TONEMAP_WHITE * TONEMAP_WHITE);
                    self.helper(
                        "cc_tonemap",
                        format!(
                            "fn cc_tonemap(v: vec3<f32>) -> vec3<f32> {{\n    \
                             let x = max(v, vec3<f32>(0.0));\n    \
                             return x * (1.0 + x / {white_sq}) / (1.0 + x);\n}}\n"
                        ),
                    );
                    "cc_tonemap(rgb)".to_string()
                }
                Op::Exposure(v) => {
                    let u = self.uniform(DynamicProperty::Exposure, *v);
                    format!("rgb * exp2({u})")
                }
                Op::Gamma(v) => {
                    let u = self.uniform(DynamicProperty::Gamma, *v);
                    self.pow_mirror_helper();
                    format!("cc_pow_mirror(rgb, 1.0 / {u})")
                }
            };
            if expr != "rgb" {
                self.body.push(format!("    rgb = {expr};"));
            }
        }

        let mut source = String::new();
        for texture in &self.textures {
            let ty = match texture.dimension {
                LutDimension::OneD => "texture_2d<f32>",
                LutDimension::ThreeD => "texture_3d<f32>",
            };
            let _ = writeln!(
                source,
                "@group({}) @binding({}) var {}: {};",
                self.group, texture.binding, texture.name, ty
            );
        }
        let uniform_binding = if self.uniforms.is_empty() {
            None
        } else {
            let binding = self.take_binding();
            source.push_str("struct ColorUniforms {\n");
            for uniform in &self.uniforms {
                let _ = writeln!(source, "    {}: f32,", uniform.property.uniform_name());
            }
            for pad in self.uniforms.len()..self.uniforms.len().div_ceil(4) * 4 {
                let _ = writeln!(source, "    _pad{pad}: f32,");
            }
            source.push_str("}\n");
            let _ = writeln!(
                source,
                "@group({}) @binding({}) var<uniform> cc_uniforms: ColorUniforms;",
                self.group, binding
            );
            Some(binding)
        };
        source.push('\n');
        for (_, helper) in &self.helpers {
            source.push_str(helper);
            source.push('\n');
        }
        let _ = writeln!(source, "fn {FUNCTION_NAME}(in_color: vec4<f32>) -> vec4<f32> {{");
        source.push_str("    var rgb = in_color.rgb;\n");
        for line in &self.body {
            source.push_str(line);
            source.push('\n');
        }
        source.push_str("    return vec4<f32>(rgb, in_color.a);\n}\n");

        ShaderDesc {
            function_name: FUNCTION_NAME,
            source,
            textures: self.textures,
            uniforms: self.uniforms,
            uniform_binding,
        }
    }
}
