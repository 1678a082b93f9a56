//! `wgpu` implementation of [`GraphicsApi`]: an offscreen `Rgba32Float`
//! render target drawn with one textured quad.

use std::sync::{OnceLock, mpsc};

use tracing::debug;
use wgpu::util::DeviceExt;

use crate::color::shader::{LutDimension, LutTexture, ShaderDesc};
use crate::processing::gpu_pipeline::{
    AdapterInfo, COLOR_BIND_GROUP, GpuError, GraphicsApi,
};

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const TEXEL_BYTES: u32 = 16;
const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.1,
    g: 0.1,
    b: 0.1,
    a: 0.0,
};
const VIEW_BIND_GROUP: u32 = 1;
const NEAR: f32 = -100.0;
const FAR: f32 = 100.0;

const VERTEX_SHADER_SRC: &str = r#"
struct View {
    projection: mat4x4<f32>,
}
@group(1) @binding(0) var<uniform> view: View;
@group(0) @binding(0) var source_image: texture_2d<f32>;

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOut {
    var out: VertexOut;
    out.position = view.projection * vec4<f32>(position, 0.0, 1.0);
    out.uv = uv;
    return out;
}
"#;

/// Fragment entry point sampling the source image and passing each texel
/// through the processor function `function_name`.
fn fragment_shader_src(function_name: &str) -> String {
    format!(
        r#"@fragment
fn fs_main(frag: VertexOut) -> @location(0) vec4<f32> {{
    let dims = vec2<f32>(textureDimensions(source_image));
    let texel = vec2<i32>(clamp(frag.uv * dims, vec2<f32>(0.0), dims - vec2<f32>(1.0)));
    return {}(textureLoad(source_image, texel, 0));
}}
"#,
        function_name
    )
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct QuadVertex {
    position: [f32; 2],
    uv: [f32; 2],
}

/// Triangle-strip quad covering `width × height`. Buffer row 0 is drawn at
/// the top of the target, so read-back rows come out in source order.
fn quad_vertices(width: f32, height: f32) -> [QuadVertex; 4] {
    [
        QuadVertex {
            position: [0.0, height],
            uv: [0.0, 0.0],
        },
        QuadVertex {
            position: [0.0, 0.0],
            uv: [0.0, 1.0],
        },
        QuadVertex {
            position: [width, height],
            uv: [1.0, 0.0],
        },
        QuadVertex {
            position: [width, 0.0],
            uv: [1.0, 1.0],
        },
    ]
}

/// Column-major orthographic projection with depth mapped to `[0, 1]`.
#[rustfmt::skip]
fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> [f32; 16] {
    let rl = right - left;
    let tb = top - bottom;
    let fnr = far - near;
    [
        2.0 / rl, 0.0, 0.0, 0.0,
        0.0, 2.0 / tb, 0.0, 0.0,
        0.0, 0.0, 1.0 / fnr, 0.0,
        -(right + left) / rl, -(top + bottom) / tb, -near / fnr, 1.0,
    ]
}

fn expand_to_rgba(pixels: &[f32], channels: usize) -> Vec<f32> {
    if channels == 4 {
        return pixels.to_vec();
    }
    pixels
        .chunks_exact(channels)
        .flat_map(|px| [px[0], px[1], px[2], 1.0])
        .collect()
}

fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width.saturating_mul(TEXEL_BYTES);
    unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

static AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Returns whether a usable adapter exists on this machine.
pub fn is_available() -> bool {
    *AVAILABLE.get_or_init(|| WgpuApi::default().create_context().is_ok())
}

pub struct WgpuApi {
    backends: wgpu::Backends,
}

impl Default for WgpuApi {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::PRIMARY,
        }
    }
}

pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: wgpu::AdapterInfo,
}

pub struct WgpuImage {
    source: wgpu::Texture,
    target: wgpu::Texture,
    width: u32,
    height: u32,
    channels: usize,
    view_bind_group_layout: wgpu::BindGroupLayout,
    view_bind_group: wgpu::BindGroup,
    vertices: wgpu::Buffer,
}

pub struct WgpuProgram {
    pipeline: wgpu::RenderPipeline,
    color_bind_group: wgpu::BindGroup,
    // Bound through `color_bind_group`; kept alive with it.
    _luts: Vec<wgpu::Texture>,
    _uniforms: Option<wgpu::Buffer>,
}

fn texture_entry(
    binding: u32,
    dimension: wgpu::TextureViewDimension,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: dimension,
            multisampled: false,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn create_lut_texture(ctx: &WgpuContext, lut: &LutTexture) -> wgpu::Texture {
    let dimension = match lut.dimension {
        LutDimension::OneD => wgpu::TextureDimension::D2,
        LutDimension::ThreeD => wgpu::TextureDimension::D3,
    };
    let size = wgpu::Extent3d {
        width: lut.width,
        height: lut.height,
        depth_or_array_layers: lut.depth,
    };
    let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(&lut.name),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension,
        format: TEXTURE_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    ctx.queue.write_texture(
        texture.as_image_copy(),
        bytemuck::cast_slice(&lut.data),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(lut.width * TEXEL_BYTES),
            rows_per_image: Some(lut.height),
        },
        size,
    );
    texture
}

impl WgpuApi {
    fn clear(&self, ctx: &WgpuContext, target: &wgpu::Texture) {
        let view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("colorconvert_clear"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("colorconvert_clear_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        ctx.queue.submit([encoder.finish()]);
    }
}

impl GraphicsApi for WgpuApi {
    type Context = WgpuContext;
    type ImageTarget = WgpuImage;
    type Program = WgpuProgram;

    fn create_context(&mut self) -> Result<WgpuContext, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: self.backends,
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .ok_or(GpuError::NoAdapter)?;

        let needed = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;
        let features = adapter.get_texture_format_features(TEXTURE_FORMAT);
        if !features.allowed_usages.contains(needed) {
            return Err(GpuError::FeatureLevel(format!(
                "{:?} cannot be rendered to and sampled",
                TEXTURE_FORMAT
            )));
        }

        let info = adapter.get_info();
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("colorconvert_device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| GpuError::DeviceCreation(e.to_string()))?;
        Ok(WgpuContext {
            device,
            queue,
            info,
        })
    }

    fn adapter_info(&self, ctx: &WgpuContext) -> AdapterInfo {
        let driver = if ctx.info.driver.trim().is_empty() {
            "unknown".to_string()
        } else {
            ctx.info.driver.clone()
        };
        AdapterInfo {
            name: ctx.info.name.clone(),
            backend: format!("{:?}", ctx.info.backend),
            driver,
        }
    }

    fn create_image_target(
        &mut self,
        ctx: &WgpuContext,
        pixels: &[f32],
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<WgpuImage, GpuError> {
        let max = ctx.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max as usize || height > max as usize {
            return Err(GpuError::ImageTooLarge { width, height, max });
        }
        let expected = width * height * channels;
        if pixels.len() != expected {
            return Err(GpuError::BufferSize {
                expected,
                actual: pixels.len(),
            });
        }
        let (w, h) = (width as u32, height as u32);
        let extent = wgpu::Extent3d {
            width: w,
            height: h,
            depth_or_array_layers: 1,
        };

        let source = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("colorconvert_source"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let rgba = expand_to_rgba(pixels, channels);
        ctx.queue.write_texture(
            source.as_image_copy(),
            bytemuck::cast_slice(&rgba),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(w * TEXEL_BYTES),
                rows_per_image: Some(h),
            },
            extent,
        );

        let target = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("colorconvert_target"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        self.clear(ctx, &target);

        let projection = orthographic(0.0, w as f32, 0.0, h as f32, NEAR, FAR);
        let projection = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("colorconvert_projection"),
                contents: bytemuck::cast_slice(&projection),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let view_bind_group_layout =
            ctx.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("colorconvert_view_bgl"),
                    entries: &[uniform_entry(0, wgpu::ShaderStages::VERTEX)],
                });
        let view_bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("colorconvert_view_bg"),
            layout: &view_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: projection.as_entire_binding(),
            }],
        });
        let vertices = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("colorconvert_quad"),
                contents: bytemuck::cast_slice(&quad_vertices(w as f32, h as f32)),
                usage: wgpu::BufferUsages::VERTEX,
            });

        Ok(WgpuImage {
            source,
            target,
            width: w,
            height: h,
            channels,
            view_bind_group_layout,
            view_bind_group,
            vertices,
        })
    }

    fn program_source(&self, shader: &ShaderDesc) -> String {
        format!(
            "{}\n{}\n{}",
            VERTEX_SHADER_SRC.trim_start(),
            shader.source,
            fragment_shader_src(&shader.function_name)
        )
    }

    fn build_program(
        &mut self,
        ctx: &WgpuContext,
        target: &WgpuImage,
        shader: &ShaderDesc,
    ) -> Result<WgpuProgram, GpuError> {
        let mut entries = vec![texture_entry(0, wgpu::TextureViewDimension::D2)];
        for lut in &shader.textures {
            let dimension = match lut.dimension {
                LutDimension::OneD => wgpu::TextureViewDimension::D2,
                LutDimension::ThreeD => wgpu::TextureViewDimension::D3,
            };
            entries.push(texture_entry(lut.binding, dimension));
        }
        if let Some(binding) = shader.uniform_binding {
            entries.push(uniform_entry(binding, wgpu::ShaderStages::FRAGMENT));
        }

        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let color_bgl = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("colorconvert_color_bgl"),
                entries: &entries,
            });
        let source = self.program_source(shader);
        let module = ctx
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("colorconvert_program"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let layout = ctx
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("colorconvert_layout"),
                bind_group_layouts: &[&color_bgl, &target.view_bind_group_layout],
                push_constant_ranges: &[],
            });
        let pipeline = ctx
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("colorconvert_pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<QuadVertex>() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TEXTURE_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

        let luts: Vec<wgpu::Texture> = shader
            .textures
            .iter()
            .map(|lut| create_lut_texture(ctx, lut))
            .collect();
        let uniforms = shader.uniform_binding.map(|_| {
            ctx.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("colorconvert_uniforms"),
                    contents: bytemuck::cast_slice(&shader.uniform_data()),
                    usage: wgpu::BufferUsages::UNIFORM,
                })
        });

        let source_view = target
            .source
            .create_view(&wgpu::TextureViewDescriptor::default());
        let lut_views: Vec<wgpu::TextureView> = luts
            .iter()
            .map(|t| t.create_view(&wgpu::TextureViewDescriptor::default()))
            .collect();
        let mut bind_entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::TextureView(&source_view),
        }];
        for (lut, view) in shader.textures.iter().zip(&lut_views) {
            bind_entries.push(wgpu::BindGroupEntry {
                binding: lut.binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        if let (Some(binding), Some(buffer)) = (shader.uniform_binding, uniforms.as_ref()) {
            bind_entries.push(wgpu::BindGroupEntry {
                binding,
                resource: buffer.as_entire_binding(),
            });
        }
        let color_bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("colorconvert_color_bg"),
            layout: &color_bgl,
            entries: &bind_entries,
        });

        if let Some(err) = pollster::block_on(ctx.device.pop_error_scope()) {
            return Err(GpuError::ShaderBuild(err.to_string()));
        }
        debug!(luts = luts.len(), "render pipeline created");

        Ok(WgpuProgram {
            pipeline,
            color_bind_group,
            _luts: luts,
            _uniforms: uniforms,
        })
    }

    fn render(
        &mut self,
        ctx: &WgpuContext,
        target: &WgpuImage,
        program: &WgpuProgram,
    ) -> Result<(), GpuError> {
        let view = target
            .target
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("colorconvert_render"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("colorconvert_render_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_viewport(0.0, 0.0, target.width as f32, target.height as f32, 0.0, 1.0);
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(COLOR_BIND_GROUP, &program.color_bind_group, &[]);
            pass.set_bind_group(VIEW_BIND_GROUP, &target.view_bind_group, &[]);
            pass.set_vertex_buffer(0, target.vertices.slice(..));
            pass.draw(0..4, 0..1);
        }
        ctx.queue.submit([encoder.finish()]);
        let _ = ctx.device.poll(wgpu::Maintain::wait());
        Ok(())
    }

    fn read_back(
        &mut self,
        ctx: &WgpuContext,
        target: &WgpuImage,
        dst: &mut [f32],
    ) -> Result<(), GpuError> {
        let (w, h) = (target.width, target.height);
        let unpadded = (w * TEXEL_BYTES) as usize;
        let padded = padded_bytes_per_row(w);
        let readback = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("colorconvert_readback"),
            size: padded as u64 * h as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("colorconvert_readback"),
            });
        encoder.copy_texture_to_buffer(
            target.target.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(h),
                },
            },
            wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
        );
        ctx.queue.submit([encoder.finish()]);

        let slice = readback.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = ctx.device.poll(wgpu::Maintain::wait());
        rx.recv()
            .map_err(|e| GpuError::ReadBack(e.to_string()))?
            .map_err(|e| GpuError::ReadBack(e.to_string()))?;

        let mapped = slice.get_mapped_range();
        let channels = target.channels;
        let width = w as usize;
        for (row, out_row) in dst.chunks_exact_mut(width * channels).enumerate() {
            let start = row * padded as usize;
            let texels = mapped[start..start + unpadded].chunks_exact(TEXEL_BYTES as usize);
            for (texel, out) in texels.zip(out_row.chunks_exact_mut(channels)) {
                for (c, value) in out.iter_mut().enumerate() {
                    let bytes = [
                        texel[c * 4],
                        texel[c * 4 + 1],
                        texel[c * 4 + 2],
                        texel[c * 4 + 3],
                    ];
                    *value = f32::from_ne_bytes(bytes);
                }
            }
        }
        drop(mapped);
        readback.unmap();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::{
        WgpuApi, expand_to_rgba, is_available, orthographic, padded_bytes_per_row, quad_vertices,
    };
    use crate::color::shader::{ShaderDesc, ShaderMode};
    use crate::color::{Processor, TransformContext, TransformRequest};
    use crate::processing::buffer::{ElementFormat, PixelBuffer, PixelData};
    use crate::processing::cpu::CpuProcessor;
    use crate::processing::gpu_pipeline::{GpuPipeline, GraphicsApi};

    fn project(m: &[f32; 16], x: f32, y: f32) -> (f32, f32, f32) {
        let px = m[0] * x + m[4] * y + m[12];
        let py = m[1] * x + m[5] * y + m[13];
        let pz = m[14];
        (px, py, pz)
    }

    #[test]
    fn orthographic_maps_image_corners_to_clip_space() {
        let m = orthographic(0.0, 8.0, 0.0, 4.0, -100.0, 100.0);
        assert_eq!(project(&m, 0.0, 0.0), (-1.0, -1.0, 0.5));
        assert_eq!(project(&m, 8.0, 4.0), (1.0, 1.0, 0.5));
    }

    #[test]
    fn quad_puts_first_row_at_the_top() {
        let quad = quad_vertices(4.0, 2.0);
        let top_left = quad.iter().find(|v| v.uv == [0.0, 0.0]).unwrap();
        assert_eq!(top_left.position, [0.0, 2.0]);
        let bottom_right = quad.iter().find(|v| v.uv == [1.0, 1.0]).unwrap();
        assert_eq!(bottom_right.position, [4.0, 0.0]);
    }

    #[test]
    fn rgb_is_expanded_with_opaque_alpha() {
        assert_eq!(
            expand_to_rgba(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6], 3),
            vec![0.1, 0.2, 0.3, 1.0, 0.4, 0.5, 0.6, 1.0]
        );
        assert_eq!(expand_to_rgba(&[1.0, 2.0, 3.0, 4.0], 4), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(16), 256);
        assert_eq!(padded_bytes_per_row(17), 512);
    }

    #[test]
    fn fragment_entry_calls_the_processor_function() {
        let desc = ShaderDesc {
            function_name: "graded_color",
            source: "fn graded_color(c: vec4<f32>) -> vec4<f32> { return c; }".to_string(),
            textures: Vec::new(),
            uniforms: Vec::new(),
            uniform_binding: None,
        };
        let program = WgpuApi::default().program_source(&desc);
        assert!(program.contains("fn vs_main("));
        assert!(program.contains("return graded_color(textureLoad(source_image, texel, 0));"));
        assert!(!program.contains("apply_color_transform"));
        let body = program.find("fn graded_color").unwrap();
        assert!(body < program.find("fn fs_main").unwrap());
    }

    fn run_gpu(buffer: &PixelBuffer, processor: &Processor, mode: ShaderMode) -> Vec<f32> {
        let mut pipeline = GpuPipeline::new(WgpuApi::default());
        pipeline.init().unwrap();
        pipeline.prepare_image(buffer).unwrap();
        pipeline.update_shader(processor, mode).unwrap();
        pipeline.render().unwrap();
        let mut out = vec![0.0; buffer.as_f32().unwrap().len()];
        pipeline.read_back(&mut out).unwrap();
        out
    }

    fn run_cpu(buffer: &PixelBuffer, processor: &Processor) -> Vec<f32> {
        let mut copy = buffer.clone();
        CpuProcessor::new(processor, ElementFormat::F32)
            .apply(&mut copy)
            .unwrap();
        copy.as_f32().unwrap().to_vec()
    }

    fn ramp(width: usize, height: usize, channels: usize) -> PixelBuffer {
        let n = width * height * channels;
        let values = (0..n).map(|i| i as f32 / n as f32).collect();
        PixelBuffer::new(width, height, channels, PixelData::F32(values)).unwrap()
    }

    #[test]
    fn identity_round_trip_is_exact_and_keeps_row_order() {
        if !is_available() {
            return;
        }
        let buffer = ramp(3, 2, 4);
        let out = run_gpu(&buffer, &Processor::noop(), ShaderMode::Full);
        assert_eq!(out, buffer.as_f32().unwrap());
    }

    #[test]
    fn rgb_transform_matches_cpu() {
        if !is_available() {
            return;
        }
        let processor = TransformContext::default()
            .resolve(&TransformRequest::ColorspacePair {
                src: "srgb".to_string(),
                dst: "acescct".to_string(),
            })
            .unwrap();
        let buffer = ramp(5, 3, 3);
        let gpu = run_gpu(&buffer, &processor, ShaderMode::Full);
        let cpu = run_cpu(&buffer, &processor);
        for (g, c) in gpu.iter().zip(&cpu) {
            assert_abs_diff_eq!(*g, *c, epsilon = 1e-4);
        }
    }

    #[test]
    fn display_view_with_uniforms_and_legacy_lut_match_cpu() {
        if !is_available() {
            return;
        }
        let mut ctx = TransformContext::default();
        ctx.exposure = 0.5;
        let processor = ctx
            .resolve(&TransformRequest::DisplayView {
                input: "acescg".to_string(),
                display: "sRGB".to_string(),
                view: "Tonemapped".to_string(),
            })
            .unwrap();
        let buffer = ramp(4, 4, 4);
        let cpu = run_cpu(&buffer, &processor);
        let full = run_gpu(&buffer, &processor, ShaderMode::Full);
        for (g, c) in full.iter().zip(&cpu) {
            assert_abs_diff_eq!(*g, *c, epsilon = 1e-4);
        }

        // Away from black, where the baked lattice is too coarse for the curve.
        let values = (0..64).map(|i| 0.25 + 0.75 * i as f32 / 64.0).collect();
        let bright = PixelBuffer::new(4, 4, 4, PixelData::F32(values)).unwrap();
        let cpu = run_cpu(&bright, &processor);
        let legacy = run_gpu(&bright, &processor, ShaderMode::Legacy { lut_size: 33 });
        for (g, c) in legacy.iter().zip(&cpu) {
            assert_abs_diff_eq!(*g, *c, epsilon = 5e-3);
        }
    }
}
