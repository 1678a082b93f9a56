//! One-shot GPU transform pipeline.
//!
//! The pipeline walks an explicit state machine, acquiring resources from a
//! [`GraphicsApi`] as it goes:
//!
//! `Created → Initialized → ImagePrepared → ShaderUpdated → ImageProcessed → ImageRead`
//!
//! Every operation checks the state it requires before touching the API, so an
//! out-of-order call fails with [`GpuError::Precondition`] and has no side
//! effect. Construct one pipeline per process; it is not meant to be shared
//! between threads.

use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::color::Processor;
use crate::color::shader::{self, ShaderDesc, ShaderMode};
use crate::processing::buffer::{ElementFormat, PixelBuffer};

/// Bind group used for the image texture, LUTs and dynamic uniforms. The
/// image texture always takes binding 0; processor resources follow.
pub const COLOR_BIND_GROUP: u32 = 0;
pub const FIRST_PROCESSOR_BINDING: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    Created,
    Initialized,
    ImagePrepared,
    ShaderUpdated,
    ImageProcessed,
    ImageRead,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Created => "created",
            PipelineState::Initialized => "initialized",
            PipelineState::ImagePrepared => "image prepared",
            PipelineState::ShaderUpdated => "shader updated",
            PipelineState::ImageProcessed => "image processed",
            PipelineState::ImageRead => "image read",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("{operation} requires the pipeline to be {expected}, but it is {actual}")]
    Precondition {
        operation: &'static str,
        expected: PipelineState,
        actual: PipelineState,
    },
    #[error("GPU processing needs 3 or 4 channels, image has {0}")]
    UnsupportedChannelCount(usize),
    #[error("GPU processing needs float pixels, image is {0}")]
    NotFloat(ElementFormat),
    #[error("buffer holds {actual} floats, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("no compatible graphics adapter found")]
    NoAdapter,
    #[error("graphics adapter lacks required capability: {0}")]
    FeatureLevel(String),
    #[error("failed to create graphics device: {0}")]
    DeviceCreation(String),
    #[error("shader program failed to build: {0}")]
    ShaderBuild(String),
    #[error("failed to read back rendered image: {0}")]
    ReadBack(String),
    #[error("image {width}x{height} exceeds the device texture limit of {max}")]
    ImageTooLarge { width: usize, height: usize, max: u32 },
}

/// Adapter details for verbose output.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub backend: String,
    pub driver: String,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, driver {})", self.name, self.backend, self.driver)
    }
}

/// Graphics primitives the pipeline sequences.
///
/// `ImageTarget` bundles the uploaded source texture with the render target
/// it is drawn into; `Program` is a compiled shader with its bound LUTs and
/// uniforms. Pixel data crossing this trait is `width × height × channels`
/// floats, rows top to bottom, with `channels` 3 or 4.
pub trait GraphicsApi {
    type Context;
    type ImageTarget;
    type Program;

    fn create_context(&mut self) -> Result<Self::Context, GpuError>;

    fn adapter_info(&self, ctx: &Self::Context) -> AdapterInfo;

    fn create_image_target(
        &mut self,
        ctx: &Self::Context,
        pixels: &[f32],
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<Self::ImageTarget, GpuError>;

    /// Complete program text for `shader`, as compiled by `build_program`.
    fn program_source(&self, shader: &ShaderDesc) -> String;

    fn build_program(
        &mut self,
        ctx: &Self::Context,
        target: &Self::ImageTarget,
        shader: &ShaderDesc,
    ) -> Result<Self::Program, GpuError>;

    fn render(
        &mut self,
        ctx: &Self::Context,
        target: &Self::ImageTarget,
        program: &Self::Program,
    ) -> Result<(), GpuError>;

    fn read_back(
        &mut self,
        ctx: &Self::Context,
        target: &Self::ImageTarget,
        dst: &mut [f32],
    ) -> Result<(), GpuError>;
}

pub struct GpuPipeline<G: GraphicsApi> {
    api: G,
    state: PipelineState,
    // Field order is drop order: program, image, then context.
    program: Option<G::Program>,
    shader: Option<ShaderDesc>,
    image: Option<G::ImageTarget>,
    context: Option<G::Context>,
    width: usize,
    height: usize,
    channels: usize,
}

impl<G: GraphicsApi> GpuPipeline<G> {
    pub fn new(api: G) -> Self {
        Self {
            api,
            state: PipelineState::Created,
            program: None,
            shader: None,
            image: None,
            context: None,
            width: 0,
            height: 0,
            channels: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn adapter_info(&self) -> Option<AdapterInfo> {
        self.context.as_ref().map(|ctx| self.api.adapter_info(ctx))
    }

    pub fn program_source(&self) -> Option<String> {
        self.shader.as_ref().map(|s| self.api.program_source(s))
    }

    fn require(&self, operation: &'static str, expected: PipelineState) -> Result<(), GpuError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(GpuError::Precondition {
                operation,
                expected,
                actual: self.state,
            })
        }
    }

    /// Acquires the graphics context. A no-op once past `Created`.
    pub fn init(&mut self) -> Result<(), GpuError> {
        if self.state != PipelineState::Created {
            return Ok(());
        }
        let context = self.api.create_context()?;
        debug!(adapter = %self.api.adapter_info(&context), "gpu context ready");
        self.context = Some(context);
        self.state = PipelineState::Initialized;
        Ok(())
    }

    /// Uploads `buffer` and allocates a render target of the same size.
    /// The buffer must already hold 32-bit floats.
    pub fn prepare_image(&mut self, buffer: &PixelBuffer) -> Result<(), GpuError> {
        self.require("prepare_image", PipelineState::Initialized)?;
        let channels = buffer.channels();
        if channels != 3 && channels != 4 {
            return Err(GpuError::UnsupportedChannelCount(channels));
        }
        let pixels = buffer
            .as_f32()
            .ok_or(GpuError::NotFloat(buffer.format()))?;
        let Some(ctx) = self.context.as_ref() else {
            return Err(GpuError::Precondition {
                operation: "prepare_image",
                expected: PipelineState::Initialized,
                actual: PipelineState::Created,
            });
        };
        let target =
            self.api
                .create_image_target(ctx, pixels, buffer.width(), buffer.height(), channels)?;
        self.image = Some(target);
        self.width = buffer.width();
        self.height = buffer.height();
        self.channels = channels;
        self.state = PipelineState::ImagePrepared;
        debug!(
            width = self.width,
            height = self.height,
            channels,
            "image uploaded"
        );
        Ok(())
    }

    /// Generates and builds the fragment program for `processor`.
    pub fn update_shader(
        &mut self,
        processor: &Processor,
        mode: ShaderMode,
    ) -> Result<(), GpuError> {
        self.require("update_shader", PipelineState::ImagePrepared)?;
        let desc = shader::generate(processor, mode, COLOR_BIND_GROUP, FIRST_PROCESSOR_BINDING);
        let (Some(ctx), Some(image)) = (self.context.as_ref(), self.image.as_ref()) else {
            return Err(self.missing_resources("update_shader"));
        };
        let program = self.api.build_program(ctx, image, &desc)?;
        debug!(
            luts = desc.textures.len(),
            uniforms = desc.uniforms.len(),
            "shader program built"
        );
        self.program = Some(program);
        self.shader = Some(desc);
        self.state = PipelineState::ShaderUpdated;
        Ok(())
    }

    pub fn render(&mut self) -> Result<(), GpuError> {
        self.require("render", PipelineState::ShaderUpdated)?;
        let (Some(ctx), Some(image), Some(program)) =
            (self.context.as_ref(), self.image.as_ref(), self.program.as_ref())
        else {
            return Err(self.missing_resources("render"));
        };
        self.api.render(ctx, image, program)?;
        self.state = PipelineState::ImageProcessed;
        Ok(())
    }

    /// Copies the rendered image into `dst`, which must hold exactly
    /// `width × height × channels` floats of the prepared image.
    pub fn read_back(&mut self, dst: &mut [f32]) -> Result<(), GpuError> {
        self.require("read_back", PipelineState::ImageProcessed)?;
        let expected = self.width * self.height * self.channels;
        if dst.len() != expected {
            return Err(GpuError::BufferSize {
                expected,
                actual: dst.len(),
            });
        }
        let (Some(ctx), Some(image)) = (self.context.as_ref(), self.image.as_ref()) else {
            return Err(self.missing_resources("read_back"));
        };
        self.api.read_back(ctx, image, dst)?;
        self.state = PipelineState::ImageRead;
        Ok(())
    }

    /// Drops image and program resources, keeping the context, so another
    /// image can be prepared.
    pub fn reset(&mut self) -> Result<(), GpuError> {
        if self.state < PipelineState::Initialized {
            return Err(GpuError::Precondition {
                operation: "reset",
                expected: PipelineState::Initialized,
                actual: self.state,
            });
        }
        self.program = None;
        self.shader = None;
        self.image = None;
        self.state = PipelineState::Initialized;
        Ok(())
    }

    /// Releases every resource, context included.
    pub fn teardown(&mut self) {
        self.program = None;
        self.shader = None;
        self.image = None;
        self.context = None;
        self.state = PipelineState::Created;
    }

    fn missing_resources(&self, operation: &'static str) -> GpuError {
        GpuError::Precondition {
            operation,
            expected: self.state,
            actual: PipelineState::Created,
        }
    }
}

impl<G: GraphicsApi> Drop for GpuPipeline<G> {
    fn drop(&mut self) {
        self.teardown();
    }
}


#[cfg(test)]
mod tests {
    use super::recording::{Log, RecordingApi};
    use super::{GpuError, GpuPipeline, PipelineState};
    use crate::color::Processor;
    use crate::color::shader::ShaderMode;
    use crate::processing::buffer::{ElementFormat, PixelBuffer, PixelData};

    fn pipeline() -> (GpuPipeline<RecordingApi>, Log) {
        let (api, log) = RecordingApi::new();
        (GpuPipeline::new(api), log)
    }

    fn rgba_image() -> PixelBuffer {
        PixelBuffer::new(2, 2, 4, PixelData::F32((0..16).map(|v| v as f32).collect())).unwrap()
    }

    #[test]
    fn full_cycle_walks_every_state() {
        let (mut p, log) = pipeline();
        assert_eq!(p.state(), PipelineState::Created);
        p.init().unwrap();
        assert_eq!(p.adapter_info().unwrap().name, "mock");
        p.prepare_image(&rgba_image()).unwrap();
        p.update_shader(&Processor::noop(), ShaderMode::Full).unwrap();
        assert!(p.program_source().unwrap().contains("apply_color_transform"));
        p.render().unwrap();
        let mut out = vec![0.0; 16];
        p.read_back(&mut out).unwrap();
        assert_eq!(p.state(), PipelineState::ImageRead);
        assert_eq!(out, rgba_image().as_f32().unwrap());
        assert_eq!(
            *log.borrow(),
            ["create_context", "create_image_target", "build_program", "render", "read_back"]
        );
    }

    #[test]
    fn init_is_a_noop_once_initialized() {
        let (mut p, log) = pipeline();
        p.init().unwrap();
        p.init().unwrap();
        assert_eq!(*log.borrow(), ["create_context"]);
    }

    #[test]
    fn out_of_order_calls_fail_without_touching_the_api() {
        let (mut p, log) = pipeline();
        let err = p.prepare_image(&rgba_image()).unwrap_err();
        assert!(matches!(
            err,
            GpuError::Precondition {
                operation: "prepare_image",
                expected: PipelineState::Initialized,
                actual: PipelineState::Created,
            }
        ));
        assert!(p.update_shader(&Processor::noop(), ShaderMode::Full).is_err());
        assert!(p.render().is_err());
        assert!(p.read_back(&mut []).is_err());

        p.init().unwrap();
        p.prepare_image(&rgba_image()).unwrap();
        let err = p.render().unwrap_err();
        assert!(matches!(
            err,
            GpuError::Precondition {
                operation: "render",
                expected: PipelineState::ShaderUpdated,
                actual: PipelineState::ImagePrepared,
            }
        ));
        assert!(p.prepare_image(&rgba_image()).is_err());
        assert_eq!(*log.borrow(), ["create_context", "create_image_target"]);
        assert_eq!(p.state(), PipelineState::ImagePrepared);
    }

    #[test]
    fn prepare_rejects_unsupported_channel_counts_before_allocating() {
        let (mut p, log) = pipeline();
        p.init().unwrap();
        for channels in [1, 2, 5] {
            let buf = PixelBuffer::zeroed(2, 2, channels, ElementFormat::F32);
            let err = p.prepare_image(&buf).unwrap_err();
            assert!(matches!(err, GpuError::UnsupportedChannelCount(c) if c == channels));
        }
        let err = p
            .prepare_image(&PixelBuffer::zeroed(2, 2, 3, ElementFormat::U8))
            .unwrap_err();
        assert!(matches!(err, GpuError::NotFloat(ElementFormat::U8)));
        assert_eq!(p.state(), PipelineState::Initialized);
        assert_eq!(*log.borrow(), ["create_context"]);
    }

    #[test]
    fn read_back_checks_destination_size() {
        let (mut p, _log) = pipeline();
        p.init().unwrap();
        p.prepare_image(&rgba_image()).unwrap();
        p.update_shader(&Processor::noop(), ShaderMode::Full).unwrap();
        p.render().unwrap();
        let mut short = vec![0.0; 12];
        let err = p.read_back(&mut short).unwrap_err();
        assert!(matches!(err, GpuError::BufferSize { expected: 16, actual: 12 }));
        assert_eq!(p.state(), PipelineState::ImageProcessed);
    }

    #[test]
    fn reset_returns_to_initialized_and_keeps_the_context() {
        let (mut p, log) = pipeline();
        assert!(p.reset().is_err());
        p.init().unwrap();
        p.prepare_image(&rgba_image()).unwrap();
        p.update_shader(&Processor::noop(), ShaderMode::Full).unwrap();
        p.reset().unwrap();
        assert_eq!(p.state(), PipelineState::Initialized);
        assert!(p.program_source().is_none());
        p.prepare_image(&rgba_image()).unwrap();
        assert_eq!(
            *log.borrow(),
            ["create_context", "create_image_target", "build_program", "create_image_target"]
        );
    }

    #[test]
    fn teardown_and_drop_release_the_context() {
        let (mut p, log) = pipeline();
        p.init().unwrap();
        p.teardown();
        assert_eq!(p.state(), PipelineState::Created);
        assert_eq!(log.borrow().last(), Some(&"drop_context"));

        p.init().unwrap();
        drop(p);
        assert_eq!(
            *log.borrow(),
            ["create_context", "drop_context", "create_context", "drop_context"]
        );
    }
}
