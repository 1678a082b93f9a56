use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use thiserror::Error;
use tracing::info;

use crate::attributes::{self, Attribute};
use crate::color::shader::ShaderMode;
use crate::color::{Processor, TransformRequest};
use crate::config::AppConfig;
use crate::image_io;
use crate::processing::buffer::{ElementFormat, PixelBuffer};
use crate::processing::channels::{ChannelList, crop_and_select};
use crate::processing::cpu::CpuProcessor;
use crate::processing::gpu_pipeline::{GpuPipeline, GraphicsApi};
use crate::processing::wgpu_api::WgpuApi;

/// Conversion options shared by the three command-line forms.
#[derive(Clone, Debug, Default, clap::Args)]
pub struct Options {
    /// Apply a LUT file: `--lut lutfile inputimage outputimage`.
    #[arg(long)]
    pub lut: bool,
    /// Apply a display/view: `--view inputimage inputcolorspace outputimage displayname viewname`.
    #[arg(long)]
    pub view: bool,
    /// Process on the GPU.
    #[arg(long)]
    pub gpu: bool,
    /// Process on the GPU with the transform baked into one 3D LUT.
    #[arg(long = "gpulegacy")]
    pub gpu_legacy: bool,
    /// Print the generated shader program.
    #[arg(long = "gpuinfo")]
    pub gpu_info: bool,
    /// Print tool, adapter and timing information.
    #[arg(long = "v")]
    pub verbose: bool,
    /// Header attribute to set, repeatable.
    #[arg(long = "float-attribute", value_name = "NAME=FLOAT")]
    pub float_attributes: Vec<String>,
    #[arg(long = "int-attribute", value_name = "NAME=INT")]
    pub int_attributes: Vec<String>,
    #[arg(long = "string-attribute", value_name = "NAME=VALUE")]
    pub string_attributes: Vec<String>,
    /// Crop or pad so the pixel data region matches the full image window.
    #[arg(long = "croptofull")]
    pub crop_to_full: bool,
    /// Channels to keep, in order (e.g. "2,3,4").
    #[arg(long = "ch", value_name = "LIST")]
    pub channels: Option<String>,
    /// Display/view exposure in stops, overriding the config.
    #[arg(long, allow_hyphen_values = true)]
    pub exposure: Option<f32>,
    /// Display/view gamma, overriding the config.
    #[arg(long)]
    pub gamma: Option<f32>,
    #[arg(value_name = "ARGS")]
    pub args: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Cpu,
    Gpu,
    GpuLegacy,
}

impl Options {
    pub fn backend(&self) -> Backend {
        if self.gpu_legacy {
            Backend::GpuLegacy
        } else if self.gpu {
            Backend::Gpu
        } else {
            Backend::Cpu
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum UsageError {
    #[error("options --lut and --view are mutually exclusive")]
    ConflictingModes,
    #[error("{mode} expects {expected} arguments, got {actual}")]
    ArgumentCount {
        mode: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Crop disabled in GPU mode")]
    CropOnGpu,
}

/// A validated run: everything checked before any file is touched.
#[derive(Debug, PartialEq)]
pub struct Job {
    pub input: PathBuf,
    pub output: PathBuf,
    pub request: TransformRequest,
    pub channels: ChannelList,
    pub attributes: Vec<Attribute>,
    pub backend: Backend,
}

fn expect_args(mode: &'static str, args: &[String], expected: usize) -> Result<(), UsageError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(UsageError::ArgumentCount {
            mode,
            expected,
            actual: args.len(),
        })
    }
}

pub fn plan(options: &Options) -> anyhow::Result<Job> {
    if options.lut && options.view {
        return Err(UsageError::ConflictingModes.into());
    }
    let args = &options.args;
    let (input, output, request) = if options.lut {
        expect_args("--lut", args, 3)?;
        (
            &args[1],
            &args[2],
            TransformRequest::LutFile(PathBuf::from(&args[0])),
        )
    } else if options.view {
        expect_args("--view", args, 5)?;
        (
            &args[0],
            &args[2],
            TransformRequest::DisplayView {
                input: args[1].clone(),
                display: args[3].clone(),
                view: args[4].clone(),
            },
        )
    } else {
        expect_args("colorspace conversion", args, 4)?;
        (
            &args[0],
            &args[2],
            TransformRequest::ColorspacePair {
                src: args[1].clone(),
                dst: args[3].clone(),
            },
        )
    };

    let backend = options.backend();
    if backend != Backend::Cpu && options.crop_to_full {
        return Err(UsageError::CropOnGpu.into());
    }

    let channels = match options.channels.as_deref() {
        Some(raw) => raw.parse::<ChannelList>().context("--ch")?,
        None => ChannelList::default(),
    };

    let attributes = attributes::parse_all(
        &options.float_attributes,
        &options.int_attributes,
        &options.string_attributes,
    )
    .map_err(|errors| {
        let lines: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        anyhow::anyhow!("invalid attributes:\n  {}", lines.join("\n  "))
    })?;

    Ok(Job {
        input: PathBuf::from(input),
        output: PathBuf::from(output),
        request,
        channels,
        attributes,
        backend,
    })
}

/// Lines printed under `--v` describing where the colour config came from.
fn config_summary(config: &AppConfig, path: Option<&Path>) -> Vec<String> {
    let file = match path {
        Some(path) if path.is_file() => path.display().to_string(),
        _ => "none, using built-in defaults".to_string(),
    };
    let search: Vec<String> = config
        .search_path
        .iter()
        .map(|dir| dir.display().to_string())
        .collect();
    vec![
        format!("Config file: {}", file),
        format!("Search path: {}", search.join(":")),
    ]
}

/// Runs one conversion: load, select/crop, transform, stamp attributes, write.
pub fn run(options: &Options, config: &AppConfig) -> anyhow::Result<()> {
    run_with(options, config, WgpuApi::default())
}

fn run_with<G: GraphicsApi>(options: &Options, config: &AppConfig, api: G) -> anyhow::Result<()> {
    let job = plan(options)?;

    let mut context = config.transform_context();
    if let Some(exposure) = options.exposure {
        context.exposure = exposure;
    }
    if let Some(gamma) = options.gamma {
        context.gamma = gamma;
    }
    let processor = context
        .resolve(&job.request)
        .context("failed to create the color transform")?;

    if options.verbose {
        println!("colorconvert {}", env!("CARGO_PKG_VERSION"));
        let path = AppConfig::config_path().map(|(path, _)| path);
        for line in config_summary(config, path.as_deref()) {
            println!("{}", line);
        }
        for (property, value) in processor.dynamic_properties() {
            println!("{}: {}", property.uniform_name(), value);
        }
    }
    match job.backend {
        Backend::GpuLegacy => println!("Using legacy GPU color processing."),
        Backend::Gpu => println!("Using GPU color processing."),
        Backend::Cpu => {}
    }

    println!("Loading {}", job.input.display());
    let loaded = image_io::open(&job.input)?;
    if options.verbose {
        println!(
            "{}x{} {} channels, {}, data window {:?}, full window {:?}",
            loaded.buffer.width(),
            loaded.buffer.height(),
            loaded.buffer.channels(),
            loaded.buffer.format(),
            loaded.region.data,
            loaded.region.full
        );
    }

    let loaded = if job.backend == Backend::Cpu {
        loaded
    } else {
        let channels = loaded.buffer.channels();
        if channels != 3 && channels != 4 {
            anyhow::bail!(
                "GPU processing needs a 3 or 4 channel image, {} has {}",
                job.input.display(),
                channels
            );
        }
        loaded.read_as(ElementFormat::F32)
    };

    if options.crop_to_full {
        println!(
            "cropping to {}x{}",
            loaded.region.full.width, loaded.region.full.height
        );
    }
    let image_io::LoadedImage {
        buffer,
        region,
        header,
    } = loaded;
    let (mut buffer, region) =
        crop_and_select(buffer, &region, &job.channels, options.crop_to_full)?;

    match job.backend {
        Backend::Cpu => process_cpu(&mut buffer, &processor, options.verbose)?,
        Backend::Gpu => process_gpu(api, &mut buffer, &processor, ShaderMode::Full, options)?,
        Backend::GpuLegacy => {
            let mode = ShaderMode::Legacy {
                lut_size: config.legacy_lut_size,
            };
            process_gpu(api, &mut buffer, &processor, mode, options)?
        }
    }

    image_io::write(
        &job.output,
        &buffer,
        &region,
        &header,
        &job.attributes,
    )?;
    println!("Wrote {}", job.output.display());
    Ok(())
}

fn process_cpu(
    buffer: &mut PixelBuffer,
    processor: &Processor,
    verbose: bool,
) -> anyhow::Result<()> {
    let cpu = CpuProcessor::new(processor, buffer.format());
    let start = Instant::now();
    cpu.apply(buffer).context("CPU processing failed")?;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    info!(elapsed_ms, "cpu transform applied");
    if verbose {
        println!("CPU processing took: {:.3} ms", elapsed_ms);
    }
    Ok(())
}

fn process_gpu<G: GraphicsApi>(
    api: G,
    buffer: &mut PixelBuffer,
    processor: &Processor,
    mode: ShaderMode,
    options: &Options,
) -> anyhow::Result<()> {
    let mut pipeline = GpuPipeline::new(api);
    pipeline.init().context("GPU initialisation failed")?;
    if options.verbose {
        if let Some(adapter) = pipeline.adapter_info() {
            println!("GPU adapter: {}", adapter);
        }
    }
    pipeline.prepare_image(buffer)?;
    pipeline.update_shader(processor, mode)?;
    if options.gpu_info {
        if let Some(source) = pipeline.program_source() {
            println!("{}", source);
        }
    }
    pipeline.render()?;
    let format = buffer.format();
    let pixels = buffer
        .as_f32_mut()
        .with_context(|| format!("GPU read back needs a float buffer, got {}", format))?;
    pipeline.read_back(pixels)?;
    Ok(())
}
