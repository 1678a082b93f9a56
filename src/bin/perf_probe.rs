use std::time::Instant;

use anyhow::{Context, Result};

#[path = "../color/mod.rs"]
mod color;
#[path = "../processing/mod.rs"]
mod processing;

use color::shader::ShaderMode;
use color::{TransformContext, TransformRequest};
use processing::buffer::{ElementFormat, PixelBuffer, PixelData};
use processing::cpu::CpuProcessor;
use processing::gpu_pipeline::GpuPipeline;
use processing::wgpu_api::{WgpuApi, is_available};

const RUNS: usize = 5;

fn median_ms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) * 0.5
    } else {
        sorted[mid]
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn synthetic_image(width: usize, height: usize) -> Result<PixelBuffer> {
    let mut data = Vec::with_capacity(width * height * 4);
    for y in 0..height {
        for x in 0..width {
            let u = x as f32 / width.max(1) as f32;
            let v = y as f32 / height.max(1) as f32;
            data.extend_from_slice(&[u, v, 1.0 - u, 1.0]);
        }
    }
    PixelBuffer::new(width, height, 4, PixelData::F32(data)).context("synthetic image")
}

#[derive(Default)]
struct GpuSamples {
    init: Vec<f64>,
    prepare: Vec<f64>,
    shader: Vec<f64>,
    render: Vec<f64>,
    read_back: Vec<f64>,
}

fn main() -> Result<()> {
    let mut args = std::env::args();
    let _bin = args.next();
    let width = args
        .next()
        .map(|v| v.parse::<usize>())
        .transpose()
        .context("usage: perf_probe [width height]")?
        .unwrap_or(1920);
    let height = args
        .next()
        .map(|v| v.parse::<usize>())
        .transpose()
        .context("usage: perf_probe [width height]")?
        .unwrap_or(1080);

    let request = TransformRequest::ColorspacePair {
        src: "srgb".to_string(),
        dst: "acescg".to_string(),
    };
    let processor = TransformContext::default()
        .resolve(&request)
        .context("resolve srgb -> acescg")?;
    let source = synthetic_image(width, height)?;
    eprintln!("Probing {}x{} RGBA float, {} runs", width, height, RUNS);

    let cpu = CpuProcessor::new(&processor, ElementFormat::F32);
    let mut cpu_samples = Vec::with_capacity(RUNS);
    for _ in 0..RUNS {
        let mut buffer = source.clone();
        let t0 = Instant::now();
        cpu.apply(&mut buffer).context("cpu apply")?;
        cpu_samples.push(elapsed_ms(t0));
    }
    println!("METRIC image={}x{}", width, height);
    println!("METRIC cpu_ms_median={:.2}", median_ms(&cpu_samples));

    if !is_available() {
        println!("METRIC gpu_available=false");
        return Ok(());
    }

    let mut gpu = GpuSamples::default();
    let mut pixels = vec![0.0f32; width * height * 4];
    let mut adapter = None;
    for _ in 0..RUNS {
        let mut pipeline = GpuPipeline::new(WgpuApi::default());
        let t0 = Instant::now();
        pipeline.init().context("gpu init")?;
        gpu.init.push(elapsed_ms(t0));
        adapter = pipeline.adapter_info();

        let t0 = Instant::now();
        pipeline.prepare_image(&source).context("gpu prepare_image")?;
        gpu.prepare.push(elapsed_ms(t0));

        let t0 = Instant::now();
        pipeline
            .update_shader(&processor, ShaderMode::Full)
            .context("gpu update_shader")?;
        gpu.shader.push(elapsed_ms(t0));

        let t0 = Instant::now();
        pipeline.render().context("gpu render")?;
        gpu.render.push(elapsed_ms(t0));

        let t0 = Instant::now();
        pipeline.read_back(&mut pixels).context("gpu read_back")?;
        gpu.read_back.push(elapsed_ms(t0));
    }

    if let Some(adapter) = adapter {
        println!("METRIC gpu_adapter={}", adapter);
    }
    println!("METRIC gpu_init_ms_median={:.2}", median_ms(&gpu.init));
    println!("METRIC gpu_prepare_ms_median={:.2}", median_ms(&gpu.prepare));
    println!("METRIC gpu_shader_ms_median={:.2}", median_ms(&gpu.shader));
    println!("METRIC gpu_render_ms_median={:.2}", median_ms(&gpu.render));
    println!("METRIC gpu_read_back_ms_median={:.2}", median_ms(&gpu.read_back));

    Ok(())
}
