pub mod buffer;
pub mod channels;
pub mod cpu;
pub mod gpu_pipeline;
pub mod wgpu_api;
