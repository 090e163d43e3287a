pub mod cpu_image_renderer;
pub mod gpu_context;
pub mod gpu_image_renderer;
pub mod renderer_factory;
