//! Single-draw fragment program backend. Renders a whole frame in f32 on the GPU.

pub mod device;
pub mod error;
pub mod program;
pub mod uniforms;

pub use device::{GpuAvailability, GpuContext};
pub use error::GpuError;
pub use program::GpuProgram;
pub use uniforms::GpuUniforms;
