//! GPU error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no GPU adapter found")]
    NoAdapter,

    #[error("failed to create device: {0}")]
    DeviceCreation(#[from] wgpu::RequestDeviceError),

    #[error("buffer mapping failed: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    #[error("{width}x{height} exceeds the maximum texture dimension {max}")]
    TextureTooLarge { width: u32, height: u32, max: u32 },

    #[error("not supported on the GPU: {0}")]
    Unsupported(String),

    #[error("GPU unavailable: {0}")]
    Unavailable(String),
}
