pub mod cli;
pub mod core;
pub mod fractals;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod workers;
