pub mod frame;
pub mod pool;
pub mod progress;
pub mod protocol;
pub mod registry;
