pub mod color_map;
pub mod complex;
pub mod error;
pub mod file_io;
pub mod image_utils;
pub mod jitter;
pub mod stopwatch;
pub mod view_control;
