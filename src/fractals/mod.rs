pub mod mandelbrot;
pub mod row_renderer;
