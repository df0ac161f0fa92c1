use nalgebra::Vector2;

use super::{
    complex::ComplexNumber,
    error::RenderError,
    image_utils::{ImageDimensions, PixelRect, Viewport, ViewportMapper},
};
use crate::fractals::mandelbrot::RenderParameters;

/// Smallest render height a gesture may produce. Below this, f64 spacing between
/// neighbouring pixels collapses at typical image sizes.
pub const MIN_RENDER_HEIGHT: f64 = 1e-15;

/// Converts a drag of `delta_px` pixels into the plane offset that keeps the
/// content under the cursor.
fn pixel_delta_to_plane(
    viewport: &Viewport,
    image: &ImageDimensions,
    delta_px: Vector2<f64>,
) -> ComplexNumber {
    ComplexNumber::new(
        delta_px[0] / image.width as f64,
        delta_px[1] / image.height as f64,
    ) * viewport.render_height
}

/// Drag the content by `delta_px`: the plane point under the cursor follows it.
pub fn pan(viewport: &Viewport, image: &ImageDimensions, delta_px: Vector2<f64>) -> Viewport {
    Viewport::new(
        viewport.offset - pixel_delta_to_plane(viewport, image, delta_px),
        viewport.render_height,
    )
}

/**
 * Multiplies the scale by `factor` (greater than one zooms in), keeping the plane
 * point under `cursor_px` at the same pixel position.
 */
pub fn zoom_about(
    viewport: &Viewport,
    image: &ImageDimensions,
    factor: f64,
    cursor_px: Vector2<f64>,
) -> Result<Viewport, RenderError> {
    if !(factor.is_finite() && factor > 0.0) {
        return Err(RenderError::Configuration(format!(
            "zoom factor must be finite and positive, got {}",
            factor
        )));
    }
    let anchor = ViewportMapper::new(image, viewport).point_to_plane(&cursor_px);
    let render_height = (viewport.render_height / factor).max(MIN_RENDER_HEIGHT);
    let next = Viewport::new(ComplexNumber::ZERO, render_height);
    let offset = anchor - pixel_delta_to_plane(&next, image, cursor_px);
    Ok(Viewport::new(offset, render_height))
}

/**
 * Zooms so that the selected pixel rectangle fills the view. The rectangle's top-left
 * corner becomes the new offset; the larger of its relative extents sets the height,
 * so the whole selection remains visible.
 */
pub fn zoom_to_rectangle(
    viewport: &Viewport,
    image: &ImageDimensions,
    rect: &PixelRect,
) -> Result<Viewport, RenderError> {
    if rect.width == 0 || rect.height == 0 {
        return Err(RenderError::Configuration(format!(
            "zoom rectangle must be non-empty, got {}x{}",
            rect.width, rect.height
        )));
    }
    let mapper = ViewportMapper::new(image, viewport);
    let offset = mapper.pixel_to_plane((rect.x, rect.y), (0.0, 0.0));
    let relative_extent = (rect.width as f64 / image.width as f64)
        .max(rect.height as f64 / image.height as f64);
    let render_height = (viewport.render_height * relative_extent).max(MIN_RENDER_HEIGHT);
    Ok(Viewport::new(offset, render_height))
}

/// Nudges the escape threshold, rejecting steps that would leave it non-positive.
pub fn step_threshold(
    params: &RenderParameters,
    delta: f64,
) -> Result<RenderParameters, RenderError> {
    let stepped = RenderParameters {
        threshold: params.threshold + delta,
        ..*params
    };
    stepped.validate()?;
    Ok(stepped)
}
