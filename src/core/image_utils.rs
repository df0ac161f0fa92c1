use std::path::Path;

use rayon::slice::ParallelSliceMut;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::{complex::ComplexNumber, error::RenderError};

/// Bytes per pixel in a `PixelBuffer` (RGBA).
pub const BYTES_PER_PIXEL: usize = 4;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> ImageDimensions {
        ImageDimensions { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::Configuration(format!(
                "image dimensions must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/**
 * Describes which rectangle of the complex plane maps onto the pixel surface:
 * `offset` is the plane coordinate of the top-left corner and `render_height`
 * the plane distance spanned by the full image along each axis. The scale used
 * by zoom gestures is the inverse of the height.
 */
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub offset: ComplexNumber,
    pub render_height: f64,
}

impl Viewport {
    pub fn new(offset: ComplexNumber, render_height: f64) -> Viewport {
        Viewport {
            offset,
            render_height,
        }
    }

    pub fn from_scale(offset: ComplexNumber, scale: f64) -> Viewport {
        Viewport::new(offset, 1.0 / scale)
    }

    pub fn scale(&self) -> f64 {
        1.0 / self.render_height
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        if !(self.render_height.is_finite() && self.render_height > 0.0) {
            return Err(RenderError::Configuration(format!(
                "viewport height must be finite and positive, got {}",
                self.render_height
            )));
        }
        if !(self.offset.real.is_finite() && self.offset.imag.is_finite()) {
            return Err(RenderError::Configuration(format!(
                "viewport offset must be finite, got {}",
                self.offset
            )));
        }
        Ok(())
    }
}

/**
 * Maps between pixel coordinates and points on the complex plane. Pixel coordinates
 * grow rightward and downward; so do the real and imaginary parts of the mapped point.
 */
#[derive(Clone, Copy, Debug)]
pub struct ViewportMapper {
    viewport: Viewport,
    width: f64,
    height: f64,
}

impl ViewportMapper {
    pub fn new(image: &ImageDimensions, viewport: &Viewport) -> ViewportMapper {
        assert!(image.width > 0 && image.height > 0);
        ViewportMapper {
            viewport: *viewport,
            width: image.width as f64,
            height: image.height as f64,
        }
    }

    /// `jitter` is the sub-pixel offset on `[0, 1)^2`.
    pub fn pixel_to_plane(&self, pixel: (u32, u32), jitter: (f64, f64)) -> ComplexNumber {
        self.point_to_plane(&nalgebra::Vector2::new(
            pixel.0 as f64 + jitter.0,
            pixel.1 as f64 + jitter.1,
        ))
    }

    /// Same as `pixel_to_plane`, for a continuous position in pixel space.
    pub fn point_to_plane(&self, point: &nalgebra::Vector2<f64>) -> ComplexNumber {
        let normalized = ComplexNumber::new(point[0] / self.width, point[1] / self.height);
        normalized * self.viewport.render_height + self.viewport.offset
    }

    /// Exact algebraic inverse of `point_to_plane`.
    pub fn plane_to_pixel(&self, point: &ComplexNumber) -> nalgebra::Vector2<f64> {
        let normalized = (*point - self.viewport.offset) * self.viewport.scale();
        nalgebra::Vector2::new(normalized.real * self.width, normalized.imag * self.height)
    }
}

pub fn pixel_to_plane(
    pixel: (u32, u32),
    image: &ImageDimensions,
    viewport: &Viewport,
    jitter: (f64, f64),
) -> ComplexNumber {
    ViewportMapper::new(image, viewport).pixel_to_plane(pixel, jitter)
}

pub fn plane_to_pixel(
    point: &ComplexNumber,
    image: &ImageDimensions,
    viewport: &Viewport,
) -> nalgebra::Vector2<f64> {
    ViewportMapper::new(image, viewport).plane_to_pixel(point)
}

/**
 * Axis-aligned rectangle in pixel space, half-open: `[x, x + width) x [y, y + height)`.
 * Used for the drag-selection highlight.
 */
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> PixelRect {
        PixelRect {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle spanned by two drag corners, in any order. Both corners are included.
    pub fn from_corners(a: (u32, u32), b: (u32, u32)) -> PixelRect {
        let x = a.0.min(b.0);
        let y = a.1.min(b.1);
        PixelRect::new(
            x,
            y,
            (a.0.max(b.0) - x).saturating_add(1),
            (a.1.max(b.1) - y).saturating_add(1),
        )
    }

    /// Exclusive right edge, clamped to `u32::MAX`.
    pub fn end_x(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Exclusive bottom edge, clamped to `u32::MAX`.
    pub fn end_y(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// The rectangle must be non-empty and lie inside the image.
    pub fn validate(&self, image: &ImageDimensions) -> Result<(), RenderError> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::Configuration(format!(
                "highlight must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        let inside = |start: u32, extent: u32, limit: u32| {
            start.checked_add(extent).map_or(false, |end| end <= limit)
        };
        if !inside(self.x, self.width, image.width) || !inside(self.y, self.height, image.height) {
            return Err(RenderError::Configuration(format!(
                "highlight {}x{} at ({}, {}) does not fit in a {}x{} image",
                self.width, self.height, self.x, self.y, image.width, image.height
            )));
        }
        Ok(())
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x - self.x < self.width && y >= self.y && y - self.y < self.height
    }

    pub fn contains_row(&self, y: u32) -> bool {
        y >= self.y && y - self.y < self.height
    }
}

/**
 * Row-major RGBA frame buffer. Alpha is always 255.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    dimensions: ImageDimensions,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Opaque black image.
    pub fn new(dimensions: ImageDimensions) -> PixelBuffer {
        let mut data = vec![0; dimensions.pixel_count() * BYTES_PER_PIXEL];
        for pixel in data.chunks_exact_mut(BYTES_PER_PIXEL) {
            pixel[3] = 255;
        }
        PixelBuffer { dimensions, data }
    }

    pub fn from_raw(dimensions: ImageDimensions, data: Vec<u8>) -> Result<PixelBuffer, RenderError> {
        let expected = dimensions.pixel_count() * BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(RenderError::Configuration(format!(
                "pixel data holds {} bytes, a {}x{} image needs {}",
                data.len(),
                dimensions.width,
                dimensions.height,
                expected
            )));
        }
        Ok(PixelBuffer { dimensions, data })
    }

    pub fn dimensions(&self) -> ImageDimensions {
        self.dimensions
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn row(&self, row: u32) -> &[u8] {
        let row_bytes = self.dimensions.row_bytes();
        let start = row as usize * row_bytes;
        &self.data[start..start + row_bytes]
    }

    pub fn row_mut(&mut self, row: u32) -> &mut [u8] {
        let row_bytes = self.dimensions.row_bytes();
        let start = row as usize * row_bytes;
        &mut self.data[start..start + row_bytes]
    }

    pub fn rows_mut(&mut self) -> std::slice::ChunksExactMut<'_, u8> {
        let row_bytes = self.dimensions.row_bytes();
        self.data.chunks_exact_mut(row_bytes)
    }

    pub fn par_rows_mut(&mut self) -> rayon::slice::ChunksExactMut<'_, u8> {
        let row_bytes = self.dimensions.row_bytes();
        self.data.par_chunks_exact_mut(row_bytes)
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let start = (y as usize * self.dimensions.width as usize + x as usize) * BYTES_PER_PIXEL;
        [
            self.data[start],
            self.data[start + 1],
            self.data[start + 2],
            self.data[start + 3],
        ]
    }

    /// Hex encoded SHA-256 of the pixel bytes.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.data);
        format!("{:x}", hasher.finalize())
    }

    pub fn to_image(&self) -> image::RgbaImage {
        image::RgbaImage::from_fn(self.dimensions.width, self.dimensions.height, |x, y| {
            image::Rgba(self.pixel(x, y))
        })
    }
}

pub fn write_image_to_file<F, E>(filename: &Path, save_lambda: F) -> Result<(), RenderError>
where
    F: FnOnce(&Path) -> Result<(), E>,
    RenderError: From<E>,
{
    save_lambda(filename)?;
    log::info!("Wrote image file to: {}", filename.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_viewport() -> Viewport {
        Viewport::new(ComplexNumber::new(-1.5, -1.0), 2.0)
    }

    #[test]
    fn test_pixel_to_plane_corners() {
        let image = ImageDimensions::new(4, 4);
        let mapper = ViewportMapper::new(&image, &unit_viewport());

        let top_left = mapper.pixel_to_plane((0, 0), (0.0, 0.0));
        assert_eq!(top_left, ComplexNumber::new(-1.5, -1.0));

        let center = mapper.pixel_to_plane((2, 2), (0.0, 0.0));
        assert_eq!(center, ComplexNumber::new(-0.5, 0.0));

        let jittered = mapper.pixel_to_plane((3, 2), (0.5, 0.5));
        assert_relative_eq!(jittered.real, 0.25, epsilon = 1e-12);
        assert_relative_eq!(jittered.imag, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_plane_to_pixel_round_trip() {
        let image = ImageDimensions::new(640, 360);
        let viewports = [
            unit_viewport(),
            Viewport::from_scale(ComplexNumber::new(-0.5557506, -0.5556), 1.0e9),
            Viewport::from_scale(ComplexNumber::new(0.3, 0.01), 0.01),
        ];
        for viewport in viewports.iter() {
            for &(x, y) in [(0, 0), (17, 359), (639, 0), (320, 180)].iter() {
                let point = pixel_to_plane((x, y), &image, viewport, (0.0, 0.0));
                let pixel = plane_to_pixel(&point, &image, viewport);
                assert_relative_eq!(pixel[0], x as f64, epsilon = 1e-4);
                assert_relative_eq!(pixel[1], y as f64, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_viewport_scale_is_inverse_height() {
        let viewport = Viewport::from_scale(ComplexNumber::new(-1.5, -1.0), 0.5);
        assert_eq!(viewport.render_height, 2.0);
        assert_eq!(viewport.scale(), 0.5);
        assert!(viewport.validate().is_ok());
        assert!(Viewport::new(ComplexNumber::ZERO, 0.0).validate().is_err());
        assert!(Viewport::new(ComplexNumber::ZERO, f64::NAN).validate().is_err());
    }

    #[test]
    fn test_pixel_rect_from_corners() {
        let rect = PixelRect::from_corners((5, 1), (2, 3));
        assert_eq!(rect, PixelRect::new(2, 1, 4, 3));
        assert!(rect.contains(2, 1));
        assert!(rect.contains(5, 3));
        assert!(!rect.contains(6, 3));
        assert!(!rect.contains(1, 2));
        assert!(rect.contains_row(3));
        assert!(!rect.contains_row(4));

        let edge = PixelRect::from_corners((u32::MAX, 0), (u32::MAX - 1, u32::MAX));
        assert_eq!(edge, PixelRect::new(u32::MAX - 1, 0, 2, u32::MAX));
        assert_eq!(edge.end_x(), u32::MAX);
        assert_eq!(edge.end_y(), u32::MAX);
        assert!(edge.contains(u32::MAX, u32::MAX - 1));
        assert_eq!(PixelRect::from_corners((0, 0), (u32::MAX, 0)).width, u32::MAX);
    }

    #[test]
    fn test_pixel_rect_must_fit_image() {
        let image = ImageDimensions::new(800, 600);
        assert!(PixelRect::new(300, 200, 200, 150).validate(&image).is_ok());
        assert!(PixelRect::new(0, 0, 800, 600).validate(&image).is_ok());
        let bad = [
            PixelRect::new(0, 0, 0, 10),
            PixelRect::new(700, 0, 101, 10),
            PixelRect::new(0, 600, 10, 1),
            PixelRect::new(u32::MAX, 0, 1, 1),
            PixelRect::new(0, 1, 1, u32::MAX),
        ];
        for rect in bad.iter() {
            assert!(matches!(
                rect.validate(&image),
                Err(RenderError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_pixel_buffer_rows() {
        let mut buffer = PixelBuffer::new(ImageDimensions::new(3, 2));
        assert_eq!(buffer.pixel(2, 1), [0, 0, 0, 255]);

        buffer.row_mut(1).copy_from_slice(&[1, 2, 3, 255, 4, 5, 6, 255, 7, 8, 9, 255]);
        assert_eq!(buffer.pixel(0, 1), [1, 2, 3, 255]);
        assert_eq!(buffer.pixel(2, 1), [7, 8, 9, 255]);
        assert_eq!(buffer.row(0), &[0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 255]);
        assert_eq!(buffer.rows_mut().count(), 2);
        assert_eq!(buffer.to_image().get_pixel(1, 1).0, [4, 5, 6, 255]);
    }

    #[test]
    fn test_pixel_buffer_from_raw_checks_length() {
        let dimensions = ImageDimensions::new(2, 2);
        assert!(PixelBuffer::from_raw(dimensions, vec![0; 16]).is_ok());
        assert!(PixelBuffer::from_raw(dimensions, vec![0; 15]).is_err());
    }

    #[test]
    fn test_digest_tracks_content() {
        let a = PixelBuffer::new(ImageDimensions::new(2, 2));
        let mut b = a.clone();
        assert_eq!(a.digest(), b.digest());
        b.row_mut(0)[0] = 1;
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }
}
