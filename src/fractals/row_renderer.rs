use image::Rgb;
use rayon::iter::{IndexedParallelIterator, ParallelIterator};

use crate::{
    core::{
        color_map::{ColorMapper, SampleAccumulator},
        error::RenderError,
        image_utils::{PixelBuffer, ViewportMapper, BYTES_PER_PIXEL},
        jitter::JitterSource,
    },
    fractals::mandelbrot::{iterate, FrameRequest},
};

/**
 * Renders scanline `row` of the frame into `row_bytes` (RGBA, `width * 4` bytes).
 * Each pixel averages `samples` jittered escape-time samples; every sample draws
 * its sub-pixel offset from `jitter`, x first, then y.
 */
pub fn render_row_into(
    frame: &FrameRequest,
    row: u32,
    jitter: &mut dyn JitterSource,
    row_bytes: &mut [u8],
) {
    assert_eq!(row_bytes.len(), frame.image.row_bytes());
    more_asserts::assert_lt!(row, frame.image.height);

    let mapper = ViewportMapper::new(&frame.image, &frame.viewport);
    let color_map = frame.params.color_map();
    let mut accumulator = SampleAccumulator::new(frame.accumulation);
    let row_highlighted = frame.highlight.filter(|rect| rect.contains_row(row));

    for (x, pixel) in (0..frame.image.width).zip(row_bytes.chunks_exact_mut(BYTES_PER_PIXEL)) {
        let highlighted = row_highlighted.map_or(false, |rect| rect.contains(x, row));
        accumulator.reset();
        for _ in 0..frame.params.samples {
            let c = mapper.pixel_to_plane((x, row), jitter.next_offset());
            let (magnitude_squared, iteration_count) =
                iterate(c, frame.params.max_iterations, frame.params.threshold);
            accumulator.add(color_map.color_for(magnitude_squared, iteration_count, highlighted));
        }
        let Rgb([r, g, b]) = accumulator.average();
        pixel.copy_from_slice(&[r, g, b, 255]);
    }
}

pub fn render_row(frame: &FrameRequest, row: u32, jitter: &mut dyn JitterSource) -> Vec<u8> {
    let mut row_bytes = vec![0; frame.image.row_bytes()];
    render_row_into(frame, row, jitter, &mut row_bytes);
    row_bytes
}

/// Renders `row` with the jitter source the frame assigns to that row.
pub fn render_seeded_row(frame: &FrameRequest, row: u32) -> Vec<u8> {
    let mut jitter = frame.jitter.source_for_row(row);
    render_row(frame, row, jitter.as_mut())
}

/**
 * Renders the whole frame on the rayon thread pool, one task per row. Produces
 * the same bytes as the worker pool for the same frame request.
 */
pub fn render_frame_direct(frame: &FrameRequest) -> Result<PixelBuffer, RenderError> {
    frame.validate()?;
    let mut pixels = PixelBuffer::new(frame.image);
    pixels
        .par_rows_mut()
        .enumerate()
        .for_each(|(row, row_bytes)| {
            let mut jitter = frame.jitter.source_for_row(row as u32);
            render_row_into(frame, row as u32, jitter.as_mut(), row_bytes);
        });
    log::debug!(
        "Rendered {}x{} frame on the rayon pool",
        frame.image.width,
        frame.image.height
    );
    Ok(pixels)
}
