use bytemuck::{Pod, Zeroable};

use super::error::GpuError;
use crate::{
    core::{
        color_map::AccumulationMode,
        image_utils::{ImageDimensions, PixelRect, Viewport},
        jitter::JitterSpec,
    },
    fractals::mandelbrot::{FrameRequest, RenderParameters},
};

/// Uniform block of the fragment program. The field order matches `mandelbrot.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuUniforms {
    pub resolution: [f32; 2],
    pub offset: [f32; 2],
    pub render_height: f32,
    pub seed: u32,
    pub samples: u32,
    pub max_iterations: u32,
    pub iter_hue_adjust: f32,
    pub threshold: f32,
    /// 0 = linear light, 1 = gamma.
    pub accumulation: u32,
    pub highlight_enabled: u32,
    /// Half-open pixel bounds of the highlight rectangle.
    pub highlight_min: [f32; 2],
    pub highlight_max: [f32; 2],
    /// 1 for jittered samples, 0 to sample the top-left corner of each pixel.
    pub jitter_scale: f32,
    pub _pad: [u32; 3],
}

impl GpuUniforms {
    /// `seed` of `None` disables jitter.
    pub fn new(
        image: &ImageDimensions,
        viewport: &Viewport,
        params: &RenderParameters,
        accumulation: AccumulationMode,
        seed: Option<u64>,
        highlight: Option<PixelRect>,
    ) -> GpuUniforms {
        let (highlight_enabled, highlight_min, highlight_max) = match highlight {
            Some(rect) => (
                1,
                [rect.x as f32, rect.y as f32],
                [rect.end_x() as f32, rect.end_y() as f32],
            ),
            None => (0, [0.0; 2], [0.0; 2]),
        };
        GpuUniforms {
            resolution: [image.width as f32, image.height as f32],
            offset: [viewport.offset.real as f32, viewport.offset.imag as f32],
            render_height: viewport.render_height as f32,
            seed: seed.map_or(0, |seed| (seed ^ (seed >> 32)) as u32),
            samples: params.samples,
            max_iterations: params.max_iterations,
            iter_hue_adjust: params.iter_hue_adjust as f32,
            threshold: params.threshold as f32,
            accumulation: match accumulation {
                AccumulationMode::LinearLight => 0,
                AccumulationMode::Gamma => 1,
            },
            highlight_enabled,
            highlight_min,
            highlight_max,
            jitter_scale: if seed.is_some() { 1.0 } else { 0.0 },
            _pad: [0; 3],
        }
    }

    /// Fixed jitter sequences have no per-pixel equivalent on the GPU.
    pub fn from_frame(frame: &FrameRequest) -> Result<GpuUniforms, GpuError> {
        let seed = match &frame.jitter {
            JitterSpec::Random { seed } => Some(*seed),
            JitterSpec::Zero => None,
            JitterSpec::Fixed { .. } => {
                return Err(GpuError::Unsupported(
                    "fixed jitter sequences".to_owned(),
                ))
            }
        };
        Ok(GpuUniforms::new(
            &frame.image,
            &frame.viewport,
            &frame.params,
            frame.accumulation,
            seed,
            frame.highlight,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::mem::{offset_of, size_of};

    use super::*;
    use crate::core::complex::ComplexNumber;

    #[test]
    fn test_layout_matches_shader_block() {
        assert_eq!(size_of::<GpuUniforms>(), 80);
        assert_eq!(size_of::<GpuUniforms>() % 16, 0);
        assert_eq!(offset_of!(GpuUniforms, offset), 8);
        assert_eq!(offset_of!(GpuUniforms, render_height), 16);
        assert_eq!(offset_of!(GpuUniforms, max_iterations), 28);
        assert_eq!(offset_of!(GpuUniforms, accumulation), 40);
        assert_eq!(offset_of!(GpuUniforms, highlight_min), 48);
        assert_eq!(offset_of!(GpuUniforms, highlight_max), 56);
        assert_eq!(offset_of!(GpuUniforms, jitter_scale), 64);
    }

    #[test]
    fn test_marshals_frame() {
        let frame = FrameRequest::new(
            ImageDimensions::new(640, 480),
            Viewport::new(ComplexNumber::new(-2.0, -1.5), 3.0),
            RenderParameters::default(),
        )
        .with_accumulation(AccumulationMode::Gamma)
        .with_highlight(Some(PixelRect::new(10, 20, 30, 40)));

        let uniforms = GpuUniforms::from_frame(&frame).unwrap();
        assert_eq!(uniforms.resolution, [640.0, 480.0]);
        assert_eq!(uniforms.offset, [-2.0, -1.5]);
        assert_eq!(uniforms.render_height, 3.0);
        assert_eq!(uniforms.accumulation, 1);
        assert_eq!(uniforms.highlight_enabled, 1);
        assert_eq!(uniforms.highlight_min, [10.0, 20.0]);
        assert_eq!(uniforms.highlight_max, [40.0, 60.0]);
        assert_eq!(uniforms.jitter_scale, 0.0);

        let seeded = GpuUniforms::from_frame(&frame.clone().with_jitter(JitterSpec::Random { seed: 5 }))
            .unwrap();
        assert_eq!(seeded.seed, 5);
        assert_eq!(seeded.jitter_scale, 1.0);

        let clamped = GpuUniforms::from_frame(
            &frame
                .clone()
                .with_highlight(Some(PixelRect::new(u32::MAX - 5, 1, 10, u32::MAX))),
        )
        .unwrap();
        assert_eq!(clamped.highlight_max, [u32::MAX as f32, u32::MAX as f32]);

        assert!(GpuUniforms::from_frame(&frame.with_jitter(JitterSpec::Fixed {
            values: vec![0.5]
        }))
        .is_err());
    }
}
