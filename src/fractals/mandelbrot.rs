use std::{io::Write, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    core::{
        color_map::{AccumulationMode, HueRampColorMap},
        complex::ComplexNumber,
        error::RenderError,
        file_io::{serialize_to_json, FilePrefix},
        image_utils::{write_image_to_file, ImageDimensions, PixelBuffer, PixelRect, Viewport},
        jitter::JitterSpec,
        stopwatch::Stopwatch,
    },
    fractals::row_renderer::render_frame_direct,
    workers::{
        frame::FrameOrchestrator,
        pool::{MandelbrotRowWorker, PoolConfig, WorkerPool},
        progress::LogProgress,
    },
};

#[cfg(feature = "gpu")]
use crate::gpu::{GpuContext, GpuProgram, GpuUniforms};

/// Numeric knobs shared by every render path.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct RenderParameters {
    /// Jittered samples averaged into each pixel.
    pub samples: u32,
    pub max_iterations: u32,
    /// Divisor applied to the iteration count before it is turned into a hue.
    pub iter_hue_adjust: f64,
    /// Escape threshold on `|z|^2`.
    pub threshold: f64,
}

impl Default for RenderParameters {
    fn default() -> Self {
        RenderParameters {
            samples: 4,
            max_iterations: 500,
            iter_hue_adjust: 32.0,
            threshold: 4.0,
        }
    }
}

impl RenderParameters {
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.samples < 1 {
            return Err(RenderError::Configuration(
                "samples must be at least 1".to_owned(),
            ));
        }
        if self.max_iterations < 1 {
            return Err(RenderError::Configuration(
                "max_iterations must be at least 1".to_owned(),
            ));
        }
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(RenderError::Configuration(format!(
                "threshold must be finite and positive, got {}",
                self.threshold
            )));
        }
        if !self.iter_hue_adjust.is_finite() || self.iter_hue_adjust == 0.0 {
            return Err(RenderError::Configuration(format!(
                "iter_hue_adjust must be finite and non-zero, got {}",
                self.iter_hue_adjust
            )));
        }
        Ok(())
    }

    pub fn color_map(&self) -> HueRampColorMap {
        HueRampColorMap::new(self.iter_hue_adjust, self.threshold)
    }
}

/**
 * Escape-time iteration of `z := z^2 + c`, starting from `z = c`.
 *
 * At step `n` (0-based) the squared magnitude of `z_n` is checked first; the
 * first step where it exceeds `threshold` returns `(|z_n|^2, n)`. An orbit that
 * stays bounded for `max_iterations` steps returns the last squared magnitude
 * together with `max_iterations`.
 *
 * No overflow handling: f64 precision bounds the usable zoom depth.
 */
pub fn iterate(c: ComplexNumber, max_iterations: u32, threshold: f64) -> (f64, u32) {
    let mut z = c;
    let mut magnitude_squared = z.magnitude_squared();
    for iteration_count in 0..max_iterations {
        magnitude_squared = z.magnitude_squared();
        if magnitude_squared > threshold {
            return (magnitude_squared, iteration_count);
        }
        z = z.square() + c;
    }
    (magnitude_squared, max_iterations)
}

/**
 * Everything needed to render one frame, independent of the render path.
 * Shared by all row requests of the frame.
 */
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FrameRequest {
    pub image: ImageDimensions,
    pub viewport: Viewport,
    pub params: RenderParameters,
    pub accumulation: AccumulationMode,
    pub jitter: JitterSpec,
    pub highlight: Option<PixelRect>,
}

impl FrameRequest {
    pub fn new(image: ImageDimensions, viewport: Viewport, params: RenderParameters) -> Self {
        FrameRequest {
            image,
            viewport,
            params,
            accumulation: AccumulationMode::default(),
            jitter: JitterSpec::Zero,
            highlight: None,
        }
    }

    pub fn with_jitter(mut self, jitter: JitterSpec) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_accumulation(mut self, accumulation: AccumulationMode) -> Self {
        self.accumulation = accumulation;
        self
    }

    pub fn with_highlight(mut self, highlight: Option<PixelRect>) -> Self {
        self.highlight = highlight;
        self
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        self.image.validate()?;
        self.viewport.validate()?;
        self.params.validate()?;
        if let Some(highlight) = &self.highlight {
            highlight.validate(&self.image)?;
        }
        self.jitter.validate()
    }
}

/// Contents of a parameter file in `params/`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MandelbrotParams {
    pub image: ImageDimensions,
    pub viewport: Viewport,
    pub render: RenderParameters,
    #[serde(default)]
    pub accumulation: AccumulationMode,
    /// Seed of the per-row jitter generators.
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub highlight: Option<PixelRect>,
}

impl MandelbrotParams {
    pub fn validate(&self) -> Result<(), RenderError> {
        self.frame_request().validate()?;
        self.pool.validate()
    }

    pub fn frame_request(&self) -> FrameRequest {
        FrameRequest::new(self.image, self.viewport, self.render)
            .with_accumulation(self.accumulation)
            .with_jitter(JitterSpec::Random { seed: self.seed })
            .with_highlight(self.highlight)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderBackend {
    WorkerPool,
    Direct,
    #[cfg(feature = "gpu")]
    Gpu,
}

impl RenderBackend {
    pub fn label(&self) -> &'static str {
        match self {
            RenderBackend::WorkerPool => "worker pool",
            RenderBackend::Direct => "rayon direct",
            #[cfg(feature = "gpu")]
            RenderBackend::Gpu => "gpu",
        }
    }
}

pub fn render_pixels(
    params: &MandelbrotParams,
    backend: RenderBackend,
    stopwatch: &mut Stopwatch,
) -> Result<PixelBuffer, RenderError> {
    let frame = params.frame_request();
    match backend {
        RenderBackend::WorkerPool => {
            let pool = WorkerPool::new(params.pool.clone(), MandelbrotRowWorker)?;
            stopwatch.record_split("start worker pool".to_owned());
            let orchestrator = FrameOrchestrator::new(Arc::new(pool));
            orchestrator.render_frame(&frame, &mut LogProgress::default())
        }
        RenderBackend::Direct => render_frame_direct(&frame),
        #[cfg(feature = "gpu")]
        RenderBackend::Gpu => {
            frame.validate()?;
            let program = GpuProgram::new(GpuContext::new()?);
            stopwatch.record_split("compile GPU program".to_owned());
            let uniforms = GpuUniforms::from_frame(&frame)?;
            Ok(program.render(&frame.image, &uniforms)?)
        }
    }
}

/**
 * Renders a parameter file and writes `<prefix>.json`, `<prefix>.png` and
 * `<prefix>_diagnostics.txt`.
 */
pub fn render(
    params: &MandelbrotParams,
    backend: RenderBackend,
    file_prefix: &FilePrefix,
) -> Result<(), RenderError> {
    let mut stopwatch = Stopwatch::new("Render Stopwatch".to_owned());
    params.validate()?;
    serialize_to_json(params, file_prefix)?;
    stopwatch.record_split("basic setup".to_owned());

    let pixels = render_pixels(params, backend, &mut stopwatch)?;
    stopwatch.record_split("render frame".to_owned());

    write_image_to_file(&file_prefix.with_suffix(".png"), |f| pixels.to_image().save(f))?;
    stopwatch.record_split("write PNG".to_owned());

    let digest = pixels.digest();
    let mut diagnostics_file = file_prefix.create_file_with_suffix("_diagnostics.txt")?;
    stopwatch.display(&mut diagnostics_file)?;
    writeln!(diagnostics_file, "Backend: {}", backend.label())?;
    writeln!(diagnostics_file, "Pixel digest (sha256): {}", digest)?;
    log::info!(
        "Rendered {}x{} with the {} backend in {:?}, digest {}",
        params.image.width,
        params.image.height,
        backend.label(),
        stopwatch.total_elapsed(),
        digest
    );
    Ok(())
}
