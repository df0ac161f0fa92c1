//! Messages exchanged between the pool and its worker threads.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::fractals::mandelbrot::FrameRequest;

/// One scanline of work. Every field a worker needs travels with the request.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RenderRequest {
    pub correlation_id: u64,
    pub row: u32,
    pub frame: Arc<FrameRequest>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RenderResponse {
    pub correlation_id: u64,
    pub row: u32,
    /// RGBA bytes of the row, `width * 4` long when well formed.
    pub row_pixels: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum WorkerReply {
    Rendered(RenderResponse),
    Failed {
        correlation_id: u64,
        row: u32,
        message: String,
    },
}

impl WorkerReply {
    pub fn correlation_id(&self) -> u64 {
        match self {
            WorkerReply::Rendered(response) => response.correlation_id,
            WorkerReply::Failed { correlation_id, .. } => *correlation_id,
        }
    }

    pub fn row(&self) -> u32 {
        match self {
            WorkerReply::Rendered(response) => response.row,
            WorkerReply::Failed { row, .. } => *row,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{
            complex::ComplexNumber,
            image_utils::{ImageDimensions, PixelRect, Viewport},
            jitter::JitterSpec,
        },
        fractals::mandelbrot::RenderParameters,
    };

    #[test]
    fn test_request_is_self_contained_on_the_wire() {
        let frame = FrameRequest::new(
            ImageDimensions::new(16, 9),
            Viewport::new(ComplexNumber::new(-0.5557506, -0.5556), 1e-9),
            RenderParameters::default(),
        )
        .with_jitter(JitterSpec::Random { seed: 42 })
        .with_highlight(Some(PixelRect::new(1, 2, 3, 4)));
        let request = RenderRequest {
            correlation_id: 9,
            row: 4,
            frame: Arc::new(frame),
        };

        let text = serde_json::to_string(&request).unwrap();
        let decoded: RenderRequest = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded.correlation_id, 9);
        assert_eq!(decoded.row, 4);
        assert_eq!(*decoded.frame, *request.frame);
    }
}
