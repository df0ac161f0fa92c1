//! Error types shared by the render pipeline.

use std::time::Duration;

use thiserror::Error;

#[cfg(feature = "gpu")]
use crate::gpu::GpuError;

#[derive(Debug, Error)]
pub enum RenderError {
    /// A numeric parameter is out of range. Raised before any rendering work begins.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("no response to request {correlation_id} (row {row}) within {timeout:?}")]
    WorkerTimeout {
        correlation_id: u64,
        row: u32,
        timeout: Duration,
    },

    #[error("malformed response to request {correlation_id}: expected {expected} bytes, got {actual}")]
    MalformedResponse {
        correlation_id: u64,
        expected: usize,
        actual: usize,
    },

    #[error("worker failed on request {correlation_id}: {message}")]
    WorkerFailed { correlation_id: u64, message: String },

    #[error("worker pool is shut down")]
    PoolClosed,

    /// Any one row failing fails the whole frame; there is no partial image.
    #[error("frame render failed after {completed_rows}/{total_rows} rows: {source}")]
    AggregateRender {
        completed_rows: u32,
        total_rows: u32,
        #[source]
        source: Box<RenderError>,
    },

    #[error("frame superseded by a newer render")]
    Superseded,

    #[cfg(feature = "gpu")]
    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RenderError {
    /// The row-level cause of a frame failure, looking through the aggregate wrapper.
    pub fn root_cause(&self) -> &RenderError {
        match self {
            RenderError::AggregateRender { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_reports_row_cause() {
        let error = RenderError::AggregateRender {
            completed_rows: 3,
            total_rows: 8,
            source: Box::new(RenderError::WorkerFailed {
                correlation_id: 7,
                message: "boom".to_owned(),
            }),
        };
        assert!(matches!(
            error.root_cause(),
            RenderError::WorkerFailed {
                correlation_id: 7,
                ..
            }
        ));
        assert_eq!(
            error.to_string(),
            "frame render failed after 3/8 rows: worker failed on request 7: boom"
        );
    }
}
