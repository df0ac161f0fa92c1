use std::time::{Duration, Instant};

use crate::core::error::RenderError;

/// Progress information for an ongoing frame render.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RenderProgress {
    pub completed_rows: u32,
    pub total_rows: u32,
}

impl RenderProgress {
    pub fn new(total_rows: u32) -> Self {
        Self {
            completed_rows: 0,
            total_rows,
        }
    }

    /// Completion percentage on [0, 100].
    pub fn percentage(&self) -> f32 {
        if self.total_rows == 0 {
            0.0
        } else {
            (self.completed_rows as f32 / self.total_rows as f32) * 100.0
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed_rows == self.total_rows
    }
}

/// Receives progress notifications from a frame render, on the rendering thread.
pub trait ProgressSink {
    fn frame_started(&mut self, _total_rows: u32) {}

    /// Called once per finished row; `progress.completed_rows` never decreases.
    fn row_completed(&mut self, progress: RenderProgress);

    fn frame_completed(&mut self, _total_rows: u32, _elapsed: Duration) {}

    fn frame_failed(&mut self, _error: &RenderError) {}
}

/// Discards all notifications.
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn row_completed(&mut self, _progress: RenderProgress) {}
}

/// Logs every tenth of the frame at info level, and failures as warnings.
#[derive(Debug, Default)]
pub struct LogProgress {
    last_decile: u32,
    started: Option<Instant>,
}

impl ProgressSink for LogProgress {
    fn frame_started(&mut self, total_rows: u32) {
        self.last_decile = 0;
        self.started = Some(Instant::now());
        log::info!("rendering 0/{} rows", total_rows);
    }

    fn row_completed(&mut self, progress: RenderProgress) {
        let decile = (progress.percentage() / 10.0) as u32;
        if decile > self.last_decile {
            self.last_decile = decile;
            log::info!(
                "rendering {}/{} rows",
                progress.completed_rows,
                progress.total_rows
            );
        }
    }

    fn frame_completed(&mut self, total_rows: u32, elapsed: Duration) {
        log::info!("rendered {} rows in {:?}", total_rows, elapsed);
    }

    fn frame_failed(&mut self, error: &RenderError) {
        let elapsed = self.started.map(|started| started.elapsed());
        log::warn!("frame render failed after {:?}: {}", elapsed, error);
    }
}
