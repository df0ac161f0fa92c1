use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use super::{
    pool::{ReplyBatch, WorkerPool},
    progress::{ProgressSink, RenderProgress},
};
use crate::{
    core::{error::RenderError, image_utils::PixelBuffer},
    fractals::mandelbrot::FrameRequest,
};

/**
 * Renders whole frames by submitting one request per scanline to a `WorkerPool`
 * and assembling the rows as they complete, in whatever order they arrive.
 *
 * Only the newest render is kept alive: starting a render cancels the rows of any
 * render still in flight on the same orchestrator, which then returns
 * `RenderError::Superseded`. Workers skip the cancelled rows they have not started.
 */
pub struct FrameOrchestrator {
    pool: Arc<WorkerPool>,
    /// Batch group of the newest render, zero before the first one.
    active_group: AtomicU64,
}

impl FrameOrchestrator {
    pub fn new(pool: Arc<WorkerPool>) -> FrameOrchestrator {
        FrameOrchestrator {
            pool,
            active_group: AtomicU64::new(0),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Renders the frame. Any failing row fails the whole frame; no partial image is returned.
    pub fn render_frame(
        &self,
        frame: &FrameRequest,
        progress: &mut dyn ProgressSink,
    ) -> Result<PixelBuffer, RenderError> {
        let batch = self.pool.batch();
        let previous = self.active_group.swap(batch.group(), Ordering::SeqCst);
        if previous != 0 {
            self.pool.cancel(previous);
        }
        let start = Instant::now();
        match self.render_batch(frame, batch, progress) {
            Ok(pixels) => {
                progress.frame_completed(frame.image.height, start.elapsed());
                Ok(pixels)
            }
            Err(error) => {
                progress.frame_failed(&error);
                Err(error)
            }
        }
    }

    /// Renders into `target`, which is only overwritten once every row succeeded.
    pub fn render_into(
        &self,
        frame: &FrameRequest,
        target: &mut PixelBuffer,
        progress: &mut dyn ProgressSink,
    ) -> Result<(), RenderError> {
        if target.dimensions() != frame.image {
            return Err(RenderError::Configuration(format!(
                "target buffer is {}x{}, frame is {}x{}",
                target.dimensions().width,
                target.dimensions().height,
                frame.image.width,
                frame.image.height
            )));
        }
        *target = self.render_frame(frame, progress)?;
        Ok(())
    }

    fn is_superseded(&self, batch: &ReplyBatch) -> bool {
        self.active_group.load(Ordering::SeqCst) != batch.group()
    }

    fn render_batch(
        &self,
        frame: &FrameRequest,
        mut batch: ReplyBatch,
        progress: &mut dyn ProgressSink,
    ) -> Result<PixelBuffer, RenderError> {
        frame.validate()?;
        let group = batch.group();
        let total_rows = frame.image.height;
        let expected_len = frame.image.row_bytes();
        let mut status = RenderProgress::new(total_rows);
        let aggregate = |completed_rows: u32, source: RenderError| RenderError::AggregateRender {
            completed_rows,
            total_rows,
            source: Box::new(source),
        };

        progress.frame_started(total_rows);
        let shared_frame = Arc::new(frame.clone());
        for row in 0..total_rows {
            self.pool
                .submit_into(&mut batch, &shared_frame, row)
                .map_err(|error| aggregate(0, error))?;
        }
        log::debug!(
            "frame {}: submitted {} rows to {} workers ({:?} dispatch, {:?} per row)",
            group,
            total_rows,
            self.pool.worker_count(),
            self.pool.dispatch(),
            self.pool.response_timeout()
        );

        let mut pixels = PixelBuffer::new(frame.image);
        while !batch.is_empty() {
            if self.is_superseded(&batch) {
                log::debug!(
                    "frame {}: superseded with {} rows outstanding",
                    group,
                    batch.outstanding()
                );
                return Err(RenderError::Superseded);
            }

            let response = match batch.next_reply() {
                Ok(response) => response,
                Err(RenderError::Superseded) => {
                    log::debug!("frame {}: rows cancelled by a newer render", group);
                    return Err(RenderError::Superseded);
                }
                Err(error) => {
                    log::warn!("frame {}: {}", group, error);
                    return Err(aggregate(status.completed_rows, error));
                }
            };
            if response.row_pixels.len() != expected_len {
                return Err(aggregate(
                    status.completed_rows,
                    RenderError::MalformedResponse {
                        correlation_id: response.correlation_id,
                        expected: expected_len,
                        actual: response.row_pixels.len(),
                    },
                ));
            }
            pixels.row_mut(response.row).copy_from_slice(&response.row_pixels);

            status.completed_rows += 1;
            progress.row_completed(status);
        }
        assert!(status.is_complete());
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, thread, time::Duration};

    use super::*;
    use crate::{
        core::{
            color_map::INTERIOR_COLOR,
            complex::ComplexNumber,
            image_utils::{ImageDimensions, Viewport},
        },
        fractals::mandelbrot::RenderParameters,
        workers::{
            pool::{DispatchPolicy, MandelbrotRowWorker, PoolConfig, RowWorker},
            progress::NoProgress,
            protocol::RenderRequest,
        },
    };

    fn pool<W: RowWorker>(worker_count: usize, worker: W) -> Arc<WorkerPool> {
        pool_with_timeout(worker_count, worker, 5000)
    }

    fn pool_with_timeout<W: RowWorker>(
        worker_count: usize,
        worker: W,
        response_timeout_ms: u64,
    ) -> Arc<WorkerPool> {
        let config = PoolConfig {
            worker_count: Some(worker_count),
            dispatch: DispatchPolicy::SharedQueue,
            response_timeout_ms,
        };
        Arc::new(WorkerPool::new(config, worker).unwrap())
    }

    fn frame(width: u32, height: u32) -> FrameRequest {
        FrameRequest::new(
            ImageDimensions::new(width, height),
            Viewport::new(ComplexNumber::new(-2.0, -1.0), 2.0),
            RenderParameters::default(),
        )
    }

    /// Fills each row with its own index; earlier rows take longer.
    struct ReversedRow {
        height: u32,
    }

    impl RowWorker for ReversedRow {
        fn render_row(&self, request: &RenderRequest) -> Result<Vec<u8>, String> {
            thread::sleep(Duration::from_millis(3 * (self.height - request.row) as u64));
            Ok(vec![request.row as u8; request.frame.image.row_bytes()])
        }
    }

    struct ShortRow;

    impl RowWorker for ShortRow {
        fn render_row(&self, request: &RenderRequest) -> Result<Vec<u8>, String> {
            Ok(vec![0; request.frame.image.row_bytes() - 1])
        }
    }

    struct SlowRow;

    impl RowWorker for SlowRow {
        fn render_row(&self, request: &RenderRequest) -> Result<Vec<u8>, String> {
            thread::sleep(Duration::from_millis(40));
            Ok(vec![9; request.frame.image.row_bytes()])
        }
    }

    /// Like `SlowRow`, and counts the rows it actually rendered.
    struct CountingRow(Arc<AtomicUsize>);

    impl RowWorker for CountingRow {
        fn render_row(&self, request: &RenderRequest) -> Result<Vec<u8>, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(40));
            Ok(vec![9; request.frame.image.row_bytes()])
        }
    }

    struct HangingRow;

    impl RowWorker for HangingRow {
        fn render_row(&self, request: &RenderRequest) -> Result<Vec<u8>, String> {
            thread::sleep(Duration::from_millis(500));
            Ok(vec![0; request.frame.image.row_bytes()])
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        completed: Vec<u32>,
        failures: usize,
    }

    impl ProgressSink for RecordingProgress {
        fn row_completed(&mut self, progress: RenderProgress) {
            self.completed.push(progress.completed_rows);
        }

        fn frame_failed(&mut self, _error: &RenderError) {
            self.failures += 1;
        }
    }

    #[test]
    fn test_rows_land_in_place_despite_arrival_order() {
        let height = 12;
        let orchestrator = FrameOrchestrator::new(pool(4, ReversedRow { height }));
        let mut progress = RecordingProgress::default();
        let pixels = orchestrator
            .render_frame(&frame(3, height), &mut progress)
            .unwrap();
        for row in 0..height {
            assert!(pixels.row(row).iter().all(|&byte| byte == row as u8));
        }
        assert_eq!(progress.completed, (1..=height).collect::<Vec<u32>>());
        assert_eq!(orchestrator.pool().pending_count(), 0);
    }

    #[test]
    fn test_small_frame_interior_and_escaped() {
        let orchestrator = FrameOrchestrator::new(pool(2, MandelbrotRowWorker));
        let request = FrameRequest::new(
            ImageDimensions::new(4, 4),
            Viewport::from_scale(ComplexNumber::new(-1.5, -1.0), 0.5),
            RenderParameters {
                samples: 1,
                max_iterations: 50,
                iter_hue_adjust: 32.0,
                threshold: 4.0,
            },
        );
        let pixels = orchestrator.render_frame(&request, &mut NoProgress).unwrap();
        // Pixel (3, 2) samples the origin, pixel (0, 0) samples -1.5 - 1i.
        assert_eq!(pixels.pixel(3, 2), [255, 255, 255, 255]);
        assert_eq!(&pixels.pixel(3, 2)[..3], &INTERIOR_COLOR.0);
        assert_ne!(&pixels.pixel(0, 0)[..3], &INTERIOR_COLOR.0);
    }

    #[test]
    fn test_malformed_row_fails_frame_and_keeps_target() {
        let orchestrator = FrameOrchestrator::new(pool(2, ShortRow));
        let request = frame(5, 3);
        let mut target = PixelBuffer::new(request.image);
        target.row_mut(1)[0] = 77;
        let before = target.clone();
        let mut progress = RecordingProgress::default();

        let error = orchestrator
            .render_into(&request, &mut target, &mut progress)
            .unwrap_err();
        assert!(matches!(
            error.root_cause(),
            RenderError::MalformedResponse {
                expected: 20,
                actual: 19,
                ..
            }
        ));
        assert!(matches!(error, RenderError::AggregateRender { total_rows: 3, .. }));
        assert_eq!(target, before);
        assert_eq!(progress.failures, 1);
    }

    #[test]
    fn test_invalid_parameters_are_rejected_before_submission() {
        let orchestrator = FrameOrchestrator::new(pool(1, ShortRow));
        let mut request = frame(4, 4);
        request.params.threshold = -1.0;
        assert!(matches!(
            orchestrator.render_frame(&request, &mut NoProgress),
            Err(RenderError::Configuration(_))
        ));
        assert_eq!(orchestrator.pool().pending_count(), 0);
    }

    #[test]
    fn test_slow_healthy_rows_outlast_the_row_timeout() {
        // Eight 40 ms rows on one worker: the frame takes twice the 150 ms row timeout.
        let orchestrator = FrameOrchestrator::new(pool_with_timeout(1, SlowRow, 150));
        let pixels = orchestrator
            .render_frame(&frame(2, 8), &mut NoProgress)
            .unwrap();
        for row in 0..8 {
            assert_eq!(pixels.row(row), &[9; 8]);
        }
    }

    #[test]
    fn test_unresponsive_worker_times_out_frame_and_keeps_target() {
        let orchestrator = FrameOrchestrator::new(pool_with_timeout(1, HangingRow, 50));
        let request = frame(3, 2);
        let mut target = PixelBuffer::new(request.image);
        target.row_mut(0)[2] = 31;
        let before = target.clone();
        let mut progress = RecordingProgress::default();

        let error = orchestrator
            .render_into(&request, &mut target, &mut progress)
            .unwrap_err();
        assert!(matches!(
            error.root_cause(),
            RenderError::WorkerTimeout { row: 0, .. }
        ));
        assert!(matches!(
            error,
            RenderError::AggregateRender {
                completed_rows: 0,
                total_rows: 2,
                ..
            }
        ));
        assert_eq!(target, before);
        assert_eq!(progress.failures, 1);
        assert!(progress.completed.is_empty());
        assert_eq!(orchestrator.pool().pending_count(), 0);
    }

    #[test]
    fn test_newer_render_supersedes_older() {
        let rendered = Arc::new(AtomicUsize::new(0));
        let orchestrator = Arc::new(FrameOrchestrator::new(pool_with_timeout(
            1,
            CountingRow(Arc::clone(&rendered)),
            300,
        )));
        let older = {
            let orchestrator = Arc::clone(&orchestrator);
            thread::spawn(move || orchestrator.render_frame(&frame(2, 10), &mut NoProgress))
        };
        thread::sleep(Duration::from_millis(60));
        let newer = orchestrator.render_frame(&frame(2, 1), &mut NoProgress);

        assert!(matches!(older.join().unwrap(), Err(RenderError::Superseded)));
        assert_eq!(newer.unwrap().row(0), &[9; 8]);
        // The older frame's unstarted rows were skipped, not rendered.
        more_asserts::assert_le!(rendered.load(Ordering::SeqCst), 3);
    }
}
