//! Asynchronous tile rendering.
//!
//! A single worker thread consumes render requests, drives the document
//! engine strictly one render at a time, and posts finished tiles back to
//! the interactive thread over a channel. Cancellation is cooperative:
//! the worker checks the stop flag before rendering and again before
//! delivering, so a stopped pipeline never resurrects state for a closed
//! document. A page that fails to render is reported once and recorded in
//! a shared errored set so schedulers stop asking for it.

mod queue;

pub use queue::RenderQueue;

use image::DynamicImage;
use log::{debug, error};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tileview_cache::Tile;
use tileview_engine::{DocumentEngine, DocumentHandle, EngineError, PixelSize, RenderOptions};
use tileview_scheduler::RenderRequest;

/// What the worker posts back to the interactive thread.
#[derive(Debug)]
pub enum PipelineEvent {
    TileReady(Tile),
    PageError { page: u32, error: EngineError },
}

/// Handle to the render worker. Owned by the document session; dropping
/// it stops and joins the worker.
pub struct RenderPipeline {
    queue: Arc<RenderQueue>,
    errored: Arc<Mutex<HashSet<u32>>>,
    active: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl RenderPipeline {
    /// Spawn the worker for one open document. Returns the pipeline handle
    /// and the receiving end of the delivery channel; the consumer drains
    /// it on the interactive thread.
    pub fn spawn<E>(
        engine: Arc<Mutex<E>>,
        document: DocumentHandle,
    ) -> (Self, Receiver<PipelineEvent>)
    where
        E: DocumentEngine + Send + 'static,
    {
        let queue = Arc::new(RenderQueue::new());
        let errored = Arc::new(Mutex::new(HashSet::new()));
        let active = Arc::new(AtomicBool::new(true));
        let (sender, receiver) = mpsc::channel();

        let worker = {
            let queue = Arc::clone(&queue);
            let errored = Arc::clone(&errored);
            let active = Arc::clone(&active);
            thread::Builder::new()
                .name("tile-render-worker".to_owned())
                .spawn(move || worker_loop(engine, document, queue, errored, active, sender))
                .expect("failed to spawn render worker thread")
        };

        (Self { queue, errored, active, worker: Some(worker) }, receiver)
    }

    /// Queue a tile for rendering. Never blocks.
    pub fn enqueue(&self, request: RenderRequest) {
        self.queue.enqueue(request);
    }

    /// Drop all not-yet-started requests. Called before each loading pass.
    pub fn clear_pending(&self) -> usize {
        self.queue.clear_pending()
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// Pages whose last render attempt failed. Shared with the scheduler
    /// so they are not re-requested.
    pub fn errored_pages(&self) -> HashSet<u32> {
        self.errored.lock().unwrap().clone()
    }

    pub fn is_errored(&self, page: u32) -> bool {
        self.errored.lock().unwrap().contains(&page)
    }

    /// Forget a page-level error so an explicit re-navigation can retry it.
    pub fn clear_page_error(&self, page: u32) -> bool {
        self.errored.lock().unwrap().remove(&page)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Mark the pipeline inactive and drop pending work. The worker
    /// discards anything it finishes after this; it is not joined yet.
    pub fn stop(&self) {
        self.active.store(false, Ordering::Release);
        self.queue.stop();
    }

    /// Stop and wait for the worker to exit. Any in-flight render
    /// completes (the engine call cannot be interrupted) but its output is
    /// discarded.
    pub fn shutdown(&mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("render worker panicked during shutdown");
            }
        }
    }
}

impl Drop for RenderPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<E>(
    engine: Arc<Mutex<E>>,
    document: DocumentHandle,
    queue: Arc<RenderQueue>,
    errored: Arc<Mutex<HashSet<u32>>>,
    active: Arc<AtomicBool>,
    sender: Sender<PipelineEvent>,
) where
    E: DocumentEngine + Send + 'static,
{
    while let Some(request) = queue.pop_blocking() {
        if !active.load(Ordering::Acquire) {
            break;
        }

        let page = request.key.page;
        if errored.lock().unwrap().contains(&page) {
            debug!("dropping request for errored page {page}");
            continue;
        }

        let width = request.width.round() as u32;
        let height = request.height.round() as u32;
        if width == 0 || height == 0 {
            continue;
        }

        let options = RenderOptions {
            best_quality: request.best_quality,
            annotations: request.annotations,
        };
        let result = {
            // One render in flight at a time: the engine is not reentrant
            // across pages.
            let engine = engine.lock().unwrap();
            engine.render_region(
                document,
                page,
                PixelSize::new(width, height),
                request.key.bounds,
                options,
            )
        };

        match result {
            Ok(image) => {
                let bitmap = if request.best_quality {
                    DynamicImage::ImageRgba8(image)
                } else {
                    // Downgraded pixel format for ordinary tiles.
                    DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image).to_rgb8())
                };
                let tile =
                    Tile::new(request.key, bitmap, request.cache_order, request.best_quality);

                if active.load(Ordering::Acquire) {
                    let _ = sender.send(PipelineEvent::TileReady(tile));
                } else {
                    debug!("discarding tile for page {page}: pipeline stopped mid-render");
                }
            }
            Err(err) => {
                error!("failed to render page {page}: {err}");
                errored.lock().unwrap().insert(page);
                if active.load(Ordering::Acquire) {
                    let _ = sender.send(PipelineEvent::PageError { page, error: err });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tileview_cache::TileKey;
    use tileview_engine::{OpenSource, PageSize, RelBounds, RgbaImage};

    /// Engine stub with controllable per-page failures and render latency.
    struct TestEngine {
        fail_pages: HashSet<u32>,
        render_delay: Duration,
    }

    impl TestEngine {
        fn instant() -> Self {
            Self { fail_pages: HashSet::new(), render_delay: Duration::ZERO }
        }

        fn failing(pages: &[u32]) -> Self {
            Self { fail_pages: pages.iter().copied().collect(), render_delay: Duration::ZERO }
        }

        fn slow(delay: Duration) -> Self {
            Self { fail_pages: HashSet::new(), render_delay: delay }
        }
    }

    impl DocumentEngine for TestEngine {
        fn open(&mut self, _source: OpenSource) -> Result<DocumentHandle, EngineError> {
            Ok(DocumentHandle::new(1))
        }

        fn page_count(&self, _handle: DocumentHandle) -> Result<u32, EngineError> {
            Ok(4)
        }

        fn page_size(
            &self,
            _handle: DocumentHandle,
            _page_index: u32,
        ) -> Result<PageSize, EngineError> {
            Ok(PageSize::new(512.0, 512.0))
        }

        fn render_region(
            &self,
            _handle: DocumentHandle,
            page_index: u32,
            target: PixelSize,
            _region: RelBounds,
            _options: RenderOptions,
        ) -> Result<RgbaImage, EngineError> {
            if !self.render_delay.is_zero() {
                thread::sleep(self.render_delay);
            }
            if self.fail_pages.contains(&page_index) {
                return Err(EngineError::PageRender {
                    page: page_index,
                    message: "synthetic failure".to_owned(),
                });
            }
            Ok(RgbaImage::new(target.width, target.height))
        }

        fn close(&mut self, _handle: DocumentHandle) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn spawn_pipeline(engine: TestEngine) -> (RenderPipeline, Receiver<PipelineEvent>) {
        // The stub ignores the handle, so any value works.
        RenderPipeline::spawn(Arc::new(Mutex::new(engine)), DocumentHandle::new(1))
    }

    fn request(page: u32, order: u32, best_quality: bool) -> RenderRequest {
        RenderRequest {
            key: TileKey::new(page, RelBounds::new(0.0, 0.0, 0.5, 0.5)),
            width: 64.0,
            height: 48.0,
            cache_order: order,
            best_quality,
            annotations: false,
        }
    }

    fn recv(receiver: &Receiver<PipelineEvent>) -> PipelineEvent {
        receiver
            .recv_timeout(Duration::from_secs(2))
            .expect("expected a pipeline event in time")
    }

    #[test]
    fn renders_and_delivers_a_tile() {
        let (pipeline, events) = spawn_pipeline(TestEngine::instant());

        pipeline.enqueue(request(0, 1, false));

        match recv(&events) {
            PipelineEvent::TileReady(tile) => {
                assert_eq!(tile.key.page, 0);
                assert_eq!(tile.cache_order, 1);
                assert_eq!(tile.bitmap.width(), 64);
                assert_eq!(tile.bitmap.height(), 48);
                // Ordinary tiles are downgraded from RGBA.
                assert!(matches!(tile.bitmap, DynamicImage::ImageRgb8(_)));
            }
            other => panic!("expected TileReady, got {other:?}"),
        }
    }

    #[test]
    fn best_quality_keeps_the_full_pixel_format() {
        let (pipeline, events) = spawn_pipeline(TestEngine::instant());

        pipeline.enqueue(request(0, 1, true));

        match recv(&events) {
            PipelineEvent::TileReady(tile) => {
                assert!(tile.best_quality);
                assert!(matches!(tile.bitmap, DynamicImage::ImageRgba8(_)));
            }
            other => panic!("expected TileReady, got {other:?}"),
        }
    }

    #[test]
    fn cleared_requests_are_never_delivered() {
        let (pipeline, events) = spawn_pipeline(TestEngine::slow(Duration::from_millis(60)));

        // First request starts rendering; the rest sit in the queue.
        pipeline.enqueue(request(0, 1, false));
        thread::sleep(Duration::from_millis(20));
        pipeline.enqueue(request(1, 2, false));
        pipeline.enqueue(request(2, 3, false));
        pipeline.clear_pending();

        let mut delivered = Vec::new();
        while let Ok(event) = events.recv_timeout(Duration::from_millis(250)) {
            if let PipelineEvent::TileReady(tile) = event {
                delivered.push(tile.key.page);
            }
        }

        // Only the in-flight render survives the clear.
        assert_eq!(delivered, vec![0]);
    }

    #[test]
    fn stop_discards_results_of_in_flight_renders() {
        let (pipeline, events) = spawn_pipeline(TestEngine::slow(Duration::from_millis(80)));

        pipeline.enqueue(request(0, 1, false));
        thread::sleep(Duration::from_millis(20));
        pipeline.stop();

        assert!(events.recv_timeout(Duration::from_millis(300)).is_err());
        assert!(!pipeline.is_active());
    }

    #[test]
    fn page_error_is_reported_once_and_page_is_skipped() {
        let (pipeline, events) = spawn_pipeline(TestEngine::failing(&[1]));

        pipeline.enqueue(request(1, 1, false));
        match recv(&events) {
            PipelineEvent::PageError { page, .. } => assert_eq!(page, 1),
            other => panic!("expected PageError, got {other:?}"),
        }
        assert!(pipeline.is_errored(1));

        // Further requests for the errored page are dropped silently, and
        // the worker keeps serving other pages.
        pipeline.enqueue(request(1, 2, false));
        pipeline.enqueue(request(0, 3, false));

        match recv(&events) {
            PipelineEvent::TileReady(tile) => assert_eq!(tile.key.page, 0),
            other => panic!("expected TileReady for page 0, got {other:?}"),
        }
    }

    #[test]
    fn cleared_page_error_allows_a_retry() {
        let (pipeline, events) = spawn_pipeline(TestEngine::failing(&[2]));

        pipeline.enqueue(request(2, 1, false));
        let _ = recv(&events);
        assert!(pipeline.is_errored(2));

        assert!(pipeline.clear_page_error(2));
        assert!(!pipeline.is_errored(2));

        // The stub still fails the page, so the retry reports again.
        pipeline.enqueue(request(2, 2, false));
        match recv(&events) {
            PipelineEvent::PageError { page, .. } => assert_eq!(page, 2),
            other => panic!("expected PageError, got {other:?}"),
        }
    }

    #[test]
    fn zero_sized_requests_are_dropped() {
        let (pipeline, events) = spawn_pipeline(TestEngine::instant());

        let mut degenerate = request(0, 1, false);
        degenerate.width = 0.2;
        pipeline.enqueue(degenerate);
        pipeline.enqueue(request(0, 2, false));

        match recv(&events) {
            PipelineEvent::TileReady(tile) => assert_eq!(tile.cache_order, 2),
            other => panic!("expected TileReady, got {other:?}"),
        }
    }

    #[test]
    fn shutdown_joins_the_worker() {
        let (mut pipeline, _events) = spawn_pipeline(TestEngine::instant());
        pipeline.enqueue(request(0, 1, false));
        pipeline.shutdown();
        assert!(!pipeline.is_active());
    }
}
