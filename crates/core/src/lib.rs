//! Document session: the viewer-facing facade over layout, cache,
//! scheduler and pipeline.
//!
//! The display layer owns a `DocumentSession`, forwards viewport changes
//! into it, pumps completed tiles out of it on the interactive thread,
//! and draws whatever the cache holds.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use tileview_cache::{CacheConfig, CacheStats, TileCache, TileKey};
use tileview_engine::{
    DocumentEngine, DocumentHandle, EngineError, OpenSource, PixelSize,
};
use tileview_layout::{DocumentLayout, FitPolicy, LayoutOptions, ScrollDirection};
use tileview_pipeline::{PipelineEvent, RenderPipeline};
use tileview_scheduler::{PassSummary, SchedulerConfig, TileScheduler, ViewportState};

/// Everything an embedder can tune about a viewer session. Serializable
/// so hosts can persist it alongside their own preferences.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewerConfig {
    pub fit_policy: FitPolicy,
    pub scroll_direction: ScrollDirection,
    pub spacing_px: f32,
    pub auto_spacing: bool,
    pub fit_each_page: bool,
    pub best_quality: bool,
    pub annotations: bool,
    pub cache_capacity: usize,
    pub thumbnail_capacity: usize,
    pub tile_size: f32,
    pub preload_margin: f32,
    pub thumbnail_ratio: f32,
    pub min_zoom: f32,
    pub max_zoom: f32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            fit_policy: FitPolicy::Width,
            scroll_direction: ScrollDirection::Vertical,
            spacing_px: 0.0,
            auto_spacing: false,
            fit_each_page: false,
            best_quality: false,
            annotations: false,
            cache_capacity: 120,
            thumbnail_capacity: 8,
            tile_size: 256.0,
            preload_margin: 20.0,
            thumbnail_ratio: 0.3,
            min_zoom: 1.0,
            max_zoom: 10.0,
        }
    }
}

impl ViewerConfig {
    fn layout_options(&self) -> LayoutOptions {
        LayoutOptions {
            fit_policy: self.fit_policy,
            scroll_direction: self.scroll_direction,
            spacing_px: self.spacing_px,
            auto_spacing: self.auto_spacing,
            fit_each_page: self.fit_each_page,
        }
    }

    fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            capacity: self.cache_capacity,
            thumbnail_capacity: self.thumbnail_capacity,
        }
    }

    fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tile_size: self.tile_size,
            preload_margin: self.preload_margin,
            thumbnail_ratio: self.thumbnail_ratio,
            best_quality: self.best_quality,
            annotations: self.annotations,
        }
    }
}

/// Document-level failures. Page-level render failures are not errors of
/// the session; they surface as `SessionEvent::PageError`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to open document: {0}")]
    Open(#[source] EngineError),
    #[error("failed to read size of page {page}: {source}")]
    PageSize { page: u32, source: EngineError },
}

/// What `pump_events` hands back for redraw scheduling.
#[derive(Debug)]
pub enum SessionEvent {
    /// A tile was rendered and is now in the cache.
    TileReady(TileKey),
    /// A page failed to render; it will be skipped until
    /// `clear_page_error` re-enables it.
    PageError { page: u32, error: EngineError },
}

pub struct DocumentSession<E: DocumentEngine + Send + 'static> {
    engine: Arc<Mutex<E>>,
    document: DocumentHandle,
    config: ViewerConfig,
    layout: DocumentLayout,
    cache: TileCache,
    scheduler: TileScheduler,
    pipeline: RenderPipeline,
    events: Receiver<PipelineEvent>,
    viewport: ViewportState,
    recycled: bool,
}

impl<E: DocumentEngine + Send + 'static> DocumentSession<E> {
    /// Open a document and start its render worker. Reads every page size
    /// up front; a failure here is fatal to the session. Ends with an
    /// initial loading pass for the top of the document.
    pub fn open(
        mut engine: E,
        source: OpenSource,
        config: ViewerConfig,
        viewport_size: PixelSize,
    ) -> Result<Self, SessionError> {
        let document = engine.open(source).map_err(SessionError::Open)?;
        let page_count = engine.page_count(document).map_err(SessionError::Open)?;

        let mut sizes = Vec::with_capacity(page_count as usize);
        for page in 0..page_count {
            let size = engine
                .page_size(document, page)
                .map_err(|source| SessionError::PageSize { page, source })?;
            sizes.push(size);
        }

        let layout = DocumentLayout::new(sizes, config.layout_options(), viewport_size);
        let engine = Arc::new(Mutex::new(engine));
        let (pipeline, events) = RenderPipeline::spawn(Arc::clone(&engine), document);

        let mut session = Self {
            engine,
            document,
            layout,
            cache: TileCache::new(config.cache_config()),
            scheduler: TileScheduler::new(config.scheduler_config()),
            pipeline,
            events,
            viewport: ViewportState::new(
                0.0,
                0.0,
                config.min_zoom,
                viewport_size.width as f32,
                viewport_size.height as f32,
            ),
            config,
            recycled: false,
        };
        session.load_pages();
        Ok(session)
    }

    /// New scroll position, zoom or viewport size. Triggers a loading
    /// pass: stale pending renders are dropped, the cache rotates its
    /// generations, and the scheduler re-emits what the new viewport
    /// needs.
    pub fn on_viewport_changed(&mut self, offset_x: f32, offset_y: f32, zoom: f32, size: PixelSize) {
        if self.recycled {
            return;
        }

        let zoom = zoom.clamp(self.config.min_zoom, self.config.max_zoom);
        let width = size.width as f32;
        let height = size.height as f32;
        let resized = width != self.viewport.width || height != self.viewport.height;

        self.viewport = ViewportState::new(offset_x, offset_y, zoom, width, height);
        if resized {
            self.layout.recompute(size);
        }

        self.load_pages();
    }

    /// Drain completed work from the render worker. Must run on the
    /// interactive thread: it is the only place tiles enter the cache.
    /// After `recycle`, anything still in the channel is discarded.
    pub fn pump_events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            match event {
                PipelineEvent::TileReady(tile) => {
                    if self.recycled {
                        debug!("discarding tile for recycled session");
                        continue;
                    }
                    let key = tile.key;
                    if key.thumbnail {
                        self.cache.insert_thumbnail(tile);
                    } else {
                        self.cache.insert(tile);
                    }
                    out.push(SessionEvent::TileReady(key));
                }
                PipelineEvent::PageError { page, error } => {
                    if self.recycled {
                        continue;
                    }
                    warn!("page {page} failed to render: {error}");
                    out.push(SessionEvent::PageError { page, error });
                }
            }
        }
        out
    }

    /// Tear the session down: stop the worker, wait for it, discard
    /// stragglers, free all cached bitmaps, close the document. The
    /// ordering guarantees no late tile can land in a cleared cache.
    pub fn recycle(&mut self) {
        if self.recycled {
            return;
        }
        self.recycled = true;

        self.pipeline.shutdown();
        while self.events.try_recv().is_ok() {}
        self.cache.clear();

        let mut engine = self.engine.lock().unwrap();
        if let Err(err) = engine.close(self.document) {
            warn!("failed to close document: {err}");
        }
    }

    pub fn is_recycled(&self) -> bool {
        self.recycled
    }

    pub fn layout(&self) -> &DocumentLayout {
        &self.layout
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn viewport(&self) -> ViewportState {
        self.viewport
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn page_count(&self) -> u32 {
        self.layout.page_count()
    }

    pub fn pending_renders(&self) -> usize {
        self.pipeline.pending_len()
    }

    pub fn is_page_errored(&self, page: u32) -> bool {
        self.pipeline.is_errored(page)
    }

    /// Re-enable a page that previously failed, so the next pass over it
    /// retries the render.
    pub fn clear_page_error(&self, page: u32) -> bool {
        self.pipeline.clear_page_error(page)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn load_pages(&mut self) -> PassSummary {
        self.pipeline.clear_pending();
        self.cache.begin_new_pass();

        let errored = self.pipeline.errored_pages();
        let pipeline = &self.pipeline;
        let summary = self.scheduler.run_pass(
            &self.layout,
            &self.viewport,
            &self.cache,
            &errored,
            &mut |request| pipeline.enqueue(request),
        );
        debug!(
            "loading pass: {} emitted, {} promoted, {} thumbnails",
            summary.emitted, summary.promoted, summary.thumbnails
        );
        summary
    }
}

impl<E: DocumentEngine + Send + 'static> Drop for DocumentSession<E> {
    fn drop(&mut self) {
        self.recycle();
    }
}
