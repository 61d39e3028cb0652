//! Viewport-driven tile scheduling.
//!
//! One *loading pass* maps the current viewport onto the document layout
//! and decides, page by page and cell by cell, which tiles are needed.
//! Cached tiles are promoted in place; everything else is emitted as a
//! render request. Requests are ordered by proximity to the viewport
//! center (a square spiral out from the center cell), and the pass stops
//! once it has touched as many tiles as the cache can hold.

use log::debug;
use std::collections::HashSet;
use std::ops::RangeInclusive;
use tileview_cache::{TileCache, TileKey};
use tileview_engine::RelBounds;
use tileview_layout::DocumentLayout;

/// Scroll position and zoom of the viewport. Owned by the interactive
/// thread; the scheduler only reads it synchronously during a pass.
/// Offsets are the content-space coordinates of the viewport's top-left
/// corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    pub offset_x: f32,
    pub offset_y: f32,
    pub zoom: f32,
    pub width: f32,
    pub height: f32,
}

impl ViewportState {
    pub fn new(offset_x: f32, offset_y: f32, zoom: f32, width: f32, height: f32) -> Self {
        Self { offset_x, offset_y, zoom, width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    /// Edge length of a full tile, in device-independent pixels.
    pub tile_size: f32,
    /// Extra band around the viewport that is loaded ahead of scrolling,
    /// in pixels, independent of zoom.
    pub preload_margin: f32,
    /// Downscale ratio for per-page thumbnails.
    pub thumbnail_ratio: f32,
    pub best_quality: bool,
    pub annotations: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tile_size: 256.0,
            preload_margin: 20.0,
            thumbnail_ratio: 0.3,
            best_quality: false,
            annotations: false,
        }
    }
}

/// A tile the pipeline should render: cache identity plus target pixel
/// dimensions and the pass-assigned priority. Thumbnail requests carry
/// order 0 and full-page bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub key: TileKey,
    pub width: f32,
    pub height: f32,
    pub cache_order: u32,
    pub best_quality: bool,
    pub annotations: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Requests handed to the emit sink.
    pub emitted: usize,
    /// Cache hits promoted into the active generation.
    pub promoted: usize,
    /// Thumbnail requests emitted (not counted against the pass budget).
    pub thumbnails: usize,
}

struct PageGrid {
    rows: i64,
    cols: i64,
    row_height: f32,
    col_width: f32,
    rel_width: f32,
    rel_height: f32,
}

pub struct TileScheduler {
    config: SchedulerConfig,
}

impl TileScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Run one loading pass. Promotes cache hits, emits misses in
    /// center-out order, and stops once promoted + emitted reaches the
    /// cache capacity. Pages in `errored_pages` and pages whose scaled
    /// size is not yet known are skipped.
    pub fn run_pass(
        &self,
        layout: &DocumentLayout,
        viewport: &ViewportState,
        cache: &TileCache,
        errored_pages: &HashSet<u32>,
        emit: &mut dyn FnMut(RenderRequest),
    ) -> PassSummary {
        let mut summary = PassSummary::default();
        if layout.page_count() == 0 || viewport.zoom <= 0.0 {
            return summary;
        }

        let budget = cache.config().capacity;
        let zoom = viewport.zoom;
        let vertical = layout.options().scroll_direction.is_vertical();
        let margin = self.config.preload_margin;

        let (axis_offset, axis_len) = if vertical {
            (viewport.offset_y, viewport.height)
        } else {
            (viewport.offset_x, viewport.width)
        };
        let axis_first = (axis_offset - margin).max(0.0);
        let axis_last = axis_offset + axis_len + margin;

        let first_page = layout.page_at_offset(axis_first, zoom);
        let last_page = layout.page_at_offset(axis_last, zoom);

        // Thumbnails first, at order 0, so every visible page shows
        // something before any full-resolution tile lands.
        for page in first_page..=last_page {
            if errored_pages.contains(&page) {
                continue;
            }
            let page_size = layout.page_size(page);
            if page_size.is_empty() || cache.contains_thumbnail(page) {
                continue;
            }
            emit(RenderRequest {
                key: TileKey::thumbnail(page),
                width: page_size.width * self.config.thumbnail_ratio,
                height: page_size.height * self.config.thumbnail_ratio,
                cache_order: 0,
                best_quality: self.config.best_quality,
                annotations: self.config.annotations,
            });
            summary.thumbnails += 1;
        }

        let mut cache_order: u32 = 1;
        'pages: for page in first_page..=last_page {
            if errored_pages.contains(&page) {
                debug!("skipping errored page {page}");
                continue;
            }
            let scaled = layout.scaled_page_size(page, zoom);
            if scaled.is_empty() {
                continue;
            }

            let grid = self.grid_for_page(layout, page, zoom);

            // Project the padded viewport into this page's local pixel
            // space and clip to the page.
            let page_start = layout.page_offset(page, zoom);
            let secondary = layout.secondary_offset(page, zoom);
            let (local_left, local_right, local_top, local_bottom) = if vertical {
                (
                    (viewport.offset_x - margin - secondary).clamp(0.0, scaled.width),
                    (viewport.offset_x + viewport.width + margin - secondary)
                        .clamp(0.0, scaled.width),
                    (axis_first - page_start).clamp(0.0, scaled.height),
                    (axis_last - page_start).clamp(0.0, scaled.height),
                )
            } else {
                (
                    (axis_first - page_start).clamp(0.0, scaled.width),
                    (axis_last - page_start).clamp(0.0, scaled.width),
                    (viewport.offset_y - margin - secondary).clamp(0.0, scaled.height),
                    (viewport.offset_y + viewport.height + margin - secondary)
                        .clamp(0.0, scaled.height),
                )
            };
            if local_right <= local_left || local_bottom <= local_top {
                continue;
            }

            let first_col = (local_left / grid.col_width).floor() as i64;
            let last_col = ((local_right / grid.col_width).ceil() as i64 - 1).min(grid.cols - 1);
            let first_row = (local_top / grid.row_height).floor() as i64;
            let last_row = ((local_bottom / grid.row_height).ceil() as i64 - 1).min(grid.rows - 1);
            if first_col > last_col || first_row > last_row {
                continue;
            }

            // Start the spiral at the cell under the viewport center.
            let (center_x, center_y) = if vertical {
                (
                    viewport.offset_x + viewport.width / 2.0 - secondary,
                    viewport.offset_y + viewport.height / 2.0 - page_start,
                )
            } else {
                (
                    viewport.offset_x + viewport.width / 2.0 - page_start,
                    viewport.offset_y + viewport.height / 2.0 - secondary,
                )
            };
            let start_row =
                ((center_y / grid.row_height).floor() as i64).clamp(first_row, last_row);
            let start_col =
                ((center_x / grid.col_width).floor() as i64).clamp(first_col, last_col);

            let mut exhausted = false;
            spiral_window(
                first_row..=last_row,
                first_col..=last_col,
                start_row,
                start_col,
                |row, col| {
                    let loaded = self.load_cell(
                        page,
                        row,
                        col,
                        &grid,
                        cache,
                        &mut cache_order,
                        &mut summary,
                        &mut *emit,
                    );
                    if loaded && summary.emitted + summary.promoted >= budget {
                        exhausted = true;
                        return false;
                    }
                    true
                },
            );
            if exhausted {
                debug!(
                    "pass budget reached at page {page} ({} emitted, {} promoted)",
                    summary.emitted, summary.promoted
                );
                break 'pages;
            }
        }

        summary
    }

    fn grid_for_page(&self, layout: &DocumentLayout, page: u32, zoom: f32) -> PageGrid {
        let scaled = layout.scaled_page_size(page, zoom);
        let rows = (scaled.height / self.config.tile_size).ceil().max(1.0) as i64;
        let cols = (scaled.width / self.config.tile_size).ceil().max(1.0) as i64;
        PageGrid {
            rows,
            cols,
            row_height: scaled.height / rows as f32,
            col_width: scaled.width / cols as f32,
            rel_width: 1.0 / cols as f32,
            rel_height: 1.0 / rows as f32,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn load_cell(
        &self,
        page: u32,
        row: i64,
        col: i64,
        grid: &PageGrid,
        cache: &TileCache,
        cache_order: &mut u32,
        summary: &mut PassSummary,
        emit: &mut dyn FnMut(RenderRequest),
    ) -> bool {
        let rel_x = grid.rel_width * col as f32;
        let rel_y = grid.rel_height * row as f32;
        // Clip the trailing cells so bounds never leave the page.
        let rel_width = grid.rel_width.min(1.0 - rel_x);
        let rel_height = grid.rel_height.min(1.0 - rel_y);

        let width = self.config.tile_size * (rel_width / grid.rel_width);
        let height = self.config.tile_size * (rel_height / grid.rel_height);
        if width <= 0.0 || height <= 0.0 {
            return false;
        }

        let key = TileKey::new(page, RelBounds::new(rel_x, rel_y, rel_x + rel_width, rel_y + rel_height));
        if cache.promote_or_miss(&key, *cache_order) {
            summary.promoted += 1;
        } else {
            emit(RenderRequest {
                key,
                width,
                height,
                cache_order: *cache_order,
                best_quality: self.config.best_quality,
                annotations: self.config.annotations,
            });
            summary.emitted += 1;
        }

        *cache_order += 1;
        true
    }
}

impl Default for TileScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

/// Visit every cell of the window in a square spiral out from the start
/// cell: alternating horizontal and vertical runs of growing length,
/// skipping positions outside the window. The visitor returns `false` to
/// stop early.
fn spiral_window(
    rows: RangeInclusive<i64>,
    cols: RangeInclusive<i64>,
    start_row: i64,
    start_col: i64,
    mut visit: impl FnMut(i64, i64) -> bool,
) {
    let total = (rows.end() - rows.start() + 1) * (cols.end() - cols.start() + 1);
    if total <= 0 || !rows.contains(&start_row) || !cols.contains(&start_col) {
        return;
    }

    let mut row = start_row;
    let mut col = start_col;
    let mut visited = 1i64;
    if !visit(row, col) {
        return;
    }

    let mut run = 1i64;
    let mut direction = 1i64;
    while visited < total {
        for _ in 0..run {
            row += direction;
            if rows.contains(&row) && cols.contains(&col) {
                visited += 1;
                if !visit(row, col) {
                    return;
                }
            }
        }
        for _ in 0..run {
            col += direction;
            if rows.contains(&row) && cols.contains(&col) {
                visited += 1;
                if !visit(row, col) {
                    return;
                }
            }
        }
        run += 1;
        direction = -direction;
    }
}
