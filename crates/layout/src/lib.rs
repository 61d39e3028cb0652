mod fit;

pub use fit::{FitPolicy, PageFitCalculator};

use serde::{Deserialize, Serialize};
use tileview_engine::{PageSize, PixelSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScrollDirection {
    Vertical,
    Horizontal,
}

impl ScrollDirection {
    pub fn is_vertical(self) -> bool {
        matches!(self, ScrollDirection::Vertical)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutOptions {
    pub fit_policy: FitPolicy,
    pub scroll_direction: ScrollDirection,
    /// Fixed gap between consecutive pages, in pixels.
    pub spacing_px: f32,
    /// When set, each page additionally gets the blank margin needed to sit
    /// alone and centered in the viewport along the scroll axis.
    pub auto_spacing: bool,
    pub fit_each_page: bool,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            fit_policy: FitPolicy::Width,
            scroll_direction: ScrollDirection::Vertical,
            spacing_px: 0.0,
            auto_spacing: false,
            fit_each_page: false,
        }
    }
}

/// Per-page geometry of the open document: fitted page sizes, inter-page
/// spacing, cumulative offsets along the scroll axis, and the total length.
/// Immutable between `recompute` calls; `recompute` rebuilds everything
/// from the original sizes whenever the viewport size changes.
#[derive(Debug, Clone)]
pub struct DocumentLayout {
    options: LayoutOptions,
    original_sizes: Vec<PageSize>,
    original_max_width_page: PageSize,
    original_max_height_page: PageSize,
    page_sizes: Vec<PageSize>,
    max_width_page: PageSize,
    max_height_page: PageSize,
    page_spacing: Vec<f32>,
    page_offsets: Vec<f32>,
    document_length: f32,
}

impl DocumentLayout {
    pub fn new(original_sizes: Vec<PageSize>, options: LayoutOptions, viewport: PixelSize) -> Self {
        let mut original_max_width_page = PageSize::ZERO;
        let mut original_max_height_page = PageSize::ZERO;
        for size in &original_sizes {
            if size.width > original_max_width_page.width {
                original_max_width_page = *size;
            }
            if size.height > original_max_height_page.height {
                original_max_height_page = *size;
            }
        }

        let mut layout = Self {
            options,
            original_sizes,
            original_max_width_page,
            original_max_height_page,
            page_sizes: Vec::new(),
            max_width_page: PageSize::ZERO,
            max_height_page: PageSize::ZERO,
            page_spacing: Vec::new(),
            page_offsets: Vec::new(),
            document_length: 0.0,
        };
        layout.recompute(viewport);
        layout
    }

    /// Rebuild fitted sizes, spacing, offsets and total length for a new
    /// viewport size. Idempotent; callers re-derive their scroll offset
    /// afterwards to keep the focused page in place.
    pub fn recompute(&mut self, viewport: PixelSize) {
        let calculator = PageFitCalculator::new(
            self.options.fit_policy,
            self.original_max_width_page,
            self.original_max_height_page,
            viewport,
            self.options.fit_each_page,
        );
        self.max_width_page = calculator.optimal_max_width_page_size();
        self.max_height_page = calculator.optimal_max_height_page_size();

        self.page_sizes =
            self.original_sizes.iter().map(|size| calculator.calculate(*size)).collect();

        if self.options.auto_spacing {
            self.prepare_auto_spacing(viewport);
        }
        self.prepare_document_length();
        self.prepare_page_offsets();
    }

    pub fn page_count(&self) -> u32 {
        self.page_sizes.len() as u32
    }

    pub fn options(&self) -> &LayoutOptions {
        &self.options
    }

    /// Fitted size of a page at zoom 1. `PageSize::ZERO` for an index out
    /// of range, which schedulers treat as "not yet computed, skip".
    pub fn page_size(&self, page_index: u32) -> PageSize {
        self.page_sizes.get(page_index as usize).copied().unwrap_or(PageSize::ZERO)
    }

    pub fn scaled_page_size(&self, page_index: u32, zoom: f32) -> PageSize {
        let size = self.page_size(page_index);
        PageSize::new(size.width * zoom, size.height * zoom)
    }

    pub fn max_page_width(&self) -> f32 {
        self.max_size().width
    }

    pub fn max_page_height(&self) -> f32 {
        self.max_size().height
    }

    pub fn document_length(&self, zoom: f32) -> f32 {
        self.document_length * zoom
    }

    /// Extent of a page along the scroll axis.
    pub fn page_length(&self, page_index: u32, zoom: f32) -> f32 {
        let size = self.page_size(page_index);
        let length = if self.options.scroll_direction.is_vertical() {
            size.height
        } else {
            size.width
        };
        length * zoom
    }

    pub fn page_spacing(&self, page_index: u32, zoom: f32) -> f32 {
        let spacing = if self.options.auto_spacing {
            self.page_spacing.get(page_index as usize).copied().unwrap_or(0.0)
        } else {
            self.options.spacing_px
        };
        spacing * zoom
    }

    /// Start of a page along the scroll axis.
    pub fn page_offset(&self, page_index: u32, zoom: f32) -> f32 {
        self.page_offsets.get(page_index as usize).copied().unwrap_or(0.0) * zoom
    }

    /// Centering gap on the cross axis: X for vertical scrolling, Y for
    /// horizontal.
    pub fn secondary_offset(&self, page_index: u32, zoom: f32) -> f32 {
        let size = self.page_size(page_index);
        if self.options.scroll_direction.is_vertical() {
            zoom * (self.max_page_width() - size.width) / 2.0
        } else {
            zoom * (self.max_page_height() - size.height) / 2.0
        }
    }

    /// Page whose range contains the given scroll-axis coordinate: the page
    /// before the first one whose start strictly exceeds the query, clamped
    /// to 0. An offset exactly on a page start resolves to that page.
    pub fn page_at_offset(&self, offset: f32, zoom: f32) -> u32 {
        let mut current: i64 = 0;
        for page_index in 0..self.page_count() {
            let page_start = self.page_offset(page_index, zoom)
                - self.page_spacing(page_index, zoom) / 2.0;
            if page_start > offset {
                break;
            }
            current += 1;
        }
        (current - 1).max(0) as u32
    }

    fn max_size(&self) -> PageSize {
        if self.options.scroll_direction.is_vertical() {
            self.max_width_page
        } else {
            self.max_height_page
        }
    }

    fn prepare_auto_spacing(&mut self, viewport: PixelSize) {
        self.page_spacing.clear();
        for (index, size) in self.page_sizes.iter().enumerate() {
            let gap = if self.options.scroll_direction.is_vertical() {
                viewport.height as f32 - size.height
            } else {
                viewport.width as f32 - size.width
            };
            let mut spacing = gap.max(0.0);
            if index < self.page_sizes.len() - 1 {
                spacing += self.options.spacing_px;
            }
            self.page_spacing.push(spacing);
        }
    }

    fn prepare_document_length(&mut self) {
        let mut length = 0.0;
        for (index, size) in self.page_sizes.iter().enumerate() {
            length += if self.options.scroll_direction.is_vertical() {
                size.height
            } else {
                size.width
            };
            if self.options.auto_spacing {
                length += self.page_spacing[index];
            } else if index < self.page_sizes.len() - 1 {
                length += self.options.spacing_px;
            }
        }
        self.document_length = length;
    }

    fn prepare_page_offsets(&mut self) {
        self.page_offsets.clear();
        let page_count = self.page_sizes.len();
        let mut offset = 0.0;
        for (index, size) in self.page_sizes.iter().enumerate() {
            let length = if self.options.scroll_direction.is_vertical() {
                size.height
            } else {
                size.width
            };
            if self.options.auto_spacing {
                // Each page sits centered in its slot: half the gap before,
                // half after, with edge corrections for the fixed spacing.
                offset += self.page_spacing[index] / 2.0;
                if index == 0 {
                    offset -= self.options.spacing_px / 2.0;
                } else if index == page_count - 1 {
                    offset += self.options.spacing_px / 2.0;
                }
                self.page_offsets.push(offset);
                offset += length + self.page_spacing[index] / 2.0;
            } else {
                self.page_offsets.push(offset);
                offset += length + self.options.spacing_px;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertical_layout(heights: &[f32], spacing_px: f32) -> DocumentLayout {
        let sizes: Vec<PageSize> =
            heights.iter().map(|&height| PageSize::new(100.0, height)).collect();
        DocumentLayout::new(
            sizes,
            LayoutOptions {
                fit_policy: FitPolicy::Width,
                scroll_direction: ScrollDirection::Vertical,
                spacing_px,
                auto_spacing: false,
                fit_each_page: false,
            },
            PixelSize::new(100, 400),
        )
    }

    #[test]
    fn offsets_accumulate_page_lengths_and_spacing() {
        let layout = vertical_layout(&[100.0, 200.0, 150.0], 10.0);

        assert_eq!(layout.page_offset(0, 1.0), 0.0);
        assert_eq!(layout.page_offset(1, 1.0), 110.0);
        assert_eq!(layout.page_offset(2, 1.0), 320.0);
        assert_eq!(layout.document_length(1.0), 470.0);

        for page in 0..layout.page_count() - 1 {
            let expected = layout.page_offset(page, 1.0)
                + layout.page_length(page, 1.0)
                + layout.page_spacing(page, 1.0);
            assert_eq!(layout.page_offset(page + 1, 1.0), expected);
        }
    }

    #[test]
    fn page_at_offset_resolves_boundaries_to_the_starting_page() {
        let layout = vertical_layout(&[100.0, 200.0, 150.0], 0.0);

        assert_eq!(layout.page_at_offset(0.0, 1.0), 0);
        assert_eq!(layout.page_at_offset(150.0, 1.0), 1);
        assert_eq!(layout.page_at_offset(299.0, 1.0), 1);
        assert_eq!(layout.page_at_offset(300.0, 1.0), 2);
        assert_eq!(layout.page_at_offset(10_000.0, 1.0), 2);
    }

    #[test]
    fn page_at_offset_clamps_below_zero() {
        let layout = vertical_layout(&[100.0, 200.0], 0.0);
        assert_eq!(layout.page_at_offset(-50.0, 1.0), 0);
    }

    #[test]
    fn zoom_scales_offsets_and_lengths() {
        let layout = vertical_layout(&[100.0, 200.0, 150.0], 0.0);

        assert_eq!(layout.page_offset(1, 2.0), 200.0);
        assert_eq!(layout.page_length(1, 2.0), 400.0);
        assert_eq!(layout.document_length(2.0), 900.0);
        assert_eq!(layout.page_at_offset(599.0, 2.0), 1);
        assert_eq!(layout.page_at_offset(600.0, 2.0), 2);
    }

    #[test]
    fn auto_spacing_centers_short_pages_in_the_viewport() {
        let sizes = vec![PageSize::new(100.0, 100.0), PageSize::new(100.0, 400.0)];
        let layout = DocumentLayout::new(
            sizes,
            LayoutOptions {
                auto_spacing: true,
                ..LayoutOptions::default()
            },
            PixelSize::new(100, 400),
        );

        // Page 0 is 300px short of the viewport; half the gap leads it.
        assert_eq!(layout.page_spacing(0, 1.0), 300.0);
        assert_eq!(layout.page_offset(0, 1.0), 150.0);
        assert_eq!(layout.page_spacing(1, 1.0), 0.0);
        assert_eq!(layout.page_offset(1, 1.0), 400.0);
        assert_eq!(layout.document_length(1.0), 800.0);
    }

    #[test]
    fn secondary_offset_centers_narrow_pages() {
        let sizes = vec![PageSize::new(400.0, 100.0), PageSize::new(200.0, 100.0)];
        let layout =
            DocumentLayout::new(sizes, LayoutOptions::default(), PixelSize::new(400, 400));

        assert_eq!(layout.secondary_offset(0, 1.0), 0.0);
        let narrow = layout.page_size(1);
        assert_eq!(
            layout.secondary_offset(1, 1.0),
            (layout.max_page_width() - narrow.width) / 2.0
        );
    }

    #[test]
    fn recompute_is_idempotent() {
        let mut layout = vertical_layout(&[100.0, 200.0, 150.0], 5.0);
        let offsets: Vec<f32> =
            (0..layout.page_count()).map(|page| layout.page_offset(page, 1.0)).collect();
        let length = layout.document_length(1.0);

        layout.recompute(PixelSize::new(100, 400));

        let offsets_after: Vec<f32> =
            (0..layout.page_count()).map(|page| layout.page_offset(page, 1.0)).collect();
        assert_eq!(offsets, offsets_after);
        assert_eq!(length, layout.document_length(1.0));
    }

    #[test]
    fn recompute_rescales_to_the_new_viewport() {
        let sizes = vec![PageSize::new(100.0, 200.0)];
        let mut layout = DocumentLayout::new(
            sizes,
            LayoutOptions::default(),
            PixelSize::new(100, 400),
        );
        assert_eq!(layout.page_size(0).width, 100.0);

        layout.recompute(PixelSize::new(200, 400));
        assert_eq!(layout.page_size(0).width, 200.0);
        assert_eq!(layout.page_size(0).height, 400.0);
    }

    #[test]
    fn out_of_range_page_reports_zero_size() {
        let layout = vertical_layout(&[100.0], 0.0);
        assert_eq!(layout.page_size(7), PageSize::ZERO);
        assert_eq!(layout.page_offset(7, 1.0), 0.0);
    }

    #[test]
    fn horizontal_layout_accumulates_widths() {
        let sizes = vec![PageSize::new(300.0, 100.0), PageSize::new(200.0, 100.0)];
        let layout = DocumentLayout::new(
            sizes,
            LayoutOptions {
                fit_policy: FitPolicy::Height,
                scroll_direction: ScrollDirection::Horizontal,
                spacing_px: 0.0,
                auto_spacing: false,
                fit_each_page: true,
            },
            PixelSize::new(400, 100),
        );

        assert_eq!(layout.page_offset(0, 1.0), 0.0);
        assert_eq!(layout.page_offset(1, 1.0), layout.page_length(0, 1.0));
        assert_eq!(layout.page_at_offset(layout.page_offset(1, 1.0), 1.0), 1);
    }
}
