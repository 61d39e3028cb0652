use serde::{Deserialize, Serialize};
use tileview_engine::{PageSize, PixelSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitPolicy {
    Width,
    Height,
    Both,
}

/// Maps original page sizes to displayed sizes for one viewport size.
///
/// With `fit_each_page` off, the widest and tallest pages are fitted to the
/// viewport and every other page scales by the same ratios, so relative page
/// proportions are preserved across the document. With it on, every page is
/// fitted to the viewport independently.
pub struct PageFitCalculator {
    policy: FitPolicy,
    viewport: PageSize,
    fit_each_page: bool,
    width_ratio: f32,
    height_ratio: f32,
    optimal_max_width: PageSize,
    optimal_max_height: PageSize,
}

impl PageFitCalculator {
    pub fn new(
        policy: FitPolicy,
        original_max_width_page: PageSize,
        original_max_height_page: PageSize,
        viewport: PixelSize,
        fit_each_page: bool,
    ) -> Self {
        let viewport = PageSize::new(viewport.width as f32, viewport.height as f32);
        let mut calculator = Self {
            policy,
            viewport,
            fit_each_page,
            width_ratio: 0.0,
            height_ratio: 0.0,
            optimal_max_width: PageSize::ZERO,
            optimal_max_height: PageSize::ZERO,
        };
        calculator.calculate_max_pages(original_max_width_page, original_max_height_page);
        calculator
    }

    pub fn optimal_max_width_page_size(&self) -> PageSize {
        self.optimal_max_width
    }

    pub fn optimal_max_height_page_size(&self) -> PageSize {
        self.optimal_max_height
    }

    pub fn calculate(&self, page_size: PageSize) -> PageSize {
        if page_size.is_empty() {
            return PageSize::ZERO;
        }

        let max_width = if self.fit_each_page {
            self.viewport.width
        } else {
            page_size.width * self.width_ratio
        };
        let max_height = if self.fit_each_page {
            self.viewport.height
        } else {
            page_size.height * self.height_ratio
        };

        match self.policy {
            FitPolicy::Height => fit_height(page_size, max_height),
            FitPolicy::Both => fit_both(page_size, max_width, max_height),
            FitPolicy::Width => fit_width(page_size, max_width),
        }
    }

    fn calculate_max_pages(&mut self, max_width_page: PageSize, max_height_page: PageSize) {
        match self.policy {
            FitPolicy::Height => {
                self.optimal_max_height = fit_height(max_height_page, self.viewport.height);
                self.height_ratio = self.optimal_max_height.height / max_height_page.height;
                self.optimal_max_width =
                    fit_height(max_width_page, max_width_page.height * self.height_ratio);
            }
            FitPolicy::Both => {
                let local_max_width =
                    fit_both(max_width_page, self.viewport.width, self.viewport.height);
                let local_width_ratio = local_max_width.width / max_width_page.width;
                self.optimal_max_height = fit_both(
                    max_height_page,
                    max_height_page.width * local_width_ratio,
                    self.viewport.height,
                );
                self.height_ratio = self.optimal_max_height.height / max_height_page.height;
                self.optimal_max_width = fit_both(
                    max_width_page,
                    self.viewport.width,
                    max_width_page.height * self.height_ratio,
                );
                self.width_ratio = self.optimal_max_width.width / max_width_page.width;
            }
            FitPolicy::Width => {
                self.optimal_max_width = fit_width(max_width_page, self.viewport.width);
                self.width_ratio = self.optimal_max_width.width / max_width_page.width;
                self.optimal_max_height =
                    fit_width(max_height_page, max_height_page.width * self.width_ratio);
            }
        }
    }
}

fn fit_width(page_size: PageSize, max_width: f32) -> PageSize {
    let ratio = page_size.width / page_size.height;
    PageSize::new(max_width, (max_width / ratio).floor())
}

fn fit_height(page_size: PageSize, max_height: f32) -> PageSize {
    let ratio = page_size.height / page_size.width;
    PageSize::new((max_height / ratio).floor(), max_height)
}

fn fit_both(page_size: PageSize, max_width: f32, max_height: f32) -> PageSize {
    let ratio = page_size.width / page_size.height;
    let mut width = max_width;
    let mut height = (max_width / ratio).floor();
    if height > max_height {
        height = max_height;
        width = (max_height * ratio).floor();
    }
    PageSize::new(width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_width_scales_to_viewport_width() {
        let calculator = PageFitCalculator::new(
            FitPolicy::Width,
            PageSize::new(612.0, 792.0),
            PageSize::new(612.0, 792.0),
            PixelSize::new(1224, 800),
            false,
        );

        let fitted = calculator.calculate(PageSize::new(612.0, 792.0));
        assert_eq!(fitted.width, 1224.0);
        assert_eq!(fitted.height, 1584.0);
    }

    #[test]
    fn fit_height_scales_to_viewport_height() {
        let calculator = PageFitCalculator::new(
            FitPolicy::Height,
            PageSize::new(612.0, 792.0),
            PageSize::new(612.0, 792.0),
            PixelSize::new(1000, 396),
            false,
        );

        let fitted = calculator.calculate(PageSize::new(612.0, 792.0));
        assert_eq!(fitted.height, 396.0);
        assert_eq!(fitted.width, 306.0);
    }

    #[test]
    fn fit_both_never_exceeds_either_dimension() {
        let calculator = PageFitCalculator::new(
            FitPolicy::Both,
            PageSize::new(1000.0, 500.0),
            PageSize::new(1000.0, 500.0),
            PixelSize::new(800, 300),
            false,
        );

        let fitted = calculator.calculate(PageSize::new(1000.0, 500.0));
        assert!(fitted.width <= 800.0);
        assert!(fitted.height <= 300.0);
    }

    #[test]
    fn narrower_pages_scale_by_the_shared_ratio() {
        let calculator = PageFitCalculator::new(
            FitPolicy::Width,
            PageSize::new(1000.0, 1000.0),
            PageSize::new(1000.0, 1000.0),
            PixelSize::new(500, 500),
            false,
        );

        // Half the max width keeps half the fitted width.
        let fitted = calculator.calculate(PageSize::new(500.0, 500.0));
        assert_eq!(fitted.width, 250.0);
    }

    #[test]
    fn fit_each_page_fits_every_page_to_the_viewport() {
        let calculator = PageFitCalculator::new(
            FitPolicy::Width,
            PageSize::new(1000.0, 1000.0),
            PageSize::new(1000.0, 1000.0),
            PixelSize::new(500, 500),
            true,
        );

        let fitted = calculator.calculate(PageSize::new(250.0, 250.0));
        assert_eq!(fitted.width, 500.0);
    }

    #[test]
    fn degenerate_page_maps_to_zero() {
        let calculator = PageFitCalculator::new(
            FitPolicy::Width,
            PageSize::new(612.0, 792.0),
            PageSize::new(612.0, 792.0),
            PixelSize::new(800, 600),
            false,
        );

        assert_eq!(calculator.calculate(PageSize::ZERO), PageSize::ZERO);
    }
}
