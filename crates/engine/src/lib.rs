use image::{ImageBuffer, Rgba};
use lopdf::Document;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    /// Engines mint handles; there is no registry behind this type.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub const ZERO: PageSize = PageSize { width: 0.0, height: 0.0 };

    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A sub-rectangle of a page in page-relative coordinates, each component
/// in [0, 1]. This is the addressing unit for tiles: equality and hashing
/// are bitwise on the four coordinates, so two bounds compare equal only
/// when they were produced by the same grid computation.
#[derive(Debug, Clone, Copy)]
pub struct RelBounds {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl RelBounds {
    /// The whole page; the fixed bounds used for thumbnails.
    pub const FULL: RelBounds = RelBounds { left: 0.0, top: 0.0, right: 1.0, bottom: 1.0 };

    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }
}

impl PartialEq for RelBounds {
    fn eq(&self, other: &Self) -> bool {
        self.left.to_bits() == other.left.to_bits()
            && self.top.to_bits() == other.top.to_bits()
            && self.right.to_bits() == other.right.to_bits()
            && self.bottom.to_bits() == other.bottom.to_bits()
    }
}

impl Eq for RelBounds {}

impl std::hash::Hash for RelBounds {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.left.to_bits().hash(state);
        self.top.to_bits().hash(state);
        self.right.to_bits().hash(state);
        self.bottom.to_bits().hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub best_quality: bool,
    pub annotations: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { best_quality: false, annotations: false }
    }
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("document parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted documents are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("failed to render page {page}: {message}")]
    PageRender { page: u32, message: String },
    #[error("backend error: {0}")]
    Backend(String),
}

/// The native document engine the viewer drives. One open document at a
/// time per handle; `render_region` rasterizes a page-relative
/// sub-rectangle into a bitmap of exactly `target` pixels. Implementations
/// need not be reentrant: callers serialize all calls per document.
pub trait DocumentEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, EngineError>;
    fn page_count(&self, handle: DocumentHandle) -> Result<u32, EngineError>;
    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, EngineError>;
    fn render_region(
        &self,
        handle: DocumentHandle,
        page_index: u32,
        target: PixelSize,
        region: RelBounds,
        options: RenderOptions,
    ) -> Result<RgbaImage, EngineError>;
    fn close(&mut self, handle: DocumentHandle) -> Result<(), EngineError>;
}

#[derive(Debug, Clone)]
struct DocumentRecord {
    page_sizes: Vec<PageSize>,
}

/// Default engine backend: reads page structure with `lopdf` and renders
/// deterministic placeholder bitmaps (white page, grey border). Real
/// renderers implement `DocumentEngine` against a native library instead.
#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

const PAGE_BORDER_PT: f32 = 2.0;

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_sizes(bytes: &[u8]) -> Result<Vec<PageSize>, EngineError> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(EngineError::EncryptedUnsupported);
        }

        let doc = Document::load_mem(bytes)?;
        let pages = doc.get_pages();
        let mut sizes = Vec::with_capacity(pages.len());

        for (_, object_id) in pages {
            let dict = doc.get_dictionary(object_id)?;
            let size = dict
                .get(b"MediaBox")
                .ok()
                .and_then(|obj| obj.as_array().ok())
                .and_then(|array| {
                    if array.len() != 4 {
                        return None;
                    }
                    let x0 = array[0].as_float().ok()?;
                    let y0 = array[1].as_float().ok()?;
                    let x1 = array[2].as_float().ok()?;
                    let y1 = array[3].as_float().ok()?;
                    Some(PageSize::new((x1 - x0).abs(), (y1 - y0).abs()))
                })
                .unwrap_or(PageSize::new(612.0, 792.0));

            sizes.push(size);
        }

        if sizes.is_empty() {
            return Err(EngineError::Backend("document has no pages".to_owned()));
        }

        Ok(sizes)
    }

    fn record(&self, handle: DocumentHandle) -> Result<&DocumentRecord, EngineError> {
        self.docs.get(&handle).ok_or(EngineError::InvalidHandle(handle.raw()))
    }
}

impl DocumentEngine for LopdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, EngineError> {
        let bytes = match source {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };

        let page_sizes = Self::parse_sizes(&bytes)?;

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        self.docs.insert(handle, DocumentRecord { page_sizes });

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, EngineError> {
        Ok(self.record(handle)?.page_sizes.len() as u32)
    }

    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, EngineError> {
        let record = self.record(handle)?;
        record.page_sizes.get(page_index as usize).copied().ok_or(EngineError::PageOutOfRange {
            page: page_index,
            page_count: record.page_sizes.len() as u32,
        })
    }

    fn render_region(
        &self,
        handle: DocumentHandle,
        page_index: u32,
        target: PixelSize,
        region: RelBounds,
        _options: RenderOptions,
    ) -> Result<RgbaImage, EngineError> {
        let page_size = self.page_size(handle, page_index)?;

        if target.is_empty() || region.is_empty() {
            return Err(EngineError::PageRender {
                page: page_index,
                message: "empty render target or region".to_owned(),
            });
        }

        let mut image =
            RgbaImage::from_pixel(target.width, target.height, Rgba([255, 255, 255, 255]));

        // Paint the page border where it crosses the requested region, so a
        // tile of an edge cell differs from an interior one.
        for y in 0..target.height {
            let page_y =
                (region.top + (y as f32 + 0.5) / target.height as f32 * region.height())
                    * page_size.height;
            let on_y_border =
                page_y < PAGE_BORDER_PT || page_y > page_size.height - PAGE_BORDER_PT;

            for x in 0..target.width {
                let page_x =
                    (region.left + (x as f32 + 0.5) / target.width as f32 * region.width())
                        * page_size.width;
                let on_x_border =
                    page_x < PAGE_BORDER_PT || page_x > page_size.width - PAGE_BORDER_PT;

                if on_x_border || on_y_border {
                    image.put_pixel(x, y, Rgba([220, 220, 220, 255]));
                }
            }
        }

        Ok(image)
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), EngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(EngineError::InvalidHandle(handle.raw()))
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}
