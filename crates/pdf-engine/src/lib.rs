//! Page rendering backends.
//!
//! A [`PdfEngine`] owns loaded documents behind opaque handles, reports page
//! geometry in PDF points and rasterises one page at a time into an RGBA bitmap.

use image::{ImageBuffer, Rgba};
use lopdf::{Document, Object, ObjectId};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod paint;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// US Letter, used when a page carries no readable `/MediaBox`.
const FALLBACK_PAGE_SIZE: PageSize = PageSize { width_pt: 612.0, height_pt: 792.0 };

/// Guards against `/Parent` cycles in malformed page trees.
const MAX_INHERITANCE_DEPTH: usize = 32;

/// Largest bitmap a render may allocate, in pixels (64 MiB of RGBA).
pub const MAX_RENDER_PIXELS: u64 = 16_777_216;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

/// A page's `/MediaBox`, normalised so that `x0 <= x1` and `y0 <= y1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl MediaBox {
    pub fn size(&self) -> PageSize {
        PageSize { width_pt: self.x1 - self.x0, height_pt: self.y1 - self.y0 }
    }
}

impl Default for MediaBox {
    fn default() -> Self {
        Self { x0: 0.0, y0: 0.0, x1: FALLBACK_PAGE_SIZE.width_pt, y1: FALLBACK_PAGE_SIZE.height_pt }
    }
}

/// Pixel dimensions of a page rendered at `scale` pixels per point.
///
/// Fractional pixels are truncated, matching how a canvas adopts a viewport size.
pub fn viewport_size(size: PageSize, scale: f32) -> (u32, u32) {
    let width = (size.width_pt * scale).floor().max(1.0) as u32;
    let height = (size.height_pt * scale).floor().max(1.0) as u32;
    (width, height)
}

/// The scale actually used to render a page requested at `scale`.
///
/// Non-positive scales fall back to 1. Scales whose bitmap would exceed
/// [`MAX_RENDER_PIXELS`] are reduced until it fits, keeping the aspect ratio.
pub fn fit_render_scale(size: PageSize, scale: f32) -> f32 {
    let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
    let pixels = size.width_pt as f64 * size.height_pt as f64 * (scale as f64).powi(2);
    if pixels <= MAX_RENDER_PIXELS as f64 {
        return scale;
    }
    (scale as f64 * (MAX_RENDER_PIXELS as f64 / pixels).sqrt()) as f32
}

/// Resolves the effective `/MediaBox` of a page, following `/Parent` links
/// for inherited boxes.
pub fn media_box(doc: &Document, page_id: ObjectId) -> MediaBox {
    let mut current = Some(page_id);
    let mut depth = 0;

    while let Some(id) = current {
        if depth > MAX_INHERITANCE_DEPTH {
            break;
        }
        depth += 1;

        let Ok(dict) = doc.get_dictionary(id) else {
            break;
        };

        if let Some(found) = dict.get(b"MediaBox").ok().and_then(|obj| parse_box(doc, obj)) {
            return found;
        }

        current = dict.get(b"Parent").ok().and_then(|parent| parent.as_reference().ok());
    }

    MediaBox::default()
}

fn parse_box(doc: &Document, obj: &Object) -> Option<MediaBox> {
    let obj = match obj {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    let array = obj.as_array().ok()?;
    if array.len() != 4 {
        return None;
    }

    let mut coords = [0.0f32; 4];
    for (slot, value) in coords.iter_mut().zip(array) {
        *slot = value.as_float().ok()?;
    }
    let [ax, ay, bx, by] = coords;

    let media = MediaBox { x0: ax.min(bx), y0: ay.min(by), x1: ax.max(bx), y1: ay.max(by) };
    if media.x1 - media.x0 <= 0.0 || media.y1 - media.y0 <= 0.0 {
        return None;
    }
    Some(media)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    /// Zero-based page index.
    pub page_index: u32,
    /// Requested output pixels per PDF point; see [`fit_render_scale`].
    pub scale: f32,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self { page_index: 0, scale: 1.0 }
    }
}

/// Where a document comes from. Byte sources are shared, not copied.
#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

impl OpenSource {
    fn into_bytes(self) -> Result<Arc<[u8]>, PdfEngineError> {
        match self {
            Self::Path(path) => Ok(fs::read(path)?.into()),
            Self::Bytes(bytes) => Ok(bytes),
        }
    }
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
        Self::Bytes(value.into())
    }
}

impl From<Arc<[u8]>> for OpenSource {
    fn from(value: Arc<[u8]>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("backend error: {0}")]
    Backend(String),
}

/// A PDF renderer.
///
/// Engines are driven from one thread at a time and are moved into render
/// workers behind a mutex. Renders never exceed [`MAX_RENDER_PIXELS`].
pub trait PdfEngine: Send {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError>;
    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError>;
    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError>;
    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError>;
    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError>;
}

impl<E: PdfEngine + ?Sized> PdfEngine for Box<E> {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
        (**self).open(source)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        (**self).page_count(handle)
    }

    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError> {
        (**self).page_size(handle, page_index)
    }

    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        (**self).render_page(handle, request)
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        (**self).close(handle)
    }
}

#[derive(Debug, Clone, Copy)]
struct PageRecord {
    id: ObjectId,
    media: MediaBox,
}

#[derive(Debug)]
struct DocumentRecord {
    document: Document,
    pages: Vec<PageRecord>,
}

impl DocumentRecord {
    fn page(&self, page_index: u32) -> Result<PageRecord, PdfEngineError> {
        self.pages.get(page_index as usize).copied().ok_or(PdfEngineError::PageOutOfRange {
            page: page_index,
            page_count: self.pages.len() as u32,
        })
    }
}

/// Pure-Rust engine built on lopdf and tiny-skia.
///
/// Page geometry is exact. Rasterisation paints vector content (paths,
/// fills, strokes, clips, constant alpha, form XObjects) over a white page;
/// text and images need the `pdfium` backend.
#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(bytes: &[u8]) -> Result<DocumentRecord, PdfEngineError> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let document = Document::load_mem(bytes)?;
        let pages: Vec<PageRecord> = document
            .get_pages()
            .into_values()
            .map(|id| PageRecord { id, media: media_box(&document, id) })
            .collect();

        if pages.is_empty() {
            return Err(PdfEngineError::Backend("document has no pages".to_owned()));
        }

        Ok(DocumentRecord { document, pages })
    }

    fn record(&self, handle: DocumentHandle) -> Result<&DocumentRecord, PdfEngineError> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
        let record = Self::parse(&source.into_bytes()?)?;

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        self.docs.insert(handle, record);

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        Ok(self.record(handle)?.pages.len() as u32)
    }

    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError> {
        Ok(self.record(handle)?.page(page_index)?.media.size())
    }

    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        let record = self.record(handle)?;
        let page = record.page(request.page_index)?;
        let scale = fit_render_scale(page.media.size(), request.scale);
        let (width, height) = viewport_size(page.media.size(), scale);

        let mut pixmap = tiny_skia::Pixmap::new(width, height).ok_or_else(|| {
            PdfEngineError::Backend(format!("cannot allocate a {width}x{height} bitmap"))
        })?;
        pixmap.fill(tiny_skia::Color::WHITE);
        paint::paint_page(&record.document, page.id, page.media, scale, &mut pixmap);

        // Every pixel is opaque, so premultiplied and straight RGBA agree.
        RgbaImage::from_raw(width, height, pixmap.take())
            .ok_or_else(|| PdfEngineError::Backend("bitmap size mismatch".to_owned()))
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

#[cfg(feature = "pdfium")]
pub mod pdfium_backend {
    use super::*;
    use pdfium_render::prelude::*;

    /// Renders real page content through a system PDFium library.
    ///
    /// Geometry and handle bookkeeping are shared with [`LopdfEngine`]; each
    /// render reopens the shared source bytes so no PDFium document outlives
    /// a call.
    pub struct PdfiumEngine {
        pdfium: Pdfium,
        inner: LopdfEngine,
        sources: HashMap<DocumentHandle, Arc<[u8]>>,
    }

    impl PdfiumEngine {
        pub fn from_system_library() -> Result<Self, PdfEngineError> {
            let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library())
                .map_err(|err| {
                    PdfEngineError::Backend(format!("failed to bind pdfium library: {err}"))
                })?;

            Ok(Self {
                pdfium: Pdfium::new(bindings),
                inner: LopdfEngine::default(),
                sources: HashMap::new(),
            })
        }
    }

    impl PdfEngine for PdfiumEngine {
        fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
            let bytes = source.into_bytes()?;
            let handle = self.inner.open(OpenSource::Bytes(Arc::clone(&bytes)))?;
            self.sources.insert(handle, bytes);
            Ok(handle)
        }

        fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
            self.inner.page_count(handle)
        }

        fn page_size(
            &self,
            handle: DocumentHandle,
            page_index: u32,
        ) -> Result<PageSize, PdfEngineError> {
            self.inner.page_size(handle, page_index)
        }

        fn render_page(
            &self,
            handle: DocumentHandle,
            request: RenderRequest,
        ) -> Result<RgbaImage, PdfEngineError> {
            let size = self.inner.page_size(handle, request.page_index)?;
            let (width, height) = viewport_size(size, fit_render_scale(size, request.scale));
            let bytes =
                self.sources.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))?;

            let backend = |err: PdfiumError| PdfEngineError::Backend(err.to_string());
            let document = self.pdfium.load_pdf_from_byte_slice(&bytes[..], None).map_err(backend)?;
            let page = document.pages().get(request.page_index as u16).map_err(backend)?;
            let config = PdfRenderConfig::new()
                .set_target_width(width as i32)
                .set_target_height(height as i32);
            let bitmap = page.render_with_config(&config).map_err(backend)?;

            RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes().to_vec()).ok_or_else(|| {
                PdfEngineError::Backend("pdfium returned a short bitmap".to_owned())
            })
        }

        fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
            self.sources.remove(&handle);
            self.inner.close(handle)
        }
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}
