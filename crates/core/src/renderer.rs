//! Page rendering onto a single display surface
//!
//! The renderer owns the engine, the loaded document and one surface. At most
//! one render targets the surface at a time: starting a render cancels the one
//! in flight and waits for it to settle first. The surface's bitmap and pixel
//! size change only when a render completes.

use crate::error::{LoadError, RenderError};
use crate::geometry::BitmapSize;
use log::{debug, info};
use pagemark_engine::{
    DocumentHandle, OpenSource, PageSize, PdfEngine, PdfEngineError, RenderRequest, RgbaImage,
};
use pagemark_scheduler::{Cancelled, TaskOutcome, TaskSlot};
use std::sync::{Arc, Mutex, MutexGuard};

/// Display renders use `zoom * BASE_RENDER_SCALE` pixels per point.
pub const BASE_RENDER_SCALE: f32 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentInfo {
    pub page_count: u32,
}

/// The last completed render.
#[derive(Debug, Default)]
pub struct RenderSurface {
    bitmap: Option<RgbaImage>,
    page: Option<u32>,
}

impl RenderSurface {
    pub fn bitmap(&self) -> Option<&RgbaImage> {
        self.bitmap.as_ref()
    }

    /// Pixel size of the surface; `None` until a render has completed.
    pub fn size(&self) -> Option<BitmapSize> {
        self.bitmap.as_ref().map(|image| BitmapSize::new(image.width(), image.height()))
    }

    /// 1-based page currently shown.
    pub fn page(&self) -> Option<u32> {
        self.page
    }

    fn clear(&mut self) {
        self.bitmap = None;
        self.page = None;
    }
}

struct RenderedPage {
    page: u32,
    image: RgbaImage,
}

enum WorkerError {
    Cancelled,
    Engine(PdfEngineError),
}

impl From<Cancelled> for WorkerError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl From<PdfEngineError> for WorkerError {
    fn from(err: PdfEngineError) -> Self {
        Self::Engine(err)
    }
}

fn lock_engine<E>(engine: &Mutex<E>) -> Result<MutexGuard<'_, E>, PdfEngineError> {
    engine.lock().map_err(|_| PdfEngineError::Backend("engine lock poisoned".to_owned()))
}

pub struct PageRenderer<E: PdfEngine + 'static> {
    engine: Arc<Mutex<E>>,
    document: Option<(DocumentHandle, DocumentInfo)>,
    slot: TaskSlot<RenderedPage, WorkerError>,
    surface: RenderSurface,
}

impl<E: PdfEngine + 'static> PageRenderer<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            document: None,
            slot: TaskSlot::new("pagemark-render"),
            surface: RenderSurface::default(),
        }
    }

    /// Replace the current document with one parsed from `bytes`.
    ///
    /// On failure no document is active.
    pub fn load(&mut self, bytes: impl Into<Arc<[u8]>>) -> Result<DocumentInfo, LoadError> {
        self.close();

        let mut engine = lock_engine(&self.engine).map_err(|_| LoadError::EngineUnavailable)?;
        let handle = engine.open(OpenSource::Bytes(bytes.into()))?;
        let page_count = match engine.page_count(handle) {
            Ok(count) => count,
            Err(err) => {
                let _ = engine.close(handle);
                return Err(err.into());
            }
        };
        drop(engine);

        let info = DocumentInfo { page_count };
        self.document = Some((handle, info));
        info!("loaded document with {page_count} page(s)");
        Ok(info)
    }

    /// Cancel any render, drop the surface and release the document.
    pub fn close(&mut self) {
        self.slot.cancel();
        self.surface.clear();

        if let Some((handle, _)) = self.document.take() {
            if let Ok(mut engine) = lock_engine(&self.engine) {
                let _ = engine.close(handle);
            }
        }
    }

    pub fn document(&self) -> Option<DocumentInfo> {
        self.document.map(|(_, info)| info)
    }

    pub fn surface(&self) -> &RenderSurface {
        &self.surface
    }

    /// Size of a 1-based page in PDF points.
    pub fn page_size(&self, page: u32) -> Result<PageSize, RenderError> {
        let (handle, info) = self.document.ok_or(RenderError::NoDocument)?;
        check_page(page, info)?;

        let engine = lock_engine(&self.engine)?;
        Ok(engine.page_size(handle, page - 1)?)
    }

    /// Start rendering a 1-based page onto the surface at `zoom`.
    ///
    /// A render already in flight is cancelled and awaited first.
    pub fn start_render(&mut self, page: u32, zoom: f32) -> Result<u64, RenderError> {
        let (handle, info) = self.document.ok_or(RenderError::NoDocument)?;
        check_page(page, info)?;

        let engine = Arc::clone(&self.engine);
        let request = RenderRequest { page_index: page - 1, scale: zoom * BASE_RENDER_SCALE };
        debug!("render page {page} at scale {}", request.scale);

        self.slot
            .replace(move |token| {
                token.checkpoint()?;
                let image = lock_engine(&engine)?.render_page(handle, request)?;
                token.checkpoint()?;
                Ok(RenderedPage { page, image })
            })
            .map_err(|err| RenderError::Worker(err.to_string()))
    }

    /// Wait for the render in flight and publish it to the surface.
    ///
    /// Returns the new surface size, or `None` when nothing was in flight or
    /// the render was cancelled.
    pub fn finish_render(&mut self) -> Result<Option<BitmapSize>, RenderError> {
        let Some(outcome) = self.slot.wait() else {
            return Ok(None);
        };

        match outcome {
            TaskOutcome::Completed(rendered) => {
                self.surface.bitmap = Some(rendered.image);
                self.surface.page = Some(rendered.page);
                Ok(self.surface.size())
            }
            TaskOutcome::Cancelled | TaskOutcome::Failed(WorkerError::Cancelled) => {
                debug!("render cancelled");
                Ok(None)
            }
            TaskOutcome::Failed(WorkerError::Engine(err)) => Err(RenderError::Engine(err)),
            TaskOutcome::Panicked(message) => Err(RenderError::Worker(message)),
        }
    }

    /// Render a page onto the surface and wait for it.
    pub fn render_page(&mut self, page: u32, zoom: f32) -> Result<Option<BitmapSize>, RenderError> {
        self.start_render(page, zoom)?;
        self.finish_render()
    }

    /// Render a page at `scale` pixels per point without touching the surface.
    pub fn render_offscreen(&self, page: u32, scale: f32) -> Result<RgbaImage, RenderError> {
        let (handle, info) = self.document.ok_or(RenderError::NoDocument)?;
        check_page(page, info)?;

        let engine = lock_engine(&self.engine)?;
        Ok(engine.render_page(handle, RenderRequest { page_index: page - 1, scale })?)
    }
}

impl<E: PdfEngine + 'static> Drop for PageRenderer<E> {
    fn drop(&mut self) {
        self.slot.cancel();
    }
}

fn check_page(page: u32, info: DocumentInfo) -> Result<(), RenderError> {
    if page == 0 || page > info.page_count {
        return Err(RenderError::PageOutOfRange { page, page_count: info.page_count });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::two_page_pdf;
    use pagemark_engine::LopdfEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn load_reports_page_count() {
        let mut renderer = PageRenderer::new(LopdfEngine::new());
        let info = renderer.load(two_page_pdf()).expect("load should succeed");

        assert_eq!(info.page_count, 2);
        assert_eq!(renderer.document(), Some(info));
    }

    #[test]
    fn malformed_bytes_leave_no_document() {
        let mut renderer = PageRenderer::new(LopdfEngine::new());
        renderer.load(two_page_pdf()).expect("load should succeed");

        let err = renderer.load(b"%PDF-1.4 garbage".to_vec()).expect_err("load should fail");
        assert!(matches!(err, LoadError::Engine(_)));
        assert_eq!(renderer.document(), None);
    }

    #[test]
    fn surface_size_is_set_after_render_completes() {
        let mut renderer = PageRenderer::new(LopdfEngine::new());
        renderer.load(two_page_pdf()).expect("load should succeed");
        assert_eq!(renderer.surface().size(), None);

        renderer.start_render(1, 1.0).expect("render should start");
        // Not published until the render is awaited.
        assert_eq!(renderer.surface().size(), None);

        let size = renderer.finish_render().expect("render should finish");
        assert_eq!(size, Some(BitmapSize::new(300, 1200)));
        assert_eq!(renderer.surface().page(), Some(1));
    }

    #[test]
    fn superseded_render_is_not_an_error() {
        let mut renderer = PageRenderer::new(LopdfEngine::new());
        renderer.load(two_page_pdf()).expect("load should succeed");

        renderer.start_render(1, 1.0).expect("render should start");
        renderer.start_render(2, 2.0).expect("render should start");

        let size = renderer.finish_render().expect("latest render should finish");
        assert_eq!(size, Some(BitmapSize::new(900, 1200)));
        assert_eq!(renderer.surface().page(), Some(2));
    }

    #[test]
    fn render_rejects_out_of_range_pages() {
        let mut renderer = PageRenderer::new(LopdfEngine::new());
        renderer.load(two_page_pdf()).expect("load should succeed");

        assert!(matches!(
            renderer.render_page(3, 1.0),
            Err(RenderError::PageOutOfRange { page: 3, page_count: 2 })
        ));
        assert!(matches!(renderer.render_page(0, 1.0), Err(RenderError::PageOutOfRange { .. })));
    }

    #[test]
    fn render_without_document_fails() {
        let mut renderer = PageRenderer::new(LopdfEngine::new());
        assert!(matches!(renderer.render_page(1, 1.0), Err(RenderError::NoDocument)));
    }

    #[test]
    fn offscreen_render_leaves_surface_alone() {
        let mut renderer = PageRenderer::new(LopdfEngine::new());
        renderer.load(two_page_pdf()).expect("load should succeed");
        renderer.render_page(1, 1.0).expect("render should succeed");

        let image = renderer.render_offscreen(1, 2.0).expect("offscreen render should succeed");
        assert_eq!(image.dimensions(), (400, 1600));
        assert_eq!(renderer.surface().size(), Some(BitmapSize::new(300, 1200)));
    }

    /// Engine whose renders block until released, to observe overlap.
    struct SlowEngine {
        inner: LopdfEngine,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl PdfEngine for SlowEngine {
        fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
            self.inner.open(source)
        }

        fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
            self.inner.page_count(handle)
        }

        fn page_size(&self, handle: DocumentHandle, index: u32) -> Result<PageSize, PdfEngineError> {
            self.inner.page_size(handle, index)
        }

        fn render_page(
            &self,
            handle: DocumentHandle,
            request: RenderRequest,
        ) -> Result<RgbaImage, PdfEngineError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.inner.render_page(handle, request)
        }

        fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
            self.inner.close(handle)
        }
    }

    #[test]
    fn rapid_rerenders_never_overlap() {
        let peak = Arc::new(AtomicUsize::new(0));
        let engine = SlowEngine {
            inner: LopdfEngine::new(),
            active: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        };
        let mut renderer = PageRenderer::new(engine);
        renderer.load(two_page_pdf()).expect("load should succeed");

        for step in 1..=6 {
            renderer.start_render(1, step as f32 * 0.25).expect("render should start");
        }
        let size = renderer.finish_render().expect("last render should finish");

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(size, Some(BitmapSize::new(450, 1800)));
    }
}
