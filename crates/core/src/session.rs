//! Editor session state
//!
//! [`EditorSession`] is the single owner of everything the editor mutates:
//! the loaded document, annotations, the pointer state machine, the view
//! and the user-facing notice. Front ends drive it through its methods and
//! never hold on to any of its parts.

use crate::annotation::{
    AnnotationStore, Color, Highlight, HighlightId, UndoEffect, DEFAULT_HIGHLIGHT_COLOR,
};
use crate::controller::{DrawTarget, EditorMode, Interaction, InteractionController, PointerEvent};
use crate::error::{EditorError, EditorResult, ExportError, LoadError, RenderError, ValidationError};
use crate::export::{
    cropped_file_name, export_cropped, export_highlighted, highlighted_file_name, ArtifactSink,
    SavedArtifact, CROP_RENDER_SCALE,
};
use crate::geometry::{bitmap_rect_to_device, device_to_bitmap, BitmapSize, ElementRect, Rect};
use crate::renderer::{DocumentInfo, PageRenderer};
use chrono::NaiveDate;
use log::{debug, info, warn};
use pagemark_engine::PdfEngine;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

pub const MIN_ZOOM: f32 = 0.25;
pub const MAX_ZOOM: f32 = 5.0;
pub const ZOOM_STEP: f32 = 0.25;
pub const DEFAULT_ZOOM: f32 = 1.0;

/// A file offered for upload, described before its bytes are read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCandidate {
    pub name: String,
    pub media_type: String,
    pub size: u64,
}

/// Checks the declared media type and size of an upload.
pub fn validate_upload(candidate: &UploadCandidate, limit: u64) -> Result<(), ValidationError> {
    if !candidate.media_type.to_ascii_lowercase().contains("pdf") {
        return Err(ValidationError::NotPdf { media_type: candidate.media_type.clone() });
    }
    if candidate.size > limit {
        return Err(ValidationError::TooLarge { size: candidate.size, limit });
    }
    Ok(())
}

/// Snaps `zoom` to the zoom grid and clamps it to the supported range.
pub fn clamp_zoom(zoom: f32) -> f32 {
    if !zoom.is_finite() {
        return DEFAULT_ZOOM;
    }
    ((zoom / ZOOM_STEP).round() * ZOOM_STEP).clamp(MIN_ZOOM, MAX_ZOOM)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewState {
    /// 1-based; 0 while no document is loaded.
    pub page: u32,
    pub total_pages: u32,
    pub zoom: f32,
}

impl ViewState {
    /// Zoom as shown in the toolbar, e.g. `125%`.
    pub fn zoom_label(&self) -> String {
        format!("{}%", (self.zoom * 100.0).round() as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum ViewerState {
    Empty,
    Ready,
    /// A page failed to render; the viewer shows this instead of the page.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "lowercase")]
pub enum Notice {
    Success(String),
    Error(String),
}

/// An annotation drawn over the displayed surface, in device space.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Overlay {
    Highlight { id: HighlightId, color: Color, rect: Rect },
    Crop { rect: Rect },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetDecision {
    Reset,
    /// There is work to lose; call [`EditorSession::confirm_reset`] to proceed.
    NeedsConfirmation,
}

/// Startup knobs, usually taken from user settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    pub initial_zoom: f32,
    pub highlight_color: Color,
    pub max_upload_bytes: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            initial_zoom: DEFAULT_ZOOM,
            highlight_color: DEFAULT_HIGHLIGHT_COLOR,
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }
}

struct SourceDocument {
    name: String,
    bytes: Arc<[u8]>,
}

pub struct EditorSession<E: PdfEngine + 'static> {
    renderer: PageRenderer<E>,
    source: Option<SourceDocument>,
    store: AnnotationStore,
    controller: InteractionController,
    mode: EditorMode,
    view: ViewState,
    highlight_color: Color,
    viewer: ViewerState,
    notice: Option<Notice>,
    options: SessionOptions,
}

impl<E: PdfEngine + 'static> EditorSession<E> {
    pub fn new(engine: E, options: SessionOptions) -> Self {
        let options = SessionOptions {
            initial_zoom: clamp_zoom(options.initial_zoom),
            max_upload_bytes: options.max_upload_bytes.min(MAX_UPLOAD_BYTES),
            ..options
        };
        Self {
            renderer: PageRenderer::new(engine),
            source: None,
            store: AnnotationStore::new(),
            controller: InteractionController::new(),
            mode: EditorMode::View,
            view: ViewState { page: 0, total_pages: 0, zoom: options.initial_zoom },
            highlight_color: options.highlight_color,
            viewer: ViewerState::Empty,
            notice: None,
            options,
        }
    }

    /// Validates `candidate`, then reads and loads it.
    ///
    /// `read` is only called once validation has passed. A successful load
    /// discards all annotations and shows the first page.
    pub fn upload<F>(&mut self, candidate: UploadCandidate, read: F) -> EditorResult<DocumentInfo>
    where
        F: FnOnce() -> io::Result<Vec<u8>>,
    {
        if let Err(err) = validate_upload(&candidate, self.options.max_upload_bytes) {
            warn!("rejected upload {:?}: {err}", candidate.name);
            return Err(self.fail(err.into()));
        }

        let loaded = read().map_err(LoadError::from).and_then(|bytes| {
            let bytes: Arc<[u8]> = bytes.into();
            self.renderer.load(Arc::clone(&bytes)).map(|info| (info, bytes))
        });
        let (info, bytes) = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                self.clear_document();
                return Err(self.fail(err.into()));
            }
        };

        self.source = Some(SourceDocument { name: candidate.name, bytes });
        self.store.clear();
        self.controller.reset();
        self.mode = EditorMode::View;
        self.view.page = 1;
        self.view.total_pages = info.page_count;
        self.notice = Some(Notice::Success(
            "PDF loaded successfully! You can now highlight and crop.".to_owned(),
        ));

        // A render fault is reported through the viewer state.
        let _ = self.render_current();
        Ok(info)
    }

    /// Renders the current page at the current zoom.
    ///
    /// A cancelled render yields `Ok(None)` and changes nothing.
    pub fn render_current(&mut self) -> Result<Option<BitmapSize>, RenderError> {
        match self.renderer.render_page(self.view.page, self.view.zoom) {
            Ok(Some(size)) => {
                self.viewer = ViewerState::Ready;
                debug!("page {} ready at {}x{}", self.view.page, size.width, size.height);
                Ok(Some(size))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                warn!("failed to render page {}: {err}", self.view.page);
                self.viewer = ViewerState::Failed(err.to_string());
                self.notice = Some(Notice::Error(err.to_string()));
                Err(err)
            }
        }
    }

    pub fn set_mode(&mut self, mode: EditorMode) {
        if self.mode != mode {
            self.controller.reset();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> EditorMode {
        self.mode
    }

    /// Selects a color by palette name or CSS notation.
    ///
    /// An unrecognised value leaves the current color selected.
    pub fn select_highlight_color(&mut self, value: &str) -> EditorResult<Color> {
        match value.parse::<Color>() {
            Ok(color) => {
                self.highlight_color = color;
                Ok(color)
            }
            Err(err) => Err(self.fail(err.into())),
        }
    }

    pub fn highlight_color(&self) -> Color {
        self.highlight_color
    }

    /// Feeds a pointer event given in device space.
    ///
    /// `element` is where the surface is displayed. Events are ignored until
    /// a page has finished rendering.
    pub fn pointer(&mut self, event: PointerEvent, element: ElementRect) -> Interaction {
        let Some(bitmap) = self.renderer.surface().size() else {
            return Interaction::Ignored;
        };
        let position = device_to_bitmap(event.position, element, bitmap);
        self.pointer_at(PointerEvent { position, ..event })
    }

    /// Feeds a pointer event already in bitmap space.
    pub fn pointer_at(&mut self, event: PointerEvent) -> Interaction {
        if self.source.is_none() {
            return Interaction::Ignored;
        }
        let target = DrawTarget {
            mode: self.mode,
            page: self.view.page,
            color: self.highlight_color,
            store: &mut self.store,
        };
        self.controller.handle(event, target)
    }

    /// Highlights on the current page and the crop area, positioned on the
    /// displayed element. Empty until a page has finished rendering.
    pub fn overlays(&self, element: ElementRect) -> Vec<Overlay> {
        let Some(bitmap) = self.renderer.surface().size() else {
            return Vec::new();
        };

        let mut overlays: Vec<Overlay> = self
            .store
            .highlights_for_page(self.view.page)
            .map(|highlight| Overlay::Highlight {
                id: highlight.id.clone(),
                color: highlight.color,
                rect: bitmap_rect_to_device(highlight.rect, element, bitmap),
            })
            .collect();
        if let Some(crop) = self.store.crop_area() {
            overlays.push(Overlay::Crop { rect: bitmap_rect_to_device(crop, element, bitmap) });
        }
        overlays
    }

    /// Moves to the next page. Returns `false` on the last page.
    pub fn next_page(&mut self) -> bool {
        if self.source.is_none() || self.view.page >= self.view.total_pages {
            return false;
        }
        self.go_to_page(self.view.page + 1);
        true
    }

    /// Moves to the previous page. Returns `false` on the first page.
    pub fn prev_page(&mut self) -> bool {
        if self.source.is_none() || self.view.page <= 1 {
            return false;
        }
        self.go_to_page(self.view.page - 1);
        true
    }

    fn go_to_page(&mut self, page: u32) {
        self.view.page = page;
        self.store.set_crop_area(None);
        self.controller.reset();
        let _ = self.render_current();
    }

    pub fn zoom_in(&mut self) -> bool {
        self.set_zoom(self.view.zoom + ZOOM_STEP)
    }

    pub fn zoom_out(&mut self) -> bool {
        self.set_zoom(self.view.zoom - ZOOM_STEP)
    }

    /// Changes the zoom and re-renders. Stored rectangles are rescaled so
    /// they stay in the bitmap space of the new zoom.
    pub fn set_zoom(&mut self, zoom: f32) -> bool {
        let zoom = clamp_zoom(zoom);
        if (zoom - self.view.zoom).abs() < f32::EPSILON {
            return false;
        }

        let factor = zoom / self.view.zoom;
        self.store.rescale(factor);
        self.controller.reset();
        self.view.zoom = zoom;
        debug!("zoom set to {}", self.view.zoom_label());

        if self.source.is_some() {
            let _ = self.render_current();
        }
        true
    }

    /// Whether the undo control is available.
    ///
    /// In highlight mode this looks at the current page only, even though
    /// [`undo`](Self::undo) itself removes the newest highlight on any page.
    pub fn can_undo(&self) -> bool {
        match self.mode {
            EditorMode::View => false,
            EditorMode::Highlight => self.store.highlights_for_page(self.view.page).next().is_some(),
            EditorMode::Crop => self.store.crop_area().is_some(),
        }
    }

    pub fn undo(&mut self) -> UndoEffect {
        let effect = self.store.undo_last(self.mode);
        debug!("undo in {:?} mode: {effect:?}", self.mode);
        effect
    }

    pub fn remove_highlight(&mut self, id: &str) -> Option<Highlight> {
        self.store.remove_highlight(id)
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn view(&self) -> ViewState {
        self.view
    }

    pub fn viewer(&self) -> &ViewerState {
        &self.viewer
    }

    pub fn renderer(&self) -> &PageRenderer<E> {
        &self.renderer
    }

    pub fn preview(&self) -> Option<crate::geometry::Rect> {
        self.controller.preview()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.source.as_ref().map(|source| source.name.as_str())
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.source.is_some() && !self.store.is_empty()
    }

    pub fn request_reset(&mut self) -> ResetDecision {
        if self.has_unsaved_changes() {
            return ResetDecision::NeedsConfirmation;
        }
        self.confirm_reset();
        ResetDecision::Reset
    }

    /// Drops the document and all annotations unconditionally.
    pub fn confirm_reset(&mut self) {
        self.clear_document();
        self.view.zoom = self.options.initial_zoom;
        self.notice = None;
        info!("session reset");
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    /// Stamps every highlight into a copy of the original document and
    /// saves it. The current surface size is the mapping basis.
    pub fn export_highlighted(
        &mut self,
        today: NaiveDate,
        sink: &mut dyn ArtifactSink,
    ) -> EditorResult<PathBuf> {
        let result = self.build_highlighted(today).and_then(|artifact| save(sink, artifact));
        self.finish_export(result, "Highlighted PDF downloaded successfully!")
    }

    /// Exports the crop area of the current page as a one-page document.
    pub fn export_cropped(
        &mut self,
        today: NaiveDate,
        sink: &mut dyn ArtifactSink,
    ) -> EditorResult<PathBuf> {
        let result = self.build_cropped(today).and_then(|artifact| save(sink, artifact));
        self.finish_export(result, "Cropped PDF downloaded successfully!")
    }

    fn build_highlighted(&self, today: NaiveDate) -> EditorResult<SavedArtifact> {
        let source = self.source.as_ref().ok_or(ExportError::NoHighlights)?;
        if self.store.highlights().is_empty() {
            return Err(ExportError::NoHighlights.into());
        }
        let canvas = self.canvas()?;

        let bytes = export_highlighted(&source.bytes, self.store.highlights(), canvas)?;
        Ok(SavedArtifact { file_name: highlighted_file_name(&source.name, today), bytes })
    }

    fn build_cropped(&self, today: NaiveDate) -> EditorResult<SavedArtifact> {
        let source = self.source.as_ref().ok_or(ExportError::NoDocument)?;
        let crop = self.store.crop_area().ok_or(ExportError::NoCropArea)?;
        let canvas = self.canvas()?;
        let page = self.view.page;

        let page_size = self.renderer.page_size(page).map_err(ExportError::from)?;
        let rendered = self.renderer.render_offscreen(page, CROP_RENDER_SCALE).map_err(ExportError::from)?;
        let bytes =
            export_cropped(&rendered, crop, self.store.highlights_for_page(page), canvas, page_size)?;
        Ok(SavedArtifact { file_name: cropped_file_name(&source.name, page, today), bytes })
    }

    fn canvas(&self) -> EditorResult<BitmapSize> {
        let size = self.renderer.surface().size().unwrap_or(BitmapSize::new(0, 0));
        if size.is_empty() {
            return Err(ValidationError::InvalidCanvas { width: size.width, height: size.height }.into());
        }
        Ok(size)
    }

    fn finish_export(&mut self, result: EditorResult<PathBuf>, message: &str) -> EditorResult<PathBuf> {
        match result {
            Ok(path) => {
                info!("exported {}", path.display());
                self.notice = Some(Notice::Success(message.to_owned()));
                Ok(path)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn fail(&mut self, err: EditorError) -> EditorError {
        self.notice = Some(Notice::Error(err.to_string()));
        err
    }

    fn clear_document(&mut self) {
        self.renderer.close();
        self.source = None;
        self.store.clear();
        self.controller.reset();
        self.mode = EditorMode::View;
        self.view.page = 0;
        self.view.total_pages = 0;
        self.viewer = ViewerState::Empty;
    }
}

fn save(sink: &mut dyn ArtifactSink, artifact: SavedArtifact) -> EditorResult<PathBuf> {
    sink.save(&artifact).map_err(|source| {
        EditorError::from(ExportError::Save { file_name: artifact.file_name.clone(), source })
    })
}
