//! Pagemark Core Library
//!
//! Editing model for the Pagemark PDF annotator: coordinate mapping,
//! highlight and crop annotations, the pointer state machine, page rendering
//! and the two export pipelines, tied together by [`EditorSession`].

pub mod annotation;
pub mod controller;
pub mod error;
pub mod export;
pub mod geometry;
pub mod renderer;
pub mod session;

#[cfg(test)]
mod test_support;

pub use annotation::{
    palette_color, AnnotationStore, Color, Highlight, HighlightId, UndoEffect,
    DEFAULT_HIGHLIGHT_COLOR, HIGHLIGHT_PALETTE,
};
pub use controller::{EditorMode, Interaction, InteractionController, PointerEvent, PointerKind};
pub use error::{
    EditorError, EditorResult, ExportError, LoadError, RenderError, ValidationError,
};
pub use export::{ArtifactSink, DirectorySink, MemorySink, SavedArtifact};
pub use geometry::{BitmapSize, ElementRect, PdfRect, Point, Rect};
pub use renderer::{DocumentInfo, PageRenderer, RenderSurface, BASE_RENDER_SCALE};
pub use session::{
    clamp_zoom, validate_upload, EditorSession, Notice, Overlay, ResetDecision, SessionOptions,
    UploadCandidate, ViewState, ViewerState, MAX_UPLOAD_BYTES,
};
