//! Error taxonomy for the editor
//!
//! Every failure a user can see belongs to one of four families. Cooperative
//! render cancellation is deliberately absent: it is an outcome, not an error.

use pagemark_engine::PdfEngineError;
use std::io;

/// Rejected input. Raised before any state is mutated.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("please select a valid PDF file (media type {media_type:?})")]
    NotPdf { media_type: String },
    #[error("file size too large: {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },
    #[error("invalid crop area dimensions {width}x{height}")]
    InvalidCrop { width: f32, height: f32 },
    #[error("invalid canvas dimensions {width}x{height}")]
    InvalidCanvas { width: u32, height: u32 },
    #[error("unrecognised highlight color {0:?}")]
    InvalidColor(String),
    #[error("highlight id {0:?} already exists")]
    DuplicateHighlight(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read file: {0}")]
    Read(#[from] io::Error),
    #[error("failed to load PDF: {0}")]
    Engine(#[from] PdfEngineError),
    #[error("PDF engine is unavailable")]
    EngineUnavailable,
}

/// A genuine rendering fault.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("no document loaded")]
    NoDocument,
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("failed to render PDF page: {0}")]
    Engine(#[from] PdfEngineError),
    #[error("render worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("no file or highlights")]
    NoHighlights,
    #[error("no crop area selected")]
    NoCropArea,
    #[error("no document loaded")]
    NoDocument,
    #[error("PDF construction failed: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("failed to render page for export: {0}")]
    Render(#[from] RenderError),
    #[error("failed to save {file_name}: {source}")]
    Save { file_name: String, source: io::Error },
}

#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

pub type EditorResult<T> = Result<T, EditorError>;
