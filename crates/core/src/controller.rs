//! Pointer interaction state machine
//!
//! Drags are interpreted according to the active [`EditorMode`]: highlight
//! drags produce a transient preview and commit on release, crop drags write
//! the crop area live on every move, and view mode ignores the pointer.

use crate::annotation::{AnnotationStore, Color, Highlight, HighlightId};
use crate::geometry::{Point, Rect};
use log::debug;
use serde::{Deserialize, Serialize};

/// Highlights must exceed this extent, in bitmap pixels, on both axes.
pub const MIN_HIGHLIGHT_EXTENT: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditorMode {
    #[default]
    View,
    Highlight,
    Crop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerKind {
    Down,
    Move,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    pub kind: PointerKind,
    pub position: Point,
}

impl PointerEvent {
    pub fn down(x: f32, y: f32) -> Self {
        Self { kind: PointerKind::Down, position: Point::new(x, y) }
    }

    pub fn moved(x: f32, y: f32) -> Self {
        Self { kind: PointerKind::Move, position: Point::new(x, y) }
    }

    pub fn up(x: f32, y: f32) -> Self {
        Self { kind: PointerKind::Up, position: Point::new(x, y) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DragState {
    Idle,
    Dragging { start: Point },
}

/// What a pointer event did.
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Ignored,
    DragStarted,
    /// Highlight-mode rubber band; nothing is stored yet.
    Preview(Rect),
    CropUpdated(Rect),
    HighlightCreated(HighlightId),
    /// A highlight drag too small to keep.
    Discarded(Rect),
    DragEnded,
}

/// Everything a gesture may read or write besides the drag itself.
pub struct DrawTarget<'a> {
    pub mode: EditorMode,
    /// 1-based page that new highlights are tagged with.
    pub page: u32,
    pub color: Color,
    pub store: &'a mut AnnotationStore,
}

#[derive(Debug)]
pub struct InteractionController {
    state: DragState,
    preview: Option<Rect>,
}

impl Default for InteractionController {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionController {
    pub fn new() -> Self {
        Self { state: DragState::Idle, preview: None }
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging { .. })
    }

    /// The transient highlight rectangle, while a highlight drag is active.
    pub fn preview(&self) -> Option<Rect> {
        self.preview
    }

    /// Abandon any drag in progress without committing it.
    pub fn reset(&mut self) {
        self.state = DragState::Idle;
        self.preview = None;
    }

    /// Feed one pointer event, positioned in bitmap space.
    pub fn handle(&mut self, event: PointerEvent, target: DrawTarget<'_>) -> Interaction {
        if target.mode == EditorMode::View {
            return Interaction::Ignored;
        }

        match (self.state, event.kind) {
            (DragState::Idle, PointerKind::Down) => {
                self.state = DragState::Dragging { start: event.position };
                Interaction::DragStarted
            }
            (DragState::Dragging { start }, PointerKind::Move) => {
                let rect = Rect::from_corners(start, event.position);
                match target.mode {
                    EditorMode::Highlight => {
                        self.preview = Some(rect);
                        Interaction::Preview(rect)
                    }
                    EditorMode::Crop => {
                        target.store.set_crop_area(Some(rect));
                        Interaction::CropUpdated(rect)
                    }
                    EditorMode::View => Interaction::Ignored,
                }
            }
            (DragState::Dragging { start }, PointerKind::Up) => {
                self.reset();
                match target.mode {
                    EditorMode::Highlight => {
                        commit_highlight(Rect::from_corners(start, event.position), target)
                    }
                    _ => Interaction::DragEnded,
                }
            }
            // A second press while dragging restarts nothing; moves and
            // releases without a press are stray.
            _ => Interaction::Ignored,
        }
    }
}

fn commit_highlight(rect: Rect, target: DrawTarget<'_>) -> Interaction {
    if rect.width <= MIN_HIGHLIGHT_EXTENT || rect.height <= MIN_HIGHLIGHT_EXTENT {
        debug!("discarding {}x{} highlight drag", rect.width, rect.height);
        return Interaction::Discarded(rect);
    }

    let id = target.store.next_highlight_id(target.page);
    let highlight = Highlight { id: id.clone(), page: target.page, rect, color: target.color };

    match target.store.add_highlight(highlight) {
        Ok(()) => Interaction::HighlightCreated(id),
        // next_highlight_id never hands out a stored id.
        Err(_) => Interaction::Discarded(rect),
    }
}
