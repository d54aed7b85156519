//! Highlight annotations and the in-memory annotation store
//!
//! Highlight rectangles live in the bitmap space of the surface they were
//! drawn on and are tagged with a 1-based page number. The crop area is not
//! tagged: it always belongs to the page currently displayed.

use crate::controller::EditorMode;
use crate::error::ValidationError;
use crate::geometry::Rect;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Unique identifier for a highlight within one store.
pub type HighlightId = String;

/// Highlight color as shown on screen.
///
/// `alpha` is the on-screen overlay opacity; exports apply their own fixed
/// opacity and only use the RGB channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f32,
}

impl Color {
    pub const fn rgba(r: u8, g: u8, b: u8, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Normalised RGB channels (0.0 to 1.0).
    pub fn to_normalized_rgb(&self) -> (f32, f32, f32) {
        (self.r as f32 / 255.0, self.g as f32 / 255.0, self.b as f32 / 255.0)
    }

    /// Parses `rgb(r, g, b)` or `rgba(r, g, b, a)` notation.
    pub fn parse_css(value: &str) -> Option<Self> {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        let pattern = PATTERN
            .get_or_init(|| {
                Regex::new(r"^\s*rgba?\(\s*(\d{1,3})\s*,\s*(\d{1,3})\s*,\s*(\d{1,3})\s*(?:,\s*([\d.]+)\s*)?\)\s*$")
                    .ok()
            })
            .as_ref()?;

        let captures = pattern.captures(value)?;
        let channel = |index: usize| captures.get(index)?.as_str().parse::<u8>().ok();
        let alpha = match captures.get(4) {
            Some(raw) => raw.as_str().parse::<f32>().ok().filter(|a| (0.0..=1.0).contains(a))?,
            None => 1.0,
        };

        Some(Self { r: channel(1)?, g: channel(2)?, b: channel(3)?, a: alpha })
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rgba({}, {}, {}, {})", self.r, self.g, self.b, self.a)
    }
}

impl TryFrom<String> for Color {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::parse_css(&value).ok_or(ValidationError::InvalidColor(value))
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

impl std::str::FromStr for Color {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Some(color) = palette_color(value) {
            return Ok(color);
        }
        Color::parse_css(value).ok_or_else(|| ValidationError::InvalidColor(value.to_owned()))
    }
}

/// Built-in highlight colors, in menu order. The first entry is the default.
pub const HIGHLIGHT_PALETTE: [(&str, Color); 5] = [
    ("Yellow", Color::rgba(255, 255, 0, 0.4)),
    ("Green", Color::rgba(0, 255, 0, 0.4)),
    ("Blue", Color::rgba(0, 150, 255, 0.4)),
    ("Pink", Color::rgba(255, 0, 150, 0.4)),
    ("Orange", Color::rgba(255, 165, 0, 0.4)),
];

pub const DEFAULT_HIGHLIGHT_COLOR: Color = HIGHLIGHT_PALETTE[0].1;

/// Looks up a palette entry by name, ignoring case.
pub fn palette_color(name: &str) -> Option<Color> {
    HIGHLIGHT_PALETTE
        .iter()
        .find(|(entry, _)| entry.eq_ignore_ascii_case(name.trim()))
        .map(|(_, color)| *color)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub id: HighlightId,
    /// 1-based page number.
    pub page: u32,
    #[serde(flatten)]
    pub rect: Rect,
    pub color: Color,
}

/// What a single undo step removed.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoEffect {
    RemovedHighlight(Highlight),
    ClearedCrop(Rect),
    Nothing,
}

/// Ordered highlights plus at most one crop area.
///
/// Insertion order matters only for undo, which is a global stack across
/// all pages.
#[derive(Debug, Default)]
pub struct AnnotationStore {
    highlights: Vec<Highlight>,
    crop_area: Option<Rect>,
    next_seq: u64,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an id of the form `{page}-{n}` not used by any stored highlight.
    pub fn next_highlight_id(&mut self, page: u32) -> HighlightId {
        loop {
            self.next_seq += 1;
            let candidate = format!("{page}-{}", self.next_seq);
            if !self.contains(&candidate) {
                return candidate;
            }
        }
    }

    pub fn add_highlight(&mut self, highlight: Highlight) -> Result<(), ValidationError> {
        if self.contains(&highlight.id) {
            return Err(ValidationError::DuplicateHighlight(highlight.id));
        }
        self.highlights.push(highlight);
        Ok(())
    }

    pub fn remove_highlight(&mut self, id: &str) -> Option<Highlight> {
        let index = self.highlights.iter().position(|highlight| highlight.id == id)?;
        Some(self.highlights.remove(index))
    }

    /// Mode-sensitive single-step undo.
    ///
    /// Highlight mode pops the most recently added highlight regardless of
    /// page; crop mode clears the crop area; view mode does nothing.
    pub fn undo_last(&mut self, mode: EditorMode) -> UndoEffect {
        match mode {
            EditorMode::Highlight => {
                self.highlights.pop().map_or(UndoEffect::Nothing, UndoEffect::RemovedHighlight)
            }
            EditorMode::Crop => {
                self.crop_area.take().map_or(UndoEffect::Nothing, UndoEffect::ClearedCrop)
            }
            EditorMode::View => UndoEffect::Nothing,
        }
    }

    pub fn set_crop_area(&mut self, area: Option<Rect>) {
        self.crop_area = area;
    }

    pub fn crop_area(&self) -> Option<Rect> {
        self.crop_area
    }

    pub fn highlights(&self) -> &[Highlight] {
        &self.highlights
    }

    pub fn highlights_for_page(&self, page: u32) -> impl Iterator<Item = &Highlight> + '_ {
        self.highlights.iter().filter(move |highlight| highlight.page == page)
    }

    pub fn is_empty(&self) -> bool {
        self.highlights.is_empty() && self.crop_area.is_none()
    }

    /// Multiplies every stored rectangle by `factor`.
    ///
    /// Keeps coordinates in the bitmap space of the current zoom level.
    pub fn rescale(&mut self, factor: f32) {
        for highlight in &mut self.highlights {
            highlight.rect = highlight.rect.scaled(factor, factor);
        }
        if let Some(area) = self.crop_area.as_mut() {
            *area = area.scaled(factor, factor);
        }
    }

    pub fn clear(&mut self) {
        self.highlights.clear();
        self.crop_area = None;
    }

    fn contains(&self, id: &str) -> bool {
        self.highlights.iter().any(|highlight| highlight.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn highlight(store: &mut AnnotationStore, page: u32, x: f32) -> HighlightId {
        let id = store.next_highlight_id(page);
        store
            .add_highlight(Highlight {
                id: id.clone(),
                page,
                rect: Rect::new(x, 10.0, 20.0, 20.0),
                color: DEFAULT_HIGHLIGHT_COLOR,
            })
            .expect("fresh id should be accepted");
        id
    }

    #[test]
    fn parses_css_colors() {
        assert_eq!(Color::parse_css("rgba(255, 165, 0, 0.4)"), Some(Color::rgba(255, 165, 0, 0.4)));
        assert_eq!(Color::parse_css("rgb(1,2,3)"), Some(Color::rgba(1, 2, 3, 1.0)));
        assert_eq!(Color::parse_css("rgba(256, 0, 0, 0.4)"), None);
        assert_eq!(Color::parse_css("#ffff00"), None);
    }

    #[test]
    fn from_str_accepts_palette_names() {
        let blue: Color = "blue".parse().expect("palette name should parse");
        assert_eq!(blue, Color::rgba(0, 150, 255, 0.4));
        assert!("chartreuse".parse::<Color>().is_err());
    }

    #[test]
    fn color_serializes_as_css() {
        let json = serde_json::to_string(&DEFAULT_HIGHLIGHT_COLOR).expect("color should serialize");
        assert_eq!(json, "\"rgba(255, 255, 0, 0.4)\"");

        let back: Color = serde_json::from_str(&json).expect("color should deserialize");
        assert_eq!(back, DEFAULT_HIGHLIGHT_COLOR);
    }

    #[test]
    fn ids_are_unique() {
        let mut store = AnnotationStore::new();
        let a = highlight(&mut store, 1, 0.0);
        let b = highlight(&mut store, 1, 30.0);
        assert_ne!(a, b);

        let duplicate = Highlight {
            id: a.clone(),
            page: 2,
            rect: Rect::new(0.0, 0.0, 1.0, 1.0),
            color: DEFAULT_HIGHLIGHT_COLOR,
        };
        assert!(matches!(
            store.add_highlight(duplicate),
            Err(ValidationError::DuplicateHighlight(id)) if id == a
        ));
    }

    #[test]
    fn undo_in_highlight_mode_pops_globally_most_recent() {
        let mut store = AnnotationStore::new();
        highlight(&mut store, 1, 0.0);
        let on_page_two = highlight(&mut store, 2, 0.0);
        highlight(&mut store, 1, 50.0);
        let latest = store.highlights()[2].id.clone();

        match store.undo_last(EditorMode::Highlight) {
            UndoEffect::RemovedHighlight(removed) => assert_eq!(removed.id, latest),
            other => panic!("unexpected undo effect: {other:?}"),
        }
        match store.undo_last(EditorMode::Highlight) {
            UndoEffect::RemovedHighlight(removed) => assert_eq!(removed.id, on_page_two),
            other => panic!("unexpected undo effect: {other:?}"),
        }
        assert_eq!(store.highlights().len(), 1);
    }

    #[test]
    fn undo_in_crop_mode_clears_crop_only() {
        let mut store = AnnotationStore::new();
        highlight(&mut store, 1, 0.0);
        store.set_crop_area(Some(Rect::new(1.0, 2.0, 3.0, 4.0)));

        assert_eq!(
            store.undo_last(EditorMode::Crop),
            UndoEffect::ClearedCrop(Rect::new(1.0, 2.0, 3.0, 4.0))
        );
        assert_eq!(store.crop_area(), None);
        assert_eq!(store.highlights().len(), 1);
        assert_eq!(store.undo_last(EditorMode::Crop), UndoEffect::Nothing);
        assert_eq!(store.undo_last(EditorMode::View), UndoEffect::Nothing);
    }

    #[test]
    fn filters_highlights_by_page_in_order() {
        let mut store = AnnotationStore::new();
        let first = highlight(&mut store, 1, 0.0);
        highlight(&mut store, 2, 0.0);
        let second = highlight(&mut store, 1, 40.0);

        let ids: Vec<_> = store.highlights_for_page(1).map(|h| h.id.clone()).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn remove_highlight_by_id() {
        let mut store = AnnotationStore::new();
        let id = highlight(&mut store, 1, 0.0);

        assert!(store.remove_highlight(&id).is_some());
        assert!(store.remove_highlight(&id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn rescale_moves_all_rectangles() {
        let mut store = AnnotationStore::new();
        highlight(&mut store, 1, 10.0);
        store.set_crop_area(Some(Rect::new(4.0, 4.0, 8.0, 8.0)));

        store.rescale(0.5);

        assert_eq!(store.highlights()[0].rect, Rect::new(5.0, 5.0, 10.0, 10.0));
        assert_eq!(store.crop_area(), Some(Rect::new(2.0, 2.0, 4.0, 4.0)));
    }
}
