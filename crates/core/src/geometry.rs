//! Coordinate mapping
//!
//! Three spaces are in play:
//! - device space: pointer positions relative to the viewport, in CSS pixels
//! - bitmap space: pixels of the rendered page surface, origin top-left
//! - PDF point space: page units of 1/72 inch, origin bottom-left
//!
//! Every conversion names the dimensions of both spaces it bridges.

use pagemark_engine::PageSize;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle, origin at its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// The rectangle spanned by two opposite corners, in either order.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (b.x - a.x).abs(),
            height: (b.y - a.y).abs(),
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    /// Overlap of two rectangles, `None` when they share no area.
    ///
    /// Rectangles that only touch along an edge do not overlap.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if self.x >= other.right()
            || self.right() <= other.x
            || self.y >= other.bottom()
            || self.bottom() <= other.y
        {
            return None;
        }

        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let clipped = Rect {
            x,
            y,
            width: self.right().min(other.right()) - x,
            height: self.bottom().min(other.bottom()) - y,
        };

        clipped.has_area().then_some(clipped)
    }

    pub fn scaled(&self, sx: f32, sy: f32) -> Rect {
        Rect { x: self.x * sx, y: self.y * sy, width: self.width * sx, height: self.height * sy }
    }

    /// Shift so that `origin` becomes (0, 0).
    pub fn relative_to(&self, origin: Point) -> Rect {
        Rect { x: self.x - origin.x, y: self.y - origin.y, ..*self }
    }

    pub fn origin(&self) -> Point {
        Point { x: self.x, y: self.y }
    }
}

/// Pixel dimensions of a rendered page surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitmapSize {
    pub width: u32,
    pub height: u32,
}

impl BitmapSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Where the surface is displayed, in device space.
///
/// The displayed size may differ from the bitmap size when the surface is
/// stretched by layout or device pixel ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl ElementRect {
    /// An element displayed at exactly its bitmap size at the viewport origin.
    pub fn unscaled(bitmap: BitmapSize) -> Self {
        Self { left: 0.0, top: 0.0, width: bitmap.width as f32, height: bitmap.height as f32 }
    }
}

/// Rectangle in PDF point space, origin at its bottom-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PdfRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

fn ratio(numerator: f32, denominator: f32) -> f32 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        1.0
    }
}

/// Maps a pointer position to surface pixels, compensating for CSS scaling.
pub fn device_to_bitmap(device: Point, element: ElementRect, bitmap: BitmapSize) -> Point {
    Point {
        x: (device.x - element.left) * ratio(bitmap.width as f32, element.width),
        y: (device.y - element.top) * ratio(bitmap.height as f32, element.height),
    }
}

/// Inverse of [`device_to_bitmap`]; positions overlays on a scaled surface.
pub fn bitmap_to_device(point: Point, element: ElementRect, bitmap: BitmapSize) -> Point {
    Point {
        x: element.left + point.x * ratio(element.width, bitmap.width as f32),
        y: element.top + point.y * ratio(element.height, bitmap.height as f32),
    }
}

/// Positions a surface rectangle on the displayed element.
pub fn bitmap_rect_to_device(rect: Rect, element: ElementRect, bitmap: BitmapSize) -> Rect {
    let origin = bitmap_to_device(rect.origin(), element, bitmap);
    Rect {
        x: origin.x,
        y: origin.y,
        width: rect.width * ratio(element.width, bitmap.width as f32),
        height: rect.height * ratio(element.height, bitmap.height as f32),
    }
}

/// Maps a surface pixel to PDF points, flipping the vertical axis.
pub fn bitmap_to_pdf_point(point: Point, bitmap: BitmapSize, page: PageSize) -> Point {
    Point {
        x: point.x / bitmap.width as f32 * page.width_pt,
        y: page.height_pt - point.y / bitmap.height as f32 * page.height_pt,
    }
}

pub fn pdf_point_to_bitmap(point: Point, bitmap: BitmapSize, page: PageSize) -> Point {
    Point {
        x: point.x / page.width_pt * bitmap.width as f32,
        y: (page.height_pt - point.y) / page.height_pt * bitmap.height as f32,
    }
}

/// Maps a surface rectangle to PDF points.
///
/// The PDF rectangle is anchored at the image of the bitmap rectangle's
/// bottom edge, so its vertical extent survives the flip.
pub fn bitmap_rect_to_pdf(rect: Rect, bitmap: BitmapSize, page: PageSize) -> PdfRect {
    let bottom_left = bitmap_to_pdf_point(Point::new(rect.x, rect.bottom()), bitmap, page);
    PdfRect {
        x: bottom_left.x,
        y: bottom_left.y,
        width: rect.width / bitmap.width as f32 * page.width_pt,
        height: rect.height / bitmap.height as f32 * page.height_pt,
    }
}

pub fn pdf_rect_to_bitmap(rect: PdfRect, bitmap: BitmapSize, page: PageSize) -> Rect {
    let top_left = pdf_point_to_bitmap(Point::new(rect.x, rect.y + rect.height), bitmap, page);
    Rect {
        x: top_left.x,
        y: top_left.y,
        width: rect.width / page.width_pt * bitmap.width as f32,
        height: rect.height / page.height_pt * bitmap.height as f32,
    }
}
