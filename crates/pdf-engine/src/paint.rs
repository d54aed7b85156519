//! Vector content painting for the lopdf backend.
//!
//! Interprets a page's content stream onto a tiny-skia pixmap: path
//! construction and painting, clipping, device colours, constant alpha from
//! `/ExtGState` and form XObjects. Text and images are not painted.

use crate::{MediaBox, MAX_INHERITANCE_DEPTH};
use log::debug;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId};
use tiny_skia::{
    FillRule, LineCap, LineJoin, Mask, Paint, Path, PathBuilder, Pixmap, Stroke, Transform,
};

/// Nested form XObjects deeper than this are skipped.
const MAX_FORM_DEPTH: usize = 8;

/// Paints page `page_id` onto `pixmap` at `scale` pixels per point.
///
/// Unreadable content leaves the pixmap untouched.
pub(crate) fn paint_page(
    doc: &Document,
    page_id: ObjectId,
    media: MediaBox,
    scale: f32,
    pixmap: &mut Pixmap,
) {
    let content = match doc.get_page_content(page_id) {
        Ok(content) => content,
        Err(err) => {
            debug!("page {page_id:?} has unreadable content: {err}");
            return;
        }
    };

    let base = Transform::from_row(scale, 0.0, 0.0, -scale, -media.x0 * scale, media.y1 * scale);
    let mut painter = Painter::new(doc, pixmap, base);
    painter.run(&content, page_resources(doc, page_id), 0);

    if painter.skipped > 0 {
        debug!("page {page_id:?}: {} operator(s) not painted", painter.skipped);
    }
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(object),
        other => other,
    }
}

fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut current = Some(page_id);
    for _ in 0..MAX_INHERITANCE_DEPTH {
        let dict = doc.get_dictionary(current?).ok()?;
        if let Ok(resources) = dict.get(b"Resources") {
            return resolve(doc, resources).as_dict().ok();
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

fn named_resource<'a>(
    doc: &'a Document,
    resources: Option<&'a Dictionary>,
    category: &[u8],
    name: &[u8],
) -> Option<&'a Object> {
    let category = resolve(doc, resources?.get(category).ok()?).as_dict().ok()?;
    Some(resolve(doc, category.get(name).ok()?))
}

/// The trailing `N` operands as numbers.
fn numbers<const N: usize>(operands: &[Object]) -> Option<[f32; N]> {
    let tail = operands.get(operands.len().checked_sub(N)?..)?;
    let mut out = [0.0; N];
    for (slot, operand) in out.iter_mut().zip(tail) {
        *slot = operand.as_float().ok()?;
    }
    Some(out)
}

fn array_numbers<const N: usize>(
    doc: &Document,
    dict: &Dictionary,
    key: &[u8],
) -> Option<[f32; N]> {
    let array = resolve(doc, dict.get(key).ok()?).as_array().ok()?;
    if array.len() != N {
        return None;
    }
    numbers::<N>(array)
}

/// Device colour from gray, RGB or CMYK components.
fn device_color(operands: &[Object]) -> Option<[f32; 3]> {
    let components =
        operands.iter().map(|operand| operand.as_float().ok()).collect::<Option<Vec<_>>>()?;
    match components[..] {
        [gray] => Some([gray; 3]),
        [r, g, b] => Some([r, g, b]),
        [c, m, y, k] => {
            Some([(1.0 - c) * (1.0 - k), (1.0 - m) * (1.0 - k), (1.0 - y) * (1.0 - k)])
        }
        _ => None,
    }
}

fn channel(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn solid(color: [f32; 3], alpha: f32) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(channel(color[0]), channel(color[1]), channel(color[2]), channel(alpha));
    paint.anti_alias = true;
    paint
}

#[derive(Clone)]
struct GraphicsState {
    ctm: Transform,
    fill: [f32; 3],
    stroke: [f32; 3],
    fill_alpha: f32,
    stroke_alpha: f32,
    line_width: f32,
    line_cap: LineCap,
    line_join: LineJoin,
    miter_limit: f32,
    clip: Option<Mask>,
}

impl GraphicsState {
    fn new(ctm: Transform) -> Self {
        Self {
            ctm,
            fill: [0.0; 3],
            stroke: [0.0; 3],
            fill_alpha: 1.0,
            stroke_alpha: 1.0,
            line_width: 1.0,
            line_cap: LineCap::Butt,
            line_join: LineJoin::Miter,
            miter_limit: 10.0,
            clip: None,
        }
    }

    fn stroke(&self) -> Stroke {
        Stroke {
            width: self.line_width,
            miter_limit: self.miter_limit,
            line_cap: self.line_cap,
            line_join: self.line_join,
            ..Stroke::default()
        }
    }
}

struct Painter<'a> {
    doc: &'a Document,
    pixmap: &'a mut Pixmap,
    state: GraphicsState,
    saved: Vec<GraphicsState>,
    path: PathBuilder,
    start: (f32, f32),
    current: (f32, f32),
    pending_clip: Option<FillRule>,
    skipped: usize,
}

impl<'a> Painter<'a> {
    fn new(doc: &'a Document, pixmap: &'a mut Pixmap, base: Transform) -> Self {
        Self {
            doc,
            pixmap,
            state: GraphicsState::new(base),
            saved: Vec::new(),
            path: PathBuilder::new(),
            start: (0.0, 0.0),
            current: (0.0, 0.0),
            pending_clip: None,
            skipped: 0,
        }
    }

    fn run(&mut self, content: &[u8], resources: Option<&'a Dictionary>, depth: usize) {
        let content = match Content::decode(content) {
            Ok(content) => content,
            Err(err) => {
                debug!("failed to decode content stream: {err}");
                return;
            }
        };
        for operation in &content.operations {
            self.apply(operation, resources, depth);
        }
    }

    fn apply(&mut self, operation: &Operation, resources: Option<&'a Dictionary>, depth: usize) {
        let operands = operation.operands.as_slice();
        let painted = match operation.operator.as_str() {
            "q" => {
                self.saved.push(self.state.clone());
                true
            }
            "Q" => {
                if let Some(state) = self.saved.pop() {
                    self.state = state;
                }
                true
            }
            "cm" => numbers::<6>(operands)
                .map(|[a, b, c, d, e, f]| {
                    let matrix = Transform::from_row(a, b, c, d, e, f);
                    self.state.ctm = self.state.ctm.pre_concat(matrix);
                })
                .is_some(),

            "m" => numbers::<2>(operands).map(|[x, y]| self.move_to(x, y)).is_some(),
            "l" => numbers::<2>(operands).map(|[x, y]| self.line_to(x, y)).is_some(),
            "c" => numbers::<6>(operands)
                .map(|[x1, y1, x2, y2, x3, y3]| self.curve_to(x1, y1, x2, y2, x3, y3))
                .is_some(),
            "v" => numbers::<4>(operands)
                .map(|[x2, y2, x3, y3]| {
                    let (x1, y1) = self.current;
                    self.curve_to(x1, y1, x2, y2, x3, y3);
                })
                .is_some(),
            "y" => numbers::<4>(operands)
                .map(|[x1, y1, x3, y3]| self.curve_to(x1, y1, x3, y3, x3, y3))
                .is_some(),
            "h" => {
                self.close();
                true
            }
            "re" => numbers::<4>(operands)
                .map(|[x, y, width, height]| {
                    self.move_to(x, y);
                    self.line_to(x + width, y);
                    self.line_to(x + width, y + height);
                    self.line_to(x, y + height);
                    self.close();
                })
                .is_some(),

            "f" | "F" => self.finish_path(Some(FillRule::Winding), false),
            "f*" => self.finish_path(Some(FillRule::EvenOdd), false),
            "S" => self.finish_path(None, true),
            "s" => {
                self.close();
                self.finish_path(None, true)
            }
            "B" => self.finish_path(Some(FillRule::Winding), true),
            "B*" => self.finish_path(Some(FillRule::EvenOdd), true),
            "b" => {
                self.close();
                self.finish_path(Some(FillRule::Winding), true)
            }
            "b*" => {
                self.close();
                self.finish_path(Some(FillRule::EvenOdd), true)
            }
            "n" => self.finish_path(None, false),
            "W" => {
                self.pending_clip = Some(FillRule::Winding);
                true
            }
            "W*" => {
                self.pending_clip = Some(FillRule::EvenOdd);
                true
            }

            "g" | "rg" | "k" | "sc" | "scn" => {
                device_color(operands).map(|color| self.state.fill = color).is_some()
            }
            "G" | "RG" | "K" | "SC" | "SCN" => {
                device_color(operands).map(|color| self.state.stroke = color).is_some()
            }

            "w" => numbers::<1>(operands)
                .map(|[width]| self.state.line_width = width.max(0.0))
                .is_some(),
            "J" => numbers::<1>(operands)
                .map(|[cap]| {
                    self.state.line_cap = match cap as i32 {
                        1 => LineCap::Round,
                        2 => LineCap::Square,
                        _ => LineCap::Butt,
                    };
                })
                .is_some(),
            "j" => numbers::<1>(operands)
                .map(|[join]| {
                    self.state.line_join = match join as i32 {
                        1 => LineJoin::Round,
                        2 => LineJoin::Bevel,
                        _ => LineJoin::Miter,
                    };
                })
                .is_some(),
            "M" => numbers::<1>(operands)
                .map(|[limit]| self.state.miter_limit = limit.max(1.0))
                .is_some(),
            "gs" => self.set_graphics_state(operands, resources),
            "Do" => self.paint_xobject(operands, resources, depth),
            _ => false,
        };

        if !painted {
            self.skipped += 1;
        }
    }

    fn move_to(&mut self, x: f32, y: f32) {
        self.path.move_to(x, y);
        self.start = (x, y);
        self.current = (x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.path.line_to(x, y);
        self.current = (x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x3: f32, y3: f32) {
        self.path.cubic_to(x1, y1, x2, y2, x3, y3);
        self.current = (x3, y3);
    }

    fn close(&mut self) {
        self.path.close();
        self.current = self.start;
    }

    /// Paints the current path, applies a pending clip and starts a new path.
    fn finish_path(&mut self, fill: Option<FillRule>, stroke: bool) -> bool {
        let builder = std::mem::replace(&mut self.path, PathBuilder::new());
        let pending_clip = self.pending_clip.take();
        let Some(path) = builder.finish() else {
            return true;
        };

        let state = &self.state;
        if let Some(rule) = fill {
            let paint = solid(state.fill, state.fill_alpha);
            self.pixmap.fill_path(&path, &paint, rule, state.ctm, state.clip.as_ref());
        }
        if stroke {
            let paint = solid(state.stroke, state.stroke_alpha);
            self.pixmap.stroke_path(&path, &paint, &state.stroke(), state.ctm, state.clip.as_ref());
        }

        if let Some(rule) = pending_clip {
            self.clip_to(&path, rule);
        }
        true
    }

    /// Intersects the clip region with `path`.
    fn clip_to(&mut self, path: &Path, rule: FillRule) {
        let Some(mut mask) = Mask::new(self.pixmap.width(), self.pixmap.height()) else {
            return;
        };
        mask.fill_path(path, rule, true, self.state.ctm);

        if let Some(existing) = &self.state.clip {
            for (coverage, previous) in mask.data_mut().iter_mut().zip(existing.data()) {
                *coverage = ((*coverage as u16 * *previous as u16) / 255) as u8;
            }
        }
        self.state.clip = Some(mask);
    }

    fn set_graphics_state(
        &mut self,
        operands: &[Object],
        resources: Option<&'a Dictionary>,
    ) -> bool {
        let Some(name) = operands.first().and_then(|operand| operand.as_name().ok()) else {
            return false;
        };
        let params = named_resource(self.doc, resources, b"ExtGState", name);
        let Some(params) = params.and_then(|obj| obj.as_dict().ok()) else {
            return false;
        };

        let number = |key: &[u8]| params.get(key).ok().and_then(|value| value.as_float().ok());
        if let Some(alpha) = number(b"ca") {
            self.state.fill_alpha = alpha.clamp(0.0, 1.0);
        }
        if let Some(alpha) = number(b"CA") {
            self.state.stroke_alpha = alpha.clamp(0.0, 1.0);
        }
        if let Some(width) = number(b"LW") {
            self.state.line_width = width.max(0.0);
        }
        true
    }

    fn paint_xobject(
        &mut self,
        operands: &[Object],
        resources: Option<&'a Dictionary>,
        depth: usize,
    ) -> bool {
        if depth >= MAX_FORM_DEPTH {
            return false;
        }
        let doc = self.doc;
        let Some(name) = operands.first().and_then(|operand| operand.as_name().ok()) else {
            return false;
        };
        let Some(stream) =
            named_resource(doc, resources, b"XObject", name).and_then(|obj| obj.as_stream().ok())
        else {
            return false;
        };
        let is_form = stream
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .is_ok_and(|subtype| subtype == b"Form");
        if !is_form {
            return false;
        }

        let content = stream.decompressed_content().unwrap_or_else(|_| stream.content.clone());
        let form_resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|obj| resolve(doc, obj).as_dict().ok())
            .or(resources);

        self.saved.push(self.state.clone());
        if let Some([a, b, c, d, e, f]) = array_numbers::<6>(doc, &stream.dict, b"Matrix") {
            self.state.ctm = self.state.ctm.pre_concat(Transform::from_row(a, b, c, d, e, f));
        }
        if let Some([x0, y0, x1, y1]) = array_numbers::<4>(doc, &stream.dict, b"BBox") {
            let mut bbox = PathBuilder::new();
            bbox.move_to(x0, y0);
            bbox.line_to(x1, y0);
            bbox.line_to(x1, y1);
            bbox.line_to(x0, y1);
            bbox.close();
            if let Some(bbox) = bbox.finish() {
                self.clip_to(&bbox, FillRule::Winding);
            }
        }

        // Path state does not cross the form boundary.
        let outer_path = std::mem::replace(&mut self.path, PathBuilder::new());
        self.run(&content, form_resources, depth + 1);
        self.path = outer_path;

        if let Some(state) = self.saved.pop() {
            self.state = state;
        }
        true
    }
}
