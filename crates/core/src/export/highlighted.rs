//! Stamping highlights onto the original document
//!
//! Each highlighted page gets one extra content stream that fills the
//! highlight rectangles through a shared translucent graphics state. The
//! page's existing content is wrapped in `q`/`Q` so whatever transform it
//! leaves behind cannot displace the overlay.

use crate::annotation::Highlight;
use crate::error::{EditorResult, ExportError, ValidationError};
use crate::geometry::{bitmap_rect_to_pdf, BitmapSize};
use log::{debug, warn};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use pagemark_engine::media_box;
use std::collections::BTreeMap;

/// Fill opacity of stamped highlights.
pub const HIGHLIGHT_OPACITY: f32 = 0.3;

const GRAPHICS_STATE: &str = "PmHighlight";
const MAX_INHERITANCE_DEPTH: usize = 32;

/// Returns a copy of `original` with every highlight drawn onto its page.
///
/// Highlight rectangles are in the bitmap space of a surface of size
/// `canvas`. Highlights on pages the document does not have are skipped.
pub fn export_highlighted(
    original: &[u8],
    highlights: &[Highlight],
    canvas: BitmapSize,
) -> EditorResult<Vec<u8>> {
    if canvas.is_empty() {
        return Err(ValidationError::InvalidCanvas { width: canvas.width, height: canvas.height }.into());
    }
    if highlights.is_empty() {
        return Err(ExportError::NoHighlights.into());
    }

    let mut doc = Document::load_mem(original).map_err(ExportError::from)?;
    let pages = doc.get_pages();

    let mut by_page: BTreeMap<u32, Vec<&Highlight>> = BTreeMap::new();
    for highlight in highlights {
        by_page.entry(highlight.page).or_default().push(highlight);
    }

    let state_id = doc.add_object(dictionary! {
        "Type" => "ExtGState",
        "ca" => HIGHLIGHT_OPACITY,
        "CA" => HIGHLIGHT_OPACITY,
    });

    for (page, group) in by_page {
        let Some(&page_id) = pages.get(&page) else {
            warn!("skipping {} highlight(s) on missing page {page}", group.len());
            continue;
        };

        let overlay = overlay_content(&doc, page_id, &group, canvas)?;
        install_graphics_state(&mut doc, page_id, state_id)?;
        append_overlay(&mut doc, page_id, overlay)?;
        debug!("stamped {} highlight(s) on page {page}", group.len());
    }

    Ok(serialize(&mut doc)?)
}

fn overlay_content(
    doc: &Document,
    page_id: ObjectId,
    group: &[&Highlight],
    canvas: BitmapSize,
) -> Result<Vec<u8>, ExportError> {
    let media = media_box(doc, page_id);
    let size = media.size();

    let mut operations = vec![
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(GRAPHICS_STATE.as_bytes().to_vec())]),
    ];
    for highlight in group {
        let rect = bitmap_rect_to_pdf(highlight.rect, canvas, size);
        let (r, g, b) = highlight.color.to_normalized_rgb();
        operations.push(Operation::new("rg", vec![r.into(), g.into(), b.into()]));
        operations.push(Operation::new(
            "re",
            vec![
                (rect.x + media.x0).into(),
                (rect.y + media.y0).into(),
                rect.width.into(),
                rect.height.into(),
            ],
        ));
        operations.push(Operation::new("f", vec![]));
    }
    operations.push(Operation::new("Q", vec![]));

    Ok(Content { operations }.encode()?)
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// The page's `/Resources`, including ones inherited from the page tree.
fn effective_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
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
        if let Some(resources) = dict
            .get(b"Resources")
            .ok()
            .and_then(|obj| resolve(doc, obj))
            .and_then(|obj| obj.as_dict().ok())
        {
            return resources.clone();
        }
        current = dict.get(b"Parent").ok().and_then(|parent| parent.as_reference().ok());
    }

    Dictionary::new()
}

fn install_graphics_state(
    doc: &mut Document,
    page_id: ObjectId,
    state_id: ObjectId,
) -> Result<(), ExportError> {
    let mut resources = effective_resources(doc, page_id);
    let mut states = resources
        .get(b"ExtGState")
        .ok()
        .and_then(|obj| resolve(doc, obj))
        .and_then(|obj| obj.as_dict().ok())
        .cloned()
        .unwrap_or_else(Dictionary::new);

    states.set(GRAPHICS_STATE, state_id);
    resources.set("ExtGState", states);
    doc.get_object_mut(page_id)?.as_dict_mut()?.set("Resources", resources);
    Ok(())
}

fn existing_contents(doc: &Document, page_id: ObjectId) -> Result<Vec<Object>, ExportError> {
    let page = doc.get_dictionary(page_id)?;
    let contents = match page.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    };
    Ok(contents)
}

fn append_overlay(doc: &mut Document, page_id: ObjectId, overlay: Vec<u8>) -> Result<(), ExportError> {
    let existing = existing_contents(doc, page_id)?;

    let mut contents = Vec::with_capacity(existing.len() + 3);
    if !existing.is_empty() {
        let save = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
        let restore = doc.add_object(Stream::new(dictionary! {}, b"\nQ\n".to_vec()));
        contents.push(Object::from(save));
        contents.extend(existing);
        contents.push(Object::from(restore));
    }
    let overlay_id = doc.add_object(Stream::new(dictionary! {}, overlay));
    contents.push(Object::from(overlay_id));

    doc.get_object_mut(page_id)?.as_dict_mut()?.set("Contents", contents);
    Ok(())
}

pub(crate) fn serialize(doc: &mut Document) -> Result<Vec<u8>, ExportError> {
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).map_err(|err| ExportError::Pdf(err.into()))?;
    Ok(bytes)
}
