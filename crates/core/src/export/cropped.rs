//! Cropped single-page export
//!
//! The crop is cut from a high-resolution render rather than from the
//! on-screen surface, then embedded as an image on a page exactly the size of
//! the crop area in points.

use crate::annotation::Highlight;
use crate::error::{EditorResult, ExportError, ValidationError};
use crate::export::highlighted::serialize;
use crate::geometry::{bitmap_rect_to_pdf, BitmapSize, Rect};
use image::{imageops, Pixel, Rgba};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use pagemark_engine::{PageSize, RgbaImage};

/// Pixels per point used when rendering the page for a cropped export.
pub const CROP_RENDER_SCALE: f32 = 2.0;

/// Opacity highlights are painted with inside the cropped image.
pub const CROP_HIGHLIGHT_ALPHA: f32 = 0.4;

const IMAGE_NAME: &str = "Im0";

/// Builds a one-page PDF showing `crop` of the page.
///
/// `rendered` is the page rendered at [`CROP_RENDER_SCALE`]; `crop` and the
/// highlights are in the bitmap space of a surface of size `canvas` showing
/// the same page, whose size in points is `page_size`.
pub fn export_cropped<'a>(
    rendered: &RgbaImage,
    crop: Rect,
    highlights: impl IntoIterator<Item = &'a Highlight>,
    canvas: BitmapSize,
    page_size: PageSize,
) -> EditorResult<Vec<u8>> {
    if canvas.is_empty() {
        return Err(ValidationError::InvalidCanvas { width: canvas.width, height: canvas.height }.into());
    }
    if !crop.has_area() {
        return Err(ValidationError::InvalidCrop { width: crop.width, height: crop.height }.into());
    }

    let image = compose_crop(rendered, crop, highlights, canvas);
    let area = bitmap_rect_to_pdf(crop, canvas, page_size);
    Ok(image_pdf(&image, area.width, area.height)?)
}

fn scaled_span(start: f32, end: f32, scale: f32, limit: u32) -> (u32, u32) {
    let first = ((start * scale).round().max(0.0) as u32).min(limit.saturating_sub(1));
    let last = ((end * scale).round().max(0.0) as u32).min(limit);
    (first, last.saturating_sub(first).max(1))
}

/// Cuts `crop` out of `rendered` and paints the overlapping parts of the
/// highlights onto it.
pub fn compose_crop<'a>(
    rendered: &RgbaImage,
    crop: Rect,
    highlights: impl IntoIterator<Item = &'a Highlight>,
    canvas: BitmapSize,
) -> RgbaImage {
    let scale_x = rendered.width() as f32 / canvas.width as f32;
    let scale_y = rendered.height() as f32 / canvas.height as f32;

    let (x, width) = scaled_span(crop.x, crop.right(), scale_x, rendered.width());
    let (y, height) = scaled_span(crop.y, crop.bottom(), scale_y, rendered.height());
    let mut image = imageops::crop_imm(rendered, x, y, width, height).to_image();

    for highlight in highlights {
        let Some(overlap) = highlight.rect.intersection(&crop) else {
            continue;
        };
        let local = overlap.relative_to(crop.origin()).scaled(scale_x, scale_y);
        let [r, g, b] = [highlight.color.r, highlight.color.g, highlight.color.b];
        let tint = Rgba([r, g, b, (CROP_HIGHLIGHT_ALPHA * 255.0).round() as u8]);

        let (left, span_x) = scaled_span(local.x, local.right(), 1.0, image.width());
        let (top, span_y) = scaled_span(local.y, local.bottom(), 1.0, image.height());
        for py in top..(top + span_y).min(image.height()) {
            for px in left..(left + span_x).min(image.width()) {
                image.get_pixel_mut(px, py).blend(&tint);
            }
        }
    }

    image
}

/// Flattens `image` onto white and wraps it in a single-page PDF of
/// `width_pt` by `height_pt` points.
pub fn image_pdf(image: &RgbaImage, width_pt: f32, height_pt: f32) -> Result<Vec<u8>, ExportError> {
    let mut rgb = Vec::with_capacity(image.as_raw().len() / 4 * 3);
    for pixel in image.pixels() {
        let alpha = pixel[3] as u32;
        for channel in &pixel.0[..3] {
            rgb.push(((*channel as u32 * alpha + 255 * (255 - alpha)) / 255) as u8);
        }
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => image.width() as i64,
            "Height" => image.height() as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        rgb,
    ));

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![width_pt.into(), 0.into(), 0.into(), height_pt.into(), 0.into(), 0.into()],
            ),
            Operation::new("Do", vec![Object::Name(IMAGE_NAME.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), width_pt.into(), height_pt.into()],
        "Resources" => dictionary! {
            "XObject" => dictionary! { IMAGE_NAME => image_id },
        },
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    serialize(&mut doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EditorError;
    use crate::geometry::Rect;
    use pagemark_engine::{media_box, MediaBox};

    const NO_HIGHLIGHTS: &[Highlight] = &[];
    const BLUE: crate::annotation::Color = crate::annotation::Color::rgba(0, 0, 255, 0.4);

    fn white(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]))
    }

    fn highlight(rect: Rect) -> Highlight {
        Highlight { id: "1-1".to_owned(), page: 1, rect, color: BLUE }
    }

    fn single_page_box(bytes: &[u8]) -> MediaBox {
        let doc = Document::load_mem(bytes).expect("export should reload");
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        media_box(&doc, pages[&1])
    }

    #[test]
    fn page_matches_crop_size_in_points() {
        // 200x800pt page shown at 400x1200, rendered at scale 2.
        let rendered = white(400, 1600);
        let page = PageSize { width_pt: 200.0, height_pt: 800.0 };
        let bytes = export_cropped(
            &rendered,
            Rect::new(0.0, 0.0, 100.0, 100.0),
            NO_HIGHLIGHTS,
            BitmapSize::new(400, 1200),
            page,
        )
        .expect("export should succeed");

        let size = single_page_box(&bytes).size();
        assert!((size.width_pt - 50.0).abs() < 1e-2);
        assert!((size.height_pt - 66.667).abs() < 1e-2);
    }

    #[test]
    fn crop_is_taken_from_high_resolution_render() {
        let image = compose_crop(
            &white(400, 1600),
            Rect::new(0.0, 0.0, 100.0, 100.0),
            NO_HIGHLIGHTS,
            BitmapSize::new(400, 1200),
        );
        assert_eq!(image.dimensions(), (100, 133));
    }

    #[test]
    fn overlapping_highlight_is_blended_into_crop() {
        let rendered = white(200, 200);
        let crop = Rect::new(50.0, 50.0, 100.0, 100.0);
        let marks = [highlight(Rect::new(0.0, 0.0, 100.0, 100.0))];

        let image = compose_crop(&rendered, crop, &marks, BitmapSize::new(200, 200));

        assert_eq!(image.dimensions(), (100, 100));
        let tinted = image.get_pixel(10, 10);
        assert!(tinted[0] < 200 && tinted[2] > 250, "{tinted:?}");
        assert_eq!(*image.get_pixel(80, 80), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn disjoint_highlight_leaves_crop_clean() {
        let marks = [highlight(Rect::new(0.0, 0.0, 20.0, 20.0))];
        let image = compose_crop(
            &white(200, 200),
            Rect::new(100.0, 100.0, 50.0, 50.0),
            &marks,
            BitmapSize::new(200, 200),
        );
        assert!(image.pixels().all(|pixel| *pixel == Rgba([255, 255, 255, 255])));
    }

    #[test]
    fn tiny_crop_still_produces_a_page() {
        let bytes = export_cropped(
            &white(400, 1600),
            Rect::new(10.0, 10.0, 2.0, 3.0),
            NO_HIGHLIGHTS,
            BitmapSize::new(400, 1200),
            PageSize { width_pt: 200.0, height_pt: 800.0 },
        )
        .expect("export should succeed");

        let size = single_page_box(&bytes).size();
        assert!((size.width_pt - 1.0).abs() < 1e-2);
        assert!((size.height_pt - 2.0).abs() < 1e-2);
    }

    #[test]
    fn empty_crop_is_rejected() {
        let err = export_cropped(
            &white(10, 10),
            Rect::new(5.0, 5.0, 0.0, 4.0),
            NO_HIGHLIGHTS,
            BitmapSize::new(10, 10),
            PageSize { width_pt: 10.0, height_pt: 10.0 },
        )
        .expect_err("export should fail");
        assert!(matches!(err, EditorError::Validation(ValidationError::InvalidCrop { .. })));
    }
}
