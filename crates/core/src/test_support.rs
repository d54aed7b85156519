//! Generated PDF fixtures shared by unit tests

use lopdf::{dictionary, Document, Object, Stream};

/// Two pages: the first inherits a 200x800 media box and resources from
/// the page tree and carries a small content stream; the second is 300x400
/// with its origin at (10, 20).
pub(crate) fn two_page_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        b"1 0 0 1 0 0 cm\n0 0 m\n10 10 l\nS\n".to_vec(),
    ));
    let first = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let second = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![10.into(), 20.into(), 310.into(), 420.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![first.into(), second.into()],
            "Count" => 2,
            "MediaBox" => vec![0.into(), 0.into(), 200.into(), 800.into()],
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture should serialize");
    bytes
}
