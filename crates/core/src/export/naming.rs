//! Output file names for exported documents

use chrono::NaiveDate;

fn stem(original: &str) -> &str {
    let len = original.len();
    if len >= 4 && original.is_char_boundary(len - 4) && original[len - 4..].eq_ignore_ascii_case(".pdf") {
        &original[..len - 4]
    } else {
        original
    }
}

/// `highlighted-<stem>-<YYYY-MM-DD>.pdf`
pub fn highlighted_file_name(original: &str, date: NaiveDate) -> String {
    format!("highlighted-{}-{}.pdf", stem(original), date.format("%Y-%m-%d"))
}

/// `cropped-page<N>-<stem>-<YYYY-MM-DD>.pdf`
pub fn cropped_file_name(original: &str, page: u32, date: NaiveDate) -> String {
    format!("cropped-page{page}-{}-{}.pdf", stem(original), date.format("%Y-%m-%d"))
}
