//! Shrink a stored transcription before it goes to the classifier.
//!
//! Only the classification input is cut; the stored content is never
//! touched. The trailing model footer survives every cut.

use std::sync::LazyLock;

use regex::Regex;

/// Page header written by the OCR assembler, with or without the model name.
static PAGE_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^--- Page (\d+)(?: \([^)\n]*\))? ---$").expect("valid regex")
});

const FOOTER_MARKER: &str = "\n\nTranscribed by model:";

/// Result of page-based truncation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncationWindow {
    pub text: String,
    /// Page numbers (from the headers) that were kept, ascending.
    pub included_pages: Vec<u32>,
    pub note: Option<String>,
}

impl TruncationWindow {
    fn unchanged(content: &str) -> Self {
        Self {
            text: content.to_string(),
            included_pages: Vec::new(),
            note: None,
        }
    }
}

/// Split at the last model footer. The footer keeps its leading blank line.
pub fn split_footer(content: &str) -> (&str, &str) {
    match content.rfind(FOOTER_MARKER) {
        Some(index) => content.split_at(index),
        None => (content, ""),
    }
}

fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Keep the first `max_chars` characters of the body, plus the footer.
/// `0` disables the limit.
pub fn truncate_by_chars(content: &str, max_chars: usize) -> String {
    if max_chars == 0 || content.chars().count() <= max_chars {
        return content.to_string();
    }
    let (body, footer) = split_footer(content);
    format!("{}{footer}", char_prefix(body, max_chars))
}

/// Compact ascending ranges: `[1, 2, 3, 5, 6, 9]` -> `"1-3, 5-6, 9"`.
pub fn format_page_ranges(pages: &[u32]) -> String {
    let mut ordered = pages.to_vec();
    ordered.sort_unstable();
    ordered.dedup();

    let mut parts = Vec::new();
    let mut iter = ordered.into_iter();
    let Some(first) = iter.next() else {
        return String::new();
    };
    let (mut start, mut prev) = (first, first);
    for n in iter {
        if n == prev + 1 {
            prev = n;
            continue;
        }
        parts.push(range_label(start, prev));
        start = n;
        prev = n;
    }
    parts.push(range_label(start, prev));
    parts.join(", ")
}

fn range_label(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}

pub fn page_truncation_note(included_pages: &[u32], total_pages: usize) -> String {
    format!(
        "NOTE: The document transcription below was truncated to reduce cost. \
         Included pages (from OCR headers): {}. Total pages with OCR headers: {total_pages}.",
        format_page_ranges(included_pages)
    )
}

pub fn headerless_truncation_note(limit: usize) -> String {
    format!(
        "NOTE: The document transcription below was truncated because page headers \
         were not found. Included the first {limit} characters."
    )
}

pub fn max_char_truncation_note(limit: usize) -> String {
    format!(
        "NOTE: The document transcription below was further truncated to the first \
         {limit} characters due to the max character limit."
    )
}

/// Keep the first `max_pages` and the last `tail_pages` page segments.
///
/// Segments are delimited by page headers; the first segment also carries
/// anything before the first header. Without headers the body is cut to
/// `headerless_char_limit` characters instead. `max_pages == 0` disables
/// truncation.
pub fn truncate_by_pages(
    content: &str,
    max_pages: usize,
    tail_pages: usize,
    headerless_char_limit: usize,
) -> TruncationWindow {
    if max_pages == 0 {
        return TruncationWindow::unchanged(content);
    }

    let (body, footer) = split_footer(content);
    let headers: Vec<(usize, u32)> = PAGE_HEADER_RE
        .captures_iter(body)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let number = caps.get(1)?.as_str().parse::<u32>().ok()?;
            Some((whole.start(), number))
        })
        .collect();

    if headers.is_empty() {
        let truncated = truncate_by_chars(content, headerless_char_limit);
        if truncated == content {
            return TruncationWindow::unchanged(content);
        }
        return TruncationWindow {
            text: truncated,
            included_pages: Vec::new(),
            note: Some(headerless_truncation_note(headerless_char_limit)),
        };
    }

    let total = headers.len();
    if total <= max_pages {
        return TruncationWindow::unchanged(content);
    }

    let mut include: Vec<usize> = (0..max_pages.min(total)).collect();
    if tail_pages > 0 {
        include.extend(total.saturating_sub(tail_pages)..total);
    }
    include.sort_unstable();
    include.dedup();
    if include.len() >= total {
        return TruncationWindow::unchanged(content);
    }

    let segment = |idx: usize| -> &str {
        let start = if idx == 0 { 0 } else { headers[idx].0 };
        let end = headers.get(idx + 1).map_or(body.len(), |h| h.0);
        &body[start..end]
    };

    let mut text: String = include.iter().map(|&idx| segment(idx)).collect();
    text.push_str(footer);
    let included_pages: Vec<u32> = include.iter().map(|&idx| headers[idx].1).collect();
    let note = page_truncation_note(&included_pages, total);

    TruncationWindow {
        text,
        included_pages,
        note: Some(note),
    }
}
