//! Boundary splitting shared by the outer `multipart/form-data` body and the
//! nested MIME message, plus form-field extraction.

use tracing::debug;

use crate::model::part::RawPart;
use crate::parser::header::{get_header, parse_header_block, split_header_block, ParamValue};

/// Kind of delimiter line found while scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Open,
    Close,
}

/// Classify a line as `--boundary`, `--boundary--`, or neither.
///
/// Leading spaces/tabs and trailing whitespace are tolerated.
fn delimiter_kind(line: &[u8], delimiter: &[u8]) -> Option<Delimiter> {
    let start = line.iter().position(|b| *b != b' ' && *b != b'\t')?;
    let rest = line[start..].strip_prefix(delimiter)?;
    let (kind, rest) = match rest.strip_prefix(b"--") {
        Some(after) => (Delimiter::Close, after),
        None => (Delimiter::Open, rest),
    };
    rest.iter()
        .all(|b| b.is_ascii_whitespace())
        .then_some(kind)
}

/// Drop one trailing CRLF or LF.
fn trim_line_ending(data: &[u8]) -> &[u8] {
    data.strip_suffix(b"\r\n")
        .or_else(|| data.strip_suffix(b"\n"))
        .unwrap_or(data)
}

/// Split `body` into the segments between `--boundary` delimiter lines.
///
/// The line ending that precedes a delimiter belongs to the delimiter, so the
/// returned segments hold the exact part bytes. Preamble and epilogue are not
/// returned. A body that never closes keeps its last segment up to the end.
///
/// Returns `None` when no delimiter line is present at all.
pub fn split_segments<'a>(body: &'a [u8], boundary: &str) -> Option<Vec<&'a [u8]>> {
    if boundary.is_empty() {
        return None;
    }
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut segments = Vec::new();
    let mut current: Option<usize> = None;
    let mut found = false;
    let mut line_start = 0;

    while line_start < body.len() {
        let line_end = body[line_start..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(body.len(), |p| line_start + p);
        let next_line = (line_end + 1).min(body.len());

        if let Some(kind) = delimiter_kind(&body[line_start..line_end], delimiter) {
            found = true;
            if let Some(start) = current.take() {
                segments.push(trim_line_ending(&body[start..line_start]));
            }
            if kind == Delimiter::Close {
                return Some(segments);
            }
            current = Some(next_line);
        }
        line_start = next_line;
    }

    if let Some(start) = current {
        segments.push(trim_line_ending(&body[start..]));
    }
    found.then_some(segments)
}

/// Split a `multipart/form-data` body into its named fields, in order.
///
/// Never fails: an empty body or boundary, or a body without delimiters,
/// yields no parts. Segments without a header block or without a `name`
/// parameter are skipped.
pub fn split_form_data(body: &[u8], boundary: &str) -> Vec<RawPart> {
    let boundary = boundary.trim().trim_matches('"');
    if body.is_empty() || boundary.is_empty() {
        return Vec::new();
    }

    let Some(segments) = split_segments(body, boundary) else {
        debug!(boundary, "No form-data delimiter found in body");
        return Vec::new();
    };

    let mut parts = Vec::with_capacity(segments.len());
    for (idx, segment) in segments.into_iter().enumerate() {
        match form_field(segment) {
            Some(part) => parts.push(part),
            None => debug!(segment = idx, "Skipping form-data segment without a named disposition"),
        }
    }
    parts
}

fn form_field(segment: &[u8]) -> Option<RawPart> {
    let (header_bytes, content) = split_header_block(segment)?;
    let headers = parse_header_block(header_bytes);
    let disposition = ParamValue::parse(get_header(&headers, "content-disposition")?);
    let name = disposition.param("name").filter(|n| !n.is_empty())?;

    Some(RawPart {
        name,
        filename: disposition.param("filename"),
        declared_type: get_header(&headers, "content-type")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from),
        bytes: content.to_vec(),
    })
}

/// Extract the boundary parameter from a `Content-Type` header value.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    ParamValue::parse(content_type)
        .param("boundary")
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
}
