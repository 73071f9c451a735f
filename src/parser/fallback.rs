//! Best-effort regex parser for messages the MIME parser rejects.
//!
//! It never fails: whatever cannot be structured ends up as `text/plain`.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::model::attachment::Attachment;
use crate::model::email::ParsedEmail;
use crate::parser::encoding::{decode_base64, decode_quoted_printable};
use crate::parser::header::{decode_charset, email_headers, parse_header_block};

static RE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"boundary=["']([^"']+)["']"#).expect("valid regex"));

static RE_CONTENT_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Content-Type:\s*([^;\r\n]+)").expect("valid regex"));

static RE_FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)filename=["']([^"']+)["']"#).expect("valid regex"));

static RE_DISPOSITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Content-Disposition:\s*([^\r\n]+)").expect("valid regex"));

static RE_TRANSFER_ENCODING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Content-Transfer-Encoding:\s*(base64|quoted-printable)").expect("valid regex")
});

static RE_CHARSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)charset=["']?([^"';\s]+)"#).expect("valid regex"));

/// Parse `raw` without structural validation.
pub fn parse_fallback(raw: &[u8]) -> ParsedEmail {
    info!(size = raw.len(), "Using fallback email parser");
    let text = String::from_utf8_lossy(raw);
    let mut email = ParsedEmail::default();

    let Some(boundary) = RE_BOUNDARY.captures(&text).map(|c| c[1].to_string()) else {
        debug!("No boundary found, keeping the whole message as text/plain");
        email.text_body = Some(text.into_owned());
        return email;
    };

    let delimiter = format!("--{boundary}");
    for (idx, segment) in text.split(delimiter.as_str()).enumerate() {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let Some((headers, content)) = split_at_blank_line(segment) else {
            debug!(segment = idx, "No header separator in segment, skipping");
            continue;
        };

        if idx == 0 {
            email.headers = email_headers(&parse_header_block(headers.as_bytes()));
            let preamble = content.trim();
            if !preamble.is_empty() {
                email.preamble = Some(preamble.to_string());
            }
            continue;
        }

        let content_type = RE_CONTENT_TYPE
            .captures(headers)
            .map(|c| c[1].trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "text/plain".to_string());
        let filename = RE_FILENAME.captures(headers).map(|c| c[1].to_string());
        let is_attachment = RE_DISPOSITION
            .captures(headers)
            .is_some_and(|c| c[1].to_ascii_lowercase().contains("attachment"));
        let encoding = RE_TRANSFER_ENCODING
            .captures(headers)
            .map(|c| c[1].to_ascii_lowercase());

        match filename {
            Some(filename) if is_attachment => {
                debug!(%filename, "Attachment found by fallback parser");
                email.attachments.push(Attachment::External {
                    filename,
                    content_type,
                    content: decode_content(content.trim(), encoding.as_deref()),
                    content_id: None,
                });
            }
            _ => {
                let charset = RE_CHARSET
                    .captures(headers)
                    .map(|c| c[1].to_string())
                    .unwrap_or_default();
                let bytes = decode_content(content.trim(), encoding.as_deref());
                email.push_body(&content_type, decode_charset(&charset, &bytes));
            }
        }
    }

    if email.has_no_body() && email.attachments.is_empty() {
        email.text_body = Some(text.into_owned());
    }
    email
}

/// Split at the first CRLF or LF blank line.
fn split_at_blank_line(segment: &str) -> Option<(&str, &str)> {
    let crlf = segment.find("\r\n\r\n").map(|pos| (pos, 4));
    let lf = segment.find("\n\n").map(|pos| (pos, 2));
    let (pos, len) = match (crlf, lf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (a, b) => a.or(b)?,
    };
    Some((&segment[..pos], &segment[pos + len..]))
}

/// Apply the detected transfer encoding; a failed base64 decode keeps the raw text.
fn decode_content(content: &str, encoding: Option<&str>) -> Vec<u8> {
    match encoding {
        Some("base64") => decode_base64(content.as_bytes()).unwrap_or_else(|e| {
            debug!(error = %e, "Base64 decoding failed in fallback, keeping raw text");
            content.as_bytes().to_vec()
        }),
        Some("quoted-printable") => decode_quoted_printable(content.as_bytes()),
        _ => content.as_bytes().to_vec(),
    }
}
