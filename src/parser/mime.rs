//! Nested MIME message parsing: header recovery, recursive multipart descent,
//! transfer decoding, and body/attachment classification.

use tracing::{debug, trace};

use crate::error::{DecodeError, DecodeResult};
use crate::model::attachment::{Attachment, DEFAULT_CONTENT_TYPE};
use crate::model::email::ParsedEmail;
use crate::parser::encoding::TransferEncoding;
use crate::parser::header::{
    decode_charset, email_headers, first_non_header_line, get_header, parse_header_block,
    split_header_block, Headers, ParamValue,
};
use crate::parser::multipart::split_segments;

/// Maximum depth for recursive multipart parsing (to prevent stack overflow on adversarial input).
pub const MAX_DEPTH: usize = 10;

/// Parse the raw RFC 822 message carried in the `email` form field.
///
/// Either the whole structure decodes or an error is returned; no partially
/// filled result ever escapes, so the caller can hand the same bytes to the
/// fallback parser.
pub fn parse_email(raw: &[u8]) -> DecodeResult<ParsedEmail> {
    let message = skip_from_line(raw);
    if message.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::EmptyInput);
    }

    if split_header_block(message).is_none() {
        if let Some(offset) = first_non_header_line(message).filter(|o| *o > 0) {
            return Err(DecodeError::MalformedHeaders(offset));
        }
    }

    let (headers, body) = split_entity(message);
    let mut walker = Walker {
        email: ParsedEmail {
            headers: email_headers(&headers),
            ..ParsedEmail::default()
        },
    };
    walker.entity(&headers, body, 0)?;

    let mut email = walker.email;
    if email.text_body.is_none() {
        email.text_body = email.html_body.as_deref().map(html_to_text);
    }

    debug!(
        attachments = email.attachments.len(),
        content_types = ?email.content_types(),
        "Parsed nested message"
    );
    Ok(email)
}

/// Split an entity into its headers and body.
///
/// Without a blank line the leading lines that read as header fields are
/// headers and the body starts at the first line that does not.
fn split_entity(data: &[u8]) -> (Headers, &[u8]) {
    if let Some((header_bytes, body)) = split_header_block(data) {
        return (parse_header_block(header_bytes), body);
    }
    let end = first_non_header_line(data).unwrap_or(data.len());
    (parse_header_block(&data[..end]), &data[end..])
}

struct Walker {
    email: ParsedEmail,
}

impl Walker {
    fn entity(&mut self, headers: &Headers, body: &[u8], depth: usize) -> DecodeResult<()> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::TooDeep(MAX_DEPTH));
        }

        let declared = get_header(headers, "content-type").map(ParamValue::parse);
        let content_type = declared
            .as_ref()
            .map(|ct| ct.value.as_str())
            .filter(|v| !v.is_empty())
            .unwrap_or("text/plain")
            .to_string();

        if content_type.starts_with("multipart/") {
            let boundary = declared
                .as_ref()
                .and_then(|ct| ct.param("boundary"))
                .filter(|b| !b.is_empty())
                .ok_or_else(|| DecodeError::MissingBoundary(content_type.clone()))?;
            return self.multipart(body, &boundary, depth);
        }

        if declared.is_none() {
            if let Some(boundary) = implicit_boundary(body) {
                trace!(%boundary, "Body opens with a delimiter line, splitting as multipart");
                return self.multipart(body, &boundary, depth);
            }
        }

        self.leaf(headers, &content_type, declared.unwrap_or_default(), body)
    }

    fn multipart(&mut self, body: &[u8], boundary: &str, depth: usize) -> DecodeResult<()> {
        let segments = split_segments(body, boundary)
            .ok_or_else(|| DecodeError::BoundaryNotFound(boundary.to_string()))?;
        for segment in segments {
            let (headers, part_body) = split_entity(segment);
            self.entity(&headers, part_body, depth + 1)?;
        }
        Ok(())
    }

    fn leaf(
        &mut self,
        headers: &Headers,
        content_type: &str,
        declared: ParamValue,
        body: &[u8],
    ) -> DecodeResult<()> {
        let encoding = TransferEncoding::from_header(get_header(headers, "content-transfer-encoding"));
        let content = encoding.decode(body)?;

        let disposition = get_header(headers, "content-disposition")
            .map(ParamValue::parse)
            .unwrap_or_default();
        let filename = disposition
            .non_empty_param("filename")
            .or_else(|| declared.non_empty_param("name"));
        let content_id = get_header(headers, "content-id")
            .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>').to_string())
            .filter(|id| !id.is_empty());
        let is_text_body = content_type == "text/plain" || content_type == "text/html";

        if disposition.value == "attachment" || filename.is_some() {
            let filename = filename.unwrap_or_else(|| self.generated_name());
            self.push_external(filename, content_type, content, content_id);
            return Ok(());
        }

        if let Some(content_id) = content_id.filter(|_| !is_text_body) {
            trace!(%content_id, "Inline part");
            self.email.attachments.push(Attachment::Inline {
                content_id,
                content_type: content_type.to_string(),
                size: content.len() as u64,
            });
            return Ok(());
        }

        if content_type.starts_with("text/") {
            let charset = declared.param("charset").unwrap_or_default();
            let text = decode_charset(&charset, &content);
            if !text.trim().is_empty() {
                self.email.push_body(content_type, text);
            }
        } else {
            let filename = self.generated_name();
            self.push_external(filename, content_type, content, None);
        }
        Ok(())
    }

    fn push_external(
        &mut self,
        filename: String,
        content_type: &str,
        content: Vec<u8>,
        content_id: Option<String>,
    ) {
        trace!(%filename, size = content.len(), "External attachment");
        let content_type = if content_type.is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            content_type
        };
        self.email.attachments.push(Attachment::External {
            filename,
            content_type: content_type.to_string(),
            content,
            content_id,
        });
    }

    fn generated_name(&self) -> String {
        format!("attachment_{}", self.email.attachments.len())
    }
}

/// Boundary token of a body whose first non-blank line is `--token` and
/// which repeats that delimiter later on.
fn implicit_boundary(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    let first = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let token = first.strip_prefix("--")?;
    if token.is_empty() || token.ends_with("--") || token.contains(char::is_whitespace) {
        return None;
    }
    let delimiter = format!("\n--{token}");
    text.contains(&delimiter).then(|| token.to_string())
}

/// Skip an mbox `From ` separator line (and a UTF-8 BOM) at the start.
fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);

    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}

/// Convert HTML to plain text.
///
/// - Preserves line breaks from `<br>`, `<p>`, `<div>`
/// - Removes scripts and styles
/// - Decodes common HTML entities
pub fn html_to_text(html: &str) -> String {
    let mut text = remove_tag_block(html, "script");
    text = remove_tag_block(&text, "style");

    for tag in &["br", "BR", "br/", "br /"] {
        text = text.replace(&format!("<{tag}>"), "\n");
    }
    for tag in &["p", "div", "tr", "li", "h1", "h2", "h3", "h4", "h5", "h6"] {
        text = text.replace(&format!("<{tag}>"), "\n");
        text = text.replace(&format!("<{tag} "), "\n<");
        let upper = tag.to_uppercase();
        text = text.replace(&format!("<{upper}>"), "\n");
        text = text.replace(&format!("</{tag}>"), "\n");
        text = text.replace(&format!("</{upper}>"), "\n");
    }

    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    for (entity, replacement) in [
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&#39;", "'"),
        ("&apos;", "'"),
        ("&nbsp;", " "),
        ("&#160;", " "),
        ("&amp;", "&"),
    ] {
        result = result.replace(entity, replacement);
    }

    // Collapse runs of blank lines into one
    let mut prev_was_blank = false;
    let mut cleaned = String::with_capacity(result.len());
    for line in result.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !prev_was_blank {
                cleaned.push('\n');
                prev_was_blank = true;
            }
        } else {
            cleaned.push_str(trimmed);
            cleaned.push('\n');
            prev_was_blank = false;
        }
    }

    cleaned.trim().to_string()
}

/// Remove an entire tag block (e.g. `<script>…</script>`), case-insensitively.
fn remove_tag_block(html: &str, tag: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    // ASCII lowercasing keeps byte offsets, so positions found in `lower`
    // index `html` directly.
    let lower = html.to_ascii_lowercase();
    let mut pos = 0;
    while let Some(start) = lower[pos..].find(&open).map(|i| pos + i) {
        result.push_str(&html[pos..start]);
        match lower[start..].find(&close) {
            Some(end) => pos = start + end + close.len(),
            None => return result,
        }
    }
    result.push_str(&html[pos..]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_part_quoted_printable() {
        let raw = b"Subject: Hi\r\nContent-Type: text/plain; charset=utf-8\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\r\ncaf=C3=A9=\r\n!";
        let email = parse_email(raw).unwrap();
        assert_eq!(email.headers.subject.as_deref(), Some("Hi"));
        assert_eq!(email.text_body.as_deref(), Some("café!"));
        assert!(email.attachments.is_empty());
    }

    #[test]
    fn test_latin1_charset() {
        let raw = b"Content-Type: text/plain; charset=iso-8859-1\r\n\r\ncaf\xE9";
        assert_eq!(parse_email(raw).unwrap().text_body.as_deref(), Some("café"));
    }

    #[test]
    fn test_html_only_derives_text() {
        let raw = b"Content-Type: text/html\r\n\r\n<p>Hello &amp; bye</p>";
        let email = parse_email(raw).unwrap();
        assert_eq!(email.html_body.as_deref(), Some("<p>Hello &amp; bye</p>"));
        assert_eq!(email.text_body.as_deref(), Some("Hello & bye"));
    }

    #[test]
    fn test_body_without_headers() {
        let email = parse_email(b"just some words").unwrap();
        assert_eq!(email.text_body.as_deref(), Some("just some words"));
    }

    #[test]
    fn test_headers_only_message() {
        let email = parse_email(b"Subject: nothing else").unwrap();
        assert_eq!(email.headers.subject.as_deref(), Some("nothing else"));
        assert!(email.has_no_body());
    }

    #[test]
    fn test_header_line_followed_by_text_fails() {
        let raw = b"Note: call me back\nThe meeting moved to 3pm, bring the report";
        assert_eq!(
            parse_email(raw).unwrap_err(),
            DecodeError::MalformedHeaders(19)
        );
    }

    #[test]
    fn test_part_without_blank_line_keeps_its_text() {
        let raw = b"Content-Type: multipart/mixed; boundary=\"B\"\r\n\r\n\
--B\r\nContent-Type: text/plain\r\nHello there\r\n--B--\r\n";
        let email = parse_email(raw).unwrap();
        assert_eq!(email.text_body.as_deref(), Some("Hello there"));
        assert!(email.attachments.is_empty());
    }

    #[test]
    fn test_empty_input_fails() {
        assert_eq!(parse_email(b" \r\n ").unwrap_err(), DecodeError::EmptyInput);
    }

    #[test]
    fn test_multipart_without_boundary_fails() {
        let raw = b"Content-Type: multipart/mixed\r\n\r\n--x\r\n\r\nbody\r\n--x--";
        assert!(matches!(
            parse_email(raw),
            Err(DecodeError::MissingBoundary(_))
        ));
    }

    #[test]
    fn test_declared_boundary_missing_fails() {
        let raw = b"Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\r\n\
--ABC\r\nContent-Type: text/plain\r\n\r\nbody\r\n--ABC--";
        assert_eq!(
            parse_email(raw).unwrap_err(),
            DecodeError::BoundaryNotFound("XYZ".into())
        );
    }

    #[test]
    fn test_nesting_limit() {
        let mut raw = String::new();
        for depth in 0..=MAX_DEPTH + 1 {
            raw.push_str(&format!(
                "Content-Type: multipart/mixed; boundary=\"b{depth}\"\r\n\r\n--b{depth}\r\n"
            ));
        }
        raw.push_str("Content-Type: text/plain\r\n\r\ndeep\r\n");
        assert_eq!(
            parse_email(raw.as_bytes()).unwrap_err(),
            DecodeError::TooDeep(MAX_DEPTH)
        );
    }

    #[test]
    fn test_inline_part_with_content_id() {
        let raw = b"Content-Type: multipart/related; boundary=r\r\n\r\n\
--r\r\nContent-Type: text/html\r\nContent-ID: <root>\r\n\r\n<img src=\"cid:img1\">\r\n\
--r\r\nContent-Type: image/png\r\nContent-Transfer-Encoding: base64\r\nContent-Id: <img1>\r\n\r\niVBORw==\r\n\
--r--\r\n";
        let email = parse_email(raw).unwrap();
        assert!(email.html_body.is_some());
        assert_eq!(
            email.attachments,
            vec![Attachment::Inline {
                content_id: "img1".into(),
                content_type: "image/png".into(),
                size: 4,
            }]
        );
    }

    #[test]
    fn test_unnamed_binary_part_gets_generated_name() {
        let raw = b"Content-Type: multipart/mixed; boundary=m\r\n\r\n\
--m\r\nContent-Type: application/octet-stream\r\n\r\nraw\r\n--m--";
        let email = parse_email(raw).unwrap();
        assert_eq!(email.attachments[0].filename(), Some("attachment_0"));
    }

    #[test]
    fn test_skip_from_line() {
        let data = b"From user@example.com Thu Jan 01 00:00:00 2024\nSubject: Test\n\nBody\n";
        assert!(skip_from_line(data).starts_with(b"Subject:"));
    }

    #[test]
    fn test_html_to_text_removes_scripts() {
        let html = "Before<script>alert('xss')</script>After";
        assert_eq!(html_to_text(html), "BeforeAfter");
    }

    #[test]
    fn test_text_body_with_content_id_stays_a_body() {
        let raw = b"Content-Type: multipart/related; boundary=R\r\n\r\n\
--R\r\nContent-Type: text/html\r\nContent-ID: <body@x>\r\n\r\n<p>Hi</p>\r\n--R--";
        let email = parse_email(raw).unwrap();
        assert_eq!(email.html_body.as_deref(), Some("<p>Hi</p>"));
        assert!(email.attachments.is_empty());
    }

    #[test]
    fn test_remove_tag_block_mixed_case_and_unclosed() {
        let html = "a<STYLE>x</Style>b<style>y</style>c<script>never closed";
        let without_style = remove_tag_block(html, "style");
        assert_eq!(without_style, "abc<script>never closed");
        assert_eq!(remove_tag_block(&without_style, "script"), "abc");
    }

    #[test]
    fn test_html_to_text_entities() {
        assert_eq!(html_to_text("Tom &amp; Jerry &lt;3&gt;"), "Tom & Jerry <3>");
    }
}
