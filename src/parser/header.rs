//! RFC 5322 header parsing: header blocks, folding, parameters, encoded-words
//! (RFC 2047) and date normalization.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

use crate::model::address::normalize_address_list;
use crate::model::email::EmailHeaders;
use crate::parser::encoding::decode_base64;

/// Unfolded header fields as `(lowercase_name, raw_value)` pairs, in order.
pub type Headers = Vec<(String, String)>;

/// Split raw bytes into `(header_block, body)` at the first blank line.
///
/// Returns `None` if there is no blank line. A block that starts with a blank
/// line yields empty headers.
pub fn split_header_block(data: &[u8]) -> Option<(&[u8], &[u8])> {
    if let Some(rest) = data.strip_prefix(b"\r\n") {
        return Some((&data[..0], rest));
    }
    if let Some(rest) = data.strip_prefix(b"\n") {
        return Some((&data[..0], rest));
    }
    for i in 0..data.len() {
        if data[i..].starts_with(b"\r\n\r\n") {
            return Some((&data[..i], &data[i + 4..]));
        }
        if data[i..].starts_with(b"\n\n") {
            return Some((&data[..i], &data[i + 2..]));
        }
        if data[i..].starts_with(b"\n\r\n") {
            return Some((&data[..i], &data[i + 3..]));
        }
    }
    None
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Unfold headers: join continuation lines (starting with space or tab) with the previous header.
pub fn unfold_headers(text: &str) -> Headers {
    let mut result: Headers = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = result.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
        } else if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim().to_lowercase();
            let value = line[colon_pos + 1..].trim().to_string();
            result.push((name, value));
        }
        // Lines without a colon and not a continuation are silently skipped
    }

    result
}

/// `true` if `line` reads as `Name: value` with a printable field name.
pub fn is_header_field(line: &str) -> bool {
    line.split_once(':').is_some_and(|(name, _)| {
        let name = name.trim_end();
        !name.is_empty() && name.bytes().all(|b| b.is_ascii_graphic())
    })
}

/// Byte offset of the first line that is neither a header field nor a
/// continuation of one. `None` when every line belongs to the header block.
pub fn first_non_header_line(data: &[u8]) -> Option<usize> {
    let mut offset = 0;
    let mut in_field = false;
    for line in data.split_inclusive(|b| *b == b'\n') {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches(['\r', '\n']);
        let continuation = in_field && (text.starts_with(' ') || text.starts_with('\t'));
        if !continuation && !is_header_field(text) {
            return Some(offset);
        }
        in_field = true;
        offset += line.len();
    }
    None
}

/// Parse a raw header block into unfolded fields.
pub fn parse_header_block(raw: &[u8]) -> Headers {
    unfold_headers(&decode_header_bytes(raw))
}

/// Get the first value for a header name (name must be lowercase).
pub fn get_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// A structured header value such as `Content-Type` or `Content-Disposition`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamValue {
    /// The value before the first `;`, lowercased and trimmed.
    pub value: String,
    /// Parameters with lowercased names, unquoted values.
    pub params: Vec<(String, String)>,
}

impl ParamValue {
    /// Parse `value; key=val; key="quoted; val"`.
    pub fn parse(raw: &str) -> Self {
        let mut segments = split_unquoted(raw, ';').into_iter();
        let value = segments
            .next()
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_default();

        let mut params = Vec::new();
        for segment in segments {
            let Some((key, val)) = segment.split_once('=') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                continue;
            }
            params.push((key, unquote_param(val)));
        }
        Self { value, params }
    }

    /// Look up a parameter by (case-insensitive) name.
    ///
    /// An RFC 2231 extended form (`name*=charset''value`) is used when the
    /// plain form is absent.
    pub fn param(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        if let Some((_, v)) = self.params.iter().find(|(k, _)| *k == name) {
            return Some(v.clone());
        }
        let extended = format!("{name}*");
        self.params
            .iter()
            .find(|(k, _)| *k == extended)
            .map(|(_, v)| decode_rfc2231(v))
    }

    /// Non-empty parameter value, with RFC 2047 words decoded.
    pub fn non_empty_param(&self, name: &str) -> Option<String> {
        self.param(name)
            .map(|v| decode_encoded_words(&v))
            .filter(|v| !v.trim().is_empty())
    }
}

/// Split on `sep` outside of double quotes.
fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, ch) in s.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            c if c == sep && !quoted => {
                out.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

fn unquote_param(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
    match inner {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => trimmed.to_string(),
    }
}

/// Decode an RFC 2231 value: `charset'language'percent-encoded`.
fn decode_rfc2231(raw: &str) -> String {
    let mut pieces = raw.splitn(3, '\'');
    let (charset, encoded) = match (pieces.next(), pieces.next(), pieces.next()) {
        (Some(charset), Some(_lang), Some(rest)) => (charset, rest),
        _ => ("utf-8", raw),
    };
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(b) = hex_pair(&bytes[i + 1..]) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    decode_charset(charset, &out)
}

/// Recover the header fields kept on the record.
pub fn email_headers(headers: &[(String, String)]) -> EmailHeaders {
    let decoded = |name: &str| {
        get_header(headers, name)
            .map(decode_encoded_words)
            .filter(|v| !v.trim().is_empty())
    };

    let references = get_header(headers, "references")
        .map(extract_all_angle_brackets)
        .filter(|refs| !refs.is_empty())
        .map(|refs| refs.join(" "));

    EmailHeaders {
        subject: decoded("subject"),
        from: decoded("from").map(|v| normalize_address_list(&v)),
        to: decoded("to").map(|v| normalize_address_list(&v)),
        date: get_header(headers, "date").map(normalize_date),
        message_id: get_header(headers, "message-id").map(extract_angle_bracket),
        in_reply_to: get_header(headers, "in-reply-to").map(extract_angle_bracket),
        references,
    }
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// If decoding fails for any token, the original text is preserved.
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // Whitespace between two encoded words is dropped (RFC 2047 §6.2)
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];

        if let Some((text, consumed)) = try_decode_one_word(after_start) {
            result.push_str(&text);
            remaining = &after_start[consumed..];
            last_was_encoded = true;
        } else {
            result.push_str("=?");
            remaining = after_start;
            last_was_encoded = false;
        }
    }

    result.push_str(remaining);
    result
}

/// Decode `charset?encoding?text?=`, returning the text and bytes consumed.
fn try_decode_one_word(s: &str) -> Option<(String, usize)> {
    let (charset, rest) = s.split_once('?')?;
    let (encoding, rest2) = rest.split_once('?')?;
    let end = rest2.find("?=")?;
    let encoded_text = &rest2[..end];

    let consumed = charset.len() + 1 + encoding.len() + 1 + end + 2;

    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => decode_base64(encoded_text.as_bytes()).ok()?,
        "Q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    // RFC 2231 language suffix: "utf-8*en"
    let charset = charset.split('*').next().unwrap_or(charset);
    Some((decode_charset(charset, &bytes), consumed))
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' => match hex_pair(&bytes[i + 1..]) {
                Some(byte) => {
                    result.push(byte);
                    i += 3;
                }
                None => {
                    result.push(b'=');
                    i += 1;
                }
            },
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

/// Parse two leading hex digits into a byte.
fn hex_pair(bytes: &[u8]) -> Option<u8> {
    match bytes {
        [hi, lo, ..] if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
            let pair = [*hi, *lo];
            u8::from_str_radix(std::str::from_utf8(&pair).ok()?, 16).ok()
        }
        _ => None,
    }
}

/// Decode bytes using a named charset.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    match charset.trim().to_ascii_lowercase().as_str() {
        "" | "utf-8" | "utf8" | "us-ascii" | "ascii" => String::from_utf8_lossy(bytes).into_owned(),
        _ => {
            if let Some(encoding) = encoding_rs::Encoding::for_label(charset.trim().as_bytes()) {
                let (decoded, _, _) = encoding.decode(bytes);
                decoded.into_owned()
            } else {
                warn!(charset, "Unknown charset, falling back to UTF-8 lossy");
                String::from_utf8_lossy(bytes).into_owned()
            }
        }
    }
}

/// Extract content between `<` and `>` (for Message-ID, In-Reply-To).
fn extract_angle_bracket(s: &str) -> String {
    let trimmed = s.trim();
    if let Some(start) = trimmed.find('<') {
        if let Some(end) = trimmed[start..].find('>') {
            return trimmed[start..start + end + 1].to_string();
        }
    }
    trimmed.to_string()
}

/// Extract all `<…>` tokens from a string (for References header).
fn extract_all_angle_brackets(s: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut remaining = s;
    while let Some(start) = remaining.find('<') {
        if let Some(end) = remaining[start..].find('>') {
            result.push(remaining[start..start + end + 1].to_string());
            remaining = &remaining[start + end + 1..];
        } else {
            break;
        }
    }
    result
}

/// Normalize a `Date` header to RFC 3339, keeping the raw text when unparseable.
pub fn normalize_date(raw: &str) -> String {
    parse_date(raw)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| raw.trim().to_string())
}

/// Parse an email date string in various common formats.
///
/// Supports RFC 2822, ISO 8601, and many broken real-world variants.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    // Comments such as "(UTC)" after the offset
    let no_comment = match trimmed.find('(') {
        Some(pos) => trimmed[..pos].trim(),
        None => trimmed,
    };
    let no_dow = strip_day_of_week(no_comment);

    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%d %b %Y %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%z",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
    ];

    for candidate in [no_dow.clone(), replace_named_tz(&no_dow)] {
        for fmt in &formats {
            if let Ok(dt) = DateTime::parse_from_str(&candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(&candidate, fmt) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
    }

    if let Some(dt) = mail_parser_date(trimmed) {
        return Some(dt);
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Attempt to parse a date using `mail-parser`'s built-in parser.
fn mail_parser_date(input: &str) -> Option<DateTime<Utc>> {
    use mail_parser::MessageParser;

    let fake_msg = format!("Date: {input}\n\n");
    let parser = MessageParser::default();
    let parsed = parser.parse(fake_msg.as_bytes())?;
    let dt = parsed.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&dt)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Strip leading day-of-week prefix (e.g. "Thu, " or "Thu ").
fn strip_day_of_week(s: &str) -> String {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        if let Some(rest) = s.strip_prefix(day) {
            return rest.trim_start_matches(',').trim().to_string();
        }
    }
    s.to_string()
}

/// Replace well-known timezone abbreviations with numeric offsets.
fn replace_named_tz(s: &str) -> String {
    let tzs = [
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("UT", "+0000"),
        ("CEST", "+0200"),
        ("CET", "+0100"),
    ];
    for (name, offset) in &tzs {
        if let Some(prefix) = s.strip_suffix(name) {
            if prefix.ends_with(' ') {
                return format!("{prefix}{offset}");
            }
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_header_block_crlf() {
        let (headers, body) = split_header_block(b"A: 1\r\nB: 2\r\n\r\nBody").unwrap();
        assert_eq!(headers, b"A: 1\r\nB: 2");
        assert_eq!(body, b"Body");
    }

    #[test]
    fn test_split_header_block_lf_and_leading_blank() {
        let (headers, body) = split_header_block(b"A: 1\n\nBody\n").unwrap();
        assert_eq!(headers, b"A: 1");
        assert_eq!(body, b"Body\n");

        let (headers, body) = split_header_block(b"\r\nonly body").unwrap();
        assert!(headers.is_empty());
        assert_eq!(body, b"only body");
    }

    #[test]
    fn test_split_header_block_none() {
        assert!(split_header_block(b"A: 1\r\nB: 2").is_none());
    }

    #[test]
    fn test_unfold_headers() {
        let text = "Subject: This is a long\n\tsubject line\nFrom: user@example.com\n";
        let headers = unfold_headers(text);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].0, "subject");
        assert_eq!(headers[0].1, "This is a long subject line");
    }

    #[test]
    fn test_first_non_header_line() {
        assert_eq!(first_non_header_line(b"A: 1\r\n  folded\r\nB: 2"), None);
        assert_eq!(
            first_non_header_line(b"Note: call me\nThe meeting moved"),
            Some(14)
        );
        assert_eq!(first_non_header_line(b"plain text"), Some(0));
        assert!(!is_header_field("two words: value"));
        assert!(is_header_field("X-Custom : value"));
    }

    #[test]
    fn test_param_value_quoted_and_unquoted() {
        let cd = ParamValue::parse("Form-Data; NAME=\"email\"; filename=a;b.txt");
        assert_eq!(cd.value, "form-data");
        assert_eq!(cd.param("name").as_deref(), Some("email"));
        assert_eq!(cd.param("filename").as_deref(), Some("a"));

        let cd = ParamValue::parse("attachment; filename=\"report; final.pdf\"");
        assert_eq!(cd.param("FILENAME").as_deref(), Some("report; final.pdf"));
    }

    #[test]
    fn test_param_value_single_quotes() {
        let ct = ParamValue::parse("multipart/mixed; boundary='abc'");
        assert_eq!(ct.param("boundary").as_deref(), Some("abc"));
    }

    #[test]
    fn test_param_value_rfc2231() {
        let cd = ParamValue::parse("attachment; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf");
        assert_eq!(cd.param("filename").as_deref(), Some("résumé.pdf"));
    }

    #[test]
    fn test_decode_base64_encoded_word() {
        assert_eq!(decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw==?="), "Hola mundo");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn test_decode_multiple_encoded_words() {
        let input = "=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=";
        assert_eq!(decode_encoded_words(input), "Hola mundo");
    }

    #[test]
    fn test_decode_mixed_plain_and_encoded() {
        let input = "Re: =?UTF-8?B?SG9sYQ==?= there";
        assert_eq!(decode_encoded_words(input), "Re: Hola there");
    }

    #[test]
    fn test_email_headers() {
        let headers = unfold_headers(
            "Subject: =?UTF-8?Q?Caf=C3=A9?=\nFrom: \"Ann\" <ann@example.com>\n\
             To: bob@example.com\nMessage-ID: <m1@example.com>\n\
             References: <a@x> <b@x>\nDate: Thu, 04 Jan 2024 10:00:00 +0000\n",
        );
        let h = email_headers(&headers);
        assert_eq!(h.subject.as_deref(), Some("Café"));
        assert_eq!(h.from.as_deref(), Some("Ann <ann@example.com>"));
        assert_eq!(h.to.as_deref(), Some("bob@example.com"));
        assert_eq!(h.message_id.as_deref(), Some("<m1@example.com>"));
        assert_eq!(h.references.as_deref(), Some("<a@x> <b@x>"));
        assert_eq!(h.date.as_deref(), Some("2024-01-04T10:00:00+00:00"));
        assert!(h.in_reply_to.is_none());
    }

    #[test]
    fn test_normalize_date_keeps_garbage() {
        assert_eq!(normalize_date(" not a date "), "not a date");
    }

    #[test]
    fn test_parse_date_named_tz_and_comment() {
        assert!(parse_date("Thu, 04 Jan 2024 10:00:00 EST").is_some());
        assert!(parse_date("Thu, 4 Jan 2024 10:00:00 +0000 (UTC)").is_some());
        assert!(parse_date("2024-01-04T10:00:00Z").is_some());
    }
}
