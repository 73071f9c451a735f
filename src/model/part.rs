//! One field of the outer `multipart/form-data` body.

/// A named form field split out of the webhook body.
///
/// Ephemeral: produced by the splitter and consumed within one decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPart {
    /// Field name from `Content-Disposition`. Matched case-insensitively.
    pub name: String,
    /// Optional `filename` parameter from `Content-Disposition`.
    pub filename: Option<String>,
    /// Optional `Content-Type` declared for the field.
    pub declared_type: Option<String>,
    /// Raw field content, exactly as it appeared between the delimiters.
    pub bytes: Vec<u8>,
}

impl RawPart {
    /// `true` if the field name equals `name`, ignoring ASCII case.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// The field content decoded as text (invalid UTF-8 replaced).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Find the first part with the given name (case-insensitive).
pub fn find_part<'a>(parts: &'a [RawPart], name: &str) -> Option<&'a RawPart> {
    parts.iter().find(|p| p.is_named(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(name: &str, bytes: &[u8]) -> RawPart {
        RawPart {
            name: name.to_string(),
            filename: None,
            declared_type: None,
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn test_is_named_ignores_case() {
        assert!(part("EMAIL", b"").is_named("email"));
        assert!(!part("emails", b"").is_named("email"));
    }

    #[test]
    fn test_find_part() {
        let parts = vec![part("to", b"a@b.com"), part("Email", b"raw")];
        assert_eq!(find_part(&parts, "email").map(|p| p.text()), Some("raw".into()));
        assert!(find_part(&parts, "subject").is_none());
    }

    #[test]
    fn test_text_is_lossy() {
        assert_eq!(part("x", &[b'o', 0xFF, b'k']).text(), "o\u{FFFD}k");
    }
}
