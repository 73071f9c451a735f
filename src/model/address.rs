//! Mailbox normalization for `From` / `To` header values (RFC 5322 §3.4).

use std::fmt;

/// One mailbox: optional display name plus the bare address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: String,
}

impl Mailbox {
    /// Parse `addr`, `<addr>`, `Name <addr>` or `"Quoted, Name" <addr>`.
    ///
    /// Returns `None` for blank input. Unrecognized shapes keep the raw text
    /// as the address.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let angle = trimmed
            .rfind('<')
            .zip(trimmed.rfind('>'))
            .filter(|(open, close)| close > open);

        let mailbox = match angle {
            Some((open, close)) => {
                let name = unquote(&trimmed[..open]);
                Self {
                    name: (!name.is_empty()).then_some(name),
                    address: trimmed[open + 1..close].trim().to_string(),
                }
            }
            None => Self {
                name: None,
                address: trimmed.to_string(),
            },
        };
        Some(mailbox)
    }

    /// Split a comma-separated list, respecting quotes and angle brackets.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut entries = Vec::new();
        let mut start = 0;
        let mut quoted = false;
        let mut depth = 0usize;

        for (idx, ch) in raw.char_indices() {
            match ch {
                '"' => quoted = !quoted,
                '<' if !quoted => depth += 1,
                '>' if !quoted => depth = depth.saturating_sub(1),
                ',' if !quoted && depth == 0 => {
                    entries.extend(Self::parse(&raw[start..idx]));
                    start = idx + 1;
                }
                _ => {}
            }
        }
        entries.extend(Self::parse(&raw[start..]));
        entries
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if name.contains(',') => write!(f, "\"{name}\" <{}>", self.address),
            Some(name) => write!(f, "{name} <{}>", self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// Re-render an address header as a clean `, `-separated list.
///
/// Falls back to the trimmed input when nothing parses.
pub fn normalize_address_list(raw: &str) -> String {
    let list = Mailbox::parse_list(raw);
    if list.is_empty() {
        return raw.trim().to_string();
    }
    list.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn unquote(s: &str) -> String {
    let trimmed = s.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare() {
        let m = Mailbox::parse(" user@example.com ").unwrap();
        assert_eq!(m.address, "user@example.com");
        assert!(m.name.is_none());
    }

    #[test]
    fn test_parse_named() {
        let m = Mailbox::parse("\"Last, First\" <lf@example.com>").unwrap();
        assert_eq!(m.name.as_deref(), Some("Last, First"));
        assert_eq!(m.address, "lf@example.com");
    }

    #[test]
    fn test_parse_blank() {
        assert!(Mailbox::parse("   ").is_none());
    }

    #[test]
    fn test_parse_list_with_quoted_comma() {
        let list = Mailbox::parse_list("\"Last, First\" <a@b.com>, other@c.com");
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].address, "other@c.com");
    }

    #[test]
    fn test_normalize_list() {
        assert_eq!(
            normalize_address_list("Alice   <alice@example.com>,bob@example.com"),
            "Alice <alice@example.com>, bob@example.com"
        );
        assert_eq!(
            normalize_address_list("\"Doe, Jane\" <jd@example.com>"),
            "\"Doe, Jane\" <jd@example.com>"
        );
    }
}
