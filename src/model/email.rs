//! Result of decoding the nested RFC 822 message.

use serde::{Deserialize, Serialize};

use super::attachment::Attachment;

/// Header fields recovered from the nested message.
///
/// `date` is RFC 3339 when the original could be parsed, otherwise the raw
/// header text. `references` keeps the `<id>` tokens separated by spaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailHeaders {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
}

impl EmailHeaders {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Headers, bodies and attachments of one decoded email.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEmail {
    pub headers: EmailHeaders,

    /// `text/plain` body.
    pub text_body: Option<String>,

    /// `text/html` body.
    pub html_body: Option<String>,

    /// Other textual bodies keyed by bare MIME type, in order of appearance.
    pub extra_bodies: Vec<(String, String)>,

    /// Preamble / leading header segment kept by the fallback parser.
    pub preamble: Option<String>,

    pub attachments: Vec<Attachment>,
}

impl ParsedEmail {
    /// Body content types present, `text/plain` and `text/html` first.
    pub fn content_types(&self) -> Vec<String> {
        let mut types = Vec::new();
        if self.text_body.is_some() {
            types.push("text/plain".to_string());
        }
        if self.html_body.is_some() {
            types.push("text/html".to_string());
        }
        for (ctype, _) in &self.extra_bodies {
            if !types.contains(ctype) {
                types.push(ctype.clone());
            }
        }
        types
    }

    /// `true` if no body content of any kind was recovered.
    pub fn has_no_body(&self) -> bool {
        self.text_body.is_none()
            && self.html_body.is_none()
            && self.extra_bodies.is_empty()
            && self.preamble.is_none()
    }

    /// Append a body under `content_type`, routing text/plain and text/html
    /// to their dedicated slots. Repeated bodies are joined with a newline.
    pub fn push_body(&mut self, content_type: &str, text: String) {
        let slot = match content_type {
            "text/plain" => Some(&mut self.text_body),
            "text/html" => Some(&mut self.html_body),
            _ => None,
        };
        match slot {
            Some(Some(existing)) => {
                existing.push('\n');
                existing.push_str(&text);
            }
            Some(empty) => *empty = Some(text),
            None => match self.extra_bodies.iter_mut().find(|(t, _)| t == content_type) {
                Some((_, existing)) => {
                    existing.push('\n');
                    existing.push_str(&text);
                }
                None => self.extra_bodies.push((content_type.to_string(), text)),
            },
        }
    }
}
