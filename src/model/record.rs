//! Archival and notification record shapes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::attachment::AttachmentRef;
use super::email::EmailHeaders;

/// Key of an `emailContent` entry.
///
/// Ordering puts `text/plain` and `text/html` first so that derived
/// content-type lists are stable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ContentKind {
    TextPlain,
    TextHtml,
    /// Leading header / preamble segment kept by the fallback parser.
    Header,
    /// Any other bare MIME type.
    Other(String),
}

impl ContentKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::TextPlain => "text/plain",
            Self::TextHtml => "text/html",
            Self::Header => "header",
            Self::Other(s) => s,
        }
    }

    /// `true` for body kinds that belong in a content-type list.
    pub fn is_body(&self) -> bool {
        !matches!(self, Self::Header)
    }
}

impl From<String> for ContentKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "text/plain" => Self::TextPlain,
            "text/html" => Self::TextHtml,
            "header" => Self::Header,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for ContentKind {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<ContentKind> for String {
    fn from(kind: ContentKind) -> Self {
        match kind {
            ContentKind::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The archival record persisted as `{emailId}/email.json`.
///
/// Created once per inbound email. The only later mutation is the addition
/// of per-attachment summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRecord {
    /// Transport message id (not the `Message-ID` header).
    pub message_id: String,

    /// Receive time, epoch milliseconds.
    pub message_timestamp: i64,

    /// Every form field except `email`, keyed by lowercased name.
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,

    /// Headers recovered from the nested message.
    #[serde(default, skip_serializing_if = "EmailHeaders::is_empty")]
    pub email_headers: EmailHeaders,

    /// Decoded bodies keyed by content kind.
    #[serde(default)]
    pub email_content: BTreeMap<ContentKind, String>,

    #[serde(default)]
    pub email_attachments: Vec<AttachmentRef>,
}

impl EmailRecord {
    pub fn new(message_id: impl Into<String>, message_timestamp: i64) -> Self {
        Self {
            message_id: message_id.into(),
            message_timestamp,
            fields: BTreeMap::new(),
            email_headers: EmailHeaders::default(),
            email_content: BTreeMap::new(),
            email_attachments: Vec::new(),
        }
    }

    /// Body content types present in `email_content`.
    pub fn content_types(&self) -> Vec<String> {
        self.email_content
            .keys()
            .filter(|k| k.is_body())
            .map(ToString::to_string)
            .collect()
    }

    /// Compute the compact notification projection.
    pub fn notification(&self) -> NotificationRecord {
        NotificationRecord::from(self)
    }
}

/// Size-bounded projection of an [`EmailRecord`] for fan-out.
///
/// Never persisted; recomputed from the record whenever needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub message_id: String,
    pub message_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Number of attachments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<usize>,
    #[serde(default)]
    pub content_types: Vec<String>,
}

impl From<&EmailRecord> for NotificationRecord {
    fn from(record: &EmailRecord) -> Self {
        let headers = &record.email_headers;
        let field = |name: &str| record.fields.get(name).cloned();

        // Parsed attachments win; the form's own count covers records
        // without a decoded email.
        let attachments = if record.email_attachments.is_empty() {
            field("attachments")
                .and_then(|v| v.trim().parse().ok())
                .or((!record.email_content.is_empty()).then_some(0))
        } else {
            Some(record.email_attachments.len())
        };

        Self {
            message_id: record.message_id.clone(),
            message_timestamp: record.message_timestamp,
            to: headers.to.clone().or_else(|| field("to")),
            from: headers.from.clone().or_else(|| field("from")),
            subject: headers.subject.clone().or_else(|| field("subject")),
            attachments,
            content_types: record.content_types(),
        }
    }
}
