//! Attachments recovered from a message and their persisted descriptors.

use serde::{Deserialize, Serialize};

/// Content type used when a part declares none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// An attachment recovered from the nested message.
///
/// External attachments own their decoded bytes and must be stored;
/// inline attachments are only referenced by content id from the HTML body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    External {
        filename: String,
        content_type: String,
        content: Vec<u8>,
        content_id: Option<String>,
    },
    Inline {
        content_id: String,
        content_type: String,
        size: u64,
    },
}

impl Attachment {
    /// Decoded size in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::External { content, .. } => content.len() as u64,
            Self::Inline { size, .. } => *size,
        }
    }

    pub fn content_type(&self) -> &str {
        match self {
            Self::External { content_type, .. } | Self::Inline { content_type, .. } => {
                content_type
            }
        }
    }

    pub fn content_id(&self) -> Option<&str> {
        match self {
            Self::External { content_id, .. } => content_id.as_deref(),
            Self::Inline { content_id, .. } => Some(content_id),
        }
    }

    /// Filename for external attachments, `None` for inline ones.
    pub fn filename(&self) -> Option<&str> {
        match self {
            Self::External { filename, .. } => Some(filename),
            Self::Inline { .. } => None,
        }
    }

    /// Build the (not yet stored) descriptor for this attachment.
    pub fn to_ref(&self) -> AttachmentRef {
        AttachmentRef {
            filename: self.filename().map(String::from),
            content_id: self.content_id().map(String::from),
            content_type: self.content_type().to_string(),
            key: None,
            size: self.size(),
            error: None,
            summary: None,
        }
    }
}

/// Attachment entry as persisted in `emailAttachments`.
///
/// `key` is set once the bytes are stored; `error` records a storage failure
/// for this entry only. `summary` is added later by attachment annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,

    #[serde(rename = "type")]
    pub content_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl AttachmentRef {
    /// `true` if this entry has bytes in storage.
    pub fn is_stored(&self) -> bool {
        self.key.is_some()
    }
}
