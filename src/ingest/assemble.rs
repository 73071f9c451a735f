//! Build the archival record from split form fields and a decoded email.

use crate::model::attachment::{Attachment, DEFAULT_CONTENT_TYPE};
use crate::model::email::ParsedEmail;
use crate::model::part::RawPart;
use crate::model::record::{ContentKind, EmailRecord};

/// Name of the form field carrying the raw RFC 822 message.
pub const EMAIL_FIELD: &str = "email";

/// A record whose attachments have not been stored yet.
///
/// `attachments[i]` is described by `record.email_attachments[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledEmail {
    pub record: EmailRecord,
    pub attachments: Vec<Attachment>,
}

/// Assemble the record for one inbound email.
///
/// Every form field except `email` is copied as text under its lowercased
/// name. Fields uploaded as files (non-empty `filename`) are attachments
/// instead. Pure and deterministic.
pub fn assemble(
    message_id: &str,
    message_timestamp: i64,
    parts: &[RawPart],
    parsed: Option<&ParsedEmail>,
) -> AssembledEmail {
    let mut record = EmailRecord::new(message_id, message_timestamp);
    let mut attachments = Vec::new();

    for part in parts.iter().filter(|p| !p.is_named(EMAIL_FIELD)) {
        match part.filename.as_deref().map(str::trim) {
            Some(filename) if !filename.is_empty() => {
                attachments.push(Attachment::External {
                    filename: filename.to_string(),
                    content_type: part
                        .declared_type
                        .clone()
                        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                    content: part.bytes.clone(),
                    content_id: None,
                });
            }
            _ => {
                record.fields.insert(part.name.to_lowercase(), part.text());
            }
        }
    }

    if let Some(email) = parsed {
        record.email_headers = email.headers.clone();
        if let Some(text) = &email.text_body {
            record.email_content.insert(ContentKind::TextPlain, text.clone());
        }
        if let Some(html) = &email.html_body {
            record.email_content.insert(ContentKind::TextHtml, html.clone());
        }
        for (content_type, body) in &email.extra_bodies {
            record
                .email_content
                .insert(ContentKind::from(content_type.as_str()), body.clone());
        }
        if let Some(preamble) = &email.preamble {
            record.email_content.insert(ContentKind::Header, preamble.clone());
        }
        attachments.extend(email.attachments.iter().cloned());
    }

    record.email_attachments = attachments.iter().map(Attachment::to_ref).collect();
    AssembledEmail {
        record,
        attachments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::email::EmailHeaders;

    fn field(name: &str, value: &str) -> RawPart {
        RawPart {
            name: name.to_string(),
            filename: None,
            declared_type: None,
            bytes: value.as_bytes().to_vec(),
        }
    }

    fn parsed() -> ParsedEmail {
        ParsedEmail {
            headers: EmailHeaders {
                subject: Some("Parsed".into()),
                ..EmailHeaders::default()
            },
            text_body: Some("hello".into()),
            html_body: Some("<p>hello</p>".into()),
            extra_bodies: vec![("text/calendar".into(), "BEGIN".into())],
            preamble: None,
            attachments: vec![Attachment::Inline {
                content_id: "img1".into(),
                content_type: "image/png".into(),
                size: 10,
            }],
        }
    }

    #[test]
    fn test_fields_are_lowercased_and_email_excluded() {
        let parts = vec![
            field("To", "a@example.com"),
            field("SPF", "pass"),
            field("EMAIL", "raw message"),
        ];
        let assembled = assemble("m1", 7, &parts, None);
        let record = &assembled.record;
        assert_eq!(record.fields.get("to").map(String::as_str), Some("a@example.com"));
        assert_eq!(record.fields.get("spf").map(String::as_str), Some("pass"));
        assert!(!record.fields.contains_key("email"));
        assert!(record.email_content.is_empty());
        assert!(assembled.attachments.is_empty());
    }

    #[test]
    fn test_content_and_attachments_aligned() {
        let assembled = assemble("m1", 7, &[], Some(&parsed()));
        let record = &assembled.record;
        assert_eq!(
            record.content_types(),
            vec!["text/plain", "text/html", "text/calendar"]
        );
        assert_eq!(record.email_attachments.len(), assembled.attachments.len());
        assert_eq!(record.email_attachments[0].content_id.as_deref(), Some("img1"));
        assert!(!record.email_attachments[0].is_stored());
        assert_eq!(record.notification().subject.as_deref(), Some("Parsed"));
    }

    #[test]
    fn test_file_field_becomes_attachment() {
        let parts = vec![RawPart {
            name: "attachment1".into(),
            filename: Some("x.pdf".into()),
            declared_type: Some("application/pdf".into()),
            bytes: b"%PDF-1.4".to_vec(),
        }];
        let assembled = assemble("m1", 7, &parts, None);
        assert!(assembled.record.fields.is_empty());
        assert_eq!(assembled.attachments.len(), 1);
        assert_eq!(assembled.attachments[0].filename(), Some("x.pdf"));
        assert_eq!(assembled.attachments[0].content_type(), "application/pdf");
    }

    #[test]
    fn test_assembly_is_idempotent() {
        let parts = vec![field("from", "b@example.com"), field("email", "x")];
        let email = parsed();
        assert_eq!(
            assemble("m1", 7, &parts, Some(&email)),
            assemble("m1", 7, &parts, Some(&email))
        );
    }
}
