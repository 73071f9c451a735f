//! Attachment annotation: add a human-readable summary to every attachment
//! entry of a stored record.

use async_trait::async_trait;
use humansize::{format_size, BINARY};
use tracing::{debug, info, warn};

use crate::error::{AnalysisError, IngestError};
use crate::model::attachment::AttachmentRef;
use crate::model::record::EmailRecord;
use crate::store::{load_record, save_record, BlobStore};

/// Summary given to attachments that only exist inside the HTML body.
pub const INLINE_SUMMARY: &str = "Inline attachment (embedded content)";

/// Turns an attachment into a short summary. Typically backed by a model.
#[async_trait]
pub trait AttachmentAnalyzer: Send + Sync {
    async fn summarize(&self, attachment: &AttachmentRef, content: &[u8]) -> Result<String, AnalysisError>;
}

/// Describes attachments from their metadata and, for text, their first line.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataAnalyzer;

#[async_trait]
impl AttachmentAnalyzer for MetadataAnalyzer {
    async fn summarize(&self, attachment: &AttachmentRef, content: &[u8]) -> Result<String, AnalysisError> {
        let size = format_size(content.len() as u64, BINARY);
        let mut summary = format!("{} ({size})", attachment.content_type);
        if attachment.content_type.starts_with("text/") {
            let text = String::from_utf8_lossy(content);
            if let Some(line) = text.lines().map(str::trim).find(|l| !l.is_empty()) {
                let preview: String = line.chars().take(80).collect();
                summary.push_str(": ");
                summary.push_str(&preview);
            }
        }
        Ok(summary)
    }
}

fn error_summary(reason: impl std::fmt::Display) -> String {
    format!("Error processing attachment: {reason}")
}

/// Summarize every attachment of `email_id` and write the record back.
///
/// Entries that already carry a summary are left alone. A failure on one
/// attachment becomes that entry's summary; only loading or saving the
/// record itself can fail.
pub async fn annotate_attachments(
    store: &dyn BlobStore,
    analyzer: &dyn AttachmentAnalyzer,
    email_id: &str,
) -> Result<EmailRecord, IngestError> {
    let mut record = load_record(store, email_id).await?;
    if record.email_attachments.is_empty() {
        debug!(email_id, "No attachments to annotate");
        return Ok(record);
    }

    let mut annotated = 0;
    for entry in record.email_attachments.iter_mut() {
        if entry.summary.is_some() {
            continue;
        }
        entry.summary = Some(summarize_entry(store, analyzer, entry).await);
        annotated += 1;
    }

    save_record(store, &record).await?;
    info!(email_id, annotated, "Annotated attachments");
    Ok(record)
}

async fn summarize_entry(
    store: &dyn BlobStore,
    analyzer: &dyn AttachmentAnalyzer,
    entry: &AttachmentRef,
) -> String {
    if let Some(error) = &entry.error {
        return error_summary(error);
    }
    let (Some(key), Some(_)) = (&entry.key, &entry.filename) else {
        return INLINE_SUMMARY.to_string();
    };

    let content = match store.get(key).await {
        Ok(content) => content,
        Err(e) => {
            warn!(%key, error = %e, "Failed to load attachment for analysis");
            return error_summary(e);
        }
    };
    match analyzer.summarize(entry, &content).await {
        Ok(summary) => summary,
        Err(e) => {
            warn!(%key, error = %e, "Attachment analysis failed");
            error_summary(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attachment::Attachment;
    use crate::store::{attachment_key, MemoryBlobStore};

    struct Failing;

    #[async_trait]
    impl AttachmentAnalyzer for Failing {
        async fn summarize(&self, _: &AttachmentRef, _: &[u8]) -> Result<String, AnalysisError> {
            Err(AnalysisError("model unavailable".into()))
        }
    }

    async fn stored_record(store: &MemoryBlobStore) -> EmailRecord {
        let mut record = EmailRecord::new("m1", 1);
        let key = attachment_key("m1", "notes.txt");
        store
            .put(&key, b"\n  First line\nsecond".to_vec(), "text/plain")
            .await
            .unwrap();

        let mut stored = Attachment::External {
            filename: "notes.txt".into(),
            content_type: "text/plain".into(),
            content: b"\n  First line\nsecond".to_vec(),
            content_id: None,
        }
        .to_ref();
        stored.key = Some(key);

        let inline = Attachment::Inline {
            content_id: "img1".into(),
            content_type: "image/png".into(),
            size: 3,
        }
        .to_ref();

        let mut failed = stored.clone();
        failed.filename = Some("lost.bin".into());
        failed.key = None;
        failed.error = Some("disk full".into());

        record.email_attachments = vec![stored, inline, failed];
        save_record(store, &record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn test_annotation_is_a_superset() {
        let store = MemoryBlobStore::new();
        let original = stored_record(&store).await;

        let updated = annotate_attachments(&store, &MetadataAnalyzer, "m1").await.unwrap();
        let summaries: Vec<&str> = updated
            .email_attachments
            .iter()
            .map(|a| a.summary.as_deref().unwrap())
            .collect();
        assert_eq!(
            summaries,
            vec![
                "text/plain (20 B): First line",
                INLINE_SUMMARY,
                "Error processing attachment: disk full",
            ]
        );

        // Only summaries differ from the original
        let mut stripped = load_record(&store, "m1").await.unwrap();
        for entry in &mut stripped.email_attachments {
            entry.summary = None;
        }
        assert_eq!(stripped, original);
    }

    #[tokio::test]
    async fn test_analyzer_failure_is_recorded() {
        let store = MemoryBlobStore::new();
        stored_record(&store).await;
        let updated = annotate_attachments(&store, &Failing, "m1").await.unwrap();
        assert_eq!(
            updated.email_attachments[0].summary.as_deref(),
            Some("Error processing attachment: model unavailable")
        );
    }

    #[tokio::test]
    async fn test_missing_record_is_an_error() {
        let store = MemoryBlobStore::new();
        assert!(annotate_attachments(&store, &MetadataAnalyzer, "nope").await.is_err());
    }
}
