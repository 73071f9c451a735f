//! Store attachment bytes and record where they went.

use futures_util::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::model::attachment::{Attachment, AttachmentRef};
use crate::model::record::EmailRecord;
use crate::store::{attachment_key, BlobStore};

/// Default number of attachment uploads in flight per email.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Store every external attachment and fill in `record.email_attachments`.
///
/// Uploads run concurrently, at most `concurrency` at a time. A failed upload
/// only marks its own entry with `error`; the other entries are unaffected.
/// Inline attachments are described without any store call.
///
/// Returns the number of failed uploads.
pub async fn materialize(
    store: &dyn BlobStore,
    email_id: &str,
    record: &mut EmailRecord,
    attachments: Vec<Attachment>,
    concurrency: usize,
) -> usize {
    let refs: Vec<AttachmentRef> = stream::iter(attachments)
        .map(|attachment| store_one(store, email_id, attachment))
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let failures = refs.iter().filter(|r| r.error.is_some()).count();
    debug!(
        email_id,
        total = refs.len(),
        failures,
        "Materialized attachments"
    );
    record.email_attachments = refs;
    failures
}

async fn store_one(store: &dyn BlobStore, email_id: &str, attachment: Attachment) -> AttachmentRef {
    let mut entry = attachment.to_ref();
    let Attachment::External {
        filename,
        content_type,
        content,
        ..
    } = attachment
    else {
        return entry;
    };

    let key = attachment_key(email_id, &filename);
    match store.put(&key, content, &content_type).await {
        Ok(()) => entry.key = Some(key),
        Err(e) => {
            warn!(email_id, %filename, error = %e, "Failed to store attachment");
            entry.error = Some(e.to_string());
        }
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FsBlobStore, MemoryBlobStore};

    fn external(name: &str, bytes: &[u8]) -> Attachment {
        Attachment::External {
            filename: name.into(),
            content_type: "text/plain".into(),
            content: bytes.to_vec(),
            content_id: None,
        }
    }

    #[tokio::test]
    async fn test_stores_external_and_describes_inline() {
        let store = MemoryBlobStore::new();
        let mut record = EmailRecord::new("m1", 0);
        let attachments = vec![
            external("a.txt", b"aaa"),
            Attachment::Inline {
                content_id: "img1".into(),
                content_type: "image/png".into(),
                size: 12,
            },
            external("b.txt", b"bb"),
        ];

        let failures = materialize(&store, "m1", &mut record, attachments, 2).await;
        assert_eq!(failures, 0);
        assert_eq!(
            store.keys().await,
            vec!["m1/email-attachments/a.txt", "m1/email-attachments/b.txt"]
        );

        let entries = &record.email_attachments;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].key.as_deref(), Some("m1/email-attachments/a.txt"));
        assert_eq!(entries[0].size, 3);
        assert_eq!(entries[1].key, None);
        assert_eq!(entries[1].content_id.as_deref(), Some("img1"));
        assert_eq!(entries[2].filename.as_deref(), Some("b.txt"));
    }

    #[tokio::test]
    async fn test_duplicate_filenames_overwrite() {
        let store = MemoryBlobStore::new();
        let mut record = EmailRecord::new("m1", 0);
        let attachments = vec![external("x", b"first"), external("x", b"second")];
        materialize(&store, "m1", &mut record, attachments, 1).await;
        assert_eq!(store.get("m1/email-attachments/x").await.unwrap(), b"second");
        assert_eq!(record.email_attachments.len(), 2);
    }

    #[tokio::test]
    async fn test_client_paths_are_stored_under_their_basename() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let mut record = EmailRecord::new("m", 0);
        let attachments = vec![
            external("C:\\Users\\me\\q1.pdf", b"pdf"),
            external("..", b"dots"),
        ];

        let failures = materialize(&store, "m", &mut record, attachments, 2).await;
        assert_eq!(failures, 0);

        let entries = &record.email_attachments;
        assert_eq!(entries[0].filename.as_deref(), Some("C:\\Users\\me\\q1.pdf"));
        assert_eq!(entries[0].key.as_deref(), Some("m/email-attachments/q1.pdf"));
        assert_eq!(entries[1].filename.as_deref(), Some(".."));
        assert_eq!(entries[1].key.as_deref(), Some("m/email-attachments/attachment"));
        assert_eq!(
            std::fs::read(dir.path().join("m/email-attachments/q1.pdf")).unwrap(),
            b"pdf"
        );
    }
}
