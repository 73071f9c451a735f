//! Blob storage for records, attachments and raw webhook payloads.
//!
//! Keys are `/`-separated relative paths. Two layouts are produced by this
//! crate:
//!
//! - `{emailId}/email.json` for the archival record
//! - `{emailId}/email-attachments/{filename}` for attachment bytes

pub mod fs;
pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::record::EmailRecord;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

/// Content type used for archival records.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Opaque put/get-by-key storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, overwriting any existing object.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StoreError>;

    /// Fetch the bytes stored under `key`.
    ///
    /// Returns [`StoreError::NotFound`] when nothing is stored there.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;
}

/// Key of the archival record for `email_id`.
pub fn record_key(email_id: &str) -> String {
    format!("{email_id}/email.json")
}

/// Key name used when an attachment filename has no usable basename.
pub const UNNAMED_ATTACHMENT: &str = "attachment";

const MAX_NAME_LEN: usize = 150;

/// Key of an attachment blob. Duplicate names within one email overwrite.
///
/// Only the basename of `filename` goes into the key, so a client path such
/// as `C:\Users\me\q1.pdf` is stored as `q1.pdf`.
pub fn attachment_key(email_id: &str, filename: &str) -> String {
    format!("{email_id}/email-attachments/{}", storage_name(filename))
}

/// Reduce an attachment filename to one valid key component.
pub fn storage_name(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    let name: String = base
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .take(MAX_NAME_LEN)
        .collect();
    match name.as_str() {
        "" | "." | ".." => UNNAMED_ATTACHMENT.to_string(),
        _ => name,
    }
}

/// Persist `record` as pretty JSON under its record key.
pub async fn save_record(store: &dyn BlobStore, record: &EmailRecord) -> Result<String, StoreError> {
    let key = record_key(&record.message_id);
    let json = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Serialization {
        key: key.clone(),
        source,
    })?;
    store.put(&key, json, JSON_CONTENT_TYPE).await?;
    Ok(key)
}

/// Load the archival record of `email_id`.
pub async fn load_record(store: &dyn BlobStore, email_id: &str) -> Result<EmailRecord, StoreError> {
    let key = record_key(email_id);
    let bytes = store.get(&key).await?;
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Serialization { key, source })
}

/// Validate a key and split it into its path components.
///
/// Empty keys, absolute keys, and keys with empty, `.` or `..` components
/// are rejected.
pub fn key_components(key: &str) -> Result<Vec<&str>, StoreError> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    let components: Vec<&str> = key.split('/').collect();
    if components
        .iter()
        .any(|c| c.is_empty() || *c == "." || *c == "..")
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(components)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layouts() {
        assert_eq!(record_key("m-1"), "m-1/email.json");
        assert_eq!(
            attachment_key("m-1", "report.pdf"),
            "m-1/email-attachments/report.pdf"
        );
    }

    #[test]
    fn test_storage_name_keeps_basename_only() {
        assert_eq!(storage_name("C:\\Users\\me\\q1.pdf"), "q1.pdf");
        assert_eq!(storage_name("docs/2024/plan.txt"), "plan.txt");
        assert_eq!(storage_name("Factura nº 42.pdf"), "Factura nº 42.pdf");
        assert_eq!(storage_name("tab\tname"), "tab_name");
        for unusable in ["", "  ", ".", "..", "dir/..", "trailing/"] {
            assert_eq!(storage_name(unusable), UNNAMED_ATTACHMENT, "{unusable:?}");
        }
        for name in ["C:\\Users\\me\\q1.pdf", "..", "../../etc/passwd"] {
            assert!(key_components(&attachment_key("m-1", name)).is_ok(), "{name}");
        }
    }

    #[tokio::test]
    async fn test_record_save_load() {
        let store = MemoryBlobStore::new();
        let mut record = EmailRecord::new("m-1", 42);
        record.fields.insert("spf".into(), "pass".into());
        assert_eq!(save_record(&store, &record).await.unwrap(), "m-1/email.json");
        assert_eq!(load_record(&store, "m-1").await.unwrap(), record);
        assert!(matches!(
            load_record(&store, "m-2").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_key_components_rejects_traversal() {
        assert_eq!(key_components("a/b/c.json").unwrap(), vec!["a", "b", "c.json"]);
        for bad in ["", "/etc/passwd", "a/../b", "a//b", "./a", "a\\b"] {
            assert!(
                matches!(key_components(bad), Err(StoreError::InvalidKey(_))),
                "{bad} should be rejected"
            );
        }
    }
}
