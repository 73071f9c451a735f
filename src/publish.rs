//! Event fan-out: inbound notifications and categorization results.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::PublishError;

/// Publish-with-topic channel carrying JSON messages. Delivery is at least once.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, message: &Value) -> Result<(), PublishError>;
}

/// Serialize `event` and publish it on `topic`.
pub async fn publish_event<T: Serialize + ?Sized>(
    publisher: &dyn Publisher,
    topic: &str,
    event: &T,
) -> Result<(), PublishError> {
    let message = serde_json::to_value(event)?;
    publisher.publish(topic, &message).await
}

/// Appends each message as one JSON line to `{root}/{topic}.jsonl`.
#[derive(Debug)]
pub struct OutboxPublisher {
    root: PathBuf,
    // Serializes appends so lines never interleave
    lock: Mutex<()>,
}

impl OutboxPublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    /// File that receives messages for `topic`.
    pub fn topic_path(&self, topic: &str) -> Result<PathBuf, PublishError> {
        let valid = !topic.is_empty()
            && topic
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !topic.starts_with('.');
        if !valid {
            return Err(PublishError::Rejected {
                topic: topic.to_string(),
                reason: "topic names may only use letters, digits, '-', '_' and '.'".to_string(),
            });
        }
        Ok(self.root.join(format!("{topic}.jsonl")))
    }
}

#[async_trait]
impl Publisher for OutboxPublisher {
    async fn publish(&self, topic: &str, message: &Value) -> Result<(), PublishError> {
        let path = self.topic_path(topic)?;
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let io_err = |source| PublishError::Io {
            topic: topic.to_string(),
            source,
        };
        let _guard = self.lock.lock().await;
        tokio::fs::create_dir_all(&self.root).await.map_err(io_err)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        file.write_all(&line).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;

        debug!(topic, size = line.len(), "Published message");
        Ok(())
    }
}

/// Keeps published messages in memory, in order.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    sent: Mutex<Vec<(String, Value)>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(topic, message)` published so far.
    pub async fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().await.clone()
    }

    /// Messages published on `topic`, decoded as `T`. Messages of another
    /// shape are left out.
    pub async fn sent_on<T: DeserializeOwned>(&self, topic: &str) -> Vec<T> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(t, _)| t == topic)
            .filter_map(|(_, message)| serde_json::from_value(message.clone()).ok())
            .collect()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, topic: &str, message: &Value) -> Result<(), PublishError> {
        self.sent
            .lock()
            .await
            .push((topic.to_string(), message.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::record::NotificationRecord;

    fn notification(id: &str) -> NotificationRecord {
        NotificationRecord {
            message_id: id.to_string(),
            message_timestamp: 1,
            to: Some("a@example.com".into()),
            from: None,
            subject: None,
            attachments: Some(0),
            content_types: vec!["text/plain".into()],
        }
    }

    #[tokio::test]
    async fn test_outbox_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = OutboxPublisher::new(dir.path().join("outbox"));
        publish_event(&publisher, "inbound-email", &notification("m1")).await.unwrap();
        publish_event(&publisher, "inbound-email", &notification("m2")).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("outbox/inbound-email.jsonl")).unwrap();
        let ids: Vec<String> = text
            .lines()
            .map(|l| serde_json::from_str::<NotificationRecord>(l).unwrap().message_id)
            .collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_outbox_rejects_path_like_topic() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = OutboxPublisher::new(dir.path());
        let err = publish_event(&publisher, "../x", &notification("m1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_memory_publisher_filters_by_topic() {
        let publisher = MemoryPublisher::new();
        publish_event(&publisher, "a", &notification("m1")).await.unwrap();
        publish_event(&publisher, "b", &serde_json::json!({ "other": true }))
            .await
            .unwrap();

        let on_a: Vec<NotificationRecord> = publisher.sent_on("a").await;
        assert_eq!(on_a, vec![notification("m1")]);
        assert!(publisher.sent_on::<NotificationRecord>("b").await.is_empty());
        assert_eq!(publisher.sent().await.len(), 2);
    }
}
