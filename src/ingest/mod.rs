//! The ingest pipeline: split, decode, assemble, materialize, persist, publish.

pub mod annotate;
pub mod assemble;
pub mod categorize;
pub mod materialize;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::intake::{parse_raw_payload_key, AcceptedPayload, Verification};
use crate::model::email::ParsedEmail;
use crate::model::part::find_part;
use crate::model::record::EmailRecord;
use crate::parser::encoding::decode_base64;
use crate::parser::{parse_email, parse_fallback, split_form_data};
use crate::publish::{publish_event, Publisher};
use crate::store::{save_record, BlobStore};

use assemble::{assemble, AssembledEmail, EMAIL_FIELD};
use materialize::{materialize, DEFAULT_CONCURRENCY};

/// Default topic for notifications.
pub const DEFAULT_TOPIC: &str = "inbound-email";

/// One webhook body ready for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPayload {
    /// Transport message id; also the storage id of the email.
    pub message_id: String,
    /// Receive time, epoch milliseconds.
    pub message_timestamp: i64,
    /// Decoded `multipart/form-data` body.
    pub body: Vec<u8>,
    pub boundary: String,
    pub verification: Verification,
}

impl AcceptedPayload {
    /// Attach the transport identity to an accepted payload.
    pub fn into_inbound(self, message_id: impl Into<String>, message_timestamp: i64) -> InboundPayload {
        InboundPayload {
            message_id: message_id.into(),
            message_timestamp,
            body: self.body,
            boundary: self.boundary,
            verification: self.verification,
        }
    }
}

/// Why a payload was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The webhook signature did not verify.
    SecurityCheckFailed,
    /// The body held no form fields.
    EmptyPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed(EmailRecord),
    Skipped(SkipReason),
}

/// Runs inbound payloads through the pipeline against injected collaborators.
pub struct Ingestor {
    store: Arc<dyn BlobStore>,
    publisher: Arc<dyn Publisher>,
    topic: String,
    concurrency: usize,
}

impl Ingestor {
    pub fn new(store: Arc<dyn BlobStore>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            store,
            publisher,
            topic: DEFAULT_TOPIC.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Decode the raw `email` field, falling back to the regex parser when
    /// the structured parse fails. Never fails.
    pub fn decode(raw: &[u8]) -> ParsedEmail {
        match parse_email(raw) {
            Ok(email) => email,
            Err(e) => {
                warn!(error = %e, "Structured parse failed, using fallback parser");
                parse_fallback(raw)
            }
        }
    }

    /// Process one payload end to end.
    ///
    /// Attachment storage failures are recorded on the record. Failing to
    /// persist the record or to publish the notification is an error.
    pub async fn process(&self, payload: InboundPayload) -> Result<ProcessOutcome, IngestError> {
        let message_id = payload.message_id.as_str();
        if !payload.verification.is_verified() {
            info!(message_id, "Payload failed the security check, not processing");
            return Ok(ProcessOutcome::Skipped(SkipReason::SecurityCheckFailed));
        }

        let parts = split_form_data(&payload.body, &payload.boundary);
        if parts.is_empty() {
            info!(message_id, "No form fields in payload, nothing to process");
            return Ok(ProcessOutcome::Skipped(SkipReason::EmptyPayload));
        }
        debug!(message_id, fields = parts.len(), "Split form data");

        let parsed = find_part(&parts, EMAIL_FIELD).map(|part| Self::decode(&part.bytes));
        let AssembledEmail {
            mut record,
            attachments,
        } = assemble(message_id, payload.message_timestamp, &parts, parsed.as_ref());

        materialize(
            self.store.as_ref(),
            message_id,
            &mut record,
            attachments,
            self.concurrency,
        )
        .await;

        let key = save_record(self.store.as_ref(), &record).await?;
        let notification = record.notification();
        publish_event(self.publisher.as_ref(), &self.topic, &notification).await?;

        info!(
            message_id,
            %key,
            attachments = record.email_attachments.len(),
            content_types = ?notification.content_types,
            "Processed inbound email"
        );
        Ok(ProcessOutcome::Processed(record))
    }

    /// Process a raw payload previously stored by intake under `key`.
    ///
    /// Payloads stored under `fail/` are skipped without being read.
    pub async fn process_stored(
        &self,
        message_id: &str,
        message_timestamp: i64,
        key: &str,
    ) -> Result<ProcessOutcome, IngestError> {
        let (verification, boundary) =
            parse_raw_payload_key(key).ok_or_else(|| IngestError::InvalidPayloadKey(key.to_string()))?;
        if !verification.is_verified() {
            info!(message_id, key, "Stored payload failed the security check, not processing");
            return Ok(ProcessOutcome::Skipped(SkipReason::SecurityCheckFailed));
        }

        let stored = self.store.get(key).await?;
        let body = decode_base64(&stored).unwrap_or_else(|e| {
            warn!(key, error = %e, "Stored payload is not base64, using it as is");
            stored
        });

        self.process(InboundPayload {
            message_id: message_id.to_string(),
            message_timestamp,
            body,
            boundary,
            verification,
        })
        .await
    }
}
