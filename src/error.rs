//! Centralized error types for mailhook.

use thiserror::Error;

/// Structural failure of the nested MIME parser.
///
/// Any of these aborts the structured parse entirely; the caller is expected
/// to hand the same bytes to the fallback parser.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The email field contained no bytes at all.
    #[error("Email content is empty")]
    EmptyInput,

    /// A multipart content type was declared without a `boundary` parameter.
    #[error("Multipart content type '{0}' has no boundary parameter")]
    MissingBoundary(String),

    /// The declared boundary never appears as a delimiter line in the body.
    #[error("Boundary '{0}' not found in message body")]
    BoundaryNotFound(String),

    /// A part body could not be decoded with its declared transfer encoding.
    #[error("Invalid {encoding} content: {reason}")]
    InvalidEncoding { encoding: String, reason: String },

    /// A header block with no blank line after it contains a line that is
    /// not a header field.
    #[error("Malformed header block: line at byte {0} is not a header field")]
    MalformedHeaders(usize),

    /// Multipart nesting exceeded the recursion limit.
    #[error("Multipart nesting deeper than {0} levels")]
    TooDeep(usize),
}

/// Errors produced by a [`crate::store::BlobStore`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No object exists under the key.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The key cannot be mapped onto the backing store.
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// I/O error while reading or writing an object.
    #[error("I/O error for key '{key}': {source}")]
    Io {
        key: String,
        source: std::io::Error,
    },

    /// A stored record could not be (de)serialized.
    #[error("Record serialization error for key '{key}': {source}")]
    Serialization {
        key: String,
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Create an `Io` variant from a key and an `io::Error`.
    pub fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            key: key.into(),
            source,
        }
    }
}

/// Errors produced by a [`crate::publish::Publisher`] implementation.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The payload could not be serialized.
    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The underlying channel rejected the message.
    #[error("Failed to publish to topic '{topic}': {reason}")]
    Rejected { topic: String, reason: String },

    /// I/O error while writing the message.
    #[error("I/O error publishing to topic '{topic}': {source}")]
    Io {
        topic: String,
        source: std::io::Error,
    },
}

/// Rejection of an inbound webhook request before any decoding happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntakeError {
    /// The request carried no body.
    #[error("Missing request body")]
    MissingBody,

    /// The signature header is absent.
    #[error("Missing required signature header")]
    MissingSignature,

    /// The timestamp header is absent.
    #[error("Missing required timestamp header")]
    MissingTimestamp,

    /// The content type is not `multipart/form-data`.
    #[error("Invalid Content-Type. Expected multipart/form-data")]
    InvalidContentType,

    /// The content type carries no usable boundary.
    #[error("Failed to extract boundary from Content-Type header")]
    MissingBoundary,

    /// The body exceeds the configured limit.
    #[error("Request body too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    /// The transport declared a base64 body that does not decode.
    #[error("Request body is not valid base64: {0}")]
    InvalidBase64(String),

    /// The raw payload could not be stored.
    #[error("Failed to store raw payload: {0}")]
    Store(String),
}

impl IntakeError {
    /// HTTP status code an endpoint should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::TooLarge { .. } => 413,
            Self::Store(_) => 500,
            _ => 400,
        }
    }
}

/// Failure reported by a [`crate::ingest::annotate::AttachmentAnalyzer`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct AnalysisError(pub String);

/// Hard failure for one email in the ingest pipeline.
///
/// Decode problems and per-attachment storage failures never surface here;
/// they are absorbed into a degraded record.
#[derive(Error, Debug)]
pub enum IngestError {
    /// The archival record could not be written or read.
    #[error("Failed to persist email record: {0}")]
    Store(#[from] StoreError),

    /// A notification or categorization event could not be published.
    #[error("Failed to publish message: {0}")]
    Publish(#[from] PublishError),

    /// The categorizer could not assess the email.
    #[error("Failed to categorize email: {0}")]
    Categorize(#[from] AnalysisError),

    /// A stored raw payload key does not follow the expected layout.
    #[error("Unrecognized raw payload key: {0}")]
    InvalidPayloadKey(String),
}

/// Convenience alias for nested-parser results.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
