//! Webhook intake: request validation, signature check and raw payload storage.
//!
//! An accepted payload is stored under
//! `{pass|fail}/{YYYY-MM-DD}/{request_id}-boundary-{boundary}-email.b64`, so
//! that the verification result and the form boundary travel with the key.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use crate::error::IntakeError;
use crate::parser::encoding::{decode_base64, encode_base64};
use crate::parser::multipart::boundary_from_content_type;
use crate::store::BlobStore;

/// Largest accepted transport body (10 MiB).
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

const BOUNDARY_MARKER: &str = "-boundary-";
const RAW_SUFFIX: &str = "-email.b64";

/// Outcome of the signature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    Unverified,
}

impl Verification {
    pub fn from_bool(verified: bool) -> Self {
        if verified {
            Self::Verified
        } else {
            Self::Unverified
        }
    }

    /// Top-level key prefix for raw payloads.
    pub fn key_prefix(self) -> &'static str {
        match self {
            Self::Verified => "pass",
            Self::Unverified => "fail",
        }
    }

    pub fn is_verified(self) -> bool {
        self == Self::Verified
    }
}

/// Webhook signature check. The cryptography lives outside this crate.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, body: &[u8], signature: &str, timestamp: &str, public_key: &str) -> bool;
}

/// Verifier that trusts every request. For local runs and tests only.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl SignatureVerifier for AcceptAll {
    fn verify(&self, _body: &[u8], _signature: &str, _timestamp: &str, _public_key: &str) -> bool {
        true
    }
}

/// An HTTP request as delivered by the webhook endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundRequest {
    pub request_id: String,
    /// Transport body, base64 text when `is_base64_encoded` is set.
    pub body: Vec<u8>,
    pub is_base64_encoded: bool,
    pub content_type: Option<String>,
    pub signature: Option<String>,
    pub timestamp: Option<String>,
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest<'a> {
    /// Decoded `multipart/form-data` body.
    pub body: Vec<u8>,
    pub boundary: String,
    pub signature: &'a str,
    pub timestamp: &'a str,
}

impl InboundRequest {
    /// Check the request shape and decode its body.
    ///
    /// The size limit applies to the body as transported.
    pub fn validate(&self, max_body_size: usize) -> Result<ValidatedRequest<'_>, IntakeError> {
        if self.body.is_empty() {
            return Err(IntakeError::MissingBody);
        }
        let signature = non_empty(self.signature.as_deref()).ok_or(IntakeError::MissingSignature)?;
        let timestamp = non_empty(self.timestamp.as_deref()).ok_or(IntakeError::MissingTimestamp)?;
        let content_type = self
            .content_type
            .as_deref()
            .filter(|ct| ct.to_ascii_lowercase().contains("multipart/form-data"))
            .ok_or(IntakeError::InvalidContentType)?;
        if self.body.len() > max_body_size {
            return Err(IntakeError::TooLarge {
                size: self.body.len(),
                max: max_body_size,
            });
        }
        let boundary = extract_boundary(content_type).ok_or(IntakeError::MissingBoundary)?;

        let body = if self.is_base64_encoded {
            decode_base64(&self.body).map_err(|e| IntakeError::InvalidBase64(e.to_string()))?
        } else {
            self.body.clone()
        };

        Ok(ValidatedRequest {
            body,
            boundary,
            signature,
            timestamp,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Boundary of a `multipart/form-data` content type.
pub fn extract_boundary(content_type: &str) -> Option<String> {
    boundary_from_content_type(content_type)
}

/// Storage key for a raw payload.
pub fn raw_payload_key(
    verification: Verification,
    date: NaiveDate,
    request_id: &str,
    boundary: &str,
) -> String {
    format!(
        "{}/{}/{}{BOUNDARY_MARKER}{boundary}{RAW_SUFFIX}",
        verification.key_prefix(),
        date.format("%Y-%m-%d"),
        request_id.replace('=', ""),
    )
}

/// Recover the verification state and boundary from a raw payload key.
pub fn parse_raw_payload_key(key: &str) -> Option<(Verification, String)> {
    let (prefix, rest) = key.split_once('/')?;
    let verification = match prefix {
        "pass" => Verification::Verified,
        "fail" => Verification::Unverified,
        _ => return None,
    };
    let (_date, name) = rest.split_once('/')?;
    let (_request_id, tail) = name.split_once(BOUNDARY_MARKER)?;
    let boundary = tail.strip_suffix(RAW_SUFFIX)?;
    if boundary.is_empty() {
        return None;
    }
    Some((verification, boundary.to_string()))
}

/// A raw payload that has been validated and stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedPayload {
    pub key: String,
    pub boundary: String,
    pub verification: Verification,
    /// Decoded form body.
    pub body: Vec<u8>,
}

/// Validates, verifies and stores inbound webhook requests.
pub struct Intake {
    store: Arc<dyn BlobStore>,
    verifier: Arc<dyn SignatureVerifier>,
    public_key: String,
    max_body_size: usize,
}

impl Intake {
    pub fn new(
        store: Arc<dyn BlobStore>,
        verifier: Arc<dyn SignatureVerifier>,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            verifier,
            public_key: public_key.into(),
            max_body_size: MAX_BODY_SIZE,
        }
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// Accept a request received now.
    pub async fn accept(&self, request: &InboundRequest) -> Result<AcceptedPayload, IntakeError> {
        self.accept_at(request, Utc::now()).await
    }

    /// Accept a request received at `received`.
    ///
    /// Unverified requests are still stored, under the `fail/` prefix.
    pub async fn accept_at(
        &self,
        request: &InboundRequest,
        received: DateTime<Utc>,
    ) -> Result<AcceptedPayload, IntakeError> {
        let validated = request.validate(self.max_body_size).inspect_err(|e| {
            warn!(request_id = %request.request_id, error = %e, "Rejected webhook request");
        })?;

        let verification = Verification::from_bool(self.verifier.verify(
            &validated.body,
            validated.signature,
            validated.timestamp,
            &self.public_key,
        ));
        if !verification.is_verified() {
            warn!(request_id = %request.request_id, "Webhook signature check failed");
        }

        let key = raw_payload_key(
            verification,
            received.date_naive(),
            &request.request_id,
            &validated.boundary,
        );
        self.store
            .put(&key, encode_base64(&validated.body).into_bytes(), "text/plain")
            .await
            .map_err(|e| IntakeError::Store(e.to_string()))?;

        info!(%key, size = validated.body.len(), "Stored raw webhook payload");
        Ok(AcceptedPayload {
            key,
            boundary: validated.boundary,
            verification,
            body: validated.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBlobStore;

    struct RejectAll;

    impl SignatureVerifier for RejectAll {
        fn verify(&self, _: &[u8], _: &str, _: &str, _: &str) -> bool {
            false
        }
    }

    fn request(body: &[u8]) -> InboundRequest {
        InboundRequest {
            request_id: "abc123=".into(),
            body: body.to_vec(),
            is_base64_encoded: false,
            content_type: Some("multipart/form-data; boundary=xYzZY".into()),
            signature: Some("sig".into()),
            timestamp: Some("1700000000".into()),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    #[test]
    fn test_validation_order_and_status() {
        let mut req = request(b"");
        assert_eq!(req.validate(MAX_BODY_SIZE).unwrap_err(), IntakeError::MissingBody);

        req.body = b"x".to_vec();
        req.signature = None;
        assert_eq!(req.validate(MAX_BODY_SIZE).unwrap_err(), IntakeError::MissingSignature);

        req.signature = Some("sig".into());
        req.timestamp = Some("  ".into());
        assert_eq!(req.validate(MAX_BODY_SIZE).unwrap_err(), IntakeError::MissingTimestamp);

        req.timestamp = Some("1".into());
        req.content_type = Some("application/json".into());
        assert_eq!(req.validate(MAX_BODY_SIZE).unwrap_err(), IntakeError::InvalidContentType);

        req.content_type = Some("multipart/form-data".into());
        assert_eq!(req.validate(MAX_BODY_SIZE).unwrap_err(), IntakeError::MissingBoundary);

        req.content_type = Some("multipart/form-data; boundary=b".into());
        let err = req.validate(0).unwrap_err();
        assert_eq!(err, IntakeError::TooLarge { size: 1, max: 0 });
        assert_eq!(err.status_code(), 413);
    }

    #[test]
    fn test_base64_transport_body_is_decoded() {
        let mut req = request(b"aGVsbG8=");
        req.is_base64_encoded = true;
        let validated = req.validate(MAX_BODY_SIZE).unwrap();
        assert_eq!(validated.body, b"hello");
        assert_eq!(validated.boundary, "xYzZY");

        req.body = b"!!!".to_vec();
        assert!(matches!(
            req.validate(MAX_BODY_SIZE),
            Err(IntakeError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_raw_payload_key_layout() {
        let key = raw_payload_key(Verification::Verified, date(), "abc123=", "xYzZY");
        assert_eq!(key, "pass/2024-03-09/abc123-boundary-xYzZY-email.b64");
        assert_eq!(
            parse_raw_payload_key(&key),
            Some((Verification::Verified, "xYzZY".to_string()))
        );

        let key = raw_payload_key(Verification::Unverified, date(), "r", "----=_Part-1");
        assert_eq!(
            parse_raw_payload_key(&key),
            Some((Verification::Unverified, "----=_Part-1".to_string()))
        );
    }

    #[test]
    fn test_parse_raw_payload_key_rejects_foreign_keys() {
        assert_eq!(parse_raw_payload_key("m1/email.json"), None);
        assert_eq!(parse_raw_payload_key("pass/2024-03-09/no-marker.b64"), None);
        assert_eq!(parse_raw_payload_key("pass/2024-03-09/r-boundary--email.b64"), None);
    }

    #[tokio::test]
    async fn test_accept_stores_under_verification_prefix() {
        let store = Arc::new(MemoryBlobStore::new());
        let received = date().and_hms_opt(12, 0, 0).unwrap().and_utc();

        let intake = Intake::new(store.clone(), Arc::new(AcceptAll), "key");
        let accepted = intake.accept_at(&request(b"form body"), received).await.unwrap();
        assert_eq!(accepted.key, "pass/2024-03-09/abc123-boundary-xYzZY-email.b64");
        assert_eq!(store.get(&accepted.key).await.unwrap(), b"Zm9ybSBib2R5");

        let intake = Intake::new(store.clone(), Arc::new(RejectAll), "key");
        let rejected = intake.accept_at(&request(b"form body"), received).await.unwrap();
        assert_eq!(rejected.verification, Verification::Unverified);
        assert!(rejected.key.starts_with("fail/2024-03-09/"));
    }
}
