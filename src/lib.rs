//! `mailhook`: decode inbound-parse email webhooks.
//!
//! A webhook delivers a `multipart/form-data` body whose `email` field holds
//! a complete RFC 822 message. This crate splits the form, parses the nested
//! message (with a regex fallback for malformed input), stores attachments,
//! persists an archival [`model::record::EmailRecord`] and publishes a compact
//! [`model::record::NotificationRecord`].

pub mod config;
pub mod error;
pub mod ingest;
pub mod intake;
pub mod model;
pub mod parser;
pub mod publish;
pub mod store;
