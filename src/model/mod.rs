//! Core data model: form parts, parsed emails, attachments and records.

pub mod address;
pub mod attachment;
pub mod email;
pub mod part;
pub mod record;
