//! First-pass categorization: decide what kind of email a stored record is
//! and publish the result for per-category handlers.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AnalysisError, IngestError};
use crate::model::record::{ContentKind, EmailRecord, NotificationRecord};
use crate::parser::mime::html_to_text;
use crate::publish::{publish_event, Publisher};
use crate::store::{load_record, BlobStore};

/// Default topic for categorization results.
pub const DEFAULT_CATEGORIZED_TOPIC: &str = "email-categorized";

/// Category of replies to a known conversation.
pub const CONVERSATION_CATEGORY: &str = "conversation";

/// Category used when nothing more specific applies.
pub const DEFAULT_CATEGORY: &str = "inquiry";

/// Longest summary [`KeywordCategorizer`] produces, in words.
const SUMMARY_WORDS: usize = 50;

static RE_SUBJECT_CONVERSATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[conv_([a-zA-Z0-9_-]+)\]").expect("valid regex"));

static RE_TO_CONVERSATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"conv_([a-zA-Z0-9_-]+)@").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Categorization {
    pub category: String,
    /// Between 0 and 1.
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub summary: String,
    pub word_count: usize,
}

/// What a categorizer says about one email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub categorization: Categorization,
    pub summary: Summary,
}

impl Assessment {
    /// Fixed assessment for replies to a known conversation.
    pub fn conversation() -> Self {
        Self {
            categorization: Categorization {
                category: CONVERSATION_CATEGORY.to_string(),
                confidence: 1.0,
                reasoning: "Conversation ID detected in subject or TO email address".to_string(),
            },
            summary: Summary {
                summary: "Continuation of existing conversation".to_string(),
                word_count: 4,
            },
        }
    }
}

/// Categorizes and summarizes an email. Typically backed by a model.
#[async_trait]
pub trait EmailCategorizer: Send + Sync {
    async fn assess(&self, record: &EmailRecord) -> Result<Assessment, AnalysisError>;
}

/// The envelope fields of the categorized email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginalEmail {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub timestamp: i64,
    pub attachments: usize,
}

/// Event published once an email has been categorized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub message_id: String,
    pub original_email: OriginalEmail,
    pub categorization: Categorization,
    pub summary: Summary,
    pub has_attachment: bool,
    pub conversation_id: Option<String>,
    /// RFC 3339 with millisecond precision, UTC.
    pub processed_at: String,
}

impl ProcessingResult {
    pub fn new(
        record: &EmailRecord,
        assessment: Assessment,
        conversation_id: Option<String>,
        processed_at: DateTime<Utc>,
    ) -> Self {
        let envelope = record.notification();
        let attachments = record.email_attachments.len();
        Self {
            message_id: record.message_id.clone(),
            original_email: OriginalEmail {
                from: envelope.from,
                to: envelope.to,
                subject: envelope.subject,
                timestamp: record.message_timestamp,
                attachments,
            },
            categorization: assessment.categorization,
            summary: assessment.summary,
            has_attachment: attachments > 0,
            conversation_id,
            processed_at: processed_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Conversation id carried by a reply, from `[conv_<id>]` in the subject or
/// a `conv_<id>@` recipient. The subject wins.
pub fn conversation_id(envelope: &NotificationRecord) -> Option<String> {
    let from_subject = envelope
        .subject
        .as_deref()
        .and_then(|s| RE_SUBJECT_CONVERSATION.captures(s));
    let from_to = || {
        envelope
            .to
            .as_deref()
            .and_then(|to| RE_TO_CONVERSATION.captures(to))
    };
    from_subject
        .or_else(from_to)
        .map(|c| c[1].to_string())
}

/// Categorize the stored email `email_id` and publish the result on `topic`.
///
/// Replies to a known conversation are categorized without calling
/// `categorizer`. A categorizer failure is an error for this email.
pub async fn categorize_email(
    store: &dyn BlobStore,
    categorizer: &dyn EmailCategorizer,
    publisher: &dyn Publisher,
    topic: &str,
    email_id: &str,
) -> Result<ProcessingResult, IngestError> {
    let record = load_record(store, email_id).await?;

    let conversation = conversation_id(&record.notification());
    let assessment = match &conversation {
        Some(id) => {
            debug!(email_id, conversation_id = %id, "Reply to a known conversation");
            Assessment::conversation()
        }
        None => categorizer.assess(&record).await?,
    };

    let result = ProcessingResult::new(&record, assessment, conversation, Utc::now());
    publish_event(publisher, topic, &result).await?;
    info!(
        email_id,
        topic,
        category = %result.categorization.category,
        has_attachment = result.has_attachment,
        "Categorized email"
    );
    Ok(result)
}

/// Keyword-based categorizer for running without a model.
///
/// Picks the category with the most keyword hits in the subject and body
/// (ties go to the earlier category) and summarizes with the first words of
/// the body.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordCategorizer;

const KEYWORDS: &[(&str, &[&str])] = &[
    (
        "sales",
        &["pricing", "price", "quote", "demo", "purchase", "buy", "discount"],
    ),
    (
        "support",
        &["error", "bug", "broken", "crash", "not working", "issue", "help"],
    ),
    (
        "account",
        &["billing", "invoice", "password", "login", "account", "refund", "subscription"],
    ),
];

#[async_trait]
impl EmailCategorizer for KeywordCategorizer {
    async fn assess(&self, record: &EmailRecord) -> Result<Assessment, AnalysisError> {
        let body = body_text(record);
        let subject = record.notification().subject.unwrap_or_default();
        let haystack = format!("{subject}\n{body}").to_lowercase();

        let mut best: Option<(&str, Vec<&str>)> = None;
        for &(category, words) in KEYWORDS {
            let hits: Vec<&str> = words
                .iter()
                .copied()
                .filter(|w| haystack.contains(*w))
                .collect();
            if !hits.is_empty() && best.as_ref().is_none_or(|(_, b)| hits.len() > b.len()) {
                best = Some((category, hits));
            }
        }

        let categorization = match best {
            Some((category, hits)) => Categorization {
                category: category.to_string(),
                confidence: hits.len() as f64 / (hits.len() + 1) as f64,
                reasoning: format!("Matched keywords: {}", hits.join(", ")),
            },
            None => Categorization {
                category: DEFAULT_CATEGORY.to_string(),
                confidence: 0.5,
                reasoning: "No category keywords found".to_string(),
            },
        };

        let source = if body.trim().is_empty() { subject.as_str() } else { body.as_str() };
        let words: Vec<&str> = source.split_whitespace().take(SUMMARY_WORDS).collect();
        Ok(Assessment {
            categorization,
            summary: Summary {
                summary: words.join(" "),
                word_count: words.len(),
            },
        })
    }
}

fn body_text(record: &EmailRecord) -> String {
    if let Some(text) = record.email_content.get(&ContentKind::TextPlain) {
        return text.clone();
    }
    record
        .email_content
        .get(&ContentKind::TextHtml)
        .map(|html| html_to_text(html))
        .unwrap_or_default()
}
