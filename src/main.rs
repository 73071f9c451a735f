//! CLI entry point for `mailhook`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use sha2::{Digest, Sha256};

use mailhook::config::{self, Config};
use mailhook::ingest::annotate::{annotate_attachments, MetadataAnalyzer};
use mailhook::ingest::assemble::{assemble, EMAIL_FIELD};
use mailhook::ingest::categorize::{categorize_email, KeywordCategorizer};
use mailhook::ingest::{Ingestor, ProcessOutcome};
use mailhook::intake::{AcceptAll, InboundRequest, Intake};
use mailhook::model::part::{find_part, RawPart};
use mailhook::model::record::EmailRecord;
use mailhook::parser::split_form_data;
use mailhook::publish::OutboxPublisher;
use mailhook::store::FsBlobStore;

#[derive(Parser)]
#[command(
    name = "mailhook",
    version,
    about = "Decode inbound-parse email webhooks into archival records and notifications"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Blob store root (overrides the config file)
    #[arg(long, global = true, env = "MAILHOOK_STORE", value_name = "DIR")]
    store: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a webhook body and store it as a raw payload
    Accept {
        /// File holding the request body
        body: PathBuf,
        /// Request Content-Type header
        #[arg(long)]
        content_type: String,
        /// Webhook signature header
        #[arg(long)]
        signature: String,
        /// Webhook timestamp header
        #[arg(long)]
        timestamp: String,
        /// Request id (default: derived from the body)
        #[arg(long)]
        request_id: Option<String>,
        /// The body file holds base64 text
        #[arg(long)]
        base64: bool,
        /// Run the ingest pipeline right after storing
        #[arg(long)]
        process: bool,
    },
    /// Process a stored raw payload
    Process {
        /// Raw payload key, e.g. `pass/2024-03-09/<id>-boundary-<b>-email.b64`
        key: String,
        /// Message id (default: derived from the key)
        #[arg(long)]
        message_id: Option<String>,
    },
    /// Decode a form body offline and print the record
    Parse {
        /// File holding the `multipart/form-data` body, or a raw message with `--raw`
        file: PathBuf,
        /// Form boundary (required unless `--raw`)
        #[arg(short, long, required_unless_present = "raw")]
        boundary: Option<String>,
        /// The file is a raw RFC 822 message, not a form body
        #[arg(long)]
        raw: bool,
        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add summaries to the attachments of a stored email
    Annotate {
        /// Email id (the transport message id)
        email_id: String,
    },
    /// Categorize a stored email and publish the result
    Categorize {
        /// Email id (the transport message id)
        email_id: String,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    let store_root = cli
        .store
        .clone()
        .unwrap_or_else(|| config::storage_root(&config));

    match cli.command {
        Commands::Accept {
            body,
            content_type,
            signature,
            timestamp,
            request_id,
            base64,
            process,
        } => {
            let body = std::fs::read(&body)
                .with_context(|| format!("Failed to read {}", body.display()))?;
            let request = InboundRequest {
                request_id: request_id.unwrap_or_else(|| derived_id(&body)),
                body,
                is_base64_encoded: base64,
                content_type: Some(content_type),
                signature: Some(signature),
                timestamp: Some(timestamp),
            };
            cmd_accept(&config, &store_root, request, process).await
        }
        Commands::Process { key, message_id } => {
            let message_id = message_id.unwrap_or_else(|| derived_id(key.as_bytes()));
            cmd_process(&config, &store_root, &key, &message_id).await
        }
        Commands::Parse {
            file,
            boundary,
            raw,
            json,
        } => cmd_parse(&file, boundary.as_deref(), raw, json),
        Commands::Annotate { email_id } => cmd_annotate(&store_root, &email_id).await,
        Commands::Categorize { email_id } => cmd_categorize(&config, &store_root, &email_id).await,
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailhook.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Short stable id derived from content.
fn derived_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hash = format!("{:x}", hasher.finalize());
    hash[..32].to_string()
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn ingestor(config: &Config, store: Arc<FsBlobStore>) -> Ingestor {
    let publisher = Arc::new(OutboxPublisher::new(store.root().join("outbox")));
    Ingestor::new(store, publisher)
        .with_topic(config.ingest.notification_topic.clone())
        .with_concurrency(config.ingest.attachment_concurrency)
}

async fn cmd_accept(
    config: &Config,
    store_root: &Path,
    request: InboundRequest,
    process: bool,
) -> anyhow::Result<()> {
    let store = Arc::new(FsBlobStore::new(store_root));
    tracing::warn!("No signature verifier is configured, trusting the request");
    let intake = Intake::new(store.clone(), Arc::new(AcceptAll), config.webhook.public_key.clone())
        .with_max_body_size(config.ingest.max_body_size);

    let accepted = intake.accept(&request).await.map_err(|e| {
        anyhow::anyhow!("Request rejected (HTTP {}): {e}", e.status_code())
    })?;
    println!("{}", accepted.key);

    if process {
        let outcome = ingestor(config, store)
            .process(accepted.into_inbound(request.request_id.clone(), now_millis()))
            .await?;
        print_outcome(&outcome);
    }
    Ok(())
}

async fn cmd_process(
    config: &Config,
    store_root: &Path,
    key: &str,
    message_id: &str,
) -> anyhow::Result<()> {
    let store = Arc::new(FsBlobStore::new(store_root));
    let outcome = ingestor(config, store)
        .process_stored(message_id, now_millis(), key)
        .await?;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &ProcessOutcome) {
    match outcome {
        ProcessOutcome::Processed(record) => print_record_summary(record),
        ProcessOutcome::Skipped(reason) => println!("Skipped: {reason:?}"),
    }
}

/// Decode a body without touching storage.
fn cmd_parse(file: &Path, boundary: Option<&str>, raw: bool, json: bool) -> anyhow::Result<()> {
    if !file.exists() {
        anyhow::bail!("File not found: {}", file.display());
    }
    let bytes = std::fs::read(file)?;

    let parts = if raw {
        vec![RawPart {
            name: EMAIL_FIELD.to_string(),
            filename: None,
            declared_type: None,
            bytes: bytes.clone(),
        }]
    } else {
        split_form_data(&bytes, boundary.unwrap_or_default())
    };
    if parts.is_empty() {
        anyhow::bail!("No form fields found in {}", file.display());
    }

    let parsed = find_part(&parts, EMAIL_FIELD).map(|part| Ingestor::decode(&part.bytes));
    let assembled = assemble(&derived_id(&bytes), now_millis(), &parts, parsed.as_ref());

    if json {
        println!("{}", serde_json::to_string_pretty(&assembled.record)?);
    } else {
        print_record_summary(&assembled.record);
    }
    Ok(())
}

async fn cmd_annotate(store_root: &Path, email_id: &str) -> anyhow::Result<()> {
    let store = FsBlobStore::new(store_root);
    let record = annotate_attachments(&store, &MetadataAnalyzer, email_id).await?;
    for entry in &record.email_attachments {
        let name = entry
            .filename
            .as_deref()
            .or(entry.content_id.as_deref())
            .unwrap_or("-");
        println!("  {name:<32} {}", entry.summary.as_deref().unwrap_or(""));
    }
    Ok(())
}

async fn cmd_categorize(config: &Config, store_root: &Path, email_id: &str) -> anyhow::Result<()> {
    let store = FsBlobStore::new(store_root);
    let publisher = OutboxPublisher::new(store_root.join("outbox"));
    let result = categorize_email(
        &store,
        &KeywordCategorizer,
        &publisher,
        &config.ingest.categorized_topic,
        email_id,
    )
    .await?;

    println!("  {:<16} {}", "Category", result.categorization.category);
    println!("  {:<16} {:.2}", "Confidence", result.categorization.confidence);
    println!("  {:<16} {}", "Reasoning", result.categorization.reasoning);
    if let Some(id) = &result.conversation_id {
        println!("  {:<16} {id}", "Conversation");
    }
    println!("  {:<16} {}", "Summary", result.summary.summary);
    Ok(())
}

fn print_record_summary(record: &EmailRecord) {
    use humansize::{format_size, BINARY};

    let notification = record.notification();
    println!();
    println!("  {:<16} {}", "Message id", record.message_id);
    println!("  {:<16} {}", "From", notification.from.as_deref().unwrap_or("-"));
    println!("  {:<16} {}", "To", notification.to.as_deref().unwrap_or("-"));
    println!("  {:<16} {}", "Subject", notification.subject.as_deref().unwrap_or("-"));
    if let Some(date) = &record.email_headers.date {
        println!("  {:<16} {date}", "Date");
    }
    println!("  {:<16} {}", "Content types", notification.content_types.join(", "));

    if !record.email_attachments.is_empty() {
        println!();
        println!("  Attachments:");
        for entry in &record.email_attachments {
            let name = entry
                .filename
                .as_deref()
                .or(entry.content_id.as_deref())
                .unwrap_or("-");
            let status = match (&entry.key, &entry.error) {
                (_, Some(error)) => format!("error: {error}"),
                (Some(key), None) => key.clone(),
                (None, None) => "inline".to_string(),
            };
            println!(
                "    {name:<32} {:<24} {:>10}  {status}",
                entry.content_type,
                format_size(entry.size, BINARY)
            );
        }
    }
    println!();
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailhook", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}
