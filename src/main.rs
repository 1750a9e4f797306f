//! Chat Sync - offline-first conversation store with Google Drive sync.
//!
//! Conversations live in a local `SQLite` cache and are mirrored to a folder
//! in the user's Drive when connected.
//!
//! QUICK START:
//!   chat-sync init-config               # Write ~/.chat-sync/config.toml
//!   chat-sync new "Ideas" -m "hello"    # Start a conversation
//!   chat-sync list                      # See all conversations
//!   chat-sync connect                   # Authorize and run a full sync
//!   chat-sync watch                     # Keep syncing in the background

mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chat_sync::application::{
    format_conversation_markdown, format_conversations_json, format_conversations_table,
    format_event, format_sync_status, AuthTokenManager, OutputFormat, SyncOrchestrator,
    UploadOutcome,
};
use chat_sync::domain::{
    self, ActivitySignal, AppConfig, AppError, ArtifactReference, Conversation, Message, Role,
};
use chat_sync::infrastructure::{
    ensure_config_exists, load_config, CacheTokenStore, GoogleOAuthClient, HttpDriveApi,
    LocalCache,
};
use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Main application logic.
async fn run(cli: Cli) -> domain::Result<()> {
    let format = cli
        .output_format()
        .map_err(|e| AppError::Config { message: e })?;

    if matches!(cli.command, Commands::InitConfig) {
        let path = ensure_config_exists()?;
        println!("{} Configuration at {}", "✓".green().bold(), path.display());
        return Ok(());
    }

    let config = load_config()?;
    let storage = build_storage(config)?;
    storage.init().await?;

    match cli.command {
        Commands::Status => cmd_status(&storage)?,
        Commands::List { limit } => cmd_list(&storage, limit, format)?,
        Commands::Show {
            conversation_id,
            last,
        } => cmd_show(&storage, &conversation_id, last, format)?,
        Commands::New {
            title,
            message,
            system,
        } => cmd_new(&storage, title, message, system).await?,
        Commands::Reply {
            conversation_id,
            text,
            role,
        } => {
            cmd_edit(&storage, &conversation_id, |conv| {
                conv.push_message(Message::text(role.into(), text));
            })
            .await?;
        }
        Commands::Tag {
            conversation_id,
            tag,
            remove,
        } => {
            cmd_edit(&storage, &conversation_id, |conv| {
                if remove {
                    conv.remove_tag(&tag);
                } else {
                    conv.add_tag(tag);
                }
            })
            .await?;
        }
        Commands::Pin {
            conversation_id,
            off,
        } => cmd_edit(&storage, &conversation_id, |conv| conv.set_pinned(!off)).await?,
        Commands::Delete { conversation_id } => cmd_delete(&storage, &conversation_id).await?,
        Commands::Connect => {
            storage.connect_google_drive().await?;
            println!("{} Connected to Google Drive", "✓".green().bold());
            println!("{}", format_sync_status(&storage.get_sync_status()?));
        }
        Commands::Disconnect => {
            storage.disconnect_google_drive().await?;
            println!("{} Disconnected", "✓".green().bold());
        }
        Commands::Sync => {
            if storage.mode().is_connected() {
                storage.full_sync().await?;
            } else {
                storage.connect_google_drive().await?;
            }
            println!("{}", format_sync_status(&storage.get_sync_status()?));
        }
        Commands::Upload { path, mime } => cmd_upload(&storage, &path, mime).await?,
        Commands::Download { reference, output } => {
            cmd_download(&storage, &reference, &output).await?;
        }
        Commands::Watch => cmd_watch(&storage).await?,
        Commands::InitConfig => {}
    }

    Ok(())
}

/// Wire the cache, the OAuth client and the Drive adapter together.
fn build_storage(config: AppConfig) -> domain::Result<Arc<SyncOrchestrator>> {
    let cache = Arc::new(LocalCache::open(&config.cache_db_path())?);

    let http = reqwest::Client::builder()
        .user_agent(concat!("chat-sync/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(AppError::network)?;

    let identity = Arc::new(GoogleOAuthClient::new(http.clone(), config.auth.clone()));
    let auth = Arc::new(AuthTokenManager::new(
        identity,
        Arc::new(CacheTokenStore::new(Arc::clone(&cache))),
        Duration::from_secs(config.auth.refresh_timeout_secs),
    ));
    let drive = Arc::new(HttpDriveApi::new(
        http,
        auth.clone(),
        &config.remote.api_base,
        &config.remote.upload_base,
    ));

    Ok(Arc::new(SyncOrchestrator::new(config, cache, auth, drive)))
}

/// Find a conversation by full or partial ID.
fn find_conversation(storage: &SyncOrchestrator, id: &str) -> domain::Result<Conversation> {
    if let Some(conv) = storage.get_conversation(id)? {
        return Ok(conv);
    }

    storage
        .recent_conversations()?
        .into_iter()
        .find(|c| c.id.starts_with(id) || c.id.contains(id))
        .ok_or_else(|| AppError::InvalidData {
            message: format!("Conversation not found: {id}"),
        })
}

/// Commands typed by the user count as activity for the token refresh policy.
fn note_activity(storage: &SyncOrchestrator) {
    storage.auth().record_activity(ActivitySignal::Keyboard);
}

/// Push queued changes right away; the process exits before any background
/// drain would run.
async fn flush(storage: &SyncOrchestrator) -> domain::Result<()> {
    if storage.mode().is_connected() {
        let report = storage.drain_now().await?;
        if report.failed > 0 {
            println!(
                "{} {} change(s) will be retried on the next sync",
                "!".yellow().bold(),
                report.failed
            );
        }
    }
    Ok(())
}

fn cmd_status(storage: &SyncOrchestrator) -> domain::Result<()> {
    let status = storage.get_sync_status()?;
    println!("{}", format_sync_status(&status));
    Ok(())
}

fn cmd_list(storage: &SyncOrchestrator, limit: usize, format: OutputFormat) -> domain::Result<()> {
    let mut conversations = storage.recent_conversations()?;
    let total = conversations.len();
    conversations.truncate(limit);

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                format_conversations_json(&conversations).map_err(AppError::json_parse)?
            );
        }
        OutputFormat::Markdown | OutputFormat::Table => {
            println!("{}", format_conversations_table(&conversations));
            println!();
            println!("Showing {} of {} conversation(s)", conversations.len(), total);
        }
    }
    Ok(())
}

fn cmd_show(
    storage: &SyncOrchestrator,
    id: &str,
    last: Option<usize>,
    format: OutputFormat,
) -> domain::Result<()> {
    let mut conv = find_conversation(storage, id)?;

    // Apply --last filter if specified
    if let Some(n) = last {
        let len = conv.messages.len();
        if n < len {
            conv.messages = conv.messages.split_off(len - n);
        }
    }

    let output = match format {
        OutputFormat::Markdown => format_conversation_markdown(&conv),
        OutputFormat::Json => {
            format_conversations_json(std::slice::from_ref(&conv)).map_err(AppError::json_parse)?
        }
        OutputFormat::Table => format_conversations_table(std::slice::from_ref(&conv)),
    };

    println!("{output}");
    Ok(())
}

async fn cmd_new(
    storage: &SyncOrchestrator,
    title: String,
    message: Option<String>,
    system: Option<String>,
) -> domain::Result<()> {
    note_activity(storage);
    let mut conv = Conversation::new(title);
    if let Some(system) = system {
        conv.system_prompt = system;
    }
    if let Some(text) = message {
        conv.push_message(Message::text(Role::User, text));
    }

    let conv = storage.save_conversation(conv)?;
    flush(storage).await?;

    println!("{} Created {}", "✓".green().bold(), conv.id.cyan());
    Ok(())
}

async fn cmd_edit(
    storage: &SyncOrchestrator,
    id: &str,
    edit: impl FnOnce(&mut Conversation),
) -> domain::Result<()> {
    note_activity(storage);
    let mut conv = find_conversation(storage, id)?;
    edit(&mut conv);

    let conv = storage.save_conversation(conv)?;
    flush(storage).await?;

    println!("{} Updated {}", "✓".green().bold(), conv.id.cyan());
    Ok(())
}

async fn cmd_delete(storage: &SyncOrchestrator, id: &str) -> domain::Result<()> {
    note_activity(storage);
    let conv = find_conversation(storage, id)?;
    storage.delete_conversation(&conv.id)?;
    flush(storage).await?;

    println!("{} Deleted {}", "✓".green().bold(), conv.id);
    Ok(())
}

async fn cmd_upload(
    storage: &SyncOrchestrator,
    path: &Path,
    mime: Option<String>,
) -> domain::Result<()> {
    note_activity(storage);
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::io(format!("Failed to read {}", path.display()), e))?;

    let name = artifact_name(path);
    let mime = mime.unwrap_or_else(|| guess_mime(path).to_string());

    match storage.upload_artifact(data, &name, &mime).await? {
        UploadOutcome::Uploaded(reference) => {
            println!("{} Uploaded {} → {}", "✓".green().bold(), name, reference.to_string().cyan());
        }
        UploadOutcome::Temporary { name, reason } => {
            println!(
                "{} {} kept locally only ({}); the upload is retried on the next sync",
                "!".yellow().bold(),
                name,
                reason
            );
        }
    }
    Ok(())
}

async fn cmd_download(
    storage: &SyncOrchestrator,
    reference: &str,
    output: &Path,
) -> domain::Result<()> {
    let reference: ArtifactReference = reference.parse()?;
    let data = storage.download_artifact(&reference).await?;

    tokio::fs::write(output, &data)
        .await
        .map_err(|e| AppError::io(format!("Failed to write {}", output.display()), e))?;

    println!(
        "{} Wrote {} bytes to {}",
        "✓".green().bold(),
        data.len(),
        output.display()
    );
    Ok(())
}

async fn cmd_watch(storage: &Arc<SyncOrchestrator>) -> domain::Result<()> {
    let mut events = storage.subscribe();
    storage.start_background()?;

    println!("{}", format_sync_status(&storage.get_sync_status()?));
    println!("{}", "Watching for sync events (Ctrl-C to stop)".dimmed());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", format_event(&event)),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    storage.stop_background().await;
    Ok(())
}

/// Generated remote object name: `<stem>_<millis>.<ext>`.
fn artifact_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("artifact");
    let millis = chrono::Utc::now().timestamp_millis();

    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}_{millis}.{ext}"),
        None => format!("{stem}_{millis}"),
    }
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("webm") => "audio/webm",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("pdf") => "application/pdf",
        Some("txt" | "md") => "text/plain",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// Setup tracing/logging based on verbosity level.
fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
