//! Output formatting for conversations and sync state.
//!
//! Supports multiple output formats: Markdown, JSON, and table view.

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};

use crate::domain::{
    ArtifactPayload, ContentPart, Conversation, MessageContent, Role, SyncEvent, SyncMode,
    SyncStatus,
};

/// Output format options.
#[derive(Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    /// Human-readable Markdown format.
    #[default]
    Markdown,
    /// JSON format for programmatic use.
    Json,
    /// Compact table listing.
    Table,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "table" => Ok(Self::Table),
            _ => Err(format!("Unknown format: {s}. Use: markdown, json, table")),
        }
    }
}

/// Formats a single conversation as Markdown.
pub fn format_conversation_markdown(conv: &Conversation) -> String {
    let mut out = String::new();

    let title = if conv.title.is_empty() {
        "Untitled"
    } else {
        conv.title.as_str()
    };
    out.push_str(&format!("# {title}\n\n"));
    out.push_str(&format!("**ID:** {}\n", conv.id));
    out.push_str(&format!(
        "**Created:** {}\n",
        conv.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!(
        "**Modified:** {}\n",
        conv.last_modified.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    if !conv.tags.is_empty() {
        let tags: Vec<_> = conv.tags.iter().map(String::as_str).collect();
        out.push_str(&format!("**Tags:** {}\n", tags.join(", ")));
    }
    if conv.pinned {
        out.push_str("**Pinned**\n");
    }
    out.push_str(&format!("**Messages:** {}\n\n", conv.message_count()));

    if !conv.system_prompt.is_empty() {
        out.push_str(&format!("> {}\n\n", conv.system_prompt));
    }

    out.push_str("---\n\n");

    for message in &conv.messages {
        let role = match message.role {
            Role::User => "👤 **User**",
            Role::Assistant => "🤖 **Assistant**",
            Role::System => "⚙️ **System**",
        };
        out.push_str(&format!("### {role}\n\n"));

        if let Some(dt) = message.timestamp {
            out.push_str(&format!("*{}*\n\n", dt.format("%H:%M:%S")));
        }

        match &message.content {
            MessageContent::Text(text) => out.push_str(text),
            MessageContent::Parts(parts) => {
                let rendered: Vec<_> = parts.iter().map(format_part).collect();
                out.push_str(&rendered.join("\n\n"));
            }
        }
        out.push_str("\n\n---\n\n");
    }

    out
}

fn format_part(part: &ContentPart) -> String {
    let (kind, artifact) = match part {
        ContentPart::Text { text } => return text.clone(),
        ContentPart::Image { artifact } => ("image", artifact),
        ContentPart::Audio { artifact } => ("audio", artifact),
        ContentPart::File { name, artifact } => (name.as_str(), artifact),
    };

    match artifact {
        ArtifactPayload::Inline { name, data, .. } => {
            format!("📎 [{kind}: {name}, {} bytes inline]", data.len())
        }
        ArtifactPayload::Remote { reference } => format!("📎 [{kind}: {reference}]"),
        ArtifactPayload::Pending { label, .. } => format!("📎 {label}"),
    }
}

/// Formats multiple conversations as JSON.
///
/// # Errors
/// Returns error if serialization fails.
pub fn format_conversations_json(
    conversations: &[Conversation],
) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(conversations)
}

/// Formats a table listing of conversations.
pub fn format_conversations_table(conversations: &[Conversation]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Modified", "Msgs", "Tags", "Title"]);

    for conv in conversations {
        let modified = conv.last_modified.format("%Y-%m-%d %H:%M").to_string();

        let title = if conv.title.is_empty() {
            truncate(&conv.preview(), 35)
        } else {
            truncate(&conv.title, 35)
        };
        let title = if conv.pinned {
            format!("📌 {title}")
        } else {
            title
        };

        let tags: Vec<_> = conv.tags.iter().map(String::as_str).collect();

        table.add_row(vec![
            &conv.id,
            &modified,
            &conv.message_count().to_string(),
            &truncate(&tags.join(","), 20),
            &title,
        ]);
    }

    table.to_string()
}

/// Formats the sync status for display.
pub fn format_sync_status(status: &SyncStatus) -> String {
    let mode = match status.mode {
        SyncMode::Online => status.mode.to_string().green(),
        SyncMode::Syncing | SyncMode::Connecting => status.mode.to_string().cyan(),
        SyncMode::Offline => status.mode.to_string().yellow(),
        SyncMode::Error => status.mode.to_string().red(),
    };

    let authenticated = if status.authenticated {
        "yes".green()
    } else {
        "no".yellow()
    };

    let last_sync = status.last_sync_time.map_or_else(
        || "never".to_string(),
        |dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );

    format!(
        "{}\n  Mode: {}\n  Authenticated: {}\n  Syncing: {}\n  Last sync: {}\n  Pending operations: {}",
        "🔄 Sync Status".bold(),
        mode,
        authenticated,
        status.syncing,
        last_sync.cyan(),
        status.pending_operations.to_string().yellow()
    )
}

/// One-line rendering of a lifecycle event.
pub fn format_event(event: &SyncEvent) -> String {
    let detail = match event {
        SyncEvent::AuthSuccess | SyncEvent::FullSyncStarted => String::new(),
        SyncEvent::SyncModeChanged { from, to } => format!("{from} → {to}"),
        SyncEvent::SyncStarted { pending } => format!("{pending} pending"),
        SyncEvent::SyncCompleted { applied, failed } => {
            format!("{applied} applied, {failed} failed")
        }
        SyncEvent::FullSyncCompleted { conversations, .. } => {
            format!("{conversations} conversations")
        }
        SyncEvent::SyncError { message } => message.red().to_string(),
    };

    if detail.is_empty() {
        event.name().bold().to_string()
    } else {
        format!("{} {detail}", event.name().bold())
    }
}

/// Truncates a string to max length (in characters) with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    let s = s.lines().next().unwrap_or(s);
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
