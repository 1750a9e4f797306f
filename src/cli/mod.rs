//! CLI interface using clap.
//!
//! Provides command-line arguments and subcommands for the tool.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use chat_sync::application::OutputFormat;
use chat_sync::domain::Role;

/// Chat Sync - offline-first conversation store with Google Drive sync.
///
/// Quick start: chat-sync new "Ideas" -m "hello" | list | connect | sync
#[derive(Parser, Debug)]
#[command(name = "chat-sync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (use multiple times for more verbosity).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format: markdown, json, or table.
    #[arg(short, long, default_value = "markdown")]
    pub format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show connectivity, authentication and queue state.
    Status,

    /// List conversations, most recent first.
    List {
        /// Maximum number of conversations to show.
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show a specific conversation in detail.
    Show {
        /// Conversation ID (full or partial).
        conversation_id: String,

        /// Show only the last N messages.
        #[arg(short, long)]
        last: Option<usize>,
    },

    /// Start a new conversation.
    New {
        /// Conversation title.
        title: String,

        /// First user message.
        #[arg(short, long)]
        message: Option<String>,

        /// System prompt.
        #[arg(short, long)]
        system: Option<String>,
    },

    /// Append a message to a conversation.
    Reply {
        /// Conversation ID (full or partial).
        conversation_id: String,

        /// Message text.
        text: String,

        /// Author of the message.
        #[arg(short, long, value_enum, default_value = "user")]
        role: RoleArg,
    },

    /// Add a tag to a conversation.
    Tag {
        conversation_id: String,
        tag: String,

        /// Remove the tag instead of adding it.
        #[arg(long)]
        remove: bool,
    },

    /// Pin or unpin a conversation.
    Pin {
        conversation_id: String,

        /// Unpin instead of pin.
        #[arg(long)]
        off: bool,
    },

    /// Delete a conversation locally and on Drive.
    Delete {
        /// Conversation ID (full or partial).
        conversation_id: String,
    },

    /// Authorize and go online (runs a full sync).
    Connect,

    /// Go offline and sign out.
    Disconnect,

    /// Run a full bidirectional sync.
    Sync,

    /// Upload a file as an artifact.
    Upload {
        /// File to upload.
        path: PathBuf,

        /// MIME type (guessed from the extension if omitted).
        #[arg(short, long)]
        mime: Option<String>,
    },

    /// Download an artifact by reference (gdrive://<id>).
    Download {
        reference: String,

        /// Output file path.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Run background sync and print lifecycle events until Ctrl-C.
    Watch,

    /// Write a default configuration file if none exists.
    InitConfig,
}

/// Message author accepted on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RoleArg {
    User,
    Assistant,
    System,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::User => Self::User,
            RoleArg::Assistant => Self::Assistant,
            RoleArg::System => Self::System,
        }
    }
}

impl Cli {
    /// Parse the output format argument.
    pub fn output_format(&self) -> Result<OutputFormat, String> {
        self.format.parse()
    }
}
