//! Sync-related domain models and configuration.
//!
//! Contains the connectivity mode state machine, queue entry types, the
//! conversation merge policy and the application configuration.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{AppError, Result};
use super::models::Conversation;

/// Configuration for queue draining.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval between periodic drains while online, in seconds.
    #[serde(default = "default_drain_interval")]
    pub drain_interval_secs: u64,

    /// Delay between a local mutation and the drain it schedules.
    #[serde(default = "default_drain_debounce")]
    pub drain_debounce_ms: u64,

    /// Reconnect on startup when sync was enabled in the previous session.
    #[serde(default = "default_auto_connect")]
    pub auto_connect: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drain_interval_secs: default_drain_interval(),
            drain_debounce_ms: default_drain_debounce(),
            auto_connect: default_auto_connect(),
        }
    }
}

const fn default_drain_interval() -> u64 {
    30
}

const fn default_drain_debounce() -> u64 {
    1000
}

const fn default_auto_connect() -> bool {
    true
}

/// OAuth client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// OAuth client id.
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret, for installed-app clients that have one.
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Long-lived refresh token used for silent renewal.
    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,

    #[serde(default = "default_revoke_endpoint")]
    pub revoke_endpoint: String,

    /// Period of the background token check, in seconds.
    #[serde(default = "default_refresh_check_interval")]
    pub refresh_check_interval_secs: u64,

    /// Upper bound on a silent refresh, in seconds.
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            refresh_token: None,
            token_endpoint: default_token_endpoint(),
            revoke_endpoint: default_revoke_endpoint(),
            refresh_check_interval_secs: default_refresh_check_interval(),
            refresh_timeout_secs: default_refresh_timeout(),
        }
    }
}

fn default_token_endpoint() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_revoke_endpoint() -> String {
    "https://oauth2.googleapis.com/revoke".to_string()
}

const fn default_refresh_check_interval() -> u64 {
    300 // 5 minutes
}

const fn default_refresh_timeout() -> u64 {
    5
}

/// Remote document service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_upload_base")]
    pub upload_base: String,

    /// Name of the root application folder.
    #[serde(default = "default_app_folder")]
    pub app_folder: String,

    /// Inline payloads larger than this are never persisted as bytes.
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold_bytes: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            upload_base: default_upload_base(),
            app_folder: default_app_folder(),
            inline_threshold_bytes: default_inline_threshold(),
        }
    }
}

fn default_api_base() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}

fn default_upload_base() -> String {
    "https://www.googleapis.com/upload/drive/v3".to_string()
}

fn default_app_folder() -> String {
    "ChatClientData".to_string()
}

const fn default_inline_threshold() -> usize {
    64 * 1024
}

/// Path configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathConfig {
    /// Base data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub paths: PathConfig,
}

impl AppConfig {
    /// Get the data directory, using default if not configured.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.paths
            .data_dir
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".chat-sync")
    }

    /// Get the local cache database path.
    #[must_use]
    pub fn cache_db_path(&self) -> PathBuf {
        self.data_dir().join("cache.db")
    }

    /// Get the config file path.
    #[must_use]
    pub fn config_file_path(&self) -> PathBuf {
        self.data_dir().join("config.toml")
    }
}

/// Connectivity mode of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Local cache only.
    Offline,
    /// Acquiring a token and running the initial full sync.
    Connecting,
    /// Remote available; mutations are queued and drained.
    Online,
    /// Full sync in progress.
    Syncing,
    /// Last remote operation failed; connect again to retry.
    Error,
}

/// Inputs to the mode state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeEvent {
    Connect,
    SyncStarted,
    SyncSucceeded,
    SyncFailed,
    Disconnect,
}

impl SyncMode {
    /// Next mode for `event`, or `InvalidTransition` if the event is not
    /// accepted in this mode.
    pub fn apply(self, event: ModeEvent) -> Result<Self> {
        use ModeEvent as E;
        use SyncMode as M;

        match (self, event) {
            (_, E::Disconnect) => Ok(M::Offline),
            (M::Offline | M::Error, E::Connect) => Ok(M::Connecting),
            (M::Connecting | M::Online, E::SyncStarted) => Ok(M::Syncing),
            (M::Syncing, E::SyncSucceeded) => Ok(M::Online),
            (M::Connecting | M::Syncing, E::SyncFailed) => Ok(M::Error),
            (state, event) => Err(AppError::InvalidTransition {
                state: state.to_string(),
                event: format!("{event:?}"),
            }),
        }
    }

    /// Whether local mutations should be queued for the remote.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Online | Self::Syncing)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Offline => "offline",
            Self::Connecting => "connecting",
            Self::Online => "online",
            Self::Syncing => "syncing",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Kind of pending remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    SaveConversation,
    DeleteConversation,
}

impl SyncOperation {
    /// Stable name stored in the queue table.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SaveConversation => "save_conversation",
            Self::DeleteConversation => "delete_conversation",
        }
    }
}

impl FromStr for SyncOperation {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "save_conversation" => Ok(Self::SaveConversation),
            "delete_conversation" => Ok(Self::DeleteConversation),
            other => Err(AppError::CorruptRecord {
                id: other.to_string(),
                message: "unknown sync operation".into(),
            }),
        }
    }
}

/// A pending remote operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncQueueEntry {
    /// Auto-incremented row id.
    pub id: i64,
    pub operation: SyncOperation,
    pub target_id: String,
    pub enqueued_at: DateTime<Utc>,
    /// Bumped each time the same operation is queued again.
    pub revision: i64,
}

/// Snapshot reported to the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub mode: SyncMode,
    pub authenticated: bool,
    pub syncing: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub pending_operations: usize,
}

/// Pick the surviving copy of a conversation present on both sides.
///
/// Local wins ties; remote wins only when strictly newer.
#[must_use]
pub fn merge<'a>(local: &'a Conversation, remote: &'a Conversation) -> &'a Conversation {
    if local.last_modified >= remote.last_modified {
        local
    } else {
        remote
    }
}

/// Union of both sides keyed by id, resolving collisions with [`merge`].
#[must_use]
pub fn merge_sets(
    mut local: HashMap<String, Conversation>,
    remote: HashMap<String, Conversation>,
) -> HashMap<String, Conversation> {
    for (id, theirs) in remote {
        let keep_ours = local
            .get(&id)
            .is_some_and(|ours| std::ptr::eq(merge(ours, &theirs), ours));
        if !keep_ours {
            local.insert(id, theirs);
        }
    }
    local
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn conv_at(id: &str, title: &str, offset_secs: i64) -> Conversation {
        let mut conv = Conversation::with_id(id, title);
        conv.last_modified = DateTime::from_timestamp(1_700_000_000 + offset_secs, 0).unwrap();
        conv
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.sync.drain_interval_secs, 30);
        assert_eq!(config.auth.refresh_check_interval_secs, 300);
        assert_eq!(config.auth.refresh_timeout_secs, 5);
        assert_eq!(config.remote.app_folder, "ChatClientData");
    }

    #[test]
    fn test_merge_local_wins_ties() {
        let local = conv_at("c1", "local", 10);
        let remote = conv_at("c1", "remote", 10);
        assert_eq!(merge(&local, &remote).title, "local");
    }

    #[test]
    fn test_merge_remote_wins_only_when_newer() {
        let local = conv_at("c1", "local", 10);
        let newer = conv_at("c1", "remote", 11);
        let older = conv_at("c1", "remote", 9);
        assert_eq!(merge(&local, &newer).title, "remote");
        assert_eq!(merge(&local, &older).title, "local");
    }

    #[test]
    fn test_merge_sets_unions_both_sides() {
        let local: HashMap<_, _> = [
            ("a".to_string(), conv_at("a", "local-a", 5)),
            ("b".to_string(), conv_at("b", "local-b", 5)),
        ]
        .into();
        let remote: HashMap<_, _> = [
            ("b".to_string(), conv_at("b", "remote-b", 6)),
            ("c".to_string(), conv_at("c", "remote-c", 1)),
        ]
        .into();

        let merged = merge_sets(local, remote);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged["a"].title, "local-a");
        assert_eq!(merged["b"].title, "remote-b");
        assert_eq!(merged["c"].title, "remote-c");
    }

    #[test]
    fn test_mode_happy_path() {
        let mode = SyncMode::Offline
            .apply(ModeEvent::Connect)
            .and_then(|m| m.apply(ModeEvent::SyncStarted))
            .and_then(|m| m.apply(ModeEvent::SyncSucceeded))
            .unwrap();
        assert_eq!(mode, SyncMode::Online);
        assert!(mode.is_connected());
    }

    #[test]
    fn test_mode_rejects_illegal_events() {
        assert!(SyncMode::Offline.apply(ModeEvent::SyncStarted).is_err());
        assert!(SyncMode::Online.apply(ModeEvent::Connect).is_err());
        assert!(SyncMode::Syncing.apply(ModeEvent::SyncStarted).is_err());
    }

    #[test]
    fn test_mode_error_and_retry() {
        let mode = SyncMode::Syncing.apply(ModeEvent::SyncFailed).unwrap();
        assert_eq!(mode, SyncMode::Error);
        assert_eq!(mode.apply(ModeEvent::Connect).unwrap(), SyncMode::Connecting);
        assert_eq!(mode.apply(ModeEvent::Disconnect).unwrap(), SyncMode::Offline);
    }

    #[test]
    fn test_operation_names_roundtrip() {
        for op in [SyncOperation::SaveConversation, SyncOperation::DeleteConversation] {
            assert_eq!(op.as_str().parse::<SyncOperation>().unwrap(), op);
        }
        assert!("rename".parse::<SyncOperation>().is_err());
    }

    #[test]
    fn test_merge_is_ordering_independent_of_touch() {
        let mut local = conv_at("c1", "local", 0);
        let remote = conv_at("c1", "remote", 0);
        local.last_modified += Duration::milliseconds(1);
        assert_eq!(merge(&local, &remote).title, "local");
    }
}
