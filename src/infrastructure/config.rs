//! Configuration file management.
//!
//! Handles loading and saving TOML configuration files, with secrets
//! overridable from the environment.

use std::fs;
use std::path::Path;

use crate::domain::{AppConfig, AppError, Result};

/// Default configuration file content.
const DEFAULT_CONFIG: &str = r#"# Chat Sync Configuration
# Auto-generated - edit as needed

[sync]
# Seconds between background drains of the sync queue while online
drain_interval_secs = 30

# Delay (ms) between a local change and the drain it triggers
drain_debounce_ms = 1000

# Reconnect on startup when sync was enabled last session
auto_connect = true

[auth]
# OAuth client registered for the Drive API
client_id = ""
# client_secret = ""
# refresh_token = ""

# Seconds between background token checks
refresh_check_interval_secs = 300

# Upper bound for a silent token refresh, in seconds
refresh_timeout_secs = 5

[remote]
# Root folder created in the user's Drive
app_folder = "ChatClientData"

# Attachments larger than this are never stored inline in conversations
inline_threshold_bytes = 65536

[paths]
# Custom data directory (optional, defaults to ~/.chat-sync)
# data_dir = "/custom/path"
"#;

/// Environment variables that override `[auth]` secrets.
const ENV_CLIENT_ID: &str = "CHAT_SYNC_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "CHAT_SYNC_CLIENT_SECRET";
const ENV_REFRESH_TOKEN: &str = "CHAT_SYNC_REFRESH_TOKEN";

/// Load configuration from file or create default.
///
/// # Errors
/// Returns error if file exists but cannot be read or parsed.
pub fn load_config() -> Result<AppConfig> {
    let config_path = config_file_path();

    let mut config = if config_path.exists() {
        load_config_from_file(&config_path)?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Load configuration from a specific file.
///
/// # Errors
/// Returns error if file cannot be read or parsed.
pub fn load_config_from_file(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("Failed to read config file: {}", path.display()), e))?;

    toml::from_str(&content).map_err(|e| AppError::Config {
        message: format!("Failed to parse config file: {e}"),
    })
}

/// Override secrets from the environment (or any lookup).
pub fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(client_id) = lookup(ENV_CLIENT_ID).filter(|v| !v.is_empty()) {
        config.auth.client_id = client_id;
    }
    if let Some(secret) = lookup(ENV_CLIENT_SECRET).filter(|v| !v.is_empty()) {
        config.auth.client_secret = Some(secret);
    }
    if let Some(token) = lookup(ENV_REFRESH_TOKEN).filter(|v| !v.is_empty()) {
        config.auth.refresh_token = Some(token);
    }
}

/// Save configuration to file.
///
/// # Errors
/// Returns error if file cannot be written.
pub fn save_config(config: &AppConfig) -> Result<()> {
    let config_path = config.config_file_path();

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io("Failed to create config directory", e))?;
    }

    let content = toml::to_string_pretty(config).map_err(|e| AppError::Config {
        message: format!("Failed to serialize config: {e}"),
    })?;

    fs::write(&config_path, content)
        .map_err(|e| AppError::io(format!("Failed to write config file: {}", config_path.display()), e))?;

    tracing::info!(path = %config_path.display(), "Configuration saved");

    Ok(())
}

/// Create default configuration file if it doesn't exist.
///
/// # Errors
/// Returns error if file cannot be created.
pub fn ensure_config_exists() -> Result<std::path::PathBuf> {
    let config_path = config_file_path();

    if !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::io("Failed to create config directory", e))?;
        }

        fs::write(&config_path, DEFAULT_CONFIG)
            .map_err(|e| AppError::io("Failed to create default config", e))?;

        tracing::info!(path = %config_path.display(), "Created default configuration");
    }

    Ok(config_path)
}

/// Get the path to the configuration file.
#[must_use]
pub fn config_file_path() -> std::path::PathBuf {
    AppConfig::default_data_dir().join("config.toml")
}
