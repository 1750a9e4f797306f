//! Infrastructure layer - external adapters (database, HTTP, filesystem).
//!
//! This layer handles all I/O operations and external dependencies.

pub mod config;
pub mod drive;
pub mod local_cache;
pub mod oauth;
pub mod token_store;

pub use config::{ensure_config_exists, load_config, save_config};
pub use drive::{AccessTokenSource, DriveApi, DriveFile, EntryKind, HttpDriveApi, FOLDER_MIME};
pub use local_cache::LocalCache;
pub use oauth::{GoogleOAuthClient, IdentityProvider, TokenGrant};
pub use token_store::{CacheTokenStore, TokenStore};
