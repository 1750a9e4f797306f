//! Persistence for the access token.
//!
//! Three scalar values (token, expiry, last activity; both instants as epoch
//! millis) written and cleared together.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{AppError, Result, TokenState};

use super::local_cache::LocalCache;

const KEY_ACCESS_TOKEN: &str = "auth.access_token";
const KEY_EXPIRES_AT: &str = "auth.expires_at";
const KEY_LAST_ACTIVITY: &str = "auth.last_activity";

/// Where the current token survives restarts.
pub trait TokenStore: Send + Sync {
    /// Load the persisted token, if any.
    fn load(&self) -> Result<Option<TokenState>>;

    /// Persist all three values.
    fn save(&self, token: &TokenState) -> Result<()>;

    /// Persist only the activity instant.
    fn save_activity(&self, at: DateTime<Utc>) -> Result<()>;

    /// Remove all three values.
    fn clear(&self) -> Result<()>;
}

/// Token store backed by the cache's metadata collection.
pub struct CacheTokenStore {
    cache: Arc<LocalCache>,
}

impl CacheTokenStore {
    #[must_use]
    pub const fn new(cache: Arc<LocalCache>) -> Self {
        Self { cache }
    }
}

impl TokenStore for CacheTokenStore {
    fn load(&self) -> Result<Option<TokenState>> {
        let Some(access_token) = self.cache.get_meta(KEY_ACCESS_TOKEN)? else {
            return Ok(None);
        };

        let expires_at = read_millis(&self.cache, KEY_EXPIRES_AT)?;
        let last_activity = read_millis(&self.cache, KEY_LAST_ACTIVITY)?;

        match (expires_at, last_activity) {
            (Some(expires_at), last_activity) => Ok(Some(TokenState {
                access_token,
                expires_at,
                last_activity: last_activity.unwrap_or(expires_at),
            })),
            (None, _) => {
                tracing::warn!("Persisted token has no expiry; discarding");
                self.clear()?;
                Ok(None)
            }
        }
    }

    fn save(&self, token: &TokenState) -> Result<()> {
        self.cache.set_meta_many(&[
            (KEY_ACCESS_TOKEN, token.access_token.clone()),
            (KEY_EXPIRES_AT, token.expires_at.timestamp_millis().to_string()),
            (
                KEY_LAST_ACTIVITY,
                token.last_activity.timestamp_millis().to_string(),
            ),
        ])
    }

    fn save_activity(&self, at: DateTime<Utc>) -> Result<()> {
        self.cache
            .set_meta(KEY_LAST_ACTIVITY, &at.timestamp_millis().to_string())
    }

    fn clear(&self) -> Result<()> {
        self.cache
            .delete_meta(&[KEY_ACCESS_TOKEN, KEY_EXPIRES_AT, KEY_LAST_ACTIVITY])
    }
}

fn read_millis(cache: &LocalCache, key: &str) -> Result<Option<DateTime<Utc>>> {
    cache
        .get_meta(key)?
        .map(|raw| {
            raw.parse::<i64>()
                .ok()
                .and_then(DateTime::from_timestamp_millis)
                .ok_or_else(|| AppError::CorruptRecord {
                    id: key.to_string(),
                    message: format!("not an epoch-millis value: {raw}"),
                })
        })
        .transpose()
}
