//! Access-token lifecycle types.
//!
//! The token phase is a small state machine. A refresh can only start from a
//! non-refreshing phase, so duplicate refreshes are rejected by the transition
//! function instead of a flag check scattered through callers.

use std::fmt;

use chrono::{DateTime, Duration, Utc};

use super::error::{AppError, Result};

/// Tokens this close to expiry (seconds) are treated as already expired.
pub const EXPIRY_BUFFER_SECS: i64 = 5 * 60;

/// Refresh proactively when expiry is closer than this many seconds.
pub const PROACTIVE_REFRESH_SECS: i64 = 15 * 60;

/// Users idle for longer than this many seconds are considered inactive.
pub const ACTIVITY_WINDOW_SECS: i64 = 10 * 60;

/// Minimum spacing between persisted activity updates, in seconds.
pub const ACTIVITY_THROTTLE_SECS: i64 = 60;

/// A bearer credential and the bookkeeping around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenState {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl TokenState {
    /// Token granted at `now` and valid for `expires_in`.
    #[must_use]
    pub fn granted(access_token: impl Into<String>, expires_in: Duration, now: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: now + expires_in,
            last_activity: now,
        }
    }

    /// Usable for requests at `now`, keeping the safety buffer.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - Duration::seconds(EXPIRY_BUFFER_SECS)
    }

    /// User interacted within the activity window.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now - self.last_activity < Duration::seconds(ACTIVITY_WINDOW_SECS)
    }
}

/// Current phase of the token lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPhase {
    Unauthenticated,
    Authenticated(TokenState),
    /// A refresh is in flight; the previous token (if any) is still served
    /// while it remains valid.
    Refreshing { previous: Option<TokenState> },
}

/// Inputs to the token state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    Granted(TokenState),
    RefreshStarted,
    RefreshSucceeded(TokenState),
    RefreshFailed,
    /// The attempt was dropped before the provider answered.
    RefreshAbandoned,
    Cleared,
}

impl AuthEvent {
    const fn name(&self) -> &'static str {
        match self {
            Self::Granted(_) => "granted",
            Self::RefreshStarted => "refresh-started",
            Self::RefreshSucceeded(_) => "refresh-succeeded",
            Self::RefreshFailed => "refresh-failed",
            Self::RefreshAbandoned => "refresh-abandoned",
            Self::Cleared => "cleared",
        }
    }
}

impl AuthPhase {
    /// Next phase for `event`.
    pub fn apply(self, event: AuthEvent) -> Result<Self> {
        match (self, event) {
            (_, AuthEvent::Cleared) => Ok(Self::Unauthenticated),
            (Self::Unauthenticated | Self::Authenticated(_), AuthEvent::Granted(token)) => {
                Ok(Self::Authenticated(token))
            }
            (Self::Unauthenticated, AuthEvent::RefreshStarted) => {
                Ok(Self::Refreshing { previous: None })
            }
            (Self::Authenticated(token), AuthEvent::RefreshStarted) => Ok(Self::Refreshing {
                previous: Some(token),
            }),
            (Self::Refreshing { .. }, AuthEvent::RefreshSucceeded(token)) => {
                Ok(Self::Authenticated(token))
            }
            (Self::Refreshing { .. }, AuthEvent::RefreshFailed) => Ok(Self::Unauthenticated),
            (Self::Refreshing { previous }, AuthEvent::RefreshAbandoned) => {
                Ok(previous.map_or(Self::Unauthenticated, Self::Authenticated))
            }
            (state, event) => Err(AppError::InvalidTransition {
                state: state.to_string(),
                event: event.name().to_string(),
            }),
        }
    }

    /// Token held in this phase, valid or not.
    #[must_use]
    pub const fn token(&self) -> Option<&TokenState> {
        match self {
            Self::Authenticated(token) => Some(token),
            Self::Refreshing { previous } => previous.as_ref(),
            Self::Unauthenticated => None,
        }
    }

    #[must_use]
    pub const fn is_refreshing(&self) -> bool {
        matches!(self, Self::Refreshing { .. })
    }
}

impl fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "unauthenticated"),
            Self::Authenticated(_) => write!(f, "authenticated"),
            Self::Refreshing { .. } => write!(f, "refreshing"),
        }
    }
}

/// Outcome of the periodic token check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    /// Nothing to do.
    Keep,
    /// Active user, token close to expiry: renew now.
    Refresh,
    /// Expired token and idle user: drop it and require a new login.
    Clear,
}

/// Decide what the background check should do with `token` at `now`.
#[must_use]
pub fn refresh_decision(token: Option<&TokenState>, now: DateTime<Utc>) -> RefreshDecision {
    let Some(token) = token else {
        return RefreshDecision::Keep;
    };

    let active = token.is_active_at(now);
    let expired = now >= token.expires_at;

    if active && token.expires_at - now < Duration::seconds(PROACTIVE_REFRESH_SECS) {
        RefreshDecision::Refresh
    } else if expired && !active {
        RefreshDecision::Clear
    } else {
        RefreshDecision::Keep
    }
}

/// User interaction that counts as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    Pointer,
    Keyboard,
    Scroll,
    Touch,
    Focus,
}
