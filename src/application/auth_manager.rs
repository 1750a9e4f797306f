//! Access-token lifecycle: acquisition, silent renewal, background refresh
//! and revocation.
//!
//! Refresh failures never propagate as errors. A missing token simply means
//! "offline" to callers.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;

use crate::domain::auth::ACTIVITY_THROTTLE_SECS;
use crate::domain::{
    refresh_decision, ActivitySignal, AppError, AuthEvent, AuthPhase, RefreshDecision, Result,
    TokenState,
};
use crate::infrastructure::{AccessTokenSource, IdentityProvider, TokenStore};

use super::scheduler::PeriodicTask;

/// Marks the end of a refresh attempt this caller started. Joiners are woken
/// on drop; an attempt dropped before completion rolls the phase back.
struct RefreshAttempt<'a> {
    manager: &'a AuthTokenManager,
    completed: bool,
}

impl Drop for RefreshAttempt<'_> {
    fn drop(&mut self) {
        if !self.completed {
            tracing::debug!("Token refresh abandoned before completion");
            if let Ok(mut phase) = self.manager.phase() {
                if let Ok(next) = phase.clone().apply(AuthEvent::RefreshAbandoned) {
                    *phase = next;
                }
            }
        }
        self.manager
            .refresh_done
            .send_modify(|generation| *generation += 1);
    }
}

/// Owns the token state machine.
pub struct AuthTokenManager {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn TokenStore>,
    phase: Mutex<AuthPhase>,
    /// Bumped after every finished refresh attempt; joiners wait on it.
    refresh_done: watch::Sender<u64>,
    refresh_timeout: Duration,
}

impl AuthTokenManager {
    /// Create a manager in the unauthenticated phase.
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn TokenStore>,
        refresh_timeout: Duration,
    ) -> Self {
        let (refresh_done, _) = watch::channel(0);
        Self {
            provider,
            store,
            phase: Mutex::new(AuthPhase::Unauthenticated),
            refresh_done,
            refresh_timeout,
        }
    }

    fn phase(&self) -> Result<MutexGuard<'_, AuthPhase>> {
        self.phase.lock().map_err(|_| AppError::InvalidData {
            message: "auth state lock poisoned".into(),
        })
    }

    /// Apply `event` to the current phase.
    fn transition(&self, event: AuthEvent) -> Result<()> {
        let mut phase = self.phase()?;
        let next = phase.clone().apply(event)?;
        tracing::debug!(from = %*phase, to = %next, "Auth phase transition");
        *phase = next;
        Ok(())
    }

    /// Load a persisted token. Returns whether it is currently usable.
    pub fn restore(&self) -> Result<bool> {
        if let Some(token) = self.store.load()? {
            self.transition(AuthEvent::Granted(token))?;
        }
        Ok(self.is_authenticated())
    }

    /// A token exists and is outside the expiry buffer.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.valid_token().is_some()
    }

    /// Snapshot of the current phase.
    pub fn current_phase(&self) -> Result<AuthPhase> {
        Ok(self.phase()?.clone())
    }

    fn valid_token(&self) -> Option<String> {
        let phase = self.phase().ok()?;
        phase
            .token()
            .filter(|t| t.is_valid_at(Utc::now()))
            .map(|t| t.access_token.clone())
    }

    /// Acquire a token on explicit user request.
    ///
    /// # Errors
    /// Returns the provider's error; the phase is left unchanged.
    pub async fn authorize(&self) -> Result<()> {
        let grant = self.provider.authorize().await?;
        let token = TokenState::granted(grant.access_token, grant.expires_in, Utc::now());

        self.store.save(&token)?;
        self.transition(AuthEvent::Granted(token))?;

        tracing::info!("Authorized with identity provider");
        Ok(())
    }

    /// Current token, renewing silently if it has expired. `None` means the
    /// caller should behave as offline.
    pub async fn get_token(&self) -> Option<String> {
        if let Some(token) = self.valid_token() {
            return Some(token);
        }
        self.refresh_silently().await
    }

    /// Renew the token without user interaction.
    ///
    /// Concurrent callers share the in-flight attempt instead of issuing
    /// their own request. Joiners wait at most the refresh timeout.
    pub async fn refresh_silently(&self) -> Option<String> {
        let mut done = self.refresh_done.subscribe();

        let started = {
            let Ok(mut phase) = self.phase() else {
                return None;
            };
            match phase.clone().apply(AuthEvent::RefreshStarted) {
                Ok(next) => {
                    *phase = next;
                    true
                }
                Err(_) => false,
            }
        };

        if !started {
            tracing::debug!("Joining in-flight token refresh");
            if tokio::time::timeout(self.refresh_timeout, done.changed())
                .await
                .is_err()
            {
                tracing::warn!("Timed out waiting for in-flight token refresh");
            }
            return self.valid_token();
        }

        let mut attempt = RefreshAttempt {
            manager: self,
            completed: false,
        };
        let outcome = tokio::time::timeout(self.refresh_timeout, self.provider.refresh()).await;
        attempt.completed = true;
        let refreshed = match outcome {
            Ok(Ok(grant)) => Some(TokenState::granted(
                grant.access_token,
                grant.expires_in,
                Utc::now(),
            )),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Silent token refresh failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.refresh_timeout.as_millis(),
                    "Silent token refresh timed out"
                );
                None
            }
        };

        let event = refreshed
            .clone()
            .map_or(AuthEvent::RefreshFailed, AuthEvent::RefreshSucceeded);
        if let Err(e) = self.transition(event) {
            // cleared (logout) while the request was in flight
            tracing::debug!(error = %e, "Discarding refresh result");
            return None;
        }

        let persisted = match &refreshed {
            Some(token) => self.store.save(token),
            None => self.store.clear(),
        };
        if let Err(e) = persisted {
            tracing::error!(error = %e, "Failed to persist token state");
        }
        drop(attempt);

        if refreshed.is_some() {
            tracing::info!("Access token refreshed");
        }
        refreshed.map(|t| t.access_token)
    }

    /// One pass of the background check: refresh for active users near
    /// expiry, drop expired tokens of idle users.
    pub async fn run_refresh_check(&self) -> RefreshDecision {
        let decision = {
            let Ok(phase) = self.phase() else {
                return RefreshDecision::Keep;
            };
            if phase.is_refreshing() {
                return RefreshDecision::Keep;
            }
            refresh_decision(phase.token(), Utc::now())
        };

        match decision {
            RefreshDecision::Refresh => {
                tracing::debug!("Token near expiry and user active; refreshing");
                self.refresh_silently().await;
            }
            RefreshDecision::Clear => {
                tracing::info!("Token expired while idle; clearing");
                if let Err(e) = self.clear() {
                    tracing::error!(error = %e, "Failed to clear token");
                }
            }
            RefreshDecision::Keep => {}
        }

        decision
    }

    /// Note user activity. Persists at most once per throttle window.
    /// Returns whether the activity instant was written.
    pub fn record_activity(&self, signal: ActivitySignal) -> bool {
        let now = Utc::now();
        let Ok(mut phase) = self.phase() else {
            return false;
        };

        let AuthPhase::Authenticated(token) = &mut *phase else {
            return false;
        };
        if now - token.last_activity < chrono::Duration::seconds(ACTIVITY_THROTTLE_SECS) {
            return false;
        }

        token.last_activity = now;
        drop(phase);

        tracing::trace!(?signal, "Recorded user activity");
        match self.store.save_activity(now) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist activity");
                false
            }
        }
    }

    /// Drop the token locally without contacting the provider.
    pub fn clear(&self) -> Result<()> {
        self.transition(AuthEvent::Cleared)?;
        self.store.clear()
    }

    /// Revoke the token at the provider (best effort) and clear it.
    pub async fn logout(&self) -> Result<()> {
        let token = self
            .phase()?
            .token()
            .map(|t| t.access_token.clone());

        self.clear()?;

        if let Some(token) = token {
            if let Err(e) = self.provider.revoke(&token).await {
                tracing::warn!(error = %e, "Token revocation failed");
            }
        }

        tracing::info!("Logged out");
        Ok(())
    }

    /// Start the periodic token check.
    pub fn start_background(self: &Arc<Self>, period: Duration) -> PeriodicTask {
        let manager = Arc::clone(self);
        PeriodicTask::spawn("token-refresh", period, move || {
            let manager = Arc::clone(&manager);
            async move {
                manager.run_refresh_check().await;
            }
        })
    }
}

#[async_trait]
impl AccessTokenSource for AuthTokenManager {
    async fn access_token(&self) -> Option<String> {
        self.get_token().await
    }
}
