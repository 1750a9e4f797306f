//! OAuth 2.0 identity provider client.
//!
//! Silent renewal uses the refresh-token grant against the configured token
//! endpoint. Interactive consent happens outside this process; `authorize`
//! exchanges the refresh token obtained there.

use async_trait::async_trait;
use chrono::Duration;
use serde::Deserialize;

use crate::domain::{AppError, AuthConfig, Result};

/// Freshly issued access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: Duration,
}

/// Issues, renews and revokes access tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Acquire a token on explicit user request.
    async fn authorize(&self) -> Result<TokenGrant>;

    /// Renew without user interaction.
    async fn refresh(&self) -> Result<TokenGrant>;

    /// Invalidate a token at the provider.
    async fn revoke(&self, access_token: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

const fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Google OAuth token-endpoint client.
pub struct GoogleOAuthClient {
    http: reqwest::Client,
    config: AuthConfig,
}

impl GoogleOAuthClient {
    #[must_use]
    pub const fn new(http: reqwest::Client, config: AuthConfig) -> Self {
        Self { http, config }
    }

    async fn refresh_grant(&self) -> Result<TokenGrant> {
        let refresh_token = self
            .config
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(AppError::NotAuthenticated)?;

        if self.config.client_id.is_empty() {
            return Err(AppError::Config {
                message: "auth.client_id is not set".into(),
            });
        }

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        tracing::debug!(endpoint = %self.config.token_endpoint, "Requesting access token");

        let response = self
            .http
            .post(&self.config.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(AppError::network)?;

        let status = response.status();
        let text = response.text().await.map_err(AppError::network)?;

        if !status.is_success() {
            let message = serde_json::from_str::<TokenErrorResponse>(&text).map_or_else(
                |_| text.clone(),
                |e| match e.error_description {
                    Some(desc) => format!("{}: {desc}", e.error),
                    None => e.error,
                },
            );
            return Err(AppError::RemoteStatus {
                status: status.as_u16(),
                message,
            });
        }

        let token: TokenResponse = serde_json::from_str(&text).map_err(AppError::json_parse)?;
        Ok(TokenGrant {
            access_token: token.access_token,
            expires_in: Duration::seconds(token.expires_in),
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleOAuthClient {
    async fn authorize(&self) -> Result<TokenGrant> {
        self.refresh_grant().await.map_err(|e| match e {
            AppError::NotAuthenticated => AppError::Config {
                message: "no refresh token configured; set auth.refresh_token or CHAT_SYNC_REFRESH_TOKEN".into(),
            },
            other => other,
        })
    }

    async fn refresh(&self) -> Result<TokenGrant> {
        self.refresh_grant().await
    }

    async fn revoke(&self, access_token: &str) -> Result<()> {
        let response = self
            .http
            .post(&self.config.revoke_endpoint)
            .form(&[("token", access_token)])
            .send()
            .await
            .map_err(AppError::network)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AppError::RemoteStatus {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }
}
