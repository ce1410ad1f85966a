//! OAuth token lifecycle for the ecobee API.
//!
//! Holds the rotating refresh token and a cached access token. All reads and
//! refreshes go through one async mutex, so a caller never observes a stale
//! token after a refresh has completed.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use ttr_core::error::{DecodeSnafu, ProviderError};
use ttr_core::model::AuthManager;

use snafu::ResultExt;

/// Tokens are considered stale this long before their actual expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

pub struct EcobeeAuth {
    client_id: String,
    token_url: String,
    http: reqwest::Client,
    state: Mutex<TokenState>,
}

struct TokenState {
    refresh_token: String,
    access_token: Option<String>,
    expires_at: Option<Instant>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: u64,
}

impl EcobeeAuth {
    pub fn new(
        client_id: String,
        refresh_token: String,
        token_url: String,
        http: reqwest::Client,
    ) -> Self {
        Self {
            client_id,
            token_url,
            http,
            state: Mutex::new(TokenState {
                refresh_token,
                access_token: None,
                expires_at: None,
            }),
        }
    }

    async fn refresh_locked(&self, state: &mut TokenState) -> Result<(), ProviderError> {
        let response = self
            .http
            .post(&self.token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .query(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", state.refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(|err| ProviderError::Transport {
                message: err.to_string(),
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(ProviderError::Auth {
                message: format!("token refresh failed with status {status}"),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| ProviderError::Transport {
                message: err.to_string(),
            })?;
        let token: TokenResponse =
            serde_json::from_slice(&body).context(DecodeSnafu { what: "token" })?;

        state.access_token = Some(token.access_token);
        state.expires_at = Some(Instant::now() + Duration::from_secs(token.expires_in));
        // The token endpoint may rotate the refresh token; keep the newest.
        if let Some(rotated) = token.refresh_token {
            if !rotated.is_empty() {
                state.refresh_token = rotated;
            }
        }

        Ok(())
    }

    fn valid_locked(state: &TokenState) -> bool {
        state.access_token.is_some()
            && state
                .expires_at
                .is_some_and(|at| Instant::now() + EXPIRY_MARGIN < at)
    }

    #[cfg(test)]
    fn seed_token(&self, token: &str, expires_in: Duration) {
        let mut state = self.state.try_lock().expect("state lock contended in test");
        state.access_token = Some(token.to_string());
        state.expires_at = Some(Instant::now() + expires_in);
    }
}

#[async_trait]
impl AuthManager for EcobeeAuth {
    async fn refresh(&self) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        let mut state = self.state.lock().await;

        if !Self::valid_locked(&state) {
            self.refresh_locked(&mut state).await?;
        }

        state
            .access_token
            .clone()
            .ok_or_else(|| ProviderError::Auth {
                message: "no access token after refresh".to_string(),
            })
    }

    async fn is_valid(&self) -> bool {
        let state = self.state.lock().await;
        Self::valid_locked(&state)
    }
}
