//! Intercom adapter.
//!
//! Authenticates with a long-lived refresh token. Access tokens are cached and
//! refreshed five minutes before expiry; a rotated refresh token returned by
//! the token endpoint replaces the configured one for the rest of the process.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use doorkeep_core::{mask_code, LockAdapter, ValidityWindow};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{VendorError, VendorResult};
use crate::http::{client, ensure_success, id_field};

const SERVICE: &str = "ring";
const CLIENT_ID: &str = "ring_official_android";

/// Credentials for the intercom API.
#[derive(Debug, Clone)]
pub struct RingConfig {
    pub refresh_token: String,
    pub api_url: String,
}

impl RingConfig {
    pub const DEFAULT_API_URL: &'static str = "https://api.ring.com";
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    refresh_token: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

/// Where the adapter is in its token lifecycle.
#[derive(Debug, Clone)]
enum TokenState {
    /// Only the refresh token is known.
    Unauthenticated,
    Valid {
        access_token: String,
        expires_at: DateTime<Utc>,
    },
}

#[derive(Debug)]
struct Session {
    refresh_token: String,
    state: TokenState,
}

/// Time-boxed entry codes on intercoms.
pub struct RingIntercomAdapter {
    api_url: String,
    http: Client,
    session: Mutex<Session>,
    grace: ChronoDuration,
}

impl RingIntercomAdapter {
    pub fn new(config: RingConfig, timeout: Duration) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            http: client(timeout),
            session: Mutex::new(Session {
                refresh_token: config.refresh_token,
                state: TokenState::Unauthenticated,
            }),
            grace: ChronoDuration::minutes(5),
        }
    }

    /// Valid access token, refreshing under the session lock so concurrent
    /// callers share one refresh.
    async fn access_token(&self) -> VendorResult<String> {
        let mut session = self.session.lock().await;
        if let TokenState::Valid {
            access_token,
            expires_at,
        } = &session.state
        {
            if Utc::now() + self.grace < *expires_at {
                return Ok(access_token.clone());
            }
        }

        debug!("Refreshing intercom access token");
        let response = self
            .http
            .post(format!("{}/oauth/token", self.api_url))
            .json(&json!({
                "grant_type": "refresh_token",
                "refresh_token": session.refresh_token,
                "client_id": CLIENT_ID,
                "scope": "client",
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            session.state = TokenState::Unauthenticated;
            return Err(VendorError::Auth {
                service: SERVICE,
                message: format!("token refresh returned {status}: {body}"),
            });
        }

        let token: TokenResponse = response.json().await?;
        if let Some(rotated) = token.refresh_token.filter(|t| !t.is_empty()) {
            session.refresh_token = rotated;
        }
        session.state = TokenState::Valid {
            access_token: token.access_token.clone(),
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
        };
        info!(expires_in = token.expires_in, "Intercom access token refreshed");
        Ok(token.access_token)
    }

    async fn invalidate_token(&self) {
        self.session.lock().await.state = TokenState::Unauthenticated;
    }

    async fn create_code(
        &self,
        device_id: &str,
        code: &str,
        window: &ValidityWindow,
        label: &str,
    ) -> VendorResult<String> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!(
                "{}/clients_api/intercoms/{device_id}/codes",
                self.api_url
            ))
            .bearer_auth(token)
            .json(&json!({
                "description": label,
                "code": code,
                "starts_at": window.start_timestamp(),
                "ends_at": window.end_timestamp(),
                "enabled": true,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
        }
        let body: Value = ensure_success(SERVICE, response).await?.json().await?;
        id_field(&body, &["id", "code_id"]).ok_or_else(|| VendorError::Rejected {
            service: SERVICE,
            message: "response has no code id".to_string(),
        })
    }

    async fn delete_code(&self, device_id: &str, code_id: &str) -> VendorResult<()> {
        let token = self.access_token().await?;
        let response = self
            .http
            .delete(format!(
                "{}/clients_api/intercoms/{device_id}/codes/{code_id}",
                self.api_url
            ))
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(device_id, code_id, "Intercom code already gone");
                Ok(())
            }
            StatusCode::UNAUTHORIZED => {
                self.invalidate_token().await;
                ensure_success(SERVICE, response).await.map(|_| ())
            }
            _ => ensure_success(SERVICE, response).await.map(|_| ()),
        }
    }
}

#[async_trait]
impl LockAdapter for RingIntercomAdapter {
    fn name(&self) -> &str {
        SERVICE
    }

    #[instrument(skip(self, code, window, label))]
    async fn push(
        &self,
        device_id: &str,
        code: &str,
        window: &ValidityWindow,
        label: &str,
    ) -> Option<String> {
        match self.create_code(device_id, code, window, label).await {
            Ok(code_id) => {
                info!(%code_id, code = %mask_code(code), "Intercom code created");
                Some(code_id)
            }
            Err(e) => {
                warn!(error = %e, "Intercom code not created");
                None
            }
        }
    }

    #[instrument(skip(self))]
    async fn revoke(&self, device_id: &str, external_id: &str) -> bool {
        match self.delete_code(device_id, external_id).await {
            Ok(()) => {
                info!("Intercom code deleted");
                true
            }
            Err(e) => {
                warn!(error = %e, "Intercom code not deleted");
                false
            }
        }
    }
}
