//! PIN-lock cloud adapter.
//!
//! Every request is signed: `HMAC-SHA256(secret, client_id + access_token + t
//! + string_to_sign)`, upper-case hex, where `string_to_sign` is
//! `METHOD\nsha256(body)\n\npath`. The token request itself is signed the same
//! way with an empty access token.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use doorkeep_core::{mask_code, LockAdapter, ValidityWindow};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{VendorError, VendorResult};
use crate::http::{client, ensure_success, id_field};

const SERVICE: &str = "tuya";

/// Token errors the cloud reports inside a 200 response.
const TOKEN_INVALID_CODES: [i64; 2] = [1010, 1011];

type HmacSha256 = Hmac<Sha256>;

/// Credentials for the PIN-lock cloud.
#[derive(Debug, Clone)]
pub struct TuyaConfig {
    pub client_id: String,
    pub secret: String,
    pub api_url: String,
}

impl TuyaConfig {
    pub const DEFAULT_API_URL: &'static str = "https://openapi.tuyaeu.com";
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_expired(&self, grace: ChronoDuration) -> bool {
        Utc::now() + grace >= self.expires_at
    }
}

/// Temporary passwords on PIN locks.
pub struct TuyaPinLockAdapter {
    config: TuyaConfig,
    http: Client,
    token: Mutex<Option<CachedToken>>,
    grace: ChronoDuration,
}

impl TuyaPinLockAdapter {
    pub fn new(config: TuyaConfig, timeout: Duration) -> Self {
        Self {
            config,
            http: client(timeout),
            token: Mutex::new(None),
            grace: ChronoDuration::minutes(5),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn sign(
        &self,
        method: &Method,
        path: &str,
        body: &str,
        access_token: &str,
        t: &str,
    ) -> VendorResult<String> {
        let content_hash = hex::encode(Sha256::digest(body.as_bytes()));
        let string_to_sign = format!("{}\n{content_hash}\n\n{path}", method.as_str());
        let payload = format!(
            "{}{access_token}{t}{string_to_sign}",
            self.config.client_id
        );

        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.config.secret.as_bytes())
            .map_err(|e| VendorError::Auth {
                service: SERVICE,
                message: e.to_string(),
            })?;
        mac.update(payload.as_bytes());
        Ok(hex::encode_upper(mac.finalize().into_bytes()))
    }

    /// Cached access token, fetched again inside the grace period.
    async fn access_token(&self) -> VendorResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.is_expired(self.grace) {
                return Ok(token.access_token.clone());
            }
        }

        debug!("Fetching PIN-lock cloud token");
        let path = "/v1.0/token?grant_type=1";
        let t = Utc::now().timestamp_millis().to_string();
        let sign = self.sign(&Method::GET, path, "", "", &t)?;

        let response = self
            .http
            .get(self.url(path))
            .header("client_id", &self.config.client_id)
            .header("sign", sign)
            .header("t", &t)
            .header("sign_method", "HMAC-SHA256")
            .send()
            .await?;
        let envelope: Value = ensure_success(SERVICE, response).await?.json().await?;
        let result = unwrap_envelope(envelope).map_err(|e| VendorError::Auth {
            service: SERVICE,
            message: e.to_string(),
        })?;

        let access_token = result
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| VendorError::Auth {
                service: SERVICE,
                message: "token response has no access_token".to_string(),
            })?
            .to_string();
        let expires_in = result
            .get("expire_time")
            .and_then(Value::as_i64)
            .unwrap_or(7200);

        *cached = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in),
        });
        info!(expires_in, "PIN-lock cloud token refreshed");
        Ok(access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Signed business request; returns the envelope's `result`.
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> VendorResult<Value> {
        let token = self.access_token().await?;
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let t = Utc::now().timestamp_millis().to_string();
        let sign = self.sign(&method, path, &body, &token, &t)?;

        let mut request = self
            .http
            .request(method, self.url(path))
            .header("client_id", &self.config.client_id)
            .header("access_token", &token)
            .header("sign", sign)
            .header("t", &t)
            .header("sign_method", "HMAC-SHA256");
        if !body.is_empty() {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = ensure_success(SERVICE, request.send().await?).await?;
        let envelope: Value = response.json().await?;
        if envelope
            .get("code")
            .and_then(Value::as_i64)
            .is_some_and(|code| TOKEN_INVALID_CODES.contains(&code))
        {
            self.invalidate_token().await;
        }
        unwrap_envelope(envelope)
    }

    async fn create_password(
        &self,
        device_id: &str,
        code: &str,
        window: &ValidityWindow,
        label: &str,
    ) -> VendorResult<String> {
        let body = json!({
            "name": label,
            "password": code,
            "effective_time": window.start_timestamp(),
            "invalid_time": window.end_timestamp(),
        });
        let result = self
            .request(
                Method::POST,
                &format!("/v1.0/devices/{device_id}/door-lock/temp-password"),
                Some(body),
            )
            .await?;

        id_field(&result, &["id"]).ok_or_else(|| VendorError::Rejected {
            service: SERVICE,
            message: "response has no password id".to_string(),
        })
    }

    async fn delete_password(&self, device_id: &str, password_id: &str) -> VendorResult<()> {
        let path = format!("/v1.0/devices/{device_id}/door-lock/temp-passwords/{password_id}");
        match self.request(Method::DELETE, &path, None).await {
            Ok(_) => Ok(()),
            Err(VendorError::Status {
                status: StatusCode::NOT_FOUND,
                ..
            }) => {
                debug!(device_id, password_id, "Password already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn unwrap_envelope(envelope: Value) -> VendorResult<Value> {
    if envelope.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(envelope.get("result").cloned().unwrap_or(Value::Null));
    }
    let message = envelope
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or("success=false")
        .to_string();
    Err(VendorError::Rejected {
        service: SERVICE,
        message,
    })
}

#[async_trait]
impl LockAdapter for TuyaPinLockAdapter {
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
        match self.create_password(device_id, code, window, label).await {
            Ok(password_id) => {
                info!(%password_id, code = %mask_code(code), "Temporary password created");
                Some(password_id)
            }
            Err(e) => {
                warn!(error = %e, "Temporary password not created");
                None
            }
        }
    }

    #[instrument(skip(self))]
    async fn revoke(&self, device_id: &str, external_id: &str) -> bool {
        match self.delete_password(device_id, external_id).await {
            Ok(()) => {
                info!("Temporary password deleted");
                true
            }
            Err(e) => {
                warn!(error = %e, "Temporary password not deleted");
                false
            }
        }
    }
}
