//! Admin alerts through a Telegram bot.

use std::time::Duration;

use async_trait::async_trait;
use doorkeep_core::AdminChannel;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::error::{VendorError, VendorResult};
use crate::http::{client, ensure_success};

const SERVICE: &str = "telegram";

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_url: String,
}

impl TelegramConfig {
    pub const DEFAULT_API_URL: &'static str = "https://api.telegram.org";
}

/// Posts every admin message to one chat.
pub struct TelegramChannel {
    config: TelegramConfig,
    http: Client,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig, timeout: Duration) -> Self {
        Self {
            config,
            http: client(timeout),
        }
    }

    async fn send_message(&self, text: &str) -> VendorResult<()> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.api_url.trim_end_matches('/'),
            self.config.bot_token
        );
        let response = self
            .http
            .post(url)
            .json(&json!({
                "chat_id": self.config.chat_id,
                "text": text,
                "parse_mode": "Markdown",
            }))
            .send()
            .await?;
        let body: Value = ensure_success(SERVICE, response).await?.json().await?;
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(VendorError::Rejected {
                service: SERVICE,
                message: body
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("ok=false")
                    .to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AdminChannel for TelegramChannel {
    #[instrument(skip(self, body))]
    async fn broadcast(&self, body: &str) -> bool {
        match self.send_message(body).await {
            Ok(()) => {
                debug!("Admin message sent");
                true
            }
            Err(e) => {
                warn!(error = %e, "Admin message not sent");
                false
            }
        }
    }
}
