//! Guest messaging over WhatsApp or SMS.

use std::time::Duration;

use async_trait::async_trait;
use doorkeep_core::GuestChannel;
use reqwest::Client;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::error::VendorResult;
use crate::http::{client, ensure_success};

const SERVICE: &str = "twilio";

/// Which messaging product a channel sends through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwilioKind {
    WhatsApp,
    Sms,
}

impl TwilioKind {
    fn address(&self, number: &str) -> String {
        match self {
            Self::WhatsApp if !number.starts_with("whatsapp:") => format!("whatsapp:{number}"),
            _ => number.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number, without any channel prefix.
    pub from: String,
    pub api_url: String,
}

impl TwilioConfig {
    pub const DEFAULT_API_URL: &'static str = "https://api.twilio.com";
}

/// One sender number on one product.
pub struct TwilioChannel {
    kind: TwilioKind,
    config: TwilioConfig,
    http: Client,
}

impl TwilioChannel {
    pub fn new(kind: TwilioKind, config: TwilioConfig, timeout: Duration) -> Self {
        Self {
            kind,
            config,
            http: client(timeout),
        }
    }

    pub fn whatsapp(config: TwilioConfig, timeout: Duration) -> Self {
        Self::new(TwilioKind::WhatsApp, config, timeout)
    }

    pub fn sms(config: TwilioConfig, timeout: Duration) -> Self {
        Self::new(TwilioKind::Sms, config, timeout)
    }

    async fn create_message(&self, to: &str, body: &str) -> VendorResult<String> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_url.trim_end_matches('/'),
            self.config.account_sid
        );
        let to = self.kind.address(to);
        let from = self.kind.address(&self.config.from);

        let response = self
            .http
            .post(url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[("To", to.as_str()), ("From", from.as_str()), ("Body", body)])
            .send()
            .await?;
        let message: Value = ensure_success(SERVICE, response).await?.json().await?;
        Ok(message
            .get("sid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl GuestChannel for TwilioChannel {
    fn name(&self) -> &str {
        match self.kind {
            TwilioKind::WhatsApp => "whatsapp",
            TwilioKind::Sms => "sms",
        }
    }

    #[instrument(skip(self, body), fields(channel = self.name()))]
    async fn send(&self, to: &str, body: &str) -> bool {
        match self.create_message(to, body).await {
            Ok(sid) => {
                info!(%sid, "Guest message sent");
                true
            }
            Err(e) => {
                warn!(error = %e, "Guest message not sent");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whatsapp_addresses_get_prefix_once() {
        assert_eq!(TwilioKind::WhatsApp.address("+39333"), "whatsapp:+39333");
        assert_eq!(TwilioKind::WhatsApp.address("whatsapp:+39333"), "whatsapp:+39333");
        assert_eq!(TwilioKind::Sms.address("+39333"), "+39333");
    }
}
