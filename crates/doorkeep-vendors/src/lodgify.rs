//! Upstream reservations from the property-management system.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use doorkeep_core::BookingSource;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::http::{client, ensure_success};

const SERVICE: &str = "lodgify";

#[derive(Debug, Clone)]
pub struct LodgifyConfig {
    pub api_key: String,
    pub property_id: String,
    pub api_url: String,
}

impl LodgifyConfig {
    pub const DEFAULT_API_URL: &'static str = "https://api.lodgify.com";
    pub const TIMEOUT: Duration = Duration::from_secs(30);
}

/// Lists reservations for one property.
pub struct LodgifySource {
    config: LodgifyConfig,
    http: Client,
}

impl LodgifySource {
    pub fn new(config: LodgifyConfig) -> Self {
        Self {
            config,
            http: client(LodgifyConfig::TIMEOUT),
        }
    }
}

#[async_trait]
impl BookingSource for LodgifySource {
    fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    #[instrument(skip(self))]
    async fn list_reservations(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Value>> {
        let response = self
            .http
            .get(format!(
                "{}/v2/reservations",
                self.config.api_url.trim_end_matches('/')
            ))
            .header("X-ApiKey", &self.config.api_key)
            .header(ACCEPT, "application/json")
            .query(&[
                ("property_id", self.config.property_id.clone()),
                ("start", start.to_string()),
                ("end", end.to_string()),
            ])
            .send()
            .await?;

        let body: Value = ensure_success(SERVICE, response).await?.json().await?;
        let records = match body {
            Value::Array(records) => records,
            Value::Object(mut page) => match page.remove("items") {
                Some(Value::Array(records)) => records,
                _ => return Err(anyhow!("reservation page has no items array")),
            },
            other => return Err(anyhow!("unexpected reservations payload: {other}")),
        };
        debug!(count = records.len(), "Reservations fetched");
        Ok(records)
    }
}
