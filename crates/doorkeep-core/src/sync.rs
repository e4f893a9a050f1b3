//! Booking sync from the upstream property-management system.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::SyncError;
use crate::model::{BookingStatus, Guest, Language, NewBooking};
use crate::notify::{AdminMessage, Notifier};
use crate::store::Store;
use crate::window::ToUtc;

/// Lists reservations from the upstream system.
///
/// Records are returned raw so one malformed entry cannot fail the batch.
#[async_trait]
pub trait BookingSource: Send + Sync {
    /// Whether credentials are present. An unconfigured source makes a sync
    /// pass a no-op.
    fn is_configured(&self) -> bool {
        true
    }

    async fn list_reservations(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Value>>;
}

/// Counts from one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub new: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Upstream status vocabulary to internal status.
///
/// Unknown values map to `confirmed`.
pub fn map_upstream_status(status: &str) -> BookingStatus {
    match status.trim().to_ascii_lowercase().as_str() {
        "confirmed" | "reserved" | "tentative" => BookingStatus::Confirmed,
        "checked_in" => BookingStatus::CheckedIn,
        "checked_out" => BookingStatus::CheckedOut,
        "cancelled" => BookingStatus::Cancelled,
        other => {
            debug!(status = other, "Unmapped upstream status, using confirmed");
            BookingStatus::Confirmed
        }
    }
}

/// Defaults applied to fields upstream records may omit.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub property_id: String,
    /// How many days ahead to pull.
    pub horizon_days: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            property_id: "default".to_string(),
            horizon_days: 90,
        }
    }
}

/// Map one raw upstream record onto a booking.
pub fn parse_reservation(record: &Value, config: &SyncConfig) -> Result<NewBooking> {
    let upstream_id = ["id", "booking_id"]
        .iter()
        .find_map(|key| match record.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| anyhow!("record has no id"))?;

    let guest = record.get("guest").cloned().unwrap_or(Value::Null);
    let text = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(str::to_string);

    let checkin = parse_instant(record.get("arrival")).context("invalid arrival")?;
    let checkout = parse_instant(record.get("departure")).context("invalid departure")?;
    if checkout <= checkin {
        return Err(anyhow!("departure {checkout} is not after arrival {checkin}"));
    }

    let num_guests = match record.get("people").and_then(Value::as_i64) {
        None => 1,
        Some(n) => i32::try_from(n)
            .ok()
            .filter(|n| (1..=NewBooking::MAX_GUESTS).contains(n))
            .ok_or_else(|| anyhow!("guest count {n} outside 1..={}", NewBooking::MAX_GUESTS))?,
    };

    Ok(NewBooking {
        upstream_id: Some(upstream_id),
        confirmation_code: text(record, "confirmation_code"),
        guest: Guest {
            name: text(&guest, "name").unwrap_or_else(|| "Guest".to_string()),
            email: text(&guest, "email").unwrap_or_default(),
            phone: text(&guest, "phone").unwrap_or_default(),
            language: text(&guest, "language")
                .map(|l| Language::parse_lenient(&l))
                .unwrap_or_default(),
        },
        property_id: config.property_id.clone(),
        checkin,
        checkout,
        num_guests,
        status: record
            .get("status")
            .and_then(Value::as_str)
            .map(map_upstream_status)
            .unwrap_or(BookingStatus::Confirmed),
    })
}

/// RFC 3339, naive `YYYY-MM-DDTHH:MM:SS` (UTC), or a bare date (midnight UTC).
fn parse_instant(value: Option<&Value>) -> Result<DateTime<Utc>> {
    let s = value
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing"))?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.to_utc());
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("'{s}'"))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("'{s}' has no midnight"))?;
    Ok(midnight.to_utc())
}

/// Pulls upstream reservations into the booking store.
pub struct BookingSync {
    source: Arc<dyn BookingSource>,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    config: SyncConfig,
}

enum Upserted {
    Inserted,
    Updated,
}

impl BookingSync {
    pub fn new(
        source: Arc<dyn BookingSource>,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            store,
            notifier,
            config,
        }
    }

    /// Upsert every reservation in `[today, today + horizon]`.
    ///
    /// Idempotent: bookings are keyed by upstream id, and a local status is
    /// never moved backwards.
    #[instrument(skip(self))]
    pub async fn sync_bookings(&self, now: DateTime<Utc>) -> Result<SyncSummary, SyncError> {
        if !self.source.is_configured() {
            warn!("Upstream booking source not configured, skipping sync");
            return Ok(SyncSummary::default());
        }

        let start = now.date_naive();
        let end = (now + Duration::days(self.config.horizon_days)).date_naive();
        let records = match self.source.list_reservations(start, end).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Upstream booking fetch failed");
                self.notifier
                    .notify_admin(&AdminMessage::error("Booking sync failed", &e))
                    .await;
                return Err(SyncError::Fetch(e));
            }
        };

        let mut summary = SyncSummary::default();
        for record in &records {
            let booking = match parse_reservation(record, &self.config) {
                Ok(booking) => booking,
                Err(e) => {
                    warn!(error = %e, record = %record, "Skipping malformed upstream record");
                    summary.skipped += 1;
                    continue;
                }
            };
            match self.upsert(booking).await? {
                Upserted::Inserted => summary.new += 1,
                Upserted::Updated => summary.updated += 1,
            }
        }

        info!(
            new = summary.new,
            updated = summary.updated,
            skipped = summary.skipped,
            "Booking sync complete"
        );
        if !records.is_empty() {
            let delivered = self
                .notifier
                .notify_admin(&AdminMessage::SyncPass {
                    new: summary.new,
                    updated: summary.updated,
                    skipped: summary.skipped,
                })
                .await;
            if !delivered {
                warn!("Admin notification could not be delivered");
            }
        }
        Ok(summary)
    }

    async fn upsert(&self, mut booking: NewBooking) -> Result<Upserted> {
        let upstream_id = booking.upstream_id.clone().unwrap_or_default();
        let Some(existing) = self.store.find_booking_by_upstream_id(&upstream_id).await? else {
            self.store.insert_booking(booking).await?;
            return Ok(Upserted::Inserted);
        };

        if !existing.status.accepts_upstream(booking.status) {
            debug!(
                booking_id = %existing.id,
                local = %existing.status,
                upstream = %booking.status,
                "Keeping further-advanced local status"
            );
            booking.status = existing.status;
        }
        self.store
            .update_booking_from_upstream(existing.id, &booking)
            .await?;
        Ok(Upserted::Updated)
    }
}
