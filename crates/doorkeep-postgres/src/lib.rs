//! PostgreSQL implementation of the doorkeep store.
//!
//! This crate provides the production [`Store`] for bookings, lock devices
//! and access codes.
//!
//! # Features
//!
//! - Row-scoped writes: every update targets one row by primary key
//! - Guarded transitions (`codes_provisioned` false→true, code `active`→`revoked`)
//!   so concurrent passes cannot double-apply
//! - Partial indexes behind both selectors
//! - Embedded migrations
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE bookings (
//!     id UUID PRIMARY KEY,
//!     upstream_id TEXT UNIQUE,
//!     confirmation_code TEXT,
//!
//!     -- Guest
//!     guest_name TEXT NOT NULL,
//!     guest_email TEXT NOT NULL DEFAULT '',
//!     guest_phone TEXT NOT NULL DEFAULT '',
//!     guest_language TEXT NOT NULL DEFAULT 'en',
//!
//!     -- Stay
//!     property_id TEXT NOT NULL,
//!     checkin_date TIMESTAMPTZ NOT NULL,
//!     checkout_date TIMESTAMPTZ NOT NULL,
//!     num_guests INTEGER NOT NULL DEFAULT 1,
//!     status TEXT NOT NULL DEFAULT 'confirmed',
//!
//!     -- Provisioning
//!     codes_provisioned BOOLEAN NOT NULL DEFAULT FALSE,
//!     codes_provisioned_at TIMESTAMPTZ,
//!     guest_token TEXT UNIQUE,
//!
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE TABLE lock_devices (
//!     id UUID PRIMARY KEY,
//!     property_id TEXT NOT NULL,
//!     device_id TEXT NOT NULL,
//!     device_name TEXT NOT NULL,
//!     lock_type TEXT NOT NULL,
//!     is_active BOOLEAN NOT NULL DEFAULT TRUE,
//!     display_name_it TEXT,
//!     display_name_en TEXT,
//!     display_order INTEGER NOT NULL DEFAULT 0
//! );
//!
//! CREATE TABLE access_codes (
//!     id UUID PRIMARY KEY,
//!     booking_id UUID NOT NULL REFERENCES bookings (id),
//!     lock_id UUID NOT NULL REFERENCES lock_devices (id),
//!     device_id TEXT NOT NULL,
//!     device_class TEXT NOT NULL,
//!     lock_name TEXT NOT NULL,
//!     code TEXT NOT NULL,
//!     valid_from TIMESTAMPTZ NOT NULL,
//!     valid_until TIMESTAMPTZ NOT NULL,
//!     status TEXT NOT NULL,
//!     sync_status TEXT NOT NULL,
//!     external_id TEXT,
//!     revoked_at TIMESTAMPTZ,
//!     revoked_reason TEXT,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```
//!
//! The full DDL, with check constraints and indexes, lives in `migrations/`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use doorkeep_postgres::PgStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/doorkeep").await?;
//! let store = PgStore::new(pool);
//! store.migrate().await?;
//!
//! let orchestrator = Orchestrator::new(Arc::new(store), adapters, notifier, config);
//! ```

use std::collections::HashSet;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use doorkeep_core::{
    AccessCode, Booking, BookingStatus, CodeStatus, DeviceClass, DisplayNames, DueRevocation,
    Guest, Language, LockDevice, LockType, NewAccessCode, NewBooking, RevocationReason, Store,
    SyncStatus, VendorRef,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

const BOOKING_COLUMNS: &str = "id, upstream_id, confirmation_code, guest_name, guest_email, \
     guest_phone, guest_language, property_id, checkin_date, checkout_date, num_guests, status, \
     codes_provisioned, codes_provisioned_at, guest_token, created_at";

const CODE_COLUMNS: &str = "id, booking_id, lock_id, device_id, device_class, lock_name, code, \
     valid_from, valid_until, status, sync_status, external_id, revoked_at, revoked_reason, \
     created_at";

/// PostgreSQL store implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("running migrations")?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_booking(&self, booking: NewBooking) -> Result<Booking> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO bookings (
                id, upstream_id, confirmation_code,
                guest_name, guest_email, guest_phone, guest_language,
                property_id, checkin_date, checkout_date, num_guests, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&booking.upstream_id)
        .bind(&booking.confirmation_code)
        .bind(&booking.guest.name)
        .bind(&booking.guest.email)
        .bind(&booking.guest.phone)
        .bind(booking.guest.language.as_str())
        .bind(&booking.property_id)
        .bind(booking.checkin)
        .bind(booking.checkout)
        .bind(booking.num_guests)
        .bind(booking.status.as_str())
        .fetch_one(&self.pool)
        .await?;

        booking_from_row(&row)
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(booking_from_row).transpose()
    }

    async fn find_booking_by_upstream_id(&self, upstream_id: &str) -> Result<Option<Booking>> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE upstream_id = $1"
        ))
        .bind(upstream_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(booking_from_row).transpose()
    }

    async fn update_booking_from_upstream(&self, id: Uuid, booking: &NewBooking) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE bookings
            SET confirmation_code = $1,
                guest_name = $2,
                guest_email = $3,
                guest_phone = $4,
                guest_language = $5,
                property_id = $6,
                checkin_date = $7,
                checkout_date = $8,
                num_guests = $9,
                status = $10,
                updated_at = NOW()
            WHERE id = $11
            "#,
        )
        .bind(&booking.confirmation_code)
        .bind(&booking.guest.name)
        .bind(&booking.guest.email)
        .bind(&booking.guest.phone)
        .bind(booking.guest.language.as_str())
        .bind(&booking.property_id)
        .bind(booking.checkin)
        .bind(booking.checkout)
        .bind(booking.num_guests)
        .bind(booking.status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_booking_status(&self, id: Uuid, status: BookingStatus) -> Result<()> {
        sqlx::query("UPDATE bookings SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn set_guest_token(&self, id: Uuid, token: &str) -> Result<()> {
        sqlx::query("UPDATE bookings SET guest_token = $1, updated_at = NOW() WHERE id = $2")
            .bind(token)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Conditional on the flag still being false, so two racing passes
    /// cannot both claim the booking.
    async fn mark_codes_provisioned(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET codes_provisioned = TRUE,
                codes_provisioned_at = $1,
                updated_at = NOW()
            WHERE id = $2 AND codes_provisioned = FALSE
            "#,
        )
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn advance_checked_out(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = 'checked_out',
                updated_at = NOW()
            WHERE status = 'checked_in'
              AND checkout_date < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn active_locks(&self, property_id: &str) -> Result<Vec<LockDevice>> {
        let rows = sqlx::query(
            r#"
            SELECT id, property_id, device_id, device_name, lock_type, is_active,
                   display_name_it, display_name_en, display_order
            FROM lock_devices
            WHERE property_id = $1 AND is_active = TRUE
            ORDER BY display_order ASC
            "#,
        )
        .bind(property_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(lock_from_row).collect()
    }

    async fn insert_access_code(&self, code: NewAccessCode) -> Result<AccessCode> {
        let row = code.into_code(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO access_codes (
                id, booking_id, lock_id, device_id, device_class, lock_name, code,
                valid_from, valid_until, status, sync_status, external_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(row.id)
        .bind(row.booking_id)
        .bind(row.lock_id)
        .bind(&row.device_id)
        .bind(row.device_class.as_str())
        .bind(&row.lock_name)
        .bind(&row.code)
        .bind(row.valid_from)
        .bind(row.valid_until)
        .bind(row.status.as_str())
        .bind(row.sync_status.as_str())
        .bind(row.vendor_ref.as_ref().map(VendorRef::external_id))
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;

        debug!(code_id = %row.id, device_id = %row.device_id, status = row.status.as_str(), "Access code stored");
        Ok(row)
    }

    async fn get_access_code(&self, id: Uuid) -> Result<Option<AccessCode>> {
        let row = sqlx::query(&format!(
            "SELECT {CODE_COLUMNS} FROM access_codes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(code_from_row).transpose()
    }

    async fn codes_for_booking(&self, booking_id: Uuid) -> Result<Vec<AccessCode>> {
        let rows = sqlx::query(&format!(
            "SELECT {CODE_COLUMNS} FROM access_codes WHERE booking_id = $1 ORDER BY created_at"
        ))
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(code_from_row).collect()
    }

    async fn active_code_values(&self, lock_ids: &[Uuid]) -> Result<HashSet<String>> {
        let rows = sqlx::query(
            "SELECT code FROM access_codes WHERE status = 'active' AND lock_id = ANY($1)",
        )
        .bind(lock_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("code").map_err(Into::into))
            .collect()
    }

    async fn mark_code_revoked(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        reason: RevocationReason,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE access_codes
            SET status = 'revoked',
                revoked_at = $1,
                revoked_reason = $2
            WHERE id = $3 AND status = 'active'
            "#,
        )
        .bind(at)
        .bind(reason.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn bookings_needing_codes(
        &self,
        now: DateTime<Utc>,
        lead: Duration,
    ) -> Result<Vec<Booking>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {BOOKING_COLUMNS}
            FROM bookings
            WHERE codes_provisioned = FALSE
              AND status IN ('confirmed', 'checked_in')
              AND checkin_date <= $1
              AND checkout_date > $2
              AND (
                  NOT EXISTS (
                      SELECT 1 FROM access_codes c WHERE c.booking_id = bookings.id
                  )
                  OR EXISTS (
                      SELECT 1 FROM lock_devices l
                      WHERE l.property_id = bookings.property_id
                        AND l.is_active
                        AND NOT EXISTS (
                            SELECT 1 FROM access_codes c
                            WHERE c.booking_id = bookings.id AND c.lock_id = l.id
                        )
                  )
              )
            ORDER BY checkin_date ASC
            "#
        ))
        .bind(now + lead)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(booking_from_row).collect()
    }

    async fn codes_to_revoke(
        &self,
        now: DateTime<Utc>,
        buffer_after: Duration,
    ) -> Result<Vec<DueRevocation>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.booking_id, c.lock_id, c.device_id, c.device_class, c.lock_name,
                   c.code, c.valid_from, c.valid_until, c.status, c.sync_status,
                   c.external_id, c.revoked_at, c.revoked_reason, c.created_at,
                   b.status AS booking_status, b.checkout_date AS booking_checkout
            FROM access_codes c
            JOIN bookings b ON b.id = c.booking_id
            WHERE c.status = 'active'
              AND (c.valid_until <= $1 OR b.status = 'cancelled' OR b.checkout_date <= $2)
            ORDER BY c.valid_until ASC
            "#,
        )
        .bind(now)
        .bind(now - buffer_after)
        .fetch_all(&self.pool)
        .await?;

        let mut due = Vec::with_capacity(rows.len());
        for row in &rows {
            let code = code_from_row(row)?;
            let booking_status: BookingStatus = parse(row, "booking_status")?;
            let checkout: DateTime<Utc> = row.try_get("booking_checkout")?;
            let access_ends = checkout + buffer_after;
            if let Some(reason) = DueRevocation::reason_for(&code, booking_status, access_ends, now)
            {
                due.push(DueRevocation { code, reason });
            }
        }
        Ok(due)
    }
}

/// Utility functions for operators.
impl PgStore {
    /// Counts for a quick health check.
    pub async fn stats(&self, now: DateTime<Utc>) -> Result<CodeStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM access_codes WHERE status = 'active') AS active,
                (SELECT COUNT(*) FROM access_codes WHERE status = 'revoked') AS revoked,
                (SELECT COUNT(*) FROM access_codes WHERE status = 'failed') AS failed,
                (SELECT COUNT(*) FROM access_codes
                    WHERE status = 'active' AND valid_until <= $1) AS overdue,
                (SELECT COUNT(*) FROM bookings
                    WHERE codes_provisioned = FALSE
                      AND status IN ('confirmed', 'checked_in')
                      AND checkout_date > $1) AS unprovisioned
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(CodeStats {
            active: row.try_get("active")?,
            revoked: row.try_get("revoked")?,
            failed: row.try_get("failed")?,
            overdue: row.try_get("overdue")?,
            unprovisioned_bookings: row.try_get("unprovisioned")?,
        })
    }
}

/// Access code statistics.
#[derive(Debug, Clone, Copy)]
pub struct CodeStats {
    pub active: i64,
    pub revoked: i64,
    pub failed: i64,
    /// Active past `valid_until`: revocations still owed.
    pub overdue: i64,
    /// Upcoming or in-progress stays without codes yet.
    pub unprovisioned_bookings: i64,
}

// ============================================================================
// Row mapping
// ============================================================================

fn parse<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: String| anyhow!("column {column}: {e}"))
}

fn booking_from_row(row: &PgRow) -> Result<Booking> {
    let language: String = row.try_get("guest_language")?;
    Ok(Booking {
        id: row.try_get("id")?,
        upstream_id: row.try_get("upstream_id")?,
        confirmation_code: row.try_get("confirmation_code")?,
        guest: Guest {
            name: row.try_get("guest_name")?,
            email: row.try_get("guest_email")?,
            phone: row.try_get("guest_phone")?,
            language: Language::parse_lenient(&language),
        },
        property_id: row.try_get("property_id")?,
        checkin: row.try_get("checkin_date")?,
        checkout: row.try_get("checkout_date")?,
        num_guests: row.try_get("num_guests")?,
        status: parse(row, "status")?,
        codes_provisioned: row.try_get("codes_provisioned")?,
        codes_provisioned_at: row.try_get("codes_provisioned_at")?,
        guest_token: row.try_get("guest_token")?,
        created_at: row.try_get("created_at")?,
    })
}

fn lock_from_row(row: &PgRow) -> Result<LockDevice> {
    Ok(LockDevice {
        id: row.try_get("id")?,
        property_id: row.try_get("property_id")?,
        device_id: row.try_get("device_id")?,
        device_name: row.try_get("device_name")?,
        lock_type: parse::<LockType>(row, "lock_type")?,
        is_active: row.try_get("is_active")?,
        display_names: DisplayNames {
            it: row.try_get("display_name_it")?,
            en: row.try_get("display_name_en")?,
        },
        display_order: row.try_get("display_order")?,
    })
}

fn code_from_row(row: &PgRow) -> Result<AccessCode> {
    let device_class: DeviceClass = parse(row, "device_class")?;
    let external_id: Option<String> = row.try_get("external_id")?;
    let revoked_reason = row
        .try_get::<Option<String>, _>("revoked_reason")?
        .map(|r| RevocationReason::from_str(&r).map_err(|e| anyhow!("column revoked_reason: {e}")))
        .transpose()?;

    Ok(AccessCode {
        id: row.try_get("id")?,
        booking_id: row.try_get("booking_id")?,
        lock_id: row.try_get("lock_id")?,
        device_id: row.try_get("device_id")?,
        device_class,
        lock_name: row.try_get("lock_name")?,
        code: row.try_get("code")?,
        valid_from: row.try_get("valid_from")?,
        valid_until: row.try_get("valid_until")?,
        status: parse::<CodeStatus>(row, "status")?,
        sync_status: parse::<SyncStatus>(row, "sync_status")?,
        vendor_ref: external_id.map(|id| VendorRef::for_class(device_class, id)),
        revoked_at: row.try_get("revoked_at")?,
        revoked_reason,
        created_at: row.try_get("created_at")?,
    })
}
