//! Testing utilities for doorkeep.
//!
//! - [`InMemoryStore`]: a [`Store`] over concurrent maps, with an outage switch
//! - [`FakeLockAdapter`]: records calls, fails or stalls on chosen devices
//! - [`RecordingNotifier`]: keeps every guest and admin message
//! - [`StaticBookingSource`]: serves fixed upstream records
//! - [`fixtures`]: bookings and locks with sensible defaults

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use doorkeep_core::{
    has_pending_devices, needs_codes, AccessCode, AdminMessage, Booking, BookingSource,
    BookingStatus, CodeStatus, DueRevocation, GuestWelcome, LockAdapter, LockDevice,
    NewAccessCode, NewBooking, Notifier, RevocationReason, Store, ValidityWindow,
};

pub mod fixtures;

// ============================================================================
// Store
// ============================================================================

/// Store backed by in-process maps.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    bookings: Arc<DashMap<Uuid, Booking>>,
    locks: Arc<DashMap<Uuid, LockDevice>>,
    codes: Arc<DashMap<Uuid, AccessCode>>,
    unavailable: Arc<AtomicBool>,
    /// Access-code inserts still allowed before they start failing.
    code_insert_budget: Arc<Mutex<Option<usize>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_lock(&self, lock: LockDevice) {
        self.locks.insert(lock.id, lock);
    }

    pub fn add_booking(&self, booking: Booking) {
        self.bookings.insert(booking.id, booking);
    }

    pub fn add_code(&self, code: AccessCode) {
        self.codes.insert(code.id, code);
    }

    /// Make every operation fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Let `n` more access-code inserts through, then fail every one after.
    pub fn fail_code_inserts_after(&self, n: usize) {
        *self.code_insert_budget.lock().unwrap() = Some(n);
    }

    pub fn booking(&self, id: Uuid) -> Option<Booking> {
        self.bookings.get(&id).map(|b| b.clone())
    }

    pub fn bookings(&self) -> Vec<Booking> {
        self.bookings.iter().map(|b| b.clone()).collect()
    }

    pub fn code(&self, id: Uuid) -> Option<AccessCode> {
        self.codes.get(&id).map(|c| c.clone())
    }

    pub fn codes(&self) -> Vec<AccessCode> {
        self.codes.iter().map(|c| c.clone()).collect()
    }

    pub fn codes_with_status(&self, booking_id: Uuid, status: CodeStatus) -> Vec<AccessCode> {
        self.codes
            .iter()
            .filter(|c| c.booking_id == booking_id && c.status == status)
            .map(|c| c.clone())
            .collect()
    }

    fn locks_of(&self, property_id: &str) -> Vec<LockDevice> {
        self.locks
            .iter()
            .filter(|l| l.is_active && l.property_id == property_id)
            .map(|l| l.clone())
            .collect()
    }

    fn codes_of(&self, booking_id: Uuid) -> Vec<AccessCode> {
        self.codes
            .iter()
            .filter(|c| c.booking_id == booking_id)
            .map(|c| c.clone())
            .collect()
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_booking(&self, booking: NewBooking) -> Result<Booking> {
        self.check()?;
        if let Some(upstream_id) = &booking.upstream_id {
            if self
                .bookings
                .iter()
                .any(|b| b.upstream_id.as_ref() == Some(upstream_id))
            {
                bail!("duplicate upstream id {upstream_id}");
            }
        }
        let row = Booking {
            id: Uuid::new_v4(),
            upstream_id: booking.upstream_id,
            confirmation_code: booking.confirmation_code,
            guest: booking.guest,
            property_id: booking.property_id,
            checkin: booking.checkin,
            checkout: booking.checkout,
            num_guests: booking.num_guests,
            status: booking.status,
            codes_provisioned: false,
            codes_provisioned_at: None,
            guest_token: None,
            created_at: Utc::now(),
        };
        self.bookings.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>> {
        self.check()?;
        Ok(self.booking(id))
    }

    async fn find_booking_by_upstream_id(&self, upstream_id: &str) -> Result<Option<Booking>> {
        self.check()?;
        Ok(self
            .bookings
            .iter()
            .find(|b| b.upstream_id.as_deref() == Some(upstream_id))
            .map(|b| b.clone()))
    }

    async fn update_booking_from_upstream(&self, id: Uuid, booking: &NewBooking) -> Result<()> {
        self.check()?;
        let Some(mut row) = self.bookings.get_mut(&id) else {
            bail!("booking {id} not found");
        };
        row.confirmation_code = booking.confirmation_code.clone();
        row.guest = booking.guest.clone();
        row.property_id = booking.property_id.clone();
        row.checkin = booking.checkin;
        row.checkout = booking.checkout;
        row.num_guests = booking.num_guests;
        row.status = booking.status;
        Ok(())
    }

    async fn set_booking_status(&self, id: Uuid, status: BookingStatus) -> Result<()> {
        self.check()?;
        if let Some(mut row) = self.bookings.get_mut(&id) {
            row.status = status;
        }
        Ok(())
    }

    async fn set_guest_token(&self, id: Uuid, token: &str) -> Result<()> {
        self.check()?;
        if let Some(mut row) = self.bookings.get_mut(&id) {
            row.guest_token = Some(token.to_string());
        }
        Ok(())
    }

    async fn mark_codes_provisioned(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.check()?;
        let Some(mut row) = self.bookings.get_mut(&id) else {
            return Ok(false);
        };
        if row.codes_provisioned {
            return Ok(false);
        }
        row.codes_provisioned = true;
        row.codes_provisioned_at = Some(at);
        Ok(true)
    }

    async fn advance_checked_out(&self, now: DateTime<Utc>) -> Result<u64> {
        self.check()?;
        let mut moved = 0;
        for mut row in self.bookings.iter_mut() {
            if row.status == BookingStatus::CheckedIn && row.checkout < now {
                row.status = BookingStatus::CheckedOut;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn active_locks(&self, property_id: &str) -> Result<Vec<LockDevice>> {
        self.check()?;
        let mut locks = self.locks_of(property_id);
        locks.sort_by_key(|l| l.display_order);
        Ok(locks)
    }

    async fn insert_access_code(&self, code: NewAccessCode) -> Result<AccessCode> {
        self.check()?;
        if let Some(remaining) = self.code_insert_budget.lock().unwrap().as_mut() {
            if *remaining == 0 {
                bail!("access code insert rejected");
            }
            *remaining -= 1;
        }
        let row = code.into_code(Utc::now());
        self.codes.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_access_code(&self, id: Uuid) -> Result<Option<AccessCode>> {
        self.check()?;
        Ok(self.code(id))
    }

    async fn codes_for_booking(&self, booking_id: Uuid) -> Result<Vec<AccessCode>> {
        self.check()?;
        Ok(self.codes_of(booking_id))
    }

    async fn active_code_values(&self, lock_ids: &[Uuid]) -> Result<HashSet<String>> {
        self.check()?;
        Ok(self
            .codes
            .iter()
            .filter(|c| c.status == CodeStatus::Active && lock_ids.contains(&c.lock_id))
            .map(|c| c.code.clone())
            .collect())
    }

    async fn mark_code_revoked(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        reason: RevocationReason,
    ) -> Result<bool> {
        self.check()?;
        let Some(mut row) = self.codes.get_mut(&id) else {
            return Ok(false);
        };
        if row.status != CodeStatus::Active {
            return Ok(false);
        }
        row.status = CodeStatus::Revoked;
        row.revoked_at = Some(at);
        row.revoked_reason = Some(reason);
        Ok(true)
    }

    async fn bookings_needing_codes(
        &self,
        now: DateTime<Utc>,
        lead: Duration,
    ) -> Result<Vec<Booking>> {
        self.check()?;
        let mut due: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|b| needs_codes(b, now, lead))
            .filter(|b| {
                has_pending_devices(&self.locks_of(&b.property_id), &self.codes_of(b.id))
            })
            .map(|b| b.clone())
            .collect();
        due.sort_by_key(|b| b.checkin);
        Ok(due)
    }

    async fn codes_to_revoke(
        &self,
        now: DateTime<Utc>,
        buffer_after: Duration,
    ) -> Result<Vec<DueRevocation>> {
        self.check()?;
        let codes = self.codes();
        Ok(codes
            .into_iter()
            .filter_map(|code| {
                let (status, checkout) = self
                    .bookings
                    .get(&code.booking_id)
                    .map(|b| (b.status, b.checkout))?;
                let reason =
                    DueRevocation::reason_for(&code, status, checkout + buffer_after, now)?;
                Some(DueRevocation { code, reason })
            })
            .collect())
    }
}

// ============================================================================
// Lock adapter
// ============================================================================

/// A push as the fake adapter saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPush {
    pub device_id: String,
    pub code: String,
    pub window: ValidityWindow,
    pub label: String,
}

/// Scripted [`LockAdapter`].
#[derive(Default)]
pub struct FakeLockAdapter {
    name: String,
    failing_pushes: Mutex<HashSet<String>>,
    failing_revokes: Mutex<HashSet<String>>,
    stall: Mutex<Option<StdDuration>>,
    pushes: Mutex<Vec<RecordedPush>>,
    revokes: Mutex<Vec<(String, String)>>,
}

impl FakeLockAdapter {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            ..Default::default()
        })
    }

    /// Pushes to `device_id` return `None`.
    pub fn fail_pushes_on(&self, device_id: &str) {
        self.failing_pushes
            .lock()
            .unwrap()
            .insert(device_id.to_string());
    }

    /// Revokes on `device_id` return `false`.
    pub fn fail_revokes_on(&self, device_id: &str) {
        self.failing_revokes
            .lock()
            .unwrap()
            .insert(device_id.to_string());
    }

    pub fn heal_revokes(&self) {
        self.failing_revokes.lock().unwrap().clear();
    }

    /// Every call sleeps this long first.
    pub fn stall_for(&self, delay: StdDuration) {
        *self.stall.lock().unwrap() = Some(delay);
    }

    pub fn pushes(&self) -> Vec<RecordedPush> {
        self.pushes.lock().unwrap().clone()
    }

    /// `(device_id, external_id)` pairs.
    pub fn revokes(&self) -> Vec<(String, String)> {
        self.revokes.lock().unwrap().clone()
    }

    async fn maybe_stall(&self) {
        let delay = *self.stall.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl LockAdapter for FakeLockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(
        &self,
        device_id: &str,
        code: &str,
        window: &ValidityWindow,
        label: &str,
    ) -> Option<String> {
        self.maybe_stall().await;
        self.pushes.lock().unwrap().push(RecordedPush {
            device_id: device_id.to_string(),
            code: code.to_string(),
            window: *window,
            label: label.to_string(),
        });
        if self.failing_pushes.lock().unwrap().contains(device_id) {
            return None;
        }
        Some(format!("{}-{}-{}", self.name, device_id, Uuid::new_v4().simple()))
    }

    async fn revoke(&self, device_id: &str, external_id: &str) -> bool {
        self.maybe_stall().await;
        self.revokes
            .lock()
            .unwrap()
            .push((device_id.to_string(), external_id.to_string()));
        !self.failing_revokes.lock().unwrap().contains(device_id)
    }
}

// ============================================================================
// Notifier
// ============================================================================

/// Keeps every message instead of sending it.
pub struct RecordingNotifier {
    deliver_guest: AtomicBool,
    welcomes: Mutex<Vec<GuestWelcome>>,
    admin: Mutex<Vec<AdminMessage>>,
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self {
            deliver_guest: AtomicBool::new(true),
            welcomes: Mutex::new(Vec::new()),
            admin: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Guest sends report failure (still recorded).
    pub fn fail_guest_delivery(&self) {
        self.deliver_guest.store(false, Ordering::SeqCst);
    }

    pub fn welcomes(&self) -> Vec<GuestWelcome> {
        self.welcomes.lock().unwrap().clone()
    }

    pub fn admin_messages(&self) -> Vec<AdminMessage> {
        self.admin.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_guest_welcome(&self, welcome: &GuestWelcome) -> bool {
        self.welcomes.lock().unwrap().push(welcome.clone());
        self.deliver_guest.load(Ordering::SeqCst)
    }

    async fn notify_admin(&self, message: &AdminMessage) -> bool {
        self.admin.lock().unwrap().push(message.clone());
        true
    }
}

// ============================================================================
// Booking source
// ============================================================================

/// Serves a fixed list of raw records.
#[derive(Default)]
pub struct StaticBookingSource {
    records: Mutex<Vec<Value>>,
    failing: AtomicBool,
    configured: bool,
    requests: Mutex<Vec<(NaiveDate, NaiveDate)>>,
}

impl StaticBookingSource {
    pub fn new(records: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(records),
            configured: true,
            ..Default::default()
        })
    }

    pub fn unconfigured() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_records(&self, records: Vec<Value>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<(NaiveDate, NaiveDate)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BookingSource for StaticBookingSource {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn list_reservations(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Value>> {
        self.requests.lock().unwrap().push((start, end));
        if self.failing.load(Ordering::SeqCst) {
            bail!("upstream returned 503");
        }
        Ok(self.records.lock().unwrap().clone())
    }
}
