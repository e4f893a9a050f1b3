//! Booking, lock and access-code storage contract.
//!
//! The store is the only shared mutable state. Every write touches a single
//! row by primary key, so passes running side by side need no coordination
//! beyond what the conditional updates below provide.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::model::{
    AccessCode, Booking, BookingStatus, LockDevice, NewAccessCode, NewBooking, RevocationReason,
};

/// An active code the revocation selector picked, with the reason it is due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueRevocation {
    pub code: AccessCode,
    pub reason: RevocationReason,
}

impl DueRevocation {
    /// Reason a code is due at `now`, if any.
    ///
    /// `access_ends` is the booking's current checkout plus the after-buffer.
    /// A stay shortened upstream after provisioning leaves `valid_until` in
    /// the future, so expiry is whichever of the two comes first.
    ///
    /// Cancellation wins over expiry so the recorded reason says why the
    /// guest lost access.
    pub fn reason_for(
        code: &AccessCode,
        booking_status: BookingStatus,
        access_ends: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<RevocationReason> {
        if code.status != crate::model::CodeStatus::Active {
            return None;
        }
        if booking_status == BookingStatus::Cancelled {
            Some(RevocationReason::BookingCancelled)
        } else if code.valid_until.min(access_ends) <= now {
            Some(RevocationReason::Expired)
        } else {
            None
        }
    }
}

/// Whether a booking is due for its provisioning pass at `now`.
///
/// Check-in within `lead` of now (or already past), stay not over, not
/// cancelled, and never provisioned.
pub fn needs_codes(booking: &Booking, now: DateTime<Utc>, lead: Duration) -> bool {
    !booking.codes_provisioned
        && matches!(
            booking.status,
            BookingStatus::Confirmed | BookingStatus::CheckedIn
        )
        && booking.checkin <= now + lead
        && booking.checkout > now
}

/// Whether provisioning still has a device to push to: nothing recorded
/// for the booking yet, or an active lock with no row for it.
///
/// A booking whose every device already holds a row (active or failed) is
/// left to the operator instead of being pushed again each pass.
pub fn has_pending_devices(locks: &[LockDevice], codes: &[AccessCode]) -> bool {
    codes.is_empty()
        || locks
            .iter()
            .any(|lock| !codes.iter().any(|c| c.lock_id == lock.id))
}

/// Persistence operations the orchestrator and sync need.
#[async_trait]
pub trait Store: Send + Sync {
    // Bookings

    async fn insert_booking(&self, booking: NewBooking) -> Result<Booking>;

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>>;

    async fn find_booking_by_upstream_id(&self, upstream_id: &str) -> Result<Option<Booking>>;

    /// Overwrite the upstream-owned fields of an existing booking.
    /// Provisioning state and guest token are left alone.
    async fn update_booking_from_upstream(&self, id: Uuid, booking: &NewBooking) -> Result<()>;

    async fn set_booking_status(&self, id: Uuid, status: BookingStatus) -> Result<()>;

    async fn set_guest_token(&self, id: Uuid, token: &str) -> Result<()>;

    /// Flip `codes_provisioned` from false to true. Returns `false` if it was
    /// already set, in which case nothing is written.
    async fn mark_codes_provisioned(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Advance every `checked_in` booking whose checkout is before `now` to
    /// `checked_out`. Returns how many moved.
    async fn advance_checked_out(&self, now: DateTime<Utc>) -> Result<u64>;

    // Locks

    /// Active devices of a property in display order.
    async fn active_locks(&self, property_id: &str) -> Result<Vec<LockDevice>>;

    // Access codes

    async fn insert_access_code(&self, code: NewAccessCode) -> Result<AccessCode>;

    async fn get_access_code(&self, id: Uuid) -> Result<Option<AccessCode>>;

    async fn codes_for_booking(&self, booking_id: Uuid) -> Result<Vec<AccessCode>>;

    /// Code values currently `active` on any of `lock_ids`.
    async fn active_code_values(&self, lock_ids: &[Uuid]) -> Result<HashSet<String>>;

    /// Transition an `active` code to `revoked`. Returns `false` if the code
    /// was not active, in which case nothing is written.
    async fn mark_code_revoked(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        reason: RevocationReason,
    ) -> Result<bool>;

    // Selectors

    /// Bookings for which [`needs_codes`] and [`has_pending_devices`] hold.
    async fn bookings_needing_codes(&self, now: DateTime<Utc>, lead: Duration)
        -> Result<Vec<Booking>>;

    /// Active codes past `valid_until`, belonging to a cancelled booking, or
    /// whose booking checked out more than `buffer_after` ago.
    async fn codes_to_revoke(
        &self,
        now: DateTime<Utc>,
        buffer_after: Duration,
    ) -> Result<Vec<DueRevocation>>;
}
