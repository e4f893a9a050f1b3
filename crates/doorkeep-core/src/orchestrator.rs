//! Provisioning and revocation workflows.
//!
//! Every pass re-reads its work from the store, so a pass that stops halfway
//! is finished by the next one. Per-unit vendor failures are recorded and
//! counted; only store failures abort a pass.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use smallvec::SmallVec;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapter::AdapterSet;
use crate::code::{generate_code, generate_guest_token, mask_code};
use crate::config::{CodePolicy, LifecycleConfig};
use crate::error::{CancelError, CreateBookingError, ProvisionError, RevokeError};
use crate::lifecycle::{CodeEvent, CodeState};
use crate::model::{
    AccessCode, Booking, BookingStatus, CodeStatus, DeviceClass, LockDevice, NewAccessCode,
    NewBooking, RevocationReason, SyncStatus, VendorRef,
};
use crate::notify::{AdminMessage, GuestWelcome, Notifier, WelcomeCode};
use crate::store::Store;
use crate::window::{calculate_window, ValidityWindow};

/// Result of one provisioning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProvisionSummary {
    pub provisioned: usize,
    pub failed: usize,
}

/// Result of one revocation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RevocationSummary {
    pub revoked: usize,
    pub failed: usize,
    /// Bookings advanced from `checked_in` to `checked_out`.
    pub checked_out: u64,
}

/// Codes written for one booking, one row per device.
#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub booking_id: Uuid,
    pub codes: SmallVec<[AccessCode; 4]>,
    pub welcome_sent: bool,
}

impl ProvisionOutcome {
    pub fn active(&self) -> usize {
        self.count(CodeStatus::Active)
    }

    pub fn failed(&self) -> usize {
        self.count(CodeStatus::Failed)
    }

    fn count(&self, status: CodeStatus) -> usize {
        self.codes.iter().filter(|c| c.status == status).count()
    }
}

/// What `cancel_booking` managed to revoke right away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    pub revoked: usize,
    /// Still active; the next revocation pass picks them up.
    pub pending: usize,
}

/// A directly created booking and its immediate provisioning attempt.
#[derive(Debug)]
pub struct CreatedBooking {
    pub booking: Booking,
    pub provisioning: Result<ProvisionOutcome, ProvisionError>,
}

/// Drives codes through their lifecycle across every lock of a booking.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    adapters: AdapterSet,
    notifier: Arc<dyn Notifier>,
    config: LifecycleConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        adapters: AdapterSet,
        notifier: Arc<dyn Notifier>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            adapters,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Provisioning
    // ------------------------------------------------------------------

    /// Provision every booking the selector returns at `now`.
    #[instrument(skip(self))]
    pub async fn provision_due_bookings(&self, now: DateTime<Utc>) -> Result<ProvisionSummary> {
        let due = match self
            .store
            .bookings_needing_codes(now, self.config.provisioning_lead)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Provisioning pass aborted: selector failed");
                self.report(AdminMessage::error("Code provisioning failed", &e))
                    .await;
                return Err(e);
            }
        };

        if due.is_empty() {
            info!("No bookings need code provisioning");
            return Ok(ProvisionSummary::default());
        }
        info!(count = due.len(), "Bookings due for provisioning");

        let results: Vec<(Uuid, Result<ProvisionOutcome, ProvisionError>)> = stream::iter(due)
            .map(|booking| async move {
                let result = self.provision_booking(&booking, now).await;
                (booking.id, result)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut summary = ProvisionSummary::default();
        let mut terminal = None;
        for (booking_id, result) in results {
            match result {
                Ok(_) => summary.provisioned += 1,
                Err(ProvisionError::Store(e)) => {
                    error!(%booking_id, error = %e, "Store failure while provisioning");
                    summary.failed += 1;
                    terminal.get_or_insert(e);
                }
                Err(e) => {
                    warn!(%booking_id, error = %e, "Booking not provisioned");
                    if e.is_configuration() {
                        self.report(AdminMessage::error("Lock configuration", &e))
                            .await;
                    }
                    summary.failed += 1;
                }
            }
        }

        if let Some(e) = terminal {
            self.report(AdminMessage::error("Code provisioning failed", &e))
                .await;
            return Err(e);
        }

        info!(
            provisioned = summary.provisioned,
            failed = summary.failed,
            "Code provisioning complete"
        );
        self.report(AdminMessage::ProvisioningPass {
            provisioned: summary.provisioned,
            failed: summary.failed,
        })
        .await;

        Ok(summary)
    }

    /// Push codes for `booking` to every active lock of its property.
    ///
    /// One row is written per device whatever the push outcome. Devices that
    /// already hold a row for the booking are not pushed again, so repeated
    /// passes over a booking whose pushes all failed write nothing new. The
    /// booking is marked provisioned only once every push has resolved and at
    /// least one succeeded; the welcome message carries only the active codes.
    #[instrument(skip(self, booking), fields(booking_id = %booking.id))]
    pub async fn provision_booking(
        &self,
        booking: &Booking,
        now: DateTime<Utc>,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let locks = self.store.active_locks(&booking.property_id).await?;
        if locks.is_empty() {
            return Err(ProvisionError::NoActiveDevices {
                property_id: booking.property_id.clone(),
            });
        }

        let mut codes: SmallVec<[AccessCode; 4]> = self
            .store
            .codes_for_booking(booking.id)
            .await?
            .into_iter()
            .collect();
        let pending: Vec<&LockDevice> = locks
            .iter()
            .filter(|lock| !codes.iter().any(|c| c.lock_id == lock.id))
            .collect();
        if !codes.is_empty() {
            debug!(
                recorded = codes.len(),
                pending = pending.len(),
                "Booking already has code rows, pushing only to the rest"
            );
        }

        let window = calculate_window(&booking.checkin, &booking.checkout, &self.config.buffers);
        let values = self.draw_codes(&pending).await?;
        let label = booking.guest.lock_label();

        let pushes = join_all(
            pending
                .iter()
                .zip(&values)
                .map(|(lock, code)| self.push_to_device(lock, code, &window, &label)),
        )
        .await;

        let mut unrecorded = pending.iter().copied().zip(values).zip(pushes);
        while let Some(((lock, code), pushed)) = unrecorded.next() {
            let event = if pushed.is_some() {
                CodeEvent::PushSucceeded
            } else {
                CodeEvent::PushFailed
            };
            let status = CodeState::None
                .apply(event)
                .ok()
                .and_then(|state| state.status())
                .unwrap_or(CodeStatus::Failed);

            let inserted = self
                .store
                .insert_access_code(NewAccessCode {
                    booking_id: booking.id,
                    lock_id: lock.id,
                    device_id: lock.device_id.clone(),
                    device_class: lock.class(),
                    lock_name: lock.lock_type.as_str().to_string(),
                    code,
                    valid_from: window.valid_from,
                    valid_until: window.valid_until,
                    status,
                    sync_status: if pushed.is_some() {
                        SyncStatus::Synced
                    } else {
                        SyncStatus::Failed
                    },
                    vendor_ref: pushed
                        .clone()
                        .map(|id| VendorRef::for_class(lock.class(), id)),
                })
                .await;

            match inserted {
                Ok(row) => codes.push(row),
                Err(e) => {
                    // Without a row no revocation pass would ever find these.
                    let orphans: Vec<(&LockDevice, String)> = std::iter::once((lock, pushed))
                        .chain(unrecorded.by_ref().map(|((lock, _), pushed)| (lock, pushed)))
                        .filter_map(|(lock, pushed)| pushed.map(|id| (lock, id)))
                        .collect();
                    self.withdraw_unrecorded(&orphans).await;
                    return Err(ProvisionError::Store(e));
                }
            }
        }

        let welcome_codes: Vec<WelcomeCode> = locks
            .iter()
            .filter_map(|lock| {
                codes
                    .iter()
                    .find(|c| c.lock_id == lock.id && c.status == CodeStatus::Active)
                    .map(|row| WelcomeCode {
                        display_name: lock.display_name(booking.guest.language).to_string(),
                        code: row.code.clone(),
                    })
            })
            .collect();

        let mut outcome = ProvisionOutcome {
            booking_id: booking.id,
            codes,
            welcome_sent: false,
        };
        if welcome_codes.is_empty() {
            return Err(ProvisionError::NoCodesCreated {
                booking_id: booking.id,
                failed: outcome.failed(),
            });
        }

        if !self.store.mark_codes_provisioned(booking.id, now).await? {
            warn!("Booking was already marked provisioned, skipping notifications");
            return Ok(outcome);
        }
        info!(
            active = outcome.active(),
            failed = outcome.failed(),
            "Codes provisioned"
        );

        outcome.welcome_sent = self
            .notifier
            .send_guest_welcome(&GuestWelcome {
                booking_id: booking.id,
                guest_first_name: booking.guest.first_name().to_string(),
                phone: booking.guest.phone.clone(),
                language: booking.guest.language,
                checkin: booking.checkin,
                checkout: booking.checkout,
                codes: welcome_codes,
                portal_url: self.config.portal_url(booking.guest_token.as_deref()),
            })
            .await;
        if !outcome.welcome_sent {
            warn!("Guest welcome could not be delivered on any channel");
        }

        self.report(AdminMessage::NewBooking {
            guest_name: booking.guest.name.clone(),
            checkin: booking.checkin,
            checkout: booking.checkout,
            num_guests: booking.num_guests,
            codes_created: outcome.active(),
        })
        .await;

        Ok(outcome)
    }

    /// One value per lock, following the configured policy.
    async fn draw_codes(&self, locks: &[&LockDevice]) -> Result<Vec<String>> {
        let mut taken = if self.config.unique_codes_per_device {
            let ids: Vec<Uuid> = locks.iter().map(|l| l.id).collect();
            self.store.active_code_values(&ids).await?
        } else {
            HashSet::new()
        };

        Ok(match self.config.code_policy {
            CodePolicy::SharedPerBooking => {
                let code = self.draw_unique(&taken);
                vec![code; locks.len()]
            }
            CodePolicy::PerDevice => locks
                .iter()
                .map(|_| {
                    let code = self.draw_unique(&taken);
                    taken.insert(code.clone());
                    code
                })
                .collect(),
        })
    }

    fn draw_unique(&self, taken: &HashSet<String>) -> String {
        for _ in 0..LifecycleConfig::MAX_CODE_ATTEMPTS {
            let code = generate_code(self.config.code_length);
            if !taken.contains(&code) {
                return code;
            }
            debug!(code = %mask_code(&code), "Generated code collides with an active code");
        }
        warn!("Could not draw a non-colliding code, accepting a collision");
        generate_code(self.config.code_length)
    }

    /// Revoke codes a device accepted but the store never recorded.
    async fn withdraw_unrecorded(&self, orphans: &[(&LockDevice, String)]) {
        let results = join_all(orphans.iter().map(|(lock, external_id)| {
            self.revoke_on_device(lock.class(), &lock.device_id, external_id)
        }))
        .await;

        for ((lock, external_id), withdrawn) in orphans.iter().zip(results) {
            if withdrawn {
                warn!(
                    device_id = %lock.device_id,
                    external_id = %external_id,
                    "Unrecorded code withdrawn"
                );
                continue;
            }
            error!(
                device_id = %lock.device_id,
                external_id = %external_id,
                "Unrecorded code is still live on the device"
            );
            self.report(AdminMessage::error(
                "Unrecorded door code",
                format!(
                    "code {external_id} on {} could not be revoked, remove it by hand",
                    lock.device_id
                ),
            ))
            .await;
        }
    }

    async fn push_to_device(
        &self,
        lock: &LockDevice,
        code: &str,
        window: &ValidityWindow,
        label: &str,
    ) -> Option<String> {
        let adapter = self.adapters.for_class(lock.class());
        let pushed = tokio::time::timeout(
            self.config.vendor_timeout,
            adapter.push(&lock.device_id, code, window, label),
        )
        .await;

        match pushed {
            Ok(Some(external_id)) => {
                debug!(
                    adapter = adapter.name(),
                    device_id = %lock.device_id,
                    lock_type = lock.lock_type.as_str(),
                    external_id = %external_id,
                    "Code pushed"
                );
                Some(external_id)
            }
            Ok(None) => {
                warn!(
                    adapter = adapter.name(),
                    device_id = %lock.device_id,
                    "Vendor rejected code push"
                );
                None
            }
            Err(_) => {
                warn!(
                    adapter = adapter.name(),
                    device_id = %lock.device_id,
                    timeout_secs = self.config.vendor_timeout.as_secs(),
                    "Code push timed out"
                );
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Revocation
    // ------------------------------------------------------------------

    /// Revoke every code the selector returns at `now`, then advance stays
    /// that are over to `checked_out`.
    #[instrument(skip(self))]
    pub async fn revoke_due_codes(&self, now: DateTime<Utc>) -> Result<RevocationSummary> {
        let due = match self
            .store
            .codes_to_revoke(now, self.config.buffers.after)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Revocation pass aborted: selector failed");
                self.report(AdminMessage::error("Auto-revoke failed", &e))
                    .await;
                return Err(e);
            }
        };
        let attempted = due.len();

        let results: Vec<Result<bool>> = stream::iter(due)
            .map(|due| async move { self.revoke_one(&due.code, due.reason, now).await })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut summary = RevocationSummary::default();
        let mut terminal = None;
        for result in results {
            match result {
                Ok(true) => summary.revoked += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    summary.failed += 1;
                    terminal.get_or_insert(e);
                }
            }
        }
        if let Some(e) = terminal {
            error!(error = %e, "Revocation pass aborted: store failure");
            self.report(AdminMessage::error("Auto-revoke failed", &e))
                .await;
            return Err(e);
        }

        summary.checked_out = match self.store.advance_checked_out(now).await {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "Could not advance finished stays");
                self.report(AdminMessage::error("Auto-revoke failed", &e))
                    .await;
                return Err(e);
            }
        };

        info!(
            revoked = summary.revoked,
            failed = summary.failed,
            checked_out = summary.checked_out,
            "Auto-revoke complete"
        );
        if attempted > 0 {
            self.report(AdminMessage::RevocationPass {
                revoked: summary.revoked,
                failed: summary.failed,
            })
            .await;
        }

        Ok(summary)
    }

    /// Revoke one code on demand.
    ///
    /// `Ok(true)` once the code is revoked, including when it already was
    /// (its `revoked_at` is left untouched). `Ok(false)` when the vendor did
    /// not confirm; the code stays active.
    #[instrument(skip(self))]
    pub async fn revoke_code(&self, code_id: Uuid, now: DateTime<Utc>) -> Result<bool, RevokeError> {
        let code = self
            .store
            .get_access_code(code_id)
            .await?
            .ok_or(RevokeError::NotFound(code_id))?;

        match code.status {
            CodeStatus::Revoked => {
                debug!("Code already revoked");
                Ok(true)
            }
            CodeStatus::Failed => Err(RevokeError::NotRevocable {
                code_id,
                status: code.status,
            }),
            CodeStatus::Active => Ok(self.revoke_one(&code, RevocationReason::Manual, now).await?),
        }
    }

    /// Cancel a booking and revoke its active codes right away.
    #[instrument(skip(self))]
    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome, CancelError> {
        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or(CancelError::NotFound(booking_id))?;

        if booking.status != BookingStatus::Cancelled {
            self.store
                .set_booking_status(booking_id, BookingStatus::Cancelled)
                .await?;
        }

        let active: Vec<AccessCode> = self
            .store
            .codes_for_booking(booking_id)
            .await?
            .into_iter()
            .filter(|c| c.status == CodeStatus::Active)
            .collect();

        let results = join_all(
            active
                .iter()
                .map(|code| self.revoke_one(code, RevocationReason::BookingCancelled, now)),
        )
        .await;

        let mut outcome = CancelOutcome::default();
        for result in results {
            if result? {
                outcome.revoked += 1;
            } else {
                outcome.pending += 1;
            }
        }
        info!(
            revoked = outcome.revoked,
            pending = outcome.pending,
            "Booking cancelled"
        );
        Ok(outcome)
    }

    /// Revoke `code` on its device and record the transition.
    async fn revoke_one(
        &self,
        code: &AccessCode,
        reason: RevocationReason,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let state = CodeState::from(code.status);
        if state == CodeState::Revoked {
            return Ok(true);
        }

        let confirmed = match &code.vendor_ref {
            Some(vendor_ref) => {
                self.revoke_on_device(code.device_class, &code.device_id, vendor_ref.external_id())
                    .await
            }
            None => {
                debug!(code_id = %code.id, "No vendor reference, revoking locally");
                true
            }
        };
        let event = if confirmed {
            CodeEvent::RevokeConfirmed
        } else {
            CodeEvent::RevokeFailed
        };

        if state.apply(event)? != CodeState::Revoked {
            warn!(code_id = %code.id, reason = %reason, "Revocation not confirmed, will retry");
            return Ok(false);
        }

        if !self.store.mark_code_revoked(code.id, now, reason).await? {
            debug!(code_id = %code.id, "Code was revoked concurrently");
        }
        info!(code_id = %code.id, reason = %reason, "Code revoked");
        Ok(true)
    }

    async fn revoke_on_device(&self, class: DeviceClass, device_id: &str, external_id: &str) -> bool {
        let adapter = self.adapters.for_class(class);
        match tokio::time::timeout(
            self.config.vendor_timeout,
            adapter.revoke(device_id, external_id),
        )
        .await
        {
            Ok(confirmed) => confirmed,
            Err(_) => {
                warn!(
                    adapter = adapter.name(),
                    device_id,
                    external_id,
                    "Code revoke timed out"
                );
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Direct booking creation
    // ------------------------------------------------------------------

    /// Insert a booking, give it a portal token and provision it now,
    /// regardless of the lead window.
    #[instrument(skip(self, new), fields(guest = %new.guest.name))]
    pub async fn create_booking(
        &self,
        mut new: NewBooking,
        now: DateTime<Utc>,
    ) -> Result<CreatedBooking, CreateBookingError> {
        new.validate()?;
        new.status = BookingStatus::Confirmed;

        let mut booking = self.store.insert_booking(new).await?;
        let token = generate_guest_token();
        self.store.set_guest_token(booking.id, &token).await?;
        booking.guest_token = Some(token);

        let provisioning = self.provision_booking(&booking, now).await;
        match &provisioning {
            Ok(outcome) => {
                booking.codes_provisioned = true;
                booking.codes_provisioned_at = Some(now);
                info!(booking_id = %booking.id, active = outcome.active(), "Booking created");
            }
            Err(e) => {
                warn!(booking_id = %booking.id, error = %e, "Booking created without codes");
                if e.is_configuration() {
                    self.report(AdminMessage::error("Lock configuration", e))
                        .await;
                }
            }
        }

        Ok(CreatedBooking {
            booking,
            provisioning,
        })
    }

    async fn report(&self, message: AdminMessage) {
        if !self.notifier.notify_admin(&message).await {
            warn!("Admin notification could not be delivered");
        }
    }
}
