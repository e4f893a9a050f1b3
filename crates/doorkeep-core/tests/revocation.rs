//! Revocation, manual revoke and cancellation workflows.

mod common;

use chrono::Duration;
use doorkeep_core::{
    AccessCode, AdminMessage, Booking, BookingStatus, CancelError, CodeStatus, DeviceClass,
    NewAccessCode, RevocationReason, RevokeError, Store, SyncStatus, VendorRef,
};
use doorkeep_testing::fixtures::{self, at};
use uuid::Uuid;

use common::{harness, Harness};

/// Scenario booking, provisioned at 10:00 on check-in day.
async fn provisioned(h: &Harness) -> Booking {
    let booking = fixtures::booking(at("2025-11-20T15:00:00Z"), at("2025-11-22T11:00:00Z"));
    h.store.add_booking(booking.clone());
    h.orchestrator
        .provision_booking(&booking, at("2025-11-20T10:00:00Z"))
        .await
        .unwrap();
    booking
}

fn pin_code(booking: &Booking, status: CodeStatus, vendor_ref: Option<VendorRef>) -> AccessCode {
    NewAccessCode {
        booking_id: booking.id,
        lock_id: Uuid::new_v4(),
        device_id: "tuya-main".to_string(),
        device_class: DeviceClass::PinLock,
        lock_name: "main_entrance".to_string(),
        code: "482913".to_string(),
        valid_from: booking.checkin - Duration::hours(2),
        valid_until: booking.checkout + Duration::hours(2),
        status,
        sync_status: SyncStatus::Synced,
        vendor_ref,
    }
    .into_code(booking.created_at)
}

// ============================================================================
// Revocation pass
// ============================================================================

#[tokio::test]
async fn expired_codes_are_revoked_after_buffer() {
    let h = harness();
    let booking = provisioned(&h).await;

    let early = h
        .orchestrator
        .revoke_due_codes(at("2025-11-22T12:59:00Z"))
        .await
        .unwrap();
    assert_eq!(early.revoked, 0);

    let now = at("2025-11-22T14:00:00Z");
    let summary = h.orchestrator.revoke_due_codes(now).await.unwrap();
    assert_eq!(summary.revoked, 3);
    assert_eq!(summary.failed, 0);

    let revoked = h.store.codes_with_status(booking.id, CodeStatus::Revoked);
    assert_eq!(revoked.len(), 3);
    for code in revoked {
        assert_eq!(code.revoked_at, Some(now));
        assert_eq!(code.revoked_reason, Some(RevocationReason::Expired));
        assert_eq!(code.revoked_reason.unwrap().as_str(), "expired");
    }
    assert_eq!(h.pin.revokes().len(), 2);
    assert_eq!(h.intercom.revokes().len(), 1);
    assert!(h
        .notifier
        .admin_messages()
        .contains(&AdminMessage::RevocationPass { revoked: 3, failed: 0 }));
}

#[tokio::test]
async fn revoke_uses_the_external_id_from_the_push() {
    let h = harness();
    let booking = provisioned(&h).await;

    h.orchestrator
        .revoke_due_codes(at("2025-11-22T14:00:00Z"))
        .await
        .unwrap();

    let mut expected: Vec<(String, String)> = h
        .store
        .codes_with_status(booking.id, CodeStatus::Revoked)
        .into_iter()
        .filter(|c| c.device_class == DeviceClass::PinLock)
        .map(|c| (c.device_id, c.vendor_ref.unwrap().external_id().to_string()))
        .collect();
    let mut seen = h.pin.revokes();
    expected.sort();
    seen.sort();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn cancelled_booking_codes_are_revoked_before_expiry() {
    let h = harness();
    let booking = provisioned(&h).await;
    h.store
        .set_booking_status(booking.id, BookingStatus::Cancelled)
        .await
        .unwrap();

    let summary = h
        .orchestrator
        .revoke_due_codes(at("2025-11-20T18:00:00Z"))
        .await
        .unwrap();

    assert_eq!(summary.revoked, 3);
    for code in h.store.codes_with_status(booking.id, CodeStatus::Revoked) {
        assert_eq!(code.revoked_reason, Some(RevocationReason::BookingCancelled));
        assert_eq!(code.revoked_reason.unwrap().as_str(), "booking cancelled");
    }
}

#[tokio::test]
async fn shortened_stay_is_revoked_at_the_new_checkout() {
    let h = harness();
    let booking = fixtures::booking(at("2025-11-20T15:00:00Z"), at("2025-11-25T11:00:00Z"));
    h.store.add_booking(booking.clone());
    h.orchestrator
        .provision_booking(&booking, at("2025-11-20T10:00:00Z"))
        .await
        .unwrap();

    // Upstream moves the departure four days earlier.
    let shortened = fixtures::new_booking(booking.checkin, at("2025-11-21T11:00:00Z"));
    h.store
        .update_booking_from_upstream(booking.id, &shortened)
        .await
        .unwrap();

    let early = h
        .orchestrator
        .revoke_due_codes(at("2025-11-21T12:59:00Z"))
        .await
        .unwrap();
    assert_eq!(early.revoked, 0);

    let summary = h
        .orchestrator
        .revoke_due_codes(at("2025-11-22T00:00:00Z"))
        .await
        .unwrap();
    assert_eq!(summary.revoked, 3);
    assert!(h
        .store
        .codes_with_status(booking.id, CodeStatus::Active)
        .is_empty());
    for code in h.store.codes_with_status(booking.id, CodeStatus::Revoked) {
        assert_eq!(code.revoked_reason, Some(RevocationReason::Expired));
        assert_eq!(code.valid_until, at("2025-11-25T13:00:00Z"));
    }
    assert_eq!(h.pin.revokes().len(), 2);
    assert_eq!(h.intercom.revokes().len(), 1);
}

#[tokio::test]
async fn failed_revoke_stays_active_and_is_retried() {
    let h = harness();
    let booking = provisioned(&h).await;
    h.pin.fail_revokes_on("tuya-apt");

    let first = h
        .orchestrator
        .revoke_due_codes(at("2025-11-22T14:00:00Z"))
        .await
        .unwrap();
    assert_eq!(first.revoked, 2);
    assert_eq!(first.failed, 1);

    let still_active = h.store.codes_with_status(booking.id, CodeStatus::Active);
    assert_eq!(still_active.len(), 1);
    assert_eq!(still_active[0].device_id, "tuya-apt");
    assert!(still_active[0].revoked_at.is_none());

    h.pin.heal_revokes();
    let retry_at = at("2025-11-22T15:00:00Z");
    let second = h.orchestrator.revoke_due_codes(retry_at).await.unwrap();
    assert_eq!(second.revoked, 1);
    assert_eq!(second.failed, 0);

    let code = h.store.code(still_active[0].id).unwrap();
    assert_eq!(code.status, CodeStatus::Revoked);
    assert_eq!(code.revoked_at, Some(retry_at));
}

#[tokio::test]
async fn failed_codes_are_never_selected() {
    let h = harness();
    let booking = fixtures::booking(at("2025-11-20T15:00:00Z"), at("2025-11-22T11:00:00Z"));
    h.store.add_booking(booking.clone());
    let failed = pin_code(&booking, CodeStatus::Failed, None);
    h.store.add_code(failed.clone());

    let summary = h
        .orchestrator
        .revoke_due_codes(at("2025-11-30T00:00:00Z"))
        .await
        .unwrap();

    assert_eq!(summary.revoked + summary.failed, 0);
    assert!(h.pin.revokes().is_empty());
    assert_eq!(h.store.code(failed.id).unwrap().status, CodeStatus::Failed);
    assert!(h.notifier.admin_messages().is_empty());
}

#[tokio::test]
async fn code_without_vendor_reference_is_revoked_locally() {
    let h = harness();
    let booking = fixtures::booking(at("2025-11-20T15:00:00Z"), at("2025-11-22T11:00:00Z"));
    h.store.add_booking(booking.clone());
    let code = pin_code(&booking, CodeStatus::Active, None);
    h.store.add_code(code.clone());

    let summary = h
        .orchestrator
        .revoke_due_codes(at("2025-11-22T14:00:00Z"))
        .await
        .unwrap();

    assert_eq!(summary.revoked, 1);
    assert!(h.pin.revokes().is_empty());
    assert_eq!(h.store.code(code.id).unwrap().status, CodeStatus::Revoked);
}

#[tokio::test]
async fn finished_stays_advance_to_checked_out() {
    let h = harness();
    let mut stay = fixtures::booking(at("2025-11-20T15:00:00Z"), at("2025-11-22T11:00:00Z"));
    stay.status = BookingStatus::CheckedIn;
    let mut ongoing = fixtures::booking(at("2025-11-21T15:00:00Z"), at("2025-11-24T11:00:00Z"));
    ongoing.status = BookingStatus::CheckedIn;
    h.store.add_booking(stay.clone());
    h.store.add_booking(ongoing.clone());

    let summary = h
        .orchestrator
        .revoke_due_codes(at("2025-11-22T14:00:00Z"))
        .await
        .unwrap();

    assert_eq!(summary.checked_out, 1);
    assert_eq!(
        h.store.booking(stay.id).unwrap().status,
        BookingStatus::CheckedOut
    );
    assert_eq!(
        h.store.booking(ongoing.id).unwrap().status,
        BookingStatus::CheckedIn
    );
}

#[tokio::test]
async fn revocation_pass_surfaces_store_outage() {
    let h = harness();
    provisioned(&h).await;
    h.store.set_unavailable(true);

    let result = h
        .orchestrator
        .revoke_due_codes(at("2025-11-22T14:00:00Z"))
        .await;

    assert!(result.is_err());
    assert!(h.pin.revokes().is_empty());
}

// ============================================================================
// Manual revoke
// ============================================================================

#[tokio::test]
async fn manual_revoke_is_idempotent() {
    let h = harness();
    let booking = provisioned(&h).await;
    let code = h.store.codes_with_status(booking.id, CodeStatus::Active)[0].clone();

    let first_at = at("2025-11-21T09:00:00Z");
    assert!(h.orchestrator.revoke_code(code.id, first_at).await.unwrap());
    let after_first = h.store.code(code.id).unwrap();
    assert_eq!(after_first.status, CodeStatus::Revoked);
    assert_eq!(after_first.revoked_at, Some(first_at));
    assert_eq!(after_first.revoked_reason, Some(RevocationReason::Manual));

    let vendor_calls = h.pin.revokes().len() + h.intercom.revokes().len();
    assert!(h
        .orchestrator
        .revoke_code(code.id, at("2025-11-21T10:00:00Z"))
        .await
        .unwrap());
    let after_second = h.store.code(code.id).unwrap();
    assert_eq!(after_second.revoked_at, Some(first_at));
    assert_eq!(
        h.pin.revokes().len() + h.intercom.revokes().len(),
        vendor_calls
    );
}

#[tokio::test]
async fn manual_revoke_reports_unconfirmed_vendor() {
    let h = harness();
    let booking = provisioned(&h).await;
    h.intercom.fail_revokes_on("ring-floor");
    let code = h
        .store
        .codes_with_status(booking.id, CodeStatus::Active)
        .into_iter()
        .find(|c| c.device_class == DeviceClass::Intercom)
        .unwrap();

    let confirmed = h
        .orchestrator
        .revoke_code(code.id, at("2025-11-21T09:00:00Z"))
        .await
        .unwrap();

    assert!(!confirmed);
    assert_eq!(h.store.code(code.id).unwrap().status, CodeStatus::Active);
}

#[tokio::test]
async fn manual_revoke_rejects_failed_and_unknown_codes() {
    let h = harness();
    let booking = fixtures::booking(at("2025-11-20T15:00:00Z"), at("2025-11-22T11:00:00Z"));
    h.store.add_booking(booking.clone());
    let failed = pin_code(&booking, CodeStatus::Failed, None);
    h.store.add_code(failed.clone());

    let err = h
        .orchestrator
        .revoke_code(failed.id, at("2025-11-21T09:00:00Z"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RevokeError::NotRevocable { status: CodeStatus::Failed, .. }
    ));

    let missing = Uuid::new_v4();
    let err = h
        .orchestrator
        .revoke_code(missing, at("2025-11-21T09:00:00Z"))
        .await
        .unwrap_err();
    assert!(matches!(err, RevokeError::NotFound(id) if id == missing));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancel_booking_revokes_codes_right_away() {
    let h = harness();
    let booking = provisioned(&h).await;
    h.intercom.fail_revokes_on("ring-floor");

    let outcome = h
        .orchestrator
        .cancel_booking(booking.id, at("2025-11-20T18:00:00Z"))
        .await
        .unwrap();

    assert_eq!(outcome.revoked, 2);
    assert_eq!(outcome.pending, 1);
    assert_eq!(
        h.store.booking(booking.id).unwrap().status,
        BookingStatus::Cancelled
    );

    h.intercom.heal_revokes();
    let summary = h
        .orchestrator
        .revoke_due_codes(at("2025-11-20T19:00:00Z"))
        .await
        .unwrap();
    assert_eq!(summary.revoked, 1);
    assert!(h
        .store
        .codes_with_status(booking.id, CodeStatus::Revoked)
        .iter()
        .all(|c| c.revoked_reason == Some(RevocationReason::BookingCancelled)));
}

#[tokio::test]
async fn cancel_unknown_booking_is_not_found() {
    let h = harness();
    let id = Uuid::new_v4();
    let err = h
        .orchestrator
        .cancel_booking(id, at("2025-11-20T18:00:00Z"))
        .await
        .unwrap_err();
    assert!(matches!(err, CancelError::NotFound(missing) if missing == id));
}
