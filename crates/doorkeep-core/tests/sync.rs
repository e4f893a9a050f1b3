//! Booking sync against a static upstream source.

use std::sync::Arc;

use chrono::NaiveDate;
use doorkeep_core::{
    AdminMessage, BookingStatus, BookingSync, Language, ProvisionSummary, SyncConfig, SyncError,
    SyncSummary,
};
use doorkeep_testing::fixtures::{self, at};
use doorkeep_testing::{InMemoryStore, RecordingNotifier, StaticBookingSource};
use serde_json::{json, Value};

mod common;

struct SyncHarness {
    store: InMemoryStore,
    source: Arc<StaticBookingSource>,
    notifier: Arc<RecordingNotifier>,
    sync: BookingSync,
}

fn setup(source: Arc<StaticBookingSource>) -> SyncHarness {
    let store = InMemoryStore::new();
    let notifier = RecordingNotifier::new();
    let sync = BookingSync::new(
        source.clone(),
        Arc::new(store.clone()),
        notifier.clone(),
        SyncConfig {
            property_id: "alcova_landolina_fi".to_string(),
            horizon_days: 90,
        },
    );
    SyncHarness {
        store,
        source,
        notifier,
        sync,
    }
}

fn record(id: &str, status: &str) -> Value {
    json!({
        "id": id,
        "guest": {"name": "Anna Bianchi", "phone": "+393471112233", "language": "it"},
        "arrival": "2025-12-01T15:00:00Z",
        "departure": "2025-12-04T10:00:00Z",
        "people": 3,
        "status": status
    })
}

fn status_of(store: &InMemoryStore, upstream_id: &str) -> BookingStatus {
    store
        .bookings()
        .into_iter()
        .find(|b| b.upstream_id.as_deref() == Some(upstream_id))
        .map(|b| b.status)
        .unwrap()
}

// ============================================================================
// Upsert
// ============================================================================

#[tokio::test]
async fn inserts_then_updates_without_duplicates() {
    let s = setup(StaticBookingSource::new(vec![
        record("101", "Booked"),
        record("102", "confirmed"),
    ]));
    let now = at("2025-11-20T06:00:00Z");

    let first = s.sync.sync_bookings(now).await.unwrap();
    assert_eq!(
        first,
        SyncSummary {
            new: 2,
            updated: 0,
            skipped: 0
        }
    );

    let second = s.sync.sync_bookings(now).await.unwrap();
    assert_eq!(
        second,
        SyncSummary {
            new: 0,
            updated: 2,
            skipped: 0
        }
    );
    assert_eq!(s.store.bookings().len(), 2);

    let booking = s
        .store
        .bookings()
        .into_iter()
        .find(|b| b.upstream_id.as_deref() == Some("101"))
        .unwrap();
    assert_eq!(booking.guest.language, Language::It);
    assert_eq!(booking.num_guests, 3);
    assert_eq!(booking.property_id, "alcova_landolina_fi");
    assert!(!booking.codes_provisioned);
}

#[tokio::test]
async fn upstream_changes_are_applied() {
    let s = setup(StaticBookingSource::new(vec![record("101", "confirmed")]));
    let now = at("2025-11-20T06:00:00Z");
    s.sync.sync_bookings(now).await.unwrap();

    let mut moved = record("101", "confirmed");
    moved["departure"] = json!("2025-12-05T10:00:00Z");
    s.source.set_records(vec![moved]);
    s.sync.sync_bookings(now).await.unwrap();

    let booking = s.store.bookings().pop().unwrap();
    assert_eq!(booking.checkout, at("2025-12-05T10:00:00Z"));
}

#[tokio::test]
async fn tentative_and_unknown_statuses_map_to_confirmed() {
    let s = setup(StaticBookingSource::new(vec![
        record("201", "tentative"),
        record("202", "awaiting_payment"),
    ]));

    s.sync
        .sync_bookings(at("2025-11-20T06:00:00Z"))
        .await
        .unwrap();

    assert_eq!(status_of(&s.store, "201"), BookingStatus::Confirmed);
    assert_eq!(status_of(&s.store, "202"), BookingStatus::Confirmed);
}

#[tokio::test]
async fn local_progress_is_never_rolled_back() {
    let s = setup(StaticBookingSource::new(vec![record("301", "confirmed")]));
    let now = at("2025-11-20T06:00:00Z");
    s.sync.sync_bookings(now).await.unwrap();

    let mut booking = s.store.bookings().pop().unwrap();
    booking.status = BookingStatus::CheckedIn;
    s.store.add_booking(booking);

    s.sync.sync_bookings(now).await.unwrap();
    assert_eq!(status_of(&s.store, "301"), BookingStatus::CheckedIn);

    s.source.set_records(vec![record("301", "cancelled")]);
    s.sync.sync_bookings(now).await.unwrap();
    assert_eq!(status_of(&s.store, "301"), BookingStatus::Cancelled);
}

#[tokio::test]
async fn malformed_records_are_skipped() {
    let s = setup(StaticBookingSource::new(vec![
        record("401", "confirmed"),
        json!({"id": "402", "arrival": "not a date", "departure": "2025-12-04"}),
        json!({"guest": {"name": "No Id"}}),
        record("403", "confirmed"),
    ]));

    let summary = s
        .sync
        .sync_bookings(at("2025-11-20T06:00:00Z"))
        .await
        .unwrap();

    assert_eq!(summary.new, 2);
    assert_eq!(summary.skipped, 2);
    assert_eq!(s.store.bookings().len(), 2);
    assert!(s.notifier.admin_messages().contains(&AdminMessage::SyncPass {
        new: 2,
        updated: 0,
        skipped: 2
    }));
}

#[tokio::test]
async fn local_cancellation_is_not_undone_by_upstream() {
    let s = setup(StaticBookingSource::new(vec![record("U2", "confirmed")]));
    for lock in fixtures::standard_locks() {
        s.store.add_lock(lock);
    }
    let h = common::bare_harness(s.store.clone(), common::config());
    let now = at("2025-12-01T06:00:00Z");

    s.sync.sync_bookings(now).await.unwrap();
    let id = s.store.bookings().pop().unwrap().id;
    h.orchestrator.cancel_booking(id, now).await.unwrap();

    // Upstream still lists the stay as confirmed.
    s.sync.sync_bookings(now).await.unwrap();
    assert_eq!(status_of(&s.store, "U2"), BookingStatus::Cancelled);

    let summary = h.orchestrator.provision_due_bookings(now).await.unwrap();
    assert_eq!(summary, ProvisionSummary::default());
    assert!(s.store.codes().is_empty());
    assert!(h.pin.pushes().is_empty());
    assert!(h.intercom.pushes().is_empty());
    assert!(h.notifier.welcomes().is_empty());
}

#[tokio::test]
async fn oversized_party_is_skipped_without_failing_the_pass() {
    let mut crowd = record("701", "confirmed");
    crowd["people"] = json!(11);
    let s = setup(StaticBookingSource::new(vec![
        crowd,
        record("702", "confirmed"),
    ]));

    let summary = s
        .sync
        .sync_bookings(at("2025-11-20T06:00:00Z"))
        .await
        .unwrap();

    assert_eq!(
        summary,
        SyncSummary {
            new: 1,
            updated: 0,
            skipped: 1
        }
    );
    assert_eq!(status_of(&s.store, "702"), BookingStatus::Confirmed);
    assert!(s
        .store
        .bookings()
        .iter()
        .all(|b| b.upstream_id.as_deref() != Some("701")));
}

// ============================================================================
// Source behaviour
// ============================================================================

#[tokio::test]
async fn requests_the_configured_horizon() {
    let s = setup(StaticBookingSource::new(Vec::new()));

    s.sync
        .sync_bookings(at("2025-11-20T06:00:00Z"))
        .await
        .unwrap();

    assert_eq!(
        s.source.requests(),
        vec![(
            NaiveDate::from_ymd_opt(2025, 11, 20).unwrap(),
            NaiveDate::from_ymd_opt(2026, 2, 18).unwrap()
        )]
    );
    assert!(s.notifier.admin_messages().is_empty());
}

#[tokio::test]
async fn unconfigured_source_is_a_no_op() {
    let s = setup(StaticBookingSource::unconfigured());

    let summary = s
        .sync
        .sync_bookings(at("2025-11-20T06:00:00Z"))
        .await
        .unwrap();

    assert_eq!(summary, SyncSummary::default());
    assert!(s.source.requests().is_empty());
}

#[tokio::test]
async fn fetch_failure_is_reported_and_changes_nothing() {
    let s = setup(StaticBookingSource::new(vec![record("501", "confirmed")]));
    s.source.set_failing(true);

    let err = s
        .sync
        .sync_bookings(at("2025-11-20T06:00:00Z"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Fetch(_)));
    assert!(s.store.bookings().is_empty());
    assert!(s
        .notifier
        .admin_messages()
        .iter()
        .any(|m| matches!(m, AdminMessage::Error { title, .. } if title == "Booking sync failed")));
}

#[tokio::test]
async fn store_outage_fails_the_pass() {
    let s = setup(StaticBookingSource::new(vec![record("601", "confirmed")]));
    s.store.set_unavailable(true);

    let err = s
        .sync
        .sync_bookings(at("2025-11-20T06:00:00Z"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Store(_)));
}
