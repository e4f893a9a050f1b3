//! Test data builders.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use doorkeep_core::{
    Booking, BookingStatus, DisplayNames, Guest, Language, LockDevice, LockType, NewBooking,
};

pub const PROPERTY: &str = "alcova_landolina_fi";

/// Parse an RFC 3339 instant.
pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid RFC 3339 fixture timestamp")
        .with_timezone(&Utc)
}

pub fn guest() -> Guest {
    Guest {
        name: "Mario Rossi".to_string(),
        email: "mario@example.com".to_string(),
        phone: "+393331234567".to_string(),
        language: Language::It,
    }
}

/// Confirmed, unprovisioned booking at [`PROPERTY`].
pub fn booking(checkin: DateTime<Utc>, checkout: DateTime<Utc>) -> Booking {
    Booking {
        id: Uuid::new_v4(),
        upstream_id: None,
        confirmation_code: None,
        guest: guest(),
        property_id: PROPERTY.to_string(),
        checkin,
        checkout,
        num_guests: 2,
        status: BookingStatus::Confirmed,
        codes_provisioned: false,
        codes_provisioned_at: None,
        guest_token: Some("portal-token".to_string()),
        created_at: checkin - chrono::Duration::days(30),
    }
}

pub fn new_booking(checkin: DateTime<Utc>, checkout: DateTime<Utc>) -> NewBooking {
    NewBooking {
        upstream_id: None,
        confirmation_code: Some("HMX123".to_string()),
        guest: guest(),
        property_id: PROPERTY.to_string(),
        checkin,
        checkout,
        num_guests: 2,
        status: BookingStatus::Confirmed,
    }
}

/// Active lock at [`PROPERTY`].
pub fn lock(device_id: &str, lock_type: LockType, display_order: i32) -> LockDevice {
    LockDevice {
        id: Uuid::new_v4(),
        property_id: PROPERTY.to_string(),
        device_id: device_id.to_string(),
        device_name: device_id.to_string(),
        lock_type,
        is_active: true,
        display_names: DisplayNames {
            it: Some(format!("Porta {display_order}")),
            en: Some(format!("Door {display_order}")),
        },
        display_order,
    }
}

/// Main entrance, floor intercom and apartment door.
pub fn standard_locks() -> Vec<LockDevice> {
    vec![
        lock("tuya-main", LockType::MainEntrance, 1),
        lock("ring-floor", LockType::FloorDoor, 2),
        lock("tuya-apt", LockType::ApartmentDoor, 3),
    ]
}
