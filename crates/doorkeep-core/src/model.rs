//! Bookings, lock devices and access codes.
//!
//! Status enums are persisted as lowercase text; `as_str`/`FromStr` are the
//! only conversions stores should use.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BookingValidationError;

/// Lifecycle status of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::CheckedIn => "checked_in",
            Self::CheckedOut => "checked_out",
            Self::Cancelled => "cancelled",
        }
    }

    /// Position along the stay. Cancelled sits outside the ordering.
    fn progress(&self) -> Option<u8> {
        match self {
            Self::Confirmed => Some(0),
            Self::CheckedIn => Some(1),
            Self::CheckedOut => Some(2),
            Self::Cancelled => None,
        }
    }

    /// Whether an externally reported status may replace `self`.
    ///
    /// Never moves a stay backwards. Cancellation applies unless the guest
    /// has already checked out, and is terminal: once a booking is cancelled
    /// its codes are gone, so no upstream status brings it back.
    pub fn accepts_upstream(&self, incoming: BookingStatus) -> bool {
        match (self.progress(), incoming.progress()) {
            (Some(current), Some(next)) => next >= current,
            (Some(_), None) => *self != Self::CheckedOut,
            (None, _) => false,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(Self::Confirmed),
            "checked_in" => Ok(Self::CheckedIn),
            "checked_out" => Ok(Self::CheckedOut),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

/// Guest message language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    It,
    #[default]
    En,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::It => "it",
            Self::En => "en",
        }
    }

    /// Lenient parse: anything that is not Italian is English.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "it" | "ita" | "it-it" => Self::It,
            _ => Self::En,
        }
    }
}

/// Who is staying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub language: Language,
}

impl Guest {
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }

    /// Name as written to a lock's password label.
    pub fn lock_label(&self) -> String {
        self.name.chars().take(20).collect()
    }
}

/// A guest's reserved stay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub upstream_id: Option<String>,
    pub confirmation_code: Option<String>,
    pub guest: Guest,
    pub property_id: String,
    pub checkin: DateTime<Utc>,
    pub checkout: DateTime<Utc>,
    pub num_guests: i32,
    pub status: BookingStatus,
    pub codes_provisioned: bool,
    pub codes_provisioned_at: Option<DateTime<Utc>>,
    pub guest_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Data for inserting or upserting a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub upstream_id: Option<String>,
    pub confirmation_code: Option<String>,
    pub guest: Guest,
    pub property_id: String,
    pub checkin: DateTime<Utc>,
    pub checkout: DateTime<Utc>,
    pub num_guests: i32,
    pub status: BookingStatus,
}

impl NewBooking {
    pub const MAX_GUESTS: i32 = 10;

    /// Checks the stay and contact invariants enforced at creation time.
    pub fn validate(&self) -> Result<(), BookingValidationError> {
        if self.checkout <= self.checkin {
            return Err(BookingValidationError::CheckoutNotAfterCheckin {
                checkin: self.checkin,
                checkout: self.checkout,
            });
        }
        if !(1..=Self::MAX_GUESTS).contains(&self.num_guests) {
            return Err(BookingValidationError::GuestCount(self.num_guests));
        }
        if !is_valid_phone(&self.guest.phone) {
            return Err(BookingValidationError::Phone(self.guest.phone.clone()));
        }
        Ok(())
    }
}

/// E.164-ish: optional `+`, a non-zero leading digit, 2 to 15 digits total.
pub fn is_valid_phone(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    let len = digits.len();
    (2..=15).contains(&len)
        && digits.bytes().all(|b| b.is_ascii_digit())
        && !digits.starts_with('0')
}

/// Physical role of a lock at the property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    MainEntrance,
    FloorDoor,
    ApartmentDoor,
}

impl LockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MainEntrance => "main_entrance",
            Self::FloorDoor => "floor_door",
            Self::ApartmentDoor => "apartment_door",
        }
    }

    /// Which adapter family drives this kind of lock.
    pub fn class(&self) -> DeviceClass {
        match self {
            Self::MainEntrance | Self::ApartmentDoor => DeviceClass::PinLock,
            Self::FloorDoor => DeviceClass::Intercom,
        }
    }
}

impl FromStr for LockType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main_entrance" => Ok(Self::MainEntrance),
            "floor_door" | "floor_intercom" => Ok(Self::FloorDoor),
            "apartment_door" | "apartment" => Ok(Self::ApartmentDoor),
            other => Err(format!("unknown lock type: {other}")),
        }
    }
}

/// Adapter routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    PinLock,
    Intercom,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PinLock => "pin_lock",
            Self::Intercom => "intercom",
        }
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pin_lock" => Ok(Self::PinLock),
            "intercom" => Ok(Self::Intercom),
            other => Err(format!("unknown device class: {other}")),
        }
    }
}

/// Per-language display names of a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayNames {
    pub it: Option<String>,
    pub en: Option<String>,
}

/// An access-control endpoint at a property. Read-only to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDevice {
    pub id: Uuid,
    pub property_id: String,
    /// Vendor-side device identifier.
    pub device_id: String,
    pub device_name: String,
    pub lock_type: LockType,
    pub is_active: bool,
    pub display_names: DisplayNames,
    pub display_order: i32,
}

impl LockDevice {
    pub fn class(&self) -> DeviceClass {
        self.lock_type.class()
    }

    pub fn display_name(&self, language: Language) -> &str {
        let preferred = match language {
            Language::It => self.display_names.it.as_deref(),
            Language::En => self.display_names.en.as_deref(),
        };
        preferred
            .or(self.display_names.en.as_deref())
            .unwrap_or(self.lock_type.as_str())
    }
}

/// Lifecycle status of a single pushed code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeStatus {
    Active,
    Revoked,
    Failed,
}

impl CodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for CodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "revoked" => Ok(Self::Revoked),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown code status: {other}")),
        }
    }
}

/// Outcome of the vendor push for one code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// Why a code was revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RevocationReason {
    #[serde(rename = "expired")]
    Expired,
    #[serde(rename = "booking cancelled")]
    BookingCancelled,
    #[serde(rename = "manual")]
    Manual,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::BookingCancelled => "booking cancelled",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevocationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expired" => Ok(Self::Expired),
            "booking cancelled" => Ok(Self::BookingCancelled),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown revocation reason: {other}")),
        }
    }
}

/// Vendor-side reference for a pushed code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VendorRef {
    /// Password id on a PIN lock.
    PinPassword(String),
    /// Code id on an intercom.
    IntercomCode(String),
}

impl VendorRef {
    pub fn for_class(class: DeviceClass, external_id: String) -> Self {
        match class {
            DeviceClass::PinLock => Self::PinPassword(external_id),
            DeviceClass::Intercom => Self::IntercomCode(external_id),
        }
    }

    pub fn external_id(&self) -> &str {
        match self {
            Self::PinPassword(id) | Self::IntercomCode(id) => id,
        }
    }
}

/// A time-boxed credential pushed to one device for one booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCode {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub lock_id: Uuid,
    pub device_id: String,
    pub device_class: DeviceClass,
    pub lock_name: String,
    pub code: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub status: CodeStatus,
    pub sync_status: SyncStatus,
    pub vendor_ref: Option<VendorRef>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<RevocationReason>,
    pub created_at: DateTime<Utc>,
}

/// Row written once per device during provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccessCode {
    pub booking_id: Uuid,
    pub lock_id: Uuid,
    pub device_id: String,
    pub device_class: DeviceClass,
    pub lock_name: String,
    pub code: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub status: CodeStatus,
    pub sync_status: SyncStatus,
    pub vendor_ref: Option<VendorRef>,
}

impl NewAccessCode {
    /// Materialize the row with a fresh id.
    pub fn into_code(self, created_at: DateTime<Utc>) -> AccessCode {
        AccessCode {
            id: Uuid::new_v4(),
            booking_id: self.booking_id,
            lock_id: self.lock_id,
            device_id: self.device_id,
            device_class: self.device_class,
            lock_name: self.lock_name,
            code: self.code,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            status: self.status,
            sync_status: self.sync_status,
            vendor_ref: self.vendor_ref,
            revoked_at: None,
            revoked_reason: None,
            created_at,
        }
    }
}
