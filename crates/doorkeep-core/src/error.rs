//! Error types.
//!
//! Store plumbing speaks `anyhow`; the variants below are the failures the
//! orchestrator and sync distinguish when deciding what to report.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::lifecycle::CodeState;
use crate::model::CodeStatus;

/// Rejected booking input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BookingValidationError {
    #[error("checkout {checkout} must be after checkin {checkin}")]
    CheckoutNotAfterCheckin {
        checkin: DateTime<Utc>,
        checkout: DateTime<Utc>,
    },

    #[error("guest count {0} outside 1..=10")]
    GuestCount(i32),

    #[error("invalid phone number: {0}")]
    Phone(String),
}

/// Failure to provision a single booking.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Configuration problem: reported, never retried by the same pass.
    #[error("no active lock devices for property {property_id}")]
    NoActiveDevices { property_id: String },

    /// Every device push failed.
    #[error("no access code could be pushed for booking {booking_id} ({failed} device(s) failed)")]
    NoCodesCreated { booking_id: Uuid, failed: usize },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ProvisionError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NoActiveDevices { .. })
    }
}

/// Failure to revoke a single code on demand.
#[derive(Debug, Error)]
pub enum RevokeError {
    #[error("access code {0} not found")]
    NotFound(Uuid),

    #[error("access code {code_id} is {status:?} and cannot be revoked")]
    NotRevocable { code_id: Uuid, status: CodeStatus },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Failure of a whole booking sync pass.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("upstream fetch failed: {0}")]
    Fetch(#[source] anyhow::Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Illegal lifecycle transition.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot {event} from state {from:?}")]
pub struct TransitionError {
    pub from: CodeState,
    pub event: &'static str,
}

/// Booking lookup failure for cancellation.
#[derive(Debug, Error)]
pub enum CancelError {
    #[error("booking {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Failure of direct booking creation.
#[derive(Debug, Error)]
pub enum CreateBookingError {
    #[error(transparent)]
    Invalid(#[from] BookingValidationError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
