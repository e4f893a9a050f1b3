//! # Doorkeep
//!
//! Time-boxed door codes for short-term rental guests: created on every lock
//! of a property ahead of check-in, removed again after checkout.
//!
//! ## Core Concepts
//!
//! Doorkeep separates **decisions** from **vendor IO**:
//! - [`CodeState`] = the per (booking, device) lifecycle, pure
//! - [`LockAdapter`] = one lock platform's push/revoke capability
//!
//! The key principle: **durable state is the queue**. Nothing pending is kept
//! in memory between passes; selectors recompute eligibility from the store
//! every time, so any pass that stops halfway is finished by the next one.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler tick / operator
//!     │
//!     ├─► BookingSync.sync_bookings() ──► Store (upsert by upstream id)
//!     │
//!     ├─► Orchestrator.provision_due_bookings()
//!     │       │
//!     │       ├─► Store.bookings_needing_codes()
//!     │       │
//!     │       └─► per booking ─► calculate_window() + generate_code()
//!     │                 │
//!     │                 ├─► PIN-lock adapter.push() ──┐
//!     │                 ├─► PIN-lock adapter.push() ──┤ fan-in
//!     │                 └─► intercom adapter.push() ──┘
//!     │                                │
//!     │                                ▼
//!     │                 Store (one AccessCode row per device)
//!     │                                │
//!     │                                ▼
//!     │                 Notifier (guest welcome, admin summary)
//!     │
//!     └─► Orchestrator.revoke_due_codes()
//!             │
//!             ├─► Store.codes_to_revoke()
//!             ├─► adapter.revoke() per code ─► Store (revoked | stays active)
//!             └─► Store.advance_checked_out()
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Codes never outlive the stay** - `valid_until <= checkout + buffer_after`
//! 2. **One provisioning pass per booking** - `codes_provisioned` flips false→true once
//! 3. **Partial failure is recorded** - every device gets a row, `active` or `failed`
//! 4. **Revocation is at-least-once** - a failed revoke leaves the code `active` for the next pass
//! 5. **Adapters never raise** - vendor failures become `None`/`false` at the adapter boundary
//! 6. **Row-scoped writes** - every write targets one row by primary key
//!
//! ## Code Policy
//!
//! By default one PIN is shared by every lock of a booking
//! ([`CodePolicy::SharedPerBooking`]); each lock still gets its own
//! [`AccessCode`] row and is revoked independently. [`CodePolicy::PerDevice`]
//! draws a distinct PIN per lock instead.
//!
//! ## Example
//!
//! ```ignore
//! use doorkeep_core::{AdapterSet, LifecycleConfig, NotificationDispatcher, Orchestrator};
//! use std::sync::Arc;
//!
//! let orchestrator = Orchestrator::new(
//!     Arc::new(store),
//!     AdapterSet::new(Arc::new(pin_lock), Arc::new(intercom)),
//!     Arc::new(NotificationDispatcher::new(whatsapp, telegram).with_fallback(sms)),
//!     LifecycleConfig::default(),
//! );
//!
//! let provisioned = orchestrator.provision_due_bookings(Utc::now()).await?;
//! let revoked = orchestrator.revoke_due_codes(Utc::now()).await?;
//! ```

// Core modules
mod adapter;
mod code;
mod config;
mod error;
mod lifecycle;
mod model;
mod notify;
mod orchestrator;
mod store;
mod sync;
mod window;

// Re-export model types
pub use model::{
    is_valid_phone, AccessCode, Booking, BookingStatus, CodeStatus, DeviceClass, DisplayNames,
    Guest, Language, LockDevice, LockType, NewAccessCode, NewBooking, RevocationReason,
    SyncStatus, VendorRef,
};

// Re-export pure building blocks
pub use code::{
    generate_code, generate_guest_token, mask_code, validate_code_format, MAX_CODE_LENGTH,
    MIN_CODE_LENGTH,
};
pub use lifecycle::{CodeEvent, CodeState};
pub use window::{calculate_window, BufferConfig, ToUtc, ValidityWindow};

// Re-export error types
pub use error::{
    BookingValidationError, CancelError, CreateBookingError, ProvisionError, RevokeError,
    SyncError, TransitionError,
};

// Re-export adapter types
pub use adapter::{AdapterSet, LockAdapter, SimulatedAdapter};

// Re-export notification types
pub use notify::{
    render_welcome, AdminChannel, AdminMessage, GuestChannel, GuestWelcome, LogChannel,
    NotificationDispatcher, Notifier, WelcomeCode,
};

// Re-export store types
pub use store::{has_pending_devices, needs_codes, DueRevocation, Store};

// Re-export workflow types (primary entry points)
pub use config::{CodePolicy, LifecycleConfig};
pub use orchestrator::{
    CancelOutcome, CreatedBooking, Orchestrator, ProvisionOutcome, ProvisionSummary,
    RevocationSummary,
};
pub use sync::{
    map_upstream_status, parse_reservation, BookingSource, BookingSync, SyncConfig, SyncSummary,
};

// Re-export commonly used external types
pub use async_trait::async_trait;
