//! Vendor clients for doorkeep.
//!
//! Each client implements one of the `doorkeep-core` seams over HTTP:
//!
//! | Client                 | Seam            | Service                      |
//! |------------------------|-----------------|------------------------------|
//! | [`TuyaPinLockAdapter`] | `LockAdapter`   | PIN-lock cloud (signed)      |
//! | [`RingIntercomAdapter`]| `LockAdapter`   | intercom API (OAuth refresh) |
//! | [`TwilioChannel`]      | `GuestChannel`  | WhatsApp or SMS              |
//! | [`TelegramChannel`]    | `AdminChannel`  | bot message to one chat      |
//! | [`LodgifySource`]      | `BookingSource` | upstream reservations        |
//!
//! Lock adapters and channels never return errors across the seam: every
//! failure is logged here and reported as `None` or `false`. Internally the
//! clients speak [`VendorError`] so the log line says what went wrong.
//!
//! Base URLs are configurable so tests can point clients at a mock server.

mod error;
mod http;
mod lodgify;
mod ring;
mod telegram;
mod tuya;
mod twilio;

pub use error::{VendorError, VendorResult};
pub use http::client;
pub use lodgify::{LodgifyConfig, LodgifySource};
pub use ring::{RingConfig, RingIntercomAdapter};
pub use telegram::{TelegramChannel, TelegramConfig};
pub use tuya::{TuyaConfig, TuyaPinLockAdapter};
pub use twilio::{TwilioChannel, TwilioConfig, TwilioKind};
