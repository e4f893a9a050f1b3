//! Guest and admin notifications.
//!
//! Delivery is best-effort everywhere: channels report `false` on failure
//! and callers log it. Nothing here can undo code state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::Language;

/// A channel that reaches a guest's phone.
#[async_trait]
pub trait GuestChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, to: &str, body: &str) -> bool;
}

/// A channel that reaches the operators.
#[async_trait]
pub trait AdminChannel: Send + Sync {
    async fn broadcast(&self, body: &str) -> bool;
}

/// One line of a welcome message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WelcomeCode {
    pub display_name: String,
    pub code: String,
}

/// Everything a guest welcome message carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestWelcome {
    pub booking_id: Uuid,
    pub guest_first_name: String,
    pub phone: String,
    pub language: Language,
    pub checkin: DateTime<Utc>,
    pub checkout: DateTime<Utc>,
    pub codes: Vec<WelcomeCode>,
    pub portal_url: String,
}

/// Operator-facing messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminMessage {
    NewBooking {
        guest_name: String,
        checkin: DateTime<Utc>,
        checkout: DateTime<Utc>,
        num_guests: i32,
        codes_created: usize,
    },
    ProvisioningPass {
        provisioned: usize,
        failed: usize,
    },
    RevocationPass {
        revoked: usize,
        failed: usize,
    },
    SyncPass {
        new: usize,
        updated: usize,
        skipped: usize,
    },
    Error {
        title: String,
        details: String,
    },
}

impl AdminMessage {
    pub fn error(title: impl Into<String>, details: impl ToString) -> Self {
        Self::Error {
            title: title.into(),
            details: details.to_string(),
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::NewBooking {
                guest_name,
                checkin,
                checkout,
                num_guests,
                codes_created,
            } => format!(
                "New booking\n\nGuest: {guest_name}\nStay: {} - {}\nGuests: {num_guests}\nCodes created: {codes_created}\nWelcome message sent",
                checkin.format("%d %b"),
                checkout.format("%d %b"),
            ),
            Self::ProvisioningPass {
                provisioned,
                failed,
            } => format!("Code provisioning\n\nProvisioned: {provisioned}\nFailed: {failed}"),
            Self::RevocationPass { revoked, failed } => {
                format!("Code revocation\n\nRevoked: {revoked}\nFailed: {failed}")
            }
            Self::SyncPass {
                new,
                updated,
                skipped,
            } => format!("Booking sync\n\nNew: {new}\nUpdated: {updated}\nSkipped: {skipped}"),
            Self::Error { title, details } => format!("System error\n\n{title}\n\nDetails:\n{details}"),
        }
    }
}

/// Side effects the orchestrator triggers after state is durable.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_guest_welcome(&self, welcome: &GuestWelcome) -> bool;

    async fn notify_admin(&self, message: &AdminMessage) -> bool;
}

/// Renders the guest welcome in the guest's language.
pub fn render_welcome(welcome: &GuestWelcome) -> String {
    let checkin = welcome.checkin.format("%d %b, %H:%M");
    let checkout = welcome.checkout.format("%d %b, %H:%M");
    let codes = welcome
        .codes
        .iter()
        .map(|c| format!("{}: {}", c.display_name, c.code))
        .collect::<Vec<_>>()
        .join("\n");
    let name = &welcome.guest_first_name;
    let portal = &welcome.portal_url;

    match welcome.language {
        Language::It => format!(
            "Benvenuto!\n\nCiao {name}, siamo felici di accoglierti!\n\nCheck-in: {checkin}\nCheck-out: {checkout}\n\nI tuoi codici d'accesso:\n{codes}\n\nTutte le informazioni per il soggiorno:\n{portal}\n\nIl link scadrà 48h dopo il check-out."
        ),
        Language::En => format!(
            "Welcome!\n\nHi {name}, we're excited to host you!\n\nCheck-in: {checkin}\nCheck-out: {checkout}\n\nYour access codes:\n{codes}\n\nEverything you need for your stay:\n{portal}\n\nThis link will expire 48h after check-out."
        ),
    }
}

/// Primary guest channel, optional fallback, and one admin channel.
#[derive(Clone)]
pub struct NotificationDispatcher {
    primary: Arc<dyn GuestChannel>,
    fallback: Option<Arc<dyn GuestChannel>>,
    admin: Arc<dyn AdminChannel>,
}

impl NotificationDispatcher {
    pub fn new(primary: Arc<dyn GuestChannel>, admin: Arc<dyn AdminChannel>) -> Self {
        Self {
            primary,
            fallback: None,
            admin,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn GuestChannel>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Log-only channels on both sides.
    pub fn log_only() -> Self {
        Self::new(Arc::new(LogChannel), Arc::new(LogChannel))
    }
}

#[async_trait]
impl Notifier for NotificationDispatcher {
    async fn send_guest_welcome(&self, welcome: &GuestWelcome) -> bool {
        let body = render_welcome(welcome);

        if self.primary.send(&welcome.phone, &body).await {
            return true;
        }

        let Some(fallback) = &self.fallback else {
            return false;
        };
        warn!(
            booking_id = %welcome.booking_id,
            primary = self.primary.name(),
            fallback = fallback.name(),
            "Primary guest channel failed, falling back"
        );
        fallback.send(&welcome.phone, &body).await
    }

    async fn notify_admin(&self, message: &AdminMessage) -> bool {
        self.admin.broadcast(&message.render()).await
    }
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

#[async_trait]
impl GuestChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, to: &str, body: &str) -> bool {
        info!(to, chars = body.len(), "Guest message (log only)");
        true
    }
}

#[async_trait]
impl AdminChannel for LogChannel {
    async fn broadcast(&self, body: &str) -> bool {
        info!(message = body, "Admin message (log only)");
        true
    }
}
