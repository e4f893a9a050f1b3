//! Builds adapters, channels and the booking source from [`Settings`].

use std::sync::Arc;

use doorkeep_core::{
    AdapterSet, AdminChannel, BookingSource, LockAdapter, LogChannel, NotificationDispatcher,
    SimulatedAdapter,
};
use doorkeep_vendors::{
    LodgifySource, RingIntercomAdapter, TelegramChannel, TuyaPinLockAdapter, TwilioChannel,
};
use tracing::{info, warn};

use crate::config::{AdapterMode, AppEnvironment, ConfigError, Settings};

/// Keep a configured section; for a missing one fail in production and fall
/// back with a warning otherwise.
fn require<T>(
    env: AppEnvironment,
    var: &str,
    section: Option<T>,
) -> Result<Option<T>, ConfigError> {
    match section {
        Some(section) => Ok(Some(section)),
        None if env.is_production() => Err(ConfigError::MissingVar(var.to_string())),
        None => {
            warn!(var, "Credentials missing, using fallback");
            Ok(None)
        }
    }
}

pub fn adapters(settings: &Settings) -> Result<AdapterSet, ConfigError> {
    if settings.adapter_mode == AdapterMode::Simulated {
        warn!("ADAPTER_MODE=simulated, no lock will be contacted");
        return Ok(AdapterSet::simulated());
    }

    let timeout = settings.lifecycle.vendor_timeout;
    let pin_lock: Arc<dyn LockAdapter> =
        match require(settings.app_env, "TUYA_CLIENT_ID", settings.tuya.clone())? {
            Some(config) => Arc::new(TuyaPinLockAdapter::new(config, timeout)),
            None => Arc::new(SimulatedAdapter::new("tuya")),
        };
    let intercom: Arc<dyn LockAdapter> =
        match require(settings.app_env, "RING_REFRESH_TOKEN", settings.ring.clone())? {
            Some(config) => Arc::new(RingIntercomAdapter::new(config, timeout)),
            None => Arc::new(SimulatedAdapter::new("ring")),
        };

    info!(
        pin_lock = pin_lock.name(),
        intercom = intercom.name(),
        "Lock adapters ready"
    );
    Ok(AdapterSet::new(pin_lock, intercom))
}

/// WhatsApp first with SMS as fallback, Telegram for the admin.
pub fn notifier(settings: &Settings) -> Result<NotificationDispatcher, ConfigError> {
    let timeout = settings.lifecycle.vendor_timeout;
    let env = settings.app_env;

    let admin: Arc<dyn AdminChannel> =
        match require(env, "TELEGRAM_BOT_TOKEN", settings.telegram.clone())? {
            Some(config) => Arc::new(TelegramChannel::new(config, timeout)),
            None => Arc::new(LogChannel),
        };

    let Some(messaging) = require(env, "TWILIO_ACCOUNT_SID", settings.messaging.as_ref())? else {
        return Ok(NotificationDispatcher::new(Arc::new(LogChannel), admin));
    };

    let whatsapp = messaging
        .whatsapp_from
        .as_deref()
        .map(|from| TwilioChannel::whatsapp(messaging.twilio(from), timeout));
    let sms = messaging
        .sms_from
        .as_deref()
        .map(|from| TwilioChannel::sms(messaging.twilio(from), timeout));

    let dispatcher = match (whatsapp, sms) {
        (Some(whatsapp), Some(sms)) => {
            NotificationDispatcher::new(Arc::new(whatsapp), admin).with_fallback(Arc::new(sms))
        }
        (Some(only), None) | (None, Some(only)) => {
            NotificationDispatcher::new(Arc::new(only), admin)
        }
        (None, None) => {
            require::<()>(env, "TWILIO_WHATSAPP_FROM", None)?;
            NotificationDispatcher::new(Arc::new(LogChannel), admin)
        }
    };
    Ok(dispatcher)
}

/// An empty API key yields an unconfigured source whose sync is a no-op.
pub fn booking_source(settings: &Settings) -> Arc<dyn BookingSource> {
    let source = LodgifySource::new(settings.lodgify.clone());
    if !source.is_configured() {
        warn!("LODGIFY_API_KEY not set, booking sync disabled");
    }
    Arc::new(source)
}
