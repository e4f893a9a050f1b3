//! Worker configuration loaded from environment variables.
//!
//! Loading is fail-fast: a malformed value stops startup with a
//! [`ConfigError`] naming the variable. Vendor credentials are optional here;
//! whether a missing one is fatal depends on [`AppEnvironment`] and is decided
//! when the adapters are wired.

use std::env;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use doorkeep_core::{BufferConfig, CodePolicy, LifecycleConfig, SyncConfig};
use doorkeep_vendors::{LodgifyConfig, RingConfig, TelegramConfig, TuyaConfig, TwilioConfig};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

impl ConfigError {
    fn invalid(var: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            var: var.to_string(),
            message: message.into(),
        }
    }
}

/// Application environment mode.
///
/// In `Production` a vendor without credentials refuses startup; in
/// `Development` it is replaced by its simulated or log-only variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Production,
}

impl AppEnvironment {
    /// Defaults to `Development` if unrecognized.
    pub fn from_env_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => {
                tracing::warn!(
                    value = other,
                    "Unrecognized APP_ENV value, defaulting to Development"
                );
                Self::Development
            }
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        *self == Self::Production
    }
}

impl std::fmt::Display for AppEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Whether lock adapters talk to vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterMode {
    Live,
    Simulated,
}

impl FromStr for AdapterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "simulated" | "mock" => Ok(Self::Simulated),
            other => Err(format!("expected live or simulated, got {other}")),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected text or json, got {other}")),
        }
    }
}

/// How often each scheduled job runs.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub provision_every: StdDuration,
    pub revoke_every: StdDuration,
    pub sync_every: StdDuration,
}

/// Twilio credentials plus the two sender numbers.
#[derive(Debug, Clone)]
pub struct MessagingSettings {
    pub account_sid: String,
    pub auth_token: String,
    pub whatsapp_from: Option<String>,
    pub sms_from: Option<String>,
    pub api_url: String,
}

impl MessagingSettings {
    pub fn twilio(&self, from: &str) -> TwilioConfig {
        TwilioConfig {
            account_sid: self.account_sid.clone(),
            auth_token: self.auth_token.clone(),
            from: from.to_string(),
            api_url: self.api_url.clone(),
        }
    }
}

/// Everything the worker needs, parsed once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub app_env: AppEnvironment,
    pub adapter_mode: AdapterMode,
    pub log_format: LogFormat,
    pub lifecycle: LifecycleConfig,
    pub schedule: Schedule,
    pub sync: SyncConfig,
    pub tuya: Option<TuyaConfig>,
    pub ring: Option<RingConfig>,
    pub messaging: Option<MessagingSettings>,
    pub telegram: Option<TelegramConfig>,
    pub lodgify: LodgifyConfig,
}

impl Settings {
    /// Load from the process environment, honouring a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let database_url = vars
            .get("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;
        let app_env = vars
            .get("APP_ENV")
            .map(|s| AppEnvironment::from_env_str(&s))
            .unwrap_or(AppEnvironment::Development);
        let adapter_mode = vars.parse("ADAPTER_MODE", AdapterMode::Live)?;
        let log_format = vars.parse("LOG_FORMAT", LogFormat::Text)?;

        let code_length: usize = vars.parse("CODE_LENGTH", 6)?;
        if !(4..=10).contains(&code_length) {
            return Err(ConfigError::invalid("CODE_LENGTH", "must be between 4 and 10"));
        }
        let code_policy = match vars.get("CODE_POLICY") {
            Some(raw) => CodePolicy::parse(&raw).ok_or_else(|| {
                ConfigError::invalid("CODE_POLICY", format!("expected shared or per_device, got {raw}"))
            })?,
            None => CodePolicy::default(),
        };
        let concurrency: usize = vars.parse("PASS_CONCURRENCY", 4)?;
        if concurrency == 0 {
            return Err(ConfigError::invalid("PASS_CONCURRENCY", "must be at least 1"));
        }

        let lifecycle = LifecycleConfig {
            code_length,
            buffers: BufferConfig::hours(
                i64::from(vars.parse::<u32>("CODE_BUFFER_HOURS_BEFORE", 2)?),
                i64::from(vars.parse::<u32>("CODE_BUFFER_HOURS_AFTER", 2)?),
            ),
            provisioning_lead: Duration::hours(i64::from(
                vars.parse::<u32>("PROVISIONING_LEAD_HOURS", 24)?,
            )),
            code_policy,
            unique_codes_per_device: vars.parse("UNIQUE_CODES_PER_DEVICE", true)?,
            vendor_timeout: StdDuration::from_secs(vars.parse("VENDOR_TIMEOUT_SECS", 15)?),
            concurrency,
            frontend_url: vars
                .get("FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
        };

        let schedule = Schedule {
            provision_every: vars.minutes("PROVISION_INTERVAL_MINUTES", 15)?,
            revoke_every: vars.minutes("REVOKE_INTERVAL_MINUTES", 60)?,
            sync_every: vars.minutes("SYNC_INTERVAL_MINUTES", 60)?,
        };

        let property_id = vars
            .get("DEFAULT_PROPERTY_ID")
            .unwrap_or_else(|| SyncConfig::default().property_id);
        let sync = SyncConfig {
            property_id: property_id.clone(),
            horizon_days: i64::from(vars.parse::<u32>("SYNC_HORIZON_DAYS", 90)?),
        };

        let tuya = match (vars.get("TUYA_CLIENT_ID"), vars.get("TUYA_SECRET")) {
            (Some(client_id), Some(secret)) => Some(TuyaConfig {
                client_id,
                secret,
                api_url: vars.url("TUYA_API_URL", TuyaConfig::DEFAULT_API_URL),
            }),
            _ => None,
        };
        let ring = vars.get("RING_REFRESH_TOKEN").map(|refresh_token| RingConfig {
            refresh_token,
            api_url: vars.url("RING_API_URL", RingConfig::DEFAULT_API_URL),
        });
        let messaging = match (vars.get("TWILIO_ACCOUNT_SID"), vars.get("TWILIO_AUTH_TOKEN")) {
            (Some(account_sid), Some(auth_token)) => Some(MessagingSettings {
                account_sid,
                auth_token,
                whatsapp_from: vars.get("TWILIO_WHATSAPP_FROM"),
                sms_from: vars.get("TWILIO_SMS_FROM"),
                api_url: vars.url("TWILIO_API_URL", TwilioConfig::DEFAULT_API_URL),
            }),
            _ => None,
        };
        let telegram = match (vars.get("TELEGRAM_BOT_TOKEN"), vars.get("TELEGRAM_ADMIN_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig {
                bot_token,
                chat_id,
                api_url: vars.url("TELEGRAM_API_URL", TelegramConfig::DEFAULT_API_URL),
            }),
            _ => None,
        };
        let lodgify = LodgifyConfig {
            api_key: vars.get("LODGIFY_API_KEY").unwrap_or_default(),
            property_id: vars.get("LODGIFY_PROPERTY_ID").unwrap_or(property_id),
            api_url: vars.url("LODGIFY_API_URL", LodgifyConfig::DEFAULT_API_URL),
        };

        Ok(Self {
            database_url,
            app_env,
            adapter_mode,
            log_format,
            lifecycle,
            schedule,
            sync,
            tuya,
            ring,
            messaging,
            telegram,
            lodgify,
        })
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn url(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .map_err(|e: T::Err| ConfigError::invalid(key, e.to_string())),
            None => Ok(default),
        }
    }

    fn minutes(&self, key: &str, default: u64) -> Result<StdDuration, ConfigError> {
        let minutes: u64 = self.parse(key, default)?;
        if minutes == 0 {
            return Err(ConfigError::invalid(key, "must be at least 1"));
        }
        Ok(StdDuration::from_secs(minutes * 60))
    }
}
