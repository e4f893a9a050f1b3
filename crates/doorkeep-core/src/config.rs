//! Orchestration policy knobs.

use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::window::BufferConfig;

/// How code values relate to the devices of one booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodePolicy {
    /// One PIN for every device of the booking.
    #[default]
    SharedPerBooking,
    /// A distinct PIN per device.
    PerDevice,
}

impl CodePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" | "shared_per_booking" => Some(Self::SharedPerBooking),
            "per_device" | "per-device" => Some(Self::PerDevice),
            _ => None,
        }
    }
}

/// Settings for provisioning and revocation passes.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub code_length: usize,
    pub buffers: BufferConfig,
    /// How long before check-in a booking becomes eligible.
    pub provisioning_lead: Duration,
    pub code_policy: CodePolicy,
    /// Regenerate values that collide with active codes on the same devices.
    pub unique_codes_per_device: bool,
    /// Upper bound on one vendor call, on top of the client's own timeout.
    pub vendor_timeout: StdDuration,
    /// Bookings or codes handled concurrently within a pass.
    pub concurrency: usize,
    /// Base of the guest portal link.
    pub frontend_url: String,
}

impl LifecycleConfig {
    /// Attempts at drawing a non-colliding PIN before accepting a collision.
    pub const MAX_CODE_ATTEMPTS: usize = 10;

    pub fn portal_url(&self, guest_token: Option<&str>) -> String {
        let base = self.frontend_url.trim_end_matches('/');
        match guest_token {
            Some(token) => format!("{base}/g/{token}"),
            None => base.to_string(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            code_length: 6,
            buffers: BufferConfig::default(),
            provisioning_lead: Duration::hours(24),
            code_policy: CodePolicy::default(),
            unique_codes_per_device: true,
            vendor_timeout: StdDuration::from_secs(15),
            concurrency: 4,
            frontend_url: "http://localhost:3000".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portal_url_uses_token_when_present() {
        let config = LifecycleConfig {
            frontend_url: "https://stay.example/".into(),
            ..Default::default()
        };
        assert_eq!(config.portal_url(Some("abc")), "https://stay.example/g/abc");
        assert_eq!(config.portal_url(None), "https://stay.example");
    }

    #[test]
    fn policy_parsing() {
        assert_eq!(CodePolicy::parse("shared"), Some(CodePolicy::SharedPerBooking));
        assert_eq!(CodePolicy::parse("PER_DEVICE"), Some(CodePolicy::PerDevice));
        assert_eq!(CodePolicy::parse("random"), None);
    }
}
