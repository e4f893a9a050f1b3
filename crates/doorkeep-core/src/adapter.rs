//! Lock adapter capability and routing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::code::mask_code;
use crate::model::DeviceClass;
use crate::window::ValidityWindow;

/// Push/revoke capability every lock platform provides.
///
/// Implementations must not surface vendor failures as panics or errors:
/// an unreachable vendor is `None` from `push` and `false` from `revoke`.
/// Revoking a code the vendor no longer knows about must return `true`.
#[async_trait]
pub trait LockAdapter: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Install `code` on `device_id` for `window`. Returns the vendor's id
    /// for the installed code.
    async fn push(
        &self,
        device_id: &str,
        code: &str,
        window: &ValidityWindow,
        label: &str,
    ) -> Option<String>;

    /// Remove a previously pushed code.
    async fn revoke(&self, device_id: &str, external_id: &str) -> bool;
}

/// One adapter per device class.
#[derive(Clone)]
pub struct AdapterSet {
    pin_lock: Arc<dyn LockAdapter>,
    intercom: Arc<dyn LockAdapter>,
}

impl AdapterSet {
    pub fn new(pin_lock: Arc<dyn LockAdapter>, intercom: Arc<dyn LockAdapter>) -> Self {
        Self { pin_lock, intercom }
    }

    /// Both classes served by the simulated adapter.
    pub fn simulated() -> Self {
        let adapter: Arc<dyn LockAdapter> = Arc::new(SimulatedAdapter::new("simulated"));
        Self::new(adapter.clone(), adapter)
    }

    pub fn for_class(&self, class: DeviceClass) -> &Arc<dyn LockAdapter> {
        match class {
            DeviceClass::PinLock => &self.pin_lock,
            DeviceClass::Intercom => &self.intercom,
        }
    }
}

/// Adapter that touches no hardware. Every push succeeds with a synthetic
/// id and every revoke succeeds.
#[derive(Debug, Clone)]
pub struct SimulatedAdapter {
    name: String,
}

impl SimulatedAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl LockAdapter for SimulatedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(
        &self,
        device_id: &str,
        code: &str,
        window: &ValidityWindow,
        label: &str,
    ) -> Option<String> {
        warn!(
            adapter = %self.name,
            device_id,
            code = %mask_code(code),
            label,
            valid_from = %window.valid_from,
            valid_until = %window.valid_until,
            "Simulated push, no device contacted"
        );
        Some(format!("sim_{}", Uuid::new_v4().simple()))
    }

    async fn revoke(&self, device_id: &str, external_id: &str) -> bool {
        warn!(
            adapter = %self.name,
            device_id,
            external_id,
            "Simulated revoke, no device contacted"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{calculate_window, BufferConfig};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn simulated_adapter_always_succeeds() {
        let adapter = SimulatedAdapter::new("sim");
        let now = Utc::now();
        let window = calculate_window(&now, &(now + Duration::days(1)), &BufferConfig::default());

        let id = adapter.push("dev-1", "123456", &window, "Guest").await;
        assert!(id.as_deref().is_some_and(|id| id.starts_with("sim_")));
        assert!(adapter.revoke("dev-1", "anything").await);
    }

    #[test]
    fn routes_by_device_class() {
        let pin: Arc<dyn LockAdapter> = Arc::new(SimulatedAdapter::new("pin"));
        let intercom: Arc<dyn LockAdapter> = Arc::new(SimulatedAdapter::new("intercom"));
        let set = AdapterSet::new(pin, intercom);
        assert_eq!(set.for_class(DeviceClass::PinLock).name(), "pin");
        assert_eq!(set.for_class(DeviceClass::Intercom).name(), "intercom");
    }
}
