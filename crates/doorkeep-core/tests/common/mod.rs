//! Shared wiring for orchestrator tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use doorkeep_core::{AdapterSet, LifecycleConfig, Orchestrator};
use doorkeep_testing::fixtures;
use doorkeep_testing::{FakeLockAdapter, InMemoryStore, RecordingNotifier};

pub struct Harness {
    pub store: InMemoryStore,
    pub pin: Arc<FakeLockAdapter>,
    pub intercom: Arc<FakeLockAdapter>,
    pub notifier: Arc<RecordingNotifier>,
    pub orchestrator: Orchestrator,
}

pub fn config() -> LifecycleConfig {
    LifecycleConfig {
        vendor_timeout: Duration::from_millis(200),
        frontend_url: "https://stay.example".to_string(),
        ..Default::default()
    }
}

/// Harness with the three standard locks installed.
pub fn harness() -> Harness {
    harness_with(config())
}

pub fn harness_with(config: LifecycleConfig) -> Harness {
    let store = InMemoryStore::new();
    for lock in fixtures::standard_locks() {
        store.add_lock(lock);
    }
    bare_harness(store, config)
}

/// Harness over a caller-prepared store.
pub fn bare_harness(store: InMemoryStore, config: LifecycleConfig) -> Harness {
    let pin = FakeLockAdapter::new("tuya");
    let intercom = FakeLockAdapter::new("ring");
    let notifier = RecordingNotifier::new();
    let orchestrator = Orchestrator::new(
        Arc::new(store.clone()),
        AdapterSet::new(pin.clone(), intercom.clone()),
        notifier.clone(),
        config,
    );
    Harness {
        store,
        pin,
        intercom,
        notifier,
        orchestrator,
    }
}
