//! Periodic sync, provisioning and revocation.
//!
//! All three jobs share one task, so they never overlap: a slow revocation
//! pass delays the next provisioning tick instead of racing it. Shutdown is
//! only observed between jobs.

use std::future::Future;

use chrono::Utc;
use doorkeep_core::{BookingSync, Orchestrator};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::config::Schedule;

/// The workflows the scheduler drives.
pub struct Jobs {
    pub orchestrator: Orchestrator,
    pub sync: BookingSync,
}

impl Jobs {
    pub async fn sync(&self) {
        match self.sync.sync_bookings(Utc::now()).await {
            Ok(summary) => info!(
                new = summary.new,
                updated = summary.updated,
                skipped = summary.skipped,
                "Sync job finished"
            ),
            Err(e) => error!(error = %e, "Sync job failed"),
        }
    }

    pub async fn provision(&self) {
        match self.orchestrator.provision_due_bookings(Utc::now()).await {
            Ok(summary) => info!(
                provisioned = summary.provisioned,
                failed = summary.failed,
                "Provisioning job finished"
            ),
            Err(e) => error!(error = %e, "Provisioning job failed"),
        }
    }

    pub async fn revoke(&self) {
        match self.orchestrator.revoke_due_codes(Utc::now()).await {
            Ok(summary) => info!(
                revoked = summary.revoked,
                failed = summary.failed,
                checked_out = summary.checked_out,
                "Revocation job finished"
            ),
            Err(e) => error!(error = %e, "Revocation job failed"),
        }
    }
}

/// Run every job on its interval until `shutdown` resolves.
///
/// Every interval fires once immediately, in the order sync, provision,
/// revoke, so a fresh start catches up before waiting.
pub async fn run_until<F>(jobs: &Jobs, schedule: Schedule, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut sync = interval(schedule.sync_every);
    let mut provision = interval(schedule.provision_every);
    let mut revoke = interval(schedule.revoke_every);
    for timer in [&mut sync, &mut provision, &mut revoke] {
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    }

    info!(
        sync_every_secs = schedule.sync_every.as_secs(),
        provision_every_secs = schedule.provision_every.as_secs(),
        revoke_every_secs = schedule.revoke_every.as_secs(),
        "Scheduler started"
    );

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutdown requested, scheduler stopping");
                break;
            }
            _ = sync.tick() => jobs.sync().await,
            _ = provision.tick() => jobs.provision().await,
            _ = revoke.tick() => jobs.revoke().await,
        }
    }
}
