//! doorkeep worker: scheduled and on-demand code lifecycle passes.
//!
//! - `run` keeps booking sync, provisioning and revocation on their intervals
//! - the other subcommands run one operation against the store and exit

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use doorkeep_core::{BookingSync, NewBooking, Orchestrator};
use doorkeep_postgres::PgStore;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use uuid::Uuid;

mod config;
mod logging;
mod scheduler;
mod wiring;

use config::Settings;
use scheduler::Jobs;

/// Door code lifecycle worker
#[derive(Parser)]
#[command(name = "doorkeep-worker")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run sync, provisioning and revocation on their schedules
    Run,

    /// Provision codes for every due booking
    Provision,

    /// Revoke every expired or cancelled code
    Revoke,

    /// Revoke one code by id
    RevokeCode { code_id: Uuid },

    /// Pull bookings from the upstream system
    Sync,

    /// Cancel a booking and revoke its codes
    Cancel { booking_id: Uuid },

    /// Create a booking from a JSON file and provision it
    Create { file: PathBuf },

    /// Show code and booking counts
    Status,

    /// Apply database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    logging::init_logging(logging::DEFAULT_FILTER, settings.log_format)?;
    info!(env = %settings.app_env, "doorkeep worker starting");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to database")?;
    let store = PgStore::new(pool);

    if let Commands::Migrate = cli.command {
        store.migrate().await?;
        info!("Migrations applied");
        return Ok(());
    }
    if let Commands::Status = cli.command {
        let stats = store.stats(Utc::now()).await?;
        println!("active codes:           {}", stats.active);
        println!("revoked codes:          {}", stats.revoked);
        println!("failed codes:           {}", stats.failed);
        println!("overdue revocations:    {}", stats.overdue);
        println!("bookings without codes: {}", stats.unprovisioned_bookings);
        return Ok(());
    }

    let store = Arc::new(store);
    let notifier = Arc::new(wiring::notifier(&settings)?);
    let jobs = Jobs {
        orchestrator: Orchestrator::new(
            store.clone(),
            wiring::adapters(&settings)?,
            notifier.clone(),
            settings.lifecycle.clone(),
        ),
        sync: BookingSync::new(
            wiring::booking_source(&settings),
            store,
            notifier,
            settings.sync.clone(),
        ),
    };

    execute(cli.command, &jobs, &settings).await
}

async fn execute(command: Commands, jobs: &Jobs, settings: &Settings) -> Result<()> {
    let now = Utc::now();
    match command {
        Commands::Run => {
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Cannot listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            };
            scheduler::run_until(jobs, settings.schedule, shutdown).await;
        }
        Commands::Provision => print(&jobs.orchestrator.provision_due_bookings(now).await?)?,
        Commands::Revoke => print(&jobs.orchestrator.revoke_due_codes(now).await?)?,
        Commands::RevokeCode { code_id } => {
            let revoked = jobs.orchestrator.revoke_code(code_id, now).await?;
            if revoked {
                println!("code {code_id} revoked");
            } else {
                println!("code {code_id} still active: vendor did not confirm, retried next pass");
            }
        }
        Commands::Sync => print(&jobs.sync.sync_bookings(now).await?)?,
        Commands::Cancel { booking_id } => {
            print(&jobs.orchestrator.cancel_booking(booking_id, now).await?)?
        }
        Commands::Create { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let new_booking: NewBooking = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a booking document", file.display()))?;
            let created = jobs.orchestrator.create_booking(new_booking, now).await?;
            println!("booking {} created", created.booking.id);
            match created.provisioning {
                Ok(outcome) => println!(
                    "codes: {} active, {} failed",
                    outcome.active(),
                    outcome.failed()
                ),
                Err(e) => println!("provisioning deferred to the next pass: {e}"),
            }
        }
        Commands::Status | Commands::Migrate => {}
    }
    Ok(())
}

fn print(summary: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}
