//! MySQL/MariaDB Backup Tool
//!
//! Dumps every user database, ships the dump to S3-compatible storage and
//! removes backups that fell out of the retention window.

// mysqlbackuptool/src/main.rs
mod backup;
mod config;
mod errors;
mod retention;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use config::{AppConfig, Cli};
use std::process::ExitCode;
use std::sync::Arc;
use storage::{ObjectStore, S3ObjectStore};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run_app().await {
        Ok(_) => {
            info!("🎉 All done.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_app() -> Result<()> {
    // A .env next to the working directory is optional.
    dotenv::dotenv().ok();

    let app_config = AppConfig::from_cli(Cli::parse()).context("Invalid configuration")?;
    info!(
        bucket = %app_config.storage.bucket,
        prefix = %app_config.backup.prefix,
        retention_days = app_config.backup.retention_days,
        mode = ?app_config.backup.upload_mode,
        "🚀 Starting backup"
    );

    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::connect(&app_config.storage).await);

    match backup::run_backup_flow(&app_config, store).await.context("Backup process failed")? {
        backup::BackupOutcome::NothingToDo => info!("No non-system databases found. Exiting."),
        backup::BackupOutcome::Completed { key, bytes, deleted } => {
            info!(
                key = %key,
                bytes,
                deleted = deleted.unwrap_or(0),
                "Backup stored"
            );
        }
    }
    Ok(())
}
