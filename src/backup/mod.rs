mod logic;
pub(crate) mod db_dump;
pub(crate) mod inventory;
pub(crate) mod pipeline;

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::storage::ObjectStore;

pub use logic::BackupOutcome;

/// Public entry point for the backup process: list, dump, upload, sweep.
pub async fn run_backup_flow(app_config: &AppConfig, store: Arc<dyn ObjectStore>) -> Result<BackupOutcome> {
    let databases = inventory::list_user_databases(&app_config.source)
        .await
        .context("Failed to list databases on the source server")?;

    if databases.is_empty() {
        info!("No non-system databases found. Nothing to back up.");
        return Ok(BackupOutcome::NothingToDo);
    }
    info!("Found databases: {}", databases.join(" "));

    let handle = db_dump::start_dump(&app_config.source, &databases).context("Failed to start mysqldump")?;

    logic::perform_backup_orchestration(&app_config.backup, store, handle, Utc::now()).await
}
