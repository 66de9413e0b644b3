// mysqlbackuptool/src/backup/logic.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use super::db_dump::DumpHandle;
use super::pipeline;
use crate::config::{BackupConfig, UploadMode};
use crate::retention;
use crate::storage::ObjectStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// The server has no user databases; treated as success.
    NothingToDo,
    Completed {
        key: String,
        bytes: u64,
        /// `None` when cleanup was skipped.
        deleted: Option<usize>,
    },
}

/// Uploads the running dump under a key stamped with `started_at`, then sweeps
/// backups that fell out of the retention window.
pub async fn perform_backup_orchestration(
    backup_config: &BackupConfig,
    store: Arc<dyn ObjectStore>,
    handle: DumpHandle,
    started_at: DateTime<Utc>,
) -> Result<BackupOutcome> {
    let key = retention::backup_key(&backup_config.prefix, started_at);

    let bytes = match backup_config.upload_mode {
        UploadMode::Stream => {
            pipeline::run_pipelined(handle, store.clone(), &key, backup_config.progress_interval)
                .await
                .with_context(|| format!("Streaming backup {} failed", key))?
        }
        UploadMode::Staged => pipeline::run_staged(
            handle,
            store.as_ref(),
            &key,
            &backup_config.staging_dir,
            backup_config.progress_interval,
        )
        .await
        .with_context(|| format!("Staged backup {} failed", key))?,
    };
    info!("✅ Upload complete: {}/{} ({} bytes)", store.location(), key, bytes);

    let deleted = if backup_config.skip_cleanup {
        info!("Cleanup skipped.");
        None
    } else {
        let cutoff = retention::retention_cutoff(Utc::now(), backup_config.retention_days);
        info!("Cleaning up backups older than {} days...", backup_config.retention_days);
        let deleted = retention::sweep(store.as_ref(), &backup_config.prefix, cutoff)
            .await
            .context("Retention cleanup failed")?;
        Some(deleted)
    };

    Ok(BackupOutcome::Completed { key, bytes, deleted })
}
