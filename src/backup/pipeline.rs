// mysqlbackuptool/src/backup/pipeline.rs
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use super::db_dump::{ByteCounter, DumpHandle};
use crate::errors::{BackupError, Result};
use crate::storage::ObjectStore;

/// Progress is sampled every tick but only logged at info level this often.
const PROGRESS_LOG_EVERY: Duration = Duration::from_secs(5);

/// Samples `counter` every `interval` until `task` finishes, then returns its output.
///
/// The task runs on its own; sampling only reads the counter and never holds it up.
async fn watch_progress<T>(
    mut task: JoinHandle<T>,
    counter: &ByteCounter,
    interval: Duration,
    label: &str,
) -> std::result::Result<T, JoinError> {
    let started = Instant::now();
    let mut last_logged = started;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            outcome = &mut task => break outcome,
            _ = ticker.tick() => {
                let bytes = counter.get();
                debug!(bytes, "{} progress", label);
                if last_logged.elapsed() >= PROGRESS_LOG_EVERY {
                    info!("⏳ {} {} bytes so far ({}s elapsed)", label, bytes, started.elapsed().as_secs());
                    last_logged = Instant::now();
                }
            }
        }
    };

    info!("{} {} bytes in {:.1}s", label, counter.get(), started.elapsed().as_secs_f64());
    outcome
}

/// Reaps the dump after `stage` failed, logging its status. The caller's error wins.
async fn reap_after_failure(handle: DumpHandle, stage: &str) {
    match handle.wait().await {
        Ok(exit) if !exit.success() => {
            warn!(code = ?exit.status.code(), stderr = %exit.stderr, "mysqldump also failed after the {} error", stage);
        }
        Ok(_) => debug!("mysqldump exited cleanly after the {} error", stage),
        Err(e) => error!("Failed to reap mysqldump after {} error: {}", stage, e),
    }
}

/// Streams the dump straight into object storage under `key`.
///
/// The transfer runs as its own task pulling from the dump stream; this flow only
/// watches the byte counter. Once the transfer is done its result is checked first,
/// then the dump's exit status. A failed transfer still reaps the dump process.
pub async fn run_pipelined(
    mut handle: DumpHandle,
    store: Arc<dyn ObjectStore>,
    key: &str,
    progress_interval: Duration,
) -> Result<u64> {
    let counter = handle.counter();
    let mut stream = handle.take_stream()?;

    info!("Streaming mysqldump to {}/{}...", store.location(), key);
    let transfer = {
        let key = key.to_string();
        tokio::spawn(async move { store.upload_stream(&key, &mut stream).await })
    };

    // The stream lives inside the transfer task and is dropped when it ends, so a
    // dump still writing after a failed transfer gets EPIPE instead of blocking.
    let transferred = match watch_progress(transfer, &counter, progress_interval, "Uploaded").await {
        Ok(result) => result,
        Err(join_error) => Err(BackupError::Transfer(format!("Upload task aborted: {}", join_error))),
    };

    let transferred = match transferred {
        Ok(bytes) => bytes,
        Err(transfer_error) => {
            reap_after_failure(handle, "transfer").await;
            return Err(transfer_error);
        }
    };

    if let Err(dump_error) = handle.wait().await?.into_result() {
        warn!(
            "⚠️ s3 object {} was uploaded from a failed dump and is left in place; it is not a usable backup",
            key
        );
        return Err(dump_error);
    }

    let produced = counter.get();
    if produced != transferred {
        return Err(BackupError::Transfer(format!(
            "Dump produced {} bytes but {} bytes were stored",
            produced, transferred
        )));
    }

    Ok(transferred)
}

/// Writes the dump to a temporary file in `staging_dir`, checks the dump's exit
/// status, then uploads the file. A failed dump is never uploaded, and the
/// staged file is removed on every path.
pub async fn run_staged(
    mut handle: DumpHandle,
    store: &dyn ObjectStore,
    key: &str,
    staging_dir: &Path,
    progress_interval: Duration,
) -> Result<u64> {
    let counter = handle.counter();
    let mut stream = handle.take_stream()?;

    let staged = match tempfile::Builder::new()
        .prefix("mysqldump-")
        .suffix(".sql")
        .tempfile_in(staging_dir)
    {
        Ok(file) => file,
        Err(e) => {
            drop(stream);
            reap_after_failure(handle, "staging").await;
            return Err(BackupError::Staging(format!(
                "Failed to create staging file in {}: {}",
                staging_dir.display(),
                e
            )));
        }
    };
    info!("Writing mysqldump to staging file {}...", staged.path().display());

    let copy = match staged.reopen() {
        Ok(std_file) => {
            let mut file = tokio::fs::File::from_std(std_file);
            tokio::spawn(async move {
                let bytes = tokio::io::copy(&mut stream, &mut file).await?;
                file.flush().await?;
                file.sync_all().await?;
                Ok::<u64, std::io::Error>(bytes)
            })
        }
        Err(e) => {
            drop(stream);
            reap_after_failure(handle, "staging").await;
            return Err(BackupError::Staging(format!(
                "Failed to open staging file {}: {}",
                staged.path().display(),
                e
            )));
        }
    };

    let copied = match watch_progress(copy, &counter, progress_interval, "Staged").await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            reap_after_failure(handle, "staging").await;
            return Err(BackupError::Staging(format!("Writing staging file failed: {}", e)));
        }
        Err(join_error) => {
            reap_after_failure(handle, "staging").await;
            return Err(BackupError::Staging(format!("Staging task aborted: {}", join_error)));
        }
    };

    handle.wait().await?.into_result()?;
    debug!(copied, "Dump staged, uploading");

    let uploaded = store.upload_file(key, staged.path()).await?;
    if uploaded != copied {
        return Err(BackupError::Transfer(format!(
            "Staged {} bytes but {} bytes were stored",
            copied, uploaded
        )));
    }
    Ok(uploaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryObjectStore;
    use tokio::process::Command;

    const TICK: Duration = Duration::from_millis(10);

    fn dump(script: &str) -> anyhow::Result<DumpHandle> {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        Ok(DumpHandle::spawn(command)?)
    }

    #[tokio::test]
    async fn test_streams_every_byte() -> anyhow::Result<()> {
        let store = Arc::new(MemoryObjectStore::new(100));
        // Several writes with pauses so the data arrives in uneven chunks.
        let handle = dump("head -c 70000 /dev/zero; sleep 0.05; printf 'abc'; sleep 0.05; head -c 131072 /dev/zero")?;

        let bytes = run_pipelined(handle, store.clone(), "nightly-20240101-000000.sql", TICK).await?;

        assert_eq!(bytes, 70_000 + 3 + 131_072);
        let stored = store.get("nightly-20240101-000000.sql").unwrap();
        assert_eq!(stored.len() as u64, bytes);
        assert_eq!(&stored[70_000..70_003], b"abc");
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_dump_uploads_empty_object() -> anyhow::Result<()> {
        let store = Arc::new(MemoryObjectStore::new(100));
        let bytes = run_pipelined(dump("true")?, store.clone(), "empty-20240101-000000.sql", TICK).await?;
        assert_eq!(bytes, 0);
        assert_eq!(store.get("empty-20240101-000000.sql"), Some(Vec::new()));
        Ok(())
    }

    #[tokio::test]
    async fn test_dump_failure_after_successful_transfer_is_reported() -> anyhow::Result<()> {
        let store = Arc::new(MemoryObjectStore::new(100));
        let handle = dump("printf 'CREATE TABLE t (id int);'; echo 'mysqldump: Error 2013: Lost connection' >&2; exit 3")?;

        let result = run_pipelined(handle, store.clone(), "nightly-20240101-000000.sql", TICK).await;

        match result {
            Err(BackupError::DumpExit { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("Lost connection"));
            }
            other => panic!("expected DumpExit, got {:?}", other),
        }
        // The partial upload is left where it is.
        assert!(store.get("nightly-20240101-000000.sql").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_transfer_failure_reaps_dump_and_wins_over_dump_error() -> anyhow::Result<()> {
        let store = Arc::new(MemoryObjectStore::failing_uploads());
        // Produces far more than a pipe holds and then fails; the transfer error must
        // be what surfaces, and the call must not hang on the blocked writer.
        let handle = dump("head -c 5000000 /dev/zero; exit 4")?;

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            run_pipelined(handle, store.clone(), "nightly-20240101-000000.sql", TICK),
        )
        .await?;

        assert!(matches!(result, Err(BackupError::Transfer(_))));
        assert!(store.keys().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_staged_upload_matches_dump() -> anyhow::Result<()> {
        let staging = tempfile::tempdir()?;
        let store = MemoryObjectStore::new(100);
        let handle = dump("printf 'CREATE DATABASE shop;\\n'; head -c 100000 /dev/zero")?;

        let bytes = run_staged(handle, &store, "nightly-20240101-000000.sql", staging.path(), TICK).await?;

        assert_eq!(bytes, 22 + 100_000);
        assert_eq!(store.get("nightly-20240101-000000.sql").unwrap().len() as u64, bytes);
        assert_eq!(std::fs::read_dir(staging.path())?.count(), 0, "staging file must be removed");
        Ok(())
    }

    #[tokio::test]
    async fn test_staged_failed_dump_is_never_uploaded() -> anyhow::Result<()> {
        let staging = tempfile::tempdir()?;
        let store = MemoryObjectStore::new(100);
        let handle = dump("printf 'partial'; echo 'Access denied' >&2; exit 2")?;

        let result = run_staged(handle, &store, "nightly-20240101-000000.sql", staging.path(), TICK).await;

        assert!(matches!(result, Err(BackupError::DumpExit { code: Some(2), .. })));
        assert!(store.keys().is_empty());
        assert_eq!(std::fs::read_dir(staging.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_staged_upload_failure_cleans_up() -> anyhow::Result<()> {
        let staging = tempfile::tempdir()?;
        let store = MemoryObjectStore::failing_uploads();

        let result = run_staged(dump("printf 'data'")?, &store, "k-20240101-000000.sql", staging.path(), TICK).await;

        assert!(matches!(result, Err(BackupError::Transfer(_))));
        assert_eq!(std::fs::read_dir(staging.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_byte_count_mismatch_is_a_transfer_error() -> anyhow::Result<()> {
        let store = Arc::new(MemoryObjectStore::short_counting_uploads());
        let handle = dump("printf 'CREATE DATABASE shop;'")?;

        let result = run_pipelined(handle, store.clone(), "nightly-20240101-000000.sql", TICK).await;

        match result {
            Err(BackupError::Transfer(message)) => {
                assert!(message.contains("produced 21 bytes but 20 bytes were stored"), "{}", message);
            }
            other => panic!("expected Transfer, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_staging_failure_reaps_dump() -> anyhow::Result<()> {
        let staging = tempfile::tempdir()?;
        let missing = staging.path().join("gone");
        let store = MemoryObjectStore::new(100);
        // Would block forever on a full pipe if the dump were not reaped.
        let handle = dump("head -c 5000000 /dev/zero")?;

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            run_staged(handle, &store, "nightly-20240101-000000.sql", &missing, TICK),
        )
        .await?;

        assert!(matches!(result, Err(BackupError::Staging(_))));
        assert!(store.keys().is_empty());
        Ok(())
    }
}
