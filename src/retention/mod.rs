// mysqlbackuptool/src/retention/mod.rs
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use tracing::{debug, info};

use crate::errors::Result;
use crate::storage::ObjectStore;

pub const BACKUP_SUFFIX: &str = ".sql";
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Object key for a backup taken at `at`: `{prefix}-{YYYYMMDD}-{HHMMSS}.sql` in UTC.
pub fn backup_key(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}{}", prefix, at.format(TIMESTAMP_FORMAT), BACKUP_SUFFIX)
}

/// Backups strictly older than this instant are eligible for deletion.
pub fn retention_cutoff(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(retention_days))
}

/// Recovers the backup time embedded in a key from its last two `-` separated
/// segments. The storage provider's modification time is never consulted.
pub fn parse_backup_timestamp(key: &str) -> Option<DateTime<Utc>> {
    let base = key.strip_suffix(BACKUP_SUFFIX)?;
    let mut segments = base.rsplitn(3, '-');
    let time = segments.next()?;
    let date = segments.next()?;
    // The prefix has to be there too.
    segments.next()?;

    NaiveDateTime::parse_from_str(&format!("{}-{}", date, time), TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Deletes every backup under `prefix` whose embedded timestamp is before `cutoff`.
///
/// Pages are followed until the listing has no continuation token. Objects without
/// the backup suffix or with an unparseable timestamp are left alone. Returns the
/// number of objects deleted.
pub async fn sweep(store: &dyn ObjectStore, prefix: &str, cutoff: DateTime<Utc>) -> Result<usize> {
    info!("🧹 Cleaning up backups older than {}...", cutoff.format("%Y-%m-%d %H:%M:%S UTC"));

    let mut continuation = None;
    let mut scanned = 0usize;
    let mut unparseable = 0usize;
    let mut deleted = 0usize;
    let mut freed_bytes = 0u64;

    loop {
        let page = store.list_page(prefix, continuation.take()).await?;

        for object in &page.objects {
            scanned += 1;
            if !object.key.ends_with(BACKUP_SUFFIX) {
                continue;
            }

            let Some(backup_time) = parse_backup_timestamp(&object.key) else {
                debug!(key = %object.key, "Skipping object without a parseable timestamp");
                unparseable += 1;
                continue;
            };

            if backup_time < cutoff {
                info!("Deleting old backup: {}", object.key);
                store.delete(&object.key).await?;
                deleted += 1;
                freed_bytes += object.size;
            }
        }

        match page.next {
            Some(token) => continuation = Some(token),
            None => break,
        }
    }

    info!(
        scanned,
        deleted,
        kept = scanned - deleted,
        unparseable,
        freed_bytes,
        "✓ Cleanup complete"
    );
    Ok(deleted)
}
