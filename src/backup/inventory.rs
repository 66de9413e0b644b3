// mysqlbackuptool/src/backup/inventory.rs
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::errors::{BackupError, Result};
use crate::utils::databases::is_system_database;
use crate::utils::{MYSQL_CLIENT, find_executable};

/// Client error codes that mean the server answered but refused the login.
const AUTH_ERROR_CODES: &[&str] = &["ERROR 1044", "ERROR 1045", "ERROR 1698"];

/// Lists the databases worth backing up, i.e. everything except the server's own schemas.
///
/// An empty result is not an error; the caller decides that there is nothing to do.
/// The order is whatever the server reports.
pub async fn list_user_databases(source: &SourceConfig) -> Result<Vec<String>> {
    let mysql_path = find_executable(MYSQL_CLIENT)?;
    debug!("Found mysql executable at: {}", mysql_path.display());

    let mut command = Command::new(&mysql_path);
    command
        .args(source.connection_args())
        .arg("--skip-column-names")
        .arg("--batch")
        .arg("--execute=SHOW DATABASES;")
        .stdin(Stdio::null());
    if let Some(password) = &source.password {
        command.env("MYSQL_PWD", password);
    }

    info!("Fetching databases...");
    let output = command.output().await.map_err(|e| {
        BackupError::Connection(format!("Failed to execute {}: {}", mysql_path.display(), e))
    })?;

    if !output.status.success() {
        return Err(classify_client_error(&String::from_utf8_lossy(&output.stderr)));
    }

    Ok(filter_user_databases(&String::from_utf8_lossy(&output.stdout)))
}

/// Parses the newline separated `SHOW DATABASES` output and drops the system schemas.
pub fn filter_user_databases(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter(|name| !is_system_database(name))
        .map(str::to_string)
        .collect()
}

pub fn classify_client_error(stderr: &str) -> BackupError {
    let message = stderr.trim().to_string();
    if AUTH_ERROR_CODES.iter().any(|code| message.contains(code)) || message.contains("Access denied") {
        BackupError::Auth(message)
    } else {
        BackupError::Connection(message)
    }
}
