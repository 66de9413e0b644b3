pub mod databases;

use std::path::PathBuf;
use which::which;

use crate::errors::{BackupError, Result};

pub const MYSQL_CLIENT: &str = "mysql";
pub const MYSQLDUMP: &str = "mysqldump";

/// Finds a MySQL client tool in the system PATH.
pub fn find_executable(tool: &'static str) -> Result<PathBuf> {
    which(tool).map_err(|_| BackupError::ToolNotFound { tool })
}
