use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} executable not found in PATH. Please ensure the MySQL/MariaDB client tools are installed and in your PATH.")]
    ToolNotFound { tool: &'static str },

    #[error("Cannot reach source server: {0}")]
    Connection(String),

    #[error("Source server rejected credentials: {0}")]
    Auth(String),

    #[error("No databases selected for dump")]
    EmptySelection,

    #[error("Dump stream was already handed to another reader")]
    StreamAlreadyTaken,

    #[error("mysqldump exited with {}: {stderr}", exit_code_label(.code))]
    DumpExit { code: Option<i32>, stderr: String },

    #[error("Transfer to object storage failed: {0}")]
    Transfer(String),

    #[error("Storage operation failed: {0}")]
    Storage(String),

    #[error("Staging the dump locally failed: {0}")]
    Staging(String),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
