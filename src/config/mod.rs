// mysqlbackuptool/src/config/mod.rs
use clap::{Parser, ValueEnum};
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::errors::{BackupError, Result};

pub const DEFAULT_HOSTNAME: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_RETENTION_DAYS: u32 = 7;
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 100;
/// Region handed to the SDK when a custom endpoint is used without an explicit region.
const FALLBACK_REGION: &str = "us-east-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UploadMode {
    /// Pipe mysqldump output straight into a multipart upload.
    Stream,
    /// Write the dump to the staging directory first, then upload the file.
    Staged,
}

/// Dump MariaDB/MySQL databases and upload them to S3-compatible storage, then clean up old backups.
///
/// Every flag can also be set through the environment variable shown in its help text.
#[derive(Parser)]
#[command(name = "mysqlbackuptool", version)]
pub struct Cli {
    /// MySQL user name
    #[arg(long, env = "MYSQL_USER")]
    pub user: String,

    /// MySQL password
    #[arg(long, env = "MYSQL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// MySQL hostname
    #[arg(long, env = "MYSQL_HOSTNAME", default_value = DEFAULT_HOSTNAME)]
    pub hostname: String,

    /// MySQL port
    #[arg(long, env = "MYSQL_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Local socket path; takes precedence over hostname and port
    #[arg(long, env = "MYSQL_SOCKET")]
    pub socket: Option<PathBuf>,

    /// S3 bucket name
    #[arg(long, env = "S3_BUCKET")]
    pub bucket: String,

    /// S3-compatible endpoint URL
    #[arg(long, env = "S3_ENDPOINT")]
    pub endpoint_url: Option<String>,

    /// S3 region
    #[arg(long, env = "S3_REGION")]
    pub region: Option<String>,

    /// Named profile from the shared credentials/config files
    #[arg(long, env = "AWS_PROFILE")]
    pub profile: Option<String>,

    /// Shared credentials file to read the profile from
    #[arg(long, env = "AWS_SHARED_CREDENTIALS_FILE")]
    pub credentials_file: Option<PathBuf>,

    /// Static access key id (requires --secret-access-key)
    #[arg(long, env = "S3_ACCESS_KEY_ID")]
    pub access_key_id: Option<String>,

    /// Static secret access key (requires --access-key-id)
    #[arg(long, env = "S3_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    /// Prefix for backup object keys
    #[arg(long, env = "PREFIX")]
    pub prefix: String,

    /// Number of days to keep backups
    #[arg(long, env = "RETENTION_DAYS", default_value_t = DEFAULT_RETENTION_DAYS)]
    pub retention_days: u32,

    /// How the dump reaches object storage
    #[arg(long, env = "UPLOAD_MODE", value_enum, default_value_t = UploadMode::Stream)]
    pub upload_mode: UploadMode,

    /// Directory for the staged dump file (staged mode only)
    #[arg(long, env = "STAGING_DIR")]
    pub staging_dir: Option<PathBuf>,

    /// Interval between progress samples, in milliseconds
    #[arg(long, env = "PROGRESS_INTERVAL_MS", default_value_t = DEFAULT_PROGRESS_INTERVAL_MS)]
    pub progress_interval_ms: u64,

    /// Upload only; do not delete expired backups
    #[arg(long, env = "SKIP_CLEANUP")]
    pub skip_cleanup: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEndpoint {
    Tcp { host: String, port: u16 },
    Socket(PathBuf),
}

#[derive(Clone)]
pub struct SourceConfig {
    pub user: String,
    pub password: Option<String>,
    pub endpoint: SourceEndpoint,
}

impl SourceConfig {
    /// Connection arguments shared by `mysql` and `mysqldump`.
    /// The password is deliberately absent; it travels through `MYSQL_PWD`.
    pub fn connection_args(&self) -> Vec<OsString> {
        let mut args = vec![OsString::from(format!("--user={}", self.user))];
        match &self.endpoint {
            SourceEndpoint::Tcp { host, port } => {
                args.push(OsString::from(format!("--host={}", host)));
                args.push(OsString::from(format!("--port={}", port)));
                args.push(OsString::from("--protocol=TCP"));
            }
            SourceEndpoint::Socket(path) => {
                let mut arg = OsString::from("--socket=");
                arg.push(path.as_os_str());
                args.push(arg);
            }
        }
        args
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Clone)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub credentials_file: Option<PathBuf>,
    pub static_credentials: Option<StaticCredentials>,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub prefix: String,
    pub retention_days: u32,
    pub upload_mode: UploadMode,
    pub staging_dir: PathBuf,
    pub progress_interval: Duration,
    pub skip_cleanup: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub storage: StorageConfig,
    pub backup: BackupConfig,
}

impl AppConfig {
    /// Validates the parsed command line and freezes it into the configuration
    /// the rest of the program runs on.
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let user = non_empty(cli.user, "user")?;
        let bucket = non_empty(cli.bucket, "bucket")?;
        let prefix = non_empty(cli.prefix, "prefix")?;
        if prefix.ends_with('-') {
            return Err(BackupError::Config(format!(
                "prefix '{}' must not end with '-'; the timestamp separator is added automatically",
                prefix
            )));
        }

        if cli.retention_days == 0 {
            return Err(BackupError::Config(
                "retention-days must be at least 1, otherwise the fresh backup would be swept immediately".to_string(),
            ));
        }
        if cli.progress_interval_ms == 0 {
            return Err(BackupError::Config("progress-interval-ms must be at least 1".to_string()));
        }

        let endpoint = match cli.socket {
            Some(socket) => SourceEndpoint::Socket(socket),
            None => SourceEndpoint::Tcp {
                host: non_empty(cli.hostname, "hostname")?,
                port: cli.port,
            },
        };

        let endpoint_url = cli.endpoint_url.filter(|s| !s.trim().is_empty());
        if let Some(raw) = &endpoint_url {
            let parsed = Url::parse(raw)
                .map_err(|e| BackupError::Config(format!("Invalid endpoint URL '{}': {}", raw, e)))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(BackupError::Config(format!(
                    "Endpoint URL '{}' must use http or https",
                    raw
                )));
            }
        }

        let region = cli
            .region
            .filter(|s| !s.trim().is_empty())
            .or_else(|| endpoint_url.as_ref().map(|_| FALLBACK_REGION.to_string()));

        let static_credentials = match (
            cli.access_key_id.filter(|s| !s.is_empty()),
            cli.secret_access_key.filter(|s| !s.is_empty()),
        ) {
            (Some(access_key_id), Some(secret_access_key)) => Some(StaticCredentials {
                access_key_id,
                secret_access_key,
            }),
            (None, None) => None,
            _ => {
                return Err(BackupError::Config(
                    "access-key-id and secret-access-key must be provided together".to_string(),
                ));
            }
        };

        let staging_dir = match cli.staging_dir {
            Some(dir) => {
                if !dir.is_dir() {
                    return Err(BackupError::Config(format!(
                        "staging-dir {} does not exist or is not a directory",
                        dir.display()
                    )));
                }
                dir
            }
            None => std::env::temp_dir(),
        };

        Ok(AppConfig {
            source: SourceConfig {
                user,
                password: cli.password.filter(|s| !s.is_empty()),
                endpoint,
            },
            storage: StorageConfig {
                bucket,
                endpoint_url,
                region,
                profile: cli.profile.filter(|s| !s.is_empty()),
                credentials_file: cli.credentials_file,
                static_credentials,
            },
            backup: BackupConfig {
                prefix,
                retention_days: cli.retention_days,
                upload_mode: cli.upload_mode,
                staging_dir,
                progress_interval: Duration::from_millis(cli.progress_interval_ms),
                skip_cleanup: cli.skip_cleanup,
            },
        })
    }
}

fn non_empty(value: String, name: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BackupError::Config(format!("{} cannot be empty", name)));
    }
    Ok(trimmed.to_string())
}
