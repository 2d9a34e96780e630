//! Server configuration.
//!
//! Listen address, handoff record, and drain timeout come from CLI flags;
//! everything about the database and its replica comes from the environment.
//! The assembled [`Config`] is immutable and passed into every component —
//! nothing reads ambient globals after startup.
//!
//! # Environment Variables
//!
//! - `DATABASE_URL` — required; `sqlite:/path/to/app.db` (or a bare path)
//! - `SERVER_NAME` — diagnostic name echoed in responses (default: `default`)
//! - `SKIP_REPLICATION` — `1` disables restore and replication entirely
//! - `REPLICA_BUCKET` — replica bucket (default: `selkie-example-bucket`)
//! - `REPLICA_SYNC_INTERVAL_SECS` — replication tick override
//! - `IS_LOCAL` — `1` targets a MinIO-style store at `S3_ENDPOINT`
//! - `S3_ENDPOINT` — local object store endpoint (default: `http://s3:9000`)
//! - `INITIAL_SCHEMA_PATH` — SQL file used to bootstrap a fresh database

use clap::Parser;
use selkie_replica::ReplicaTarget;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const DEFAULT_REPLICA_BUCKET: &str = "selkie-example-bucket";
const DEFAULT_LOCAL_S3_ENDPOINT: &str = "http://s3:9000";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("DATABASE_URL not specified")]
    MissingDatabaseUrl,

    #[error("unsupported DATABASE_URL {url:?}: only sqlite paths are supported")]
    UnsupportedDatabaseUrl { url: String },

    #[error("invalid {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// CLI flags. Everything else is environment-driven.
#[derive(Parser, Debug)]
#[command(name = "selkie-server", about = "Replicated SQLite demo server")]
pub struct Flags {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Handoff record file shared between old and new instances.
    #[arg(long, default_value = "/tmp/selkie.pid")]
    pub handoff_record: PathBuf,

    /// Maximum seconds to wait for in-flight requests on shutdown.
    #[arg(long, default_value_t = 60)]
    pub graceful_timeout_secs: u64,
}

/// Fully-resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Logical server name, diagnostics only.
    pub server_name: String,
    pub listen: SocketAddr,
    pub handoff_record: PathBuf,
    pub graceful_timeout: Duration,
    /// Local database file.
    pub db_path: PathBuf,
    /// SQL file used to bootstrap a fresh database, if any.
    pub schema_path: Option<PathBuf>,
    /// `None` when replication is disabled.
    pub replica: Option<ReplicaTarget>,
}

impl Config {
    /// Parse flags and environment into a complete configuration.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_flags_and_env(Flags::parse())
    }

    pub fn from_flags_and_env(flags: Flags) -> Result<Self, ConfigError> {
        let server_name =
            std::env::var("SERVER_NAME").unwrap_or_else(|_| "default".to_string());

        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;
        let db_path = parse_database_url(&database_url)?;

        let schema_path = std::env::var("INITIAL_SCHEMA_PATH").ok().map(PathBuf::from);

        let replica = if env_flag("SKIP_REPLICATION") {
            None
        } else {
            let bucket = std::env::var("REPLICA_BUCKET")
                .unwrap_or_else(|_| DEFAULT_REPLICA_BUCKET.to_string());
            // The prefix inside the bucket is the database file name.
            let prefix = db_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("db")
                .to_string();

            let mut target = ReplicaTarget::new(bucket, prefix);
            if env_flag("IS_LOCAL") {
                let endpoint = std::env::var("S3_ENDPOINT")
                    .unwrap_or_else(|_| DEFAULT_LOCAL_S3_ENDPOINT.to_string());
                target = target.with_endpoint(endpoint);
            }
            if let Ok(raw) = std::env::var("REPLICA_SYNC_INTERVAL_SECS") {
                let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                    name: "REPLICA_SYNC_INTERVAL_SECS",
                    value: raw.clone(),
                })?;
                target = target.with_sync_interval(Duration::from_secs(secs));
            }
            Some(target)
        };

        Ok(Self {
            server_name,
            listen: flags.listen,
            handoff_record: flags.handoff_record,
            graceful_timeout: Duration::from_secs(flags.graceful_timeout_secs),
            db_path,
            schema_path,
            replica,
        })
    }

    pub fn log_config(&self) {
        info!(server_name = %self.server_name, "Server name");
        info!(listen = %self.listen, "Listen address");
        info!(db = %self.db_path.display(), "Database path");
        match &self.replica {
            Some(target) => info!(
                bucket = %target.bucket,
                prefix = %target.prefix,
                interval = ?target.sync_interval,
                "Replication enabled"
            ),
            None => info!("Replication disabled"),
        }
    }
}

/// `sqlite:/path/app.db`, `sqlite://path`, or a bare path. Anything else is
/// a startup error — never continue with an unknown database state.
fn parse_database_url(url: &str) -> Result<PathBuf, ConfigError> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);

    if path.is_empty() || path.contains("://") {
        return Err(ConfigError::UnsupportedDatabaseUrl {
            url: url.to_string(),
        });
    }
    Ok(PathBuf::from(path))
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1").unwrap_or(false)
}
