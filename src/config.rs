use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub storage_timeout: Duration,
    pub max_upload_bytes: usize,
    pub reconcile_grace: Duration,
}

/// What the process should do after configuration is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    Reconcile,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Personal file storage and sharing service")]
pub struct Args {
    /// Host to bind to (overrides FILEBOX_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILEBOX_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where blobs are stored (overrides FILEBOX_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FILEBOX_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Seconds before a content store call is abandoned (overrides FILEBOX_STORAGE_TIMEOUT_SECS)
    #[arg(long)]
    pub storage_timeout_secs: Option<u64>,

    /// Largest accepted upload in bytes (overrides FILEBOX_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Minimum age in seconds before an unreferenced blob is swept (overrides FILEBOX_RECONCILE_GRACE_SECS)
    #[arg(long)]
    pub reconcile_grace_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long, conflicts_with = "reconcile")]
    pub migrate: bool,

    /// Run one reconciliation sweep between records and blobs, then exit
    #[arg(long)]
    pub reconcile: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("FILEBOX_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or("FILEBOX_PORT", 3000u16)?;
        let env_storage =
            env::var("FILEBOX_STORAGE_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_db = env::var("FILEBOX_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/filebox.db".into());
        let env_timeout = env_or("FILEBOX_STORAGE_TIMEOUT_SECS", 10u64)?;
        let env_max_upload = env_or("FILEBOX_MAX_UPLOAD_BYTES", 25 * 1024 * 1024usize)?;
        let env_grace = env_or("FILEBOX_RECONCILE_GRACE_SECS", 3600u64)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            storage_timeout: Duration::from_secs(args.storage_timeout_secs.unwrap_or(env_timeout)),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            reconcile_grace: Duration::from_secs(args.reconcile_grace_secs.unwrap_or(env_grace)),
        };

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.reconcile {
            RunMode::Reconcile
        } else {
            RunMode::Serve
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse `name`, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
