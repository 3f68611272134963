use anyhow::{Context, Result};
use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::services::cleanup::CleanupSettings;
use crate::services::storage::Provider;
use crate::services::storage::cloud::S3Settings;
use crate::services::storage::factory::StorageSettings;
use crate::services::storage::local::LocalSettings;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub storage: StorageSettings,
    /// Upload size cap, enforced before any backend call.
    pub max_file_size: u64,
    /// Default TTL for access URLs.
    pub url_ttl: Duration,
    /// TTL for signed client-side upload URLs.
    pub upload_sign_ttl: Duration,
    /// Per-driver-call deadline.
    pub operation_timeout: Duration,
    pub cleanup: CleanupSettings,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Media storage & resource lifecycle service")]
pub struct Args {
    /// Host to bind to (overrides MEDIA_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Active storage provider: local or s3 (overrides MEDIA_STORE_PROVIDER)
    #[arg(long)]
    pub provider: Option<String>,

    /// Root directory for local object storage (overrides MEDIA_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides MEDIA_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        let host = args
            .host
            .unwrap_or_else(|| env_string("MEDIA_STORE_HOST", "0.0.0.0"));
        let port = match args.port {
            Some(port) => port,
            None => env_parse("MEDIA_STORE_PORT", 3000)?,
        };
        let database_url = args.database_url.unwrap_or_else(|| {
            env_string(
                "MEDIA_STORE_DATABASE_URL",
                "sqlite://./data/meta/media_store.db",
            )
        });

        let provider_raw = args
            .provider
            .unwrap_or_else(|| env_string("MEDIA_STORE_PROVIDER", "local"));
        let provider = Provider::from_str(&provider_raw)
            .with_context(|| format!("parsing MEDIA_STORE_PROVIDER value `{provider_raw}`"))?;

        let storage_dir = args
            .storage_dir
            .unwrap_or_else(|| env_string("MEDIA_STORE_STORAGE_DIR", "./data/objects"));
        let public_base_url = env_string("MEDIA_STORE_PUBLIC_URL", "/media");

        let url_ttl = Duration::from_secs(env_parse("MEDIA_STORE_URL_TTL_SECS", 3600u64)?);
        let s3 = read_s3_settings(url_ttl)?;

        if provider == Provider::S3 && s3.is_none() {
            anyhow::bail!("MEDIA_STORE_PROVIDER=s3 requires MEDIA_STORE_S3_BUCKET to be set");
        }

        let operation_timeout =
            Duration::from_secs(env_parse("MEDIA_STORE_OPERATION_TIMEOUT_SECS", 30u64)?);

        let cfg = Self {
            host,
            port,
            database_url,
            storage: StorageSettings {
                provider,
                local: LocalSettings {
                    root: PathBuf::from(storage_dir),
                    public_base_url,
                },
                s3,
            },
            max_file_size: env_parse("MEDIA_STORE_MAX_FILE_SIZE", 50 * 1024 * 1024u64)?,
            url_ttl,
            upload_sign_ttl: Duration::from_secs(env_parse(
                "MEDIA_STORE_UPLOAD_SIGN_TTL_SECS",
                900u64,
            )?),
            operation_timeout,
            cleanup: CleanupSettings {
                retention: Duration::from_secs(
                    env_parse("MEDIA_STORE_RETENTION_HOURS", 72u64)? * 3600,
                ),
                sweep_interval: Duration::from_secs(env_parse(
                    "MEDIA_STORE_SWEEP_INTERVAL_SECS",
                    3600u64,
                )?),
                operation_timeout,
            },
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {name} value `{value}`")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).context(format!("reading {name}")),
    }
}

/// S3 settings are read from the environment only; they exist whenever a
/// bucket is configured, whether or not s3 is the active provider (the
/// factory needs them for config tests and hot swaps).
fn read_s3_settings(default_url_ttl: Duration) -> Result<Option<S3Settings>> {
    let bucket = env_string("MEDIA_STORE_S3_BUCKET", "");
    if bucket.is_empty() {
        return Ok(None);
    }
    Ok(Some(S3Settings {
        endpoint: env_string("MEDIA_STORE_S3_ENDPOINT", ""),
        bucket,
        region: env_string("MEDIA_STORE_S3_REGION", "us-east-1"),
        access_key_id: env_string("MEDIA_STORE_S3_ACCESS_KEY_ID", ""),
        secret_access_key: env_string("MEDIA_STORE_S3_SECRET_ACCESS_KEY", ""),
        public_base_url: {
            let url = env_string("MEDIA_STORE_S3_PUBLIC_URL", "");
            (!url.is_empty()).then_some(url)
        },
        default_url_ttl,
    }))
}
