use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_BATCH_SIZE: usize = 5000;
pub const DEFAULT_ERROR_REPORT: &str = "ingest_shp_errors.json";
const ENV_PREFIX: &str = "SHPLOAD";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SUPABASE_HOST is missing (set it or pass --host / DATABASE_URL)")]
    MissingHost,
    #[error("SUPABASE_HOST must be a bare hostname, not a URL like 'postgres://...'")]
    HostIsUrl,
    #[error("SUPABASE_HOST must not contain a port; use SUPABASE_PORT")]
    HostHasPort,
    #[error("SUPABASE_PASSWORD is missing")]
    MissingPassword,
}

/// Connection settings, resolved once at startup and passed to every stage.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl_mode: String,
    pub connect_timeout: Duration,
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_some() {
            return Ok(());
        }
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ConfigError::MissingHost);
        }
        if host.contains("://") {
            return Err(ConfigError::HostIsUrl);
        }
        if host.contains(':') {
            return Err(ConfigError::HostHasPort);
        }
        if self.password.trim().is_empty() {
            return Err(ConfigError::MissingPassword);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IfExists {
    /// Drop and recreate the table.
    #[default]
    Replace,
    /// Keep the table and add rows to it.
    Append,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PublishConfig {
    #[serde(default)]
    pub geojson_view: bool,
    #[serde(default)]
    pub reprojected_view: bool,
    #[serde(default = "default_true")]
    pub anon_policy: bool,
    #[serde(default)]
    pub grant_view: bool,
    #[serde(default = "default_anon_role")]
    pub anon_role: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            geojson_view: false,
            reprojected_view: false,
            anon_policy: true,
            grant_view: false,
            anon_role: default_anon_role(),
        }
    }
}

impl PublishConfig {
    pub fn is_noop(&self) -> bool {
        !(self.geojson_view || self.reprojected_view || self.anon_policy || self.grant_view)
    }
}

fn default_true() -> bool {
    true
}

fn default_anon_role() -> String {
    "anon".to_string()
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_error_report() -> PathBuf {
    PathBuf::from(DEFAULT_ERROR_REPORT)
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default)]
    pub if_exists: IfExists,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub default_srid: Option<i32>,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default = "default_error_report")]
    pub error_report: PathBuf,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            if_exists: IfExists::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            default_srid: None,
            publish: PublishConfig::default(),
            error_report: default_error_report(),
        }
    }
}

impl IngestSettings {
    /// Defaults, overlaid by an optional YAML file, overlaid by
    /// `SHPLOAD__*` environment variables (`SHPLOAD__PUBLISH__GEOJSON_VIEW=true`).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
