use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{DatabaseConfig, IfExists, IngestSettings};
use crate::db::{self, browse};
use crate::encoding;
use crate::naming::table_name_from_path;
use crate::pipeline::{self, IngestOptions, IngestReport};

#[derive(Parser)]
#[command(author, version, about = "Load shapefile layers into PostGIS", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Ingest settings file (YAML)
    #[arg(short, long, global = true)]
    pub settings: Option<PathBuf>,

    #[command(flatten)]
    pub db: DbArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    /// Full connection URL; takes precedence over the individual settings
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// Database host name (no scheme, no port)
    #[arg(long, env = "SUPABASE_HOST", global = true, default_value = "")]
    pub host: String,

    #[arg(long, env = "SUPABASE_PORT", global = true, default_value_t = 5432)]
    pub port: u16,

    #[arg(long, env = "SUPABASE_DB", global = true, default_value = "postgres")]
    pub dbname: String,

    #[arg(long, env = "SUPABASE_USER", global = true, default_value = "postgres")]
    pub user: String,

    #[arg(long, env = "SUPABASE_PASSWORD", global = true, default_value = "", hide_env_values = true)]
    pub password: String,

    /// disable, prefer, require, verify-ca or verify-full
    #[arg(long, global = true, default_value = "require")]
    pub ssl_mode: String,

    /// Connection timeout in seconds
    #[arg(long, global = true, default_value_t = 10)]
    pub connect_timeout: u64,
}

impl DbArgs {
    pub fn to_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            url: self.database_url.clone().filter(|u| !u.trim().is_empty()),
            host: self.host.clone(),
            port: self.port,
            database: self.dbname.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            ssl_mode: self.ssl_mode.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout),
        }
    }
}

/// Command-line overrides for the settings file.
#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// Target schema
    #[arg(long)]
    pub schema: Option<String>,

    #[arg(long, value_enum)]
    pub if_exists: Option<IfExists>,

    /// Rows per INSERT statement
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// SRID assumed for layers whose CRS is unknown
    #[arg(long)]
    pub default_srid: Option<i32>,

    /// Where failed files are reported
    #[arg(long)]
    pub error_report: Option<PathBuf>,

    /// Create the v_<table> GeoJSON view
    #[arg(long)]
    pub geojson_view: bool,

    /// Create the v_<table>_4326 view
    #[arg(long)]
    pub reprojected_view: bool,

    /// Grant SELECT on the GeoJSON view to the anonymous role
    #[arg(long)]
    pub grant_view: bool,

    /// Skip row level security and the anonymous read policy
    #[arg(long)]
    pub no_anon_policy: bool,

    #[arg(long)]
    pub anon_role: Option<String>,
}

impl SettingsArgs {
    pub fn apply(&self, mut settings: IngestSettings) -> IngestSettings {
        if let Some(schema) = &self.schema {
            settings.schema = schema.clone();
        }
        if let Some(mode) = self.if_exists {
            settings.if_exists = mode;
        }
        if let Some(size) = self.batch_size {
            settings.batch_size = size;
        }
        if self.default_srid.is_some() {
            settings.default_srid = self.default_srid;
        }
        if let Some(path) = &self.error_report {
            settings.error_report = path.clone();
        }
        settings.publish.geojson_view |= self.geojson_view;
        settings.publish.reprojected_view |= self.reprojected_view;
        settings.publish.grant_view |= self.grant_view;
        if self.no_anon_policy {
            settings.publish.anon_policy = false;
        }
        if let Some(role) = &self.anon_role {
            settings.publish.anon_role = role.clone();
        }
        settings
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Load every shapefile below a directory, one table per file
    Ingest {
        dir: PathBuf,
        #[command(flatten)]
        overrides: SettingsArgs,
    },
    /// Load the largest shapefile of a zip archive
    Upload {
        archive: PathBuf,
        /// Table name (defaults to the shapefile name)
        #[arg(long)]
        table: Option<String>,
        #[command(flatten)]
        overrides: SettingsArgs,
    },
    /// List geometry columns
    Tables,
    /// Columns, row count and a preview of one table
    Inspect {
        /// schema.table, or a table of the configured schema
        name: String,
        #[arg(long)]
        geom_column: Option<String>,
        #[arg(long, default_value_t = browse::DEFAULT_PREVIEW_ROWS)]
        limit: i64,
    },
}

/// One entry of the batch error report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IngestFailure {
    pub file: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub ingested: Vec<IngestReport>,
    pub failed: Vec<IngestFailure>,
}

pub async fn run(cli: Cli) -> Result<()> {
    let settings = IngestSettings::load(cli.settings.as_deref()).context("Config: Failed to load settings")?;
    let db_config = cli.db.to_config();

    match cli.command {
        Command::Ingest { dir, overrides } => {
            let settings = overrides.apply(settings);
            let pool = open(&db_config).await?;
            let summary = ingest_directory(&pool, &dir, &settings).await?;
            print_json(&summary)
        }
        Command::Upload {
            archive,
            table,
            overrides,
        } => {
            let settings = overrides.apply(settings);
            let file = std::fs::File::open(&archive).with_context(|| format!("Upload: Cannot open {archive:?}"))?;
            let pool = open(&db_config).await?;
            let report = pipeline::upload_archive(&pool, file, table.as_deref(), &settings).await?;
            print_json(&report)
        }
        Command::Tables => {
            let pool = db::connect(&db_config).await?;
            print_json(&browse::list_geometry_tables(&pool).await?)
        }
        Command::Inspect {
            name,
            geom_column,
            limit,
        } => {
            let pool = db::connect(&db_config).await?;
            let (schema, table) = browse::split_qualified(&name, &settings.schema);
            let geom_column = match geom_column {
                Some(column) => column,
                None => browse::list_geometry_tables(&pool)
                    .await?
                    .into_iter()
                    .find(|t| t.schema == schema && t.table == table)
                    .map(|t| t.geom_column)
                    .unwrap_or_else(|| crate::naming::GEOMETRY_COLUMN.to_string()),
            };
            let overview = browse::table_overview(&pool, schema, table, &geom_column, limit).await?;
            print_json(&overview)
        }
    }
}

async fn open(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = db::connect(config).await?;
    db::ensure_postgis(&pool).await?;
    Ok(pool)
}

/// Ingests every shapefile below `root`. Per-file errors are collected and
/// written to the error report; connectivity errors abort the run.
pub async fn ingest_directory(pool: &PgPool, root: &Path, settings: &IngestSettings) -> Result<BatchSummary> {
    let root = std::fs::canonicalize(root).with_context(|| format!("Batch: Cannot open {root:?}"))?;
    let files = pipeline::find_shapefiles(&root)?;
    tracing::info!("Root: {:?} ({} shapefiles)", root, files.len());

    let mut summary = BatchSummary {
        ingested: Vec::new(),
        failed: Vec::new(),
    };
    for path in files {
        tracing::info!("=== {:?}", path);
        let table = table_name_from_path(&root, &path);
        match ingest_one(pool, &path, &table, settings).await {
            Ok(Some(report)) => summary.ingested.push(report),
            Ok(None) => {}
            Err(err) => {
                tracing::error!("{:?}: {:#}", path, err);
                summary.failed.push(IngestFailure {
                    file: path.display().to_string(),
                    error: format!("{err:#}"),
                });
                if db::is_fatal(&err) {
                    write_error_report(&settings.error_report, &summary.failed)?;
                    return Err(err.context(format!("Batch: Aborted at {}", path.display())));
                }
            }
        }
    }

    if !summary.failed.is_empty() {
        write_error_report(&settings.error_report, &summary.failed)?;
        tracing::warn!(
            "{} error(s), details in {:?}",
            summary.failed.len(),
            settings.error_report
        );
    }
    tracing::info!("Done: {} tables", summary.ingested.len());
    Ok(summary)
}

async fn ingest_one(
    pool: &PgPool,
    path: &Path,
    table: &str,
    settings: &IngestSettings,
) -> Result<Option<IngestReport>> {
    let collection = encoding::read_with_fallback(path)?;
    if collection.is_empty() {
        tracing::warn!("{:?}: empty layer, skipped", path);
        return Ok(None);
    }
    if collection.srid.is_none() && settings.default_srid.is_none() {
        tracing::warn!("{:?}: unknown CRS (missing .prj?), stored without SRID", path);
    }
    let report =
        pipeline::ingest_collection(pool, collection, table, settings, &IngestOptions::default()).await?;
    Ok(Some(report))
}

pub fn write_error_report(path: &Path, failures: &[IngestFailure]) -> Result<()> {
    let json = serde_json::to_string_pretty(failures)?;
    std::fs::write(path, json).with_context(|| format!("Batch: Failed to write error report {path:?}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::try_parse_from([
            "shpload",
            "ingest",
            "data",
            "--schema",
            "ppri",
            "--if-exists",
            "append",
            "--default-srid",
            "2154",
            "--geojson-view",
            "--no-anon-policy",
            "--host",
            "db.example.supabase.co",
        ])
        .unwrap();

        assert_eq!(cli.db.host, "db.example.supabase.co");
        let Command::Ingest { dir, overrides } = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(dir, PathBuf::from("data"));

        let settings = overrides.apply(IngestSettings::default());
        assert_eq!(settings.schema, "ppri");
        assert_eq!(settings.if_exists, IfExists::Append);
        assert_eq!(settings.default_srid, Some(2154));
        assert!(settings.publish.geojson_view);
        assert!(!settings.publish.anon_policy);
        assert_eq!(settings.batch_size, crate::config::DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn absent_flags_keep_file_settings() {
        let mut base = IngestSettings::default();
        base.publish.reprojected_view = true;
        base.default_srid = Some(4326);
        let settings = SettingsArgs::default().apply(base.clone());
        assert_eq!(settings, base);
    }

    #[test]
    fn error_report_is_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.json");
        let failures = vec![IngestFailure {
            file: "zones/a.shp".into(),
            error: "all encodings failed".into(),
        }];
        write_error_report(&path, &failures).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  {"));
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["file"], "zones/a.shp");
    }
}
