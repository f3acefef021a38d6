//! PostgreSQL/PostGIS access.
//!
//! Every step runs in its own transaction: a failure rolls back that step
//! only, earlier steps stay committed.

pub mod browse;
pub mod finalize;
pub mod publish;
pub mod writer;

use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use std::str::FromStr;

use crate::config::DatabaseConfig;

const APPLICATION_NAME: &str = "shpload";

/// Helper used by the GeoJSON views: exposes every column but `geom`, plus
/// the geometry as GeoJSON.
const GEOJSON_VIEW_FUNCTION: &str = r#"
CREATE OR REPLACE FUNCTION public.create_geojson_view(
  p_schema text,
  p_table  text,
  p_view   text DEFAULT NULL
) RETURNS void LANGUAGE plpgsql AS
$$
DECLARE
  v_view text := coalesce(p_view, 'v_' || p_table);
  cols   text;
  sql    text;
BEGIN
  SELECT string_agg(quote_ident(column_name), ', ' ORDER BY ordinal_position)
  INTO cols
  FROM information_schema.columns
  WHERE table_schema = p_schema
    AND table_name   = p_table
    AND column_name <> 'geom';
  IF cols IS NULL THEN
    RAISE EXCEPTION 'Table %.% not found or has no columns', p_schema, p_table;
  END IF;
  sql := format(
    'CREATE OR REPLACE VIEW %I.%I AS
     SELECT %s,
            st_asgeojson(t.geom)::json AS geometry
     FROM %I.%I t;',
    p_schema, v_view, cols, p_schema, p_table
  );
  EXECUTE sql;
END;
$$
"#;

pub fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions> {
    let options = match &config.url {
        Some(url) => PgConnectOptions::from_str(url).context("Database: Invalid DATABASE_URL")?,
        None => PgConnectOptions::new()
            .host(config.host.trim())
            .port(config.port)
            .database(config.database.trim())
            .username(config.user.trim())
            .password(config.password.trim())
            .ssl_mode(
                PgSslMode::from_str(&config.ssl_mode)
                    .with_context(|| format!("Database: Invalid ssl mode '{}'", config.ssl_mode))?,
            ),
    };
    Ok(options.application_name(APPLICATION_NAME))
}

pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    config.validate()?;
    let options = connect_options(config)?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(config.connect_timeout)
        .test_before_acquire(true)
        .connect_with(options)
        .await
        .context("Database: Connection failed")?;
    Ok(pool)
}

/// Enables PostGIS and installs the GeoJSON view helper.
pub async fn ensure_postgis(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("CREATE EXTENSION IF NOT EXISTS postgis")
        .execute(&mut *tx)
        .await
        .context("Database: Failed to enable PostGIS")?;
    sqlx::query(GEOJSON_VIEW_FUNCTION)
        .execute(&mut *tx)
        .await
        .context("Database: Failed to create create_geojson_view()")?;
    tx.commit().await?;
    Ok(())
}

/// Errors after which no further file can succeed.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<sqlx::Error>(),
            Some(
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Configuration(_)
            )
        )
    })
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}
