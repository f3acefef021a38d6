//! Read-only queries over what has been loaded.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::PgPool;

use super::{qualified, quote_ident};

/// Characters of WKT kept in previews.
pub const WKT_PREVIEW_CHARS: usize = 120;
pub const DEFAULT_PREVIEW_ROWS: i64 = 200;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GeometryTable {
    pub schema: String,
    pub table: String,
    pub geom_column: String,
    pub geom_type: Option<String>,
    pub srid: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableOverview {
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub row_count: i64,
    pub preview: Vec<serde_json::Value>,
}

const GEOMETRY_TABLES_SQL: &str = "
SELECT n.nspname::text AS schema,
       c.relname::text AS table,
       a.attname::text AS geom_column,
       postgis_typmod_type(a.atttypmod) AS geom_type,
       postgis_typmod_srid(a.atttypmod) AS srid
FROM pg_attribute a
JOIN pg_class c ON a.attrelid = c.oid
JOIN pg_namespace n ON c.relnamespace = n.oid
JOIN pg_type t ON a.atttypid = t.oid
WHERE t.typname = 'geometry'
  AND a.attnum > 0
  AND NOT a.attisdropped
  AND c.relkind IN ('r', 'p', 'm', 'f', 'v')
  AND n.nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast', 'extensions')
ORDER BY n.nspname, c.relname, a.attname";

/// Every geometry column outside the system schemas, tables and views alike.
pub async fn list_geometry_tables(pool: &PgPool) -> Result<Vec<GeometryTable>> {
    sqlx::query_as::<_, GeometryTable>(GEOMETRY_TABLES_SQL)
        .fetch_all(pool)
        .await
        .context("Browse: Failed to list geometry columns")
}

/// One JSON object per row: every column except the geometry, plus `wkt`.
pub fn preview_sql(schema: &str, table: &str, geom_column: &str) -> String {
    format!(
        "SELECT ((to_jsonb(t) - $1::text) || jsonb_build_object('wkt', LEFT(ST_AsText(t.{}), {})))::text FROM {} t LIMIT $2",
        quote_ident(geom_column),
        WKT_PREVIEW_CHARS,
        qualified(schema, table)
    )
}

pub async fn table_overview(
    pool: &PgPool,
    schema: &str,
    table: &str,
    geom_column: &str,
    limit: i64,
) -> Result<TableOverview> {
    let columns = sqlx::query_as::<_, (String, String)>(
        "SELECT column_name::text, data_type::text
         FROM information_schema.columns
         WHERE table_schema = $1 AND table_name = $2
         ORDER BY ordinal_position",
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await
    .context("Browse: Failed to list columns")?
    .into_iter()
    .map(|(name, data_type)| ColumnInfo { name, data_type })
    .collect();

    let row_count = match sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM {}",
        qualified(schema, table)
    ))
    .fetch_one(pool)
    .await
    {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!("Browse: count on {}.{} failed: {}", schema, table, e);
            0
        }
    };

    let rows: Vec<String> = sqlx::query_scalar(&preview_sql(schema, table, geom_column))
        .bind(geom_column)
        .bind(limit.max(0))
        .fetch_all(pool)
        .await
        .with_context(|| format!("Browse: Failed to preview {schema}.{table}"))?;
    let preview = rows
        .iter()
        .map(|row| serde_json::from_str(row))
        .collect::<Result<Vec<_>, _>>()
        .context("Browse: Invalid preview row")?;

    Ok(TableOverview {
        schema: schema.to_string(),
        table: table.to_string(),
        columns,
        row_count,
        preview,
    })
}

/// Splits `schema.table`; a bare name lives in `default_schema`.
pub fn split_qualified<'a>(name: &'a str, default_schema: &'a str) -> (&'a str, &'a str) {
    match name.split_once('.') {
        Some((schema, table)) if !schema.is_empty() && !table.is_empty() => (schema, table),
        _ => (default_schema, name),
    }
}
