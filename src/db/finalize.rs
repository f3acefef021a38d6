//! Post-load steps: surrogate key, optional multi/2D coercion, spatial
//! index, planner statistics.

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Transaction};

use super::{qualified, quote_ident};
use crate::geometry::GeometryKind;
use crate::naming::{GEOMETRY_COLUMN, KEY_COLUMN, suffixed};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coercion {
    pub kind: GeometryKind,
    pub srid: i32,
}

/// Decides whether the geometry column may be rewritten to a uniform 2D
/// multi type. Without a known SRID the rewrite is not attempted.
pub fn plan_coercion(family: Option<GeometryKind>, srid: Option<i32>) -> Option<Coercion> {
    let srid = srid?;
    let kind = family?;
    Some(Coercion { kind, srid })
}

/// Index name for the table's geometry column, kept within PostgreSQL's
/// identifier limit so that re-runs find the same name.
pub fn index_name(table: &str) -> String {
    suffixed(table, "_geom_gix")
}

pub fn primary_key_name(table: &str) -> String {
    suffixed(table, "_pkey")
}

pub async fn finalize_table(
    pool: &PgPool,
    schema: &str,
    table: &str,
    coercion: Option<Coercion>,
) -> Result<()> {
    let target = qualified(schema, table);
    let geom = quote_ident(GEOMETRY_COLUMN);
    let mut tx = pool.begin().await?;

    sqlx::query(&format!(
        "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} bigserial",
        target,
        quote_ident(KEY_COLUMN)
    ))
    .execute(&mut *tx)
    .await
    .context("Finalize: Failed to add surrogate key")?;

    ensure_primary_key(&mut tx, schema, table).await?;

    if let Some(Coercion { kind, srid }) = coercion {
        tracing::info!("{}: coercing geometry to {}, SRID {}", target, kind.as_str(), srid);
        sqlx::query(&format!(
            "ALTER TABLE {target} ALTER COLUMN {geom} TYPE geometry({},{srid}) USING ST_Multi(ST_Force2D({geom}))",
            kind.as_str()
        ))
        .execute(&mut *tx)
        .await
        .context("Finalize: Failed to coerce geometry column")?;
    }

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} USING GIST ({})",
        quote_ident(&index_name(table)),
        target,
        geom
    ))
    .execute(&mut *tx)
    .await
    .context("Finalize: Failed to create spatial index")?;

    sqlx::query(&format!("ANALYZE {target}"))
        .execute(&mut *tx)
        .await
        .context("Finalize: ANALYZE failed")?;

    tx.commit().await?;
    Ok(())
}

/// Declares the surrogate key as primary key unless the table already has one.
async fn ensure_primary_key(tx: &mut Transaction<'_, Postgres>, schema: &str, table: &str) -> Result<()> {
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT con.conname::text
         FROM pg_constraint con
         JOIN pg_class c ON c.oid = con.conrelid
         JOIN pg_namespace n ON n.oid = c.relnamespace
         WHERE con.contype = 'p' AND n.nspname = $1 AND c.relname = $2",
    )
    .bind(schema)
    .bind(table)
    .fetch_optional(&mut **tx)
    .await
    .context("Finalize: Failed to look up primary key")?;

    if let Some(name) = existing {
        tracing::debug!("{}.{} already has primary key {}", schema, table, name);
        return Ok(());
    }

    sqlx::query(&format!(
        "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
        qualified(schema, table),
        quote_ident(&primary_key_name(table)),
        quote_ident(KEY_COLUMN)
    ))
    .execute(&mut **tx)
    .await
    .context("Finalize: Failed to add primary key")?;
    Ok(())
}
