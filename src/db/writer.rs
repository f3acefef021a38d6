//! Table creation and bulk insertion.

use anyhow::{Context, Result};
use geozero::{CoordDimensions, ToWkb};
use sqlx::postgres::Postgres;
use sqlx::query_builder::Separated;
use sqlx::{PgPool, QueryBuilder};

use super::{qualified, quote_ident};
use crate::config::IfExists;
use crate::naming::{GEOMETRY_COLUMN, SOURCE_GEOMETRY_COLUMN};
use crate::source::{FeatureCollection, FieldKind, FieldValue, Record};

/// PostgreSQL's limit on bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

/// Where and how a layer is stored. Built once per ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTarget {
    pub schema: String,
    pub table: String,
    pub geometry_type: String,
    pub srid: Option<i32>,
    pub has_z: bool,
}

impl TableTarget {
    pub fn qualified(&self) -> String {
        qualified(&self.schema, &self.table)
    }

    /// `geometry(POLYGONZ,2154)`, or without SRID constraint when unknown.
    pub fn column_type(&self) -> String {
        match self.srid {
            Some(srid) => format!("geometry({},{})", self.geometry_type, srid),
            None => format!("geometry({})", self.geometry_type),
        }
    }

    fn dimensions(&self) -> CoordDimensions {
        if self.has_z {
            CoordDimensions::xyz()
        } else {
            CoordDimensions::xy()
        }
    }
}

pub async fn ensure_schema(pool: &PgPool, schema: &str) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Writer: Failed to create schema {schema}"))?;
    tx.commit().await?;
    Ok(())
}

pub fn create_table_sql(layer: &FeatureCollection, target: &TableTarget, if_exists: IfExists) -> String {
    let mut columns: Vec<String> = layer
        .fields
        .iter()
        .map(|f| format!("{} {}", quote_ident(&f.name), f.kind.sql_type()))
        .collect();
    columns.push(format!(
        "{} {}",
        quote_ident(&layer.geometry_column),
        target.column_type()
    ));

    let create = match if_exists {
        IfExists::Replace => "CREATE TABLE",
        IfExists::Append => "CREATE TABLE IF NOT EXISTS",
    };
    format!("{} {} ({})", create, target.qualified(), columns.join(", "))
}

/// Rows per INSERT: the configured batch size, capped by the bind limit.
pub fn rows_per_statement(batch_size: usize, field_count: usize) -> usize {
    let per_row = field_count + 1;
    batch_size.clamp(1, (MAX_BIND_PARAMS / per_row).max(1))
}

/// Writes `layer` in one transaction and returns the number of rows inserted.
pub async fn write_table(
    pool: &PgPool,
    layer: &FeatureCollection,
    target: &TableTarget,
    if_exists: IfExists,
    batch_size: usize,
) -> Result<u64> {
    let mut tx = pool.begin().await?;

    if if_exists == IfExists::Replace {
        sqlx::query(&format!("DROP TABLE IF EXISTS {} CASCADE", target.qualified()))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Writer: Failed to drop {}", target.qualified()))?;
    }
    sqlx::query(&create_table_sql(layer, target, if_exists))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Writer: Failed to create {}", target.qualified()))?;

    let chunk_rows = rows_per_statement(batch_size, layer.fields.len());
    if chunk_rows < batch_size {
        tracing::debug!(
            "Batch size {} lowered to {} rows for {} columns",
            batch_size,
            chunk_rows,
            layer.fields.len() + 1
        );
    }

    let column_list = layer
        .fields
        .iter()
        .map(|f| quote_ident(&f.name))
        .chain(std::iter::once(quote_ident(&layer.geometry_column)))
        .collect::<Vec<_>>()
        .join(", ");
    let kinds: Vec<FieldKind> = layer.fields.iter().map(|f| f.kind).collect();
    let dims = target.dimensions();

    let mut written = 0u64;
    for (batch_no, chunk) in layer.records.chunks(chunk_rows).enumerate() {
        let encoded = chunk
            .iter()
            .map(|record| encode_geometry(record, dims, target.srid))
            .collect::<Result<Vec<_>>>()?;

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) ",
            target.qualified(),
            column_list
        ));
        builder.push_values(chunk.iter().zip(encoded), |mut row, (record, wkb)| {
            for (value, kind) in record.values.iter().zip(&kinds) {
                push_value(&mut row, value, *kind);
            }
            row.push("ST_GeomFromEWKB(")
                .push_bind_unseparated(wkb)
                .push_unseparated(")");
        });

        let result = builder
            .build()
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Writer: Insert batch {} failed", batch_no + 1))?;
        written += result.rows_affected();
        tracing::debug!("{}: {} rows written", target.qualified(), written);
    }

    tx.commit().await?;
    Ok(written)
}

fn encode_geometry(record: &Record, dims: CoordDimensions, srid: Option<i32>) -> Result<Option<Vec<u8>>> {
    record
        .geometry
        .as_ref()
        .map(|g| g.to_ewkb(dims, srid).context("Writer: Failed to encode geometry as EWKB"))
        .transpose()
}

fn push_value(row: &mut Separated<'_, '_, Postgres, &'static str>, value: &FieldValue, kind: FieldKind) {
    match value {
        FieldValue::Text(v) => row.push_bind(v.clone()),
        FieldValue::Integer(v) => match kind {
            FieldKind::Float => row.push_bind(*v as f64),
            _ => row.push_bind(*v),
        },
        FieldValue::Float(v) => row.push_bind(*v),
        FieldValue::Boolean(v) => row.push_bind(*v),
        FieldValue::Date(v) => row.push_bind(*v),
        FieldValue::Null => match kind {
            FieldKind::Text => row.push_bind(None::<String>),
            FieldKind::Integer => row.push_bind(None::<i64>),
            FieldKind::Float => row.push_bind(None::<f64>),
            FieldKind::Boolean => row.push_bind(None::<bool>),
            FieldKind::Date => row.push_bind(None::<time::Date>),
        },
    };
}

/// Renames a leftover `geometry` column to `geom`.
pub async fn ensure_geom_column_name(pool: &PgPool, schema: &str, table: &str) -> Result<()> {
    let mut tx = pool.begin().await?;
    let columns: Vec<String> = sqlx::query_scalar(
        "SELECT column_name::text FROM information_schema.columns
         WHERE table_schema = $1 AND table_name = $2",
    )
    .bind(schema)
    .bind(table)
    .fetch_all(&mut *tx)
    .await
    .context("Writer: Failed to list columns")?;

    let has = |name: &str| columns.iter().any(|c| c == name);
    if has(SOURCE_GEOMETRY_COLUMN) && !has(GEOMETRY_COLUMN) {
        tracing::info!("Renaming {}.{}.geometry to geom", schema, table);
        sqlx::query(&format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            qualified(schema, table),
            quote_ident(SOURCE_GEOMETRY_COLUMN),
            quote_ident(GEOMETRY_COLUMN)
        ))
        .execute(&mut *tx)
        .await
        .context("Writer: Failed to rename geometry column")?;
    }
    tx.commit().await?;
    Ok(())
}
