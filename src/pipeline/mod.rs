//! One ingestion call, from a decoded layer to a published table.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use sqlx::PgPool;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::IngestSettings;
use crate::db::{finalize, publish, writer};
use crate::encoding;
use crate::geometry::{classify, has_z};
use crate::naming::{GEOMETRY_COLUMN, table_name_from_stem};
use crate::source::FeatureCollection;

/// What an ingestion produced. Printed as JSON by the CLI.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IngestReport {
    pub schema: String,
    pub table: String,
    pub rows: u64,
    pub geom_type: String,
    pub srid: Option<i32>,
    pub encoding: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Rewrite the geometry column to a uniform 2D multi type when possible.
    pub coerce: bool,
}

pub async fn ingest_collection(
    pool: &PgPool,
    collection: FeatureCollection,
    table: &str,
    settings: &IngestSettings,
    options: &IngestOptions,
) -> Result<IngestReport> {
    let layer = collection
        .normalized()
        .with_geometry_column(GEOMETRY_COLUMN)
        .context("Pipeline: Layer has no geometry column")?
        .with_default_srid(settings.default_srid);

    let z = has_z(layer.geometries());
    let class = classify(layer.geometries(), z);
    if class.mixed && !class.kinds.is_empty() {
        tracing::info!("{}: mixed geometry kinds, column typed GEOMETRY", table);
    }

    let target = writer::TableTarget {
        schema: settings.schema.clone(),
        table: table.to_string(),
        geometry_type: class.type_name(),
        srid: layer.srid,
        has_z: z,
    };

    writer::ensure_schema(pool, &target.schema).await?;
    let rows = writer::write_table(pool, &layer, &target, settings.if_exists, settings.batch_size).await?;
    writer::ensure_geom_column_name(pool, &target.schema, &target.table).await?;

    let coercion = if options.coerce {
        let planned = finalize::plan_coercion(class.multi_family(), layer.srid);
        if planned.is_none() {
            tracing::info!("{}: geometry left as {}, no coercion possible", target.qualified(), target.geometry_type);
        }
        planned
    } else {
        None
    };
    finalize::finalize_table(pool, &target.schema, &target.table, coercion).await?;
    publish::publish(pool, &target.schema, &target.table, &settings.publish).await?;

    let geom_type = match coercion {
        Some(c) => c.kind.as_str().to_string(),
        None => target.geometry_type.clone(),
    };
    tracing::info!(
        "{}: {} rows, {} SRID={}",
        target.qualified(),
        rows,
        geom_type,
        target.srid.map_or_else(|| "none".to_string(), |s| s.to_string())
    );

    Ok(IngestReport {
        schema: target.schema,
        table: target.table,
        rows,
        geom_type,
        srid: target.srid,
        encoding: layer.encoding,
    })
}

/// Reads `path` with encoding fallback, then ingests it.
pub async fn ingest_file(
    pool: &PgPool,
    path: &Path,
    table: &str,
    settings: &IngestSettings,
    options: &IngestOptions,
) -> Result<IngestReport> {
    let collection = encoding::read_with_fallback(path)?;
    ingest_collection(pool, collection, table, settings, options).await
}

/// Every `.shp` below `root` in name order, without macOS `._` artefacts.
/// Symlinked directories are not entered.
pub fn find_shapefiles(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Walk: Cannot read below {root:?}"))?;
        if entry.file_type().is_file() && is_shapefile(entry.path()) {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

fn is_shapefile(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return false,
    };
    !name.starts_with("._")
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("shp"))
}

/// Extracts a zipped shapefile to a temporary directory and ingests its
/// largest `.shp`. Without `table`, the name comes from the file stem.
pub async fn upload_archive<R: Read + Seek>(
    pool: &PgPool,
    reader: R,
    table: Option<&str>,
    settings: &IngestSettings,
) -> Result<IngestReport> {
    let dir = tempfile::TempDir::new().context("Upload: Failed to create temporary directory")?;
    let shp = extract_largest_shapefile(reader, dir.path())?;
    let table = upload_table_name(table, &shp);
    tracing::info!("Upload: {:?} -> {}.{}", shp.file_name().unwrap_or_default(), settings.schema, table);

    let collection = encoding::read_with_fallback(&shp)?;
    if collection.srid.is_none() && settings.default_srid.is_none() {
        tracing::warn!("{}: unknown CRS and no default SRID", table);
    }
    ingest_collection(pool, collection, &table, settings, &IngestOptions { coerce: true }).await
}

/// Unpacks `reader` into `dir` and returns the largest `.shp` found there.
pub fn extract_largest_shapefile<R: Read + Seek>(reader: R, dir: &Path) -> Result<PathBuf> {
    let mut archive = zip::ZipArchive::new(reader).context("Upload: Not a zip archive")?;
    tracing::info!("Archive contents:");
    for name in archive.file_names() {
        tracing::info!(" - {}", name);
    }
    archive.extract(dir).context("Upload: Failed to extract archive")?;
    largest_shapefile(dir)
}

/// An explicit name wins over the layer's file stem; both are normalized.
pub fn upload_table_name(explicit: Option<&str>, shp: &Path) -> String {
    match explicit {
        Some(name) => table_name_from_stem(name),
        None => table_name_from_stem(&shp.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default()),
    }
}

fn largest_shapefile(root: &Path) -> Result<PathBuf> {
    let mut best: Option<(u64, PathBuf)> = None;
    for path in find_shapefiles(root)? {
        let size = std::fs::metadata(&path)?.len();
        if best.as_ref().is_none_or(|(max, _)| size > *max) {
            best = Some((size, path));
        }
    }
    match best {
        Some((_, path)) => Ok(path),
        None => bail!("Upload: No .shp file found in the archive"),
    }
}
