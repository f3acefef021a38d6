//! Shapefile layers as in-memory feature collections.

pub mod dbf;
pub mod prj;
pub mod shp;

use std::path::{Path, PathBuf};

use thiserror::Error;
use time::Date;

use crate::geometry::Geometry;
use crate::naming::{ColumnMapping, RESERVED_COLUMNS, SOURCE_GEOMETRY_COLUMN};
use dbf::{DbfTable, TextDecoding};

#[derive(Debug, Error)]
pub enum LayerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid .dbf: {0}")]
    Dbf(String),
    #[error("text is not valid {encoding}")]
    Decode { encoding: &'static str },
    #[error("unknown encoding '{0}'")]
    UnknownEncoding(String),
    #[error("invalid .shp: {0}")]
    Shape(#[from] shapefile::Error),
    #[error("{0} shapes are not supported")]
    UnsupportedShape(&'static str),
    #[error("{shapes} shapes but {records} attribute records")]
    RecordCountMismatch { shapes: usize, records: usize },
    #[error("no geometry column '{0}'")]
    MissingGeometry(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    Date,
}

impl FieldKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Integer => "bigint",
            FieldKind::Float => "double precision",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(Date),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub values: Vec<FieldValue>,
    pub geometry: Option<Geometry>,
}

/// One layer: a shared attribute schema, one geometry per record.
#[derive(Debug, Clone)]
pub struct FeatureCollection {
    pub fields: Vec<Field>,
    pub geometry_column: String,
    pub records: Vec<Record>,
    pub srid: Option<i32>,
    /// Label of the encoding the attributes were decoded with.
    pub encoding: String,
}

impl FeatureCollection {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn geometries(&self) -> impl Iterator<Item = Option<&Geometry>> {
        self.records.iter().map(|r| r.geometry.as_ref())
    }

    /// Attribute names normalized to unique identifiers; the geometry column
    /// keeps its name, `geom` stays free for it and `id` for the surrogate key.
    pub fn normalized(self) -> Self {
        let names = self
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(std::iter::once(self.geometry_column.as_str()));
        let mapping = ColumnMapping::build(names, RESERVED_COLUMNS);

        let fields = self
            .fields
            .iter()
            .zip(mapping.normalized())
            .map(|(field, name)| Field {
                name: name.to_string(),
                kind: field.kind,
            })
            .collect();

        Self { fields, ..self }
    }

    /// Renames the `geometry` column to `name`.
    pub fn with_geometry_column(self, name: &str) -> Result<Self, LayerError> {
        if self.geometry_column != SOURCE_GEOMETRY_COLUMN && self.geometry_column != name {
            return Err(LayerError::MissingGeometry(SOURCE_GEOMETRY_COLUMN.to_string()));
        }
        Ok(Self {
            geometry_column: name.to_string(),
            ..self
        })
    }

    /// Assumes `srid` when the layer's CRS could not be identified.
    pub fn with_default_srid(self, srid: Option<i32>) -> Self {
        Self {
            srid: self.srid.or(srid),
            ..self
        }
    }
}

/// Sidecar path sharing the layer's stem, matching the extension's case
/// loosely (`.CPG`, `.cpg`).
pub fn sidecar(path: &Path, extension: &str) -> Option<PathBuf> {
    let lower = path.with_extension(extension.to_ascii_lowercase());
    if lower.exists() {
        return Some(lower);
    }
    let upper = path.with_extension(extension.to_ascii_uppercase());
    upper.exists().then_some(upper)
}

/// Reads one layer. `decoding` of `None` lets the `.dbf` header pick the
/// encoding, falling back to lossy UTF-8.
pub fn read_layer(path: &Path, decoding: Option<TextDecoding>) -> Result<FeatureCollection, LayerError> {
    let shapes = shp::read_shapes(path)?;

    let (fields, rows, encoding) = match sidecar(path, "dbf") {
        Some(dbf_path) => {
            let table = DbfTable::read(&dbf_path)?;
            if table.record_count() != shapes.len() {
                return Err(LayerError::RecordCountMismatch {
                    shapes: shapes.len(),
                    records: table.record_count(),
                });
            }
            let decoding = decoding.unwrap_or_else(|| {
                TextDecoding::Lossy(table.declared_encoding().unwrap_or(encoding_rs::UTF_8))
            });
            let label = match decoding {
                TextDecoding::Strict(e) | TextDecoding::Lossy(e) => e.name().to_ascii_lowercase(),
            };
            let decoded = table.decode(decoding)?;
            (decoded.fields, decoded.rows, label)
        }
        None => {
            tracing::debug!("No .dbf next to {:?}, reading geometries only", path);
            let rows = vec![Some(Vec::new()); shapes.len()];
            (Vec::new(), rows, String::from("utf-8"))
        }
    };

    let records = shapes
        .into_iter()
        .zip(rows)
        .filter_map(|(geometry, values)| values.map(|values| Record { values, geometry }))
        .collect();

    let srid = match sidecar(path, "prj") {
        Some(prj_path) => {
            let wkt = std::fs::read(&prj_path)?;
            prj::srid_from_wkt(&String::from_utf8_lossy(&wkt))
        }
        None => None,
    };

    Ok(FeatureCollection {
        fields,
        geometry_column: SOURCE_GEOMETRY_COLUMN.to_string(),
        records,
        srid,
        encoding,
    })
}
