//! Shapefile fixtures written byte by byte.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

const POINT: i32 = 1;
const POLYGON: i32 = 5;

pub const LAMBERT93_PRJ: &str = r#"PROJCS["RGF93_Lambert_93",GEOGCS["GCS_RGF_1993",DATUM["D_RGF_1993",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Lambert_Conformal_Conic"],PARAMETER["False_Easting",700000.0],PARAMETER["False_Northing",6600000.0],PARAMETER["Central_Meridian",3.0],PARAMETER["Standard_Parallel_1",49.0],PARAMETER["Standard_Parallel_2",44.0],PARAMETER["Latitude_Of_Origin",46.5],UNIT["Meter",1.0]]"#;

/// Shape record contents, without the record header.
pub enum Shape {
    Point(f64, f64),
    /// Rings as closed coordinate lists, outer rings clockwise.
    Polygon(Vec<Vec<(f64, f64)>>),
}

impl Shape {
    fn shape_type(&self) -> i32 {
        match self {
            Shape::Point(..) => POINT,
            Shape::Polygon(_) => POLYGON,
        }
    }

    fn content(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.shape_type().to_le_bytes());
        match self {
            Shape::Point(x, y) => {
                out.extend_from_slice(&x.to_le_bytes());
                out.extend_from_slice(&y.to_le_bytes());
            }
            Shape::Polygon(rings) => {
                let points: Vec<(f64, f64)> = rings.iter().flatten().copied().collect();
                for v in bbox(&points) {
                    out.extend_from_slice(&v.to_le_bytes());
                }
                out.extend_from_slice(&(rings.len() as i32).to_le_bytes());
                out.extend_from_slice(&(points.len() as i32).to_le_bytes());
                let mut start = 0i32;
                for ring in rings {
                    out.extend_from_slice(&start.to_le_bytes());
                    start += ring.len() as i32;
                }
                for (x, y) in points {
                    out.extend_from_slice(&x.to_le_bytes());
                    out.extend_from_slice(&y.to_le_bytes());
                }
            }
        }
        out
    }

    fn points(&self) -> Vec<(f64, f64)> {
        match self {
            Shape::Point(x, y) => vec![(*x, *y)],
            Shape::Polygon(rings) => rings.iter().flatten().copied().collect(),
        }
    }
}

/// Clockwise unit square at (x, y).
pub fn square(x: f64, y: f64, size: f64) -> Shape {
    Shape::Polygon(vec![vec![
        (x, y),
        (x, y + size),
        (x + size, y + size),
        (x + size, y),
        (x, y),
    ]])
}

fn bbox(points: &[(f64, f64)]) -> [f64; 4] {
    let mut b = [f64::MAX, f64::MAX, f64::MIN, f64::MIN];
    for (x, y) in points {
        b[0] = b[0].min(*x);
        b[1] = b[1].min(*y);
        b[2] = b[2].max(*x);
        b[3] = b[3].max(*y);
    }
    if points.is_empty() {
        return [0.0; 4];
    }
    b
}

fn main_header(shape_type: i32, file_len_bytes: usize, bounds: [f64; 4]) -> Vec<u8> {
    let mut out = Vec::with_capacity(100);
    out.extend_from_slice(&9994i32.to_be_bytes());
    out.extend_from_slice(&[0u8; 20]);
    out.extend_from_slice(&((file_len_bytes / 2) as i32).to_be_bytes());
    out.extend_from_slice(&1000i32.to_le_bytes());
    out.extend_from_slice(&shape_type.to_le_bytes());
    for v in bounds {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out.extend_from_slice(&[0u8; 32]);
    out
}

/// Writes `<dir>/<stem>.shp` and `.shx`, returning the `.shp` path.
pub fn write_shp(dir: &Path, stem: &str, shapes: &[Shape]) -> PathBuf {
    let shape_type = shapes.first().map_or(POINT, Shape::shape_type);
    let all: Vec<(f64, f64)> = shapes.iter().flat_map(Shape::points).collect();
    let bounds = bbox(&all);

    let mut records = Vec::new();
    let mut index = Vec::new();
    for (i, shape) in shapes.iter().enumerate() {
        let content = shape.content();
        index.push((100 + records.len(), content.len()));
        records.extend_from_slice(&((i + 1) as i32).to_be_bytes());
        records.extend_from_slice(&((content.len() / 2) as i32).to_be_bytes());
        records.extend_from_slice(&content);
    }

    let mut shp = main_header(shape_type, 100 + records.len(), bounds);
    shp.extend_from_slice(&records);
    let shp_path = dir.join(format!("{stem}.shp"));
    fs::write(&shp_path, shp).unwrap();

    let mut shx = main_header(shape_type, 100 + 8 * index.len(), bounds);
    for (offset, len) in index {
        shx.extend_from_slice(&((offset / 2) as i32).to_be_bytes());
        shx.extend_from_slice(&((len / 2) as i32).to_be_bytes());
    }
    fs::write(dir.join(format!("{stem}.shx")), shx).unwrap();
    shp_path
}

/// dBASE III table with character fields only; cells are raw bytes so
/// tests control the encoding.
pub fn write_dbf(dir: &Path, stem: &str, fields: &[(&str, u8)], rows: &[Vec<&[u8]>], language_driver: u8) {
    let header_len = 32 + 32 * fields.len() + 1;
    let record_len = 1 + fields.iter().map(|(_, w)| *w as usize).sum::<usize>();

    let mut out = vec![0u8; 32];
    out[0] = 0x03;
    out[1..4].copy_from_slice(&[124, 1, 1]);
    out[4..8].copy_from_slice(&(rows.len() as u32).to_le_bytes());
    out[8..10].copy_from_slice(&(header_len as u16).to_le_bytes());
    out[10..12].copy_from_slice(&(record_len as u16).to_le_bytes());
    out[29] = language_driver;
    for (name, width) in fields {
        let mut desc = [0u8; 32];
        desc[..name.len()].copy_from_slice(name.as_bytes());
        desc[11] = b'C';
        desc[16] = *width;
        out.extend_from_slice(&desc);
    }
    out.push(0x0D);
    for row in rows {
        out.push(b' ');
        for (cell, (_, width)) in row.iter().zip(fields) {
            let mut cell = cell.to_vec();
            cell.resize(*width as usize, b' ');
            out.extend_from_slice(&cell);
        }
    }
    out.push(0x1A);
    fs::write(dir.join(format!("{stem}.dbf")), out).unwrap();
}

pub fn write_sidecar(dir: &Path, stem: &str, extension: &str, content: &str) {
    fs::write(dir.join(format!("{stem}.{extension}")), content).unwrap();
}
