//! Geometry values read from shapefiles.
//!
//! `geo-types` has no third coordinate, so layers keep their own small model
//! and stream it into geozero processors for WKB output.

mod classify;

pub use classify::{GeometryClass, classify, has_z};

use geozero::error::Result as GeozeroResult;
use geozero::{CoordDimensions, GeomProcessor, GeozeroGeometry};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl Coord {
    pub fn xy(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z) }
    }
}

pub type Ring = Vec<Coord>;

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Coord),
    LineString(Vec<Coord>),
    Polygon(Vec<Ring>),
    MultiPoint(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    MultiPolygon(Vec<Vec<Ring>>),
}

/// Base geometry type, without dimension qualifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
}

impl GeometryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryKind::Point => "POINT",
            GeometryKind::LineString => "LINESTRING",
            GeometryKind::Polygon => "POLYGON",
            GeometryKind::MultiPoint => "MULTIPOINT",
            GeometryKind::MultiLineString => "MULTILINESTRING",
            GeometryKind::MultiPolygon => "MULTIPOLYGON",
        }
    }

    /// The multi-geometry type this kind can be promoted to.
    pub fn multi(&self) -> GeometryKind {
        match self {
            GeometryKind::Point | GeometryKind::MultiPoint => GeometryKind::MultiPoint,
            GeometryKind::LineString | GeometryKind::MultiLineString => {
                GeometryKind::MultiLineString
            }
            GeometryKind::Polygon | GeometryKind::MultiPolygon => GeometryKind::MultiPolygon,
        }
    }
}

impl Geometry {
    pub fn kind(&self) -> GeometryKind {
        match self {
            Geometry::Point(_) => GeometryKind::Point,
            Geometry::LineString(_) => GeometryKind::LineString,
            Geometry::Polygon(_) => GeometryKind::Polygon,
            Geometry::MultiPoint(_) => GeometryKind::MultiPoint,
            Geometry::MultiLineString(_) => GeometryKind::MultiLineString,
            Geometry::MultiPolygon(_) => GeometryKind::MultiPolygon,
        }
    }

    pub fn has_z(&self) -> bool {
        self.coords().any(|c| c.z.is_some())
    }

    pub fn coords(&self) -> Box<dyn Iterator<Item = &Coord> + '_> {
        match self {
            Geometry::Point(c) => Box::new(std::iter::once(c)),
            Geometry::LineString(cs) | Geometry::MultiPoint(cs) => Box::new(cs.iter()),
            Geometry::Polygon(rings) | Geometry::MultiLineString(rings) => {
                Box::new(rings.iter().flatten())
            }
            Geometry::MultiPolygon(polys) => Box::new(polys.iter().flatten().flatten()),
        }
    }
}

fn process_coord<P: GeomProcessor>(
    coord: &Coord,
    idx: usize,
    processor: &mut P,
) -> GeozeroResult<()> {
    if processor.multi_dim() {
        processor.coordinate(
            coord.x,
            coord.y,
            Some(coord.z.unwrap_or(0.0)),
            None,
            None,
            None,
            idx,
        )
    } else {
        processor.xy(coord.x, coord.y, idx)
    }
}

fn process_linestring<P: GeomProcessor>(
    coords: &[Coord],
    tagged: bool,
    idx: usize,
    processor: &mut P,
) -> GeozeroResult<()> {
    processor.linestring_begin(tagged, coords.len(), idx)?;
    for (i, coord) in coords.iter().enumerate() {
        process_coord(coord, i, processor)?;
    }
    processor.linestring_end(tagged, idx)
}

fn process_polygon<P: GeomProcessor>(
    rings: &[Ring],
    tagged: bool,
    idx: usize,
    processor: &mut P,
) -> GeozeroResult<()> {
    processor.polygon_begin(tagged, rings.len(), idx)?;
    for (i, ring) in rings.iter().enumerate() {
        process_linestring(ring, false, i, processor)?;
    }
    processor.polygon_end(tagged, idx)
}

impl GeozeroGeometry for Geometry {
    fn process_geom<P: GeomProcessor>(&self, processor: &mut P) -> GeozeroResult<()> {
        match self {
            Geometry::Point(coord) => {
                processor.point_begin(0)?;
                process_coord(coord, 0, processor)?;
                processor.point_end(0)
            }
            Geometry::LineString(coords) => process_linestring(coords, true, 0, processor),
            Geometry::Polygon(rings) => process_polygon(rings, true, 0, processor),
            Geometry::MultiPoint(coords) => {
                processor.multipoint_begin(coords.len(), 0)?;
                for (i, coord) in coords.iter().enumerate() {
                    process_coord(coord, i, processor)?;
                }
                processor.multipoint_end(0)
            }
            Geometry::MultiLineString(lines) => {
                processor.multilinestring_begin(lines.len(), 0)?;
                for (i, line) in lines.iter().enumerate() {
                    process_linestring(line, false, i, processor)?;
                }
                processor.multilinestring_end(0)
            }
            Geometry::MultiPolygon(polygons) => {
                processor.multipolygon_begin(polygons.len(), 0)?;
                for (i, rings) in polygons.iter().enumerate() {
                    process_polygon(rings, false, i, processor)?;
                }
                processor.multipolygon_end(0)
            }
        }
    }

    fn dims(&self) -> CoordDimensions {
        if self.has_z() {
            CoordDimensions::xyz()
        } else {
            CoordDimensions::xy()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geozero::ToWkb;

    fn square(z: Option<f64>) -> Ring {
        [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]
            .into_iter()
            .map(|(x, y)| Coord { x, y, z })
            .collect()
    }

    #[test]
    fn point_encodes_as_iso_wkb() {
        let wkb = Geometry::Point(Coord::xy(1.0, 2.0))
            .to_wkb(CoordDimensions::xy())
            .unwrap();
        // byte order, type 1, two doubles
        assert_eq!(wkb.len(), 1 + 4 + 16);
        assert_eq!(wkb[0], 1);
        assert_eq!(u32::from_le_bytes([wkb[1], wkb[2], wkb[3], wkb[4]]), 1);
        assert_eq!(f64::from_le_bytes(wkb[5..13].try_into().unwrap()), 1.0);
    }

    #[test]
    fn ewkb_carries_srid_and_z_flag() {
        let polygon = Geometry::Polygon(vec![square(Some(5.0))]);
        let ewkb = polygon.to_ewkb(CoordDimensions::xyz(), Some(2154)).unwrap();
        let type_word = u32::from_le_bytes([ewkb[1], ewkb[2], ewkb[3], ewkb[4]]);
        assert_eq!(type_word & 0xff, 3);
        assert_ne!(type_word & 0x8000_0000, 0, "Z flag");
        assert_ne!(type_word & 0x2000_0000, 0, "SRID flag");
        assert_eq!(u32::from_le_bytes([ewkb[5], ewkb[6], ewkb[7], ewkb[8]]), 2154);
    }

    #[test]
    fn missing_z_is_written_as_zero_in_3d_output() {
        let wkb = Geometry::Point(Coord::xy(1.0, 2.0))
            .to_wkb(CoordDimensions::xyz())
            .unwrap();
        assert_eq!(wkb.len(), 1 + 4 + 24);
        assert_eq!(f64::from_le_bytes(wkb[21..29].try_into().unwrap()), 0.0);
    }

    #[test]
    fn kinds_promote_to_their_multi_family() {
        assert_eq!(GeometryKind::Polygon.multi(), GeometryKind::MultiPolygon);
        assert_eq!(GeometryKind::MultiPoint.multi(), GeometryKind::MultiPoint);
        assert_eq!(GeometryKind::LineString.multi().as_str(), "MULTILINESTRING");
    }

    #[test]
    fn z_is_detected_from_any_coordinate() {
        let flat = Geometry::MultiPolygon(vec![vec![square(None)]]);
        let raised = Geometry::MultiPolygon(vec![vec![square(None)], vec![square(Some(3.0))]]);
        assert!(!flat.has_z());
        assert!(raised.has_z());
    }
}
