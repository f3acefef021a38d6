//! Shape records (`.shp`) converted into [`Geometry`] values.

use std::path::Path;

use shapefile::{PolygonRing, Shape, ShapeReader};

use super::LayerError;
use crate::geometry::{Coord, Geometry, Ring};

trait ToCoord {
    fn to_coord(&self) -> Coord;
}

impl ToCoord for shapefile::Point {
    fn to_coord(&self) -> Coord {
        Coord::xy(self.x, self.y)
    }
}

impl ToCoord for shapefile::PointM {
    fn to_coord(&self) -> Coord {
        Coord::xy(self.x, self.y)
    }
}

impl ToCoord for shapefile::PointZ {
    fn to_coord(&self) -> Coord {
        Coord::xyz(self.x, self.y, self.z)
    }
}

/// Reads every shape of the layer; null shapes become `None`.
pub fn read_shapes(path: &Path) -> Result<Vec<Option<Geometry>>, LayerError> {
    let mut reader = ShapeReader::from_path(path)?;
    let mut geometries = Vec::new();
    for shape in reader.iter_shapes() {
        geometries.push(convert_shape(shape?)?);
    }
    Ok(geometries)
}

pub fn convert_shape(shape: Shape) -> Result<Option<Geometry>, LayerError> {
    let geometry = match shape {
        Shape::NullShape => return Ok(None),
        Shape::Point(p) => Geometry::Point(p.to_coord()),
        Shape::PointM(p) => Geometry::Point(p.to_coord()),
        Shape::PointZ(p) => Geometry::Point(p.to_coord()),
        Shape::Polyline(line) => lines(line.parts()),
        Shape::PolylineM(line) => lines(line.parts()),
        Shape::PolylineZ(line) => lines(line.parts()),
        Shape::Polygon(polygon) => polygons(polygon.rings()),
        Shape::PolygonM(polygon) => polygons(polygon.rings()),
        Shape::PolygonZ(polygon) => polygons(polygon.rings()),
        Shape::Multipoint(points) => multipoint(points.points()),
        Shape::MultipointM(points) => multipoint(points.points()),
        Shape::MultipointZ(points) => multipoint(points.points()),
        Shape::Multipatch(_) => return Err(LayerError::UnsupportedShape("Multipatch")),
    };
    Ok(Some(geometry))
}

fn coords<P: ToCoord>(points: &[P]) -> Vec<Coord> {
    points.iter().map(ToCoord::to_coord).collect()
}

fn multipoint<P: ToCoord>(points: &[P]) -> Geometry {
    Geometry::MultiPoint(coords(points))
}

fn lines<P: ToCoord>(parts: &[Vec<P>]) -> Geometry {
    let mut parts: Vec<Vec<Coord>> = parts.iter().map(|part| coords(part)).collect();
    if parts.len() == 1 {
        Geometry::LineString(parts.remove(0))
    } else {
        Geometry::MultiLineString(parts)
    }
}

/// Groups rings into polygons. Every outer ring opens a polygon; an inner
/// ring becomes a hole of the smallest outer ring around it, or a polygon of
/// its own when none encloses it (outer rings written counter-clockwise).
fn polygons<P: ToCoord>(rings: &[PolygonRing<P>]) -> Geometry {
    let mut polygons: Vec<Vec<Ring>> = Vec::new();
    let mut holes: Vec<Ring> = Vec::new();
    for ring in rings {
        match ring {
            PolygonRing::Outer(points) => polygons.push(vec![coords(points)]),
            PolygonRing::Inner(points) => holes.push(coords(points)),
        }
    }

    let outer_count = polygons.len();
    for hole in holes {
        let owner = hole.first().and_then(|probe| {
            (0..outer_count)
                .filter(|&i| ring_contains(&polygons[i][0], probe))
                .min_by(|&a, &b| ring_area(&polygons[a][0]).total_cmp(&ring_area(&polygons[b][0])))
        });
        match owner {
            Some(i) => polygons[i].push(hole),
            None => polygons.push(vec![hole]),
        }
    }

    if polygons.len() == 1 {
        Geometry::Polygon(polygons.remove(0))
    } else {
        Geometry::MultiPolygon(polygons)
    }
}

/// Even-odd ray casting on the XY plane.
fn ring_contains(ring: &[Coord], point: &Coord) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (&ring[i], &ring[j]);
        if (a.y > point.y) != (b.y > point.y)
            && point.x < (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn ring_area(ring: &[Coord]) -> f64 {
    let twice: f64 = ring
        .windows(2)
        .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
        .sum();
    (twice / 2.0).abs()
}
