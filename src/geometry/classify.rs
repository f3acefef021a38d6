use std::collections::BTreeSet;

use super::{Geometry, GeometryKind};

const GENERIC: &str = "GEOMETRY";

/// Declared type of a layer's geometry column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryClass {
    pub kinds: BTreeSet<GeometryKind>,
    pub z: bool,
    pub mixed: bool,
}

impl GeometryClass {
    /// `GEOMETRY` unless exactly one base type is present, `Z`-qualified
    /// when the layer carries elevations.
    pub fn type_name(&self) -> String {
        let base = match (self.mixed, self.kinds.iter().next()) {
            (false, Some(kind)) => kind.as_str(),
            _ => GENERIC,
        };
        if self.z {
            format!("{base}Z")
        } else {
            base.to_string()
        }
    }

    /// Multi type shared by every present kind (`POLYGON` + `MULTIPOLYGON`
    /// -> `MULTIPOLYGON`), `None` for empty or cross-family layers.
    pub fn multi_family(&self) -> Option<GeometryKind> {
        let mut families = self.kinds.iter().map(GeometryKind::multi);
        let first = families.next()?;
        families.all(|f| f == first).then_some(first)
    }
}

pub fn has_z<'a, I>(geometries: I) -> bool
where
    I: IntoIterator<Item = Option<&'a Geometry>>,
{
    geometries.into_iter().flatten().any(Geometry::has_z)
}

pub fn classify<'a, I>(geometries: I, z: bool) -> GeometryClass
where
    I: IntoIterator<Item = Option<&'a Geometry>>,
{
    let kinds: BTreeSet<GeometryKind> = geometries.into_iter().flatten().map(Geometry::kind).collect();
    let mixed = kinds.len() != 1;
    GeometryClass { kinds, z, mixed }
}
