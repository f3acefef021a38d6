mod common;

use common::{LAMBERT93_PRJ, Shape, square, write_dbf, write_shp, write_sidecar};
use shpload::encoding::{FALLBACK_ENCODINGS, encoding_for_label, read_with_fallback};
use shpload::geometry::{Geometry, GeometryKind, classify, has_z};
use shpload::source::{FieldValue, LayerError};

#[test]
fn cpg_hint_is_tried_first() {
    let dir = tempfile::tempdir().unwrap();
    let shp = write_shp(dir.path(), "communes", &[Shape::Point(1.0, 2.0)]);
    // "Évreux" in windows-1252
    write_dbf(dir.path(), "communes", &[("NOM", 20)], &[vec![&b"\xC9vreux"[..]]], 0);
    write_sidecar(dir.path(), "communes", "cpg", "1252\n");

    let layer = read_with_fallback(&shp).unwrap();
    assert_eq!(layer.encoding, "cp1252");
    assert_eq!(layer.records[0].values[0], FieldValue::Text("Évreux".into()));
}

#[test]
fn invalid_utf8_falls_back_to_latin1() {
    let dir = tempfile::tempdir().unwrap();
    let shp = write_shp(dir.path(), "rues", &[Shape::Point(0.0, 0.0), Shape::Point(1.0, 1.0)]);
    write_dbf(
        dir.path(),
        "rues",
        &[("NOM", 20)],
        &[vec![&b"Rue du Ch\xE2teau"[..]], vec![&b"Place"[..]]],
        0,
    );

    let layer = read_with_fallback(&shp).unwrap();
    assert_eq!(layer.encoding, "latin-1");
    assert_eq!(layer.records[0].values[0], FieldValue::Text("Rue du Château".into()));
    assert_eq!(layer.srid, None);
}

#[test]
fn utf8_layers_decode_on_the_first_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let shp = write_shp(dir.path(), "zones", &[square(0.0, 0.0, 10.0)]);
    write_dbf(dir.path(), "zones", &[("NOM", 20), ("Nom", 10)], &[vec!["Zone bleue".as_bytes(), "Côte".as_bytes()]], 0);
    write_sidecar(dir.path(), "zones", "prj", LAMBERT93_PRJ);

    let layer = read_with_fallback(&shp).unwrap();
    assert_eq!(layer.encoding, "utf-8");
    assert_eq!(layer.srid, Some(2154));

    let layer = layer.normalized();
    let names: Vec<_> = layer.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["nom", "nom_2"]);

    assert!(matches!(layer.records[0].geometry, Some(Geometry::Polygon(_))));
    let z = has_z(layer.geometries());
    assert!(!z);
    let class = classify(layer.geometries(), z);
    assert_eq!(class.type_name(), "POLYGON");
    assert_eq!(class.multi_family(), Some(GeometryKind::MultiPolygon));
}

#[test]
fn exhausted_encodings_are_all_named() {
    let dir = tempfile::tempdir().unwrap();
    let shp = write_shp(dir.path(), "broken", &[Shape::Point(0.0, 0.0)]);
    // Two attribute rows for a single shape, one of them not UTF-8.
    write_dbf(dir.path(), "broken", &[("NOM", 10)], &[vec![&b"\xE9t\xE9"[..]], vec![&b"b"[..]]], 0);

    let err = read_with_fallback(&shp).unwrap_err();
    assert_eq!(err.attempted, vec!["utf-8", "latin-1", "cp1252", "auto"]);
    assert!(matches!(
        err.last_error,
        LayerError::RecordCountMismatch { shapes: 1, records: 2 }
    ));
    let message = err.to_string();
    for label in FALLBACK_ENCODINGS {
        assert!(message.contains(label), "{message}");
    }
}

#[test]
fn unknown_cpg_label_falls_through_to_the_fallbacks() {
    let dir = tempfile::tempdir().unwrap();
    let shp = write_shp(dir.path(), "zones", &[Shape::Point(0.0, 0.0)]);
    write_dbf(dir.path(), "zones", &[("NOM", 10)], &[vec![&b"Nord"[..]]], 0);
    write_sidecar(dir.path(), "zones", "cpg", "KLINGON\n");
    assert_eq!(encoding_for_label("klingon"), None);

    let layer = read_with_fallback(&shp).unwrap();
    assert_eq!(layer.encoding, "utf-8");
    assert_eq!(layer.records[0].values[0], FieldValue::Text("Nord".into()));

    let broken = write_shp(dir.path(), "broken", &[Shape::Point(0.0, 0.0)]);
    write_dbf(dir.path(), "broken", &[("NOM", 10)], &[vec![&b"a"[..]], vec![&b"b"[..]]], 0);
    write_sidecar(dir.path(), "broken", "cpg", "KLINGON");
    let err = read_with_fallback(&broken).unwrap_err();
    assert_eq!(err.attempted, vec!["klingon", "utf-8", "latin-1", "cp1252", "auto"]);
}

#[test]
fn corrupt_record_count_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let shp = write_shp(dir.path(), "parcelles", &[Shape::Point(0.0, 0.0)]);
    write_dbf(dir.path(), "parcelles", &[("NOM", 10)], &[vec![&b"a"[..]]], 0);
    let dbf = dir.path().join("parcelles.dbf");
    let mut bytes = std::fs::read(&dbf).unwrap();
    bytes[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
    std::fs::write(&dbf, bytes).unwrap();

    let err = read_with_fallback(&shp).unwrap_err();
    assert!(matches!(err.last_error, LayerError::Dbf(_)), "{err}");
}

#[test]
fn layers_without_attributes_still_load() {
    let dir = tempfile::tempdir().unwrap();
    let shp = write_shp(dir.path(), "points", &[Shape::Point(3.0, 4.0)]);

    let layer = read_with_fallback(&shp).unwrap();
    assert!(layer.fields.is_empty());
    assert_eq!(layer.len(), 1);
}
