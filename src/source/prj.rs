//! SRID lookup for `.prj` sidecars.
//!
//! OGC WKT usually names its EPSG code; ESRI WKT usually does not, so a table
//! of well-known CRS names covers the common layers.

use crate::naming::normalize_identifier;

/// EPSG code of the outermost CRS, `None` when it cannot be identified.
pub fn srid_from_wkt(wkt: &str) -> Option<i32> {
    authority_code(wkt).or_else(|| {
        let name = crs_name(wkt)?;
        srid_from_name(&normalize_identifier(&name))
    })
}

/// The top-level `AUTHORITY["EPSG","2154"]` (WKT1) or `ID["EPSG",2154]` (WKT2).
fn authority_code(wkt: &str) -> Option<i32> {
    let bytes = wkt.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut found = None;

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_string = !in_string,
            _ if in_string => {}
            b'[' | b'(' => {
                depth += 1;
                if depth == 2 {
                    let keyword = keyword_before(&wkt[..i]);
                    if keyword.eq_ignore_ascii_case("AUTHORITY") || keyword.eq_ignore_ascii_case("ID") {
                        found = parse_epsg_args(&wkt[i + 1..]);
                    }
                }
            }
            b']' | b')' => depth -= 1,
            _ => {}
        }
    }
    found
}

fn keyword_before(prefix: &str) -> &str {
    let trimmed = prefix.trim_end();
    let start = trimmed
        .char_indices()
        .rev()
        .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_')
        .map_or(0, |(i, c)| i + c.len_utf8());
    &trimmed[start..]
}

fn parse_epsg_args(args: &str) -> Option<i32> {
    let end = args.find([']', ')'])?;
    let mut parts = args[..end].split(',').map(|p| p.trim().trim_matches('"'));
    let authority = parts.next()?;
    if !authority.eq_ignore_ascii_case("EPSG") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Name of the outermost CRS, e.g. `RGF93_Lambert_93` from `PROJCS["RGF93_Lambert_93",...`.
fn crs_name(wkt: &str) -> Option<String> {
    let open = wkt.find(['[', '('])?;
    let rest = &wkt[open + 1..];
    let start = rest.find('"')? + 1;
    let len = rest[start..].find('"')?;
    Some(rest[start..start + len].to_string())
}

/// `name` must already be normalized.
fn srid_from_name(name: &str) -> Option<i32> {
    let known = match name {
        "gcs_wgs_1984" | "wgs_84" | "wgs84" | "wgs_1984" => 4326,
        "wgs_1984_web_mercator_auxiliary_sphere"
        | "wgs_84_pseudo_mercator"
        | "wgs_1984_web_mercator"
        | "popular_visualisation_pseudo_mercator" => 3857,
        "rgf93_lambert_93" | "rgf_1993_lambert_93" | "rgf93_v1_lambert_93" | "lambert_93" => 2154,
        "gcs_rgf_1993" | "rgf93" | "rgf93_v1" => 4171,
        "ntf_paris_lambert_ii_etendu"
        | "ntf_paris_lambert_zone_ii"
        | "ntf_paris_lambert_ii"
        | "ntf_paris_lambert_ii_extended" => 27572,
        "etrs_1989_laea" | "etrs89_etrs_laea" | "etrs89_extended_laea_europe" => 3035,
        "etrs_1989_lcc" | "etrs89_etrs_lcc" | "etrs89_extended_lcc_europe" => 3034,
        "gcs_etrs_1989" | "etrs89" => 4258,
        "gcs_north_american_1983" | "nad83" => 4269,
        "gcs_north_american_1927" | "nad27" => 4267,
        "osgb_1936_british_national_grid" | "osgb36_british_national_grid" => 27700,
        _ => return zoned_srid(name),
    };
    Some(known)
}

/// UTM and French conic conformal zones, which encode the zone in the name.
fn zoned_srid(name: &str) -> Option<i32> {
    let zone_after = |prefix: &str| -> Option<(i32, Option<char>)> {
        let rest = name.strip_prefix(prefix)?;
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        let zone = digits.parse().ok()?;
        Some((zone, rest[digits.len()..].chars().next()))
    };

    for (prefix, north, south) in [
        ("wgs_1984_utm_zone_", 32600, 32700),
        ("wgs_84_utm_zone_", 32600, 32700),
        ("etrs_1989_utm_zone_", 25800, 0),
        ("etrs89_utm_zone_", 25800, 0),
        ("nad_1983_utm_zone_", 26900, 0),
        ("nad83_utm_zone_", 26900, 0),
    ] {
        if let Some((zone, hemisphere)) = zone_after(prefix) {
            if !(1..=60).contains(&zone) {
                return None;
            }
            return match hemisphere {
                Some('n') => Some(north + zone),
                Some('s') if south != 0 => Some(south + zone),
                _ => None,
            };
        }
    }

    for prefix in ["rgf93_cc", "rgf_1993_cc", "rgf93_v1_cc"] {
        if let Some((zone, None)) = zone_after(prefix) {
            return (42..=50).contains(&zone).then_some(3900 + zone);
        }
    }

    None
}
