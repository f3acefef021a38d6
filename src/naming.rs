//! Identifier normalization for table and column names.
//!
//! PostgreSQL truncates identifiers to 63 bytes and every quoting mistake
//! turns into a broken view later on, so all names coming from files are
//! folded to `[a-z0-9_]` before they reach SQL.

use std::collections::HashSet;
use std::path::Path;

pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Name of the geometry column as produced by the layer reader.
pub const SOURCE_GEOMETRY_COLUMN: &str = "geometry";

/// Name of the geometry column in every written table.
pub const GEOMETRY_COLUMN: &str = "geom";

/// Surrogate key added to every written table.
pub const KEY_COLUMN: &str = "id";

/// Output names attribute columns may not take.
pub const RESERVED_COLUMNS: &[&str] = &[GEOMETRY_COLUMN, KEY_COLUMN];

const EMPTY_COLUMN: &str = "col";
const EMPTY_TABLE: &str = "layer";

pub fn normalize_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars().flat_map(char::to_lowercase) {
        let ch = if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            ch
        } else {
            '_'
        };
        if ch == '_' && out.ends_with('_') {
            continue;
        }
        out.push(ch);
    }

    let trimmed = out.trim_matches('_');
    // Output is pure ASCII, byte truncation is char-safe.
    let truncated = &trimmed[..trimmed.len().min(MAX_IDENTIFIER_LEN)];
    truncated.trim_end_matches('_').to_string()
}

/// Ordered mapping from source column names to unique identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    entries: Vec<(String, String)>,
}

impl ColumnMapping {
    /// Normalizes `names` left to right. The literal `geometry` column passes
    /// through untouched; any other name that collides with an earlier output
    /// or with one of `reserved` gets a `_2`, `_3`, ... suffix.
    pub fn build<'a, I>(names: I, reserved: &[&str]) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut entries = Vec::new();

        for name in names {
            if name == SOURCE_GEOMETRY_COLUMN {
                entries.push((name.to_string(), name.to_string()));
                continue;
            }

            let mut base = normalize_identifier(name);
            if base.is_empty() {
                base = EMPTY_COLUMN.to_string();
            }

            let taken = |candidate: &str| {
                seen.contains(candidate)
                    || candidate == SOURCE_GEOMETRY_COLUMN
                    || reserved.contains(&candidate)
            };

            let mut candidate = base.clone();
            let mut suffix = 2u32;
            while taken(&candidate) {
                candidate = with_suffix(&base, suffix);
                suffix += 1;
            }

            seen.insert(candidate.clone());
            entries.push((name.to_string(), candidate));
        }

        Self { entries }
    }

    pub fn normalized(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, to)| to.as_str())
    }
}

fn with_suffix(base: &str, n: u32) -> String {
    suffixed(base.trim_end_matches('_'), &format!("_{n}"))
}

/// `base` + `suffix`, cutting `base` so the result fits in an identifier.
pub fn suffixed(base: &str, suffix: &str) -> String {
    let mut keep = base.len().min(MAX_IDENTIFIER_LEN.saturating_sub(suffix.len()));
    while !base.is_char_boundary(keep) {
        keep -= 1;
    }
    format!("{}{}", base[..keep].trim_end_matches('_'), suffix)
}

/// Table name derived from a layer path relative to the batch root,
/// e.g. `zones/PPRI Nord.shp` -> `zones_ppri_nord`.
pub fn table_name_from_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let stem = relative.with_extension("");
    let joined = stem
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    table_name_from_stem(&joined)
}

pub fn table_name_from_stem(stem: &str) -> String {
    let name = normalize_identifier(stem);
    if name.is_empty() {
        EMPTY_TABLE.to_string()
    } else {
        name
    }
}
