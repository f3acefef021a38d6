//! Attribute encoding resolution.
//!
//! Shapefiles rarely say how their `.dbf` text is encoded. A `.cpg` sidecar
//! is trusted first, then a fixed list of common encodings is tried with
//! strict decoding until one reads the whole layer.

use std::path::{Path, PathBuf};

use encoding_rs::Encoding;
use thiserror::Error;

use crate::source::dbf::TextDecoding;
use crate::source::{FeatureCollection, LayerError, read_layer, sidecar};

pub const FALLBACK_ENCODINGS: [&str; 3] = ["utf-8", "latin-1", "cp1252"];

const AUTO_DETECT: &str = "auto";

const HINTS: &[(&str, &str)] = &[
    ("UTF-8", "utf-8"),
    ("UTF8", "utf-8"),
    ("65001", "utf-8"),
    ("LATIN1", "latin-1"),
    ("ISO-8859-1", "latin-1"),
    ("CP1252", "cp1252"),
    ("WINDOWS-1252", "cp1252"),
    ("1252", "cp1252"),
];

#[derive(Debug, Error)]
#[error("Failed to read {path:?} (encodings tried: {}): {last_error}", .attempted.join(", "))]
pub struct ReadError {
    pub path: PathBuf,
    pub attempted: Vec<String>,
    pub last_error: LayerError,
}

/// Maps a raw `.cpg` token to an encoding label. Unknown tokens pass through
/// lower-cased.
pub fn hint_from_token(token: &str) -> Option<String> {
    let token = token.trim().to_ascii_uppercase();
    if token.is_empty() {
        return None;
    }
    let label = HINTS
        .iter()
        .find(|(raw, _)| *raw == token)
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| token.to_ascii_lowercase());
    Some(label)
}

pub fn hint_from_cpg(shp_path: &Path) -> Option<String> {
    let cpg = sidecar(shp_path, "cpg")?;
    match std::fs::read(&cpg) {
        Ok(bytes) => hint_from_token(&String::from_utf8_lossy(&bytes)),
        Err(err) => {
            tracing::warn!("Ignoring unreadable {:?}: {}", cpg, err);
            None
        }
    }
}

/// Hint first, then the fallbacks, each label once.
pub fn candidate_encodings(hint: Option<&str>) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    for label in hint.into_iter().chain(FALLBACK_ENCODINGS) {
        if !candidates.iter().any(|c| c == label) {
            candidates.push(label.to_string());
        }
    }
    candidates
}

pub fn encoding_for_label(label: &str) -> Option<&'static Encoding> {
    match label {
        "utf-8" => Some(encoding_rs::UTF_8),
        // encoding_rs follows WHATWG, where latin-1 is decoded as windows-1252.
        "latin-1" | "cp1252" => Some(encoding_rs::WINDOWS_1252),
        other => Encoding::for_label(other.as_bytes()),
    }
}

fn read_with_label(path: &Path, label: &str) -> Result<FeatureCollection, LayerError> {
    let encoding =
        encoding_for_label(label).ok_or_else(|| LayerError::UnknownEncoding(label.to_string()))?;
    let mut layer = read_layer(path, Some(TextDecoding::Strict(encoding)))?;
    layer.encoding = label.to_string();
    Ok(layer)
}

/// Reads a layer with the first candidate encoding that decodes it.
pub fn read_with_fallback(path: &Path) -> Result<FeatureCollection, ReadError> {
    let hint = hint_from_cpg(path);
    if let Some(hint) = &hint {
        tracing::debug!("Encoding hint for {:?}: {}", path, hint);
    }
    read_with_candidates(path, &candidate_encodings(hint.as_deref()))
}

pub fn read_with_candidates(
    path: &Path,
    candidates: &[String],
) -> Result<FeatureCollection, ReadError> {
    let mut attempted = Vec::with_capacity(candidates.len() + 1);

    for label in candidates {
        attempted.push(label.clone());
        match read_with_label(path, label) {
            Ok(layer) => return Ok(layer),
            Err(err) => tracing::debug!("Reading {:?} as {} failed: {}", path, label, err),
        }
    }

    attempted.push(AUTO_DETECT.to_string());
    read_layer(path, None).map_err(|last_error| ReadError {
        path: path.to_path_buf(),
        attempted,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpg_tokens_map_case_insensitively() {
        assert_eq!(hint_from_token("cp1252\n").as_deref(), Some("cp1252"));
        assert_eq!(hint_from_token("Windows-1252").as_deref(), Some("cp1252"));
        assert_eq!(hint_from_token(" UTF8 ").as_deref(), Some("utf-8"));
        assert_eq!(hint_from_token("ISO-8859-1").as_deref(), Some("latin-1"));
        assert_eq!(hint_from_token("ISO-8859-15").as_deref(), Some("iso-8859-15"));
        assert_eq!(hint_from_token("   "), None);
    }

    #[test]
    fn hint_comes_before_fallbacks() {
        assert_eq!(
            candidate_encodings(Some("cp1252")),
            vec!["cp1252", "utf-8", "latin-1"]
        );
        assert_eq!(
            candidate_encodings(Some("iso-8859-15")),
            vec!["iso-8859-15", "utf-8", "latin-1", "cp1252"]
        );
        assert_eq!(candidate_encodings(None), vec!["utf-8", "latin-1", "cp1252"]);
    }

    #[test]
    fn labels_resolve_to_encodings() {
        assert_eq!(encoding_for_label("latin-1"), Some(encoding_rs::WINDOWS_1252));
        assert_eq!(encoding_for_label("iso-8859-15"), Some(encoding_rs::ISO_8859_15));
        assert_eq!(encoding_for_label("klingon"), None);
    }

    #[test]
    fn read_error_names_every_attempt() {
        let err = ReadError {
            path: PathBuf::from("/data/broken.shp"),
            attempted: vec!["utf-8".into(), "latin-1".into(), "auto".into()],
            last_error: LayerError::Dbf("file shorter than header".into()),
        };
        let message = err.to_string();
        assert!(message.contains("broken.shp"));
        assert!(message.contains("utf-8, latin-1, auto"));
    }
}
