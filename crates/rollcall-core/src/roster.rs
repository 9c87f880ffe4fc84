//! Roster loading: enrollment images → [`EnrollmentRecord`]s.
//!
//! A bad entry (unreadable image, no face, malformed label) is logged and
//! skipped; only an analyzer failure aborts the load.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::types::{EnrollmentRecord, Identity};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("label {0:?} is not of the form \"Name RollNumber\"")]
    MalformedLabel(String),
    #[error("roll number {0:?} is not an integer")]
    InvalidRollNumber(String),
}

/// Canonical decimal form of a roll number.
///
/// Plain digits lose their leading zeros (any magnitude); spreadsheet
/// artifacts such as `2.410991589e9` or `2410991589.0` are accepted when
/// they denote an integer. Returns `None` for anything else.
pub fn canonical_roll_number(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);

    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        let stripped = digits.trim_start_matches('0');
        return Some(if stripped.is_empty() { "0".to_string() } else { stripped.to_string() });
    }

    let value: f64 = trimmed.parse().ok()?;
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
        Some(format!("{value:.0}"))
    } else {
        None
    }
}

/// Split `"Name RollNumber"` on the first whitespace run and canonicalize the roll number.
pub fn parse_label(label: &str) -> Result<Identity, RosterError> {
    let malformed = || RosterError::MalformedLabel(label.to_string());

    let (name, roll) = label.trim().split_once(char::is_whitespace).ok_or_else(malformed)?;
    let roll = roll.trim();
    if name.is_empty() || roll.is_empty() {
        return Err(malformed());
    }

    let roll_number =
        canonical_roll_number(roll).ok_or_else(|| RosterError::InvalidRollNumber(roll.to_string()))?;
    Ok(Identity::new(name, roll_number))
}

/// Build the roster from `entries` (image file name → label) under `image_dir`.
pub fn load_roster<A: FaceAnalyzer>(
    analyzer: &mut A,
    image_dir: &Path,
    entries: &BTreeMap<String, String>,
) -> Result<Vec<EnrollmentRecord>, RosterError> {
    let mut roster = Vec::with_capacity(entries.len());
    let mut seen = HashSet::new();

    for (file, label) in entries {
        let path = image_dir.join(file);

        let identity = match parse_label(label) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(file = %file, error = %e, "skipping roster entry");
                continue;
            }
        };

        let image = match image::open(&path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not load enrollment image");
                continue;
            }
        };

        let faces = analyzer.analyze(&image)?;
        let Some(face) = faces.into_iter().next() else {
            tracing::warn!(path = %path.display(), "no face found in enrollment image");
            continue;
        };

        if !seen.insert(identity.clone()) {
            tracing::warn!(identity = %identity, file = %file, "duplicate roster identity");
        }

        roster.push(EnrollmentRecord {
            identity,
            embedding: face.embedding,
            source: path,
        });
    }

    tracing::info!(
        loaded = roster.len(),
        configured = entries.len(),
        identities = ?roster.iter().map(|r| r.identity.to_string()).collect::<Vec<_>>(),
        "roster loaded"
    );

    Ok(roster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, DetectedFace, Embedding};
    use image::{Rgb, RgbImage};

    #[test]
    fn test_canonical_roll_number() {
        assert_eq!(canonical_roll_number("2410991589").as_deref(), Some("2410991589"));
        assert_eq!(canonical_roll_number("002310990376").as_deref(), Some("2310990376"));
        assert_eq!(canonical_roll_number("000").as_deref(), Some("0"));
        assert_eq!(canonical_roll_number("2.410991589e9").as_deref(), Some("2410991589"));
        assert_eq!(canonical_roll_number("2410991589.0").as_deref(), Some("2410991589"));
        assert_eq!(
            canonical_roll_number("123456789012345678901234567890").as_deref(),
            Some("123456789012345678901234567890")
        );
        assert_eq!(canonical_roll_number("24x1"), None);
        assert_eq!(canonical_roll_number("2.5"), None);
        assert_eq!(canonical_roll_number("-7"), None);
    }

    #[test]
    fn test_parse_label() {
        let identity = parse_label("Prerika 2410991589").unwrap();
        assert_eq!(identity.name, "Prerika");
        assert_eq!(identity.roll_number, "2410991589");

        assert!(matches!(parse_label("Prerika"), Err(RosterError::MalformedLabel(_))));
        assert!(matches!(parse_label("Prerika abc"), Err(RosterError::InvalidRollNumber(_))));
    }

    /// Reports one face for bright images, none for black ones.
    struct BrightnessAnalyzer;

    impl FaceAnalyzer for BrightnessAnalyzer {
        fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
            let level = image.get_pixel(0, 0)[0];
            if level == 0 {
                return Ok(Vec::new());
            }
            Ok(vec![DetectedFace {
                bbox: BoundingBox { x: 0.0, y: 0.0, width: 4.0, height: 4.0, confidence: 0.9 },
                embedding: Embedding::new(vec![level as f32 / 255.0, 0.0]),
            }])
        }
    }

    #[test]
    fn test_load_roster_skips_bad_entries() {
        let dir = tempfile::tempdir().expect("tmp dir");
        RgbImage::from_pixel(8, 8, Rgb([255, 255, 255]))
            .save(dir.path().join("1111.png"))
            .unwrap();
        RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]))
            .save(dir.path().join("1112.png"))
            .unwrap();
        std::fs::write(dir.path().join("1113.png"), b"not an image").unwrap();
        RgbImage::from_pixel(8, 8, Rgb([128, 128, 128]))
            .save(dir.path().join("1114.png"))
            .unwrap();

        let entries: BTreeMap<String, String> = [
            ("1111.png", "Anushka 2310990376"),
            ("1112.png", "Jiya 2310990619"),
            ("1113.png", "Jhanak 2310990618"),
            ("1114.png", "Ishita"),
            ("1115.png", "Prerika 2410991589"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let roster = load_roster(&mut BrightnessAnalyzer, dir.path(), &entries).unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].identity, Identity::new("Anushka", "2310990376"));
        assert_eq!(roster[0].source, dir.path().join("1111.png"));
        assert!((roster[0].embedding.values[0] - 1.0).abs() < 1e-6);
    }
}
