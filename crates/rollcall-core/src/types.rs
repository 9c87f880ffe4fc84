use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Label shown for faces that match no roster entry.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Bounding box for a detected face, in pixel coordinates of the analyzed image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Scale all coordinates by `factor` (confidence is left untouched).
    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance, the metric the match tolerance is expressed in.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An enrolled person.
///
/// `roll_number` is always canonical decimal digits, see
/// [`canonical_roll_number`](crate::roster::canonical_roll_number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub roll_number: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, roll_number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roll_number: roll_number.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.roll_number)
    }
}

/// A roster entry: identity plus the embedding taken from its enrollment image.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentRecord {
    pub identity: Identity,
    #[serde(skip)]
    pub embedding: Embedding,
    /// Enrollment image the embedding was extracted from.
    pub source: PathBuf,
}

/// One face reported by a [`FaceAnalyzer`](crate::FaceAnalyzer).
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// A detected face resolved against the roster.
#[derive(Debug, Clone)]
pub struct FaceMatch {
    /// Box in full-frame coordinates.
    pub bbox: BoundingBox,
    /// `None` means no roster entry was within tolerance.
    pub identity: Option<Identity>,
    /// Distance to the closest roster entry (`f32::INFINITY` for an empty roster).
    pub distance: f32,
}

impl FaceMatch {
    /// Overlay label: `"Name Roll"` or `"Unknown"`.
    pub fn label(&self) -> String {
        match &self.identity {
            Some(identity) => identity.to_string(),
            None => UNKNOWN_LABEL.to_string(),
        }
    }
}

/// Result of comparing a query embedding against the roster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    /// Index into the roster of the closest entry, present only when it is within tolerance.
    pub index: Option<usize>,
    /// Distance to the closest entry, whether or not it matched.
    pub distance: f32,
}

impl MatchResult {
    pub fn matched(&self) -> bool {
        self.index.is_some()
    }
}

/// Euclidean-distance matcher.
///
/// "Any entry under tolerance" decides whether there is a match; the entry
/// with the minimum distance decides who it is. Every entry is visited.
#[derive(Debug, Clone, Copy)]
pub struct DistanceMatcher {
    /// Strict upper bound on a matching distance. Lower = stricter.
    pub tolerance: f32,
}

impl DistanceMatcher {
    pub const DEFAULT_TOLERANCE: f32 = 0.5;

    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }

    pub fn compare(&self, query: &Embedding, roster: &[EnrollmentRecord]) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, record) in roster.iter().enumerate() {
            let dist = query.euclidean_distance(&record.embedding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        MatchResult {
            index: best_idx.filter(|_| best_dist < self.tolerance),
            distance: best_dist,
        }
    }
}

impl Default for DistanceMatcher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TOLERANCE)
    }
}
