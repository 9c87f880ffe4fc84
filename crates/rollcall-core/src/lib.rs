//! rollcall-core: Roster loading and face identification.
//!
//! Face detection (SCRFD) and embedding (ArcFace) run via ONNX Runtime
//! behind the [`FaceAnalyzer`] trait; the roster and identifier only ever
//! see that trait.

pub mod analyzer;
pub mod detector;
pub mod identify;
pub mod recognizer;
pub mod roster;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxAnalyzer};
pub use detector::FaceDetector;
pub use identify::Identifier;
pub use recognizer::FaceRecognizer;
pub use roster::{canonical_roll_number, load_roster, parse_label, RosterError};
pub use types::{
    BoundingBox, DetectedFace, DistanceMatcher, Embedding, EnrollmentRecord, FaceMatch, Identity,
    MatchResult,
};
