//! Resolves the faces in a frame against the roster.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::types::{DistanceMatcher, EnrollmentRecord, FaceMatch};
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Default frame downscale factor applied before detection.
pub const DEFAULT_DOWNSCALE: f32 = 0.25;

/// Wraps a [`FaceAnalyzer`] and a roster; turns frames into [`FaceMatch`]es.
pub struct Identifier<A> {
    analyzer: A,
    roster: Vec<EnrollmentRecord>,
    matcher: DistanceMatcher,
    downscale: f32,
}

impl<A: FaceAnalyzer> Identifier<A> {
    pub fn new(analyzer: A, roster: Vec<EnrollmentRecord>, matcher: DistanceMatcher) -> Self {
        Self {
            analyzer,
            roster,
            matcher,
            downscale: DEFAULT_DOWNSCALE,
        }
    }

    /// Set the detection downscale factor. Values outside (0, 1] mean "no downscale".
    pub fn with_downscale(mut self, factor: f32) -> Self {
        self.downscale = if factor > 0.0 && factor <= 1.0 { factor } else { 1.0 };
        self
    }

    pub fn roster(&self) -> &[EnrollmentRecord] {
        &self.roster
    }

    /// One match per detected face. Boxes are returned in full-frame coordinates.
    pub fn identify(&mut self, frame: &RgbImage) -> Result<Vec<FaceMatch>, AnalyzerError> {
        let small;
        let analyzed = if self.downscale < 1.0 {
            let w = ((frame.width() as f32 * self.downscale).round() as u32).max(1);
            let h = ((frame.height() as f32 * self.downscale).round() as u32).max(1);
            small = imageops::resize(frame, w, h, FilterType::Triangle);
            &small
        } else {
            frame
        };
        let upscale = 1.0 / self.downscale;

        let faces = self.analyzer.analyze(analyzed)?;
        let matches = faces
            .into_iter()
            .map(|face| {
                let result = self.matcher.compare(&face.embedding, &self.roster);
                FaceMatch {
                    bbox: face.bbox.scaled(upscale),
                    identity: result.index.map(|i| self.roster[i].identity.clone()),
                    distance: result.distance,
                }
            })
            .collect();

        Ok(matches)
    }
}
