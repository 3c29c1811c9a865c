use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CandidateSource {
    Flow,
    Template,
    Anchor,
    Detector,
}

/// One matcher's opinion about a tracker's position in the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingCandidate {
    pub position: na::Point2<f32>,
    pub confidence: f32,
    pub source: CandidateSource,
}

impl TrackingCandidate {
    #[inline]
    pub fn new(position: na::Point2<f32>, confidence: f32, source: CandidateSource) -> Self {
        Self {
            position,
            confidence: confidence.clamp(0.0, 1.0),
            source,
        }
    }
}
