use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CoordSpace {
    Pixel,
    /// Coordinates in `[0, 1]` relative to the frame size.
    Normalized,
}

/// Detector box as delivered by the external detector client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BBox<Ltrb>,
    pub label: String,
    #[serde(rename = "p")]
    pub confidence: f32,
    #[serde(default)]
    pub track_id: Option<u32>,
    pub space: CoordSpace,
}

impl Detection {
    pub fn pixel(bbox: BBox<Ltrb>, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence,
            track_id: None,
            space: CoordSpace::Pixel,
        }
    }

    pub fn normalized(bbox: BBox<Ltrb>, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            space: CoordSpace::Normalized,
            ..Self::pixel(bbox, label, confidence)
        }
    }

    pub fn with_track_id(mut self, id: u32) -> Self {
        self.track_id = Some(id);
        self
    }

    /// Same detection in pixel coordinates of a `width` x `height` frame.
    pub fn to_pixels(&self, width: u32, height: u32) -> Detection {
        match self.space {
            CoordSpace::Pixel => self.clone(),
            CoordSpace::Normalized => Detection {
                bbox: self.bbox.scaled(width as f32, height as f32),
                space: CoordSpace::Pixel,
                ..self.clone()
            },
        }
    }

    #[inline(always)]
    pub fn center(&self) -> na::Point2<f32> {
        self.bbox.center()
    }

    #[inline]
    pub fn has_label(&self, label: &str) -> bool {
        self.label.trim().eq_ignore_ascii_case(label.trim())
    }
}
