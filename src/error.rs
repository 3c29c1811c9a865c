use thiserror::Error;

use crate::tracker::TrackerId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("RGBA buffer of {actual} bytes does not match {width}x{height} (expected {expected})")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Acquisition failed at ({x}, {y}): {reason}")]
    Acquisition { x: f32, y: f32, reason: &'static str },

    #[error("Unknown tracker: {0}")]
    UnknownTracker(TrackerId),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}
