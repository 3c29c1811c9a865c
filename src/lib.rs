pub mod ai;
pub mod anchors;
pub mod bbox;
pub mod candidate;
pub mod color;
pub mod config;
pub mod detection;
pub mod error;
pub mod flow;
pub mod frame;
pub mod fusion;
pub mod global_motion;
pub mod kalman;
pub mod math;
pub mod patch;
pub mod pipeline;
pub mod session;
pub mod template;
pub mod tracker;
pub mod trail;

mod circular_queue;
mod track;

#[cfg(test)]
mod testutil;

pub use ai::{AiEvent, AiGate, AiRequest, AiRequestKind};
pub use candidate::{CandidateSource, TrackingCandidate};
pub use config::TrackerConfig;
pub use detection::Detection;
pub use error::Error;
pub use frame::Frame;
pub use pipeline::{Cause, StateChangeEvent};
pub use session::{StepOutput, TrackingSession};
pub use track::Track;
pub use tracker::{TrackState, Tracker, TrackerId};

use std::rc::Rc;

pub trait Tracking {
    fn update(&mut self, frame: Frame, dets: &[Detection], ts: f32) -> StepOutput;
    fn tracks(&self) -> Rc<[Track]>;
}
