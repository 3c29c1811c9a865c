use std::fmt;

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::anchors::AnchorSet;
use crate::color::ColorSignature;
use crate::config::TrackerConfig;
use crate::error::Error;
use crate::frame::Frame;
use crate::kalman::{self, KalmanState};
use crate::template::Template;
use crate::trail::Trail;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TrackerId(pub u32);

impl fmt::Display for TrackerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Tracking,
    Occluded,
    Lost,
    /// Lost, with recovery probes running.
    Searching,
}

impl TrackState {
    #[inline]
    pub fn is_lost(&self) -> bool {
        matches!(self, TrackState::Lost | TrackState::Searching)
    }
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrackState::Tracking => "tracking",
            TrackState::Occluded => "occluded",
            TrackState::Lost => "lost",
            TrackState::Searching => "searching",
        };

        f.write_str(s)
    }
}

/// Appearance models used to find the target again.
#[derive(Debug, Clone, Default)]
pub struct ReIdProfile {
    pub template: Option<Template>,
    pub color: Option<ColorSignature>,
}

/// What the identification service told us, and request bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct AiProfile {
    pub label: String,
    pub description: Option<String>,
    pub features: Vec<String>,
    pub reference_image: Option<String>,
    pub last_observation: Option<String>,
    /// A request for this tracker is in flight.
    pub pending: bool,
    pub frames_since_validation: u32,
    pub validation_cooldown: u32,
}

#[derive(Debug, Clone)]
pub struct Tracker {
    pub id: TrackerId,
    pub position: na::Point2<f32>,
    pub prev_position: na::Point2<f32>,
    pub velocity: na::Vector2<f32>,
    pub kalman: KalmanState,
    pub confidence: f32,
    pub state: TrackState,
    pub frames_occluded: u32,
    pub frames_lost: u32,
    /// Bumped whenever the tracker is reset; AI results tagged with an older
    /// generation are stale.
    pub generation: u64,
    pub last_good: na::Point2<f32>,
    pub trail: Trail,
    pub reid: ReIdProfile,
    pub anchors: Option<AnchorSet>,
    pub ai: AiProfile,
}

impl Tracker {
    /// Creates a tracker on the point `(x, y)` of `frame`.
    ///
    /// Fails when the point is too close to the edge for a template, or when
    /// the region around it is flat. `cfg` must pass [`TrackerConfig::validate`].
    pub fn acquire(
        id: TrackerId,
        frame: &Frame,
        x: f32,
        y: f32,
        cfg: &TrackerConfig,
    ) -> Result<Self, Error> {
        debug_assert!(cfg.validate().is_ok(), "unvalidated tracker config");

        let position = na::Point2::new(x, y);
        let half = cfg.template.half_size.max(cfg.flow.sample_radius);

        if !x.is_finite() || !y.is_finite() || !frame.contains_square(x.round() as i32, y.round() as i32, half) {
            return Err(Error::Acquisition {
                x,
                y,
                reason: "too close to the frame edge",
            });
        }

        let template = Template::capture(frame, &position, &cfg.template).ok_or(Error::Acquisition {
            x,
            y,
            reason: "region is flat",
        })?;

        let color = ColorSignature::sample(
            frame,
            (x.round() as i32, y.round() as i32),
            cfg.color.sample_radius,
            cfg.color.stride,
        );

        let anchors = AnchorSet::detect(frame, &position, &cfg.anchors);

        debug!(%id, x, y, anchors = anchors.as_ref().map_or(0, |a| a.alive), "tracker acquired");

        Ok(Self {
            id,
            position,
            prev_position: position,
            velocity: na::Vector2::zeros(),
            kalman: KalmanState::new(position),
            confidence: 1.0,
            state: TrackState::Tracking,
            frames_occluded: 0,
            frames_lost: 0,
            generation: 0,
            last_good: position,
            trail: Trail::new(cfg.trail_capacity),
            reid: ReIdProfile {
                template: Some(template),
                color,
            },
            anchors,
            ai: AiProfile::default(),
        })
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.ai.label
    }

    #[inline]
    pub fn speed(&self) -> f32 {
        self.velocity.norm()
    }

    /// Lost for longer than the timeout; the tracker is no longer advanced.
    #[inline]
    pub fn is_dormant(&self, cfg: &TrackerConfig) -> bool {
        self.state.is_lost() && self.frames_lost > cfg.state.lost_timeout
    }

    /// Takes a fused measurement: filter, smooth the displayed position and
    /// move to `tracking`.
    pub(crate) fn accept(&mut self, measurement: &na::Point2<f32>, confidence: f32, cfg: &TrackerConfig) {
        let filtered = self.kalman.update(measurement, &cfg.kalman);

        self.prev_position = self.position;
        self.velocity = self.kalman.velocity;
        self.position = kalman::smooth(&self.position, &filtered, self.speed(), &cfg.kalman);
        self.confidence = confidence;
        self.state = TrackState::Tracking;
        self.frames_occluded = 0;
        self.frames_lost = 0;

        if confidence >= cfg.state.last_good_min_confidence {
            self.last_good = self.position;
        }
    }

    /// A frame without an acceptable measurement.
    pub(crate) fn miss(&mut self, confidence: f32, cfg: &TrackerConfig) {
        self.frames_occluded += 1;

        if self.frames_occluded > cfg.state.occlusion_timeout {
            self.mark_lost();
            return;
        }

        let decay = cfg.state.occluded_velocity_decay;

        self.prev_position = self.position;
        self.velocity *= decay;
        self.kalman.position = self.position;
        self.kalman.velocity *= decay;
        self.confidence = confidence.clamp(0.0, 1.0);
        self.state = TrackState::Occluded;
    }

    /// Freezes the tracker in `lost`.
    pub fn mark_lost(&mut self) {
        self.prev_position = self.position;
        self.velocity = na::Vector2::zeros();
        self.kalman.reset(self.position);
        self.confidence = 0.0;
        self.state = TrackState::Lost;
        self.frames_occluded = 0;
        self.frames_lost = 0;
        self.generation += 1;
    }

    /// Snaps to a recovered position with zero velocity.
    pub(crate) fn reacquire(
        &mut self,
        position: na::Point2<f32>,
        confidence: f32,
        frame: &Frame,
        cfg: &TrackerConfig,
    ) {
        self.prev_position = self.position;
        self.position = position;
        self.velocity = na::Vector2::zeros();
        self.kalman.reset(position);
        self.confidence = confidence.clamp(0.0, 1.0);
        self.state = TrackState::Tracking;
        self.frames_occluded = 0;
        self.frames_lost = 0;
        self.last_good = position;
        self.generation += 1;
        self.anchors = AnchorSet::detect(frame, &position, &cfg.anchors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{solid_frame, square_frame};

    #[test]
    fn acquire_builds_profiles() {
        let cfg = TrackerConfig::default();
        let frame = square_frame(200, 200, 100, 100, 20);

        let t = Tracker::acquire(TrackerId(7), &frame, 100.0, 100.0, &cfg).unwrap();

        assert_eq!(t.state, TrackState::Tracking);
        assert_eq!(t.velocity, na::Vector2::zeros());
        assert!(t.reid.template.is_some());
        assert!(t.reid.color.is_some());
        assert!(t.anchors.as_ref().map_or(false, |a| a.usable(&cfg.anchors)));
        assert_eq!(t.id.to_string(), "#7");
    }

    #[test]
    fn acquire_fails_near_edge_or_on_flat_region() {
        let cfg = TrackerConfig::default();
        let frame = square_frame(200, 200, 100, 100, 20);

        let err = Tracker::acquire(TrackerId(1), &frame, 4.0, 100.0, &cfg).unwrap_err();
        assert!(matches!(err, Error::Acquisition { .. }));

        let flat = solid_frame(200, 200, [40, 40, 40]);
        let err = Tracker::acquire(TrackerId(1), &flat, 100.0, 100.0, &cfg).unwrap_err();
        assert!(matches!(err, Error::Acquisition { reason: "region is flat", .. }));
    }

    #[test]
    fn occlusion_times_out_into_lost() {
        let cfg = TrackerConfig::default();
        let frame = square_frame(200, 200, 100, 100, 20);
        let mut t = Tracker::acquire(TrackerId(1), &frame, 100.0, 100.0, &cfg).unwrap();
        t.velocity = na::Vector2::new(5.0, 0.0);

        for i in 1..=cfg.state.occlusion_timeout {
            t.miss(0.2, &cfg);
            assert_eq!(t.state, TrackState::Occluded);
            assert_eq!(t.frames_occluded, i);
            assert_eq!(t.position, na::Point2::new(100.0, 100.0));
        }
        assert!(t.velocity.x < 5.0);

        t.miss(0.2, &cfg);
        assert_eq!(t.state, TrackState::Lost);
        assert_eq!(t.confidence, 0.0);
        assert_eq!(t.frames_occluded, 0);
        assert_eq!(t.generation, 1);
    }

    #[test]
    fn reacquire_resets_motion_and_counters() {
        let cfg = TrackerConfig::default();
        let frame = square_frame(200, 200, 100, 100, 20);
        let mut t = Tracker::acquire(TrackerId(1), &frame, 100.0, 100.0, &cfg).unwrap();
        t.mark_lost();
        t.frames_lost = 12;
        t.state = TrackState::Searching;

        t.reacquire(na::Point2::new(100.0, 100.0), 0.8, &frame, &cfg);

        assert_eq!(t.state, TrackState::Tracking);
        assert_eq!(t.frames_lost, 0);
        assert_eq!(t.kalman.velocity, na::Vector2::zeros());
        assert_eq!(t.generation, 2);
        assert_eq!(t.last_good, na::Point2::new(100.0, 100.0));
    }
}
