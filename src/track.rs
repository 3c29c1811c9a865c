use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::trail::TrailPoint;
use crate::tracker::{TrackState, Tracker, TrackerId};

/// Per-frame view of a tracker for callers and renderers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Track {
    pub track_id: TrackerId,
    pub label: String,
    pub state: TrackState,
    pub position: na::Point2<f32>,
    pub confidence: f32,
    pub frames_occluded: u32,
    pub frames_lost: u32,
    pub generation: u64,

    // in px per frame
    pub velocity: na::Vector2<f32>,

    // oldest first
    pub trail: Vec<TrailPoint>,

    // in px per second, fitted over the trail
    pub speed: Option<f32>,

    // (x,y)
    pub direction: Option<(f32, f32)>,
}

impl From<&Tracker> for Track {
    fn from(t: &Tracker) -> Self {
        Self {
            track_id: t.id,
            label: t.ai.label.clone(),
            state: t.state,
            position: t.position,
            confidence: t.confidence,
            frames_occluded: t.frames_occluded,
            frames_lost: t.frames_lost,
            generation: t.generation,
            velocity: t.velocity,
            trail: t.trail.points().copied().collect(),
            speed: t.trail.velocity().map(|v| v.norm()),
            direction: t.trail.heading().map(|h| (h.x, h.y)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::testutil::square_frame;

    #[test]
    fn snapshot_serializes_state_and_trail() {
        let cfg = TrackerConfig::default();
        let frame = square_frame(200, 200, 100, 100, 20);
        let mut t = Tracker::acquire(TrackerId(4), &frame, 100.0, 100.0, &cfg).unwrap();

        for i in 0..5 {
            t.trail.push(i as f32 * 0.1, na::Point2::new(100.0 + i as f32, 100.0));
        }

        let track = Track::from(&t);
        assert_eq!(track.trail.len(), 5);
        assert_eq!(track.trail[0].position.x, 100.0);

        let speed = track.speed.unwrap();
        assert!((speed - 10.0).abs() < 0.1, "speed = {}", speed);
        let (dx, dy) = track.direction.unwrap();
        assert!(dx > 0.99 && dy.abs() < 0.01);

        let json = serde_json::to_value(&track).unwrap();
        assert_eq!(json["state"], "tracking");
        assert_eq!(json["track_id"], 4);
    }
}
