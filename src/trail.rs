use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::circular_queue::CircularQueue;
use crate::math;

const VELOCITY_WINDOW: usize = 8;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TrailPoint {
    pub ts: f32,
    pub position: na::Point2<f32>,
}

/// Bounded, timestamped position history of one tracker.
#[derive(Debug, Clone)]
pub struct Trail {
    history: CircularQueue<TrailPoint>,
}

impl Trail {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: CircularQueue::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, ts: f32, position: na::Point2<f32>) {
        self.history.push(TrailPoint { ts, position });
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Oldest-first points, the order a renderer draws them in.
    #[inline]
    pub fn points(&self) -> impl Iterator<Item = &TrailPoint> {
        self.history.asc_iter()
    }

    /// Least-squares velocity (px/s) over the most recent samples.
    pub fn velocity(&self) -> Option<na::Vector2<f32>> {
        let recent: Vec<_> = self.history.iter().take(VELOCITY_WINDOW).collect();

        if recent.len() < 3 {
            return None;
        }

        // relative to the newest sample to keep the normal equations well scaled
        let t0 = recent[0].ts;
        let ts = na::DVector::from_iterator(recent.len(), recent.iter().map(|p| p.ts - t0));

        if ts.max() - ts.min() < 1e-3 {
            return None;
        }

        let xs = na::DVector::from_iterator(recent.len(), recent.iter().map(|p| p.position.x));
        let ys = na::DVector::from_iterator(recent.len(), recent.iter().map(|p| p.position.y));

        let bx = math::linear_ls(&ts, &xs)?;
        let by = math::linear_ls(&ts, &ys)?;

        Some(na::Vector2::new(bx[0], by[0]))
    }

    /// Unit direction of travel, if the target moves measurably.
    pub fn heading(&self) -> Option<na::Vector2<f32>> {
        let v = self.velocity()?;

        if v.norm() < 1e-3 {
            None
        } else {
            Some(v.normalize())
        }
    }
}
