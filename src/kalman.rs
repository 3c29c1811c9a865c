//! Steady-state constant-velocity filter plus speed-adaptive display smoothing.

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::config::KalmanConfig;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct KalmanState {
    pub position: na::Point2<f32>,
    pub velocity: na::Vector2<f32>,
}

impl KalmanState {
    pub fn new(position: na::Point2<f32>) -> Self {
        Self {
            position,
            velocity: na::Vector2::zeros(),
        }
    }

    /// Fixed gain `q / (q + r)`.
    #[inline]
    pub fn gain(cfg: &KalmanConfig) -> f32 {
        cfg.process_noise / (cfg.process_noise + cfg.measurement_noise)
    }

    #[inline]
    pub fn predict(&self) -> na::Point2<f32> {
        self.position + self.velocity
    }

    /// Pulls position and velocity toward `measurement`, returns the new position.
    pub fn update(&mut self, measurement: &na::Point2<f32>, cfg: &KalmanConfig) -> na::Point2<f32> {
        let g = Self::gain(cfg);
        let predicted = self.predict();
        let observed_velocity = *measurement - self.position;

        self.position = predicted + (*measurement - predicted) * g;
        self.velocity += (observed_velocity - self.velocity) * g;

        self.position
    }

    pub fn reset(&mut self, position: na::Point2<f32>) {
        self.position = position;
        self.velocity = na::Vector2::zeros();
    }
}

/// Exponential smoothing factor, larger at higher speed.
#[inline]
pub fn smoothing_factor(speed: f32, cfg: &KalmanConfig) -> f32 {
    (cfg.smoothing_base + cfg.smoothing_per_px * speed.max(0.0)).min(cfg.smoothing_max)
}

/// Moves the displayed position toward the filter output.
#[inline]
pub fn smooth(
    display: &na::Point2<f32>,
    filtered: &na::Point2<f32>,
    speed: f32,
    cfg: &KalmanConfig,
) -> na::Point2<f32> {
    *display + (*filtered - *display) * smoothing_factor(speed, cfg)
}
