//! Whole-frame translation from a sparse grid of NCC probes.
//!
//! The per-axis median keeps a moving subject (which usually covers a
//! minority of the probes) from biasing the camera-motion estimate.

use nalgebra as na;
use tracing::trace;

use crate::config::GlobalMotionConfig;
use crate::frame::Frame;
use crate::math::median;
use crate::patch::Patch;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GlobalMotion {
    pub dx: f32,
    pub dy: f32,
    pub confidence: f32,
}

impl GlobalMotion {
    /// Displacement scaled by its confidence, ready to pre-shift predictions.
    #[inline]
    pub fn weighted_offset(&self) -> na::Vector2<f32> {
        na::Vector2::new(self.dx, self.dy) * self.confidence.clamp(0.0, 1.0)
    }

    #[inline]
    pub fn magnitude(&self) -> f32 {
        (self.dx * self.dx + self.dy * self.dy).sqrt()
    }
}

pub fn estimate(
    prev: &Frame,
    curr: &Frame,
    cfg: &GlobalMotionConfig,
    min_std: f32,
) -> Option<GlobalMotion> {
    if !cfg.enabled || !prev.same_dims(curr) {
        return None;
    }

    let (w, h) = prev.dims();
    let margin = cfg.patch_half + cfg.search_radius;
    let total = (cfg.grid * cfg.grid) as f32;

    let mut dxs = Vec::with_capacity(cfg.grid * cfg.grid);
    let mut dys = Vec::with_capacity(cfg.grid * cfg.grid);
    let mut score_sum = 0.0;

    for gy in 0..cfg.grid {
        for gx in 0..cfg.grid {
            let px = ((gx as f32 + 0.5) * w as f32 / cfg.grid as f32) as i32;
            let py = ((gy as f32 + 0.5) * h as f32 / cfg.grid as f32) as i32;

            if !prev.contains_square(px, py, margin) {
                continue;
            }

            let patch = match Patch::capture(prev.luma(), px, py, cfg.patch_half) {
                Some(p) if !p.is_flat(min_std) => p,
                _ => continue,
            };

            let found = patch.search(
                curr.luma(),
                (px, py),
                cfg.search_radius,
                cfg.coarse_step,
                min_std,
            );

            if let Some(m) = found.filter(|m| m.score >= cfg.min_confidence) {
                dxs.push(m.position.x - px as f32);
                dys.push(m.position.y - py as f32);
                score_sum += m.score;
            }
        }
    }

    let n = dxs.len();
    if n < cfg.min_probes.max(1) {
        trace!(probes = n, "global motion rejected");
        return None;
    }

    let motion = GlobalMotion {
        dx: median(&mut dxs)?,
        dy: median(&mut dys)?,
        confidence: (score_sum / n as f32) * (n as f32 / total),
    };

    trace!(?motion, probes = n, "global motion");

    Some(motion)
}
