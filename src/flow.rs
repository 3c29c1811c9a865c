//! Color patch search around the motion-predicted position.
//!
//! Three passes: a coarse grid over the adaptive radius keeping the best
//! `top_k` cells, gradient re-ranking of the survivors, and a dense step-1
//! refinement with parabolic sub-pixel correction. The winner is verified by
//! searching backward into the previous frame.

use nalgebra as na;
use tracing::trace;

use crate::config::FlowConfig;
use crate::frame::{color_distance_sq, Frame};
use crate::global_motion::GlobalMotion;
use crate::math::{gauss, parabolic_offset};
use crate::patch::Patch;

const EDGE_MIN_STD: f32 = 1e-3;

/// Motion state of one tracker going into a flow search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowQuery {
    pub position: na::Point2<f32>,
    pub velocity: na::Vector2<f32>,
    pub global: GlobalMotion,
    pub frames_occluded: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowMatch {
    pub position: na::Point2<f32>,
    pub score: f32,
    pub fb_error: f32,
    pub confidence: f32,
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlowOutcome {
    /// The predicted centre is inside the guard band.
    AtBoundary,
    /// The origin patch has no texture, or no candidate position could be scored.
    Miss,
    Found(FlowMatch),
}

impl FlowOutcome {
    #[inline]
    pub fn valid_match(&self) -> Option<&FlowMatch> {
        match self {
            FlowOutcome::Found(m) if m.valid => Some(m),
            _ => None,
        }
    }
}

/// Sub-linear extrapolation factor for the velocity term.
#[inline]
pub fn velocity_scale(speed: f32, cfg: &FlowConfig) -> f32 {
    (1.0 + cfg.velocity_scale_gain * speed.max(0.0).sqrt()).min(cfg.max_velocity_scale)
}

pub fn predict(q: &FlowQuery, cfg: &FlowConfig) -> na::Point2<f32> {
    let speed = q.velocity.norm();

    q.position + q.velocity * velocity_scale(speed, cfg) + q.global.weighted_offset()
}

/// Search radius widened by speed and by the time spent occluded.
#[inline]
pub fn search_radius(speed: f32, frames_occluded: u32, cfg: &FlowConfig) -> f32 {
    let r = cfg.base_search_radius
        + cfg.speed_radius_gain * speed
        + cfg.occlusion_radius_gain * frames_occluded as f32;

    r.min(cfg.max_search_radius)
}

#[inline]
pub fn at_boundary(frame: &Frame, p: &na::Point2<f32>, cfg: &FlowConfig) -> bool {
    frame.edge_distance(p) < cfg.boundary_guard + cfg.sample_radius as f32
}

/// Mean luma-weighted squared color difference between the window at `a` in
/// `fa` and the window at `b` in `fb`.
fn patch_distance(fa: &Frame, a: (i32, i32), fb: &Frame, b: (i32, i32), cfg: &FlowConfig) -> Option<f32> {
    let r = cfg.sample_radius;
    if !fa.contains_square(a.0, a.1, r) || !fb.contains_square(b.0, b.1, r) {
        return None;
    }

    let mut sum = 0.0;
    let mut n = 0usize;

    for dy in (-r..=r).step_by(cfg.sample_step) {
        for dx in (-r..=r).step_by(cfg.sample_step) {
            sum += color_distance_sq(fa.rgb(a.0 + dx, a.1 + dy), fb.rgb(b.0 + dx, b.1 + dy));
            n += 1;
        }
    }

    Some(sum / n as f32)
}

struct Scorer<'a> {
    prev: &'a Frame,
    curr: &'a Frame,
    origin: (i32, i32),
    predicted: na::Point2<f32>,
    query: &'a FlowQuery,
    edges: Option<Patch>,
    cfg: &'a FlowConfig,
}

impl<'a> Scorer<'a> {
    fn base(&self, x: i32, y: i32) -> Option<f32> {
        let color = patch_distance(self.prev, self.origin, self.curr, (x, y), self.cfg)?;
        let p = na::Point2::new(x as f32, y as f32);

        let deviation = (p - self.predicted).norm();
        let inconsistency = ((p - self.query.position) - self.query.velocity).norm();

        Some(color + self.cfg.distance_penalty * deviation + self.cfg.velocity_penalty * inconsistency)
    }

    fn full(&self, x: i32, y: i32) -> Option<f32> {
        let base = self.base(x, y)?;
        let w = self.cfg.edge_weight;

        match &self.edges {
            Some(edges) if w > 0.0 => {
                let ncc = edges
                    .ncc_at(self.curr.gradient(), x, y, EDGE_MIN_STD)
                    .unwrap_or(0.0)
                    .max(0.0);

                Some(base * (1.0 - w) + w * (1.0 - ncc) * self.cfg.lost_score_threshold)
            }
            _ => Some(base),
        }
    }
}

/// Runs the flow search for one tracker between two frames of equal size.
pub fn track(prev: &Frame, curr: &Frame, query: &FlowQuery, cfg: &FlowConfig) -> FlowOutcome {
    let predicted = predict(query, cfg);

    if at_boundary(curr, &predicted, cfg) {
        trace!(x = predicted.x, y = predicted.y, "flow prediction at boundary");
        return FlowOutcome::AtBoundary;
    }

    let origin = (query.position.x.round() as i32, query.position.y.round() as i32);
    let textured = Patch::capture(prev.luma(), origin.0, origin.1, cfg.sample_radius)
        .map_or(false, |p| !p.is_flat(cfg.min_std));
    if !textured {
        trace!(x = origin.0, y = origin.1, "flat flow origin");
        return FlowOutcome::Miss;
    }

    let center = (predicted.x.round() as i32, predicted.y.round() as i32);
    let speed = query.velocity.norm();
    let radius = search_radius(speed, query.frames_occluded, cfg).round() as i32;

    let scorer = Scorer {
        prev,
        curr,
        origin,
        predicted,
        query,
        edges: Patch::capture(prev.gradient(), origin.0, origin.1, cfg.sample_radius)
            .filter(|p| !p.is_flat(EDGE_MIN_STD)),
        cfg,
    };

    // coarse
    let step = cfg.coarse_step.max(1);
    let span = radius / step * step;
    let mut coarse = Vec::new();
    let mut dy = -span;
    while dy <= span {
        let mut dx = -span;
        while dx <= span {
            let (x, y) = (center.0 + dx, center.1 + dy);
            if let Some(s) = scorer.base(x, y) {
                coarse.push((x, y, s));
            }
            dx += step;
        }
        dy += step;
    }

    if coarse.is_empty() {
        return FlowOutcome::Miss;
    }

    coarse.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));
    coarse.truncate(cfg.top_k.max(1));

    // re-rank
    let mut best: Option<(i32, i32, f32)> = None;
    let consider = |x: i32, y: i32, best: &mut Option<(i32, i32, f32)>| {
        if let Some(s) = scorer.full(x, y) {
            if best.map_or(true, |(_, _, bs)| s < bs) {
                *best = Some((x, y, s));
            }
        }
    };

    for &(x, y, _) in &coarse {
        consider(x, y, &mut best);
    }

    // refine
    let (bx, by) = match best {
        Some((x, y, _)) => (x, y),
        None => return FlowOutcome::Miss,
    };
    for dy in -(step - 1)..step {
        for dx in -(step - 1)..step {
            consider(bx + dx, by + dy, &mut best);
        }
    }

    let (bx, by, score) = match best {
        Some(b) => b,
        None => return FlowOutcome::Miss,
    };

    let ox = match (scorer.full(bx - 1, by), scorer.full(bx + 1, by)) {
        (Some(l), Some(r)) => parabolic_offset(l, score, r),
        _ => 0.0,
    };
    let oy = match (scorer.full(bx, by - 1), scorer.full(bx, by + 1)) {
        (Some(t), Some(b)) => parabolic_offset(t, score, b),
        _ => 0.0,
    };
    let position = na::Point2::new(bx as f32 + ox, by as f32 + oy);

    let fb_error = backward_error(prev, curr, origin, (bx, by), cfg);

    let quality = (1.0 - score / cfg.lost_score_threshold).max(0.0);
    let sigma = cfg.consistency_sigma.max(speed);
    let consistency = gauss((position - predicted).norm(), sigma);
    let confidence = (0.7 * quality + 0.3 * consistency).clamp(0.0, 1.0);

    let found = FlowMatch {
        position,
        score,
        fb_error,
        confidence,
        valid: fb_error < cfg.fb_threshold && confidence >= cfg.min_confidence,
    };

    trace!(?found, radius, "flow");

    FlowOutcome::Found(found)
}

/// Round-trip error of the backward search from `found` toward `origin`.
fn backward_error(
    prev: &Frame,
    curr: &Frame,
    origin: (i32, i32),
    found: (i32, i32),
    cfg: &FlowConfig,
) -> f32 {
    let r = cfg.fb_search_radius;
    let mut best: Option<(i32, i32, f32)> = None;

    for dy in -r..=r {
        for dx in -r..=r {
            let back = (origin.0 + dx, origin.1 + dy);

            if let Some(s) = patch_distance(curr, found, prev, back, cfg) {
                let closer = |bx: i32, by: i32| dx * dx + dy * dy < (bx - origin.0).pow(2) + (by - origin.1).pow(2);

                match best {
                    Some((bx, by, bs)) if s > bs || (s == bs && !closer(bx, by)) => {}
                    _ => best = Some((back.0, back.1, s)),
                }
            }
        }
    }

    best.map_or(f32::INFINITY, |(x, y, _)| {
        (((x - origin.0).pow(2) + (y - origin.1).pow(2)) as f32).sqrt()
    })
}
