//! Per-frame state machine over all trackers.
//!
//! `tracking`/`occluded` trackers run the matchers and fuse their candidates;
//! `lost`/`searching` trackers climb the recovery ladder (detector near the
//! last good position, unclaimed detector boxes, wide template search, color
//! grid search), each rung on a slower cadence than the one before.

use nalgebra as na;
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::anchors::AnchorSet;
use crate::candidate::{CandidateSource, TrackingCandidate};
use crate::color::{self, Roi};
use crate::config::TrackerConfig;
use crate::detection::Detection;
use crate::flow::{self, FlowQuery};
use crate::frame::Frame;
use crate::fusion;
use crate::global_motion::{self, GlobalMotion};
use crate::patch::Patch;
use crate::tracker::{TrackState, Tracker, TrackerId};

/// Why a tracker changed state.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    /// A fused measurement was accepted.
    Fused,
    /// No acceptable measurement this frame.
    Missed,
    /// The prediction entered the frame guard band.
    Boundary,
    OcclusionTimeout,
    /// Recovery probes ran without success.
    Probing,
    Detector,
    Template,
    Color,
    /// The AI service rejected the target.
    Validation,
    /// The AI service found the target.
    AiReacquisition,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StateChangeEvent {
    pub tracker_id: TrackerId,
    pub from: TrackState,
    pub to: TrackState,
    pub cause: Cause,
    pub ts: f32,
}

struct StepContext<'a> {
    prev: &'a Frame,
    curr: &'a Frame,
    global: GlobalMotion,
    detections: &'a [Detection],
    /// Boxes already explained by an active tracker.
    claimed: &'a [bool],
    cfg: &'a TrackerConfig,
}

/// Whether `det` names this tracker, by detector track id or by label.
fn identifies(t: &Tracker, det: &Detection, cfg: &TrackerConfig) -> bool {
    det.track_id == Some(t.id.0) || (!cfg.ai.is_placeholder(t.label()) && det.has_label(t.label()))
}

/// Whether `t` may take `det`. A box tagged with another tracker's id never qualifies.
fn compatible(t: &Tracker, det: &Detection, cfg: &TrackerConfig) -> bool {
    let foreign = det.track_id.map_or(false, |id| id != t.id.0);

    !foreign && (cfg.ai.is_placeholder(t.label()) || identifies(t, det, cfg))
}

/// Whether the luma window of half-size `half` around `p` carries any texture.
fn textured(frame: &Frame, p: &na::Point2<f32>, half: i32, min_std: f32) -> bool {
    Patch::capture(frame.luma(), p.x.round() as i32, p.y.round() as i32, half)
        .map_or(false, |w| !w.is_flat(min_std))
}

fn nearest<'a, I>(dets: I, to: &na::Point2<f32>, radius: f32) -> Option<&'a Detection>
where
    I: Iterator<Item = &'a Detection>,
{
    dets.map(|d| (d, (d.center() - *to).norm()))
        .filter(|(_, dist)| *dist <= radius)
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(d, _)| d)
}

/// Advances every tracker by one frame and reports the state changes.
///
/// `prev` is the frame the trackers were last advanced on. A missing previous
/// frame, or one with other dimensions, leaves the trackers untouched.
///
/// `cfg` must pass [`TrackerConfig::validate`]; zero steps or radii panic.
pub fn step(
    prev: Option<&Frame>,
    curr: &Frame,
    trackers: &mut [Tracker],
    detections: &[Detection],
    cfg: &TrackerConfig,
    now: f32,
) -> Vec<StateChangeEvent> {
    debug_assert!(cfg.validate().is_ok(), "unvalidated tracker config");

    let prev = match prev {
        Some(prev) if prev.same_dims(curr) => prev,
        _ => {
            debug!("no comparable previous frame, trackers not advanced");
            return Vec::new();
        }
    };

    let (w, h) = curr.dims();
    let detections: Vec<Detection> = detections.iter().map(|d| d.to_pixels(w, h)).collect();

    let any_active = trackers.iter().any(|t| !t.state.is_lost());
    let global = if any_active {
        global_motion::estimate(prev, curr, &cfg.global_motion, cfg.template.min_std).unwrap_or_default()
    } else {
        GlobalMotion::default()
    };

    let claimed: Vec<bool> = detections
        .iter()
        .map(|d| {
            trackers.iter().any(|t| {
                !t.state.is_lost()
                    && (d.track_id == Some(t.id.0)
                        || (d.center() - t.position).norm() <= cfg.fusion.detector_radius)
            })
        })
        .collect();

    let ctx = StepContext {
        prev,
        curr,
        global,
        detections: &detections,
        claimed: &claimed,
        cfg,
    };

    let events: Vec<Option<StateChangeEvent>> = if cfg.parallel {
        trackers.par_iter_mut().map(|t| advance(t, &ctx, now)).collect()
    } else {
        trackers.iter_mut().map(|t| advance(t, &ctx, now)).collect()
    };

    events.into_iter().flatten().collect()
}

fn advance(t: &mut Tracker, ctx: &StepContext<'_>, now: f32) -> Option<StateChangeEvent> {
    if t.is_dormant(ctx.cfg) {
        return None;
    }

    let from = t.state;
    let cause = if from.is_lost() {
        recover(t, ctx)
    } else {
        follow(t, ctx)
    };

    if !t.state.is_lost() {
        t.trail.push(now, t.position);
    }

    if t.state == from {
        return None;
    }

    debug!(id = %t.id, %from, to = %t.state, ?cause, "state change");

    Some(StateChangeEvent {
        tracker_id: t.id,
        from,
        to: t.state,
        cause,
        ts: now,
    })
}

/// One frame of a `tracking` or `occluded` tracker.
fn follow(t: &mut Tracker, ctx: &StepContext<'_>) -> Cause {
    let cfg = ctx.cfg;
    let query = FlowQuery {
        position: t.position,
        velocity: t.velocity,
        global: ctx.global,
        frames_occluded: t.frames_occluded,
    };

    let predicted = flow::predict(&query, &cfg.flow);
    if flow::at_boundary(ctx.curr, &predicted, &cfg.flow) {
        t.mark_lost();
        return Cause::Boundary;
    }

    let speed = t.speed();
    let radius = flow::search_radius(speed, t.frames_occluded, &cfg.flow);
    let mut candidates = Vec::with_capacity(4);

    let outcome = flow::track(ctx.prev, ctx.curr, &query, &cfg.flow);
    let flow_match = outcome.valid_match().copied();
    if let Some(m) = flow_match {
        candidates.push(TrackingCandidate::new(m.position, m.confidence, CandidateSource::Flow));
    }

    if let Some(tpl) = &t.reid.template {
        if let Some(m) = tpl.search(ctx.curr, &predicted, &cfg.template) {
            candidates.push(TrackingCandidate::new(m.position, m.score, CandidateSource::Template));
        }
    }

    if let Some(set) = &mut t.anchors {
        let motion = flow_match.map_or(predicted - t.position, |m| m.position - t.position);

        set.track(ctx.prev, ctx.curr, &motion, speed + ctx.global.magnitude(), &cfg.anchors);
        if let Some(est) = set.estimate(&cfg.anchors) {
            candidates.push(TrackingCandidate::new(est.position, est.confidence, CandidateSource::Anchor));
        }
    }

    let box_hit = nearest(
        ctx.detections.iter().filter(|d| compatible(t, d, cfg)),
        &predicted,
        cfg.fusion.detector_radius,
    );
    if let Some(d) = box_hit {
        candidates.push(TrackingCandidate::new(d.center(), d.confidence, CandidateSource::Detector));
    }

    let gate = fusion::gate_radius(radius, &cfg.fusion);

    match fusion::fuse(&candidates, gate, &cfg.fusion) {
        Some(fused) if fused.confidence >= cfg.fusion.min_confidence => {
            t.accept(&fused.position, fused.confidence, cfg);
            refresh_models(t, ctx);

            Cause::Fused
        }
        other => {
            t.miss(other.map_or(0.0, |f| f.confidence), cfg);

            if t.state == TrackState::Lost {
                Cause::OcclusionTimeout
            } else {
                Cause::Missed
            }
        }
    }
}

/// Appearance upkeep after an accepted measurement.
fn refresh_models(t: &mut Tracker, ctx: &StepContext<'_>) {
    let cfg = ctx.cfg;

    let refreshed = match &mut t.reid.template {
        Some(tpl) => tpl.tick(ctx.curr, &t.position, t.confidence, &cfg.template),
        None => false,
    };

    if refreshed {
        let (x, y) = (t.position.x.round() as i32, t.position.y.round() as i32);
        let fresh = color::ColorSignature::sample(ctx.curr, (x, y), cfg.color.sample_radius, cfg.color.stride);

        if let Some(fresh) = fresh {
            match &mut t.reid.color {
                Some(sig) => sig.blend(&fresh, cfg.template.refresh_rate),
                None => t.reid.color = Some(fresh),
            }
        }
    }

    let anchors_usable = t.anchors.as_ref().map_or(false, |a| a.usable(&cfg.anchors));
    if !anchors_usable && t.confidence >= cfg.state.last_good_min_confidence {
        t.anchors = AnchorSet::detect(ctx.curr, &t.position, &cfg.anchors);
    }
}

/// One frame of a `lost` or `searching` tracker.
fn recover(t: &mut Tracker, ctx: &StepContext<'_>) -> Cause {
    let cfg = ctx.cfg;
    let rc = &cfg.recovery;
    let attempt = t.frames_lost + 1;
    let due = |interval: u32| interval > 0 && attempt % interval == 0;

    // boxes an active tracker explains are off limits unless they name this one
    let near = ctx
        .detections
        .iter()
        .zip(ctx.claimed)
        .filter(|(d, claimed)| {
            d.confidence >= rc.detector_min_confidence
                && compatible(t, d, cfg)
                && (!**claimed || identifies(t, d, cfg))
        })
        .map(|(d, _)| d);

    if let Some(d) = nearest(near, &t.last_good, rc.detector_radius) {
        t.reacquire(d.center(), d.confidence, ctx.curr, cfg);
        return Cause::Detector;
    }

    if due(rc.wide_detector_interval) {
        let unclaimed = ctx
            .detections
            .iter()
            .zip(ctx.claimed)
            .filter(|(d, claimed)| {
                !**claimed && d.confidence >= rc.detector_min_confidence && compatible(t, d, cfg)
            })
            .map(|(d, _)| d);

        if let Some(d) = nearest(unclaimed, &t.last_good, rc.wide_detector_radius) {
            t.reacquire(d.center(), d.confidence, ctx.curr, cfg);
            return Cause::Detector;
        }
    }

    if due(rc.template_interval) {
        let found = t
            .reid
            .template
            .as_ref()
            .and_then(|tpl| tpl.recover(ctx.curr, &t.last_good, &cfg.template));

        if let Some(m) = found {
            t.reacquire(m.position, m.score, ctx.curr, cfg);
            return Cause::Template;
        }
    }

    if due(rc.color_interval) {
        let roi = if due(cfg.color.full_frame_interval) {
            None
        } else {
            Some(Roi {
                center: t.last_good,
                radius: cfg.color.roi_radius,
            })
        };

        let found = t
            .reid
            .color
            .as_ref()
            .and_then(|sig| color::grid_search(ctx.curr, sig, roi, &cfg.color))
            .filter(|m| {
                m.similarity >= cfg.color.min_similarity
                    && textured(ctx.curr, &m.position, cfg.color.sample_radius, cfg.template.min_std)
            });

        if let Some(m) = found {
            t.reacquire(m.position, m.similarity, ctx.curr, cfg);
            return Cause::Color;
        }
    }

    t.frames_lost += 1;
    t.state = TrackState::Searching;

    Cause::Probing
}
