//! Confidence-weighted fusion of same-frame candidates with outlier gating.

use nalgebra as na;
use tracing::trace;

use crate::candidate::{CandidateSource, TrackingCandidate};
use crate::config::FusionConfig;

const MIN_WEIGHT: f32 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct Fused {
    pub position: na::Point2<f32>,
    pub confidence: f32,
    pub agreement: f32,
    /// Sources that survived gating.
    pub sources: Vec<CandidateSource>,
    pub rejected: usize,
}

impl Fused {
    #[inline]
    pub fn has_source(&self, source: CandidateSource) -> bool {
        self.sources.contains(&source)
    }
}

#[inline]
pub fn source_weight(source: CandidateSource, cfg: &FusionConfig) -> f32 {
    match source {
        CandidateSource::Flow => cfg.flow_weight,
        CandidateSource::Template => cfg.template_weight,
        CandidateSource::Anchor => cfg.anchor_weight,
        CandidateSource::Detector => cfg.detector_weight,
    }
}

/// Gating radius for the current adaptive search radius.
#[inline]
pub fn gate_radius(search_radius: f32, cfg: &FusionConfig) -> f32 {
    (cfg.gate_scale * search_radius).max(cfg.gate_min)
}

fn weighted_mean<'a, I>(items: I) -> (na::Point2<f32>, f32)
where
    I: Iterator<Item = (&'a TrackingCandidate, f32)>,
{
    let mut acc = na::Vector2::zeros();
    let mut total = 0.0;

    for (c, w) in items {
        acc += c.position.coords * w;
        total += w;
    }

    (na::Point2::from(acc / total.max(MIN_WEIGHT)), total)
}

/// Fuses the candidates of one tracker into a single measurement.
///
/// The gate is centred on the weighted mean of the best supported cluster:
/// the candidate with the most neighbours within `gate` (ties go to the
/// heavier group). When all candidates agree this is the plain weighted mean;
/// when one source disagrees, its weight cannot pull the gate centre towards
/// itself.
pub fn fuse(candidates: &[TrackingCandidate], gate: f32, cfg: &FusionConfig) -> Option<Fused> {
    match candidates {
        [] => return None,
        [single] => {
            return Some(Fused {
                position: single.position,
                confidence: single.confidence,
                agreement: 1.0,
                sources: vec![single.source],
                rejected: 0,
            })
        }
        _ => {}
    }

    let weights: Vec<f32> = candidates
        .iter()
        .map(|c| (c.confidence * source_weight(c.source, cfg)).max(MIN_WEIGHT))
        .collect();

    let within = |a: &TrackingCandidate, b: &TrackingCandidate| (a.position - b.position).norm() <= gate;

    let mut leader_idx = 0;
    let mut leader_support = (0usize, 0.0f32);
    for (i, a) in candidates.iter().enumerate() {
        let (count, weight) = candidates
            .iter()
            .zip(&weights)
            .filter(|(b, _)| within(a, *b))
            .fold((0usize, 0.0f32), |(n, w), (_, bw)| (n + 1, w + *bw));

        if count > leader_support.0 || (count == leader_support.0 && weight > leader_support.1) {
            leader_idx = i;
            leader_support = (count, weight);
        }
    }

    let leader = &candidates[leader_idx];
    let (reference, _) = weighted_mean(
        candidates
            .iter()
            .zip(weights.iter().copied())
            .filter(|(c, _)| within(leader, *c)),
    );

    let mut survivors: Vec<(&TrackingCandidate, f32)> = candidates
        .iter()
        .zip(weights.iter().copied())
        .filter(|(c, _)| (c.position - reference).norm() <= gate)
        .collect();

    if survivors.is_empty() {
        survivors = candidates
            .iter()
            .zip(weights.iter().copied())
            .filter(|(c, _)| within(leader, *c))
            .collect();
    }

    let (position, total) = weighted_mean(survivors.iter().copied());
    let total = total.max(MIN_WEIGHT);

    let residual = survivors
        .iter()
        .map(|(c, w)| (c.position - position).norm() * w)
        .sum::<f32>()
        / total;

    let weighted_confidence = survivors.iter().map(|(c, w)| c.confidence * w).sum::<f32>() / total;
    let agreement = 1.0 - (residual / gate.max(MIN_WEIGHT)).clamp(0.0, 1.0);

    let fused = Fused {
        position,
        confidence: (0.7 * weighted_confidence + 0.3 * agreement).clamp(0.0, 1.0),
        agreement,
        sources: survivors.iter().map(|(c, _)| c.source).collect(),
        rejected: candidates.len() - survivors.len(),
    };

    trace!(?fused, "fusion");

    Some(fused)
}
