//! Rigid keypoint constellation.
//!
//! Corners are picked with the Shi-Tomasi minimum-eigenvalue response and
//! followed one by one with small NCC searches. The constellation's position
//! is the per-axis median of the centroids implied by each surviving anchor,
//! which keeps a minority of anchors that slid onto the background from
//! dragging the estimate.

use nalgebra as na;
use tracing::trace;

use crate::config::AnchorConfig;
use crate::frame::{sobel, Frame};
use crate::math::median;
use crate::patch::Patch;

const ANCHOR_MIN_STD: f32 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    pub position: na::Point2<f32>,
    pub prev_position: na::Point2<f32>,
    /// Offset from the constellation centroid at seeding time.
    pub offset: na::Vector2<f32>,
    pub confidence: f32,
    pub alive: bool,
}

impl Anchor {
    #[inline]
    fn implied_centroid(&self) -> na::Point2<f32> {
        self.position - self.offset
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorEstimate {
    pub position: na::Point2<f32>,
    pub coherence: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnchorSet {
    pub anchors: Vec<Anchor>,
    pub centroid: na::Point2<f32>,
    pub coherence: f32,
    pub alive: usize,
    /// Tracked point relative to the centroid.
    target_offset: na::Vector2<f32>,
}

/// Minimum eigenvalue of the 3x3 structure tensor at `(x, y)`.
fn min_eigenvalue(frame: &Frame, x: i32, y: i32) -> f32 {
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);

    for dy in -1..=1 {
        for dx in -1..=1 {
            let (gx, gy) = sobel(frame.luma(), x + dx, y + dy);
            sxx += gx * gx;
            syy += gy * gy;
            sxy += gx * gy;
        }
    }

    let half_trace = (sxx + syy) * 0.5;
    let half_diff = (sxx - syy) * 0.5;

    half_trace - (half_diff * half_diff + sxy * sxy).sqrt()
}

impl AnchorSet {
    /// Seeds anchors on corners within `detection_radius` of `center`.
    ///
    /// `None` when fewer than `min_anchors` usable corners are found.
    pub fn detect(frame: &Frame, center: &na::Point2<f32>, cfg: &AnchorConfig) -> Option<Self> {
        let (cx, cy) = (center.x.round() as i32, center.y.round() as i32);
        let r = cfg.detection_radius;
        let margin = cfg.patch_half + 1;

        let mut corners = Vec::new();
        for y in cy - r..=cy + r {
            for x in cx - r..=cx + r {
                if (x - cx).pow(2) + (y - cy).pow(2) > r * r || !frame.contains_square(x, y, margin) {
                    continue;
                }

                let response = min_eigenvalue(frame, x, y);
                if response >= cfg.min_response {
                    corners.push((x, y, response));
                }
            }
        }

        let strongest = corners.iter().map(|c| c.2).fold(0.0f32, f32::max);
        let floor = cfg.min_response.max(strongest * cfg.quality_level);

        corners.retain(|c| c.2 >= floor);
        corners.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then((a.1, a.0).cmp(&(b.1, b.0)))
        });

        let spacing = cfg.min_spacing * cfg.min_spacing;
        let mut picked: Vec<na::Point2<f32>> = Vec::new();

        for (x, y, _) in corners {
            if picked.len() >= cfg.max_anchors {
                break;
            }

            let p = na::Point2::new(x as f32, y as f32);
            if picked.iter().any(|q| (*q - p).norm_squared() < spacing) {
                continue;
            }

            let textured = Patch::capture(frame.luma(), x, y, cfg.patch_half)
                .map_or(false, |patch| !patch.is_flat(ANCHOR_MIN_STD));

            if textured {
                picked.push(p);
            }
        }

        if picked.len() < cfg.min_anchors.max(1) {
            trace!(found = picked.len(), "too few anchors");
            return None;
        }

        let n = picked.len() as f32;
        let centroid = na::Point2::from(picked.iter().map(|p| p.coords).sum::<na::Vector2<f32>>() / n);

        let anchors = picked
            .into_iter()
            .map(|p| Anchor {
                position: p,
                prev_position: p,
                offset: p - centroid,
                confidence: 1.0,
                alive: true,
            })
            .collect::<Vec<_>>();

        trace!(count = anchors.len(), "anchors seeded");

        Some(Self {
            alive: anchors.len(),
            anchors,
            centroid,
            coherence: 1.0,
            target_offset: *center - centroid,
        })
    }

    #[inline]
    pub fn usable(&self, cfg: &AnchorConfig) -> bool {
        self.alive >= cfg.min_anchors.max(1)
    }

    /// Re-localizes every surviving anchor in `curr`.
    ///
    /// Each search is centred on the anchor's last position shifted by
    /// `motion`; its radius grows with `speed`, the tracker speed plus the
    /// camera shift.
    pub fn track(
        &mut self,
        prev: &Frame,
        curr: &Frame,
        motion: &na::Vector2<f32>,
        speed: f32,
        cfg: &AnchorConfig,
    ) {
        let radius = cfg.search_radius + (speed * cfg.speed_boost).ceil() as i32;
        let step = if radius > 10 { 2 } else { 1 };

        for anchor in self.anchors.iter_mut().filter(|a| a.alive) {
            let (px, py) = (anchor.position.x.round() as i32, anchor.position.y.round() as i32);
            let guess = anchor.position + *motion;
            let center = (guess.x.round() as i32, guess.y.round() as i32);

            let found = Patch::capture(prev.luma(), px, py, cfg.patch_half)
                .and_then(|patch| patch.search(curr.luma(), center, radius, step, ANCHOR_MIN_STD));

            match found {
                Some(m) if m.score >= cfg.min_confidence => {
                    anchor.prev_position = anchor.position;
                    anchor.position = m.position;
                    anchor.confidence = m.score;
                }
                other => {
                    anchor.alive = false;
                    anchor.confidence = other.map_or(0.0, |m| m.score.max(0.0));
                }
            }
        }

        self.alive = self.anchors.iter().filter(|a| a.alive).count();
    }

    /// Consensus position of the tracked point, `None` when too few anchors survive.
    pub fn estimate(&mut self, cfg: &AnchorConfig) -> Option<AnchorEstimate> {
        if !self.usable(cfg) {
            return None;
        }

        let implied: Vec<_> = self
            .anchors
            .iter()
            .filter(|a| a.alive)
            .map(|a| a.implied_centroid())
            .collect();

        let mut xs: Vec<f32> = implied.iter().map(|p| p.x).collect();
        let mut ys: Vec<f32> = implied.iter().map(|p| p.y).collect();
        let centroid = na::Point2::new(median(&mut xs)?, median(&mut ys)?);

        let agreeing = implied
            .iter()
            .filter(|p| (**p - centroid).norm() <= cfg.coherence_tolerance)
            .count();

        let n = implied.len() as f32;
        let mean_confidence = self
            .anchors
            .iter()
            .filter(|a| a.alive)
            .map(|a| a.confidence)
            .sum::<f32>()
            / n;

        self.centroid = centroid;
        self.coherence = agreeing as f32 / n;

        let estimate = AnchorEstimate {
            position: centroid + self.target_offset,
            coherence: self.coherence,
            confidence: self.coherence * mean_confidence,
        };

        trace!(?estimate, alive = self.alive, "anchors");

        Some(estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global_motion::GlobalMotion;
    use crate::testutil::{frame_from_fn, solid_frame, square_frame, textured_frame};

    #[test]
    fn seeds_on_square_corners() {
        let cfg = AnchorConfig::default();
        let frame = square_frame(200, 200, 100, 100, 20);

        let set = AnchorSet::detect(&frame, &na::Point2::new(100.0, 100.0), &cfg).unwrap();

        assert!(set.anchors.len() >= cfg.min_anchors);
        assert!(set.anchors.len() <= cfg.max_anchors);
        for a in &set.anchors {
            // each anchor sits near one of the four corners
            let near_corner = [(90.0, 90.0), (109.0, 90.0), (90.0, 109.0), (109.0, 109.0)]
                .iter()
                .any(|&(x, y)| (a.position - na::Point2::new(x, y)).norm() < 4.0);
            assert!(near_corner, "anchor at {:?}", a.position);
        }

        for (i, a) in set.anchors.iter().enumerate() {
            for b in &set.anchors[i + 1..] {
                assert!((a.position - b.position).norm() >= cfg.min_spacing);
            }
        }
    }

    #[test]
    fn flat_region_has_no_anchors() {
        let frame = solid_frame(100, 100, [60, 60, 60]);

        assert!(AnchorSet::detect(&frame, &na::Point2::new(50.0, 50.0), &AnchorConfig::default()).is_none());
    }

    #[test]
    fn constellation_follows_rigid_motion() {
        let cfg = AnchorConfig::default();
        let prev = textured_frame(200, 160, 0, 0);
        let curr = textured_frame(200, 160, 4, -2);
        let start = na::Point2::new(90.0, 80.0);

        let mut set = AnchorSet::detect(&prev, &start, &cfg).unwrap();
        set.track(&prev, &curr, &na::Vector2::zeros(), 0.0, &cfg);

        let est = set.estimate(&cfg).unwrap();
        assert!((est.position - na::Point2::new(94.0, 78.0)).norm() < 0.75);
        assert!(est.coherence > 0.9);
        assert!(est.confidence > 0.8);
    }

    #[test]
    fn camera_shift_widens_the_search() {
        let cfg = AnchorConfig::default();
        let prev = textured_frame(200, 160, 0, 0);
        let curr = textured_frame(200, 160, 12, 0);
        let start = na::Point2::new(90.0, 80.0);
        let pan = GlobalMotion {
            dx: 12.0,
            dy: 0.0,
            confidence: 0.9,
        };

        // no motion hint: only the widened radius reaches the shifted texture
        let mut set = AnchorSet::detect(&prev, &start, &cfg).unwrap();
        set.track(&prev, &curr, &na::Vector2::zeros(), pan.magnitude(), &cfg);

        let est = set.estimate(&cfg).unwrap();
        assert!((est.position - na::Point2::new(102.0, 80.0)).norm() < 0.75);
    }

    #[test]
    fn median_ignores_a_drifting_minority() {
        let cfg = AnchorConfig::default();
        let frame = textured_frame(200, 160, 0, 0);
        let mut set = AnchorSet::detect(&frame, &na::Point2::new(90.0, 80.0), &cfg).unwrap();

        let n = set.anchors.len();
        for (i, a) in set.anchors.iter_mut().enumerate() {
            a.position += if i < n / 3 {
                na::Vector2::new(25.0, -30.0)
            } else {
                na::Vector2::new(3.0, 1.0)
            };
        }

        let est = set.estimate(&cfg).unwrap();
        assert!((est.position - na::Point2::new(93.0, 81.0)).norm() < 1e-3);
        assert!(est.coherence < 1.0);
    }

    #[test]
    fn occluded_anchors_die_and_set_becomes_unusable() {
        let cfg = AnchorConfig::default();
        let prev = textured_frame(200, 160, 0, 0);
        let curr = frame_from_fn(200, 160, |_, _| [0, 0, 0]);

        let mut set = AnchorSet::detect(&prev, &na::Point2::new(90.0, 80.0), &cfg).unwrap();
        set.track(&prev, &curr, &na::Vector2::zeros(), 0.0, &cfg);

        assert_eq!(set.alive, 0);
        assert!(set.anchors.iter().all(|a| !a.alive));
        assert!(!set.usable(&cfg));
        assert!(set.estimate(&cfg).is_none());
    }
}
