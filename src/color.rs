//! HSV histogram fingerprint used for wide-area re-identification.

use nalgebra as na;
use tracing::trace;

use crate::config::ColorConfig;
use crate::frame::Frame;

pub const HUE_BINS: usize = 16;
pub const SAT_BINS: usize = 16;
pub const VAL_BINS: usize = 16;
pub const SIGNATURE_LEN: usize = HUE_BINS + SAT_BINS + VAL_BINS;

/// Concatenated hue, saturation and value histograms.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorSignature {
    bins: [f32; SIGNATURE_LEN],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorMatch {
    pub position: na::Point2<f32>,
    pub similarity: f32,
}

/// Hue in degrees `[0, 360)`, saturation and value in `[0, 1]`.
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let (r, g, b) = (r / 255.0, g / 255.0, b / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta <= f32::EPSILON {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    let s = if max <= f32::EPSILON { 0.0 } else { delta / max };

    (h, s, max)
}

#[inline]
fn bin(v: f32, bins: usize) -> usize {
    ((v * bins as f32) as usize).min(bins - 1)
}

impl ColorSignature {
    pub fn from_bins(bins: [f32; SIGNATURE_LEN]) -> Self {
        Self { bins }
    }

    #[inline]
    pub fn bins(&self) -> &[f32; SIGNATURE_LEN] {
        &self.bins
    }

    /// Histogram over the square of half-size `radius` around `center`, every `stride` pixels.
    ///
    /// `None` when fewer than a quarter of the sample grid falls inside the frame.
    pub fn sample(frame: &Frame, center: (i32, i32), radius: i32, stride: usize) -> Option<Self> {
        let (w, h) = (frame.width() as i32, frame.height() as i32);
        let stride = stride.max(1);
        let mut bins = [0.0f32; SIGNATURE_LEN];
        let mut total = 0usize;
        let mut inside = 0usize;

        for y in (center.1 - radius..=center.1 + radius).step_by(stride) {
            for x in (center.0 - radius..=center.0 + radius).step_by(stride) {
                total += 1;

                if x < 0 || y < 0 || x >= w || y >= h {
                    continue;
                }

                let [r, g, b] = frame.rgb(x, y);
                let (hue, sat, val) = rgb_to_hsv(r, g, b);

                bins[bin(hue / 360.0, HUE_BINS)] += 1.0;
                bins[HUE_BINS + bin(sat, SAT_BINS)] += 1.0;
                bins[HUE_BINS + SAT_BINS + bin(val, VAL_BINS)] += 1.0;
                inside += 1;
            }
        }

        if inside == 0 || inside * 4 < total {
            return None;
        }

        let norm = 1.0 / inside as f32;
        bins.iter_mut().for_each(|b| *b *= norm);

        Some(Self { bins })
    }

    /// Cosine similarity in `[0, 1]`; zero when either histogram is empty.
    pub fn compare(&self, other: &ColorSignature) -> f32 {
        let mut dot = 0.0f32;
        let mut na2 = 0.0f32;
        let mut nb2 = 0.0f32;

        for (a, b) in self.bins.iter().zip(other.bins.iter()) {
            dot += a * b;
            na2 += a * a;
            nb2 += b * b;
        }

        let denom = (na2 * nb2).sqrt();
        if denom <= f32::EPSILON {
            return 0.0;
        }

        (dot / denom).clamp(0.0, 1.0)
    }

    pub fn blend(&mut self, other: &ColorSignature, rate: f32) {
        for (a, b) in self.bins.iter_mut().zip(other.bins.iter()) {
            *a = *a * (1.0 - rate) + *b * rate;
        }
    }
}

/// Square search region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roi {
    pub center: na::Point2<f32>,
    pub radius: f32,
}

/// Grid search for the location that best matches `signature`.
///
/// Scans the region of interest (or the whole frame) on a coarse grid and
/// refines around the best cell on a three-times finer grid.
pub fn grid_search(
    frame: &Frame,
    signature: &ColorSignature,
    roi: Option<Roi>,
    cfg: &ColorConfig,
) -> Option<ColorMatch> {
    let (w, h) = (frame.width() as i32, frame.height() as i32);
    let r = cfg.sample_radius;

    let (x0, y0, x1, y1) = match roi {
        Some(roi) => (
            (roi.center.x - roi.radius) as i32,
            (roi.center.y - roi.radius) as i32,
            (roi.center.x + roi.radius) as i32,
            (roi.center.y + roi.radius) as i32,
        ),
        None => (0, 0, w - 1, h - 1),
    };

    let (x0, y0) = (x0.max(r), y0.max(r));
    let (x1, y1) = (x1.min(w - 1 - r), y1.min(h - 1 - r));

    if x0 > x1 || y0 > y1 {
        return None;
    }

    let score = |x: i32, y: i32| {
        ColorSignature::sample(frame, (x, y), r, cfg.stride).map(|s| signature.compare(&s))
    };

    let consider = |x: i32, y: i32, best: &mut Option<(i32, i32, f32)>| {
        if let Some(s) = score(x, y) {
            if best.map_or(true, |(_, _, bs)| s > bs) {
                *best = Some((x, y, s));
            }
        }
    };

    let mut best = None;
    let step = cfg.grid_step.max(1);
    for y in (y0..=y1).step_by(step as usize) {
        for x in (x0..=x1).step_by(step as usize) {
            consider(x, y, &mut best);
        }
    }

    let (cx, cy, _) = best?;
    let fine = (step / 3).max(1);
    let mut dy = -step + fine;
    while dy < step {
        let mut dx = -step + fine;
        while dx < step {
            let (x, y) = (cx + dx, cy + dy);
            if x >= x0 && x <= x1 && y >= y0 && y <= y1 {
                consider(x, y, &mut best);
            }
            dx += fine;
        }
        dy += fine;
    }

    let (bx, by, similarity) = best?;
    trace!(x = bx, y = by, similarity, full = roi.is_none(), "color grid search");

    Some(ColorMatch {
        position: na::Point2::new(bx as f32, by as f32),
        similarity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{frame_from_fn, noise, textured_frame};

    #[test]
    fn hsv_primaries() {
        assert_eq!(rgb_to_hsv(255.0, 0.0, 0.0), (0.0, 1.0, 1.0));

        let (h, s, v) = rgb_to_hsv(0.0, 255.0, 0.0);
        assert!((h - 120.0).abs() < 1e-3 && s == 1.0 && v == 1.0);

        let (h, _, _) = rgb_to_hsv(0.0, 0.0, 255.0);
        assert!((h - 240.0).abs() < 1e-3);

        assert_eq!(rgb_to_hsv(0.0, 0.0, 0.0), (0.0, 0.0, 0.0));
    }

    #[test]
    fn compare_is_symmetric_and_reflexive() {
        let frame = textured_frame(120, 120, 0, 0);

        let sigs: Vec<_> = [(30, 30), (60, 70), (90, 40)]
            .iter()
            .map(|&c| ColorSignature::sample(&frame, c, 15, 3).unwrap())
            .collect();

        for a in &sigs {
            assert!((a.compare(a) - 1.0).abs() < 1e-6);

            for b in &sigs {
                assert_eq!(a.compare(b), b.compare(a));
            }
        }

        let mut bins = [0.0; SIGNATURE_LEN];
        bins[3] = 2.0;
        bins[20] = 0.5;
        let sparse = ColorSignature::from_bins(bins);
        assert!((sparse.compare(&sparse) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_histogram_is_dissimilar() {
        let empty = ColorSignature::from_bins([0.0; SIGNATURE_LEN]);
        let frame = textured_frame(60, 60, 0, 0);
        let sig = ColorSignature::sample(&frame, (30, 30), 10, 2).unwrap();

        assert_eq!(empty.compare(&sig), 0.0);
        assert_eq!(sig.compare(&empty), 0.0);
    }

    #[test]
    fn sample_outside_frame_fails() {
        let frame = textured_frame(60, 60, 0, 0);

        assert!(ColorSignature::sample(&frame, (-40, 30), 10, 2).is_none());
    }

    fn blob_frame(cx: i32, cy: i32) -> Frame {
        frame_from_fn(240, 180, |x, y| {
            if (x - cx).abs() < 14 && (y - cy).abs() < 14 {
                [220, 30, 30]
            } else {
                let v = noise(x / 3, y / 3) / 4;
                [20, 120 + v, 40]
            }
        })
    }

    #[test]
    fn grid_search_relocates_blob() {
        let reference = blob_frame(60, 60);
        let sig = ColorSignature::sample(&reference, (60, 60), 12, 3).unwrap();

        let moved = blob_frame(170, 120);
        let cfg = ColorConfig {
            sample_radius: 12,
            ..ColorConfig::default()
        };

        let found = grid_search(&moved, &sig, None, &cfg).unwrap();
        assert!(found.similarity > 0.9, "similarity {}", found.similarity);
        assert!((found.position.x - 170.0).abs() <= 4.0);
        assert!((found.position.y - 120.0).abs() <= 4.0);

        let roi = Roi {
            center: na::Point2::new(60.0, 60.0),
            radius: 40.0,
        };
        let local = grid_search(&moved, &sig, Some(roi), &cfg).unwrap();
        assert!(local.similarity < 0.5);
    }
}
