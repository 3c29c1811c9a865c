use nalgebra as na;
use ndarray::Array2;

use crate::math::parabolic_offset;

/// Square grayscale patch with cached statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub half: i32,
    pub data: Vec<f32>,
    pub mean: f32,
    pub std: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NccMatch {
    pub position: na::Point2<f32>,
    pub score: f32,
}

#[inline]
fn fits(plane: &Array2<f32>, cx: i32, cy: i32, half: i32) -> bool {
    let (h, w) = plane.dim();

    cx - half >= 0 && cy - half >= 0 && cx + half < w as i32 && cy + half < h as i32
}

fn stats(data: &[f32]) -> (f32, f32) {
    let n = data.len() as f32;
    let mean = data.iter().sum::<f32>() / n;
    let var = data.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;

    (mean, var.max(0.0).sqrt())
}

impl Patch {
    /// Copies the `(2 * half + 1)^2` window centred at `(cx, cy)`; `None` if it leaves the plane.
    pub fn capture(plane: &Array2<f32>, cx: i32, cy: i32, half: i32) -> Option<Self> {
        if !fits(plane, cx, cy, half) {
            return None;
        }

        let side = (2 * half + 1) as usize;
        let mut data = Vec::with_capacity(side * side);

        for y in cy - half..=cy + half {
            for x in cx - half..=cx + half {
                data.push(plane[[y as usize, x as usize]]);
            }
        }

        let (mean, std) = stats(&data);

        Some(Self {
            half,
            data,
            mean,
            std,
        })
    }

    #[inline]
    pub fn side(&self) -> i32 {
        2 * self.half + 1
    }

    #[inline]
    pub fn is_flat(&self, min_std: f32) -> bool {
        self.std < min_std
    }

    /// Exponential blend toward `other`, which must have the same size.
    pub fn blend(&mut self, other: &Patch, rate: f32) {
        if other.half != self.half {
            return;
        }

        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a = *a * (1.0 - rate) + *b * rate;
        }

        let (mean, std) = stats(&self.data);
        self.mean = mean;
        self.std = std;
    }

    /// Normalized cross-correlation against the window at `(cx, cy)`.
    ///
    /// `None` when the window leaves the plane or either side is flat.
    pub fn ncc_at(&self, plane: &Array2<f32>, cx: i32, cy: i32, min_std: f32) -> Option<f32> {
        if self.is_flat(min_std) || !fits(plane, cx, cy, self.half) {
            return None;
        }

        let n = self.data.len() as f32;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut cross = 0.0;
        let mut idx = 0;

        for y in cy - self.half..=cy + self.half {
            for x in cx - self.half..=cx + self.half {
                let v = plane[[y as usize, x as usize]];
                sum += v;
                sum_sq += v * v;
                cross += v * (self.data[idx] - self.mean);
                idx += 1;
            }
        }

        let mean = sum / n;
        let std = (sum_sq / n - mean * mean).max(0.0).sqrt();

        if std < min_std {
            return None;
        }

        Some((cross / (n * std * self.std)).clamp(-1.0, 1.0))
    }

    /// Coarse-to-fine NCC search within `radius` of `center`.
    ///
    /// Evaluates a grid with spacing `step`, then (if `step > 1`) every pixel
    /// around the best coarse hit, and finally refines to sub-pixel precision.
    pub fn search(
        &self,
        plane: &Array2<f32>,
        center: (i32, i32),
        radius: i32,
        step: i32,
        min_std: f32,
    ) -> Option<NccMatch> {
        if self.is_flat(min_std) {
            return None;
        }

        let step = step.max(1);
        let mut best: Option<(i32, i32, f32)> = None;
        let consider = |x: i32, y: i32, best: &mut Option<(i32, i32, f32)>| {
            if let Some(score) = self.ncc_at(plane, x, y, min_std) {
                let closer = |bx: i32, by: i32| {
                    (x - center.0).pow(2) + (y - center.1).pow(2)
                        < (bx - center.0).pow(2) + (by - center.1).pow(2)
                };

                match *best {
                    Some((bx, by, bs)) if score < bs || (score == bs && !closer(bx, by)) => {}
                    _ => *best = Some((x, y, score)),
                }
            }
        };

        let mut dy = -radius;
        while dy <= radius {
            let mut dx = -radius;
            while dx <= radius {
                consider(center.0 + dx, center.1 + dy, &mut best);
                dx += step;
            }
            dy += step;
        }

        if step > 1 {
            let (cx, cy, _) = best?;
            for dy in -(step - 1)..step {
                for dx in -(step - 1)..step {
                    consider(cx + dx, cy + dy, &mut best);
                }
            }
        }

        let (bx, by, score) = best?;
        let cost = |x: i32, y: i32| self.ncc_at(plane, x, y, min_std).map(|s| 1.0 - s);
        let c0 = 1.0 - score;

        let ox = match (cost(bx - 1, by), cost(bx + 1, by)) {
            (Some(l), Some(r)) => parabolic_offset(l, c0, r),
            _ => 0.0,
        };
        let oy = match (cost(bx, by - 1), cost(bx, by + 1)) {
            (Some(t), Some(b)) => parabolic_offset(t, c0, b),
            _ => 0.0,
        };

        Some(NccMatch {
            position: na::Point2::new(bx as f32 + ox, by as f32 + oy),
            score,
        })
    }
}
