use std::sync::Arc;

use nalgebra as na;
use ndarray::Array2;

use crate::error::Error;

const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

/// Immutable RGBA frame with its luma and gradient-magnitude planes.
///
/// Planes are indexed `[y, x]`. Cloning is cheap, all buffers are shared.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    rgba: Arc<[u8]>,
    luma: Arc<Array2<f32>>,
    gradient: Arc<Array2<f32>>,
}

impl Frame {
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, Error> {
        let expected = width as usize * height as usize * 4;

        if rgba.len() != expected || width == 0 || height == 0 {
            return Err(Error::BufferSize {
                width,
                height,
                expected,
                actual: rgba.len(),
            });
        }

        let (w, h) = (width as usize, height as usize);
        let luma = Array2::from_shape_fn((h, w), |(y, x)| {
            let i = (y * w + x) * 4;

            luma_of(rgba[i], rgba[i + 1], rgba[i + 2])
        });

        let gradient = gradient_magnitude(&luma);

        Ok(Self {
            width,
            height,
            rgba: rgba.into(),
            luma: Arc::new(luma),
            gradient: Arc::new(gradient),
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn same_dims(&self, other: &Frame) -> bool {
        self.dims() == other.dims()
    }

    #[inline]
    pub fn luma(&self) -> &Array2<f32> {
        &self.luma
    }

    #[inline]
    pub fn gradient(&self) -> &Array2<f32> {
        &self.gradient
    }

    #[inline]
    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    /// RGB triple at integer coordinates, the caller keeps `(x, y)` in bounds.
    #[inline(always)]
    pub fn rgb(&self, x: i32, y: i32) -> [f32; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 4;

        [
            self.rgba[i] as f32,
            self.rgba[i + 1] as f32,
            self.rgba[i + 2] as f32,
        ]
    }

    /// True when a square of half-size `half` centred at `(x, y)` lies fully inside.
    #[inline]
    pub fn contains_square(&self, x: i32, y: i32, half: i32) -> bool {
        x - half >= 0
            && y - half >= 0
            && x + half < self.width as i32
            && y + half < self.height as i32
    }

    /// Distance from `p` to the nearest frame edge (negative when outside).
    #[inline]
    pub fn edge_distance(&self, p: &na::Point2<f32>) -> f32 {
        let right = self.width as f32 - 1.0 - p.x;
        let bottom = self.height as f32 - 1.0 - p.y;

        p.x.min(p.y).min(right).min(bottom)
    }
}

#[inline(always)]
pub fn luma_of(r: u8, g: u8, b: u8) -> f32 {
    LUMA_R * r as f32 + LUMA_G * g as f32 + LUMA_B * b as f32
}

/// Squared color difference with perceptual luma weighting.
#[inline(always)]
pub fn color_distance_sq(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];

    LUMA_R * dr * dr + LUMA_G * dg * dg + LUMA_B * db * db
}

/// Sobel derivatives at `(x, y)` with replicated borders, scaled to intensity per pixel.
pub fn sobel(plane: &Array2<f32>, x: i32, y: i32) -> (f32, f32) {
    let (h, w) = plane.dim();
    let at = |dx: i32, dy: i32| {
        let xx = (x + dx).clamp(0, w as i32 - 1) as usize;
        let yy = (y + dy).clamp(0, h as i32 - 1) as usize;

        plane[[yy, xx]]
    };

    let gx = (at(1, -1) + 2.0 * at(1, 0) + at(1, 1)) - (at(-1, -1) + 2.0 * at(-1, 0) + at(-1, 1));
    let gy = (at(-1, 1) + 2.0 * at(0, 1) + at(1, 1)) - (at(-1, -1) + 2.0 * at(0, -1) + at(1, -1));

    (gx / 8.0, gy / 8.0)
}

pub fn gradient_magnitude(plane: &Array2<f32>) -> Array2<f32> {
    Array2::from_shape_fn(plane.dim(), |(y, x)| {
        let (gx, gy) = sobel(plane, x as i32, y as i32);

        (gx * gx + gy * gy).sqrt()
    })
}
