use nalgebra as na;
use num_traits::Float;

/// Least-squares line `y = a * x + b`, returns `[a, b]`.
pub fn linear_ls<T: na::ComplexField + Float>(
    x: &na::DVector<T>,
    y: &na::DVector<T>,
) -> Option<na::Matrix2x1<T>> {
    let n = T::from(x.len())?;

    let s_x = x.sum() + T::from(f32::EPSILON)?;
    let x2 = x.map(|x| x * x);
    let s_x2 = x2.sum() + T::from(f32::EPSILON)?;
    let s_xy = x.zip_map(y, |x, y| x * y).sum();
    let s_y = y.sum();

    let a = na::Matrix2::new(s_x2, s_x, s_x, n);
    let b = na::Matrix2x1::new(s_xy, s_y);

    let qr_result = a.qr();
    let qty = qr_result.q().transpose() * b;

    qr_result.r().solve_upper_triangular(&qty)
}

pub fn gauss(x: f32, c: f32) -> f32 {
    (-((x * x) / (2.0 * c * c))).exp()
}

/// Median of the values, averaging the two middle elements for even counts.
pub fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }

    values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mid = values.len() / 2;

    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) * 0.5)
    } else {
        Some(values[mid])
    }
}

/// Vertex offset of the parabola through `(-1, left)`, `(0, center)`, `(1, right)`.
///
/// Scores are costs (lower is better); the offset is clamped to half a pixel
/// and is zero when the three samples do not form a minimum.
pub fn parabolic_offset(left: f32, center: f32, right: f32) -> f32 {
    let denom = left - 2.0 * center + right;

    if denom <= f32::EPSILON {
        return 0.0;
    }

    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}
