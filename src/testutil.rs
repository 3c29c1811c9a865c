use crate::frame::Frame;

#[inline]
pub fn noise(x: i32, y: i32) -> u8 {
    let mut h = (x as u32).wrapping_mul(374_761_393) ^ (y as u32).wrapping_mul(668_265_263);
    h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);

    (h >> 24) as u8
}

pub fn frame_from_fn(w: u32, h: u32, f: impl Fn(i32, i32) -> [u8; 3]) -> Frame {
    let mut rgba = Vec::with_capacity((w * h * 4) as usize);

    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let [r, g, b] = f(x, y);
            rgba.extend_from_slice(&[r, g, b, 255]);
        }
    }

    Frame::from_rgba(w, h, rgba).unwrap()
}

/// Blocky random texture translated by `(sx, sy)`.
pub fn textured_frame(w: u32, h: u32, sx: i32, sy: i32) -> Frame {
    frame_from_fn(w, h, |x, y| {
        let v = noise((x - sx).div_euclid(2), (y - sy).div_euclid(2));
        [v, v / 2 + 40, 255 - v]
    })
}

/// Black frame with a `size`-pixel gray square centred at `(cx, cy)`.
pub fn square_frame(w: u32, h: u32, cx: i32, cy: i32, size: i32) -> Frame {
    let half = size / 2;

    frame_from_fn(w, h, |x, y| {
        if x >= cx - half && x < cx + half && y >= cy - half && y < cy + half {
            [128, 128, 128]
        } else {
            [0, 0, 0]
        }
    })
}

pub fn solid_frame(w: u32, h: u32, rgb: [u8; 3]) -> Frame {
    frame_from_fn(w, h, |_, _| rgb)
}
