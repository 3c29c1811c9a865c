#![allow(dead_code)]

use qtrack_fusion::Frame;

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

/// Gray `size` x `size` squares on black, one per centre.
pub fn squares(w: u32, h: u32, centers: &[(i32, i32)], size: i32) -> Frame {
    let half = size / 2;

    frame_from_fn(w, h, |x, y| {
        let hit = centers
            .iter()
            .any(|&(cx, cy)| x >= cx - half && x < cx + half && y >= cy - half && y < cy + half);

        if hit {
            [128, 128, 128]
        } else {
            [0, 0, 0]
        }
    })
}

pub fn square(w: u32, h: u32, cx: i32, cy: i32) -> Frame {
    squares(w, h, &[(cx, cy)], 20)
}

pub fn black(w: u32, h: u32) -> Frame {
    frame_from_fn(w, h, |_, _| [0, 0, 0])
}
