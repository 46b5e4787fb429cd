//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face onto the InsightFace five-point template, scaled to
//! the embedding model's input size. Faces without landmarks fall back to a
//! plain bounding-box crop.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// Reference landmarks for a 112×112 crop.
const TEMPLATE_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

const TEMPLATE_SIZE: f32 = 112.0;

/// Template landmarks rescaled to a `size`×`size` crop.
fn template_for(size: u32) -> [(f32, f32); 5] {
    let ratio = size as f32 / TEMPLATE_SIZE;
    TEMPLATE_112.map(|(x, y)| (x * ratio, y * ratio))
}

/// Similarity transform `dst = [a -b; b a] * src + [tx; ty]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit (Umeyama without reflection) from `src` to `dst`.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
            (sx / n, sy / n)
        };
        let (smx, smy) = mean(src);
        let (dmx, dmy) = mean(dst);

        // With centered points the normal equations decouple:
        //   a = Σ(sx·dx + sy·dy) / Σ|s|²,  b = Σ(sx·dy − sy·dx) / Σ|s|²
        let mut num_a = 0.0f32;
        let mut num_b = 0.0f32;
        let mut denom = 0.0f32;
        for (s, d) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (s.0 - smx, s.1 - smy);
            let (dx, dy) = (d.0 - dmx, d.1 - dmy);
            num_a += sx * dx + sy * dy;
            num_b += sx * dy - sy * dx;
            denom += sx * sx + sy * sy;
        }
        if denom < 1e-12 {
            return None;
        }

        let a = num_a / denom;
        let b = num_b / denom;
        Some(Self {
            a,
            b,
            tx: dmx - (a * smx - b * smy),
            ty: dmy - (b * smx + a * smy),
        })
    }

    /// Map a destination point back into source coordinates.
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Bilinear sample with black outside the image.
fn sample(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let px = |xi: i64, yi: i64| -> [f32; 3] {
        if xi >= 0 && xi < w && yi >= 0 && yi < h {
            let p = image.get_pixel(xi as u32, yi as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr, bl, br) = (px(x0, y0), px(x0 + 1, y0), px(x0, y0 + 1), px(x0 + 1, y0 + 1));
    let mut out = [0u8; 3];
    for c in 0..3 {
        let v = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

fn warp(image: &RgbImage, transform: &Similarity, size: u32) -> RgbImage {
    RgbImage::from_fn(size, size, |ox, oy| match transform.invert_point(ox as f32, oy as f32) {
        Some((sx, sy)) => sample(image, sx, sy),
        None => Rgb([0, 0, 0]),
    })
}

/// Crop the bounding box (clamped to the image) and resize it to `size`×`size`.
fn crop_and_resize(image: &RgbImage, face: &BoundingBox, size: u32) -> RgbImage {
    let x0 = face.x.max(0.0).floor() as u32;
    let y0 = face.y.max(0.0).floor() as u32;
    let x1 = ((face.x + face.width).ceil().max(0.0) as u32).min(image.width());
    let y1 = ((face.y + face.height).ceil().max(0.0) as u32).min(image.height());

    if x1 <= x0 || y1 <= y0 {
        return imageops::resize(image, size, size, FilterType::Triangle);
    }

    let crop = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    imageops::resize(&crop, size, size, FilterType::Triangle)
}

/// Produce a `size`×`size` aligned RGB crop for the given detection.
pub fn align_face(image: &RgbImage, face: &BoundingBox, size: u32) -> RgbImage {
    let transform = face
        .landmarks
        .as_ref()
        .and_then(|lms| Similarity::estimate(lms, &template_for(size)));

    match transform {
        Some(t) => warp(image, &t, size),
        None => crop_and_resize(image, face, size),
    }
}
