//! Frame type and pixel conversion: YUYV/MJPEG to RGB, dark detection.

use image::RgbImage;

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB8 pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    pub fn is_dark(&self) -> bool {
        is_dark_frame(&rgb_to_luma(&self.data), 0.95)
    }

    /// Copy into an [`RgbImage`] for detection or saving to disk.
    pub fn to_image(&self) -> Result<RgbImage, FrameError> {
        RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or(FrameError::InvalidLength {
            expected: (self.width * self.height * 3) as usize,
            actual: self.data.len(),
        })
    }
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// BT.601 limited-range YUV → RGB for one pixel.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    [
        clamp_u8(1.164 * c + 1.596 * e),
        clamp_u8(1.164 * c - 0.392 * d - 0.813 * e),
        clamp_u8(1.164 * c + 2.017 * d),
    ]
}

/// Convert packed YUYV (4:2:2) to RGB8.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

/// Decode a Motion-JPEG buffer to RGB8, returning its dimensions.
pub fn mjpeg_to_rgb(jpeg: &[u8]) -> Result<(Vec<u8>, u32, u32), FrameError> {
    let img = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .map_err(|e| FrameError::Decode(e.to_string()))?
        .to_rgb8();
    let (w, h) = img.dimensions();
    Ok((img.into_raw(), w, h))
}

/// Rec. 601 luma of packed RGB8 data.
pub fn rgb_to_luma(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|p| clamp_u8(0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32))
        .collect()
}

/// True if more than `threshold_pct` of pixels are in the darkest bucket (0–31).
pub fn is_dark_frame(luma: &[u8], threshold_pct: f32) -> bool {
    if luma.is_empty() {
        return true;
    }
    let dark = luma.iter().filter(|&&p| p < 32).count();
    (dark as f32 / luma.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPEG decode failed: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_rgb_grey_pixels() {
        // Y=126 with neutral chroma is mid grey; Y=16 is black, Y=235 is white.
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_to_rgb_red_chroma() {
        let rgb = yuyv_to_rgb(&[81, 90, 81, 240], 2, 1).unwrap();
        assert!(rgb[0] > 230 && rgb[1] < 30 && rgb[2] < 30, "{rgb:?}");
        assert_eq!(rgb[..3], rgb[3..]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(matches!(
            yuyv_to_rgb(&[100, 128], 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_mjpeg_decode() {
        let img = RgbImage::from_pixel(16, 8, image::Rgb([40, 120, 200]));
        let mut jpeg = std::io::Cursor::new(Vec::new());
        img.write_to(&mut jpeg, image::ImageFormat::Jpeg).unwrap();

        let (rgb, w, h) = mjpeg_to_rgb(jpeg.get_ref()).unwrap();
        assert_eq!((w, h), (16, 8));
        assert_eq!(rgb.len(), 16 * 8 * 3);
        assert!(mjpeg_to_rgb(b"garbage").is_err());
    }

    #[test]
    fn test_dark_frame() {
        assert!(is_dark_frame(&[0u8; 1000], 0.95));
        assert!(!is_dark_frame(&[128u8; 1000], 0.95));
        assert!(is_dark_frame(&[], 0.95));

        // 94% dark, 6% bright → not dark
        let mut luma = vec![10u8; 940];
        luma.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&luma, 0.95));
    }

    #[test]
    fn test_frame_to_image_and_darkness() {
        let frame = Frame {
            data: vec![100; 4 * 2 * 3],
            width: 4,
            height: 2,
            sequence: 7,
        };
        assert_eq!(frame.to_image().unwrap().dimensions(), (4, 2));
        assert!(!frame.is_dark());

        let short = Frame { data: vec![0; 5], ..frame };
        assert!(short.to_image().is_err());
    }
}
