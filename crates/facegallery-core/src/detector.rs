//! SCRFD face detector via ONNX Runtime.
//!
//! The input image is scaled to fit a 640×640 canvas anchored at the top-left
//! corner, decoded across strides 8/16/32 and filtered with NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::cmp::Ordering;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; place det_10g.onnx in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Output slots for one stride: score, box distances, keypoint offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideSlots {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// Raw tensors produced for one stride.
struct StrideOutput<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    slots: [StrideSlots; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from `model_path`.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(path = model_path, outputs = ?names, "loaded SCRFD model");

        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD with keypoints has 9 outputs, model exposes {}",
                names.len()
            )));
        }

        let slots = map_output_slots(&names);
        tracing::debug!(?slots, "SCRFD output mapping");

        Ok(Self { session, slots })
    }

    /// Detect faces, highest confidence first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, scale) = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in self.slots.iter().zip(STRIDES.iter()) {
            let tensor = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };

            let output = StrideOutput {
                stride,
                scores: tensor(slot.score, "scores")?,
                bboxes: tensor(slot.bbox, "bboxes")?,
                kps: tensor(slot.kps, "keypoints")?,
            };
            candidates.extend(decode(&output, scale, SCORE_THRESHOLD));
        }

        Ok(nms(candidates, NMS_IOU))
    }
}

/// Scale into the top-left of a 640×640 canvas and normalize to NCHW.
///
/// Returns the tensor and the scale factor applied to the original image.
fn preprocess(image: &RgbImage) -> (Array4<f32>, f32) {
    let (w, h) = image.dimensions();
    let scale = (INPUT_SIZE as f32 / w as f32).min(INPUT_SIZE as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    // Padding stays black, as SCRFD was trained with.
    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), -PIXEL_MEAN / PIXEL_STD);
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }

    (tensor, scale)
}

/// Locate output tensors by name (`score_8`, `bbox_16`, `kps_32`, ...).
///
/// Exports with numeric tensor names use the standard order:
/// scores for strides 8/16/32, then boxes, then keypoints.
fn map_output_slots(names: &[String]) -> [StrideSlots; 3] {
    let find = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let by_name: Option<Vec<StrideSlots>> = STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideSlots {
                score: find("score", stride)?,
                bbox: find("bbox", stride)?,
                kps: find("kps", stride)?,
            })
        })
        .collect();

    match by_name {
        Some(slots) => {
            tracing::info!("SCRFD: output tensors matched by name");
            [slots[0], slots[1], slots[2]]
        }
        None => {
            tracing::info!(?names, "SCRFD: output names not recognized, using positional order");
            std::array::from_fn(|i| StrideSlots {
                score: i,
                bbox: i + 3,
                kps: i + 6,
            })
        }
    }
}

/// Decode one stride's anchors above `threshold` into original-image coordinates.
fn decode(output: &StrideOutput<'_>, scale: f32, threshold: f32) -> Vec<BoundingBox> {
    let stride = output.stride;
    let cols = INPUT_SIZE as usize / stride;
    let rows = INPUT_SIZE as usize / stride;
    let step = stride as f32;

    (0..rows * cols * ANCHORS_PER_CELL)
        .filter_map(|idx| {
            let confidence = *output.scores.get(idx)?;
            if confidence <= threshold {
                return None;
            }

            let cell = idx / ANCHORS_PER_CELL;
            let cx = (cell % cols) as f32 * step;
            let cy = (cell / cols) as f32 * step;

            let d = output.bboxes.get(idx * 4..idx * 4 + 4)?;
            let x1 = (cx - d[0] * step) / scale;
            let y1 = (cy - d[1] * step) / scale;
            let x2 = (cx + d[2] * step) / scale;
            let y2 = (cy + d[3] * step) / scale;

            let landmarks = output.kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|p| {
                    ((cx + k[p * 2] * step) / scale, (cy + k[p * 2 + 1] * step) / scale)
                })
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence,
                landmarks,
            })
        })
        .collect()
}

fn by_confidence_desc(a: &BoundingBox, b: &BoundingBox) -> Ordering {
    b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal)
}

/// Greedy non-maximum suppression; output is sorted by confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(by_confidence_desc);

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection-over-Union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let iy = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = ix * iy;
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn bbox(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence,
            landmarks: None,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_iou() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &bbox(20.0, 20.0, 10.0, 10.0, 1.0)), 0.0);
        // 5x10 overlap over a 150 union.
        assert!((iou(&a, &bbox(5.0, 0.0, 10.0, 10.0, 1.0)) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let kept = nms(
            vec![
                bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                bbox(200.0, 200.0, 50.0, 50.0, 0.7),
                bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            0.4,
        );
        let confidences: Vec<f32> = kept.iter().map(|b| b.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
        assert!(nms(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_output_slots_by_name() {
        let slots = map_output_slots(&names(&[
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]));
        assert_eq!(slots[0], StrideSlots { score: 2, bbox: 0, kps: 1 });
        assert_eq!(slots[2], StrideSlots { score: 8, bbox: 6, kps: 7 });
    }

    #[test]
    fn test_output_slots_positional_fallback() {
        let numeric: Vec<String> = (440..449).map(|i: usize| i.to_string()).collect();
        let slots = map_output_slots(&numeric);
        assert_eq!(slots[1], StrideSlots { score: 1, bbox: 4, kps: 7 });
    }

    #[test]
    fn test_decode_maps_back_to_image_space() {
        // Stride 32 grid is 20x20 with 2 anchors per cell; fire anchor 0 of cell (col 1, row 2).
        let anchors = 20 * 20 * ANCHORS_PER_CELL;
        let idx = (2 * 20 + 1) * ANCHORS_PER_CELL;
        let mut scores = vec![0.0; anchors];
        scores[idx] = 0.9;
        let mut bboxes = vec![0.0; anchors * 4];
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[0.5, 0.5, 0.5, 0.5]);
        let kps = vec![0.0; anchors * 10];

        let output = StrideOutput {
            stride: 32,
            scores: &scores,
            bboxes: &bboxes,
            kps: &kps,
        };
        let dets = decode(&output, 2.0, SCORE_THRESHOLD);

        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        // Anchor centre (32, 64) in canvas space, box ±16, halved by scale 2.
        assert!((d.x - 8.0).abs() < 1e-4);
        assert!((d.y - 24.0).abs() < 1e-4);
        assert!((d.width - 16.0).abs() < 1e-4);
        assert_eq!(d.landmarks.unwrap()[0], (16.0, 32.0));
    }

    #[test]
    fn test_preprocess_pads_black_and_scales() {
        let image = RgbImage::from_pixel(320, 160, Rgb([255, 255, 255]));
        let (tensor, scale) = preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((scale - 2.0).abs() < 1e-6);
        // Content occupies the top 320 rows; below is padding.
        assert!((tensor[[0, 0, 10, 10]] - (127.5 / 128.0)).abs() < 1e-3);
        assert!((tensor[[0, 0, 600, 10]] + 127.5 / 128.0).abs() < 1e-6);
    }
}
