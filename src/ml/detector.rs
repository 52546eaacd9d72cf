//! Object detection over a single image.
//!
//! `YoloDetector` runs a YOLOv8-style ONNX export whose only output has shape
//! `[1, 4 + classes, proposals]` (centre x, centre y, width, height, then one
//! score per class), which is what `yolo export format=onnx` produces for both
//! the COCO model and single-class face models.

use std::path::Path;

use image::{DynamicImage, GenericImageView};
use ndarray::{ArrayViewD, Axis, Ix3};
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{PipelineError, Result};
use crate::ml::engine::{inference_error, input_name, load_session, output_name};
use crate::ml::pipeline::{normalize_for_detector, Letterbox};

pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const DEFAULT_CONFIDENCE: f32 = 0.25;
pub const DEFAULT_IOU: f32 = 0.7;

/// Axis-aligned box in source image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter)
    }

    /// Integer pixel rectangle `(x, y, width, height)` inside a
    /// `width`x`height` image, or `None` if nothing of the box remains.
    pub fn pixel_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let clamp = |v: f32, max: u32| (v.max(0.0) as u32).min(max);
        let x1 = clamp(self.x1, width);
        let y1 = clamp(self.y1, height);
        let x2 = clamp(self.x2, width);
        let y2 = clamp(self.y2, height);
        (x2 > x1 && y2 > y1).then(|| (x1, y1, x2 - x1, y2 - y1))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

pub trait ObjectDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>>;
}

impl<T: ObjectDetector + ?Sized> ObjectDetector for Box<T> {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        (**self).detect(image)
    }
}

pub struct YoloDetector {
    session: Session,
    labels: Vec<String>,
    input_size: u32,
    confidence: f32,
    iou: f32,
}

impl YoloDetector {
    pub fn load(model_path: &Path, labels: &[&str]) -> Result<Self> {
        let session = load_session(model_path)?;
        Ok(Self {
            session,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            input_size: DEFAULT_INPUT_SIZE,
            confidence: DEFAULT_CONFIDENCE,
            iou: DEFAULT_IOU,
        })
    }
}

impl ObjectDetector for YoloDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let (input, letterbox) = normalize_for_detector(image, self.input_size);
        let tensor = Tensor::from_array(input).map_err(inference_error)?;

        let input_name = input_name(&self.session, 0)?;
        let output_name = output_name(&self.session, 0)?;
        let outputs = self
            .session
            .run(ort::inputs![input_name => tensor].map_err(inference_error)?)
            .map_err(inference_error)?;
        let raw = outputs[output_name]
            .try_extract_tensor::<f32>()
            .map_err(inference_error)?;

        let (width, height) = image.dimensions();
        let candidates = decode_predictions(
            raw,
            &self.labels,
            self.confidence,
            letterbox,
            width as f32,
            height as f32,
        )?;
        Ok(non_max_suppression(candidates, self.iou))
    }
}

/// Turns the raw `[1, 4 + classes, proposals]` tensor into detections in
/// source-image pixels, keeping the best class of each proposal.
pub fn decode_predictions(
    raw: ArrayViewD<'_, f32>,
    labels: &[String],
    confidence: f32,
    letterbox: Letterbox,
    width: f32,
    height: f32,
) -> Result<Vec<Detection>> {
    let raw = raw
        .into_dimensionality::<Ix3>()
        .map_err(|e| PipelineError::Inference(format!("unexpected detector output: {}", e)))?;
    let rows = raw.index_axis(Axis(0), 0);
    let (features, proposals) = rows.dim();
    if features < 5 {
        return Err(PipelineError::Inference(format!(
            "detector output has {} rows, expected at least 5",
            features
        )));
    }

    let mut detections = Vec::new();
    for i in 0..proposals {
        let (class, score) = (4..features)
            .map(|row| (row - 4, rows[[row, i]]))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < confidence {
            continue;
        }

        let (cx, cy, w, h) = (rows[[0, i]], rows[[1, i]], rows[[2, i]], rows[[3, i]]);
        let (x1, y1) = letterbox.to_source(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_source(cx + w / 2.0, cy + h / 2.0);

        detections.push(Detection {
            label: labels
                .get(class)
                .cloned()
                .unwrap_or_else(|| format!("class_{}", class)),
            bbox: BoundingBox {
                x1: x1.clamp(0.0, width),
                y1: y1.clamp(0.0, height),
                x2: x2.clamp(0.0, width),
                y2: y2.clamp(0.0, height),
            },
            confidence: score,
        });
    }
    Ok(detections)
}

/// Greedy per-class NMS; survivors are ordered by descending confidence.
pub fn non_max_suppression(mut boxes: Vec<Detection>, iou_thresh: f32) -> Vec<Detection> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in boxes {
        let overlaps = kept
            .iter()
            .any(|k| k.label == candidate.label && k.bbox.iou(&candidate.bbox) > iou_thresh);
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}
