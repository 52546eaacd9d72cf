use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use tracing::info;

use crate::annotate::overlay::{draw_detections, OverlayStyle};
use crate::error::{PipelineError, Result};
use crate::ml::captioner::Captioner;
use crate::ml::detector::{Detection, ObjectDetector};
use crate::utils::layout::{file_name_of, write_atomically, DataLayout};

/// Result of annotating one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub detections: Vec<Detection>,
    pub caption: String,
    pub composite: String,
    pub overlay_path: PathBuf,
    pub caption_path: PathBuf,
}

/// Composite annotation text: detected labels followed by the caption.
pub fn compose_annotation(labels: &[&str], caption: &str) -> String {
    format!("Detected objects: {}. Description: {}", labels.join(", "), caption)
}

/// Detector plus captioner over single frames. Both models are required; the
/// engine cannot be built without them.
pub struct AnnotationEngine<D, C> {
    detector: D,
    captioner: C,
    layout: DataLayout,
    style: OverlayStyle,
}

impl<D: ObjectDetector, C: Captioner> AnnotationEngine<D, C> {
    pub fn new(detector: D, captioner: C, layout: DataLayout) -> Self {
        Self {
            detector,
            captioner,
            layout,
            style: OverlayStyle::boxes_only(),
        }
    }

    pub fn with_overlay_style(mut self, style: OverlayStyle) -> Self {
        self.style = style;
        self
    }

    /// Writes `detections/{frame}` and `captions/{frame}.txt`, replacing any
    /// previous annotation of the same frame.
    pub fn annotate(&self, frame_path: &Path) -> Result<Annotation> {
        let frame_file = file_name_of(frame_path)?;
        let image = open_image(frame_path)?;

        let detections = self.detector.detect(&image)?;
        let caption = self.captioner.caption(&image)?;
        let labels: Vec<&str> = detections.iter().map(|d| d.label.as_str()).collect();
        let composite = compose_annotation(&labels, &caption);

        let overlay_path = self.layout.detection_path(&frame_file);
        save_overlay(&image, &detections, &self.style, &overlay_path)?;

        let caption_path = self.layout.caption_path(&frame_file);
        write_atomically(&caption_path, |tmp| {
            fs::write(tmp, composite.as_bytes()).map_err(|e| PipelineError::io(tmp, e))
        })?;

        info!("Annotated {} -> {}", frame_file, composite);
        Ok(Annotation {
            detections,
            caption,
            composite,
            overlay_path,
            caption_path,
        })
    }
}

/// Detection-only pass: overlays without captions.
pub struct DetectionRenderer<D> {
    detector: D,
    layout: DataLayout,
    style: OverlayStyle,
}

impl<D: ObjectDetector> DetectionRenderer<D> {
    pub fn new(detector: D, layout: DataLayout) -> Self {
        Self {
            detector,
            layout,
            style: OverlayStyle::boxes_only(),
        }
    }

    pub fn with_overlay_style(mut self, style: OverlayStyle) -> Self {
        self.style = style;
        self
    }

    pub fn render(&self, frame_path: &Path) -> Result<Vec<Detection>> {
        let frame_file = file_name_of(frame_path)?;
        let image = open_image(frame_path)?;
        let detections = self.detector.detect(&image)?;

        let overlay_path = self.layout.detection_path(&frame_file);
        save_overlay(&image, &detections, &self.style, &overlay_path)?;
        info!("Detected {} objects in {}", detections.len(), frame_file);
        Ok(detections)
    }
}

pub(crate) fn open_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|e| PipelineError::image(path, e))
}

/// Output format follows the destination extension, JPEG when unknown.
pub(crate) fn format_for(path: &Path) -> ImageFormat {
    ImageFormat::from_path(path).unwrap_or(ImageFormat::Jpeg)
}

fn save_overlay(image: &DynamicImage, detections: &[Detection], style: &OverlayStyle, dest: &Path) -> Result<()> {
    let overlay = draw_detections(image, detections, style);
    let format = format_for(dest);
    write_atomically(dest, |tmp| {
        overlay
            .save_with_format(tmp, format)
            .map_err(|e| PipelineError::image(tmp, e))
    })
}
