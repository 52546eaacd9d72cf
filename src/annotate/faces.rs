use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::annotate::engine::{format_for, open_image};
use crate::error::{PipelineError, Result};
use crate::ml::detector::ObjectDetector;
use crate::utils::layout::{file_name_of, write_atomically, DataLayout};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceCropReport {
    pub detections: usize,
    pub crops_written: usize,
    /// `cropped_faces/face_{filename}` if at least one crop was written.
    pub output: Option<PathBuf>,
}

/// Crops every detected face out of an image.
///
/// All crops of one source image share the output name
/// `face_{filename}`, so with several faces the last one written wins.
pub struct FaceCropExtractor<D> {
    detector: D,
    layout: DataLayout,
}

impl<D: ObjectDetector> FaceCropExtractor<D> {
    pub fn new(detector: D, layout: DataLayout) -> Self {
        Self { detector, layout }
    }

    pub fn crop_faces(&self, image_path: &Path) -> Result<FaceCropReport> {
        let file_name = file_name_of(image_path)?;
        let image = open_image(image_path)?;
        let detections = self.detector.detect(&image)?;

        let dest = self.layout.face_path(&file_name);
        let format = format_for(&dest);
        let mut report = FaceCropReport {
            detections: detections.len(),
            crops_written: 0,
            output: None,
        };

        for detection in &detections {
            let Some((x, y, w, h)) = detection.bbox.pixel_rect(image.width(), image.height()) else {
                debug!("Skipping empty face box in {}", file_name);
                continue;
            };
            let face = image.crop_imm(x, y, w, h).to_rgb8();
            write_atomically(&dest, |tmp| {
                face.save_with_format(tmp, format)
                    .map_err(|e| PipelineError::image(tmp, e))
            })?;
            report.crops_written += 1;
            info!("Saved face crop: {:?}", dest);
        }

        if report.crops_written > 0 {
            report.output = Some(dest);
        }
        Ok(report)
    }
}
