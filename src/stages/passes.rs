//! One function per batch pass. Each enumerates its work up front, then hands
//! the ordered list to the `BatchRunner`.

use std::path::{Path, PathBuf};

use crate::annotate::engine::{AnnotationEngine, DetectionRenderer};
use crate::annotate::faces::FaceCropExtractor;
use crate::database::repo::VideoCatalog;
use crate::error::Result;
use crate::ingest::acquirer::{Acquisition, ContentFetcher, VideoAcquirer};
use crate::ingest::scanner::{self, VideoFile};
use crate::media::sampler::{FrameDecoder, FrameSampler};
use crate::ml::captioner::Captioner;
use crate::ml::detector::ObjectDetector;
use crate::stages::runner::{BatchOutcome, BatchRunner, ItemStatus};
use crate::utils::layout::DataLayout;

fn path_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Downloads every catalogued video that is not on disk yet.
pub fn download_pass<F: ContentFetcher>(
    runner: &BatchRunner,
    catalog: &VideoCatalog,
    acquirer: &VideoAcquirer<F>,
) -> Result<BatchOutcome> {
    let ids = catalog.all_ids()?;
    runner.run("download", &ids, |id| id.clone(), |id| {
        Ok(match acquirer.ensure_downloaded(id)? {
            Acquisition::Downloaded(_) => ItemStatus::Done,
            Acquisition::AlreadyPresent(_) => ItemStatus::Skipped,
        })
    })
}

/// Samples downloaded videos. Unless `resample` is set, videos that already
/// have their first frame on disk are not enumerated.
pub fn sample_pass<D: FrameDecoder>(
    runner: &BatchRunner,
    layout: &DataLayout,
    sampler: &FrameSampler<D>,
    resample: bool,
) -> Result<BatchOutcome> {
    let videos = scanner::pending_videos(layout, !resample)?;
    runner.run("sample", &videos, |v: &VideoFile| v.video_id.clone(), |v| {
        sampler.extract_frames(&v.path, &v.video_id)?;
        Ok(ItemStatus::Done)
    })
}

pub fn annotate_pass<D: ObjectDetector, C: Captioner>(
    runner: &BatchRunner,
    layout: &DataLayout,
    engine: &AnnotationEngine<D, C>,
) -> Result<BatchOutcome> {
    let frames = scanner::pending_frames(layout)?;
    runner.run("annotate", &frames, |p: &PathBuf| path_label(p), |frame| {
        engine.annotate(frame)?;
        Ok(ItemStatus::Done)
    })
}

pub fn detect_pass<D: ObjectDetector>(
    runner: &BatchRunner,
    layout: &DataLayout,
    renderer: &DetectionRenderer<D>,
) -> Result<BatchOutcome> {
    let frames = scanner::pending_frames(layout)?;
    runner.run("detect", &frames, |p: &PathBuf| path_label(p), |frame| {
        renderer.render(frame)?;
        Ok(ItemStatus::Done)
    })
}

/// Crops faces from every `.jpg`/`.png` in `input_dir`. Images without a
/// usable face count as skipped.
pub fn crop_pass<D: ObjectDetector>(
    runner: &BatchRunner,
    input_dir: &Path,
    extractor: &FaceCropExtractor<D>,
) -> Result<BatchOutcome> {
    let images = scanner::pending_images(input_dir)?;
    runner.run("crop-faces", &images, |p: &PathBuf| path_label(p), |image| {
        let report = extractor.crop_faces(image)?;
        Ok(if report.crops_written > 0 {
            ItemStatus::Done
        } else {
            ItemStatus::Skipped
        })
    })
}
