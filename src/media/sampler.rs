use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::utils::layout::{write_atomically, DataLayout};

/// A decoded video stream yielding frames in decode order.
pub trait FrameSource {
    fn frame_rate(&self) -> f64;

    /// `Ok(None)` signals end of stream. An error means decoding broke off
    /// mid-stream and no further frames can be read.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Opens video files as frame sources.
pub trait FrameDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleReport {
    pub interval: u64,
    pub decoded: u64,
    pub saved: Vec<PathBuf>,
    /// Set when decoding failed before end of stream.
    pub truncated: bool,
}

/// Keeps one frame per (approximate) second of video.
pub struct FrameSampler<D> {
    decoder: D,
    layout: DataLayout,
}

/// Number of raw frames between two saved frames: the rounded frame rate,
/// never less than one.
pub fn sampling_interval(frame_rate: f64) -> u64 {
    if !frame_rate.is_finite() || frame_rate < 1.0 {
        return 1;
    }
    frame_rate.round() as u64
}

impl<D: FrameDecoder> FrameSampler<D> {
    pub fn new(decoder: D, layout: DataLayout) -> Self {
        Self { decoder, layout }
    }

    /// Saves `frames/{id}_frame_{counter:04}.jpg` for every raw counter that
    /// is a multiple of the sampling interval. Existing files are overwritten.
    pub fn extract_frames(&self, video_path: &Path, video_id: &str) -> Result<SampleReport> {
        let mut source = self.decoder.open(video_path)?;
        let interval = sampling_interval(source.frame_rate());

        let mut report = SampleReport {
            interval,
            decoded: 0,
            saved: Vec::new(),
            truncated: false,
        };

        let mut counter: u64 = 0;
        loop {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!("{}: decoding stopped after {} frames: {}", video_id, counter, e);
                    report.truncated = true;
                    break;
                }
            };

            if counter % interval == 0 {
                let dest = self.layout.frame_path(video_id, counter);
                write_atomically(&dest, |tmp| {
                    frame
                        .save_with_format(tmp, ImageFormat::Jpeg)
                        .map_err(|e| PipelineError::image(tmp, e))
                })?;
                report.saved.push(dest);
            }
            counter += 1;
        }
        report.decoded = counter;

        info!("{} - saved {} frames", video_id, report.saved.len());
        Ok(report)
    }
}
