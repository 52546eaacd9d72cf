//! Builds a per-subject video dataset: search and catalogue videos, keep their
//! engagement counters fresh, download them, sample one frame per second, and
//! annotate the frames with detected objects, captions and face crops.

pub mod annotate;
pub mod catalog;
pub mod database;
pub mod error;
pub mod ingest;
pub mod media;
pub mod ml;
pub mod stages;
pub mod utils;

pub use error::{PipelineError, Result};
