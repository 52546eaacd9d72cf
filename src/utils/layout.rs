use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Canonical on-disk layout of the dataset. Every derived artifact is
/// addressed only by these naming rules.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.root.join("videos")
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.root.join("frames")
    }

    pub fn detections_dir(&self) -> PathBuf {
        self.root.join("detections")
    }

    pub fn captions_dir(&self) -> PathBuf {
        self.root.join("captions")
    }

    pub fn faces_dir(&self) -> PathBuf {
        self.root.join("cropped_faces")
    }

    pub fn video_path(&self, video_id: &str) -> PathBuf {
        self.videos_dir().join(format!("{}.mp4", video_id))
    }

    pub fn frame_path(&self, video_id: &str, raw_counter: u64) -> PathBuf {
        self.frames_dir().join(frame_file_name(video_id, raw_counter))
    }

    pub fn detection_path(&self, frame_file: &str) -> PathBuf {
        self.detections_dir().join(frame_file)
    }

    pub fn caption_path(&self, frame_file: &str) -> PathBuf {
        self.captions_dir().join(format!("{}.txt", frame_file))
    }

    pub fn face_path(&self, source_file: &str) -> PathBuf {
        self.faces_dir().join(format!("face_{}", source_file))
    }
}

pub fn frame_file_name(video_id: &str, raw_counter: u64) -> String {
    format!("{}_frame_{:04}.jpg", video_id, raw_counter)
}

/// File name component of `path`, as UTF-8.
pub fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            PipelineError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
            )
        })
}

/// Temporary sibling used while an artifact is being written. Keeps the
/// original extension last so encoders can still infer the format.
pub fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".partial.{}", name))
}

/// Runs `write` against a temporary sibling of `dest` and renames it into
/// place, so an interrupted write never leaves a truncated artifact behind.
pub fn write_atomically<F>(dest: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    let tmp = partial_path(dest);
    if let Err(e) = write(&tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, dest).map_err(|e| PipelineError::io(dest, e))
}
