use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::error::{PipelineError, Result};
use crate::utils::layout::DataLayout;

/// A downloaded video waiting to be sampled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFile {
    pub video_id: String,
    pub path: PathBuf,
}

/// Lists `*.mp4` files directly under `videos/`, sorted by name. The video id
/// is the file stem. With `skip_sampled`, videos whose first frame already
/// exists are left out.
pub fn pending_videos(layout: &DataLayout, skip_sampled: bool) -> Result<Vec<VideoFile>> {
    let mut videos = Vec::new();
    for path in list_files(&layout.videos_dir(), &["mp4"])? {
        let Some(video_id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if skip_sampled && layout.frame_path(video_id, 0).exists() {
            continue;
        }
        videos.push(VideoFile {
            video_id: video_id.to_string(),
            path: path.clone(),
        });
    }
    Ok(videos)
}

/// Lists frame images under `frames/`.
pub fn pending_frames(layout: &DataLayout) -> Result<Vec<PathBuf>> {
    list_files(&layout.frames_dir(), &["jpg"])
}

/// Lists `.jpg`/`.png` images in an arbitrary input directory.
pub fn pending_images(dir: &Path) -> Result<Vec<PathBuf>> {
    list_files(dir, &["jpg", "png"])
}

/// Non-hidden regular files directly inside `dir` whose extension is one of
/// `extensions`, sorted by file name. A missing directory yields no work.
pub fn list_files(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
            PipelineError::io(path, e.into())
        })?;
        // Hidden files include in-flight `.partial.*` artifacts.
        if is_hidden(&entry) || !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| extensions.contains(&ext))
            .unwrap_or(false);
        if matches {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name()
         .to_str()
         .map(|s| s.starts_with('.'))
         .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn lists_videos_sorted_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        touch(&layout.video_path("zeta"));
        touch(&layout.video_path("alpha"));
        touch(&layout.videos_dir().join(".partial.beta.mp4"));
        touch(&layout.videos_dir().join("notes.txt"));

        let videos = pending_videos(&layout, false).unwrap();
        let ids: Vec<&str> = videos.iter().map(|v| v.video_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert_eq!(videos[0].path, layout.video_path("alpha"));
    }

    #[test]
    fn sampled_videos_can_be_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        touch(&layout.video_path("done"));
        touch(&layout.video_path("todo"));
        touch(&layout.frame_path("done", 0));

        let ids: Vec<String> = pending_videos(&layout, true)
            .unwrap()
            .into_iter()
            .map(|v| v.video_id)
            .collect();
        assert_eq!(ids, vec!["todo"]);
        assert_eq!(pending_videos(&layout, false).unwrap().len(), 2);
    }

    #[test]
    fn images_accept_jpg_and_png() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.jpg", "c.gif", "d.jpeg"] {
            touch(&dir.path().join(name));
        }
        let names: Vec<String> = pending_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.png"]);
    }

    #[test]
    fn missing_directory_means_no_work() {
        let layout = DataLayout::new("/no/such/root");
        assert!(pending_frames(&layout).unwrap().is_empty());
    }
}
