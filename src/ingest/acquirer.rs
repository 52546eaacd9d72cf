use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{PipelineError, Result};
use crate::media::mimetype;
use crate::utils::layout::{write_atomically, DataLayout};

/// Source of video content.
pub trait ContentFetcher {
    /// Writes one merged audio+video container for `video_id` to `dest`.
    fn fetch(&self, video_id: &str, dest: &Path) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    Downloaded(PathBuf),
    AlreadyPresent(PathBuf),
}

/// Puts `videos/{id}.mp4` on disk at most once.
///
/// The existence check and the write are not atomic with each other, so two
/// acquirers must not work on the same id at the same time.
pub struct VideoAcquirer<F> {
    fetcher: F,
    layout: DataLayout,
}

impl<F: ContentFetcher> VideoAcquirer<F> {
    pub fn new(fetcher: F, layout: DataLayout) -> Self {
        Self { fetcher, layout }
    }

    pub fn ensure_downloaded(&self, video_id: &str) -> Result<Acquisition> {
        let dest = self.layout.video_path(video_id);
        if dest.exists() {
            info!("Already downloaded: {:?}", dest);
            return Ok(Acquisition::AlreadyPresent(dest));
        }

        write_atomically(&dest, |tmp| {
            self.fetcher.fetch(video_id, tmp)?;
            verify_container(video_id, tmp)
        })?;

        info!("Download complete: {:?}", dest);
        Ok(Acquisition::Downloaded(dest))
    }
}

fn verify_container(video_id: &str, path: &Path) -> Result<()> {
    let failure = |message: String| PipelineError::Download {
        video_id: video_id.to_string(),
        message,
    };

    let len = fs::metadata(path)
        .map_err(|e| failure(format!("fetch produced no file: {}", e)))?
        .len();
    if len == 0 {
        return Err(failure("fetch produced an empty file".into()));
    }
    if !mimetype::is_video(path)? {
        let found = mimetype::detect_mimetype(path)?;
        return Err(failure(format!("fetched content is {}, not a video", found)));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    /// Minimal ISO-BMFF header, enough for MIME sniffing to call it mp4.
    pub const MP4_BYTES: &[u8] = b"\x00\x00\x00\x20ftypisom\x00\x00\x02\x00isomiso2avc1mp41\x00\x00\x00\x08free";

    #[derive(Default)]
    pub struct FakeFetcher {
        pub failing: HashSet<String>,
        pub not_video: HashSet<String>,
        pub calls: RefCell<Vec<String>>,
    }

    impl FakeFetcher {
        pub fn failing_on(ids: &[&str]) -> Self {
            Self {
                failing: ids.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    impl ContentFetcher for FakeFetcher {
        fn fetch(&self, video_id: &str, dest: &Path) -> Result<()> {
            self.calls.borrow_mut().push(video_id.to_string());
            if self.failing.contains(video_id) {
                return Err(PipelineError::Download {
                    video_id: video_id.to_string(),
                    message: "video unavailable".into(),
                });
            }
            let bytes: &[u8] = if self.not_video.contains(video_id) {
                b"<html>sign in to confirm your age</html>"
            } else {
                MP4_BYTES
            };
            fs::write(dest, bytes).map_err(|e| PipelineError::io(dest, e))
        }
    }
}
