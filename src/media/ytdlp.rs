use std::path::Path;
use std::process::Command;

use crate::error::{PipelineError, Result};
use crate::ingest::acquirer::ContentFetcher;

/// Fetches videos with the `yt-dlp` command line tool.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    program: String,
    watch_url_prefix: String,
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            watch_url_prefix: "https://www.youtube.com/watch?v=".to_string(),
        }
    }
}

impl YtDlpFetcher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    fn args(&self, video_id: &str, dest: &Path) -> Vec<String> {
        // Best video and best audio merged into one mp4, falling back to the
        // best pre-merged format.
        vec![
            "--quiet".to_string(),
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            "-f".to_string(),
            "bestvideo+bestaudio/best".to_string(),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "-o".to_string(),
            dest.display().to_string(),
            format!("{}{}", self.watch_url_prefix, video_id),
        ]
    }
}

impl ContentFetcher for YtDlpFetcher {
    fn fetch(&self, video_id: &str, dest: &Path) -> Result<()> {
        let output = Command::new(&self.program)
            .args(self.args(video_id, dest))
            .output()
            .map_err(|e| PipelineError::Download {
                video_id: video_id.to_string(),
                message: format!("failed to execute {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            return Err(PipelineError::Download {
                video_id: video_id.to_string(),
                message: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_merged_mp4_command() {
        let fetcher = YtDlpFetcher::default();
        let args = fetcher.args("abc123", Path::new("/data/videos/.partial.abc123.mp4"));
        assert!(args.windows(2).any(|w| w == ["-f", "bestvideo+bestaudio/best"]));
        assert!(args.windows(2).any(|w| w == ["--merge-output-format", "mp4"]));
        assert!(args.windows(2).any(|w| w == ["-o", "/data/videos/.partial.abc123.mp4"]));
        assert_eq!(args.last().unwrap(), "https://www.youtube.com/watch?v=abc123");
    }

    #[test]
    fn missing_program_is_download_error() {
        let fetcher = YtDlpFetcher::new("definitely-not-a-real-yt-dlp-binary");
        let err = fetcher.fetch("abc", Path::new("/tmp/never.mp4")).unwrap_err();
        assert!(matches!(err, PipelineError::Download { .. }));
        assert!(!err.is_fatal());
    }
}
