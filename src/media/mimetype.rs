use std::path::Path;

use crate::error::{PipelineError, Result};

pub fn detect_mimetype(path: &Path) -> Result<String> {
    let kind = infer::get_from_path(path).map_err(|e| PipelineError::io(path, e))?;

    match kind {
        Some(k) => Ok(k.mime_type().to_string()),
        None => Ok("application/octet-stream".to_string()),
    }
}

pub fn is_video(path: &Path) -> Result<bool> {
    Ok(detect_mimetype(path)?.starts_with("video/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    #[test]
    fn sniffs_content_not_extension() {
        let dir = tempfile::tempdir().unwrap();

        let jpg = dir.path().join("frame.jpg");
        RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]))
            .save_with_format(&jpg, ImageFormat::Jpeg)
            .unwrap();
        assert_eq!(detect_mimetype(&jpg).unwrap(), "image/jpeg");
        assert!(!is_video(&jpg).unwrap());

        let text = dir.path().join("notes.mp4");
        std::fs::write(&text, b"not really a video").unwrap();
        assert!(!is_video(&text).unwrap());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = detect_mimetype(Path::new("/no/such/file.mp4")).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
