use std::ffi::OsString;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use image::RgbImage;
use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::media::sampler::{FrameDecoder, FrameSource};

/// Stream properties needed to read raw frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

pub fn probe(input_path: &Path) -> Result<StreamInfo> {
    // ffprobe -v error -select_streams v:0 -show_entries stream=... -of json input
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height,r_frame_rate,avg_frame_rate")
        .arg("-of")
        .arg("json")
        .arg(input_path)
        .output()
        .map_err(|e| decode_error(input_path, format!("failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        return Err(decode_error(
            input_path,
            format!("ffprobe failed: {}", String::from_utf8_lossy(&output.stderr).trim()),
        ));
    }

    parse_probe(input_path, &output.stdout)
}

fn parse_probe(input_path: &Path, json: &[u8]) -> Result<StreamInfo> {
    let parsed: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| decode_error(input_path, format!("unreadable ffprobe output: {}", e)))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| decode_error(input_path, "no video stream"))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(decode_error(input_path, "video stream has no dimensions")),
    };

    let frame_rate = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .ok_or_else(|| decode_error(input_path, "video stream has no frame rate"))?;

    Ok(StreamInfo {
        width,
        height,
        frame_rate,
    })
}

/// Parses ffprobe rates such as `30000/1001` or `25`.
fn parse_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// `-noautorotate` keeps frames in stored orientation so they match the
/// width and height reported by ffprobe. `passthrough` emits one frame per
/// decoded frame, so the raw counter follows decode order.
fn decode_args(input_path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-v", "error", "-noautorotate", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(input_path.as_os_str().to_os_string());
    args.extend(
        ["-map", "0:v:0", "-vsync", "passthrough", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"]
            .iter()
            .map(OsString::from),
    );
    args
}

fn decode_error(path: &Path, message: impl Into<String>) -> PipelineError {
    PipelineError::Decode {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// Decodes videos by piping raw `rgb24` frames out of an ffmpeg child.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegDecoder;

impl FrameDecoder for FfmpegDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        let info = probe(path)?;
        Ok(Box::new(FfmpegFrameSource::spawn(path, info)?))
    }
}

pub struct FfmpegFrameSource {
    path: PathBuf,
    info: StreamInfo,
    child: Child,
    stdout: Option<ChildStdout>,
    frame_len: usize,
}

impl FfmpegFrameSource {
    pub fn spawn(input_path: &Path, info: StreamInfo) -> Result<Self> {
        let mut child = Command::new("ffmpeg")
            .args(decode_args(input_path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| decode_error(input_path, format!("failed to spawn ffmpeg: {}", e)))?;

        let stdout = child.stdout.take();
        if stdout.is_none() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(decode_error(input_path, "failed to open ffmpeg stdout"));
        }

        Ok(Self {
            path: input_path.to_path_buf(),
            info,
            child,
            stdout,
            frame_len: info.width as usize * info.height as usize * 3,
        })
    }

    /// Called once the pipe is drained; a non-zero exit means the stream was
    /// cut short.
    fn finish(&mut self) -> Result<()> {
        self.stdout = None;
        let status = self
            .child
            .wait()
            .map_err(|e| decode_error(&self.path, format!("failed to wait on ffmpeg: {}", e)))?;
        if !status.success() {
            return Err(decode_error(&self.path, "ffmpeg exited with non-zero status"));
        }
        Ok(())
    }
}

impl FrameSource for FfmpegFrameSource {
    fn frame_rate(&self) -> f64 {
        self.info.frame_rate
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut buffer = vec![0u8; self.frame_len];
        let filled = read_full(stdout, &mut buffer)
            .map_err(|e| decode_error(&self.path, format!("failed to read ffmpeg output: {}", e)))?;

        if filled == 0 {
            self.finish()?;
            return Ok(None);
        }
        if filled < self.frame_len {
            let _ = self.finish();
            return Err(decode_error(&self.path, "stream ended inside a frame"));
        }

        RgbImage::from_raw(self.info.width, self.info.height, buffer)
            .map(Some)
            .ok_or_else(|| decode_error(&self.path, "frame buffer does not match dimensions"))
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        if self.stdout.take().is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Reads until `buf` is full or EOF; returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
