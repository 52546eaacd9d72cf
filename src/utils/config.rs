use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use anyhow::{Result, Context, anyhow};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::PipelineError;

pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Runtime settings read from `config.json`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub api_base_url: String,
    pub seed: Option<SeedQuery>,
    pub stats_batch_size: usize,
    pub caption: CaptionSettings,
    pub face_model_url: Option<String>,
    /// Font for the class/confidence tags on overlays; boxes only when unset.
    pub overlay_font: Option<PathBuf>,
}

/// Fallback search used to populate an empty catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedQuery {
    pub query: String,
    pub max_results: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptionSettings {
    pub bos_token_id: i64,
    pub eos_token_id: i64,
    pub max_tokens: usize,
}

impl Default for CaptionSettings {
    fn default() -> Self {
        // BLIP text decoder: [DEC] starts generation, [SEP] ends it.
        Self {
            bos_token_id: 30522,
            eos_token_id: 102,
            max_tokens: 50,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(rename = "YOUTUBE_API_KEY")]
    api_key: Option<String>,
    #[serde(default = "default_base_url")]
    api_base_url: String,
    seed_query: Option<String>,
    #[serde(default = "default_seed_max_results")]
    seed_max_results: u32,
    #[serde(default = "default_stats_batch_size")]
    stats_batch_size: usize,
    #[serde(default)]
    caption: CaptionSettings,
    face_model_url: Option<String>,
    overlay_font: Option<PathBuf>,
}

fn default_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_seed_max_results() -> u32 {
    30
}

fn default_stats_batch_size() -> usize {
    50
}

/// Loads `config.json`. A missing file or a missing/blank API key is a
/// configuration error and must stop the run before any stage starts.
pub fn load_settings(path: &Path) -> Result<Settings, PipelineError> {
    let text = fs::read_to_string(path).map_err(|e| {
        PipelineError::Configuration(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_settings(&text)
}

fn parse_settings(text: &str) -> Result<Settings, PipelineError> {
    let raw: RawSettings = serde_json::from_str(text)
        .map_err(|e| PipelineError::Configuration(format!("invalid config: {}", e)))?;

    let api_key = raw
        .api_key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| PipelineError::Configuration("YOUTUBE_API_KEY is not set".into()))?;

    let seed = raw
        .seed_query
        .filter(|q| !q.trim().is_empty())
        .map(|query| SeedQuery {
            query,
            max_results: raw.seed_max_results,
        });

    Ok(Settings {
        api_key,
        api_base_url: raw.api_base_url,
        seed,
        stats_batch_size: raw.stats_batch_size,
        caption: raw.caption,
        face_model_url: raw.face_model_url,
        overlay_font: raw.overlay_font,
    })
}

/// The ONNX artifacts the annotation passes can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Detector,
    Face,
    CaptionEncoder,
    CaptionDecoder,
    CaptionVocab,
}

impl ModelKind {
    pub fn env_key(self) -> &'static str {
        match self {
            ModelKind::Detector => "DETECTOR_MODEL_PATH",
            ModelKind::Face => "FACE_MODEL_PATH",
            ModelKind::CaptionEncoder => "CAPTION_ENCODER_PATH",
            ModelKind::CaptionDecoder => "CAPTION_DECODER_PATH",
            ModelKind::CaptionVocab => "CAPTION_VOCAB_PATH",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            ModelKind::Detector => "yolov8n.onnx",
            ModelKind::Face => "yolov8n-face.onnx",
            ModelKind::CaptionEncoder => "caption_encoder.onnx",
            ModelKind::CaptionDecoder => "caption_decoder.onnx",
            ModelKind::CaptionVocab => "vocab.txt",
        }
    }
}

/// Resolves model files: `.env` first, then a filesystem search, caching
/// whatever was found back into `.env`.
pub struct ModelLocator {
    env_path: PathBuf,
    search_root: PathBuf,
    max_depth: usize,
}

impl ModelLocator {
    pub fn new(env_path: impl Into<PathBuf>, search_root: impl Into<PathBuf>) -> Self {
        Self {
            env_path: env_path.into(),
            search_root: search_root.into(),
            max_depth: 5,
        }
    }

    pub fn locate(&self, kind: ModelKind) -> Result<PathBuf, PipelineError> {
        self.try_locate(kind).map_err(|e| PipelineError::ModelLoad {
            path: PathBuf::from(kind.file_name()),
            message: format!("{:#}", e),
        })
    }

    /// Like `locate`, but fetches the file from `url` into `models/` when it
    /// cannot be found locally.
    pub fn locate_or_download(&self, kind: ModelKind, url: Option<&str>) -> Result<PathBuf, PipelineError> {
        if let Ok(path) = self.try_locate(kind) {
            return Ok(path);
        }
        let url = match url {
            Some(u) => u,
            None => return self.locate(kind),
        };

        let dest = self.search_root.join("models").join(kind.file_name());
        info!("{} not found locally, downloading from {}", kind.file_name(), url);
        download_file(url, &dest).map_err(|e| PipelineError::ModelLoad {
            path: dest.clone(),
            message: format!("{:#}", e),
        })?;

        if let Err(e) = self.remember(kind, &dest) {
            warn!("Could not record {} in .env: {:#}", kind.env_key(), e);
        }
        Ok(dest)
    }

    fn try_locate(&self, kind: ModelKind) -> Result<PathBuf> {
        if self.env_path.exists() {
            let entries = load_from_env(&self.env_path)?;
            if let Some(path) = entries.get(kind.env_key()).map(PathBuf::from) {
                if path.exists() {
                    info!("Loaded {} from .env", kind.env_key());
                    return Ok(path);
                }
                warn!("{} in .env points at missing file {:?}", kind.env_key(), path);
            }
        }

        info!("{} not found in .env, searching filesystem...", kind.file_name());
        let found = find_file(&self.search_root, kind.file_name(), self.max_depth)?;
        info!("Found {}: {:?}", kind.file_name(), found);

        self.remember(kind, &found)?;
        Ok(found)
    }

    fn remember(&self, kind: ModelKind, path: &Path) -> Result<()> {
        let mut entries = if self.env_path.exists() {
            load_from_env(&self.env_path)?
        } else {
            BTreeMap::new()
        };
        entries.insert(kind.env_key().to_string(), path.display().to_string());
        save_to_env(&self.env_path, &entries)
    }
}

fn find_file(root: &Path, filename: &str, max_depth: usize) -> Result<PathBuf> {
    let search = |dir: &Path| {
        WalkDir::new(dir)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name() == filename)
            .map(|e| e.path().to_path_buf())
    };

    if let Some(path) = search(root) {
        return Ok(path);
    }

    // Useful when running from a subdirectory of the workspace.
    if let Some(parent) = root.parent() {
        if let Some(path) = search(parent) {
            return Ok(path);
        }
    }

    Err(anyhow!("Could not find file '{}' in nearby directories.", filename))
}

fn load_from_env(path: &Path) -> Result<BTreeMap<String, String>> {
    let mut entries = BTreeMap::new();
    let iter = dotenvy::from_path_iter(path).context("Failed to open .env file")?;
    for item in iter {
        let (key, value) = item.context("Malformed line in .env file")?;
        entries.insert(key, value);
    }
    Ok(entries)
}

fn save_to_env(path: &Path, entries: &BTreeMap<String, String>) -> Result<()> {
    let mut file = File::create(path).context("Failed to create .env file")?;
    for (key, value) in entries {
        writeln!(file, "{}={}", key, value)?;
    }
    Ok(())
}

fn download_file(url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("Failed to download {}", url))?;

    let partial = dest.with_extension("part");
    let mut file = File::create(&partial).context("Failed to create model file")?;
    response.copy_to(&mut file).context("Failed to write model file")?;
    drop(file);
    fs::rename(&partial, dest).context("Failed to move model into place")?;
    Ok(())
}
