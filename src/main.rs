use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use clipset::annotate::engine::{AnnotationEngine, DetectionRenderer};
use clipset::annotate::faces::FaceCropExtractor;
use clipset::annotate::overlay::OverlayStyle;
use clipset::catalog::statistics::StatisticsRefresher;
use clipset::catalog::sync::MetadataSyncService;
use clipset::catalog::youtube::YouTubeClient;
use clipset::database::repo::VideoCatalog;
use clipset::ingest::acquirer::VideoAcquirer;
use clipset::media::ffmpeg::FfmpegDecoder;
use clipset::media::sampler::FrameSampler;
use clipset::media::ytdlp::YtDlpFetcher;
use clipset::ml::captioner::OnnxCaptioner;
use clipset::ml::detector::YoloDetector;
use clipset::ml::labels::{COCO_LABELS, FACE_LABELS};
use clipset::stages::passes;
use clipset::stages::runner::{BatchRunner, CancelFlag};
use clipset::utils::config::{self, ModelKind, ModelLocator, Settings};
use clipset::utils::layout::DataLayout;
use clipset::PipelineError;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file holding YOUTUBE_API_KEY and pipeline settings
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Root under which videos/, frames/, detections/, captions/ and cropped_faces/ live
    #[arg(short = 'r', long, default_value = ".")]
    data_root: PathBuf,

    #[arg(short, long, default_value = "catalog.db")]
    db_path: String,

    /// Hide progress bars
    #[arg(long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search for videos and store them in the catalog
    Sync {
        /// Defaults to the configured seed query
        #[arg(short, long)]
        query: Option<String>,
        #[arg(short, long)]
        max_results: Option<u32>,
    },
    /// Refresh view/like/comment counters of catalogued videos
    Refresh,
    /// Download every catalogued video not yet on disk
    Download,
    /// Sample one frame per second from downloaded videos
    Sample {
        /// Also resample videos that already have frames
        #[arg(long)]
        resample: bool,
    },
    /// Detect objects and caption every frame
    Annotate,
    /// Detect objects in every frame without captioning
    Detect,
    /// Crop faces out of images
    CropFaces {
        /// Defaults to the frames directory
        #[arg(short, long)]
        input_dir: Option<PathBuf>,
    },
    /// refresh, download, sample, annotate and crop-faces in sequence
    Run {
        #[arg(long)]
        resample: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    // Missing credentials stop everything before any stage runs.
    let settings = config::load_settings(&args.config)?;

    info!("Dataset pipeline starting...");
    info!("Data root: {:?}", args.data_root);
    info!("DB: {}", args.db_path);

    let layout = DataLayout::new(&args.data_root);
    let catalog = VideoCatalog::open(&args.db_path).context("Failed to open catalog")?;
    let runner = BatchRunner::new(CancelFlag::new()).with_progress(!args.quiet);
    runner.cancel_flag().cancel_on_interrupt()?;
    let locator = ModelLocator::new(args.data_root.join(".env"), std::env::current_dir()?);

    match args.command {
        Command::Sync { query, max_results } => {
            let seed = settings.seed.clone();
            let query = query
                .or_else(|| seed.as_ref().map(|s| s.query.clone()))
                .ok_or_else(|| PipelineError::Configuration("no --query given and no seed_query configured".into()))?;
            let max_results = max_results
                .or_else(|| seed.as_ref().map(|s| s.max_results))
                .unwrap_or(30);
            let sync = MetadataSyncService::new(youtube_client(&settings)?);
            sync.sync(&catalog, &query, max_results)?;
        }
        Command::Refresh => refresh(&settings, &catalog)?,
        Command::Download => {
            let acquirer = VideoAcquirer::new(YtDlpFetcher::default(), layout.clone());
            passes::download_pass(&runner, &catalog, &acquirer)?;
        }
        Command::Sample { resample } => {
            let sampler = FrameSampler::new(FfmpegDecoder, layout.clone());
            passes::sample_pass(&runner, &layout, &sampler, resample)?;
        }
        Command::Annotate => {
            let engine = AnnotationEngine::new(
                load_detector(&locator)?,
                load_captioner(&locator, &settings)?,
                layout.clone(),
            )
            .with_overlay_style(overlay_style(&settings));
            passes::annotate_pass(&runner, &layout, &engine)?;
        }
        Command::Detect => {
            let renderer = DetectionRenderer::new(load_detector(&locator)?, layout.clone())
                .with_overlay_style(overlay_style(&settings));
            passes::detect_pass(&runner, &layout, &renderer)?;
        }
        Command::CropFaces { input_dir } => {
            let input_dir = input_dir.unwrap_or_else(|| layout.frames_dir());
            let extractor = FaceCropExtractor::new(load_face_detector(&locator, &settings)?, layout.clone());
            passes::crop_pass(&runner, &input_dir, &extractor)?;
        }
        Command::Run { resample } => {
            // Models first, so a missing one fails before any network work.
            let engine = AnnotationEngine::new(
                load_detector(&locator)?,
                load_captioner(&locator, &settings)?,
                layout.clone(),
            )
            .with_overlay_style(overlay_style(&settings));
            let extractor = FaceCropExtractor::new(load_face_detector(&locator, &settings)?, layout.clone());

            if let Err(e) = refresh(&settings, &catalog) {
                warn!("Statistics refresh failed, continuing with stored catalog: {:#}", e);
            }

            let acquirer = VideoAcquirer::new(YtDlpFetcher::default(), layout.clone());
            passes::download_pass(&runner, &catalog, &acquirer)?;

            let sampler = FrameSampler::new(FfmpegDecoder, layout.clone());
            passes::sample_pass(&runner, &layout, &sampler, resample)?;

            passes::annotate_pass(&runner, &layout, &engine)?;
            passes::crop_pass(&runner, &layout.frames_dir(), &extractor)?;
        }
    }

    info!("Pipeline completed.");
    Ok(())
}

fn youtube_client(settings: &Settings) -> Result<YouTubeClient> {
    Ok(YouTubeClient::new(&settings.api_base_url, &settings.api_key)?)
}

fn refresh(settings: &Settings, catalog: &VideoCatalog) -> Result<()> {
    let sync = MetadataSyncService::new(youtube_client(settings)?);
    let refresher = StatisticsRefresher::new(sync, settings.seed.clone())
        .with_batch_size(settings.stats_batch_size);
    let summary = refresher.refresh(catalog)?;
    info!(
        "Refresh: {} batches ({} failed), {} updated, {} missing, {} failed",
        summary.batches, summary.failed_batches, summary.updated, summary.missing, summary.failed
    );
    Ok(())
}

fn overlay_style(settings: &Settings) -> OverlayStyle {
    let Some(path) = &settings.overlay_font else {
        return OverlayStyle::boxes_only();
    };
    OverlayStyle::with_font_file(path).unwrap_or_else(|e| {
        warn!("Overlay labels without text: {}", e);
        OverlayStyle::boxes_only()
    })
}

fn load_detector(locator: &ModelLocator) -> Result<YoloDetector> {
    let path = locator.locate(ModelKind::Detector)?;
    Ok(YoloDetector::load(&path, &COCO_LABELS)?)
}

fn load_face_detector(locator: &ModelLocator, settings: &Settings) -> Result<YoloDetector> {
    let path = locator.locate_or_download(ModelKind::Face, settings.face_model_url.as_deref())?;
    Ok(YoloDetector::load(&path, &FACE_LABELS)?)
}

fn load_captioner(locator: &ModelLocator, settings: &Settings) -> Result<OnnxCaptioner> {
    let encoder = locator.locate(ModelKind::CaptionEncoder)?;
    let decoder = locator.locate(ModelKind::CaptionDecoder)?;
    let vocab = locator.locate(ModelKind::CaptionVocab)?;
    Ok(OnnxCaptioner::load(&encoder, &decoder, &vocab, settings.caption.clone())?)
}
