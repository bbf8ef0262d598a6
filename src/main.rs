//! Command-line interface for per-video feature extraction
//!
//! Analyzes one video (given, or the only one found in the videos directory),
//! writes `results/<stem>/output.json` and prints a short summary. Ctrl-C
//! stops the analyzers cleanly without writing a report.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use video_features::{
    default_workers, init_tracing, AnalysisConfig, CancelFlag, ComputeContext, Device,
    FeaturePipeline, FeatureReport, MotionConfig, ObjectConfig, ShotCutConfig, TextConfig,
};

/// Extensions picked up from the videos directory, matched case-insensitively
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "flv", "wmv", "webm"];

#[derive(Parser, Debug)]
#[command(name = "video-features", version)]
#[command(about = "Extract shot-cut, motion, text and object features from a video")]
struct Args {
    /// Video to analyze; when omitted, the videos directory is searched
    video_path: Option<PathBuf>,

    /// Shot-cut threshold, higher is less sensitive
    #[arg(long, default_value_t = 27.0)]
    threshold: f64,

    /// Minimum frames between two cuts
    #[arg(long, default_value_t = 15)]
    min_scene_len: u32,

    /// Use CUDA when available (default)
    #[arg(long, overrides_with = "no_gpu")]
    gpu: bool,

    /// Force the CPU path
    #[arg(long, overrides_with = "gpu")]
    no_gpu: bool,

    /// Analyze every Nth frame for motion
    #[arg(long, default_value_t = 5)]
    motion_sample_rate: u32,

    /// Divide frame dimensions by this before optical flow
    #[arg(long, default_value_t = 2)]
    motion_downscale: u32,

    /// Analyze every Nth frame for text
    #[arg(long, default_value_t = 2)]
    text_sample_rate: u32,

    /// Width frames are scaled to before OCR
    #[arg(long, default_value_t = 640)]
    text_downscale_width: u32,

    /// OCR worker threads [default: CPU count - 1]
    #[arg(long)]
    text_workers: Option<usize>,

    /// Minimum word confidence for OCR, 0-100
    #[arg(long, default_value_t = 60.0)]
    text_min_confidence: f32,

    /// Tesseract language
    #[arg(long, default_value = "eng")]
    ocr_lang: String,

    /// Tesseract data directory
    #[arg(long)]
    tessdata: Option<PathBuf>,

    /// Analyze every Nth frame for objects
    #[arg(long, default_value_t = 5)]
    object_sample_rate: u32,

    /// Detections must score above this, 0-1
    #[arg(long, default_value_t = 0.5)]
    object_confidence: f32,

    /// Frames per detection batch
    #[arg(long, default_value_t = 8)]
    object_batch_size: usize,

    /// Preferred ONNX detection model
    #[arg(long, default_value = "models/yolo12n.onnx")]
    object_model: PathBuf,

    /// Model tried when the preferred one fails to load
    #[arg(long, default_value = "models/yolov8n.onnx")]
    object_fallback_model: PathBuf,

    /// Detection device: auto, cpu or cuda
    #[arg(long, default_value = "auto")]
    device: Device,

    /// Where to look for videos when no path is given
    #[arg(long, default_value = "videos")]
    videos_dir: PathBuf,

    /// Root directory for reports
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn prefer_gpu(&self) -> bool {
        !self.no_gpu
    }

    fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            shot_cuts: ShotCutConfig {
                threshold: self.threshold,
                min_scene_len: self.min_scene_len,
            },
            motion: MotionConfig {
                sample_rate: self.motion_sample_rate,
                downscale: self.motion_downscale,
            },
            text: TextConfig {
                sample_rate: self.text_sample_rate,
                downscale_width: self.text_downscale_width,
                workers: self.text_workers.unwrap_or_else(default_workers),
                min_confidence: self.text_min_confidence,
                language: self.ocr_lang.clone(),
                tessdata: self.tessdata.clone(),
            },
            objects: ObjectConfig {
                sample_rate: self.object_sample_rate,
                confidence: self.object_confidence,
                batch_size: self.object_batch_size,
                model: self.object_model.clone(),
                fallback_model: Some(self.object_fallback_model.clone()),
                device: self.device,
            },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    init_tracing(log_level);
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("ERROR: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let video = match &args.video_path {
        Some(path) => path.clone(),
        None => match select_video(&args.videos_dir)? {
            Some(path) => path,
            None => return Ok(()),
        },
    };

    let config = args.analysis_config();
    config.validate()?;

    let compute = ComputeContext::detect(args.prefer_gpu());
    let cancel = CancelFlag::new();

    let worker_cancel = cancel.clone();
    let worker_video = video.clone();
    let results_dir = args.results_dir.clone();
    let mut task = tokio::task::spawn_blocking(move || {
        let mut pipeline = FeaturePipeline::new(config, &compute, worker_cancel)?;
        pipeline.run_and_save(&worker_video, &results_dir)
    });

    let outcome = tokio::select! {
        outcome = &mut task => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupt received, stopping analyzers");
            cancel.cancel();
            // The analyzers notice the flag at the next frame or batch
            task.await
        }
    };

    report_outcome(outcome.context("analysis task panicked")?, &video)
}

/// Print the summary or the interrupt notice; other failures become the CLI error
fn report_outcome(outcome: video_features::Result<(FeatureReport, PathBuf)>, video: &Path) -> Result<()> {
    match outcome {
        Ok((report, output)) => {
            print_summary(&report, &output);
            Ok(())
        }
        Err(e) if e.is_interrupted() => {
            print_interrupt();
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context(format!("analysis of {} failed", video.display()))),
    }
}

/// The single video in `videos_dir`; otherwise print what was found and return `None`
fn select_video(videos_dir: &Path) -> Result<Option<PathBuf>> {
    let videos = find_videos(videos_dir)?;

    match videos.as_slice() {
        [] => {
            println!("NO VIDEOS DETECTED in {}", videos_dir.display());
            println!("Supported formats: {}", VIDEO_EXTENSIONS.iter()
                .map(|ext| format!(".{}", ext))
                .collect::<Vec<_>>()
                .join(" "));
            Ok(None)
        }
        [only] => {
            info!("Found one video: {}", only.display());
            Ok(Some(only.clone()))
        }
        many => {
            println!("VIDEOS DETECTED in {}:", videos_dir.display());
            for (i, video) in many.iter().enumerate() {
                println!("  {}. {}", i + 1, video.display());
            }
            println!("Pass one of them as VIDEO_PATH to analyze it.");
            Ok(None)
        }
    }
}

fn find_videos(videos_dir: &Path) -> Result<Vec<PathBuf>> {
    if !videos_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut videos: Vec<PathBuf> = fs::read_dir(videos_dir)
        .with_context(|| format!("Failed to list {}", videos_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_video(path))
        .collect();
    videos.sort();
    Ok(videos)
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

fn print_summary(report: &FeatureReport, output: &Path) {
    let features = &report.features;
    println!("ANALYSIS COMPLETE: {}", report.video_file);
    println!("  CUTS DETECTED: {}", features.shot_cuts.total_cuts);
    println!("  AVG SCENE: {:.2}s", features.shot_cuts.avg_scene_length);
    println!("  DURATION: {:.2}s", features.shot_cuts.duration);
    println!("  MOTION: P90={:.2} ({}) | AVG={:.2}",
             features.motion.p90_motion, features.motion.motion_intensity, features.motion.average_motion);
    println!("  TEXT RATIO: {:.2}", features.text.text_present_ratio);
    println!("  OBJECTS: {:.2} ({} persons / {} objects)",
             features.object_dominance.person_object_ratio,
             features.object_dominance.total_persons,
             features.object_dominance.total_objects);
    println!("  OUTPUT: {}", output.display());
}

fn print_interrupt() {
    println!("INTERRUPT");
    println!("SYSTEM HALT");
}

#[cfg(test)]
mod tests {
    use super::*;
    use video_features::AnalysisError;

    #[test]
    fn test_defaults_match_library_defaults() {
        let args = Args::try_parse_from(["video-features"]).unwrap();
        let config = args.analysis_config();
        let defaults = AnalysisConfig::default();

        assert!(args.video_path.is_none());
        assert!(args.prefer_gpu());
        assert_eq!(config.shot_cuts, defaults.shot_cuts);
        assert_eq!(config.motion, defaults.motion);
        assert_eq!(config.objects, defaults.objects);
        assert_eq!(config.text.sample_rate, defaults.text.sample_rate);
        assert_eq!(config.text.language, "eng");
        assert_eq!(args.results_dir, PathBuf::from("results"));
    }

    #[test]
    fn test_flags_map_onto_config() {
        let args = Args::try_parse_from([
            "video-features", "clip.mp4",
            "--threshold", "30", "--min-scene-len", "10", "--no-gpu",
            "--text-workers", "3", "--ocr-lang", "deu",
            "--object-confidence", "0.4", "--device", "cpu",
        ]).unwrap();
        let config = args.analysis_config();

        assert_eq!(args.video_path, Some(PathBuf::from("clip.mp4")));
        assert!(!args.prefer_gpu());
        assert_eq!(config.shot_cuts.threshold, 30.0);
        assert_eq!(config.shot_cuts.min_scene_len, 10);
        assert_eq!(config.text.workers, 3);
        assert_eq!(config.text.language, "deu");
        assert_eq!(config.objects.confidence, 0.4);
        assert_eq!(config.objects.device, Device::Cpu);
    }

    #[test]
    fn test_last_gpu_flag_wins() {
        let args = Args::try_parse_from(["video-features", "--no-gpu", "--gpu"]).unwrap();
        assert!(args.prefer_gpu());
    }

    #[test]
    fn test_unknown_device_rejected() {
        assert!(Args::try_parse_from(["video-features", "--device", "tpu"]).is_err());
    }

    #[test]
    fn test_video_extensions_case_insensitive() {
        assert!(is_video(Path::new("a/clip.MP4")));
        assert!(is_video(Path::new("clip.webm")));
        assert!(!is_video(Path::new("notes.txt")));
        assert!(!is_video(Path::new("mp4")));
    }

    #[test]
    fn test_find_videos_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mkv", "a.MOV", "readme.md"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("nested.mp4")).unwrap();

        let videos = find_videos(dir.path()).unwrap();
        let names: Vec<_> = videos.iter().map(|p| p.file_name().unwrap().to_owned()).collect();
        assert_eq!(names, vec!["a.MOV", "b.mkv"]);
    }

    #[test]
    fn test_interrupted_run_is_not_a_failure() {
        let outcome = report_outcome(Err(AnalysisError::Interrupted), Path::new("clip.mp4"));
        assert!(outcome.is_ok());
    }

    #[test]
    fn test_failed_run_is_reported_with_video() {
        let error = report_outcome(
            Err(AnalysisError::media_open("clip.mp4", "no decoder")),
            Path::new("clip.mp4"),
        ).unwrap_err();

        assert!(format!("{:#}", error).contains("analysis of clip.mp4 failed"));
        assert!(matches!(error.downcast_ref::<AnalysisError>(), Some(AnalysisError::MediaOpen { .. })));
    }

    #[test]
    fn test_missing_videos_dir_is_empty() {
        assert!(find_videos(Path::new("definitely/not/here")).unwrap().is_empty());
        assert_eq!(select_video(Path::new("definitely/not/here")).unwrap(), None);
    }
}
