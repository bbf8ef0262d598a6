//! Per-video feature extraction: shot cuts, motion, on-screen text and object dominance
//!
//! Each analyzer opens the video on its own, samples frames at a fixed stride
//! and reduces them to a small set of statistics. `FeaturePipeline` runs all
//! four in sequence and assembles the `FeatureReport` that is written to
//! `results/<video stem>/output.json`.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use video_features::{AnalysisConfig, CancelFlag, ComputeContext, FeaturePipeline};
//!
//! let compute = ComputeContext::detect(true);
//! let mut pipeline = FeaturePipeline::new(AnalysisConfig::default(), &compute, CancelFlag::new())?;
//! let (report, output) = pipeline.run_and_save(Path::new("videos/clip.mp4"), Path::new("results"))?;
//!
//! println!("{} cuts, motion {}", report.features.shot_cuts.total_cuts,
//!          report.features.motion.motion_intensity);
//! println!("Saved to {}", output.display());
//! # Ok::<(), video_features::AnalysisError>(())
//! ```

mod common;
mod video_stream;
mod sampler;
mod compute;
mod config;
mod flash_filter;
mod content_detector;
mod shot_cuts;
mod motion;
mod text;
mod objects;
mod report;
mod pipeline;

#[cfg(test)]
mod test_support;

// Re-export main types for public API
pub use common::{round2, AnalysisError, CancelFlag, FrameTimecode, Result, SceneBoundary};
pub use compute::{ComputeBackend, ComputeContext, Device};
pub use config::{default_workers, AnalysisConfig, MotionConfig, ObjectConfig, ShotCutConfig, TextConfig};
pub use content_detector::ContentDetector;
pub use flash_filter::FlashFilter;
pub use motion::{MotionAnalyzer, MotionIntensity, MotionSample, MotionStats};
pub use objects::{
    load_detector_with_fallback, resolve_person_class, Detection, DetectionTally,
    ObjectDetector, ObjectDominanceAnalyzer, ObjectDominanceStats, YoloDetector,
};
pub use pipeline::FeaturePipeline;
pub use report::{report_path, write_report, FeatureReport, Features, REPORT_FILE_NAME};
pub use sampler::{FrameSampler, Resize, SampledFrame};
pub use shot_cuts::{build_scene_list, ShotCutDetector, ShotCutStats};
pub use text::{
    KeywordCount, RecognizedWord, RecognizerFactory, TesseractRecognizer, TextAnalyzer,
    TextRecognizer, TextStats,
};
pub use video_stream::VideoStream;

use std::path::Path;
use tracing::{info, instrument};

/// Extract every feature group from one video with Tesseract and YOLO
///
/// Builds a `FeaturePipeline` for a single run. Use the pipeline directly to
/// analyze several videos without reloading the object model.
///
/// # Errors
/// * `InvalidConfig` - If `config` fails validation
/// * `ModelLoad` - If no object model could be loaded
/// * `MediaOpen` - If the video can't be opened
/// * `Interrupted` - If `cancel` is set during the run
#[instrument(skip(config, compute, cancel))]
pub fn analyze_video(
    video_path: &Path,
    config: AnalysisConfig,
    compute: &ComputeContext,
    cancel: CancelFlag,
) -> Result<FeatureReport> {
    let mut pipeline = FeaturePipeline::new(config, compute, cancel)?;
    pipeline.run(video_path)
}

/// Initialize tracing for the library
///
/// Logs go to stderr so stdout stays free for the CLI summary. `RUST_LOG`
/// overrides `level` when set.
///
/// # Arguments
/// * `level` - Tracing level filter (e.g., "debug", "info", "warn", "error")
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true)
        .with_line_number(true)
        .init();

    info!("Video feature extraction initialized with tracing level: {}", level);
}
