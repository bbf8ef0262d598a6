//! Runs the four analyzers over one video and assembles the report

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{info, instrument};

use crate::{
    common::{AnalysisError, CancelFlag, Result},
    compute::ComputeContext,
    config::AnalysisConfig,
    motion::MotionAnalyzer,
    objects::{ObjectDetector, ObjectDominanceAnalyzer},
    report::{report_path, write_report, FeatureReport, Features},
    shot_cuts::ShotCutDetector,
    text::{RecognizerFactory, TextAnalyzer},
};

/// Sequential feature extraction for one video at a time
///
/// Analyzers share nothing but the cancellation flag; each one reopens the
/// video. The object model is loaded when the pipeline is built.
#[derive(Debug)]
pub struct FeaturePipeline {
    shot_cuts: ShotCutDetector,
    motion: MotionAnalyzer,
    text: TextAnalyzer,
    objects: ObjectDominanceAnalyzer,
    cancel: CancelFlag,
}

impl FeaturePipeline {
    /// Validate `config`, then build every analyzer with Tesseract and YOLO
    ///
    /// # Errors
    /// * `InvalidConfig` - If any analyzer setting is out of range
    /// * `ModelLoad` - If neither the preferred nor the fallback object model loads
    pub fn new(config: AnalysisConfig, compute: &ComputeContext, cancel: CancelFlag) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            shot_cuts: ShotCutDetector::new(config.shot_cuts, cancel.clone())?,
            motion: MotionAnalyzer::new(config.motion, compute, cancel.clone())?,
            text: TextAnalyzer::new(config.text, cancel.clone())?,
            objects: ObjectDominanceAnalyzer::new(config.objects, compute, cancel.clone())?,
            cancel,
        })
    }

    /// Build the pipeline around caller-supplied OCR and detection engines
    pub fn with_engines(
        config: AnalysisConfig,
        compute: &ComputeContext,
        recognizers: RecognizerFactory,
        detector: Box<dyn ObjectDetector>,
        cancel: CancelFlag,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            shot_cuts: ShotCutDetector::new(config.shot_cuts, cancel.clone())?,
            motion: MotionAnalyzer::new(config.motion, compute, cancel.clone())?,
            text: TextAnalyzer::with_recognizer_factory(config.text, recognizers, cancel.clone())?,
            objects: ObjectDominanceAnalyzer::with_detector(config.objects, detector, cancel.clone())?,
            cancel,
        })
    }

    /// Extract all four feature groups from `video_path`
    ///
    /// # Errors
    /// * `MediaOpen` - If the video can't be opened by any analyzer
    /// * `Interrupted` - If cancellation was requested mid-run
    #[instrument(skip(self))]
    pub fn run(&mut self, video_path: &Path) -> Result<FeatureReport> {
        let path = video_path
            .to_str()
            .ok_or_else(|| AnalysisError::media_open(video_path.display().to_string(), "path is not valid UTF-8"))?;
        let started = Instant::now();
        info!("Analyzing {}", path);

        info!("[1/4] Shot cuts");
        let shot_cuts = self.shot_cuts.extract(path)?;
        self.cancel.check()?;

        info!("[2/4] Motion");
        let motion = self.motion.extract(path)?;
        self.cancel.check()?;

        info!("[3/4] Text");
        let text = self.text.extract(path)?;
        self.cancel.check()?;

        info!("[4/4] Object dominance");
        let object_dominance = self.objects.extract(path)?;

        info!("Analysis of {} finished in {:.2}s", path, started.elapsed().as_secs_f64());
        Ok(FeatureReport {
            video_file: path.to_string(),
            features: Features { shot_cuts, motion, text, object_dominance },
        })
    }

    /// Run on `video_path` and persist the report under `results_dir`
    pub fn run_and_save(&mut self, video_path: &Path, results_dir: &Path) -> Result<(FeatureReport, PathBuf)> {
        let report = self.run(video_path)?;
        let output = report_path(results_dir, video_path);
        write_report(&report, &output)?;
        Ok((report, output))
    }
}
