//! Shot-cut statistics on top of the content detector

use serde::Serialize;
use tracing::{info, instrument};
use crate::{
    common::{round2, AnalysisError, CancelFlag, FrameTimecode, Result, SceneBoundary},
    config::ShotCutConfig,
    content_detector::ContentDetector,
    sampler::{FrameSampler, Resize},
};

/// Cut timing summary for one video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShotCutStats {
    pub total_cuts: usize,
    /// Seconds, two decimals
    pub cut_timestamps: Vec<f64>,
    /// Mean gap between consecutive scene starts, 0 for a single scene
    pub avg_scene_length: f64,
    pub scene_count: usize,
    pub duration: f64,
}

impl ShotCutStats {
    /// Summarise an ordered scene list; every scene end except the last is a cut
    pub fn from_scenes(scenes: &[SceneBoundary], duration: f64) -> Self {
        let scene_count = scenes.len().max(1);

        let cut_timestamps: Vec<f64> = scenes
            .iter()
            .take(scenes.len().saturating_sub(1))
            .map(|scene| round2(scene.end.seconds()))
            .collect();

        let avg_scene_length = if scenes.len() > 1 {
            let gaps: f64 = scenes
                .windows(2)
                .map(|pair| pair[1].start.seconds() - pair[0].start.seconds())
                .sum();
            gaps / (scenes.len() - 1) as f64
        } else {
            0.0
        };

        Self {
            total_cuts: cut_timestamps.len(),
            cut_timestamps,
            avg_scene_length: round2(avg_scene_length),
            scene_count,
            duration: round2(duration),
        }
    }
}

/// Build `[0, c1), [c1, c2), ..., [cn, total_frames)` from ordered cut frames
pub fn build_scene_list(cut_frames: &[u32], total_frames: u32, fps: f64) -> Vec<SceneBoundary> {
    let mut starts = Vec::with_capacity(cut_frames.len() + 1);
    starts.push(0);
    starts.extend(cut_frames.iter().copied().filter(|&frame| frame > 0));

    let last_start = starts.last().copied().unwrap_or(0);
    let end_frame = total_frames.max(last_start + 1);

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(end_frame);
            SceneBoundary::new(FrameTimecode::new(start, fps), FrameTimecode::new(end, fps))
        })
        .collect()
}

/// Detects shot boundaries and reports cut statistics
#[derive(Debug, Clone)]
pub struct ShotCutDetector {
    config: ShotCutConfig,
    cancel: CancelFlag,
}

impl ShotCutDetector {
    pub fn new(config: ShotCutConfig, cancel: CancelFlag) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, cancel })
    }

    /// Scan every frame of `video_path` for cuts
    ///
    /// # Errors
    /// * `MediaOpen` - If the video can't be opened or reports no fps/frame count
    #[instrument(skip(self))]
    pub fn extract(&self, video_path: &str) -> Result<ShotCutStats> {
        let sampler = FrameSampler::open(video_path, 1, Resize::None, self.cancel.clone())?;

        let fps = sampler.stream().fps();
        let frame_count = sampler.stream().frame_count();
        if fps <= 0.0 || frame_count <= 0 {
            return Err(AnalysisError::media_open(video_path, "cannot read duration or frame count"));
        }
        let duration = sampler.stream().duration_seconds();

        info!("Shot-cut scan: {}x{}, {:.2}s, {} frames at {:.2}fps, threshold {}, min scene {} frames",
              sampler.stream().width(), sampler.stream().height(),
              duration, frame_count, fps, self.config.threshold, self.config.min_scene_len);

        let mut detector = ContentDetector::new(self.config.threshold, self.config.min_scene_len);
        let mut cut_frames = Vec::new();

        for sample in sampler {
            let sample = sample?;
            let timecode = FrameTimecode::new(sample.index, fps);
            if detector.process_frame(&sample.frame, &timecode)? {
                cut_frames.push(sample.index);
            }
        }

        let scenes = build_scene_list(&cut_frames, detector.frame_count().max(frame_count as u32), fps);
        let stats = ShotCutStats::from_scenes(&scenes, duration);

        info!("Shot-cut scan complete: {} cuts, {} scenes, avg scene {}s",
              stats.total_cuts, stats.scene_count, stats.avg_scene_length);
        Ok(stats)
    }
}
