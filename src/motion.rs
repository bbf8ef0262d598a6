//! Dense optical-flow motion analysis
//!
//! Farneback flow is computed between each consecutive pair of *sampled*
//! frames. Each pair yields mean/p90/max magnitude; the summary averages the
//! per-pair means and p90s and takes the maximum of the per-pair maxima.

use opencv::{core::{Mat, Vec2f}, imgproc, prelude::*, video};
use serde::Serialize;
use tracing::{debug, info, instrument};
use crate::{
    common::{round2, AnalysisError, CancelFlag, Result},
    compute::{ComputeBackend, ComputeContext},
    config::MotionConfig,
    sampler::{FrameSampler, Resize},
};

/// Farneback parameters
const PYR_SCALE: f64 = 0.5;
const LEVELS: i32 = 3;
const WIN_SIZE: i32 = 13;
const ITERATIONS: i32 = 3;
const POLY_N: i32 = 5;
const POLY_SIGMA: f64 = 1.1;

/// Motion band derived from the summary p90 magnitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionIntensity {
    Static,
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl MotionIntensity {
    /// Classify with strict upper bounds, so 1.5, 4, 8 and 15 fall in the higher band
    pub fn classify(p90: f64) -> Self {
        if p90 < 1.5 {
            MotionIntensity::Static
        } else if p90 < 4.0 {
            MotionIntensity::Low
        } else if p90 < 8.0 {
            MotionIntensity::Moderate
        } else if p90 < 15.0 {
            MotionIntensity::High
        } else {
            MotionIntensity::VeryHigh
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MotionIntensity::Static => "static",
            MotionIntensity::Low => "low",
            MotionIntensity::Moderate => "moderate",
            MotionIntensity::High => "high",
            MotionIntensity::VeryHigh => "very_high",
        }
    }
}

impl std::fmt::Display for MotionIntensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Magnitude statistics for one pair of sampled frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    pub avg: f64,
    pub p90: f64,
    pub max: f64,
}

impl MotionSample {
    /// Statistics over a per-pixel magnitude field
    pub fn from_magnitudes(mut magnitudes: Vec<f32>) -> Self {
        if magnitudes.is_empty() {
            return Self { avg: 0.0, p90: 0.0, max: 0.0 };
        }

        let sum: f64 = magnitudes.iter().map(|&m| m as f64).sum();
        let max = magnitudes.iter().copied().fold(0.0f32, f32::max) as f64;
        let avg = sum / magnitudes.len() as f64;
        let p90 = percentile(&mut magnitudes, 90.0);

        Self { avg, p90, max }
    }

    /// Statistics of a two-channel flow field
    pub fn from_flow(flow: &[Vec2f]) -> Self {
        let magnitudes = flow
            .iter()
            .map(|v| (v[0] * v[0] + v[1] * v[1]).sqrt())
            .collect();
        Self::from_magnitudes(magnitudes)
    }
}

/// Percentile with linear interpolation between closest ranks
///
/// Reorders `values`. Returns 0 for an empty slice.
pub fn percentile(values: &mut [f32], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let rank = q.clamp(0.0, 100.0) / 100.0 * (values.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;

    let (_, &mut low_value, above) = values.select_nth_unstable_by(lower, f32::total_cmp);
    let low_value = low_value as f64;
    if upper == lower {
        return low_value;
    }

    // The next order statistic is the smallest value above the lower rank
    let high_value = above.iter().copied().fold(f32::INFINITY, f32::min) as f64;
    low_value + (high_value - low_value) * fraction
}

/// Motion summary for one video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotionStats {
    pub average_motion: f64,
    pub p90_motion: f64,
    pub max_motion: f64,
    pub motion_intensity: MotionIntensity,
    /// Frames sampled, not pairs
    pub sampled_frames: usize,
}

impl MotionStats {
    /// Fold per-pair samples into the summary; fewer than one pair gives all zeros
    pub fn summarize(samples: &[MotionSample], sampled_frames: usize) -> Self {
        let (average, p90, max) = if samples.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let count = samples.len() as f64;
            (
                samples.iter().map(|s| s.avg).sum::<f64>() / count,
                samples.iter().map(|s| s.p90).sum::<f64>() / count,
                samples.iter().map(|s| s.max).fold(0.0, f64::max),
            )
        };

        Self {
            average_motion: round2(average),
            p90_motion: round2(p90),
            max_motion: round2(max),
            motion_intensity: MotionIntensity::classify(p90),
            sampled_frames,
        }
    }
}

/// Samples a video and measures dense optical flow between sampled frames
#[derive(Debug, Clone)]
pub struct MotionAnalyzer {
    config: MotionConfig,
    backend: ComputeBackend,
    cancel: CancelFlag,
}

impl MotionAnalyzer {
    pub fn new(config: MotionConfig, compute: &ComputeContext, cancel: CancelFlag) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend: compute.backend(),
            cancel,
        })
    }

    #[instrument(skip(self))]
    pub fn extract(&self, video_path: &str) -> Result<MotionStats> {
        let sampler = FrameSampler::open(
            video_path,
            self.config.sample_rate,
            Resize::Divisor(self.config.downscale as i32),
            self.cancel.clone(),
        )?;

        let total_frames = sampler.stream().frame_count();
        info!("Motion analysis: sample rate 1/{}, downscale {}x, {:.2}s, backend {} (flow runs on CPU)",
              self.config.sample_rate, self.config.downscale,
              sampler.stream().duration_seconds(), self.backend);

        let mut samples = Vec::new();
        let mut previous: Option<Mat> = None;
        let mut sampled_frames = 0usize;

        for sample in sampler {
            let sample = sample?;
            let gray = to_gray(&sample.frame, sample.index)?;

            if let Some(ref prev_gray) = previous {
                let motion = pair_motion(prev_gray, &gray, sample.index)?;
                debug!("Motion [{}/{}] avg {:.2} p90 {:.2} max {:.2}",
                       sample.index, total_frames, motion.avg, motion.p90, motion.max);
                samples.push(motion);
            }

            previous = Some(gray);
            sampled_frames += 1;
        }

        let stats = MotionStats::summarize(&samples, sampled_frames);
        info!("Motion analysis complete: avg {:.2} | p90 {:.2} ({}) | max {:.2}, {} samples",
              stats.average_motion, stats.p90_motion, stats.motion_intensity,
              stats.max_motion, stats.sampled_frames);
        Ok(stats)
    }
}

fn to_gray(frame: &Mat, index: u32) -> Result<Mat> {
    if frame.channels() == 1 {
        return Ok(frame.clone());
    }

    let mut gray = Mat::default();
    imgproc::cvt_color_def(frame, &mut gray, imgproc::COLOR_BGR2GRAY)
        .map_err(|e| AnalysisError::frame_error(index, format!("grayscale conversion failed: {}", e)))?;
    Ok(gray)
}

/// Farneback flow from `prev` to `next`, reduced to magnitude statistics
fn pair_motion(prev: &Mat, next: &Mat, index: u32) -> Result<MotionSample> {
    let mut flow = Mat::default();
    video::calc_optical_flow_farneback(
        prev,
        next,
        &mut flow,
        PYR_SCALE,
        LEVELS,
        WIN_SIZE,
        ITERATIONS,
        POLY_N,
        POLY_SIGMA,
        video::OPTFLOW_FARNEBACK_GAUSSIAN,
    )
    .map_err(|e| AnalysisError::frame_error(index, format!("optical flow failed: {}", e)))?;

    let vectors = flow
        .data_typed::<Vec2f>()
        .map_err(|e| AnalysisError::frame_error(index, format!("flow field unreadable: {}", e)))?;
    Ok(MotionSample::from_flow(vectors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{solid_frame, write_solid_video, write_video, TestVideo};
    use opencv::core::{Point, Scalar};

    #[test]
    fn test_classification_boundaries_map_up() {
        assert_eq!(MotionIntensity::classify(0.0), MotionIntensity::Static);
        assert_eq!(MotionIntensity::classify(1.49), MotionIntensity::Static);
        assert_eq!(MotionIntensity::classify(1.5), MotionIntensity::Low);
        assert_eq!(MotionIntensity::classify(4.0), MotionIntensity::Moderate);
        assert_eq!(MotionIntensity::classify(8.0), MotionIntensity::High);
        assert_eq!(MotionIntensity::classify(15.0), MotionIntensity::VeryHigh);
        assert_eq!(MotionIntensity::classify(100.0), MotionIntensity::VeryHigh);
    }

    #[test]
    fn test_intensity_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&MotionIntensity::VeryHigh).unwrap(), "\"very_high\"");
        assert_eq!(MotionIntensity::Static.to_string(), "static");
    }

    #[test]
    fn test_percentile_linear_interpolation() {
        let mut values: Vec<f32> = (1..=10).map(|v| v as f32).collect();
        assert!((percentile(&mut values, 90.0) - 9.1).abs() < 1e-9);

        let mut values = vec![5.0f32, 1.0, 3.0];
        assert_eq!(percentile(&mut values, 50.0), 3.0);
        assert_eq!(percentile(&mut values, 100.0), 5.0);
        assert_eq!(percentile(&mut values, 0.0), 1.0);

        let mut single = vec![2.5f32];
        assert_eq!(percentile(&mut single, 90.0), 2.5);
        assert_eq!(percentile(&mut [], 90.0), 0.0);
    }

    #[test]
    fn test_sample_from_flow() {
        let flow = vec![Vec2f::from([3.0, 4.0]), Vec2f::from([0.0, 0.0])];
        let sample = MotionSample::from_flow(&flow);
        assert_eq!(sample.avg, 2.5);
        assert_eq!(sample.max, 5.0);
        assert!((sample.p90 - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_summary_is_mean_of_pairs_and_max_of_maxima() {
        let samples = [
            MotionSample { avg: 1.0, p90: 2.0, max: 6.0 },
            MotionSample { avg: 3.0, p90: 6.0, max: 9.0 },
        ];
        let stats = MotionStats::summarize(&samples, 3);
        assert_eq!(stats.average_motion, 2.0);
        assert_eq!(stats.p90_motion, 4.0);
        assert_eq!(stats.max_motion, 9.0);
        assert_eq!(stats.motion_intensity, MotionIntensity::Moderate);
        assert_eq!(stats.sampled_frames, 3);
    }

    #[test]
    fn test_no_pairs_is_all_zero() {
        let stats = MotionStats::summarize(&[], 1);
        assert_eq!(stats.average_motion, 0.0);
        assert_eq!(stats.p90_motion, 0.0);
        assert_eq!(stats.max_motion, 0.0);
        assert_eq!(stats.motion_intensity, MotionIntensity::Static);
        assert_eq!(stats.sampled_frames, 1);
    }

    #[test]
    fn test_static_video_is_static() {
        let video = TestVideo::new("static.avi");
        write_solid_video(video.path(), 30, 30.0, (96, 64), (50, 100, 150));

        let analyzer = MotionAnalyzer::new(MotionConfig::default(), &ComputeContext::cpu(), CancelFlag::new()).unwrap();
        let stats = analyzer.extract(video.path()).unwrap();
        assert_eq!(stats.sampled_frames, 6);
        assert!(stats.average_motion.abs() < 0.01);
        assert!(stats.p90_motion.abs() < 0.01);
        assert!(stats.max_motion.abs() < 0.01);
        assert_eq!(stats.motion_intensity, MotionIntensity::Static);
    }

    #[test]
    fn test_single_sampled_frame_is_exactly_zero() {
        let video = TestVideo::new("short.avi");
        write_solid_video(video.path(), 4, 30.0, (64, 48), (0, 0, 0));

        let analyzer = MotionAnalyzer::new(MotionConfig::default(), &ComputeContext::cpu(), CancelFlag::new()).unwrap();
        let stats = analyzer.extract(video.path()).unwrap();
        assert_eq!(stats.sampled_frames, 1);
        assert_eq!(stats, MotionStats::summarize(&[], 1));
    }

    #[test]
    fn test_moving_square_registers_motion() {
        let video = TestVideo::new("moving.avi");
        write_video(video.path(), 20, 30.0, (160, 120), |i| {
            let mut frame = solid_frame((160, 120), (0, 0, 0));
            let x = 20 + (i as i32) * 4;
            imgproc::rectangle_points(
                &mut frame,
                Point::new(x, 40),
                Point::new(x + 30, 70),
                Scalar::all(255.0),
                -1,
                imgproc::LINE_8,
                0,
            ).unwrap();
            frame
        });

        let config = MotionConfig { sample_rate: 1, downscale: 1 };
        let analyzer = MotionAnalyzer::new(config, &ComputeContext::cpu(), CancelFlag::new()).unwrap();
        let stats = analyzer.extract(video.path()).unwrap();
        assert_eq!(stats.sampled_frames, 20);
        assert!(stats.max_motion > 0.5, "max motion {}", stats.max_motion);
    }

    #[test]
    fn test_analysis_is_repeatable() {
        let video = TestVideo::new("repeat.avi");
        write_video(video.path(), 15, 30.0, (64, 48), |i| {
            let level = (i * 15) as u8;
            solid_frame((64, 48), (level, level, level))
        });

        let analyzer = MotionAnalyzer::new(MotionConfig::default(), &ComputeContext::cpu(), CancelFlag::new()).unwrap();
        assert_eq!(analyzer.extract(video.path()).unwrap(), analyzer.extract(video.path()).unwrap());
    }

    #[test]
    fn test_missing_video_fails() {
        let analyzer = MotionAnalyzer::new(MotionConfig::default(), &ComputeContext::cpu(), CancelFlag::new()).unwrap();
        assert!(matches!(analyzer.extract("missing.mp4").unwrap_err(), AnalysisError::MediaOpen { .. }));
    }
}
