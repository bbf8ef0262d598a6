//! ContentDetector - HSV-based scene change scoring
//!
//! Each frame is converted to HSV and compared to the previous frame. The
//! weighted mean absolute difference of the channels is the frame's content
//! score; scores at or above the threshold become cut candidates, which the
//! flash filter then confirms.

use opencv::{core::{self, Mat, Vector}, imgproc, prelude::*};
use tracing::{debug, trace};
use crate::{
    common::{AnalysisError, FrameTimecode, Result},
    flash_filter::FlashFilter,
};

/// Per-channel weights for the content score
#[derive(Debug, Clone, PartialEq)]
struct ComponentWeights {
    delta_hue: f64,
    delta_sat: f64,
    delta_lum: f64,
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            delta_hue: 1.0,
            delta_sat: 1.0,
            delta_lum: 1.0,
        }
    }
}

impl ComponentWeights {
    fn sum_abs(&self) -> f64 {
        self.delta_hue.abs() + self.delta_sat.abs() + self.delta_lum.abs()
    }
}

/// The three HSV planes of one frame
#[derive(Debug)]
struct HsvPlanes {
    hue: Mat,
    sat: Mat,
    lum: Mat,
}

impl HsvPlanes {
    fn from_bgr_frame(frame: &Mat, frame_number: u32) -> Result<Self> {
        let mut hsv = Mat::default();
        imgproc::cvt_color_def(frame, &mut hsv, imgproc::COLOR_BGR2HSV)
            .map_err(|e| AnalysisError::frame_error(frame_number, format!("HSV conversion failed: {}", e)))?;

        let mut channels = Vector::<Mat>::new();
        core::split(&hsv, &mut channels)
            .map_err(|e| AnalysisError::frame_error(frame_number, format!("Channel split failed: {}", e)))?;

        if channels.len() != 3 {
            return Err(AnalysisError::frame_error(frame_number,
                format!("Expected 3 HSV channels, got {}", channels.len())));
        }

        Ok(Self {
            hue: channels.get(0)?,
            sat: channels.get(1)?,
            lum: channels.get(2)?,
        })
    }
}

/// Scores consecutive frames and reports confirmed cuts
pub struct ContentDetector {
    threshold: f64,
    weights: ComponentWeights,
    last_planes: Option<HsvPlanes>,
    flash_filter: FlashFilter,
    frame_count: u32,
}

impl ContentDetector {
    /// Create a detector with default channel weights
    ///
    /// # Panics
    /// Panics if threshold is negative or min_scene_length is 0
    pub fn new(threshold: f64, min_scene_length: u32) -> Self {
        assert!(threshold >= 0.0, "Threshold must be non-negative, got: {}", threshold);

        Self {
            threshold,
            weights: ComponentWeights::default(),
            last_planes: None,
            flash_filter: FlashFilter::new(min_scene_length),
            frame_count: 0,
        }
    }

    /// Process one BGR frame; returns true when it starts a new scene
    pub fn process_frame(&mut self, frame: &Mat, timecode: &FrameTimecode) -> Result<bool> {
        self.frame_count += 1;

        if frame.empty() {
            return Err(AnalysisError::frame_error(timecode.frame_number(), "Empty frame provided"));
        }

        let score = self.frame_score(frame, timecode.frame_number())?;
        trace!("Frame {} score: {:.3} (threshold: {})", timecode.frame_number(), score, self.threshold);

        Ok(self.flash_filter.filter(timecode, score >= self.threshold))
    }

    /// Content score of `frame` against the previous frame (0 for the first frame)
    fn frame_score(&mut self, frame: &Mat, frame_number: u32) -> Result<f64> {
        let current = HsvPlanes::from_bgr_frame(frame, frame_number)?;

        let score = match self.last_planes {
            Some(ref last) => {
                let delta_hue = mean_pixel_distance(&current.hue, &last.hue, frame_number)?;
                let delta_sat = mean_pixel_distance(&current.sat, &last.sat, frame_number)?;
                let delta_lum = mean_pixel_distance(&current.lum, &last.lum, frame_number)?;

                let weighted_sum = delta_hue * self.weights.delta_hue
                    + delta_sat * self.weights.delta_sat
                    + delta_lum * self.weights.delta_lum;

                trace!("Frame {} components: hue={:.3}, sat={:.3}, lum={:.3}",
                       frame_number, delta_hue, delta_sat, delta_lum);

                weighted_sum / self.weights.sum_abs()
            }
            None => {
                debug!("First frame ({}), score = 0.0", frame_number);
                0.0
            }
        };

        self.last_planes = Some(current);
        Ok(score)
    }

    /// Number of frames processed so far
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }
}

/// Mean absolute difference between two single-channel images of equal size
fn mean_pixel_distance(left: &Mat, right: &Mat, frame_number: u32) -> Result<f64> {
    if left.size()? != right.size()? {
        return Err(AnalysisError::frame_error(frame_number, "Frame size changed mid-stream"));
    }

    let mut diff = Mat::default();
    core::absdiff(left, right, &mut diff)?;
    let sum = core::sum_elems(&diff)?;

    let num_pixels = (left.rows() * left.cols()) as f64;
    Ok(sum[0] / num_pixels)
}

// Implement Debug manually to avoid showing internal OpenCV state
impl std::fmt::Debug for ContentDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentDetector")
            .field("threshold", &self.threshold)
            .field("weights", &self.weights)
            .field("frame_count", &self.frame_count)
            .field("has_last_frame", &self.last_planes.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::solid_frame;

    fn tc(frame: u32) -> FrameTimecode {
        FrameTimecode::new(frame, 25.0)
    }

    #[test]
    fn test_content_detector_creation() {
        let detector = ContentDetector::new(27.0, 15);
        assert_eq!(detector.frame_count(), 0);
        assert_eq!(detector.weights, ComponentWeights::default());
        assert!(format!("{:?}", detector).contains("has_last_frame: false"));
    }

    #[test]
    #[should_panic(expected = "Threshold must be non-negative")]
    fn test_content_detector_negative_threshold() {
        ContentDetector::new(-1.0, 15);
    }

    #[test]
    fn test_score_is_weighted_mean_of_channels() {
        let mut detector = ContentDetector::new(27.0, 1);
        let black = solid_frame((32, 24), (0, 0, 0));
        let white = solid_frame((32, 24), (255, 255, 255));

        detector.frame_score(&black, 0).unwrap();
        // Only the value channel moves: (0 + 0 + 255) / 3
        assert_eq!(detector.frame_score(&white, 1).unwrap(), 85.0);
    }

    #[test]
    fn test_identical_frames_score_zero() {
        let mut detector = ContentDetector::new(27.0, 1);
        let frame = solid_frame((32, 24), (40, 80, 120));
        assert_eq!(detector.frame_score(&frame, 0).unwrap(), 0.0);
        assert_eq!(detector.frame_score(&frame, 1).unwrap(), 0.0);
    }

    #[test]
    fn test_black_to_white_is_a_cut() {
        let mut detector = ContentDetector::new(27.0, 5);
        let black = solid_frame((32, 24), (0, 0, 0));
        let white = solid_frame((32, 24), (255, 255, 255));

        for frame in 0..10 {
            assert!(!detector.process_frame(&black, &tc(frame)).unwrap());
        }
        // Value channel jumps 0 -> 255, score 85
        assert!(detector.process_frame(&white, &tc(10)).unwrap());
        assert!(!detector.process_frame(&white, &tc(11)).unwrap());
        assert_eq!(detector.frame_count(), 12);
    }

    #[test]
    fn test_flash_within_min_length_suppressed() {
        let mut detector = ContentDetector::new(27.0, 15);
        let black = solid_frame((32, 24), (0, 0, 0));
        let white = solid_frame((32, 24), (255, 255, 255));

        assert!(!detector.process_frame(&black, &tc(0)).unwrap());
        assert!(!detector.process_frame(&white, &tc(1)).unwrap());
        assert!(!detector.process_frame(&black, &tc(2)).unwrap());
    }

    #[test]
    fn test_empty_frame_rejected() {
        let mut detector = ContentDetector::new(27.0, 15);
        let result = detector.process_frame(&Mat::default(), &tc(3));
        assert!(matches!(result.unwrap_err(), AnalysisError::FrameProcessing { frame: 3, .. }));
    }
}
