//! Common types, utilities, and error handling for the feature extractors.
//!
//! This module provides the foundational types used throughout the codebase,
//! including frame timecodes, scene boundaries, cancellation, and the error type
//! shared by every analyzer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Represents a specific point in time within a video
///
/// This type encapsulates both the frame number and framerate information,
/// allowing for precise temporal calculations and conversions.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTimecode {
    frame_number: u32,
    fps: f64,
}

impl FrameTimecode {
    /// Create a new FrameTimecode
    ///
    /// # Arguments
    /// * `frame_number` - The frame number (0-indexed)
    /// * `fps` - Frames per second of the video
    ///
    /// # Panics
    /// Panics if fps is not positive. Callers validate the stream fps first.
    pub fn new(frame_number: u32, fps: f64) -> Self {
        assert!(fps > 0.0, "FPS must be positive, got: {}", fps);
        Self { frame_number, fps }
    }

    /// Get the frame number
    pub fn frame_number(&self) -> u32 {
        self.frame_number
    }

    /// Get the framerate
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Convert to seconds since start of video
    pub fn seconds(&self) -> f64 {
        self.frame_number as f64 / self.fps
    }
}

/// One detected scene, bounded by its first frame and the first frame of the next scene
///
/// A video's scene list is strictly ordered, non-overlapping and covers the
/// whole video from frame 0 to the final frame count.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneBoundary {
    pub start: FrameTimecode,
    pub end: FrameTimecode,
}

impl SceneBoundary {
    /// Create a scene spanning `[start, end)`
    ///
    /// # Panics
    /// Panics on mismatched fps or an end that does not follow the start.
    #[instrument]
    pub fn new(start: FrameTimecode, end: FrameTimecode) -> Self {
        assert_eq!(start.fps(), end.fps(), "Start and end FPS must match");
        assert!(end.frame_number() > start.frame_number(),
                "End frame must be after start frame");

        debug!("Created SceneBoundary: frames {}-{}",
               start.frame_number(), end.frame_number());

        Self { start, end }
    }
}

/// All possible errors from the feature extraction pipeline
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Cannot open video {path}: {reason}")]
    MediaOpen { path: String, reason: String },

    #[error("Failed to load model {model}: {reason}")]
    ModelLoad { model: String, reason: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Frame processing failed at frame {frame}: {reason}")]
    FrameProcessing { frame: u32, reason: String },

    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Report serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Analysis interrupted")]
    Interrupted,
}

impl AnalysisError {
    /// Create a media open error for `path`
    pub fn media_open(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MediaOpen { path: path.into(), reason: reason.into() }
    }

    /// Create a model load error
    pub fn model_load(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModelLoad { model: model.into(), reason: reason.into() }
    }

    /// Create a configuration error with a descriptive message
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }

    /// Create a frame processing error
    pub fn frame_error(frame: u32, reason: impl Into<String>) -> Self {
        Self::FrameProcessing {
            frame,
            reason: reason.into()
        }
    }

    /// Whether this error is a user interruption rather than a failure
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

/// Convenient Result type for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Shared cancellation flag, set once by the interrupt handler and polled by analyzers
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Return `Interrupted` once cancellation has been requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AnalysisError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Round to two decimal places, the precision used throughout the report
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
