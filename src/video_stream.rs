//! Video stream handling using OpenCV backend
//!
//! This module provides a wrapper around OpenCV's VideoCapture for sequential,
//! forward-only decoding. Every analyzer opens its own stream and releases it
//! on drop.

use opencv::{videoio, core::Mat, prelude::*};
use tracing::{instrument, debug, warn, info};
use std::path::Path;
use crate::common::{AnalysisError, Result};

/// Wrapper around OpenCV VideoCapture for consistent video reading
///
/// Reads are strictly sequential. There is no seeking or rewinding; a second
/// pass over the same file requires opening a new stream.
pub struct VideoStream {
    cap: videoio::VideoCapture,
    fps: f64,
    frame_count: i32,
    current_frame: i32,
    width: i32,
    height: i32,
    path: String,
}

impl VideoStream {
    /// Open a video file for reading
    ///
    /// # Errors
    /// * `MediaOpen` - If the file doesn't exist, is not a regular file, or
    ///   OpenCV can't decode it (unsupported codec, zero-byte file)
    #[instrument(skip(path))]
    pub fn open(path: &str) -> Result<Self> {
        info!("Opening video stream: {}", path);

        let file = Path::new(path);
        if !file.exists() {
            return Err(AnalysisError::media_open(path, "file not found"));
        }
        if !file.is_file() {
            return Err(AnalysisError::media_open(path, "not a regular file"));
        }

        let cap = videoio::VideoCapture::from_file(path, videoio::CAP_ANY)
            .map_err(|e| {
                warn!("Failed to create VideoCapture: {}", e);
                AnalysisError::media_open(path, e.to_string())
            })?;

        let is_opened = cap.is_opened().map_err(|e| {
            warn!("Failed to check if VideoCapture is opened: {}", e);
            AnalysisError::media_open(path, e.to_string())
        })?;

        if !is_opened {
            return Err(AnalysisError::media_open(path, "unsupported or corrupted video"));
        }

        let property = |prop: i32, name: &str| -> Result<f64> {
            cap.get(prop).map_err(|e| {
                warn!("Failed to get video {}: {}", name, e);
                AnalysisError::media_open(path, format!("cannot read {}: {}", name, e))
            })
        };

        let fps = property(videoio::CAP_PROP_FPS, "fps")?;
        let frame_count = property(videoio::CAP_PROP_FRAME_COUNT, "frame count")? as i32;
        let width = property(videoio::CAP_PROP_FRAME_WIDTH, "frame width")? as i32;
        let height = property(videoio::CAP_PROP_FRAME_HEIGHT, "frame height")? as i32;

        if width <= 0 || height <= 0 {
            return Err(AnalysisError::media_open(path, "video has no frame dimensions"));
        }

        info!("Video opened successfully - FPS: {}, Frames: {}, Size: {}x{}",
              fps, frame_count, width, height);

        Ok(Self {
            cap,
            fps,
            frame_count,
            current_frame: 0,
            width,
            height,
            path: path.to_string(),
        })
    }

    /// Advance past the next frame without copying it out
    ///
    /// Returns `false` at end of stream.
    pub fn grab(&mut self) -> Result<bool> {
        let grabbed = self.cap.grab().map_err(|e| {
            AnalysisError::frame_error(self.current_frame as u32, format!("OpenCV grab failed: {}", e))
        })?;

        if grabbed {
            self.current_frame += 1;
        } else {
            debug!("Reached end of video at frame {}", self.current_frame);
        }
        Ok(grabbed)
    }

    /// Decode the most recently grabbed frame
    pub fn retrieve(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        let index = (self.current_frame - 1).max(0) as u32;

        let success = self.cap.retrieve(&mut frame, 0).map_err(|e| {
            AnalysisError::frame_error(index, format!("OpenCV retrieve failed: {}", e))
        })?;

        if success && !frame.empty() {
            Ok(Some(frame))
        } else {
            debug!("Frame {} could not be decoded", index);
            Ok(None)
        }
    }

    /// Get the video framerate (may be 0 when the container doesn't report one)
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Get the frame count reported by the container
    pub fn frame_count(&self) -> i32 {
        self.frame_count
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Get the video duration in seconds, 0 when fps is unknown
    pub fn duration_seconds(&self) -> f64 {
        if self.fps > 0.0 {
            self.frame_count.max(0) as f64 / self.fps
        } else {
            0.0
        }
    }

    /// Get the progress as a percentage (0.0 to 100.0)
    pub fn progress_percent(&self) -> f64 {
        if self.frame_count <= 0 {
            100.0
        } else {
            (self.current_frame as f64 / self.frame_count as f64 * 100.0).min(100.0)
        }
    }
}

// Implement Debug manually to avoid showing internal OpenCV state
impl std::fmt::Debug for VideoStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoStream")
            .field("path", &self.path)
            .field("fps", &self.fps)
            .field("frame_count", &self.frame_count)
            .field("current_frame", &self.current_frame)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}
