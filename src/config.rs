//! Analyzer configuration
//!
//! Each analyzer takes a plain config struct whose `Default` carries the
//! documented defaults. `validate` rejects values the analyzers can't work with
//! before any video is opened.

use std::path::PathBuf;
use crate::{
    common::{AnalysisError, Result},
    compute::Device,
};

/// Scene-boundary detection settings
#[derive(Debug, Clone, PartialEq)]
pub struct ShotCutConfig {
    /// Content score needed for a cut; higher is less sensitive
    pub threshold: f64,
    /// Minimum frames between two cuts
    pub min_scene_len: u32,
}

impl Default for ShotCutConfig {
    fn default() -> Self {
        Self {
            threshold: 27.0,
            min_scene_len: 15,
        }
    }
}

impl ShotCutConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(AnalysisError::config_error(
                format!("shot-cut threshold must be a non-negative number, got {}", self.threshold)
            ));
        }
        if self.min_scene_len == 0 {
            return Err(AnalysisError::config_error("min scene length must be at least 1 frame"));
        }
        Ok(())
    }
}

/// Optical-flow motion settings
#[derive(Debug, Clone, PartialEq)]
pub struct MotionConfig {
    pub sample_rate: u32,
    /// Divisor applied to both frame dimensions before flow
    pub downscale: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 5,
            downscale: 2,
        }
    }
}

impl MotionConfig {
    pub fn validate(&self) -> Result<()> {
        validate_stride("motion", self.sample_rate)?;
        if self.downscale == 0 {
            return Err(AnalysisError::config_error("motion downscale must be at least 1"));
        }
        Ok(())
    }
}

/// On-screen text (OCR) settings
#[derive(Debug, Clone, PartialEq)]
pub struct TextConfig {
    pub sample_rate: u32,
    /// Width every sampled frame is scaled to before OCR
    pub downscale_width: u32,
    /// OCR worker threads
    pub workers: usize,
    /// Minimum per-word confidence, 0-100
    pub min_confidence: f32,
    /// Tesseract language code
    pub language: String,
    /// Directory holding tessdata; `None` uses Tesseract's own lookup
    pub tessdata: Option<PathBuf>,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            sample_rate: 2,
            downscale_width: 640,
            workers: default_workers(),
            min_confidence: 60.0,
            language: "eng".to_string(),
            tessdata: None,
        }
    }
}

impl TextConfig {
    pub fn validate(&self) -> Result<()> {
        validate_stride("text", self.sample_rate)?;
        if self.downscale_width == 0 {
            return Err(AnalysisError::config_error("text downscale width must be positive"));
        }
        if self.workers == 0 {
            return Err(AnalysisError::config_error("OCR worker count must be at least 1"));
        }
        if !(0.0..=100.0).contains(&self.min_confidence) {
            return Err(AnalysisError::config_error(
                format!("OCR confidence must be within 0-100, got {}", self.min_confidence)
            ));
        }
        if self.language.trim().is_empty() {
            return Err(AnalysisError::config_error("OCR language must not be empty"));
        }
        Ok(())
    }
}

/// Object dominance (detection) settings
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectConfig {
    pub sample_rate: u32,
    /// Detections must score strictly above this, 0-1
    pub confidence: f32,
    pub batch_size: usize,
    /// Preferred ONNX model
    pub model: PathBuf,
    /// Tried once when the preferred model fails to load
    pub fallback_model: Option<PathBuf>,
    pub device: Device,
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            sample_rate: 5,
            confidence: 0.5,
            batch_size: 8,
            model: PathBuf::from("models/yolo12n.onnx"),
            fallback_model: Some(PathBuf::from("models/yolov8n.onnx")),
            device: Device::Auto,
        }
    }
}

impl ObjectConfig {
    pub fn validate(&self) -> Result<()> {
        validate_stride("object", self.sample_rate)?;
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(AnalysisError::config_error(
                format!("object confidence must be within 0-1, got {}", self.confidence)
            ));
        }
        if self.batch_size == 0 {
            return Err(AnalysisError::config_error("object batch size must be at least 1"));
        }
        Ok(())
    }
}

/// Settings for the whole pipeline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisConfig {
    pub shot_cuts: ShotCutConfig,
    pub motion: MotionConfig,
    pub text: TextConfig,
    pub objects: ObjectConfig,
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        self.shot_cuts.validate()?;
        self.motion.validate()?;
        self.text.validate()?;
        self.objects.validate()
    }
}

/// One less than the available parallelism, never below 1
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

fn validate_stride(analyzer: &str, stride: u32) -> Result<()> {
    if stride == 0 {
        return Err(AnalysisError::config_error(
            format!("{} sample rate must be at least 1", analyzer)
        ));
    }
    Ok(())
}
