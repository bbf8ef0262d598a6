//! Synthetic videos and stand-in OCR/detection engines for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use opencv::{core::{Mat, Scalar, Size, CV_8UC3}, prelude::*, videoio};
use tempfile::TempDir;
use video_features::{
    Detection, ObjectDetector, RecognizedWord, RecognizerFactory, Result, TextRecognizer,
};

/// Write an MJPG video of `frames` solid BGR frames into `dir`
pub fn write_solid_video(dir: &TempDir, name: &str, frames: u32, fps: f64, bgr: (u8, u8, u8)) -> String {
    let path = dir.path().join(name).to_string_lossy().into_owned();
    let size = Size::new(64, 48);
    let fourcc = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G').expect("fourcc");
    let mut writer = videoio::VideoWriter::new(&path, fourcc, fps, size, true).expect("open video writer");
    assert!(writer.is_opened().expect("writer state"), "video writer failed to open {}", path);

    let frame = Mat::new_rows_cols_with_default(
        size.height, size.width, CV_8UC3,
        Scalar::new(bgr.0 as f64, bgr.1 as f64, bgr.2 as f64, 0.0),
    ).expect("solid frame");
    for _ in 0..frames {
        writer.write(&frame).expect("write frame");
    }
    writer.release().expect("release writer");
    path
}

/// Recognizer that never sees any words
pub struct BlankRecognizer;

impl TextRecognizer for BlankRecognizer {
    fn recognize(&mut self, _image: &Mat) -> Result<Vec<RecognizedWord>> {
        Ok(Vec::new())
    }
}

pub fn blank_recognizers() -> RecognizerFactory {
    Arc::new(|| Ok(Box::new(BlankRecognizer) as Box<dyn TextRecognizer>))
}

/// Detector that finds nothing in any frame
pub struct EmptyDetector {
    names: Vec<String>,
}

impl EmptyDetector {
    pub fn new() -> Self {
        Self { names: vec!["person".to_string(), "bicycle".to_string()] }
    }
}

impl ObjectDetector for EmptyDetector {
    fn class_names(&self) -> &[String] {
        &self.names
    }

    fn detect(&mut self, batch: &[Mat]) -> Result<Vec<Vec<Detection>>> {
        Ok(vec![Vec::new(); batch.len()])
    }
}
