//! Synthetic video fixtures for unit tests.

use opencv::{core::{Mat, Scalar, Size, CV_8UC3}, prelude::*, videoio};
use tempfile::TempDir;

/// A video path inside a private temporary directory, removed on drop
pub struct TestVideo {
    _dir: TempDir,
    path: String,
}

impl TestVideo {
    pub fn new(file_name: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join(file_name).to_string_lossy().into_owned();
        Self { _dir: dir, path }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Write an MJPG video whose frame `i` is produced by `frame_at(i)`
pub fn write_video(path: &str, frames: u32, fps: f64, size: (i32, i32), frame_at: impl Fn(u32) -> Mat) {
    let fourcc = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G').expect("fourcc");
    let mut writer = videoio::VideoWriter::new(path, fourcc, fps, Size::new(size.0, size.1), true)
        .expect("open video writer");
    assert!(writer.is_opened().expect("writer state"), "video writer failed to open {}", path);

    for i in 0..frames {
        writer.write(&frame_at(i)).expect("write frame");
    }
    writer.release().expect("release writer");
}

/// Write a video where every frame is one solid BGR color
pub fn write_solid_video(path: &str, frames: u32, fps: f64, size: (i32, i32), bgr: (u8, u8, u8)) {
    write_video(path, frames, fps, size, |_| solid_frame(size, bgr));
}

pub fn solid_frame(size: (i32, i32), bgr: (u8, u8, u8)) -> Mat {
    Mat::new_rows_cols_with_default(
        size.1, size.0, CV_8UC3, Scalar::new(bgr.0 as f64, bgr.1 as f64, bgr.2 as f64, 0.0),
    ).expect("solid frame")
}
