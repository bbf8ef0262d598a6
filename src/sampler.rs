//! Stride-based frame sampling shared by every analyzer
//!
//! A `FrameSampler` decodes a video sequentially and yields every Nth frame
//! (0-based indices `0, k, 2k, ...`), optionally resized. Skipped frames are
//! grabbed but never decoded into a buffer.

use opencv::{core::{Mat, Size}, imgproc, prelude::*};
use tracing::{debug, instrument};
use crate::{
    common::{AnalysisError, CancelFlag, Result},
    video_stream::VideoStream,
};

/// How a sampled frame is resized before it is handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resize {
    /// Keep the decoded size
    None,
    /// Integer-divide both dimensions
    Divisor(i32),
    /// Scale to this width, preserving aspect ratio
    Width(i32),
    /// Scale down so the longer side equals this value; smaller frames are untouched
    MaxSide(i32),
}

impl Resize {
    /// Target size for a `width` x `height` frame, or `None` when no resize is needed
    pub fn target_size(&self, width: i32, height: i32) -> Option<(i32, i32)> {
        let target = match *self {
            Resize::None => return None,
            Resize::Divisor(divisor) if divisor <= 1 => return None,
            Resize::Divisor(divisor) => (width / divisor, height / divisor),
            Resize::Width(target_width) => {
                let scale = target_width as f64 / width as f64;
                (target_width, (height as f64 * scale) as i32)
            }
            Resize::MaxSide(max_side) => {
                let longer = width.max(height);
                if longer <= max_side {
                    return None;
                }
                let scale = max_side as f64 / longer as f64;
                ((width as f64 * scale) as i32, (height as f64 * scale) as i32)
            }
        };

        let target = (target.0.max(1), target.1.max(1));
        if target == (width, height) {
            None
        } else {
            Some(target)
        }
    }

    fn apply(&self, frame: Mat, index: u32) -> Result<Mat> {
        let Some((width, height)) = self.target_size(frame.cols(), frame.rows()) else {
            return Ok(frame);
        };

        let mut resized = Mat::default();
        imgproc::resize(&frame, &mut resized, Size::new(width, height), 0.0, 0.0, imgproc::INTER_LINEAR)
            .map_err(|e| AnalysisError::frame_error(index, format!("resize failed: {}", e)))?;
        Ok(resized)
    }
}

/// A frame selected by the sampler, owned by whoever consumes it
#[derive(Debug)]
pub struct SampledFrame {
    pub index: u32,
    pub frame: Mat,
}

/// Lazy, forward-only iterator over the sampled frames of one video
pub struct FrameSampler {
    stream: VideoStream,
    stride: u32,
    resize: Resize,
    cancel: CancelFlag,
    next_index: u32,
    finished: bool,
}

impl FrameSampler {
    /// Open `path` and sample every `stride`-th frame
    ///
    /// # Errors
    /// * `InvalidConfig` - If stride is 0
    /// * `MediaOpen` - If the video cannot be opened
    #[instrument(skip(cancel))]
    pub fn open(path: &str, stride: u32, resize: Resize, cancel: CancelFlag) -> Result<Self> {
        if stride == 0 {
            return Err(AnalysisError::config_error("sample stride must be at least 1"));
        }

        let stream = VideoStream::open(path)?;
        Ok(Self {
            stream,
            stride,
            resize,
            cancel,
            next_index: 0,
            finished: false,
        })
    }

    /// The underlying stream, for fps and frame count
    pub fn stream(&self) -> &VideoStream {
        &self.stream
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    fn fail(&mut self, error: AnalysisError) -> Option<Result<SampledFrame>> {
        self.finished = true;
        Some(Err(error))
    }
}

impl Iterator for FrameSampler {
    type Item = Result<SampledFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            if let Err(e) = self.cancel.check() {
                return self.fail(e);
            }

            let index = self.next_index;
            match self.stream.grab() {
                Ok(true) => {}
                Ok(false) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => return self.fail(e),
            }
            self.next_index += 1;

            if self.next_index % 1000 == 0 {
                debug!("Decoded {}/{} frames ({:.1}%)",
                       self.next_index, self.stream.frame_count(), self.stream.progress_percent());
            }

            if index % self.stride != 0 {
                continue;
            }

            return match self.stream.retrieve() {
                Ok(Some(frame)) => match self.resize.apply(frame, index) {
                    Ok(frame) => Some(Ok(SampledFrame { index, frame })),
                    Err(e) => self.fail(e),
                },
                // An undecodable frame ends the stream, like a failed read
                Ok(None) => {
                    self.finished = true;
                    None
                }
                Err(e) => self.fail(e),
            };
        }
        None
    }
}

impl std::fmt::Debug for FrameSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSampler")
            .field("stream", &self.stream)
            .field("stride", &self.stride)
            .field("resize", &self.resize)
            .field("next_index", &self.next_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{solid_frame, write_video, TestVideo};

    fn gradient_video(name: &str, frames: u32) -> TestVideo {
        let video = TestVideo::new(name);
        write_video(video.path(), frames, 25.0, (48, 32), |i| {
            let level = (i * 20) as u8;
            solid_frame((48, 32), (level, level, level))
        });
        video
    }

    fn sampled_indices(path: &str, stride: u32) -> Vec<u32> {
        FrameSampler::open(path, stride, Resize::None, CancelFlag::new())
            .unwrap()
            .map(|sample| sample.unwrap().index)
            .collect()
    }

    #[test]
    fn test_stride_one_selects_every_frame() {
        let video = gradient_video("every.avi", 10);
        assert_eq!(sampled_indices(video.path(), 1), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_stride_selects_multiples_only() {
        let video = gradient_video("stride.avi", 10);
        assert_eq!(sampled_indices(video.path(), 3), vec![0, 3, 6, 9]);
        assert_eq!(sampled_indices(video.path(), 4), vec![0, 4, 8]);
        assert_eq!(sampled_indices(video.path(), 20), vec![0]);
    }

    #[test]
    fn test_sampled_frame_content_matches_index() {
        let video = gradient_video("content.avi", 10);
        let sampler = FrameSampler::open(video.path(), 3, Resize::None, CancelFlag::new()).unwrap();

        for sample in sampler {
            let sample = sample.unwrap();
            let pixel = sample.frame.at_2d::<opencv::core::Vec3b>(16, 24).unwrap();
            let expected = (sample.index * 20) as i32;
            assert!((pixel[0] as i32 - expected).abs() <= 4,
                    "frame {} has level {}", sample.index, pixel[0]);
        }
    }

    #[test]
    fn test_zero_stride_rejected() {
        let video = gradient_video("zero.avi", 2);
        let result = FrameSampler::open(video.path(), 0, Resize::None, CancelFlag::new());
        assert!(matches!(result.unwrap_err(), AnalysisError::InvalidConfig { .. }));
    }

    #[test]
    fn test_missing_file_is_media_open_error() {
        let result = FrameSampler::open("missing.avi", 1, Resize::None, CancelFlag::new());
        assert!(matches!(result.unwrap_err(), AnalysisError::MediaOpen { .. }));
    }

    #[test]
    fn test_cancelled_sampler_yields_interrupted() {
        let video = gradient_video("cancel.avi", 5);
        let cancel = CancelFlag::new();
        let mut sampler = FrameSampler::open(video.path(), 1, Resize::None, cancel.clone()).unwrap();

        assert!(sampler.next().unwrap().is_ok());
        cancel.cancel();
        assert!(sampler.next().unwrap().unwrap_err().is_interrupted());
        assert!(sampler.next().is_none());
    }

    #[test]
    fn test_resize_applied_to_samples() {
        let video = gradient_video("resize.avi", 2);
        let sampler = FrameSampler::open(video.path(), 1, Resize::Divisor(2), CancelFlag::new()).unwrap();
        for sample in sampler {
            let frame = sample.unwrap().frame;
            assert_eq!((frame.cols(), frame.rows()), (24, 16));
        }
    }

    #[test]
    fn test_resize_target_sizes() {
        assert_eq!(Resize::None.target_size(1920, 1080), None);
        assert_eq!(Resize::Divisor(1).target_size(1920, 1080), None);
        assert_eq!(Resize::Divisor(2).target_size(1921, 1081), Some((960, 540)));
        assert_eq!(Resize::Divisor(4).target_size(2, 2), Some((1, 1)));

        assert_eq!(Resize::Width(640).target_size(1920, 1080), Some((640, 360)));
        assert_eq!(Resize::Width(640).target_size(320, 240), Some((640, 480)));
        assert_eq!(Resize::Width(640).target_size(640, 480), None);

        assert_eq!(Resize::MaxSide(640).target_size(1920, 1080), Some((640, 360)));
        assert_eq!(Resize::MaxSide(640).target_size(1080, 1920), Some((360, 640)));
        assert_eq!(Resize::MaxSide(640).target_size(640, 480), None);
        assert_eq!(Resize::MaxSide(640).target_size(320, 240), None);
    }
}
