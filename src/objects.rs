//! Person versus object dominance via YOLO detection
//!
//! Frames are sampled and downsized up front, then pushed through the detector
//! in fixed-size batches. Every detection above the confidence threshold counts
//! either as a person or as some other object.

use std::fs;
use std::path::Path;

use opencv::{
    core::{self, Mat, Rect, Scalar, Size, Vector},
    dnn, imgproc,
    prelude::*,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    common::{round2, AnalysisError, CancelFlag, Result},
    compute::{ComputeContext, Device},
    config::ObjectConfig,
    sampler::{FrameSampler, Resize},
};

/// Longest frame side kept before detection
pub const DETECTION_MAX_SIDE: i32 = 640;

/// YOLO network input edge
const INPUT_SIZE: i32 = 640;
/// Best-class score an anchor needs to enter NMS
const CANDIDATE_SCORE: f32 = 0.25;
const NMS_IOU: f32 = 0.45;
/// Box offset per class id so NMS never merges different classes
const CLASS_OFFSET: i32 = 4096;
/// Padding value around letterboxed frames
const LETTERBOX_GRAY: f64 = 114.0;

/// One detected instance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: i32,
    pub confidence: f32,
}

impl Detection {
    pub fn new(class_id: i32, confidence: f32) -> Self {
        Self { class_id, confidence }
    }
}

/// Batched object detection
pub trait ObjectDetector {
    /// Class-name table indexed by class id, possibly empty
    fn class_names(&self) -> &[String];

    /// Detections for every frame of `batch`, in batch order
    fn detect(&mut self, batch: &[Mat]) -> Result<Vec<Vec<Detection>>>;
}

/// Class id of "person" in the model's table, 0 when the table doesn't name it
pub fn resolve_person_class(class_names: &[String]) -> i32 {
    class_names
        .iter()
        .position(|name| name.trim().eq_ignore_ascii_case("person"))
        .map(|i| i as i32)
        .unwrap_or(0)
}

/// YOLOv8-style ONNX model run through OpenCV DNN
pub struct YoloDetector {
    net: dnn::Net,
    class_names: Vec<String>,
}

impl YoloDetector {
    /// Load an ONNX model and its `.names` sidecar onto `device`
    ///
    /// # Errors
    /// * `ModelLoad` - If the file is missing or OpenCV rejects it
    pub fn load(model_path: &Path, device: Device) -> Result<Self> {
        let model_name = model_path.display().to_string();
        if !model_path.is_file() {
            return Err(AnalysisError::model_load(model_name, "model file not found"));
        }

        let mut net = dnn::read_net_from_onnx(&model_name)
            .map_err(|e| AnalysisError::model_load(&model_name, e.to_string()))?;

        let (backend, target) = match device {
            Device::Cuda => (dnn::DNN_BACKEND_CUDA, dnn::DNN_TARGET_CUDA),
            Device::Auto | Device::Cpu => (dnn::DNN_BACKEND_OPENCV, dnn::DNN_TARGET_CPU),
        };
        net.set_preferable_backend(backend)
            .and_then(|_| net.set_preferable_target(target))
            .map_err(|e| AnalysisError::model_load(&model_name, e.to_string()))?;

        let class_names = load_class_names(&model_path.with_extension("names"))?;
        debug!("Loaded {} on {} with {} class names", model_name, device, class_names.len());

        Ok(Self { net, class_names })
    }
}

impl ObjectDetector for YoloDetector {
    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn detect(&mut self, batch: &[Mat]) -> Result<Vec<Vec<Detection>>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let images = batch.iter().map(letterbox).collect::<Result<Vector<Mat>>>()?;
        let blob = dnn::blob_from_images(
            &images,
            1.0 / 255.0,
            Size::new(INPUT_SIZE, INPUT_SIZE),
            Scalar::default(),
            true,
            false,
            core::CV_32F,
        )?;

        self.net.set_input_def(&blob)?;
        let output = self.net.forward_single_def()?;

        let dims: Vec<i32> = output.mat_size().iter().copied().collect();
        if dims.len() != 3 || dims[0] as usize != batch.len() || dims[1] <= 4 {
            return Err(AnalysisError::frame_error(0, format!("unexpected YOLO output shape {:?}", dims)));
        }
        let rows = dims[1] as usize;
        let anchors = dims[2] as usize;
        let classes = rows - 4;
        if !self.class_names.is_empty() && self.class_names.len() != classes {
            debug!("Model reports {} classes but {} names are loaded", classes, self.class_names.len());
        }

        let data = output.data_typed::<f32>()?;
        data.chunks_exact(rows * anchors)
            .map(|image| {
                let candidates = decode_candidates(image, classes, anchors, CANDIDATE_SCORE);
                suppress_overlaps(&candidates)
            })
            .collect()
    }
}

/// Scale `frame` to fit the network input and pad the rest with YOLO's gray
///
/// Keeps the aspect ratio, so wide frames are not squashed before detection.
fn letterbox(frame: &Mat) -> Result<Mat> {
    let (width, height) = (frame.cols(), frame.rows());
    let scale = INPUT_SIZE as f64 / width.max(height) as f64;
    let scaled_width = ((width as f64 * scale).round() as i32).clamp(1, INPUT_SIZE);
    let scaled_height = ((height as f64 * scale).round() as i32).clamp(1, INPUT_SIZE);

    let mut scaled = Mat::default();
    imgproc::resize(frame, &mut scaled, Size::new(scaled_width, scaled_height), 0.0, 0.0, imgproc::INTER_LINEAR)?;

    let pad_x = INPUT_SIZE - scaled_width;
    let pad_y = INPUT_SIZE - scaled_height;
    let mut padded = Mat::default();
    core::copy_make_border(
        &scaled,
        &mut padded,
        pad_y / 2,
        pad_y - pad_y / 2,
        pad_x / 2,
        pad_x - pad_x / 2,
        core::BORDER_CONSTANT,
        Scalar::all(LETTERBOX_GRAY),
    )?;
    Ok(padded)
}

/// A pre-NMS box in network input coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    bbox: Rect,
    detection: Detection,
}

/// Best-class candidates from one image's `[4 + classes, anchors]` output plane
fn decode_candidates(plane: &[f32], classes: usize, anchors: usize, min_score: f32) -> Vec<Candidate> {
    let value = |row: usize, anchor: usize| plane[row * anchors + anchor];

    (0..anchors)
        .filter_map(|anchor| {
            let (class_id, score) = (0..classes)
                .map(|class| (class, value(4 + class, anchor)))
                .max_by(|a, b| a.1.total_cmp(&b.1))?;
            if score < min_score {
                return None;
            }

            let (cx, cy) = (value(0, anchor), value(1, anchor));
            let (w, h) = (value(2, anchor), value(3, anchor));
            let bbox = Rect::new((cx - w / 2.0) as i32, (cy - h / 2.0) as i32, w as i32, h as i32);
            Some(Candidate { bbox, detection: Detection::new(class_id as i32, score) })
        })
        .collect()
}

/// Class-aware non-maximum suppression
fn suppress_overlaps(candidates: &[Candidate]) -> Result<Vec<Detection>> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let boxes: Vector<Rect> = candidates
        .iter()
        .map(|c| {
            let mut shifted = c.bbox;
            shifted.x += c.detection.class_id * CLASS_OFFSET;
            shifted
        })
        .collect();
    let scores: Vector<f32> = candidates.iter().map(|c| c.detection.confidence).collect();

    let mut keep = Vector::<i32>::new();
    dnn::nms_boxes_def(&boxes, &scores, CANDIDATE_SCORE, NMS_IOU, &mut keep)?;

    Ok(keep.iter().map(|i| candidates[i as usize].detection).collect())
}

/// One class name per line; a missing file gives an empty table
fn load_class_names(path: &Path) -> Result<Vec<String>> {
    if !path.is_file() {
        debug!("No class-name table at {}", path.display());
        return Ok(Vec::new());
    }

    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

/// Load the configured YOLO model, trying the fallback once if it fails
///
/// # Errors
/// * `ModelLoad` - Naming the fallback when both fail, or the preferred model when there is no fallback
pub fn load_detector_with_fallback(config: &ObjectConfig, device: Device) -> Result<YoloDetector> {
    load_with_fallback(config, device, YoloDetector::load)
}

/// Run `load` on the preferred model, then at most once on the fallback
pub fn load_with_fallback<D, F>(config: &ObjectConfig, device: Device, load: F) -> Result<D>
where
    F: Fn(&Path, Device) -> Result<D>,
{
    let primary_error = match load(&config.model, device) {
        Ok(detector) => {
            info!("Object model: {} on {}", config.model.display(), device);
            return Ok(detector);
        }
        Err(e) => e,
    };

    let Some(fallback) = config.fallback_model.as_deref() else {
        return Err(primary_error);
    };

    warn!("{}; trying fallback model {}", primary_error, fallback.display());
    let detector = load(fallback, device)?;
    info!("Object model: {} on {} (fallback)", fallback.display(), device);
    Ok(detector)
}

/// Person and object counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionTally {
    pub persons: usize,
    pub objects: usize,
}

impl DetectionTally {
    /// Count detections scoring strictly above `threshold`
    pub fn count(detections: &[Detection], threshold: f32, person_class: i32) -> Self {
        detections
            .iter()
            .filter(|d| d.confidence > threshold)
            .fold(Self::default(), |mut tally, d| {
                if d.class_id == person_class {
                    tally.persons += 1;
                } else {
                    tally.objects += 1;
                }
                tally
            })
    }
}

impl std::ops::AddAssign for DetectionTally {
    fn add_assign(&mut self, other: Self) {
        self.persons += other.persons;
        self.objects += other.objects;
    }
}

/// Object dominance summary for one video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectDominanceStats {
    /// `persons / (persons + objects)`, two decimals, 0 without detections
    pub person_object_ratio: f64,
    pub total_persons: usize,
    pub total_objects: usize,
    pub sampled_frames: usize,
}

impl ObjectDominanceStats {
    pub fn from_tally(tally: DetectionTally, sampled_frames: usize) -> Self {
        let total = tally.persons + tally.objects;
        let ratio = if total > 0 { tally.persons as f64 / total as f64 } else { 0.0 };

        Self {
            person_object_ratio: round2(ratio),
            total_persons: tally.persons,
            total_objects: tally.objects,
            sampled_frames,
        }
    }
}

/// Samples frames and counts persons against other detected objects
pub struct ObjectDominanceAnalyzer {
    config: ObjectConfig,
    detector: Box<dyn ObjectDetector>,
    cancel: CancelFlag,
}

impl ObjectDominanceAnalyzer {
    /// Load the YOLO model on the device the compute context allows
    pub fn new(config: ObjectConfig, compute: &ComputeContext, cancel: CancelFlag) -> Result<Self> {
        config.validate()?;
        let device = config.device.resolve(compute);
        let detector = load_detector_with_fallback(&config, device)?;
        Ok(Self { config, detector: Box::new(detector), cancel })
    }

    pub fn with_detector(config: ObjectConfig, detector: Box<dyn ObjectDetector>, cancel: CancelFlag) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, detector, cancel })
    }

    #[instrument(skip(self))]
    pub fn extract(&mut self, video_path: &str) -> Result<ObjectDominanceStats> {
        let sampler = FrameSampler::open(
            video_path,
            self.config.sample_rate,
            Resize::MaxSide(DETECTION_MAX_SIDE),
            self.cancel.clone(),
        )?;
        info!("Object analysis: sample rate 1/{}, confidence > {}, batch {}",
              self.config.sample_rate, self.config.confidence, self.config.batch_size);

        let frames = sampler
            .map(|sample| sample.map(|s| s.frame))
            .collect::<Result<Vec<Mat>>>()?;

        let tally = self.tally_frames(&frames)?;
        let stats = ObjectDominanceStats::from_tally(tally, frames.len());

        info!("Object analysis complete: ratio {:.2} ({} persons / {} objects) over {} frames",
              stats.person_object_ratio, stats.total_persons, stats.total_objects, stats.sampled_frames);
        Ok(stats)
    }

    /// Run detection batch by batch; a batch that fails as a whole is retried frame by frame
    fn tally_frames(&mut self, frames: &[Mat]) -> Result<DetectionTally> {
        let mut tally = DetectionTally::default();
        if frames.is_empty() {
            return Ok(tally);
        }

        let person_class = resolve_person_class(self.detector.class_names());
        let batch_count = frames.len().div_ceil(self.config.batch_size);

        for (n, batch) in frames.chunks(self.config.batch_size).enumerate() {
            self.cancel.check()?;

            let per_frame = match self.detector.detect(batch) {
                Ok(per_frame) if per_frame.len() == batch.len() => per_frame,
                Ok(per_frame) => {
                    debug!("Batch {}/{} returned {} results for {} frames, retrying one frame at a time",
                           n + 1, batch_count, per_frame.len(), batch.len());
                    self.detect_each(batch)?
                }
                Err(e) if batch.len() > 1 => {
                    debug!("Batch {}/{} failed ({}), retrying one frame at a time", n + 1, batch_count, e);
                    self.detect_each(batch)?
                }
                Err(e) => {
                    warn!("Detection failed on batch {}/{}, skipping it: {}", n + 1, batch_count, e);
                    continue;
                }
            };

            for detections in &per_frame {
                tally += DetectionTally::count(detections, self.config.confidence, person_class);
            }
            debug!("Batch {}/{}: {} persons, {} objects so far",
                   n + 1, batch_count, tally.persons, tally.objects);
        }

        Ok(tally)
    }

    /// Single-frame detection for models that only accept a batch of one
    fn detect_each(&mut self, batch: &[Mat]) -> Result<Vec<Vec<Detection>>> {
        let mut per_frame = Vec::with_capacity(batch.len());

        for frame in batch {
            self.cancel.check()?;
            match self.detector.detect(std::slice::from_ref(frame)) {
                Ok(mut detections) if detections.len() == 1 => per_frame.append(&mut detections),
                Ok(detections) => warn!("Detector returned {} results for one frame, skipping it", detections.len()),
                Err(e) => warn!("Detection failed on a single frame, skipping it: {}", e),
            }
        }

        Ok(per_frame)
    }
}

impl std::fmt::Debug for ObjectDominanceAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectDominanceAnalyzer")
            .field("config", &self.config)
            .field("classes", &self.detector.class_names().len())
            .finish()
    }
}
