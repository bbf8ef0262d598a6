//! On-screen text presence via OCR
//!
//! Sampled frames are collected first, then recognised in parallel on a
//! dedicated worker pool. Per-frame results fold through an order-independent
//! tally, so worker scheduling never changes the report. A frame whose OCR
//! fails simply counts as "no text".

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use opencv::{
    core::{self, Mat, Point, Rect, Size, Vector},
    imgproc,
    prelude::*,
    text,
};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    common::{round2, AnalysisError, CancelFlag, Result},
    config::TextConfig,
    sampler::{FrameSampler, Resize, SampledFrame},
};

/// How many keywords the report keeps
pub const TOP_KEYWORDS: usize = 10;

thread_local! {
    /// Recognizer owned by the current OCR worker thread, created on first use
    static WORKER_RECOGNIZER: RefCell<Option<WorkerRecognizer>> = const { RefCell::new(None) };
}

enum WorkerRecognizer {
    Ready(Box<dyn TextRecognizer>),
    /// The factory failed on this thread; its frames count as "no text"
    Unavailable,
}

/// One word reported by a recognizer, confidence on a 0-100 scale
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedWord {
    pub text: String,
    pub confidence: f32,
}

impl RecognizedWord {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self { text: text.into(), confidence }
    }
}

/// Word-level text recognition on a preprocessed (binarised) frame
pub trait TextRecognizer {
    fn recognize(&mut self, image: &Mat) -> Result<Vec<RecognizedWord>>;
}

/// Builds one recognizer per OCR worker
pub type RecognizerFactory = Arc<dyn Fn() -> Result<Box<dyn TextRecognizer>> + Send + Sync>;

/// Tesseract through OpenCV's text module, single-block page segmentation
pub struct TesseractRecognizer {
    ocr: core::Ptr<text::OCRTesseract>,
}

impl TesseractRecognizer {
    /// # Errors
    /// * `ModelLoad` - If Tesseract or the language data can't be initialised
    pub fn new(tessdata: Option<&Path>, language: &str) -> Result<Self> {
        let datapath = tessdata.map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();

        let ocr = text::OCRTesseract::create(&datapath, language, "", text::OEM_DEFAULT, text::PSM_SINGLE_BLOCK)
            .map_err(|e| AnalysisError::model_load(format!("tesseract/{}", language), e.to_string()))?;

        Ok(Self { ocr })
    }

    /// Factory creating a fresh recognizer on each worker
    pub fn factory(tessdata: Option<PathBuf>, language: String) -> RecognizerFactory {
        Arc::new(move || {
            let recognizer = TesseractRecognizer::new(tessdata.as_deref(), &language)?;
            Ok(Box::new(recognizer) as Box<dyn TextRecognizer>)
        })
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&mut self, image: &Mat) -> Result<Vec<RecognizedWord>> {
        let mut image = image.clone();
        let mut output = String::new();
        let mut rects = Vector::<Rect>::new();
        let mut words = Vector::<String>::new();
        let mut confidences = Vector::<f32>::new();

        self.ocr.run(
            &mut image,
            &mut output,
            &mut rects,
            &mut words,
            &mut confidences,
            text::OCR_LEVEL_WORD,
        )?;

        Ok(words
            .iter()
            .zip(confidences.iter())
            .map(|(word, confidence)| RecognizedWord::new(word, confidence))
            .collect())
    }
}

/// Grayscale, Otsu binarisation, then a 2x2 close to bridge broken strokes
pub fn binarize(frame: &Mat) -> Result<Mat> {
    let gray = if frame.channels() == 1 {
        frame.clone()
    } else {
        let mut gray = Mat::default();
        imgproc::cvt_color_def(frame, &mut gray, imgproc::COLOR_BGR2GRAY)?;
        gray
    };

    let mut binary = Mat::default();
    imgproc::threshold(&gray, &mut binary, 0.0, 255.0, imgproc::THRESH_BINARY | imgproc::THRESH_OTSU)?;

    let kernel = imgproc::get_structuring_element(imgproc::MORPH_RECT, Size::new(2, 2), Point::new(-1, -1))?;
    let mut closed = Mat::default();
    imgproc::morphology_ex_def(&binary, &mut closed, imgproc::MORPH_CLOSE, &kernel)?;
    Ok(closed)
}

/// Normalise a recognised word into a keyword, or drop it
///
/// The trimmed word must be longer than 2 characters and meet `min_confidence`;
/// the keyword is its lowercase form without non-word characters.
pub fn clean_keyword(word: &str, confidence: f32, min_confidence: f32) -> Option<String> {
    let trimmed = word.trim();
    if trimmed.chars().count() <= 2 || confidence < min_confidence {
        return None;
    }

    let keyword: String = trimmed
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect();

    (!keyword.is_empty()).then_some(keyword)
}

/// OCR outcome for one sampled frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameText {
    pub index: u32,
    pub has_text: bool,
    pub keywords: Vec<String>,
}

impl FrameText {
    pub fn empty(index: u32) -> Self {
        Self { index, has_text: false, keywords: Vec::new() }
    }

    pub fn from_words(index: u32, words: &[RecognizedWord], min_confidence: f32) -> Self {
        let keywords: Vec<String> = words
            .iter()
            .filter_map(|w| clean_keyword(&w.text, w.confidence, min_confidence))
            .collect();

        Self { index, has_text: !keywords.is_empty(), keywords }
    }
}

/// A keyword and how often it was seen
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordCount {
    pub word: String,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KeywordEntry {
    count: usize,
    /// (frame index, word position) of the earliest sighting
    first_seen: (u32, usize),
}

/// Keyword frequency counter whose merge is commutative and associative
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordCounter {
    entries: HashMap<String, KeywordEntry>,
}

impl KeywordCounter {
    pub fn add(&mut self, word: &str, first_seen: (u32, usize)) {
        let entry = self.entries.entry(word.to_string()).or_insert(KeywordEntry { count: 0, first_seen });
        entry.count += 1;
        entry.first_seen = entry.first_seen.min(first_seen);
    }

    pub fn merge(mut self, other: KeywordCounter) -> Self {
        for (word, theirs) in other.entries {
            self.entries
                .entry(word)
                .and_modify(|ours| {
                    ours.count += theirs.count;
                    ours.first_seen = ours.first_seen.min(theirs.first_seen);
                })
                .or_insert(theirs);
        }
        self
    }

    /// The `n` most frequent keywords, ties in first-seen order
    pub fn most_common(&self, n: usize) -> Vec<KeywordCount> {
        let mut entries: Vec<(&String, &KeywordEntry)> = self.entries.iter().collect();
        entries.sort_by(|a, b| b.1.count.cmp(&a.1.count).then(a.1.first_seen.cmp(&b.1.first_seen)));

        entries
            .into_iter()
            .take(n)
            .map(|(word, entry)| KeywordCount { word: word.clone(), count: entry.count })
            .collect()
    }

    pub fn unique_words(&self) -> usize {
        self.entries.len()
    }
}

/// Running totals over recognised frames
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextTally {
    pub text_frames: usize,
    pub keywords: KeywordCounter,
}

impl TextTally {
    pub fn add(mut self, frame: FrameText) -> Self {
        if frame.has_text {
            self.text_frames += 1;
            for (position, keyword) in frame.keywords.iter().enumerate() {
                self.keywords.add(keyword, (frame.index, position));
            }
        }
        self
    }

    pub fn merge(self, other: TextTally) -> Self {
        Self {
            text_frames: self.text_frames + other.text_frames,
            keywords: self.keywords.merge(other.keywords),
        }
    }
}

/// Text presence summary for one video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextStats {
    /// `text_frames / sampled_frames`, 0 when nothing was sampled
    pub text_present_ratio: f64,
    pub text_frames: usize,
    pub sampled_frames: usize,
    pub top_keywords: Vec<KeywordCount>,
    pub processing_time_seconds: f64,
}

impl TextStats {
    pub fn from_tally(tally: &TextTally, sampled_frames: usize, elapsed_seconds: f64) -> Self {
        let text_present_ratio = if sampled_frames > 0 {
            tally.text_frames as f64 / sampled_frames as f64
        } else {
            0.0
        };

        Self {
            text_present_ratio,
            text_frames: tally.text_frames,
            sampled_frames,
            top_keywords: tally.keywords.most_common(TOP_KEYWORDS),
            processing_time_seconds: round2(elapsed_seconds),
        }
    }
}

/// Samples frames and measures how often recognisable text is on screen
pub struct TextAnalyzer {
    config: TextConfig,
    factory: RecognizerFactory,
    cancel: CancelFlag,
}

impl TextAnalyzer {
    /// Analyzer backed by Tesseract
    pub fn new(config: TextConfig, cancel: CancelFlag) -> Result<Self> {
        let factory = TesseractRecognizer::factory(config.tessdata.clone(), config.language.clone());
        Self::with_recognizer_factory(config, factory, cancel)
    }

    pub fn with_recognizer_factory(config: TextConfig, factory: RecognizerFactory, cancel: CancelFlag) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, factory, cancel })
    }

    #[instrument(skip(self))]
    pub fn extract(&self, video_path: &str) -> Result<TextStats> {
        let started = Instant::now();

        let sampler = FrameSampler::open(
            video_path,
            self.config.sample_rate,
            Resize::Width(self.config.downscale_width as i32),
            self.cancel.clone(),
        )?;
        info!("Text analysis: sample rate 1/{}, downscale width {}px, {:.2}s",
              self.config.sample_rate, self.config.downscale_width, sampler.stream().duration_seconds());

        let frames = sampler.collect::<Result<Vec<SampledFrame>>>()?;
        let sampled_frames = frames.len();

        let tally = if frames.is_empty() {
            TextTally::default()
        } else {
            self.recognize_all(frames)?
        };

        let stats = TextStats::from_tally(&tally, sampled_frames, started.elapsed().as_secs_f64());
        info!("Text analysis complete: ratio {:.2} ({}/{}), {} unique keywords, {:.2}s",
              stats.text_present_ratio, stats.text_frames, stats.sampled_frames,
              tally.keywords.unique_words(), stats.processing_time_seconds);
        Ok(stats)
    }

    /// OCR every frame on a pool of `workers` threads and fold the results
    fn recognize_all(&self, frames: Vec<SampledFrame>) -> Result<TextTally> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .thread_name(|i| format!("ocr-worker-{}", i))
            .build()
            .map_err(|e| AnalysisError::config_error(format!("cannot start OCR workers: {}", e)))?;

        info!("OCR on {} frames with {} workers", frames.len(), self.config.workers);

        let factory = &self.factory;
        let cancel = &self.cancel;
        let min_confidence = self.config.min_confidence;

        let tally = pool.install(|| {
            frames
                .into_par_iter()
                .map(|sample| {
                    if cancel.is_cancelled() {
                        return FrameText::empty(sample.index);
                    }
                    with_worker_recognizer(factory, |recognizer| recognize_frame(recognizer, &sample, min_confidence))
                })
                .fold(TextTally::default, TextTally::add)
                .reduce(TextTally::default, TextTally::merge)
        });

        // Engines live in thread-locals; release them before the pool goes away
        pool.broadcast(|_| WORKER_RECOGNIZER.with(|slot| {
            slot.borrow_mut().take();
        }));

        self.cancel.check()?;
        Ok(tally)
    }
}

/// Run `f` with this thread's recognizer, creating it through `factory` the first time
fn with_worker_recognizer<T>(
    factory: &RecognizerFactory,
    f: impl FnOnce(Option<&mut dyn TextRecognizer>) -> T,
) -> T {
    WORKER_RECOGNIZER.with(|slot| {
        let mut slot = slot.borrow_mut();
        let worker = slot.get_or_insert_with(|| match factory() {
            Ok(recognizer) => WorkerRecognizer::Ready(recognizer),
            Err(e) => {
                warn!("OCR worker could not create a recognizer: {}", e);
                WorkerRecognizer::Unavailable
            }
        });
        match worker {
            WorkerRecognizer::Ready(recognizer) => {
                let recognizer: &mut dyn TextRecognizer = recognizer.as_mut();
                f(Some(recognizer))
            }
            WorkerRecognizer::Unavailable => f(None),
        }
    })
}

fn recognize_frame(
    recognizer: Option<&mut dyn TextRecognizer>,
    sample: &SampledFrame,
    min_confidence: f32,
) -> FrameText {
    let Some(recognizer) = recognizer else {
        return FrameText::empty(sample.index);
    };

    match binarize(&sample.frame).and_then(|image| recognizer.recognize(&image)) {
        Ok(words) => {
            let frame_text = FrameText::from_words(sample.index, &words, min_confidence);
            debug!("Frame {}: {} words, {} keywords", sample.index, words.len(), frame_text.keywords.len());
            frame_text
        }
        Err(e) => {
            warn!("OCR failed on frame {}, counting it as no text: {}", sample.index, e);
            FrameText::empty(sample.index)
        }
    }
}

impl std::fmt::Debug for TextAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextAnalyzer")
            .field("config", &self.config)
            .finish()
    }
}
