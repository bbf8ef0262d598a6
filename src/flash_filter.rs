//! Minimum scene length enforcement for cut candidates
//!
//! A frame whose content score crosses the threshold is only a candidate. The
//! filter confirms it when enough frames have passed since the previous cut,
//! which keeps flashes and flicker from splitting a scene.

use tracing::{debug, trace};
use crate::common::FrameTimecode;

/// Suppresses cut candidates that arrive within `min_scene_length` frames of the last cut
///
/// The first frame offered to the filter acts as the initial reference, so no
/// cut is confirmed before `min_scene_length` frames into the video.
#[derive(Debug)]
pub struct FlashFilter {
    min_scene_length: u32,
    last_cut_frame: Option<u32>,
}

impl FlashFilter {
    /// # Panics
    /// Panics if min_scene_length is 0
    pub fn new(min_scene_length: u32) -> Self {
        assert!(min_scene_length > 0, "Minimum scene length must be positive, got: {}", min_scene_length);

        Self {
            min_scene_length,
            last_cut_frame: None,
        }
    }

    /// Offer one frame and learn whether it is a confirmed cut
    pub fn filter(&mut self, timecode: &FrameTimecode, above_threshold: bool) -> bool {
        let current_frame = timecode.frame_number();
        let reference = *self.last_cut_frame.get_or_insert(current_frame);

        trace!("Filter input: frame={}, above_threshold={}", current_frame, above_threshold);

        if !above_threshold {
            return false;
        }

        let frames_since_last = current_frame.saturating_sub(reference);
        if frames_since_last < self.min_scene_length {
            debug!("Suppressing cut at frame {} (only {} frames since {})",
                   current_frame, frames_since_last, reference);
            return false;
        }

        self.last_cut_frame = Some(current_frame);
        debug!("Scene cut confirmed at frame {}", current_frame);
        true
    }

}
