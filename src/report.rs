//! Feature report persisted per video

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    common::Result,
    motion::MotionStats,
    objects::ObjectDominanceStats,
    shot_cuts::ShotCutStats,
    text::TextStats,
};

/// File name of the report inside the per-video results directory
pub const REPORT_FILE_NAME: &str = "output.json";

/// All four feature groups for one video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureReport {
    pub video_file: String,
    pub features: Features,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Features {
    pub shot_cuts: ShotCutStats,
    pub motion: MotionStats,
    pub text: TextStats,
    pub object_dominance: ObjectDominanceStats,
}

impl FeatureReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// `<results_dir>/<video stem>/output.json`
pub fn report_path(results_dir: &Path, video_path: &Path) -> PathBuf {
    let stem = video_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());

    results_dir.join(stem).join(REPORT_FILE_NAME)
}

/// Write `report` to `path` through a temporary sibling, so readers never see a partial file
pub fn write_report(report: &FeatureReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = report.to_json()?;
    let tmp_path = path.with_extension("json.tmp");
    debug!("Writing report to {}", tmp_path.display());

    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, path)?;

    info!("Report saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::SceneBoundary,
        motion::MotionSample,
        objects::DetectionTally,
        text::TextTally,
    };

    fn sample_report() -> FeatureReport {
        let scenes: Vec<SceneBoundary> = crate::shot_cuts::build_scene_list(&[], 300, 30.0);
        FeatureReport {
            video_file: "videos/clip.mp4".to_string(),
            features: Features {
                shot_cuts: ShotCutStats::from_scenes(&scenes, 10.0),
                motion: MotionStats::summarize(&[] as &[MotionSample], 1),
                text: TextStats::from_tally(&TextTally::default(), 150, 0.5),
                object_dominance: ObjectDominanceStats::from_tally(DetectionTally::default(), 60),
            },
        }
    }

    #[test]
    fn test_report_path_uses_video_stem() {
        let path = report_path(Path::new("results"), Path::new("videos/My Clip.final.mp4"));
        assert_eq!(path, PathBuf::from("results/My Clip.final/output.json"));
    }

    #[test]
    fn test_report_has_exactly_four_feature_groups() {
        let value = serde_json::to_value(sample_report()).unwrap();
        let features = value["features"].as_object().unwrap();

        let mut keys: Vec<&str> = features.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["motion", "object_dominance", "shot_cuts", "text"]);
        assert_eq!(value["video_file"], "videos/clip.mp4");
        assert_eq!(value["features"]["motion"]["motion_intensity"], "static");
    }

    #[test]
    fn test_json_is_two_space_indented() {
        let json = sample_report().to_json().unwrap();
        assert!(json.starts_with("{\n  \"video_file\""));
    }

    #[test]
    fn test_write_report_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = report_path(&dir.path().join("results"), Path::new("clip.mp4"));

        write_report(&sample_report(), &path).unwrap();

        let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["features"]["shot_cuts"]["scene_count"], 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_write_report_overwrites_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip").join(REPORT_FILE_NAME);

        write_report(&sample_report(), &path).unwrap();
        let mut second = sample_report();
        second.video_file = "other.mp4".to_string();
        write_report(&second, &path).unwrap();

        let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["video_file"], "other.mp4");
    }
}
