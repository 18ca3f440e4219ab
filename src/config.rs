use crate::{engine::Thresholds, error::Error};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

/// Settings file picked up from the working directory when none is given.
pub(crate) const DEFAULT_CONFIG_FILE: &str = "form-score.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Settings {
    /// Poses scoring below this are treated as not detected.
    pub(crate) min_pose_score: f32,
    /// Joints whose landmarks score below this are not measured.
    pub(crate) min_keypoint_score: f32,
    pub(crate) detector_timeout_ms: u64,
    pub(crate) max_image_bytes: usize,
    pub(crate) session_log: Option<PathBuf>,
    pub(crate) detector: Option<DetectorSettings>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DetectorSettings {
    pub(crate) program: PathBuf,
    #[serde(default)]
    pub(crate) args: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_pose_score: 0.5,
            min_keypoint_score: 0.3,
            detector_timeout_ms: 5_000,
            max_image_bytes: 10 * 1024 * 1024,
            session_log: None,
            detector: None,
        }
    }
}

fn unit_interval(name: &'static str, value: f32) -> Result<(), Error> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidSetting(
            name,
            format!("{} is not within [0, 1]", value),
        ))
    }
}

impl Settings {
    pub(crate) fn from_file(path: &Path) -> Result<Self, Error> {
        let contents =
            fs::read_to_string(path).map_err(|e| Error::ReadConfig(e, path.to_owned()))?;
        toml::from_str(&contents).map_err(|e| Error::ParseConfig(e, path.to_owned()))
    }

    /// Load `path`, falling back to [`DEFAULT_CONFIG_FILE`] in the working directory and then to
    /// the built-in defaults.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self, Error> {
        Self::load_in(path, Path::new("."))
    }

    fn load_in(path: Option<&Path>, dir: &Path) -> Result<Self, Error> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = dir.join(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    debug!(message = "using default settings file", path = ?fallback);
                    Self::from_file(&fallback)
                } else {
                    debug!(message = "no settings file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    pub(crate) fn validate(self) -> Result<Self, Error> {
        unit_interval("min_pose_score", self.min_pose_score)?;
        unit_interval("min_keypoint_score", self.min_keypoint_score)?;
        if self.detector_timeout_ms == 0 {
            return Err(Error::InvalidSetting(
                "detector_timeout_ms",
                "must be positive".to_owned(),
            ));
        }
        if self.max_image_bytes == 0 {
            return Err(Error::InvalidSetting(
                "max_image_bytes",
                "must be positive".to_owned(),
            ));
        }
        if let Some(detector) = &self.detector {
            if detector.program.as_os_str().is_empty() {
                return Err(Error::EmptyDetectorProgram);
            }
        }
        Ok(self)
    }

    pub(crate) fn thresholds(&self) -> Thresholds {
        Thresholds {
            min_pose_score: self.min_pose_score,
            min_keypoint_score: self.min_keypoint_score,
        }
    }

    pub(crate) fn detector_timeout(&self) -> Duration {
        Duration::from_millis(self.detector_timeout_ms)
    }
}
