//! Calibration persistence
//!
//! Calibration windows are stored as a [`CalibrationRecord`] in a JSON file,
//! by default under the user's config directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::{CalibrationData, CalibrationRecord, UnknownFinger};

/// Errors raised while loading or saving calibration
#[derive(Error, Debug)]
pub enum CalibrationError {
    /// Reading or writing the file failed
    #[error("Calibration I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file is not a calibration record
    #[error("Invalid calibration JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The record names a finger the glove does not have
    #[error(transparent)]
    UnknownFinger(#[from] UnknownFinger),

    /// No per-user config directory on this platform
    #[error("Could not find a config directory")]
    NoConfigDir,
}

/// Storage for calibration data
pub trait CalibrationStore: Send + Sync {
    /// Load stored calibration; `Ok(None)` when nothing is stored yet
    fn load(&self) -> Result<Option<CalibrationData>, CalibrationError>;

    /// Store calibration, replacing what was there
    fn save(&self, data: &CalibrationData) -> Result<(), CalibrationError>;
}

/// Calibration store backed by one JSON file
#[derive(Debug, Clone)]
pub struct JsonCalibrationStore {
    path: PathBuf,
}

impl JsonCalibrationStore {
    /// Store at an explicit path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location
    pub fn open_default() -> Result<Self, CalibrationError> {
        Ok(Self::new(Self::default_path()?))
    }

    /// `<config dir>/hapticlink/calibration.json`
    pub fn default_path() -> Result<PathBuf, CalibrationError> {
        let base = dirs::config_dir().ok_or(CalibrationError::NoConfigDir)?;
        Ok(base.join("hapticlink").join("calibration.json"))
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CalibrationStore for JsonCalibrationStore {
    fn load(&self) -> Result<Option<CalibrationData>, CalibrationError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: CalibrationRecord = serde_json::from_str(&content)?;
        let data = CalibrationData::from_record(record)?;
        tracing::debug!(
            path = %self.path.display(),
            fingers = data.fingers.len(),
            "Loaded calibration"
        );
        Ok(Some(data))
    }

    fn save(&self, data: &CalibrationData) -> Result<(), CalibrationError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&data.to_record())?;
        fs::write(&self.path, content)?;
        tracing::info!(path = %self.path.display(), "Saved calibration");
        Ok(())
    }
}
