//! Glove data model
//!
//! Immutable value types shared by the protocol, state and transport layers.
//! Snapshots are plain owned values; handing one to any number of observers
//! never exposes mutable state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of fingers tracked by the glove
pub const FINGER_COUNT: usize = 5;

/// Largest raw sensor count reported by the glove ADC
pub const RAW_CEILING: u32 = 4095;

/// Finger identifier
///
/// Declaration order is the canonical finger order used whenever several
/// fingers are serialized together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Finger {
    /// Thumb
    Thumb,
    /// Index finger
    Index,
    /// Middle finger
    Middle,
    /// Ring finger
    Ring,
    /// Little finger
    Pinky,
}

impl Finger {
    /// All fingers in canonical order
    pub const ALL: [Finger; FINGER_COUNT] = [
        Finger::Thumb,
        Finger::Index,
        Finger::Middle,
        Finger::Ring,
        Finger::Pinky,
    ];

    /// Wire name of the finger
    pub fn name(&self) -> &'static str {
        match self {
            Finger::Thumb => "thumb",
            Finger::Index => "index",
            Finger::Middle => "middle",
            Finger::Ring => "ring",
            Finger::Pinky => "pinky",
        }
    }

    /// Position of the finger in canonical order
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Finger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a finger name is not one of the five known names
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown finger: '{0}'")]
pub struct UnknownFinger(pub String);

impl FromStr for Finger {
    type Err = UnknownFinger;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Finger::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownFinger(s.to_string()))
    }
}

/// Immutable state of a single finger
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FingerState {
    /// Which finger this is
    pub finger: Finger,
    /// Normalized position, 0.0 (closed) to 1.0 (open)
    pub position: f64,
    /// Commanded target position for haptic feedback
    pub setpoint: f64,
    /// Whether a valid calibration window is applied
    pub calibrated: bool,
    /// Whether the haptic motor is enabled
    pub enabled: bool,
    /// Lowest raw value of the calibration window
    pub raw_min: u32,
    /// Highest raw value of the calibration window
    pub raw_max: u32,
}

impl FingerState {
    /// Default state for a finger that has not reported anything yet
    pub fn new(finger: Finger) -> Self {
        Self {
            finger,
            position: 0.0,
            setpoint: 0.0,
            calibrated: false,
            enabled: false,
            raw_min: RAW_CEILING,
            raw_max: 0,
        }
    }
}

/// IMU orientation in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuState {
    /// Roll angle
    pub roll: f64,
    /// Pitch angle
    pub pitch: f64,
    /// Yaw angle
    pub yaw: f64,
}

/// Complete immutable snapshot of glove state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GloveState {
    /// When the snapshot was taken
    pub captured_at: DateTime<Utc>,
    /// Per-finger state, indexed by canonical finger order
    pub fingers: [FingerState; FINGER_COUNT],
    /// Orientation
    pub imu: ImuState,
    /// Glove reachable (USB dongle present and radio link up)
    pub connected: bool,
    /// Calibration in progress
    pub calibrating: bool,
    /// Finger position streaming active
    pub streaming: bool,
    /// IMU streaming active
    pub imu_streaming: bool,
}

impl GloveState {
    /// State of one finger
    pub fn finger(&self, finger: Finger) -> &FingerState {
        &self.fingers[finger.index()]
    }

    /// Positions of all fingers in canonical order
    pub fn positions(&self) -> [f64; FINGER_COUNT] {
        self.fingers.map(|f| f.position)
    }
}

/// Calibration parameters of one finger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerCalibration {
    /// Raw value mapped to position 0.0
    pub raw_min: u32,
    /// Raw value mapped to position 1.0
    pub raw_max: u32,
    /// Whether the normalized value is mirrored
    #[serde(default)]
    pub invert: bool,
}

/// Calibration parameters for all fingers
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationData {
    /// When the calibration was performed
    pub captured_at: DateTime<Utc>,
    /// Per-finger parameters
    pub fingers: BTreeMap<Finger, FingerCalibration>,
}

/// Plain nested record used to persist [`CalibrationData`]
///
/// Shape: `{"timestamp": ..., "fingers": {"thumb": {"raw_min": .., "raw_max": .., "invert": ..}}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// When the calibration was performed
    pub timestamp: DateTime<Utc>,
    /// Parameters keyed by finger name
    pub fingers: BTreeMap<String, FingerCalibration>,
}

impl CalibrationData {
    /// Create calibration data stamped with the current time
    pub fn new(fingers: BTreeMap<Finger, FingerCalibration>) -> Self {
        Self {
            captured_at: Utc::now(),
            fingers,
        }
    }

    /// Convert to the persisted record shape
    pub fn to_record(&self) -> CalibrationRecord {
        CalibrationRecord {
            timestamp: self.captured_at,
            fingers: self
                .fingers
                .iter()
                .map(|(finger, params)| (finger.name().to_string(), *params))
                .collect(),
        }
    }

    /// Rebuild from a persisted record
    pub fn from_record(record: CalibrationRecord) -> Result<Self, UnknownFinger> {
        let fingers = record
            .fingers
            .into_iter()
            .map(|(name, params)| Ok((name.parse::<Finger>()?, params)))
            .collect::<Result<BTreeMap<_, _>, UnknownFinger>>()?;

        Ok(Self {
            captured_at: record.timestamp,
            fingers,
        })
    }
}
