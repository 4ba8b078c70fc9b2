//! Glove commands
//!
//! Defines the commands the host can send to the glove.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{CalibrationData, Finger};

/// Which side of the setpoint the haptic force acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideFilter {
    /// Resist motion in both directions
    Both,
    /// Only above the setpoint
    Above,
    /// Only below the setpoint
    Below,
}

impl SideFilter {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            SideFilter::Both => "both",
            SideFilter::Above => "above",
            SideFilter::Below => "below",
        }
    }
}

/// Start or stop calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationAction {
    /// Reset the windows and stream raw positions
    Start,
    /// Stop streaming and keep the windows
    Stop,
}

/// Fingers affected by an enable command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnableTarget {
    /// Every finger set to the same value
    All(bool),
    /// Only the listed fingers
    Fingers(BTreeMap<Finger, bool>),
}

/// PID gains; unset gains are left unchanged on the glove
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PidGains {
    /// Same gains for every finger
    Global {
        /// Proportional gain
        kp: Option<f64>,
        /// Derivative gain
        kd: Option<f64>,
    },
    /// Per-finger `(kp, kd)`
    PerFinger(BTreeMap<Finger, (Option<f64>, Option<f64>)>),
}

/// Telemetry stream selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamTarget {
    /// Finger position stream, normalized or raw
    FingerPosition,
    /// IMU orientation stream
    Imu,
}

/// Commands understood by the glove firmware
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Haptic target positions; fingers not listed are sent as 0.0
    Setpoint {
        /// Target per finger, in [0, 1]
        fingers: BTreeMap<Finger, f64>,
        /// Optional side filter
        side: Option<SideFilter>,
    },

    /// Start or stop a calibration sweep (raw position streaming)
    Calibration(CalibrationAction),

    /// Enable or disable finger motors
    Enable(EnableTarget),

    /// Set PID gains
    Pid(PidGains),

    /// Start or stop a telemetry stream
    Stream {
        /// Which stream
        target: StreamTarget,
        /// Start when true, stop otherwise
        start: bool,
        /// Raw ADC values instead of normalized positions
        raw: bool,
    },

    /// Upload calibration windows
    ApplyCalibration(CalibrationData),

    /// Restart the glove firmware
    Restart,
}

impl Command {
    /// Setpoint for the given fingers without a side filter
    pub fn setpoint(fingers: impl IntoIterator<Item = (Finger, f64)>) -> Self {
        Command::Setpoint {
            fingers: fingers.into_iter().collect(),
            side: None,
        }
    }

    /// Enable or disable every finger
    pub fn enable_all(enabled: bool) -> Self {
        Command::Enable(EnableTarget::All(enabled))
    }

    /// Start or stop the finger position stream
    pub fn finger_stream(start: bool, raw: bool) -> Self {
        Command::Stream {
            target: StreamTarget::FingerPosition,
            start,
            raw,
        }
    }

    /// Start or stop the IMU stream
    pub fn imu_stream(start: bool) -> Self {
        Command::Stream {
            target: StreamTarget::Imu,
            start,
            raw: false,
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Command::Setpoint { .. } => "setpoint",
            Command::Calibration(_) => "calibration",
            Command::Enable(_) => "enable",
            Command::Pid(_) => "pid",
            Command::Stream { .. } => "stream",
            Command::ApplyCalibration(_) => "apply_calibration",
            Command::Restart => "restart",
        }
    }
}
