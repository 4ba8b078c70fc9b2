//! Glove state accumulation
//!
//! [`StateAccumulator`] folds telemetry updates and command side effects into
//! one mutable aggregate and hands out [`GloveState`] snapshots. It has a
//! single writer; readers only ever see owned snapshots.

use chrono::Utc;
use std::collections::BTreeMap;

use super::commands::{CalibrationAction, Command, EnableTarget, StreamTarget};
use super::parser::{StateUpdate, UpdateKind};
use crate::model::{
    CalibrationData, Finger, FingerCalibration, FingerState, GloveState, ImuState, FINGER_COUNT,
    RAW_CEILING,
};

#[derive(Debug, Clone)]
struct FingerSlot {
    position: f64,
    setpoint: f64,
    calibrated: bool,
    enabled: bool,
    raw_min: u32,
    raw_max: u32,
    invert: bool,
}

impl FingerSlot {
    fn new(finger: Finger) -> Self {
        Self {
            position: 0.0,
            setpoint: 0.0,
            calibrated: false,
            enabled: false,
            raw_min: RAW_CEILING,
            raw_max: 0,
            // Thumb sensor is mounted mirrored
            invert: finger == Finger::Thumb,
        }
    }

    fn apply_raw(&mut self, raw: f64, tracking: bool) {
        let raw = raw.clamp(0.0, RAW_CEILING as f64);
        if tracking {
            let counts = raw as u32;
            self.raw_min = self.raw_min.min(counts);
            self.raw_max = self.raw_max.max(counts);
        }

        self.position = if self.calibrated && self.raw_max > self.raw_min {
            let span = (self.raw_max - self.raw_min) as f64;
            let normalized = ((raw - self.raw_min as f64) / span).clamp(0.0, 1.0);
            if self.invert {
                1.0 - normalized
            } else {
                normalized
            }
        } else {
            raw / RAW_CEILING as f64
        };
    }
}

/// Single-writer aggregate of glove state
#[derive(Debug, Clone)]
pub struct StateAccumulator {
    fingers: [FingerSlot; FINGER_COUNT],
    imu: ImuState,
    connected: bool,
    calibrating: bool,
    streaming: bool,
    imu_streaming: bool,
}

impl Default for StateAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl StateAccumulator {
    /// Disconnected, uncalibrated state with the thumb inverted
    pub fn new() -> Self {
        Self {
            fingers: Finger::ALL.map(FingerSlot::new),
            imu: ImuState::default(),
            connected: false,
            calibrating: false,
            streaming: false,
            imu_streaming: false,
        }
    }

    fn slot(&mut self, finger: Finger) -> &mut FingerSlot {
        &mut self.fingers[finger.index()]
    }

    /// Fold a telemetry update into the state
    pub fn apply(&mut self, update: &StateUpdate) {
        match update.kind {
            UpdateKind::FingerPositions => {
                for (slot, value) in self.fingers.iter_mut().zip(&update.values) {
                    slot.position = value.clamp(0.0, 1.0);
                }
            }
            UpdateKind::RawPositions => {
                let tracking = self.calibrating;
                for (slot, raw) in self.fingers.iter_mut().zip(&update.values) {
                    slot.apply_raw(*raw, tracking);
                }
            }
            UpdateKind::ImuHeading => {
                if let &[roll, pitch, yaw, ..] = update.values.as_slice() {
                    self.imu = ImuState { roll, pitch, yaw };
                }
            }
        }
    }

    /// Build an independent snapshot of the current state
    pub fn snapshot(&self) -> GloveState {
        let fingers = Finger::ALL.map(|finger| {
            let slot = &self.fingers[finger.index()];
            FingerState {
                finger,
                position: slot.position,
                setpoint: slot.setpoint,
                calibrated: slot.calibrated,
                enabled: slot.enabled,
                raw_min: slot.raw_min,
                raw_max: slot.raw_max,
            }
        });

        GloveState {
            captured_at: Utc::now(),
            fingers,
            imu: self.imu,
            connected: self.connected,
            calibrating: self.calibrating,
            streaming: self.streaming,
            imu_streaming: self.imu_streaming,
        }
    }

    /// Enter or leave calibration mode
    ///
    /// Entering resets every tracked window to (min = ceiling, max = 0) so
    /// the next raw samples open a fresh window.
    pub fn set_calibrating(&mut self, calibrating: bool) {
        self.calibrating = calibrating;
        if calibrating {
            for slot in &mut self.fingers {
                slot.raw_min = RAW_CEILING;
                slot.raw_max = 0;
            }
        }
    }

    /// Set the connected flag
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Connected flag
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Set the finger stream flag
    pub fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    /// Set the IMU stream flag
    pub fn set_imu_streaming(&mut self, streaming: bool) {
        self.imu_streaming = streaming;
    }

    /// Enable or disable haptics on one finger
    pub fn set_finger_enabled(&mut self, finger: Finger, enabled: bool) {
        self.slot(finger).enabled = enabled;
    }

    /// Set the haptic target, clamped to [0, 1]
    pub fn set_finger_setpoint(&mut self, finger: Finger, setpoint: f64) {
        self.slot(finger).setpoint = setpoint.clamp(0.0, 1.0);
    }

    /// Invert one finger's normalized position
    pub fn set_finger_invert(&mut self, finger: Finger, invert: bool) {
        self.slot(finger).invert = invert;
    }

    /// Install a calibration window; the finger counts as calibrated only
    /// when `raw_max > raw_min`
    pub fn apply_calibration(&mut self, finger: Finger, raw_min: u32, raw_max: u32) {
        let slot = self.slot(finger);
        slot.raw_min = raw_min;
        slot.raw_max = raw_max;
        slot.calibrated = raw_max > raw_min;
    }

    /// Install windows and invert flags for every finger in `data`
    pub fn apply_calibration_data(&mut self, data: &CalibrationData) {
        for (finger, cal) in &data.fingers {
            self.apply_calibration(*finger, cal.raw_min, cal.raw_max);
            self.set_finger_invert(*finger, cal.invert);
        }
    }

    /// Record the effect of a command the glove has accepted
    pub fn apply_command(&mut self, command: &Command) {
        match command {
            Command::Setpoint { fingers, .. } => {
                for finger in Finger::ALL {
                    let value = fingers.get(&finger).copied().unwrap_or(0.0);
                    self.set_finger_setpoint(finger, value);
                }
            }
            Command::Calibration(action) => {
                let active = *action == CalibrationAction::Start;
                self.set_calibrating(active);
                self.set_streaming(active);
            }
            Command::Enable(EnableTarget::All(enabled)) => {
                for finger in Finger::ALL {
                    self.set_finger_enabled(finger, *enabled);
                }
            }
            Command::Enable(EnableTarget::Fingers(fingers)) => {
                for (finger, enabled) in fingers {
                    self.set_finger_enabled(*finger, *enabled);
                }
            }
            Command::Pid(_) => {}
            Command::Stream { target, start, .. } => match target {
                StreamTarget::FingerPosition => self.set_streaming(*start),
                StreamTarget::Imu => self.set_imu_streaming(*start),
            },
            Command::ApplyCalibration(data) => self.apply_calibration_data(data),
            Command::Restart => {
                self.calibrating = false;
                self.streaming = false;
                self.imu_streaming = false;
            }
        }
    }

    /// Current windows and invert flags of all fingers
    pub fn capture_calibration(&self) -> CalibrationData {
        let fingers: BTreeMap<Finger, FingerCalibration> = Finger::ALL
            .iter()
            .map(|finger| {
                let slot = &self.fingers[finger.index()];
                (
                    *finger,
                    FingerCalibration {
                        raw_min: slot.raw_min,
                        raw_max: slot.raw_max,
                        invert: slot.invert,
                    },
                )
            })
            .collect();
        CalibrationData::new(fingers)
    }
}
