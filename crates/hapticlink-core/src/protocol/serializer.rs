//! Command serializer
//!
//! Turns a [`Command`] into firmware command lines of the form
//! `!keyword -flag value ...`. Commands that expand to several lines are
//! joined with `\n`; [`encode_command`] adds the final terminator.

use super::commands::{CalibrationAction, Command, EnableTarget, PidGains, StreamTarget};
use crate::model::{CalibrationData, Finger};

/// Serialize a command to its wire lines, without trailing terminator
///
/// Returns an empty string for commands that carry nothing to send (for
/// example PID gains with both gains unset).
pub fn serialize_command(command: &Command) -> String {
    match command {
        Command::Setpoint { fingers, side } => {
            let mut line = String::from("!setSetpointAll");
            for finger in Finger::ALL {
                let value = fingers.get(&finger).copied().unwrap_or(0.0).clamp(0.0, 1.0);
                line.push_str(&format!(" -{} {:.5}", finger, value));
            }
            if let Some(side) = side {
                line.push_str(" -side ");
                line.push_str(side.as_str());
            }
            line
        }

        Command::Calibration(CalibrationAction::Start) => "!startStreamFingerPos -raw 1".to_string(),
        Command::Calibration(CalibrationAction::Stop) => "!stopStreamFingerPos".to_string(),

        Command::Enable(target) => {
            let lines: Vec<String> = match target {
                EnableTarget::All(enabled) => Finger::ALL
                    .iter()
                    .map(|finger| enable_line(*finger, *enabled))
                    .collect(),
                EnableTarget::Fingers(fingers) => fingers
                    .iter()
                    .map(|(finger, enabled)| enable_line(*finger, *enabled))
                    .collect(),
            };
            lines.join("\n")
        }

        Command::Pid(PidGains::Global { kp, kd }) => {
            let mut lines = Vec::new();
            if let Some(kp) = kp {
                lines.push(format!("!setKpAll -kp {:.5}", kp));
            }
            if let Some(kd) = kd {
                lines.push(format!("!setKdAll -kd {:.5}", kd));
            }
            lines.join("\n")
        }

        Command::Pid(PidGains::PerFinger(fingers)) => fingers
            .iter()
            .map(|(finger, (kp, kd))| {
                let mut line = format!("!setFingerPID -finger {}", finger);
                if let Some(kp) = kp {
                    line.push_str(&format!(" -kp {:.5}", kp));
                }
                if let Some(kd) = kd {
                    line.push_str(&format!(" -kd {:.5}", kd));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n"),

        Command::Stream { target, start, raw } => match (*target, *start, *raw) {
            (StreamTarget::FingerPosition, true, true) => "!startStreamFingerPos -raw 1",
            (StreamTarget::FingerPosition, true, false) => "!startStreamFingerPos",
            (StreamTarget::FingerPosition, false, _) => "!stopStreamFingerPos",
            (StreamTarget::Imu, true, _) => "!startImuStream",
            (StreamTarget::Imu, false, _) => "!stopImuStream",
        }
        .to_string(),

        Command::ApplyCalibration(data) => calibration_lines(data),

        Command::Restart => "!restart".to_string(),
    }
}

/// Serialize and terminate a command for writing
///
/// Empty serializations encode to no bytes at all.
pub fn encode_command(command: &Command) -> Vec<u8> {
    let text = serialize_command(command);
    if text.is_empty() {
        return Vec::new();
    }
    let mut bytes = text.into_bytes();
    bytes.push(b'\n');
    bytes
}

fn enable_line(finger: Finger, enabled: bool) -> String {
    format!(
        "!setFingerEnable -finger {} -enable {}",
        finger,
        u8::from(enabled)
    )
}

fn calibration_lines(data: &CalibrationData) -> String {
    data.fingers
        .iter()
        .map(|(finger, cal)| {
            format!(
                "!setFingerCalibration -finger {} -min {} -max {}",
                finger, cal.raw_min, cal.raw_max
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
