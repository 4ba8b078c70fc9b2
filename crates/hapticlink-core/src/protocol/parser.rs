//! Telemetry line parser
//!
//! Three line kinds are recognized:
//! - `STREAM v,v,v,v,v` normalized finger positions
//! - `STREAM_RAW r,r,r,r,r` raw sensor counts
//! - `STRIMU roll,pitch,yaw` orientation in degrees
//!
//! Values may be wrapped in `<...>` and separated by `,` or `;`.

use serde::{Deserialize, Serialize};

use crate::model::FINGER_COUNT;

/// Kind of telemetry update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateKind {
    /// Normalized finger positions
    FingerPositions,
    /// Raw sensor counts
    RawPositions,
    /// Roll, pitch and yaw
    ImuHeading,
}

impl UpdateKind {
    /// Number of values a line of this kind carries
    pub fn arity(&self) -> usize {
        match self {
            UpdateKind::FingerPositions | UpdateKind::RawPositions => FINGER_COUNT,
            UpdateKind::ImuHeading => 3,
        }
    }
}

/// A parsed telemetry line
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    /// What the values describe
    pub kind: UpdateKind,
    /// Values in wire order
    pub values: Vec<f64>,
}

/// Keywords, longest first so `STREAM` never claims a `STREAM_RAW` line
const KEYWORDS: [(&str, UpdateKind); 3] = [
    ("STREAM_RAW", UpdateKind::RawPositions),
    ("STRIMU", UpdateKind::ImuHeading),
    ("STREAM", UpdateKind::FingerPositions),
];

/// Parse one telemetry line; anything unrecognized or malformed yields `None`
pub fn parse_line(line: &str) -> Option<StateUpdate> {
    let line = line.trim();
    let (kind, payload) = KEYWORDS
        .iter()
        .find_map(|(keyword, kind)| line.strip_prefix(keyword).map(|rest| (*kind, rest)))?;

    let values = parse_values(payload)?;
    if values.len() != kind.arity() {
        return None;
    }
    Some(StateUpdate { kind, values })
}

fn parse_values(payload: &str) -> Option<Vec<f64>> {
    let payload = payload.trim().trim_start_matches('<').trim_end_matches('>');

    payload
        .split([',', ';'])
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| token.parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect()
}
