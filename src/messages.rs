// Status messages published by a motion run
//
// The run is the only writer; the operator side and the zenoh bridge only read.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a motion run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    ModeSwitching,
    Streaming,
    Stopping,
    Restoring,
    Homing,
    Retrieving,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::ModeSwitching => "mode switching",
            Phase::Streaming => "streaming",
            Phase::Stopping => "stopping",
            Phase::Restoring => "restoring",
            Phase::Homing => "homing",
            Phase::Retrieving => "retrieving",
        };
        f.write_str(name)
    }
}

/// Snapshot of a run, sent on every phase change and every streamed sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunStatus {
    pub phase: Phase,
    /// Samples sent so far
    pub sample: usize,
    pub total_samples: usize,
    /// Profile time of the last sample, s
    pub time_s: f64,
    /// Last commanded speed, deg/s
    pub speed_deg_s: f64,
}

/// Remote request to end the current run early
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StopRequest {
    #[serde(default)]
    pub reason: Option<String>,
}
