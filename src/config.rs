// Serial link, timing, motion and recording defaults
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chair::error::{ChairError, Result};
use crate::keshner::HarmonicSet;

// Serial port of the chair controller
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUDRATE: u32 = 115_200;

// Longest wait for one inbound line before giving up
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

// Streaming cadence and run length
pub const SAMPLING_INTERVAL_S: f64 = 0.05;
pub const MIN_SAMPLING_INTERVAL_S: f64 = 0.01;
pub const TOTAL_DURATION_S: f64 = 15.0;

// Acceleration caps, deg/s^2. Streaming needs headroom to follow the profile.
pub const STREAM_ACCELERATION: f64 = 600.0;
pub const NOMINAL_ACCELERATION: f64 = 60.0;

// Return-to-home speed, deg/s
pub const HOMING_VELOCITY: f64 = 15.0;

// Settle delays
pub const MODE_SETTLE: Duration = Duration::from_millis(100);
pub const STOP_SETTLE: Duration = Duration::from_secs(1);

// Pause between script lines
pub const SCRIPT_LINE_DELAY: Duration = Duration::from_millis(500);

// Controller recorder
pub const RECORD_SAMPLES: usize = 2000;
pub const RECORD_VARIABLES: [&str; 2] = ["MECHANGLE", "V"];
pub const RECORD_DIR: &str = "recordings";

// Zenoh topics
pub const TOPIC_STATUS: &str = "chair/state/run"; // run status
pub const TOPIC_STOP: &str = "chair/cmd/stop"; // stop requests

// Status bridge loop frequency
pub const STATUS_HZ: u64 = 20;

// How long a finished run waits for the bridge to publish its last status
pub const BRIDGE_FLUSH: Duration = Duration::from_millis(500);

/// Settings of one motion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub sampling_interval_s: f64,
    pub total_duration_s: f64,
    pub stream_acceleration: f64,
    pub nominal_acceleration: f64,
    pub homing_velocity: f64,
    pub mode_settle_ms: u64,
    pub stop_settle_ms: u64,
    /// Silence controller echo while streaming
    pub quiet_during_stream: bool,
    pub record_samples: usize,
    pub record_variables: Vec<String>,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            sampling_interval_s: SAMPLING_INTERVAL_S,
            total_duration_s: TOTAL_DURATION_S,
            stream_acceleration: STREAM_ACCELERATION,
            nominal_acceleration: NOMINAL_ACCELERATION,
            homing_velocity: HOMING_VELOCITY,
            mode_settle_ms: MODE_SETTLE.as_millis() as u64,
            stop_settle_ms: STOP_SETTLE.as_millis() as u64,
            quiet_during_stream: true,
            record_samples: RECORD_SAMPLES,
            record_variables: RECORD_VARIABLES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl MotionConfig {
    pub fn mode_settle(&self) -> Duration {
        Duration::from_millis(self.mode_settle_ms)
    }

    pub fn stop_settle(&self) -> Duration {
        Duration::from_millis(self.stop_settle_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sampling_interval_s >= MIN_SAMPLING_INTERVAL_S) {
            return Err(ChairError::invalid(format!(
                "sampling interval must be at least {} s, got {}",
                MIN_SAMPLING_INTERVAL_S, self.sampling_interval_s
            )));
        }
        if !(self.total_duration_s > 0.0 && self.total_duration_s.is_finite()) {
            return Err(ChairError::invalid(format!(
                "total duration must be > 0, got {}",
                self.total_duration_s
            )));
        }
        for (name, value) in [
            ("stream acceleration", self.stream_acceleration),
            ("nominal acceleration", self.nominal_acceleration),
            ("homing velocity", self.homing_velocity),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ChairError::invalid(format!("{} must be > 0, got {}", name, value)));
            }
        }
        if self.record_variables.is_empty() {
            return Err(ChairError::invalid("no recording variables configured"));
        }
        Ok(())
    }
}

/// Everything the binary can be configured with; loaded from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChairConfig {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub record_dir: PathBuf,
    pub motion: MotionConfig,
    pub harmonics: HarmonicSet,
}

impl Default for ChairConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUDRATE,
            read_timeout_ms: READ_TIMEOUT.as_millis() as u64,
            record_dir: PathBuf::from(RECORD_DIR),
            motion: MotionConfig::default(),
            harmonics: HarmonicSet::keshner(),
        }
    }
}

impl ChairConfig {
    /// Read a JSON config; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.motion.validate()?;
        self.harmonics.validate()
    }
}
