// ASCII command builders for the chair's servo controller
//
// One command per line, lowercase mnemonics, CR appended by the transport.
// Builders take physical units and never emit a partially encoded command:
// out-of-range arguments are rejected before any string is produced.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{ChairError, Result};
use super::units::{degrees_per_sec_to_rpm, degrees_to_counts, seconds_to_millis, seconds_to_record_ticks};

/// Largest number of samples the recorder can hold
pub const MAX_RECORD_SAMPLES: usize = 2000;

/// Longest recorder sampling interval in seconds (1e6 ticks)
pub const MAX_RECORD_INTERVAL_S: f64 = 31.25;

/// Line the controller prints after the last line of a `get` transfer
pub const END_OF_DATA: &str = "-->";

/// Controller operating modes (`opmode` argument)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerMode {
    VelocityControl,
    PositionControl,
}

impl ControllerMode {
    pub fn opmode(self) -> u8 {
        match self {
            ControllerMode::VelocityControl => 0,
            ControllerMode::PositionControl => 8,
        }
    }
}

/// How a new motion command interacts with motion already in progress
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// Interrupt the running motion immediately
    Interrupt = 1,
    /// Queue behind pending motion
    Queue = 2,
}

/// A finished controller command line (without terminator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireCommand {
    line: String,
    note: Option<String>,
}

impl WireCommand {
    fn new(line: String) -> Self {
        Self { line, note: None }
    }

    /// Attach a human-readable annotation, used only for logging
    pub fn annotated(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn as_str(&self) -> &str {
        &self.line
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }
}

impl fmt::Display for WireCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

fn finite(name: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ChairError::invalid(format!("{} must be finite, got {}", name, value)))
    }
}

/// `moveabs <counts> <rpm>`
pub fn move_absolute(angle_deg: f64, angular_velocity_deg_s: f64) -> Result<WireCommand> {
    let counts = degrees_to_counts(finite("angle", angle_deg)?);
    let rpm = degrees_per_sec_to_rpm(finite("angular velocity", angular_velocity_deg_s)?);
    Ok(WireCommand::new(format!("moveabs {} {:.2}", counts, rpm)))
}

/// `moveinc <counts> <rpm> <blend>`
pub fn move_incremental(
    angle_deg: f64,
    angular_velocity_deg_s: f64,
    blend: BlendMode,
) -> Result<WireCommand> {
    let counts = degrees_to_counts(finite("angle", angle_deg)?);
    let rpm = degrees_per_sec_to_rpm(finite("angular velocity", angular_velocity_deg_s)?);
    Ok(WireCommand::new(format!(
        "moveinc {} {:.2} {}",
        counts, rpm, blend as u8
    )))
}

/// `j <rpm> [<ms>]`
pub fn jog(angular_velocity_deg_s: f64, duration_s: Option<f64>) -> Result<WireCommand> {
    let rpm = degrees_per_sec_to_rpm(finite("angular velocity", angular_velocity_deg_s)?);
    match duration_s {
        None => Ok(WireCommand::new(format!("j {:.2}", rpm))),
        Some(d) => {
            if !(finite("jog duration", d)? >= 0.0) {
                return Err(ChairError::invalid(format!("jog duration must be >= 0, got {}", d)));
            }
            Ok(WireCommand::new(format!("j {:.2} {}", rpm, seconds_to_millis(d))))
        }
    }
}

/// `acc [<rpm/s>]`, without a value the controller reports the current setting
pub fn set_acceleration(val_deg_s2: Option<f64>) -> Result<WireCommand> {
    match val_deg_s2 {
        None => Ok(WireCommand::new("acc".to_string())),
        Some(v) => Ok(WireCommand::new(format!(
            "acc {:.2}",
            degrees_per_sec_to_rpm(positive("acceleration", v)?)
        ))),
    }
}

/// `dec <rpm/s>`
pub fn set_deceleration(val_deg_s2: f64) -> Result<WireCommand> {
    Ok(WireCommand::new(format!(
        "dec {:.2}",
        degrees_per_sec_to_rpm(positive("deceleration", val_deg_s2)?)
    )))
}

fn positive(name: &str, value: f64) -> Result<f64> {
    if finite(name, value)? > 0.0 {
        Ok(value)
    } else {
        Err(ChairError::invalid(format!("{} must be > 0, got {}", name, value)))
    }
}

/// `opmode <0|8>`
pub fn set_operation_mode(mode: ControllerMode) -> WireCommand {
    WireCommand::new(format!("opmode {}", mode.opmode()))
}

/// `en`
pub fn enable_motor() -> WireCommand {
    WireCommand::new("en".to_string())
}

/// `k`
pub fn disable_motor() -> WireCommand {
    WireCommand::new("k".to_string())
}

/// `record <ticks> <count> "VAR1 "VAR2 ...`
///
/// Variable order is kept as given; it decides the column order of `get`.
pub fn set_recording(
    sample_interval_s: f64,
    sample_count: usize,
    variables: &[String],
) -> Result<WireCommand> {
    if !(1..=MAX_RECORD_SAMPLES).contains(&sample_count) {
        return Err(ChairError::invalid(format!(
            "sample count must be within 1..={}, got {}",
            MAX_RECORD_SAMPLES, sample_count
        )));
    }
    if !(0.0..=MAX_RECORD_INTERVAL_S).contains(&sample_interval_s) {
        return Err(ChairError::invalid(format!(
            "sample interval must be within 0..={} s, got {}",
            MAX_RECORD_INTERVAL_S, sample_interval_s
        )));
    }
    if variables.is_empty() {
        return Err(ChairError::invalid("at least one variable must be recorded"));
    }
    for name in variables {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_graphic() && c != '"') {
            return Err(ChairError::invalid(format!("bad variable name {:?}", name)));
        }
    }

    let vars: Vec<String> = variables.iter().map(|v| format!("\"{}", v)).collect();
    Ok(WireCommand::new(format!(
        "record {} {} {}",
        seconds_to_record_ticks(sample_interval_s),
        sample_count,
        vars.join(" ")
    )))
}

/// `rectrig "CMD`, start recording on the next command
pub fn trigger_recording() -> WireCommand {
    WireCommand::new("rectrig \"CMD".to_string())
}

/// `get`, answered with the recorded table and terminated by [`END_OF_DATA`]
pub fn get_recorded_data() -> WireCommand {
    WireCommand::new("get".to_string())
}

/// `quiet`, stop echoing commands
pub fn set_quiet() -> WireCommand {
    WireCommand::new("quiet".to_string())
}

/// `dequiet`, echo commands again
pub fn clear_quiet() -> WireCommand {
    WireCommand::new("dequiet".to_string())
}

/// Operator-typed line passed through untouched
///
/// Only checks that the line can travel on the wire as a single command.
pub fn raw(line: &str) -> Result<WireCommand> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ChairError::invalid("empty command"));
    }
    if !line.is_ascii() || line.contains(['\r', '\n']) {
        return Err(ChairError::invalid(format!(
            "command must be a single ASCII line: {:?}",
            line
        )));
    }
    Ok(WireCommand::new(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_moves() {
        assert_eq!(move_absolute(0.0, 15.0).unwrap().as_str(), "moveabs 0 2.50");
        assert_eq!(
            move_incremental(360.0, 15.0, BlendMode::Queue).unwrap().as_str(),
            "moveinc 8388608 2.50 2"
        );
        assert_eq!(
            move_incremental(-90.0, 30.0, BlendMode::Interrupt).unwrap().as_str(),
            "moveinc -2097152 5.00 1"
        );
    }

    #[test]
    fn test_jog() {
        assert_eq!(jog(0.0, None).unwrap().as_str(), "j 0.00");
        assert_eq!(jog(-0.0001, None).unwrap().as_str(), "j 0.00");
        assert_eq!(jog(-45.0, None).unwrap().as_str(), "j -7.50");
        assert_eq!(jog(60.0, Some(1.5)).unwrap().as_str(), "j 10.00 1500");
        assert!(jog(f64::NAN, None).is_err());
        assert!(jog(10.0, Some(-1.0)).is_err());
    }

    #[test]
    fn test_acceleration() {
        assert_eq!(set_acceleration(None).unwrap().as_str(), "acc");
        assert_eq!(set_acceleration(Some(600.0)).unwrap().as_str(), "acc 100.00");
        assert_eq!(set_deceleration(60.0).unwrap().as_str(), "dec 10.00");
        assert!(matches!(
            set_deceleration(0.0),
            Err(ChairError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(set_operation_mode(ControllerMode::VelocityControl).as_str(), "opmode 0");
        assert_eq!(set_operation_mode(ControllerMode::PositionControl).as_str(), "opmode 8");
        assert_eq!(enable_motor().as_str(), "en");
        assert_eq!(disable_motor().as_str(), "k");
        assert_eq!(trigger_recording().as_str(), "rectrig \"CMD");
        assert_eq!(get_recorded_data().as_str(), "get");
        assert_eq!(set_quiet().as_str(), "quiet");
        assert_eq!(clear_quiet().as_str(), "dequiet");
    }

    #[test]
    fn test_recording_format_keeps_variable_order() {
        let cmd = set_recording(0.0075, 2000, &vars(&["MECHANGLE", "V"])).unwrap();
        assert_eq!(cmd.as_str(), "record 240 2000 \"MECHANGLE \"V");

        let cmd = set_recording(0.0075, 10, &vars(&["V", "MECHANGLE", "I"])).unwrap();
        assert_eq!(cmd.as_str(), "record 240 10 \"V \"MECHANGLE \"I");
    }

    #[test]
    fn test_recording_bounds() {
        let v = vars(&["V"]);
        assert!(matches!(set_recording(0.01, 0, &v), Err(ChairError::InvalidArgument(_))));
        assert!(matches!(set_recording(0.01, 2001, &v), Err(ChairError::InvalidArgument(_))));
        assert!(matches!(set_recording(31.26, 100, &v), Err(ChairError::InvalidArgument(_))));
        assert!(matches!(set_recording(-0.01, 100, &v), Err(ChairError::InvalidArgument(_))));
        assert!(matches!(set_recording(f64::NAN, 100, &v), Err(ChairError::InvalidArgument(_))));
        assert!(set_recording(0.01, 2000, &v).is_ok());
        assert_eq!(
            set_recording(31.25, 1, &v).unwrap().as_str(),
            "record 1000000 1 \"V"
        );
    }

    #[test]
    fn test_recording_rejects_bad_variables() {
        assert!(set_recording(0.01, 10, &[]).is_err());
        assert!(set_recording(0.01, 10, &vars(&[""])).is_err());
        assert!(set_recording(0.01, 10, &vars(&["MECH ANGLE"])).is_err());
    }

    #[test]
    fn test_raw_passthrough() {
        assert_eq!(raw("  moveabs 0 15 ").unwrap().as_str(), "moveabs 0 15");
        assert!(raw("   ").is_err());
        assert!(raw("en\rk").is_err());
        assert!(raw("déplacer").is_err());
    }

    #[test]
    fn test_annotation_does_not_touch_line() {
        let cmd = jog(15.0, None).unwrap().annotated("t=0.10 s");
        assert_eq!(cmd.as_str(), "j 2.50");
        assert_eq!(cmd.note(), Some("t=0.10 s"));
        assert_eq!(cmd.to_string(), "j 2.50");
    }
}
