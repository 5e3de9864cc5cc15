// Stateful command issuer for the chair controller
//
// Wraps a transport and mirrors what the controller has been told: operating
// mode, echo, motor armed, acceleration. Guards the sequencing rules that the
// controller itself does not enforce.

use std::time::Duration;
use tracing::{debug, info};

use super::command::{self, BlendMode, ControllerMode, END_OF_DATA};
use super::error::{ChairError, Result};
use super::transport::Transport;
use crate::clock::Clock;
use crate::config::NOMINAL_ACCELERATION;
use crate::recording::{RecordingSession, RecordingSink};

/// Last known controller settings, owned by whoever drives the link
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerState {
    pub mode: ControllerMode,
    pub quiet: bool,
    pub motor_enabled: bool,
    /// deg/s²
    pub acceleration: f64,
}

impl Default for SequencerState {
    // Power-on controller: position control, echoing, armed
    fn default() -> Self {
        Self {
            mode: ControllerMode::PositionControl,
            quiet: false,
            motor_enabled: true,
            acceleration: NOMINAL_ACCELERATION,
        }
    }
}

/// Controller driver over an exclusively borrowed transport
pub struct Controller<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    state: SequencerState,
}

impl<'a, T: Transport + ?Sized> Controller<'a, T> {
    pub fn new(transport: &'a mut T, state: SequencerState) -> Self {
        Self { transport, state }
    }

    pub fn state(&self) -> &SequencerState {
        &self.state
    }

    pub fn into_state(self) -> SequencerState {
        self.state
    }

    pub fn enable(&mut self) -> Result<()> {
        self.transport.send(&command::enable_motor())?;
        self.state.motor_enabled = true;
        Ok(())
    }

    pub fn disable(&mut self) -> Result<()> {
        self.transport.send(&command::disable_motor())?;
        self.state.motor_enabled = false;
        Ok(())
    }

    /// Send `opmode`; the motor must be disabled first
    pub fn set_operation_mode(&mut self, mode: ControllerMode) -> Result<()> {
        if self.state.motor_enabled {
            return Err(ChairError::precondition(format!(
                "switching to {:?} while the motor is enabled",
                mode
            )));
        }
        self.transport.send(&command::set_operation_mode(mode))?;
        self.state.mode = mode;
        Ok(())
    }

    /// Full mode change: disable, switch, let it settle, enable
    pub fn switch_mode(
        &mut self,
        mode: ControllerMode,
        clock: &impl Clock,
        settle: Duration,
    ) -> Result<()> {
        info!("Switching controller to {:?}", mode);
        self.disable()?;
        self.set_operation_mode(mode)?;
        clock.sleep(settle);
        self.enable()
    }

    /// Set acceleration and deceleration to the same cap (deg/s²)
    pub fn set_acceleration(&mut self, deg_s2: f64) -> Result<()> {
        let acc = command::set_acceleration(Some(deg_s2))?;
        let dec = command::set_deceleration(deg_s2)?;
        self.transport.send(&acc)?;
        self.transport.send(&dec)?;
        self.state.acceleration = deg_s2;
        Ok(())
    }

    pub fn quiet(&mut self) -> Result<()> {
        self.transport.send(&command::set_quiet())?;
        self.state.quiet = true;
        Ok(())
    }

    pub fn dequiet(&mut self) -> Result<()> {
        self.transport.send(&command::clear_quiet())?;
        self.state.quiet = false;
        Ok(())
    }

    /// Velocity command (deg/s); only meaningful in velocity control
    pub fn jog(&mut self, angular_velocity_deg_s: f64, note: Option<String>) -> Result<()> {
        let mut cmd = command::jog(angular_velocity_deg_s, None)?;
        if let Some(note) = note {
            cmd = cmd.annotated(note);
        }
        self.transport.send(&cmd)
    }

    /// Zero velocity
    pub fn stop(&mut self) -> Result<()> {
        self.transport.send(&command::jog(0.0, None)?)
    }

    fn require_position_control(&self) -> Result<()> {
        if self.state.mode != ControllerMode::PositionControl {
            return Err(ChairError::precondition(format!(
                "position moves need PositionControl, controller is in {:?}",
                self.state.mode
            )));
        }
        Ok(())
    }

    pub fn move_absolute(&mut self, angle_deg: f64, angular_velocity_deg_s: f64) -> Result<()> {
        self.require_position_control()?;
        let cmd = command::move_absolute(angle_deg, angular_velocity_deg_s)?;
        self.transport.send(&cmd)
    }

    pub fn move_incremental(
        &mut self,
        angle_deg: f64,
        angular_velocity_deg_s: f64,
        blend: BlendMode,
    ) -> Result<()> {
        self.require_position_control()?;
        let cmd = command::move_incremental(angle_deg, angular_velocity_deg_s, blend)?;
        self.transport.send(&cmd)
    }

    /// Arm the recorder; it starts with the next command
    pub fn start_recording(&mut self, session: &RecordingSession) -> Result<()> {
        let setup = session.command()?;
        self.transport.send(&setup)?;
        self.transport.send(&command::trigger_recording())
    }

    /// Ask for the recorded table and copy it into `sink` up to the end-of-data line
    ///
    /// Returns the number of data lines written.
    pub fn retrieve_recording<S: RecordingSink + ?Sized>(
        &mut self,
        session: &RecordingSession,
        sink: &mut S,
    ) -> Result<usize> {
        // Echoes and chatter from the run are still queued ahead of the table
        self.transport.clear_input()?;
        self.transport.send(&command::get_recorded_data())?;
        sink.begin(session)?;

        let limit = session.max_transfer_lines();
        let mut lines = 0;
        loop {
            let line = match self.transport.read_line()? {
                Some(line) => line,
                None => {
                    return Err(ChairError::ProtocolViolation(format!(
                        "no end-of-data marker after {} line(s)",
                        lines
                    )));
                }
            };
            if line.trim() == END_OF_DATA {
                break;
            }
            if lines == limit {
                return Err(ChairError::ProtocolViolation(format!(
                    "more than {} lines without an end-of-data marker",
                    limit
                )));
            }
            sink.line(&line)?;
            lines += 1;
        }

        sink.finish()?;
        debug!("Retrieved {} recorded line(s)", lines);
        Ok(lines)
    }
}
