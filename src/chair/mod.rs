// Rotation chair controller link
//
// Provides:
// - Unit conversion between degrees/seconds and controller wire units
// - ASCII command builders for the servo controller
// - Line transport over a serial port, shared with exclusive claims
// - Stateful controller driver enforcing mode-change sequencing

pub mod command;
pub mod controller;
pub mod error;
pub mod mock;
pub mod transport;
pub mod units;

pub use command::{BlendMode, ControllerMode, WireCommand};
pub use controller::{Controller, SequencerState};
pub use error::{ChairError, Result};
pub use mock::MockTransport;
pub use transport::{Channel, ChannelGuard, SerialTransport, Transport};
