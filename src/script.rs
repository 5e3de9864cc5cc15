// Plain-text command scripts
//
// One controller command per line; blank lines and `#` comments are skipped.
// The whole script is checked before the first line is sent.

use std::time::Duration;
use tracing::{info, warn};

use crate::chair::command::{self, WireCommand};
use crate::chair::error::Result;
use crate::chair::transport::Transport;
use crate::clock::Clock;
use crate::sequencer::CancelToken;

/// Parse script text into wire commands
pub fn parse(text: &str) -> Result<Vec<WireCommand>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(command::raw)
        .collect()
}

/// Send each command, pausing `delay` after every line
///
/// Returns the number of lines sent; stops early when `cancel` is set.
pub fn play<T, C>(
    transport: &mut T,
    commands: &[WireCommand],
    clock: &C,
    delay: Duration,
    cancel: &CancelToken,
) -> Result<usize>
where
    T: Transport + ?Sized,
    C: Clock,
{
    info!("Playing script of {} line(s)", commands.len());
    for (i, cmd) in commands.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!("Script cancelled after {} line(s)", i);
            return Ok(i);
        }
        transport.send(cmd)?;
        clock.sleep(delay);
    }
    Ok(commands.len())
}
