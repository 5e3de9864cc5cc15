// In-memory stand-in for the controller link
//
// Records every attempted write, replays scripted inbound lines and answers
// `get` with a canned recording. Used by the tests and by `--dry-run`.

use std::collections::VecDeque;
use std::io;
use tracing::info;

use super::command::END_OF_DATA;
use super::error::{ChairError, Result};
use super::transport::Transport;

#[derive(Debug, Default)]
pub struct MockTransport {
    written: Vec<String>,
    inbound: VecDeque<String>,
    recording: Option<Vec<String>>,
    fail_on: Option<(String, usize)>,
    dry_run: bool,
    echo: bool,
    quiet: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport for `--dry-run`: logs writes and finishes every `get` with an empty table
    pub fn dry_run() -> Self {
        Self {
            recording: Some(Vec::new()),
            dry_run: true,
            ..Self::default()
        }
    }

    /// Lines available to read right away
    pub fn with_inbound<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inbound.extend(lines.into_iter().map(Into::into));
        self
    }

    /// Lines answered to `get`, followed by the end-of-data marker
    pub fn with_recording<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recording = Some(lines.into_iter().map(Into::into).collect());
        self
    }

    /// Echo written lines back like the controller does, except while quiet
    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Fail the `n`-th write (1-based) whose line starts with `prefix`
    pub fn fail_on_nth(mut self, prefix: &str, n: usize) -> Self {
        self.fail_on = Some((prefix.to_string(), n));
        self
    }

    /// Every line a caller tried to write, including failed attempts
    pub fn written(&self) -> &[String] {
        &self.written
    }

    /// Written lines starting with `prefix`
    pub fn written_with(&self, prefix: &str) -> Vec<&str> {
        self.written
            .iter()
            .filter(|l| l.starts_with(prefix))
            .map(String::as_str)
            .collect()
    }

    fn should_fail(&self, line: &str) -> bool {
        match &self.fail_on {
            Some((prefix, n)) if line.starts_with(prefix.as_str()) => {
                // `written` already holds the current attempt
                self.written_with(prefix).len() == *n
            }
            _ => false,
        }
    }
}

impl Transport for MockTransport {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.written.push(line.to_string());
        if self.should_fail(line) {
            return Err(ChairError::TransportWrite(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated write failure",
            )));
        }
        if self.dry_run {
            info!("→ {}", line);
        }
        match line {
            "quiet" => self.quiet = true,
            "dequiet" => self.quiet = false,
            _ => {}
        }
        if self.echo && !self.quiet && line != "get" {
            self.inbound.push_back(line.to_string());
        }
        if line == "get" {
            if let Some(recording) = &self.recording {
                self.inbound.extend(recording.iter().cloned());
                self.inbound.push_back(END_OF_DATA.to_string());
            }
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        Ok(self.inbound.pop_front())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.inbound.clear();
        Ok(())
    }
}
