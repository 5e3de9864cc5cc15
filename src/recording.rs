// Controller-side recording and where retrieved data ends up
//
// A session arms the controller's recorder before a run; after the run the
// recorded table is pulled with `get` and handed to a sink line by line.

use chrono::Local;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::chair::command::{self, WireCommand};
use crate::chair::error::{ChairError, Result};

/// Extra lines tolerated on top of the sample count (controller banner, echo)
const TRANSFER_SLACK_LINES: usize = 64;

/// Recorder settings for one run
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSession {
    sampling_interval: f64,
    sample_count: usize,
    variables: Vec<String>,
}

impl RecordingSession {
    /// Validates through the `record` command builder so a bad session never reaches the wire
    pub fn new(sampling_interval: f64, sample_count: usize, variables: Vec<String>) -> Result<Self> {
        command::set_recording(sampling_interval, sample_count, &variables)?;
        Ok(Self {
            sampling_interval,
            sample_count,
            variables,
        })
    }

    /// Spread `sample_count` samples evenly over `span` seconds
    pub fn spanning(span: f64, sample_count: usize, variables: Vec<String>) -> Result<Self> {
        if sample_count == 0 {
            return Err(ChairError::invalid("sample count must be at least 1"));
        }
        Self::new(span / sample_count as f64, sample_count, variables)
    }

    pub fn sampling_interval(&self) -> f64 {
        self.sampling_interval
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn total_time(&self) -> f64 {
        self.sampling_interval * self.sample_count as f64
    }

    pub fn command(&self) -> Result<WireCommand> {
        command::set_recording(self.sampling_interval, self.sample_count, &self.variables)
    }

    pub(crate) fn max_transfer_lines(&self) -> usize {
        self.sample_count + TRANSFER_SLACK_LINES
    }

    /// First line of a saved recording
    pub fn header(&self) -> String {
        format!(
            "Sampling Time: {}\tTotal Time: {}",
            self.sampling_interval,
            self.total_time()
        )
    }
}

/// Destination for retrieved recorder data
pub trait RecordingSink {
    fn begin(&mut self, session: &RecordingSession) -> Result<()>;

    /// One raw line as received, without terminator
    fn line(&mut self, line: &str) -> Result<()>;

    fn finish(&mut self) -> Result<()>;
}

/// Keeps everything in memory (tests, dry runs)
#[derive(Debug, Default)]
pub struct MemorySink {
    header: Option<String>,
    lines: Vec<String>,
    finished: bool,
}

impl MemorySink {
    pub fn header(&self) -> Option<&str> {
        self.header.as_deref()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl RecordingSink for MemorySink {
    fn begin(&mut self, session: &RecordingSession) -> Result<()> {
        self.header = Some(session.header());
        self.lines.clear();
        self.finished = false;
        Ok(())
    }

    fn line(&mut self, line: &str) -> Result<()> {
        self.lines.push(line.to_string());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

/// Writes each recording to a timestamped text file in a directory
pub struct FileSink {
    dir: PathBuf,
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writer: None,
            path: None,
        }
    }

    /// File of the most recent recording
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| ChairError::precondition("recording sink used before begin()"))
    }
}

impl RecordingSink for FileSink {
    fn begin(&mut self, session: &RecordingSession) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(ChairError::Recording)?;
        // second resolution; two runs started in the same second collide
        let name = format!("recording_{}.txt", Local::now().format("%Y%m%d_%H%M%S"));
        let path = self.dir.join(name);

        let file = File::create(&path).map_err(ChairError::Recording)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", session.header()).map_err(ChairError::Recording)?;

        info!("Saving recording to {}", path.display());
        self.writer = Some(writer);
        self.path = Some(path);
        Ok(())
    }

    fn line(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer()?, "{}", line).map_err(ChairError::Recording)
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(ChairError::Recording)?;
        }
        Ok(())
    }
}
