// Line transport to the chair controller
//
// Outbound: one ASCII command per line, terminated with CR.
// Inbound: lines split on CR or LF, decoded as ASCII with bad bytes dropped.

use serialport::{ClearBuffer, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::command::WireCommand;
use super::error::{ChairError, Result};

/// Poll period of a single serial read
pub const POLL_TIMEOUT_MS: u64 = 100;

/// Byte-level link to the controller, one line at a time
pub trait Transport {
    /// Send one line; the terminator is added by the transport
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Next inbound line, or `None` if nothing complete arrived in time
    fn read_line(&mut self) -> Result<Option<String>>;

    /// Throw away everything received but not read yet
    fn clear_input(&mut self) -> Result<()>;

    fn send(&mut self, command: &WireCommand) -> Result<()> {
        match command.note() {
            Some(note) => debug!("→ {}\t({})", command, note),
            None => debug!("→ {}", command),
        }
        self.write_line(command.as_str())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_line(&mut self, line: &str) -> Result<()> {
        (**self).write_line(line)
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        (**self).read_line()
    }

    fn clear_input(&mut self) -> Result<()> {
        (**self).clear_input()
    }
}

/// Decode an inbound line, dropping anything that is not ASCII
pub fn decode_line(bytes: &[u8]) -> String {
    let text: String = bytes
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect();
    if text.len() != bytes.len() {
        warn!(
            "Dropped {} non-ASCII byte(s) from inbound line",
            bytes.len() - text.len()
        );
    }
    text.trim_end_matches(['\r', '\n']).to_string()
}

/// Pull the first complete line out of `buffer`, skipping empty ones
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    while let Some(end) = buffer.iter().position(|&b| b == b'\r' || b == b'\n') {
        let raw: Vec<u8> = buffer.drain(..=end).collect();
        let line = decode_line(&raw[..raw.len() - 1]);
        if !line.trim().is_empty() {
            return Some(line);
        }
    }
    None
}

/// Serial connection to the chair controller
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    pending: Vec<u8>,
    read_timeout: Duration,
}

impl SerialTransport {
    /// Open the controller port (8N1)
    pub fn open(port_name: &str, baudrate: u32, read_timeout: Duration) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(POLL_TIMEOUT_MS))
            .open()?;

        Ok(Self::from_port(port, read_timeout))
    }

    /// Wrap an already open port
    pub fn from_port(port: Box<dyn SerialPort>, read_timeout: Duration) -> Self {
        Self {
            port,
            pending: Vec::new(),
            read_timeout,
        }
    }
}

impl Transport for SerialTransport {
    fn write_line(&mut self, line: &str) -> Result<()> {
        if !line.is_ascii() {
            return Err(ChairError::invalid(format!("non-ASCII command {:?}", line)));
        }
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\r');

        self.port
            .write_all(&bytes)
            .and_then(|_| self.port.flush())
            .map_err(ChairError::TransportWrite)
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let deadline = Instant::now() + self.read_timeout;
        let mut chunk = [0u8; 256];

        loop {
            if let Some(line) = take_line(&mut self.pending) {
                return Ok(Some(line));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            match self.port.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ChairError::TransportRead(e)),
            }
        }
    }

    fn clear_input(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            debug!("Discarding {} buffered inbound byte(s)", self.pending.len());
            self.pending.clear();
        }
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

type SharedLink = Box<dyn Transport + Send>;

/// The single controller link, shared between the operator side and motion runs
///
/// Whoever holds a [`ChannelGuard`] owns the wire; everybody else is turned away
/// instead of interleaving bytes.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Mutex<SharedLink>>,
}

impl Channel {
    pub fn new(transport: impl Transport + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(transport))),
        }
    }

    /// Take exclusive use of the link, failing if someone else holds it
    pub fn try_claim(&self) -> Result<ChannelGuard<'_>> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(ChannelGuard { guard }),
            // A panicked holder left the port itself intact
            Err(TryLockError::Poisoned(poisoned)) => Ok(ChannelGuard {
                guard: poisoned.into_inner(),
            }),
            Err(TryLockError::WouldBlock) => Err(ChairError::precondition(
                "controller link is busy with another command stream",
            )),
        }
    }

    /// Send one manual command, rejected while a run holds the link
    pub fn send_raw(&self, command: &WireCommand) -> Result<()> {
        self.try_claim()?.send(command)
    }
}

/// Exclusive access to the [`Channel`] until dropped
pub struct ChannelGuard<'a> {
    guard: MutexGuard<'a, SharedLink>,
}

impl Transport for ChannelGuard<'_> {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.guard.write_line(line)
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        self.guard.read_line()
    }

    fn clear_input(&mut self) -> Result<()> {
        self.guard.clear_input()
    }
}
