use crate::error::TesError;
use std::collections::VecDeque;
#[cfg(any(feature = "socket", feature = "serial"))]
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
#[cfg(any(feature = "socket", feature = "serial"))]
use std::time::Instant;

#[cfg(feature = "socket")]
use std::io::{BufRead, BufReader};
#[cfg(feature = "serial")]
use std::io::Read;
#[cfg(any(feature = "socket", feature = "serial"))]
use std::io::Write;
#[cfg(feature = "socket")]
use std::net::TcpStream;

/// Terminator appended to every outgoing command line.
pub const LINE_TERMINATOR: &str = "\r\n";

#[cfg(any(feature = "socket", feature = "serial"))]
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Byte-level access to the device link.
///
/// An implementation owns its link exclusively, with at most one open at a
/// time. `open` and `close` are idempotent, and `close` never fails.
pub trait Connection: Send {
    /// Open the link if it is not already open.
    fn open(&mut self) -> Result<(), TesError>;
    /// Release the link. Safe to call when already closed.
    fn close(&mut self);
    /// Whether the link is currently open.
    fn is_open(&self) -> bool;
    /// Send one command line, opening the link first if needed. The protocol
    /// terminator is appended here.
    fn write_command(&mut self, command: &str) -> Result<(), TesError>;
    /// Read one line, terminator stripped. Returns `Ok(None)` when `timeout`
    /// elapses with no complete line; hard I/O failures are errors.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TesError>;
}

#[cfg(feature = "serial")]
pub struct SerialConnection {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn serialport::SerialPort>>,
    pending: Vec<u8>,
}

#[cfg(feature = "serial")]
impl SerialConnection {
    pub fn new(port_name: &str, baud_rate: u32) -> Self {
        SerialConnection {
            port_name: port_name.to_owned(),
            baud_rate,
            port: None,
            pending: Vec::new(),
        }
    }
}

#[cfg(feature = "serial")]
impl Connection for SerialConnection {
    fn open(&mut self) -> Result<(), TesError> {
        if self.port.is_none() {
            let port = serialport::new(&self.port_name, self.baud_rate)
                .timeout(MIN_READ_TIMEOUT)
                .open()?;
            log::debug!("opened serial port {}", self.port_name);
            self.port = Some(port);
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::debug!("closed serial port {}", self.port_name);
        }
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write_command(&mut self, command: &str) -> Result<(), TesError> {
        self.open()?;
        let port = self.port.as_mut().ok_or(TesError::NotConnected)?;
        port.write_all(command.as_bytes())?;
        port.write_all(LINE_TERMINATOR.as_bytes())?;
        port.flush()?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TesError> {
        self.open()?;
        let port = self.port.as_mut().ok_or(TesError::NotConnected)?;
        let deadline = Instant::now() + timeout.max(MIN_READ_TIMEOUT);
        let mut byte = [0u8; 1];
        loop {
            // The port timeout restarts on every byte, so re-tighten it to
            // what is left of the deadline before each read. Partial input
            // stays buffered for the next call.
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            port.set_timeout((deadline - now).max(MIN_READ_TIMEOUT))?;
            match port.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    if byte[0] == b'\n' {
                        let line = String::from_utf8_lossy(&self.pending).into_owned();
                        self.pending.clear();
                        return Ok(Some(line));
                    }
                    if byte[0] != b'\r' {
                        self.pending.push(byte[0]);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(TesError::Io(e)),
            }
        }
    }
}

/// Link over TCP, for controllers behind a serial-to-ethernet bridge.
#[cfg(feature = "socket")]
pub struct SocketConnection {
    address: String,
    stream: Option<SocketStream>,
    pending: String,
}

#[cfg(feature = "socket")]
struct SocketStream {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

#[cfg(feature = "socket")]
impl SocketConnection {
    pub fn new(address: &str) -> Self {
        SocketConnection {
            address: address.to_owned(),
            stream: None,
            pending: String::new(),
        }
    }
}

#[cfg(feature = "socket")]
impl Connection for SocketConnection {
    fn open(&mut self) -> Result<(), TesError> {
        if self.stream.is_none() {
            let writer = TcpStream::connect(&self.address)?;
            writer.set_read_timeout(Some(MIN_READ_TIMEOUT))?;
            let reader = BufReader::new(writer.try_clone()?);
            log::debug!("connected to {}", self.address);
            self.stream = Some(SocketStream { writer, reader });
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("disconnected from {}", self.address);
        }
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn write_command(&mut self, command: &str) -> Result<(), TesError> {
        self.open()?;
        let stream = self.stream.as_mut().ok_or(TesError::NotConnected)?;
        stream.writer.write_all(command.as_bytes())?;
        stream.writer.write_all(LINE_TERMINATOR.as_bytes())?;
        stream.writer.flush()?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TesError> {
        self.open()?;
        let stream = self.stream.as_mut().ok_or(TesError::NotConnected)?;
        let deadline = Instant::now() + timeout.max(MIN_READ_TIMEOUT);
        loop {
            // The socket timeout restarts on every arriving byte, so
            // re-tighten it to what is left of the deadline before each
            // read. Whatever arrived before the deadline stays in `pending`.
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            stream
                .writer
                .set_read_timeout(Some((deadline - now).max(MIN_READ_TIMEOUT)))?;
            let (consumed, complete) = {
                let available = match stream.reader.fill_buf() {
                    Ok([]) => {
                        return Err(TesError::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "link closed by peer",
                        )))
                    }
                    Ok(available) => available,
                    Err(ref e)
                        if e.kind() == io::ErrorKind::TimedOut
                            || e.kind() == io::ErrorKind::WouldBlock =>
                    {
                        continue
                    }
                    Err(e) => return Err(TesError::Io(e)),
                };
                match available.iter().position(|&b| b == b'\n') {
                    Some(at) => {
                        self.pending
                            .push_str(&String::from_utf8_lossy(&available[..at]));
                        (at + 1, true)
                    }
                    None => {
                        self.pending.push_str(&String::from_utf8_lossy(available));
                        (available.len(), false)
                    }
                }
            };
            stream.reader.consume(consumed);
            if complete {
                let line = self.pending.trim_end_matches('\r').to_owned();
                self.pending.clear();
                return Ok(Some(line));
            }
        }
    }
}

/// Scripted stand-in for a real link, for exercising the stack without
/// hardware.
///
/// Reply lines are queued through the shared [`MockHandle`], which also
/// records every command written so tests can assert on traffic (including
/// its absence).
#[derive(Default)]
pub struct MockConnection {
    state: MockHandle,
}

#[derive(Clone, Default)]
pub struct MockHandle {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    open: bool,
    opens: usize,
    writes: Vec<String>,
    lines: VecDeque<String>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> MockHandle {
        self.state.clone()
    }
}

impl MockHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a single reply line.
    pub fn push_line(&self, line: &str) {
        self.lock().lines.push_back(line.to_owned());
    }

    /// Queue a whole reply block, followed by its blank terminator line.
    pub fn push_block(&self, block: &str) {
        let mut state = self.lock();
        for line in block.lines() {
            state.lines.push_back(line.to_owned());
        }
        state.lines.push_back(String::new());
    }

    /// Every command line written so far, in order.
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// How many times the link transitioned from closed to open.
    pub fn opens(&self) -> usize {
        self.lock().opens
    }
}

impl Connection for MockConnection {
    fn open(&mut self) -> Result<(), TesError> {
        let mut state = self.state.lock();
        if !state.open {
            state.open = true;
            state.opens += 1;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().open = false;
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn write_command(&mut self, command: &str) -> Result<(), TesError> {
        self.open()?;
        self.state.lock().writes.push(command.to_owned());
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TesError> {
        self.open()?;
        if let Some(line) = self.state.lock().lines.pop_front() {
            return Ok(Some(line));
        }
        // Behave like a quiet port: consume the deadline, then give up.
        std::thread::sleep(timeout);
        Ok(None)
    }
}
