use crate::connection::Connection;
use crate::error::TesError;
use crate::reply::{decode_block, Envelope, BLOCK_START};
use log::{debug, trace};
use serde_yaml::{Mapping, Value};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// The `result` payload of a successful exchange.
pub type Reply = Value;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

struct Shared {
    connection: Box<dyn Connection>,
    timeout: Duration,
}

/// One-command-at-a-time exchange layer over a [`Connection`].
///
/// Clones are cheap and share the same underlying link; access to it is
/// serialized, so at most one exchange is ever in flight. Each call to
/// [`Client::exchange`] sends exactly one command line and reads exactly one
/// reply block; nothing is retried or cached here.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Mutex<Shared>>,
}

impl Client {
    pub fn new(connection: Box<dyn Connection>) -> Self {
        Self::with_timeout(connection, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(connection: Box<dyn Connection>, timeout: Duration) -> Self {
        Client {
            inner: Arc::new(Mutex::new(Shared {
                connection,
                timeout,
            })),
        }
    }

    /// Set the reply deadline used by [`Client::exchange`].
    pub fn set_timeout(&self, timeout: Duration) -> Result<(), TesError> {
        self.lock()?.timeout = timeout;
        Ok(())
    }

    pub fn open(&self) -> Result<(), TesError> {
        self.lock()?.connection.open()
    }

    /// Release the link. Never fails, even if called repeatedly or after a
    /// panic poisoned the guard.
    pub fn close(&self) {
        let mut shared = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        shared.connection.close();
    }

    /// Send one command and return the reply's `result` payload.
    pub fn exchange(&self, command: &str) -> Result<Reply, TesError> {
        self.exchange_impl(command, None)
    }

    /// Like [`Client::exchange`] with a one-off deadline.
    pub fn exchange_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<Reply, TesError> {
        self.exchange_impl(command, Some(timeout))
    }

    fn exchange_impl(&self, command: &str, timeout: Option<Duration>) -> Result<Reply, TesError> {
        let mut shared = self.lock()?;
        let timeout = timeout.unwrap_or(shared.timeout);
        debug!("--> {command}");
        shared.connection.write_command(command)?;
        let raw = read_block(shared.connection.as_mut(), timeout)?;
        trace!("<-- {raw:?}");
        match decode_block(&raw) {
            Envelope::Unparsed { raw, reason } => Err(TesError::Decode { reason, raw }),
            Envelope::Parsed(value) => classify(value, &raw),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Shared>, TesError> {
        self.inner.lock().map_err(|_| {
            TesError::Io(io::Error::new(
                io::ErrorKind::Other,
                "connection mutex poisoned",
            ))
        })
    }
}

/// Assemble one reply block from the line stream.
///
/// The deadline is absolute for the whole block, not per line. Lines before
/// the start marker are dropped; this absorbs boot banners after a device
/// reset. The blank terminator line is part of the returned block.
fn read_block(connection: &mut dyn Connection, timeout: Duration) -> Result<String, TesError> {
    let deadline = Instant::now() + timeout;
    let mut block = String::new();
    let mut saw_start = false;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(TesError::Timeout(timeout));
        }
        let line = match connection.read_line(deadline - now)? {
            Some(line) => line,
            None => continue,
        };
        if !saw_start {
            if line.trim() == BLOCK_START {
                saw_start = true;
                block.push_str(&line);
                block.push('\n');
            } else {
                trace!("dropping pre-block line {line:?}");
            }
            continue;
        }
        let terminator = line.trim().is_empty();
        block.push_str(&line);
        block.push('\n');
        if terminator {
            return Ok(block);
        }
    }
}

/// Classify a parsed reply, in fixed order: not a mapping, device-reported
/// error, then success.
fn classify(value: Value, raw: &str) -> Result<Reply, TesError> {
    if value.as_mapping().is_none() {
        return Err(TesError::InvalidResponse {
            raw: raw.to_owned(),
        });
    }
    if let Some(status) = value.get("status").and_then(Value::as_str) {
        if status.eq_ignore_ascii_case("error") {
            let payload = value.get("result").cloned().unwrap_or(Value::Null);
            return Err(TesError::device(payload));
        }
    }
    Ok(value
        .get("result")
        .cloned()
        .unwrap_or_else(|| Value::Mapping(Mapping::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{MockConnection, MockHandle};

    fn scripted() -> (Client, MockHandle) {
        let connection = MockConnection::new();
        let handle = connection.handle();
        let client = Client::with_timeout(Box::new(connection), Duration::from_millis(100));
        (client, handle)
    }

    #[test]
    fn exchange_returns_the_result_payload() {
        let (client, handle) = scripted();
        handle.push_block("---\nstatus: ok\nresult:\n  current_mA: 1.0");
        let reply = client.exchange("TES 1 CURRENT").unwrap();
        assert_eq!(reply.get("current_mA").and_then(Value::as_f64), Some(1.0));
        assert_eq!(handle.writes(), vec!["TES 1 CURRENT".to_owned()]);
    }

    #[test]
    fn error_status_becomes_a_device_error() {
        let (client, handle) = scripted();
        handle.push_block("---\nstatus: ERROR\nresult:\n  code: 10");
        match client.exchange("TES 1 SET 5.000") {
            Err(TesError::Device { summary, payload }) => {
                assert!(summary.contains("InvalidArgument"), "summary: {summary:?}");
                assert_eq!(payload.get("code").and_then(Value::as_i64), Some(10));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn non_mapping_reply_is_invalid_response() {
        let (client, handle) = scripted();
        handle.push_block("---\n42");
        match client.exchange("DAC GET") {
            Err(TesError::InvalidResponse { raw }) => assert!(raw.contains("42")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn unparsable_reply_keeps_the_raw_text() {
        let (client, handle) = scripted();
        handle.push_block("---\nstatus: [1, 2");
        match client.exchange("DAC GET") {
            Err(TesError::Decode { raw, reason }) => {
                assert!(raw.starts_with("---"));
                assert!(!reason.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn boot_noise_before_the_marker_is_skipped() {
        let (client, handle) = scripted();
        handle.push_line("controller v2.1 booting");
        handle.push_line("i2c scan done");
        handle.push_block("---\nstatus: ok\nresult:\n  value: 7");
        let reply = client.exchange("DAC GET").unwrap();
        assert_eq!(reply.get("value").and_then(Value::as_i64), Some(7));
    }

    #[test]
    fn missing_result_yields_an_empty_mapping() {
        let (client, handle) = scripted();
        handle.push_block("---\nstatus: ok");
        let reply = client.exchange("TES 1 ENABLE").unwrap();
        assert_eq!(reply, Value::Mapping(Mapping::new()));
    }

    #[test]
    fn quiet_link_times_out_at_the_deadline() {
        let (client, _handle) = scripted();
        let timeout = Duration::from_millis(50);
        let started = Instant::now();
        match client.exchange_with_timeout("TES 1 GET", timeout) {
            Err(TesError::Timeout(t)) => assert_eq!(t, timeout),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= timeout, "gave up after only {elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
    }

    #[test]
    fn close_releases_the_link_even_after_a_poisoned_exchange() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        struct WedgedConnection {
            open: Arc<AtomicBool>,
        }

        impl Connection for WedgedConnection {
            fn open(&mut self) -> Result<(), TesError> {
                self.open.store(true, Ordering::SeqCst);
                Ok(())
            }
            fn close(&mut self) {
                self.open.store(false, Ordering::SeqCst);
            }
            fn is_open(&self) -> bool {
                self.open.load(Ordering::SeqCst)
            }
            fn write_command(&mut self, _: &str) -> Result<(), TesError> {
                self.open()
            }
            fn read_line(&mut self, _: Duration) -> Result<Option<String>, TesError> {
                panic!("link wedged mid-read")
            }
        }

        let open = Arc::new(AtomicBool::new(false));
        let connection = WedgedConnection { open: open.clone() };
        let client = Client::with_timeout(Box::new(connection), Duration::from_millis(10));

        let worker = client.clone();
        let outcome = std::thread::spawn(move || worker.exchange("DAC GET")).join();
        assert!(outcome.is_err());
        assert!(open.load(Ordering::SeqCst));

        client.close();
        assert!(!open.load(Ordering::SeqCst));
    }

    #[test]
    fn block_started_but_never_terminated_still_times_out() {
        let (client, handle) = scripted();
        handle.push_line("---");
        handle.push_line("status: ok");
        match client.exchange_with_timeout("TES 1 GET", Duration::from_millis(50)) {
            Err(TesError::Timeout(_)) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
