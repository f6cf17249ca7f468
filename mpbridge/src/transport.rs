//! Buffered serial transport with transaction locking.
//!
//! [`Transport`] wraps a [`Port`] with a receive buffer and a transaction
//! lock. The raw-REPL protocol is stateful, so every multi-step exchange
//! must run under a [`Transaction`]: acquiring one while another is live
//! fails immediately with [`Error::AlreadyLocked`] instead of interleaving
//! bytes from two conversations.
//!
//! Every blocking read is bounded by a [`Deadline`]. The underlying
//! driver's `TimedOut` reads are absorbed into the deadline loop; a read
//! of zero bytes means the stream closed and maps to
//! [`Error::ConnectionLost`].

use std::io::ErrorKind;
use std::time::{Duration, Instant};

use log::{trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;

/// Default pause between buffer polls while waiting for data.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// An absolute point in time after which a blocking operation gives up.
///
/// All suspend points in the crate are bounded through this one type, so
/// there is a single place where "how long do we wait" is decided.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    end: Instant,
}

impl Deadline {
    /// A deadline expiring after `timeout` from now.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self {
            end: Instant::now() + timeout,
        }
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn expired(&self) -> bool {
        Instant::now() >= self.end
    }

    /// Time left before expiry, zero if already expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.end.saturating_duration_since(Instant::now())
    }
}

/// Buffered transport over a serial port.
#[derive(Debug)]
pub struct Transport<P: Port> {
    port: Option<P>,
    rx: Vec<u8>,
    locked: bool,
    lock_owner: String,
    poll_interval: Duration,
}

impl<P: Port> Transport<P> {
    /// Wrap an open port.
    pub fn new(port: P) -> Self {
        Self {
            port: Some(port),
            rx: Vec::new(),
            locked: false,
            lock_owner: String::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the pause between buffer polls (mainly for tests).
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Name of the underlying port, if still attached.
    pub fn port_name(&self) -> Option<&str> {
        self.port.as_ref().map(Port::name)
    }

    /// Whether a transaction currently holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Take the lock for a named operation.
    ///
    /// Fails with [`Error::AlreadyLocked`] if another operation holds it,
    /// or [`Error::StreamUnavailable`] if the port has been closed.
    pub fn acquire(&mut self, owner: &str) -> Result<()> {
        if self.port.is_none() {
            return Err(Error::StreamUnavailable(
                "port is closed".to_string(),
            ));
        }
        if self.locked {
            return Err(Error::AlreadyLocked(format!(
                "in use by {}",
                self.lock_owner
            )));
        }
        trace!("transaction lock acquired by {owner}");
        self.locked = true;
        self.lock_owner = owner.to_string();
        Ok(())
    }

    /// Release the lock. Harmless if not held.
    pub fn release(&mut self) {
        if self.locked {
            trace!("transaction lock released by {}", self.lock_owner);
        }
        self.locked = false;
        self.lock_owner.clear();
    }

    /// Start a transaction, returning a guard that releases on drop.
    pub fn begin(&mut self, owner: &str) -> Result<Transaction<'_, P>> {
        self.acquire(owner)?;
        Ok(Transaction { transport: self })
    }

    /// Clear a leaked lock and throw away buffered input.
    ///
    /// Used as a recovery path when a previous operation died without
    /// releasing (for example a panicking caller that leaked its guard).
    pub fn force_cleanup(&mut self) {
        if self.locked {
            warn!("force-releasing transaction lock held by {}", self.lock_owner);
        }
        self.locked = false;
        self.lock_owner.clear();
        self.rx.clear();
        if let Some(port) = self.port.as_mut() {
            if let Err(e) = port.clear_buffers() {
                warn!("failed to clear driver buffers during cleanup: {e}");
            }
        }
    }

    /// Wait until the lock is free, forcing a cleanup once before giving up.
    pub fn wait_for_available(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Deadline::after(timeout);
        let mut cleaned = false;
        loop {
            if !self.locked {
                return Ok(());
            }
            if deadline.expired() {
                if cleaned {
                    return Err(Error::Timeout(format!(
                        "connection still in use by {}",
                        self.lock_owner
                    )));
                }
                self.force_cleanup();
                cleaned = true;
                continue;
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Whether the transport still holds a usable port.
    ///
    /// Probes by clearing the driver buffers; a stale handle (device
    /// unplugged and re-enumerated) errors here and the caller reopens.
    pub fn is_usable(&mut self) -> bool {
        match self.port.as_mut() {
            Some(port) => port.clear_buffers().is_ok(),
            None => false,
        }
    }

    /// Close the port. Further transactions fail with `StreamUnavailable`.
    pub fn close(&mut self) -> Result<()> {
        self.rx.clear();
        if let Some(mut port) = self.port.take() {
            port.close()?;
        }
        Ok(())
    }

    fn port_mut(&mut self) -> Result<&mut P> {
        self.port
            .as_mut()
            .ok_or_else(|| Error::StreamUnavailable("port is closed".to_string()))
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        port.write_all_bytes(bytes).map_err(map_lost)
    }

    /// Pull whatever the port has into the receive buffer.
    ///
    /// Returns `true` if any bytes arrived. `TimedOut`/`WouldBlock` count
    /// as "nothing yet"; a zero-length read is a closed stream.
    fn fill_rx(&mut self) -> Result<bool> {
        let port = self.port_mut()?;
        let mut chunk = [0u8; 256];
        match std::io::Read::read(port, &mut chunk) {
            Ok(0) => Err(Error::ConnectionLost(
                "serial stream closed".to_string(),
            )),
            Ok(n) => {
                self.rx.extend_from_slice(&chunk[..n]);
                Ok(true)
            },
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(false),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(false),
            Err(e) => Err(map_lost(Error::Io(e))),
        }
    }

    fn read_until_bytes(&mut self, pattern: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        debug_assert!(!pattern.is_empty());
        let deadline = Deadline::after(timeout);
        loop {
            if let Some(pos) = find_subslice(&self.rx, pattern) {
                let out: Vec<u8> = self.rx.drain(..pos + pattern.len()).collect();
                return Ok(out);
            }
            if deadline.expired() {
                return Err(Error::Timeout(format!(
                    "waited for {:?} but received only {} byte(s)",
                    String::from_utf8_lossy(pattern),
                    self.rx.len()
                )));
            }
            if !self.fill_rx()? {
                std::thread::sleep(self.poll_interval.min(deadline.remaining()));
            }
        }
    }

    fn read_exactly_bytes(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Deadline::after(timeout);
        loop {
            if self.rx.len() >= n {
                return Ok(self.rx.drain(..n).collect());
            }
            if deadline.expired() {
                return Err(Error::Timeout(format!(
                    "expected {n} byte(s), received {}",
                    self.rx.len()
                )));
            }
            if !self.fill_rx()? {
                std::thread::sleep(self.poll_interval.min(deadline.remaining()));
            }
        }
    }

    fn discard_input_bytes(&mut self) -> Result<()> {
        self.rx.clear();
        let port = self.port_mut()?;
        port.clear_buffers()
    }
}

/// Scoped access to a locked transport.
///
/// Dropping the transaction releases the lock, so a failed setup path
/// cannot leave the connection stuck.
#[derive(Debug)]
pub struct Transaction<'a, P: Port> {
    transport: &'a mut Transport<P>,
}

impl<P: Port> Transaction<'_, P> {
    /// Write raw bytes to the device.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.transport.write_bytes(bytes)
    }

    /// Read until `pattern` arrives, returning everything through it.
    ///
    /// The pattern is consumed from the buffer and included at the end of
    /// the returned bytes; anything after it stays buffered.
    pub fn read_until(&mut self, pattern: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.transport.read_until_bytes(pattern, timeout)
    }

    /// Read exactly `n` bytes, leaving any surplus buffered.
    pub fn read_exactly(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.transport.read_exactly_bytes(n, timeout)
    }

    /// Take whatever has arrived so far without waiting for a pattern.
    ///
    /// Returns an empty vec when the device is quiet.
    pub fn read_available(&mut self) -> Result<Vec<u8>> {
        self.transport.fill_rx()?;
        Ok(self.transport.rx.drain(..).collect())
    }

    /// Drop buffered unread bytes and clear the driver's input buffer.
    pub fn discard_input(&mut self) -> Result<()> {
        self.transport.discard_input_bytes()
    }
}

impl<P: Port> Drop for Transaction<'_, P> {
    fn drop(&mut self) {
        self.transport.release();
    }
}

/// Map `NotConnected` I/O failures to `ConnectionLost`.
fn map_lost(err: Error) -> Error {
    match err {
        Error::Io(e) if e.kind() == ErrorKind::NotConnected => {
            Error::ConnectionLost("serial stream closed".to_string())
        },
        other => other,
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockPort;

    fn transport_with(data: &[u8]) -> Transport<MockPort> {
        Transport::new(MockPort::with_data(data))
            .with_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn test_acquire_while_held_fails() {
        let mut t = transport_with(b"");
        t.acquire("console").unwrap();

        let err = t.acquire("uploader").unwrap_err();
        assert!(matches!(err, Error::AlreadyLocked(_)));
        assert!(err.to_string().contains("console"));
    }

    #[test]
    fn test_release_enables_reacquire() {
        let mut t = transport_with(b"");
        t.acquire("a").unwrap();
        t.release();
        t.acquire("b").unwrap();
        assert!(t.is_locked());
    }

    #[test]
    fn test_transaction_guard_releases_on_drop() {
        let mut t = transport_with(b"");
        {
            let _txn = t.begin("probe").unwrap();
        }
        assert!(!t.is_locked());
        t.begin("again").unwrap();
    }

    #[test]
    fn test_force_cleanup_clears_leaked_lock() {
        let mut t = transport_with(b"");
        t.acquire("leaked").unwrap();
        t.force_cleanup();
        assert!(!t.is_locked());
        t.acquire("next").unwrap();
    }

    #[test]
    fn test_wait_for_available_recovers_via_cleanup() {
        let mut t = transport_with(b"");
        t.acquire("leaked").unwrap();
        t.wait_for_available(Duration::from_millis(20)).unwrap();
        assert!(!t.is_locked());
    }

    #[test]
    fn test_read_until_consumes_through_pattern() {
        let mut t = transport_with(b"hello>>> world");
        let mut txn = t.begin("test").unwrap();

        let got = txn.read_until(b">>> ", Duration::from_millis(100)).unwrap();
        assert_eq!(got, b"hello>>> ");

        // The remainder is still buffered for the next read.
        let rest = txn.read_exactly(5, Duration::from_millis(100)).unwrap();
        assert_eq!(rest, b"world");
    }

    #[test]
    fn test_read_until_missing_pattern_times_out() {
        let mut t = transport_with(b"no prompt here");
        let mut txn = t.begin("test").unwrap();

        let start = Instant::now();
        let err = txn
            .read_until(b">>> ", Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        // Deadline plus poll slack, not an unbounded wait.
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_read_exactly_retains_surplus() {
        let mut t = transport_with(b"OKrest");
        let mut txn = t.begin("test").unwrap();

        let status = txn.read_exactly(2, Duration::from_millis(100)).unwrap();
        assert_eq!(status, b"OK");
        let rest = txn.read_exactly(4, Duration::from_millis(100)).unwrap();
        assert_eq!(rest, b"rest");
    }

    #[test]
    fn test_closed_stream_maps_to_connection_lost() {
        let mut port = MockPort::with_data(b"");
        port.eof = true;
        let mut t = Transport::new(port).with_poll_interval(Duration::from_millis(1));
        let mut txn = t.begin("test").unwrap();

        let err = txn.read_until(b">", Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
    }

    #[test]
    fn test_begin_after_close_is_stream_unavailable() {
        let mut t = transport_with(b"");
        t.close().unwrap();
        let err = t.begin("test").unwrap_err();
        assert!(matches!(err, Error::StreamUnavailable(_)));
    }

    #[test]
    fn test_discard_input_drops_buffered_bytes() {
        let mut t = transport_with(b"stale bytes>>> fresh");
        let mut txn = t.begin("test").unwrap();

        // Pull everything into the buffer first.
        let _ = txn.read_until(b">>> ", Duration::from_millis(100)).unwrap();
        txn.discard_input().unwrap();

        let err = txn.read_exactly(1, Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_deadline_expiry() {
        let d = Deadline::after(Duration::from_millis(0));
        assert!(d.expired());
        assert_eq!(d.remaining(), Duration::ZERO);

        let d = Deadline::after(Duration::from_secs(60));
        assert!(!d.expired());
    }
}
