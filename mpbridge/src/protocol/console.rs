//! Friendly-REPL console driving.
//!
//! Unlike the raw REPL, the friendly prompt echoes input and prints its
//! own prompts, which is exactly what a human at a live console wants to
//! see. The runner therefore leaves the shell in friendly mode and does
//! no framing: lines go out fire-and-forget, and whatever comes back
//! within a settle window is split into regular output and error text by
//! a heuristic.

use std::time::Duration;

use log::debug;

use crate::error::Result;
use crate::port::Port;
use crate::protocol::control;
use crate::transport::{Deadline, Transaction, Transport};

/// Console output split into regular and error lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleOutput {
    /// Lines classified as program output.
    pub output: Vec<String>,
    /// Lines classified as error text (tracebacks and their frames).
    pub errors: Vec<String>,
}

impl ConsoleOutput {
    /// Whether nothing arrived at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.output.is_empty() && self.errors.is_empty()
    }
}

/// Split console text into output and error lines.
///
/// The friendly REPL has no framing, so this is a best-effort heuristic
/// and documented as such: a line mentioning `Traceback`, `Error:` or
/// `Exception:` starts an error block, indented lines continue it, and
/// bare prompt echoes are dropped. A program that prints "Error:" itself
/// will be misclassified; that is an accepted limitation.
#[must_use]
pub fn classify_output(text: &str) -> ConsoleOutput {
    let mut result = ConsoleOutput::default();
    let mut in_error_block = false;

    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed == ">>>" || trimmed == "..." {
            continue;
        }

        let looks_like_error = line.contains("Traceback")
            || line.contains("Error:")
            || line.contains("Exception:");
        let continues_error =
            in_error_block && (line.starts_with(' ') || line.starts_with('\t'));

        if looks_like_error || continues_error {
            result.errors.push(line.to_string());
            in_error_block = true;
        } else {
            result.output.push(line.to_string());
            in_error_block = false;
        }
    }

    result
}

/// A live friendly-mode console over a locked transport.
///
/// Holds the transaction for its whole lifetime; a concurrent upload or
/// file operation fails with `AlreadyLocked` until [`disconnect`] is
/// called (or the runner is dropped).
///
/// [`disconnect`]: ConsoleRunner::disconnect
pub struct ConsoleRunner<'a, P: Port> {
    txn: Transaction<'a, P>,
    poll_interval: Duration,
}

impl<'a, P: Port> ConsoleRunner<'a, P> {
    /// Acquire the connection and put the shell into a known-clean
    /// friendly state: leave raw mode if it was stuck there, stop any
    /// running program, then drop the resulting noise.
    pub fn connect(transport: &'a mut Transport<P>) -> Result<Self> {
        let mut txn = transport.begin("REPL console")?;
        txn.write(&[control::ENTER_RAW, control::EXIT_RAW])?;
        txn.write(&[control::INTERRUPT, control::INTERRUPT])?;
        txn.discard_input()?;
        debug!("console connected");
        Ok(Self {
            txn,
            poll_interval: Duration::from_millis(10),
        })
    }

    /// Send one line of input followed by a carriage return.
    ///
    /// Does not wait for a response; pair with [`drain`].
    ///
    /// [`drain`]: ConsoleRunner::drain
    pub fn send_line(&mut self, line: &str) -> Result<()> {
        self.txn.write(line.as_bytes())?;
        self.txn.write(b"\r\n")?;
        Ok(())
    }

    /// Collect everything the device prints within the settle window and
    /// classify it.
    pub fn drain(&mut self, settle: Duration) -> Result<ConsoleOutput> {
        let deadline = Deadline::after(settle);
        let mut collected = Vec::new();
        loop {
            let chunk = self.txn.read_available()?;
            collected.extend_from_slice(&chunk);
            if deadline.expired() || crate::is_interrupt_requested() {
                break;
            }
            std::thread::sleep(self.poll_interval.min(deadline.remaining()));
        }
        Ok(classify_output(&String::from_utf8_lossy(&collected)))
    }

    /// Send a single Ctrl-C without waiting for a reaction.
    pub fn interrupt(&mut self) -> Result<()> {
        self.txn.write(&[control::INTERRUPT])
    }

    /// Send a single Ctrl-D without waiting; at the friendly prompt this
    /// soft-resets the interpreter.
    pub fn soft_reset(&mut self) -> Result<()> {
        self.txn.write(&[control::EXECUTE])
    }

    /// Release the connection. Console connections are not reused; the
    /// caller closes the port afterwards.
    pub fn disconnect(self) {
        debug!("console disconnected");
        // Dropping the transaction releases the lock.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockPort;

    fn quick_transport(stages: &[&[u8]]) -> Transport<MockPort> {
        Transport::new(MockPort::with_stages(stages))
            .with_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn test_classify_plain_output() {
        let result = classify_output("hello\r\nworld\r\n");
        assert_eq!(result.output, vec!["hello", "world"]);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_classify_traceback_block() {
        let text = "before\r\nTraceback (most recent call last):\r\n  File \"<stdin>\", line 1\r\nValueError: boom\r\nafter\r\n";
        let result = classify_output(text);
        assert_eq!(result.output, vec!["before", "after"]);
        assert_eq!(
            result.errors,
            vec![
                "Traceback (most recent call last):",
                "  File \"<stdin>\", line 1",
                "ValueError: boom",
            ]
        );
    }

    #[test]
    fn test_classify_drops_prompt_echoes() {
        let result = classify_output(">>> \r\n... \r\n>>> print(1)\r\n1\r\n");
        assert_eq!(result.output, vec![">>> print(1)", "1"]);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_classify_indent_without_error_is_output() {
        let result = classify_output("  indented data\r\n");
        assert_eq!(result.output, vec!["  indented data"]);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_connect_sends_cleanup_sequence() {
        let mut transport = quick_transport(&[b"stale", b""]);
        {
            let _console = ConsoleRunner::connect(&mut transport).unwrap();
        }
        assert!(!transport.is_locked());
    }

    #[test]
    fn test_connect_blocked_while_locked() {
        let mut transport = quick_transport(&[b""]);
        transport.acquire("uploader").unwrap();
        let err = ConsoleRunner::connect(&mut transport).err();
        assert!(matches!(err, Some(crate::Error::AlreadyLocked(_))));
        transport.release();
    }

    #[test]
    fn test_drain_collects_and_classifies() {
        let mut transport = quick_transport(&[b"", b"ok line\r\nNameError: no\r\n"]);
        let mut console = ConsoleRunner::connect(&mut transport).unwrap();

        let result = console.drain(Duration::from_millis(30)).unwrap();
        assert_eq!(result.output, vec!["ok line"]);
        assert_eq!(result.errors, vec!["NameError: no"]);
    }

    #[test]
    fn test_drain_quiet_device_is_empty() {
        let mut transport = quick_transport(&[b"", b""]);
        let mut console = ConsoleRunner::connect(&mut transport).unwrap();

        let result = console.drain(Duration::from_millis(20)).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_disconnect_releases_lock() {
        let mut transport = quick_transport(&[b"", b""]);
        let console = ConsoleRunner::connect(&mut transport).unwrap();
        console.disconnect();
        assert!(transport.begin("next").is_ok());
    }
}
