//! Raw REPL session management.
//!
//! The raw REPL is MicroPython's machine-facing mode: no echo, no line
//! editing, and a fixed framing for execution results. A [`RawSession`]
//! owns a transport transaction for its whole lifetime, walks the shell
//! into raw mode, executes code snippets, and restores the friendly
//! prompt on the way out.
//!
//! Framing of one execution:
//!
//! ```text
//! host:   <python source> 0x04
//! device: "OK" <stdout bytes> 0x04 <stderr bytes> 0x04 ">"
//! ```
//!
//! Any deviation from that framing is a hard failure. The session never
//! guesses at partial output and never retries on its own.

use std::time::Duration;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{IDLE_PROMPT, RAW_BANNER, RAW_PROMPT, SEGMENT_END, SOFT_REBOOT, STATUS_OK, control};
use crate::transport::{Deadline, Transaction, Transport};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No device conversation yet.
    Disconnected,
    /// Sending Ctrl-C and waiting for the idle prompt.
    Interrupting,
    /// Sent Ctrl-A, waiting for the raw-mode banner.
    EnteringRaw,
    /// Raw mode confirmed, ready to execute.
    Ready,
    /// A command is in flight.
    Executing,
}

/// Tunable timeouts for session setup.
#[derive(Debug, Clone)]
pub struct RawConfig {
    /// Overall budget for getting the shell to show its prompt. A busy
    /// program can swallow the first interrupts, so this is generous.
    pub responsiveness_timeout: Duration,
    /// How long each individual interrupt attempt waits for the prompt.
    pub prompt_wait: Duration,
    /// How long to wait for the raw-mode and soft-reboot banners.
    pub banner_timeout: Duration,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            responsiveness_timeout: Duration::from_secs(20),
            prompt_wait: Duration::from_millis(500),
            banner_timeout: Duration::from_secs(5),
        }
    }
}

/// An active raw-REPL session holding the transport transaction.
#[derive(Debug)]
pub struct RawSession<'a, P: Port> {
    txn: Transaction<'a, P>,
    state: SessionState,
    config: RawConfig,
}

impl<'a, P: Port> RawSession<'a, P> {
    /// Interrupt whatever the board is doing and enter raw mode.
    ///
    /// With `soft_reboot`, the interpreter is additionally reset after
    /// entering raw mode, so the session starts from a clean heap with
    /// no user code loaded.
    pub fn begin(transport: &'a mut Transport<P>, soft_reboot: bool) -> Result<Self> {
        Self::begin_with_config(transport, soft_reboot, RawConfig::default())
    }

    /// [`RawSession::begin`] with explicit timeouts.
    pub fn begin_with_config(
        transport: &'a mut Transport<P>,
        soft_reboot: bool,
        config: RawConfig,
    ) -> Result<Self> {
        let txn = transport.begin("raw REPL session")?;
        let mut session = Self {
            txn,
            state: SessionState::Disconnected,
            config,
        };
        session.interrupt_until_prompt()?;
        session.enter_raw()?;
        if soft_reboot {
            session.soft_reboot()?;
        }
        session.state = SessionState::Ready;
        Ok(session)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Repeatedly interrupt the board until the idle prompt appears.
    ///
    /// One Ctrl-C per attempt: a program stuck in a tight loop may eat
    /// the first few, and the prompt only shows once the interpreter is
    /// back at the top level.
    fn interrupt_until_prompt(&mut self) -> Result<()> {
        self.state = SessionState::Interrupting;
        let deadline = Deadline::after(self.config.responsiveness_timeout);
        let mut attempts = 0u32;
        loop {
            if crate::is_interrupt_requested() {
                return Err(Error::Timeout(
                    "interrupted while waiting for the device".to_string(),
                ));
            }
            self.txn.write(&[control::INTERRUPT])?;
            attempts += 1;
            match self.txn.read_until(IDLE_PROMPT, self.config.prompt_wait) {
                Ok(_) => {
                    debug!("device prompt reached after {attempts} interrupt(s)");
                    return Ok(());
                },
                Err(Error::Timeout(_)) if !deadline.expired() => {
                    trace!("no prompt after interrupt {attempts}, retrying");
                },
                Err(Error::Timeout(_)) => {
                    return Err(Error::Timeout(format!(
                        "device not responding after {attempts} interrupt attempts"
                    )));
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Switch the shell into raw mode and require its banner.
    fn enter_raw(&mut self) -> Result<()> {
        self.state = SessionState::EnteringRaw;
        self.txn.discard_input()?;
        self.txn.write(&[control::ENTER_RAW])?;
        // The shell follows the banner with its raw prompt; consume both
        // so the next read starts at a command boundary.
        let result = self
            .txn
            .read_until(RAW_BANNER, self.config.banner_timeout)
            .and_then(|_| self.txn.read_until(RAW_PROMPT, self.config.banner_timeout));
        match result {
            Ok(_) => Ok(()),
            Err(Error::Timeout(_)) => Err(Error::Protocol(
                "device did not enter raw REPL mode".to_string(),
            )),
            Err(e) => Err(e),
        }
    }

    /// Soft-reset the interpreter from raw mode and wait for it to come
    /// back up in raw mode again.
    fn soft_reboot(&mut self) -> Result<()> {
        debug!("soft-rebooting interpreter");
        self.txn.write(&[control::EXECUTE])?;
        self.txn
            .read_until(SOFT_REBOOT, self.config.banner_timeout)?;
        self.txn
            .read_until(RAW_BANNER, self.config.banner_timeout)?;
        self.txn
            .read_until(RAW_PROMPT, self.config.banner_timeout)?;
        Ok(())
    }

    /// Execute a Python snippet and return its stdout.
    ///
    /// A non-`OK` status fails with [`Error::Execution`] before any
    /// output is read. A non-empty stderr segment fails with
    /// [`Error::Remote`], carrying both the traceback and whatever
    /// stdout was produced before the exception.
    pub fn exec(&mut self, code: &str, timeout: Duration) -> Result<String> {
        if self.state != SessionState::Ready {
            return Err(Error::Protocol(format!(
                "cannot execute in state {:?}",
                self.state
            )));
        }
        self.state = SessionState::Executing;
        let result = self.exec_inner(code, timeout);
        self.state = SessionState::Ready;
        result
    }

    fn exec_inner(&mut self, code: &str, timeout: Duration) -> Result<String> {
        trace!("exec ({} bytes)", code.len());
        self.txn.write(code.as_bytes())?;
        self.txn.write(&[control::EXECUTE])?;

        let status = self.txn.read_exactly(2, timeout)?;
        if status != STATUS_OK {
            return Err(Error::Execution {
                status: [status[0], status[1]],
            });
        }

        let mut stdout = self.txn.read_until(SEGMENT_END, timeout)?;
        stdout.pop(); // segment terminator
        let mut stderr = self.txn.read_until(SEGMENT_END, timeout)?;
        stderr.pop();
        // The shell prints its raw prompt after the result; consume it so
        // it cannot be mistaken for the next command's status bytes.
        self.txn.read_until(RAW_PROMPT, timeout)?;

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        if !stderr.is_empty() {
            return Err(Error::Remote {
                traceback: String::from_utf8_lossy(&stderr).into_owned(),
                stdout,
            });
        }
        Ok(stdout)
    }

    /// Leave raw mode and release the connection.
    ///
    /// Waits for the friendly prompt so the device is known-idle before
    /// the next operation takes over. Dropping the session without
    /// calling this still releases the lock, just without the handshake.
    pub fn end(mut self) -> Result<()> {
        self.txn.write(&[control::EXIT_RAW])?;
        self.txn
            .read_until(IDLE_PROMPT, self.config.banner_timeout)?;
        self.state = SessionState::Disconnected;
        Ok(())
    }
}
