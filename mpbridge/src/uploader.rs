//! Upload orchestration: get a program onto the board and run it.
//!
//! The [`Uploader`] owns the current transport (there is no global
//! connection anywhere in the crate) and walks a fixed sequence: stop
//! whatever is running, enter the raw REPL, write the file, leave raw
//! mode, and optionally soft-reset so the new program starts.
//!
//! Progress is reported at fixed milestones through a callback; it is UI
//! feedback only and never drives control flow. The orchestrator does
//! not retry: a failure tears the connection down (except a lock
//! conflict, which keeps it so the user can close the conflicting
//! feature) and the next attempt starts clean.

use log::{debug, info};

use crate::error::{Error, Result};
use crate::fs::{DeviceFs, WriteOptions};
use crate::port::Port;
use crate::protocol::control;
use crate::protocol::raw_repl::{RawConfig, RawSession};
use crate::transport::Transport;

/// Name the board's interpreter runs automatically after a reset.
pub const MAIN_SCRIPT: &str = "main.py";

/// Where an upload is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Nothing in flight.
    Idle,
    /// Validating inputs and the attached transport.
    Preparing,
    /// Making sure a usable connection exists.
    Connecting,
    /// Sending interrupts to stop running code.
    Stopping,
    /// Writing the file over the raw REPL.
    Writing,
    /// Triggering the soft reset that starts the new program.
    Resetting,
    /// Finished successfully.
    Done,
    /// Finished with an error.
    Failed,
}

/// Progress callback: stage description plus percent complete.
pub type ProgressFn<'a> = dyn FnMut(&str, u8) + 'a;

/// Owns the device connection and runs uploads over it.
pub struct Uploader<P: Port> {
    transport: Option<Transport<P>>,
    state: UploadState,
    raw_config: RawConfig,
}

impl<P: Port> Default for Uploader<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Port> Uploader<P> {
    /// An uploader with no connection attached.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transport: None,
            state: UploadState::Idle,
            raw_config: RawConfig::default(),
        }
    }

    /// Override session timeouts (mainly for tests).
    #[must_use]
    pub fn with_raw_config(mut self, config: RawConfig) -> Self {
        self.raw_config = config;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Hand the uploader a freshly opened connection.
    pub fn attach(&mut self, transport: Transport<P>) {
        self.transport = Some(transport);
    }

    /// Whether a connection is currently attached.
    #[must_use]
    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Whether the attached connection still responds at the driver
    /// level. A stale handle (board unplugged and back) fails here.
    pub fn is_transport_usable(&mut self) -> bool {
        self.transport
            .as_mut()
            .is_some_and(Transport::is_usable)
    }

    /// Drop and close the connection, if any.
    pub fn detach(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.close();
        }
    }

    /// Write `code` as `main.py` and soft-reset the board to run it.
    pub fn upload_as_main(&mut self, code: &str, progress: &mut ProgressFn) -> Result<()> {
        let result = self.run_upload(MAIN_SCRIPT, code.as_bytes(), true, progress);
        self.route_failure(&result);
        result
    }

    /// Write an auxiliary file without resetting the board.
    pub fn save_file(&mut self, name: &str, content: &[u8], progress: &mut ProgressFn) -> Result<()> {
        let result = self.run_upload(name, content, false, progress);
        self.route_failure(&result);
        result
    }

    fn run_upload(
        &mut self,
        name: &str,
        content: &[u8],
        reset_after: bool,
        progress: &mut ProgressFn,
    ) -> Result<()> {
        self.state = UploadState::Preparing;
        progress("preparing", 20);

        self.state = UploadState::Connecting;
        self.ensure_transport()?;
        progress("connected", 30);

        self.state = UploadState::Stopping;
        self.stop_running_code()?;
        progress("stopped running code", 50);

        self.state = UploadState::Writing;
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::StreamUnavailable("no transport attached".to_string()))?;
        let mut session =
            RawSession::begin_with_config(transport, false, self.raw_config.clone())?;
        progress("entered raw REPL", 60);

        let options = WriteOptions {
            // main.py is about to be replaced by the reset anyway, so the
            // temp-rename dance buys nothing there.
            direct: reset_after,
            ..WriteOptions::default()
        };
        DeviceFs::new(&mut session).write_file(name, content, &options)?;
        session.end()?;
        progress("wrote file", 90);

        if reset_after {
            self.state = UploadState::Resetting;
            self.soft_reset_trigger()?;
            info!("uploaded {name} ({} bytes) and reset", content.len());
        } else {
            info!("saved {name} ({} bytes)", content.len());
        }

        self.state = UploadState::Done;
        progress("done", 100);
        Ok(())
    }

    /// Reuse the held transport if it is still good, otherwise fail so
    /// the caller attaches a fresh one.
    fn ensure_transport(&mut self) -> Result<()> {
        match self.transport.as_mut() {
            Some(transport) => {
                if transport.is_usable() {
                    Ok(())
                } else {
                    debug!("held transport is stale, dropping it");
                    self.detach();
                    Err(Error::StreamUnavailable(
                        "previous connection is stale; reopen the port".to_string(),
                    ))
                }
            },
            None => Err(Error::StreamUnavailable(
                "no port attached; open a device first".to_string(),
            )),
        }
    }

    /// Best-effort stop: two interrupts, no waiting for a prompt.
    ///
    /// The shell state is unknown at this point, so there is nothing
    /// reliable to wait for; the raw-REPL entry that follows does the
    /// actual synchronisation.
    fn stop_running_code(&mut self) -> Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::StreamUnavailable("no transport attached".to_string()))?;
        let mut txn = transport.begin("upload stop")?;
        txn.write(&[control::INTERRUPT, control::INTERRUPT])?;
        Ok(())
    }

    /// Single Ctrl-D at the friendly prompt: soft reset, which boots the
    /// interpreter and runs the fresh main.py.
    fn soft_reset_trigger(&mut self) -> Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::StreamUnavailable("no transport attached".to_string()))?;
        let mut txn = transport.begin("soft reset")?;
        txn.write(&[control::EXECUTE])?;
        Ok(())
    }

    /// Decide what happens to the connection after a failure.
    ///
    /// A lock conflict keeps it (the user must close the other feature);
    /// anything else closes it so the next attempt starts from scratch.
    fn route_failure(&mut self, result: &Result<()>) {
        match result {
            Ok(()) => {},
            Err(Error::AlreadyLocked(_)) => {
                self.state = UploadState::Failed;
            },
            Err(_) => {
                self.state = UploadState::Failed;
                self.detach();
            },
        }
    }
}
