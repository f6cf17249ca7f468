//! Error types for mpbridge.

use std::io;
use thiserror::Error;

/// Result type for mpbridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for mpbridge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The user dismissed the port chooser without picking anything.
    #[error("Port selection cancelled")]
    SelectionCancelled,

    /// No usable serial device was found.
    #[error("No MicroPython device found")]
    DeviceNotFound,

    /// The serial stream is closed or was taken away.
    #[error("Stream unavailable: {0}")]
    StreamUnavailable(String),

    /// A transaction is already in progress on this connection.
    #[error("Connection busy: {0}")]
    AlreadyLocked(String),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The device sent bytes that do not match the raw REPL framing.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The raw REPL refused to execute a command (non-OK status).
    #[error("Execution rejected by device (status {:?})", String::from_utf8_lossy(status))]
    Execution {
        /// The two status bytes the device sent instead of `OK`.
        status: [u8; 2],
    },

    /// The device raised an exception while running our code.
    #[error("Device reported an error:\n{traceback}")]
    Remote {
        /// Traceback text from the device's stderr segment.
        traceback: String,
        /// Whatever the command printed before failing.
        stdout: String,
    },

    /// The serial stream went away mid-operation.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Unsupported platform or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// A follow-up hint the CLI can print under the error message.
    #[must_use]
    pub fn advice(&self) -> Option<&'static str> {
        match self {
            Self::AlreadyLocked(_) => {
                Some("another operation is using the connection; close the console first")
            },
            Self::DeviceNotFound => {
                Some("plug in the board, or pass --port to select a device explicitly")
            },
            Self::Timeout(_) => {
                Some("check the cable and baud rate, or press the board's reset button")
            },
            Self::ConnectionLost(_) => {
                Some("the device was unplugged or reset; reconnect and retry")
            },
            _ => None,
        }
    }
}
