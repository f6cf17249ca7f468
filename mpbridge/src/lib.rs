//! # mpbridge
//!
//! A library for programming MicroPython boards over their serial REPL.
//!
//! This crate provides the core functionality for talking to a board's
//! interactive Python shell, including:
//!
//! - Raw-REPL protocol state machine (enter, execute, exit)
//! - Chunked file transfer with temp-file commit semantics
//! - Upload orchestration with milestone progress
//! - Friendly-mode console driving with heuristic error splitting
//! - USB device discovery for common MicroPython boards
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux, macOS, Windows via the `serialport` crate
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use mpbridge::{Transport, Uploader};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let detected = mpbridge::auto_detect_port()?;
//!         let port = mpbridge::host::open_port(&detected.name, 115200)?;
//!
//!         let mut uploader = Uploader::new();
//!         uploader.attach(Transport::new(port));
//!         uploader.upload_as_main("print('hello')", &mut |stage, pct| {
//!             println!("{stage}: {pct}%");
//!         })?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod fs;
pub mod host;
pub mod port;
pub mod protocol;
pub mod transport;
pub mod uploader;

#[cfg(test)]
pub(crate) mod testutil;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupt_requested() -> bool {
    INTERRUPT_CHECKER.get().is_some_and(|checker| checker())
}

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    device::{DetectedPort, DeviceKind, TransportKind},
    error::{Error, Result},
    fs::{DeviceFs, DeviceInfo, FsNode, FsNodeKind, FsStats, OpKind, OpLog, OpStatus, WriteOptions},
    host::{HostCapabilities, auto_detect_port, capabilities, discover_board_ports, discover_ports},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::console::{ConsoleOutput, ConsoleRunner, classify_output},
    protocol::raw_repl::{RawConfig, RawSession, SessionState},
    transport::{Deadline, Transaction, Transport},
    uploader::{MAIN_SCRIPT, UploadState, Uploader},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_unregistered_is_false() {
        // Other tests may have registered a checker already; either way
        // the default answer must be "not interrupted".
        assert!(!is_interrupt_requested());
    }

    #[test]
    fn test_interrupt_checker_registers_once() {
        set_interrupt_checker(|| false);
        // A second registration is ignored rather than panicking.
        set_interrupt_checker(|| false);
        assert!(!is_interrupt_requested());
    }
}
