//! MicroPython REPL protocol: framing constants, raw sessions, console.
//!
//! The raw REPL is a text protocol driven by four control bytes and a
//! handful of fixed banners. Every literal the shell emits lives in this
//! module and nowhere else, so a fake shell in tests can reproduce the
//! framing byte-for-byte.

pub mod console;
pub mod raw_repl;

/// Control bytes understood by the MicroPython shell.
pub mod control {
    /// Ctrl-A: enter raw REPL mode.
    pub const ENTER_RAW: u8 = 0x01;
    /// Ctrl-B: leave raw REPL mode, back to the friendly prompt.
    pub const EXIT_RAW: u8 = 0x02;
    /// Ctrl-C: interrupt running code with a KeyboardInterrupt.
    pub const INTERRUPT: u8 = 0x03;
    /// Ctrl-D: execute the pending raw-mode input. At the friendly
    /// prompt it soft-resets the interpreter instead, and the shell also
    /// uses it to terminate each output segment of an execution.
    pub const EXECUTE: u8 = 0x04;
}

/// Banner printed when the shell enters raw mode.
pub const RAW_BANNER: &[u8] = b"raw REPL; CTRL-B to exit\r\n";

/// Two-byte status meaning the shell accepted a command for execution.
pub const STATUS_OK: &[u8; 2] = b"OK";

/// The friendly REPL's idle prompt, preceded by the line break the shell
/// always emits before it.
pub const IDLE_PROMPT: &[u8] = b"\r\n>>> ";

/// First byte of the raw-mode prompt, printed after each execution and
/// when leaving raw mode.
pub const RAW_PROMPT: &[u8] = b">";

/// Banner fragment printed during a soft reset.
pub const SOFT_REBOOT: &[u8] = b"soft reboot";

/// Terminator for each output segment (stdout, then stderr) of a raw-mode
/// execution. Same byte as [`control::EXECUTE`].
pub const SEGMENT_END: &[u8] = &[control::EXECUTE];
