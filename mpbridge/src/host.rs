//! Host-side utilities for serial port discovery and opening.

use crate::device::DetectedPort;

#[cfg(feature = "native")]
use crate::port::{NativePort, SerialConfig};

/// What the host platform can do, probed once at startup.
///
/// The CLI consults this instead of sprinkling feature checks through the
/// command handlers.
#[derive(Debug, Clone, Copy)]
pub struct HostCapabilities {
    /// Serial port enumeration is available.
    pub can_enumerate: bool,
    /// Serial ports can be opened directly by path.
    pub can_open_serial: bool,
}

/// Probe host capabilities.
#[must_use]
pub fn capabilities() -> HostCapabilities {
    HostCapabilities {
        can_enumerate: cfg!(feature = "native"),
        can_open_serial: cfg!(feature = "native"),
    }
}

/// Discover all available serial ports.
#[must_use]
pub fn discover_ports() -> Vec<DetectedPort> {
    crate::device::detect_ports()
}

/// Discover serial ports that are likely MicroPython boards.
#[must_use]
pub fn discover_board_ports() -> Vec<DetectedPort> {
    crate::device::detect_board_ports()
}

/// Auto-detect a single best serial port candidate.
pub fn auto_detect_port() -> crate::Result<DetectedPort> {
    crate::device::auto_detect_port()
}

/// Open a port by name with the fixed 8N1 framing MicroPython consoles use.
#[cfg(feature = "native")]
pub fn open_port(name: &str, baud_rate: u32) -> crate::Result<NativePort> {
    let config = SerialConfig::new(name, baud_rate);
    NativePort::open(&config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_match_features() {
        let caps = capabilities();
        assert_eq!(caps.can_enumerate, cfg!(feature = "native"));
        assert_eq!(caps.can_open_serial, caps.can_enumerate);
    }
}
