//! Device discovery and classification utilities.
//!
//! This module provides transport-agnostic device discovery primitives.
//! Currently, native discovery is serial-port based, but the data model is
//! designed to support future transports (WebUSB, TCP, BLE, etc.).

use crate::error::{Error, Result};

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// Transport type for discovered endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TransportKind {
    /// Serial transport (UART/USB CDC).
    Serial,
    /// Unknown or unclassified transport.
    Unknown,
}

/// Known USB device kinds commonly carrying a MicroPython firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceKind {
    /// MicroPython pyboard (native USB).
    Pyboard,
    /// Raspberry Pi RP2040/RP2350 boards (Pico and friends).
    RaspberryPi,
    /// BBC micro:bit (DAPLink interface).
    Microbit,
    /// Espressif chips with native USB (ESP32-S2/S3/C3).
    Espressif,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs for MicroPython boards and the UART bridges
/// their dev kits ship with. An empty PID list matches any product under
/// that vendor. Supporting a new board is a new row here.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (0xF055, &[], DeviceKind::Pyboard),
    (0x2E8A, &[], DeviceKind::RaspberryPi),
    (0x0D28, &[0x0204], DeviceKind::Microbit),
    (0x303A, &[], DeviceKind::Espressif),
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        DeviceKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], DeviceKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        DeviceKind::Ftdi,
    ),
];

impl DeviceKind {
    /// Classify a VID/PID combination against the known-device table.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, device) in KNOWN_USB_DEVICES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *device;
            }
        }
        Self::Unknown
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pyboard => "pyboard",
            Self::RaspberryPi => "Raspberry Pi",
            Self::Microbit => "micro:bit",
            Self::Espressif => "Espressif",
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Boards exposing MicroPython over their own USB controller. These
    /// are preferred during auto-selection over generic UART bridges,
    /// which could be attached to anything.
    pub fn is_native_board(&self) -> bool {
        matches!(
            self,
            Self::Pyboard | Self::RaspberryPi | Self::Microbit | Self::Espressif
        )
    }
}

/// Discovered device endpoint information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectedPort {
    /// Endpoint name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// Transport type.
    pub transport: TransportKind,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Check if this endpoint is likely a MicroPython board.
    pub fn is_likely_board(&self) -> bool {
        self.device.is_known()
    }
}

/// Detect all available endpoints with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let mut detected = DetectedPort {
                    name: port_info.port_name.clone(),
                    transport: TransportKind::Serial,
                    device: DeviceKind::Unknown,
                    vid: None,
                    pid: None,
                    manufacturer: None,
                    product: None,
                    serial: None,
                };

                if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                    detected.vid = Some(usb_info.vid);
                    detected.pid = Some(usb_info.pid);
                    detected.manufacturer = usb_info.manufacturer;
                    detected.product = usb_info.product;
                    detected.serial = usb_info.serial_number;
                    detected.device = DeviceKind::from_vid_pid(usb_info.vid, usb_info.pid);

                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                        port_info.port_name, usb_info.vid, usb_info.pid, detected.device
                    );
                }

                result.push(detected);
            }
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
        },
    }

    result
}

/// Detect all available endpoints (stub for builds without serial support).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Detect endpoints that are likely MicroPython boards.
pub fn detect_board_ports() -> Vec<DetectedPort> {
    detect_ports()
        .into_iter()
        .filter(DetectedPort::is_likely_board)
        .collect()
}

/// Auto-detect a single MicroPython endpoint.
///
/// Native-USB boards win over generic UART bridges; a bridge wins over an
/// unclassified port; any port at all beats giving up.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let ports = detect_ports();

    if let Some(port) = ports.iter().find(|p| p.device.is_native_board()) {
        info!(
            "Auto-detected {} board: {}",
            port.device.name(),
            port.name
        );
        return Ok(port.clone());
    }

    if let Some(port) = ports.iter().find(|p| p.device.is_known()) {
        info!(
            "Auto-detected {} USB-UART bridge: {}",
            port.device.name(),
            port.name
        );
        return Ok(port.clone());
    }

    if let Some(port) = ports.into_iter().next() {
        info!("Using first available port: {}", port.name);
        return Ok(port);
    }

    Err(Error::DeviceNotFound)
}

/// Auto-detect a single MicroPython endpoint (stub without serial support).
#[cfg(not(feature = "native"))]
pub fn auto_detect_port() -> Result<DetectedPort> {
    Err(Error::Unsupported(
        "Auto-detection requires the native serial backend.".to_string(),
    ))
}

/// Find an endpoint by name pattern.
#[cfg(feature = "native")]
pub fn find_port_by_pattern(pattern: &str) -> Result<DetectedPort> {
    let ports = detect_ports();

    ports
        .into_iter()
        .find(|p| p.name.contains(pattern))
        .ok_or(Error::DeviceNotFound)
}

/// Find an endpoint by name pattern (stub without serial support).
#[cfg(not(feature = "native"))]
pub fn find_port_by_pattern(_pattern: &str) -> Result<DetectedPort> {
    Err(Error::Unsupported(
        "Port enumeration requires the native serial backend.".to_string(),
    ))
}

/// Format a list of detected endpoints for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    let mut result = Vec::new();

    for port in ports {
        let device_info = if port.device.is_known() {
            format!(" [{}]", port.device.name())
        } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" [VID:{vid:04X} PID:{pid:04X}]")
        } else {
            String::new()
        };

        let product_info = port
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();

        result.push(format!("{}{}{}", port.name, device_info, product_info));
    }

    result
}

/// List all endpoints in a user-friendly format.
pub fn list_ports_pretty() -> Vec<String> {
    let ports = detect_ports();
    format_port_list(&ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_kind_from_vid_pid() {
        assert_eq!(DeviceKind::from_vid_pid(0xF055, 0x9800), DeviceKind::Pyboard);
        assert_eq!(
            DeviceKind::from_vid_pid(0x2E8A, 0x0005),
            DeviceKind::RaspberryPi
        );
        assert_eq!(
            DeviceKind::from_vid_pid(0x0D28, 0x0204),
            DeviceKind::Microbit
        );
        assert_eq!(
            DeviceKind::from_vid_pid(0x303A, 0x4001),
            DeviceKind::Espressif
        );
        assert_eq!(DeviceKind::from_vid_pid(0x1A86, 0x7523), DeviceKind::Ch340);
        assert_eq!(DeviceKind::from_vid_pid(0x10C4, 0xEA60), DeviceKind::Cp210x);
        assert_eq!(DeviceKind::from_vid_pid(0x0403, 0x6001), DeviceKind::Ftdi);
        assert_eq!(DeviceKind::from_vid_pid(0x1234, 0x5678), DeviceKind::Unknown);
    }

    #[test]
    fn test_microbit_requires_daplink_pid() {
        assert_eq!(
            DeviceKind::from_vid_pid(0x0D28, 0x9999),
            DeviceKind::Unknown
        );
    }

    #[test]
    fn test_device_kind_priority() {
        assert!(DeviceKind::Pyboard.is_native_board());
        assert!(DeviceKind::RaspberryPi.is_native_board());
        assert!(!DeviceKind::Ch340.is_native_board());
        assert!(DeviceKind::Ch340.is_known());
        assert!(!DeviceKind::Unknown.is_known());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_detected_port_serializes() {
        let port = DetectedPort {
            name: "/dev/ttyACM0".to_string(),
            transport: TransportKind::Serial,
            device: DeviceKind::RaspberryPi,
            vid: Some(0x2E8A),
            pid: Some(0x0005),
            manufacturer: None,
            product: Some("Pico".to_string()),
            serial: None,
        };
        let json = serde_json::to_value(&port).unwrap();
        assert_eq!(json["name"], "/dev/ttyACM0");
        assert_eq!(json["transport"], "serial");
        assert_eq!(json["device"], "RaspberryPi");
        assert_eq!(json["vid"], 0x2E8A);
        assert_eq!(json["product"], "Pico");
    }

    #[test]
    fn test_detected_port_is_likely_board() {
        let known = DetectedPort {
            name: "/dev/ttyACM0".to_string(),
            transport: TransportKind::Serial,
            device: DeviceKind::RaspberryPi,
            vid: Some(0x2E8A),
            pid: Some(0x0005),
            manufacturer: None,
            product: None,
            serial: None,
        };
        assert!(known.is_likely_board());

        let unknown = DetectedPort {
            name: "/dev/ttyS0".to_string(),
            transport: TransportKind::Serial,
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        };
        assert!(!unknown.is_likely_board());
    }

    #[test]
    fn test_format_port_list() {
        let ports = vec![
            DetectedPort {
                name: "/dev/ttyACM0".to_string(),
                transport: TransportKind::Serial,
                device: DeviceKind::RaspberryPi,
                vid: Some(0x2E8A),
                pid: Some(0x0005),
                manufacturer: Some("MicroPython".to_string()),
                product: Some("Board in FS mode".to_string()),
                serial: None,
            },
            DetectedPort {
                name: "/dev/ttyUSB1".to_string(),
                transport: TransportKind::Serial,
                device: DeviceKind::Unknown,
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
                serial: None,
            },
        ];

        let formatted = format_port_list(&ports);
        assert_eq!(formatted.len(), 2);
        assert!(formatted[0].contains("/dev/ttyACM0"));
        assert!(formatted[0].contains("Raspberry Pi"));
        assert!(formatted[1].contains("/dev/ttyUSB1"));
    }
}
