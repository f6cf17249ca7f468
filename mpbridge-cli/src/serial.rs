//! Interactive serial port selection.
//!
//! This module provides interactive serial port selection with support for:
//! - Auto-detection of known MicroPython boards and USB-serial bridges
//! - Interactive selection via dialoguer
//! - Remembering selected ports in configuration
//! - Non-interactive mode for CI/CD

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    mpbridge::{DetectedPort, DeviceKind, TransportKind, discover_ports},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// List all ports (including unknown types).
    pub list_all_ports: bool,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
    /// Force confirmation even for single recognized port.
    pub confirm_port: bool,
}

/// Result of port selection including whether it was a known device.
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether this port matched a known/configured device.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    // Selection failures map to exit code 2 so script callers can branch
    // on usage errors.
    CliError::Usage(message.to_string()).into()
}

fn select_non_interactive_port(
    selection_ports: Vec<DetectedPort>,
    config: &Config,
) -> Result<SelectedPort> {
    // Non-interactive mode must be deterministic and never prompt.
    // Exactly one candidate is a valid auto-selection; 0 or >1 are
    // usage/setup issues (exit 2).
    match selection_ports.len().cmp(&1) {
        Ordering::Equal => {
            let port = selection_ports
                .into_iter()
                .next()
                .expect("selection_ports has exactly 1 element here");
            Ok(SelectedPort {
                is_known: is_known_device(&port, config),
                port,
            })
        },
        Ordering::Greater => Err(usage_err(
            "multiple serial ports found; pass --port to pick one",
        )),
        Ordering::Less => Err(usage_err("no serial ports available")),
    }
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    // If port explicitly specified, use it
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name));
    }

    // If port in config, use it
    if let Some(port_name) = &config.port.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name));
    }

    // Detect available ports
    let ports = discover_ports();

    if ports.is_empty() {
        return Err(usage_err(
            "no serial ports found; is the board plugged in?",
        ));
    }

    // Filter to known devices (built-in + config)
    let known_ports: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();

    // Select candidate set: known first unless user asks for all
    let selection_ports: Vec<DetectedPort> = if options.list_all_ports || known_ports.is_empty() {
        ports
    } else {
        known_ports
    };

    // Non-interactive mode must never prompt
    if options.non_interactive {
        return select_non_interactive_port(selection_ports, config);
    }

    match selection_ports.len().cmp(&1) {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(selection_ports, config)
        },
        Ordering::Equal => {
            let port = selection_ports
                .into_iter()
                .next()
                .expect("selection_ports has exactly 1 element here");
            let is_known = is_known_device(&port, config);

            if is_known && !options.confirm_port {
                info!("Auto-selected port: {} [{}]", port.name, port.device.name());
                Ok(SelectedPort { port, is_known })
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(port, config)
            }
        },
        Ordering::Less => Err(usage_err("no serial ports available")),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(
            "interactive port selection needs a terminal; pass --port or --non-interactive"
                .to_string(),
        )
        .into())
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                mpbridge::Error::SelectionCancelled.into()
            } else {
                CliError::Usage("Port selection prompt failed".to_string()).into()
            }
        },
    }
}

/// Find a port by name.
fn find_port_by_name(name: &str) -> SelectedPort {
    let ports = discover_ports();

    // Try exact match first
    if let Some(port) = ports.iter().find(|p| p.name == name) {
        return SelectedPort {
            port: port.clone(),
            is_known: port.device.is_known(),
        };
    }

    // Try case-insensitive match (Windows)
    if let Some(port) = ports.iter().find(|p| p.name.eq_ignore_ascii_case(name)) {
        return SelectedPort {
            port: port.clone(),
            is_known: port.device.is_known(),
        };
    }

    // Port not found in detected list, but user explicitly specified it
    // Create a placeholder port info
    SelectedPort {
        port: DetectedPort {
            name: name.to_string(),
            transport: TransportKind::Serial,
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        },
        is_known: false,
    }
}

/// Check if a port matches a known device (from config or built-in list).
fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    // Check built-in device types
    if port.device.is_known() {
        return true;
    }

    // Check configured USB devices
    if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        for device in &config.port.usb_device {
            if device.matches(vid, pid) {
                return true;
            }
        }
    }

    false
}

/// Interactive port selection.
fn select_port_interactive(mut ports: Vec<DetectedPort>, config: &Config) -> Result<SelectedPort> {
    eprintln!(
        "{} Detected {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );
    eprintln!(
        "{}",
        style("Known MicroPython boards are listed first").dim()
    );

    // Sort: known devices first
    ports.sort_by_key(|p| !is_known_device(p, config));

    // Build display names
    let port_names: Vec<String> = ports
        .iter()
        .map(|port| {
            let name = if is_known_device(port, config) {
                style(&port.name).bold().to_string()
            } else {
                port.name.clone()
            };

            let device_info = if port.device.is_known() {
                format!(" [{}]", style(port.device.name()).yellow())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" ({vid:04X}:{pid:04X})")
            } else {
                String::new()
            };

            let product = port
                .product
                .as_ref()
                .map(|p| format!(" - {}", style(p).dim()))
                .unwrap_or_default();

            format!("{name}{device_info}{product}")
        })
        .collect();

    // Truncate labels to fit terminal width to prevent wrapping in narrow
    // terminals.
    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let port_names: Vec<String> = port_names
        .into_iter()
        .map(|n| console::truncate_str(&n, max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a serial port")
        .items(&port_names)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            let is_known = is_known_device(&port, config);
            Ok(SelectedPort { port, is_known })
        },
        None => Err(mpbridge::Error::SelectionCancelled.into()),
    }
}

/// Confirm use of a single unrecognized port.
fn confirm_single_port(port: DetectedPort, _config: &Config) -> Result<SelectedPort> {
    let product_info = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use port {}{product_info}?", port.name))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            is_known: false,
        })
    } else {
        Err(mpbridge::Error::SelectionCancelled.into())
    }
}

/// Ask user if they want to remember this port.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        // Check if already known
        for device in &config.port.usb_device {
            if device.matches(vid, pid) {
                return Ok(()); // Already saved
            }
        }

        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Remember this device for future auto-detection?")
            .default(false)
            .interact_opt()
            .map_err(map_prompt_error)?
            .unwrap_or(false);

        if confirmed {
            if let Err(e) = config.remember_usb_device(vid, pid) {
                error!("Failed to save port configuration: {e}");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        console::{measure_text_width, style, truncate_str},
        mpbridge::{DetectedPort, DeviceKind, TransportKind},
    };

    fn unknown_port(name: &str, vid: Option<u16>, pid: Option<u16>) -> DetectedPort {
        DetectedPort {
            name: name.to_string(),
            transport: TransportKind::Serial,
            device: DeviceKind::Unknown,
            vid,
            pid,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    // ---- SerialOptions ----

    #[test]
    fn test_serial_options_default() {
        let options = SerialOptions::default();
        assert!(options.port.is_none());
        assert!(!options.list_all_ports);
        assert!(!options.non_interactive);
        assert!(!options.confirm_port);
    }

    #[test]
    fn test_serial_options_with_port() {
        let options = SerialOptions {
            port: Some("/dev/ttyACM0".to_string()),
            ..Default::default()
        };
        assert_eq!(options.port.as_deref(), Some("/dev/ttyACM0"));
    }

    #[test]
    fn test_truncate_port_label_preserves_left() {
        let name = "/dev/verylongttyacm0 - Very Long Product Name That Would Wrap";
        let styled = style(&name).bold().to_string();

        let term_width = 30usize;
        let max_item_width = term_width.saturating_sub(4);
        let truncated = truncate_str(&styled, max_item_width, "…").into_owned();

        assert!(!truncated.contains('\n'));
        assert!(measure_text_width(&truncated) <= max_item_width);
    }

    // ---- is_known_device ----

    #[test]
    fn test_is_known_device_builtin() {
        let port = DetectedPort {
            name: "/dev/ttyACM0".to_string(),
            transport: TransportKind::Serial,
            device: DeviceKind::RaspberryPi,
            vid: Some(0x2E8A),
            pid: Some(0x0005),
            manufacturer: None,
            product: None,
            serial: None,
        };
        let config = Config::default();
        assert!(is_known_device(&port, &config));
    }

    #[test]
    fn test_is_known_device_unknown() {
        let port = unknown_port("/dev/ttyUSB0", Some(0x9999), Some(0x9999));
        let config = Config::default();
        assert!(!is_known_device(&port, &config));
    }

    #[test]
    fn test_is_known_device_from_config() {
        let port = unknown_port("/dev/ttyUSB0", Some(0xABCD), Some(0x1234));
        let mut config = Config::default();
        config.port.usb_device.push(crate::config::UsbDevice {
            vid: 0xABCD,
            pid: 0x1234,
        });
        assert!(is_known_device(&port, &config));
    }

    #[test]
    fn test_is_known_device_no_vid_pid() {
        let port = unknown_port("/dev/ttyS0", None, None);
        let config = Config::default();
        assert!(!is_known_device(&port, &config));
    }

    // ---- prompt error mapping ----

    #[test]
    fn test_prompt_interrupt_maps_to_selection_cancelled() {
        let err = map_prompt_error(DialoguerError::IO(std::io::Error::new(
            std::io::ErrorKind::Interrupted,
            "interrupted",
        )));
        assert!(matches!(
            err.downcast_ref::<mpbridge::Error>(),
            Some(mpbridge::Error::SelectionCancelled)
        ));
    }

    #[test]
    fn test_other_prompt_failure_maps_to_usage_error() {
        let err = map_prompt_error(DialoguerError::IO(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "gone",
        )));
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    // ---- non-interactive error mapping regression ----

    #[test]
    fn test_select_non_interactive_multiple_ports_returns_usage_error() {
        let ports = vec![
            unknown_port("/dev/ttyUSB0", None, None),
            unknown_port("/dev/ttyUSB1", None, None),
        ];

        let err = select_non_interactive_port(ports, &Config::default())
            .err()
            .expect("expected error");
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_select_non_interactive_no_ports_returns_usage_error() {
        let err = select_non_interactive_port(vec![], &Config::default())
            .err()
            .expect("expected error");
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_select_non_interactive_single_port_returns_selected_port() {
        let ports = vec![unknown_port("/dev/ttyACM0", None, None)];

        let selected = select_non_interactive_port(ports, &Config::default()).unwrap();
        assert_eq!(selected.port.name, "/dev/ttyACM0");
        assert!(!selected.is_known);
    }
}
