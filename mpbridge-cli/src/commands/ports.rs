//! List-ports command implementation.

use console::style;
use mpbridge::{auto_detect_port, discover_ports};

/// List detected serial ports, optionally as JSON on stdout.
pub(crate) fn cmd_list_ports(json: bool) {
    let detected = discover_ports();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&detected).unwrap_or_default()
        );
        return;
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return;
    }

    for port in &detected {
        let device_type = if port.device.is_known() {
            format!(" [{}]", style(port.device.name()).yellow())
        } else {
            String::new()
        };

        let product = port.product.as_deref().unwrap_or("");
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };

        eprintln!(
            "  {} {}{}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            device_type,
            vid_pid,
            if product.is_empty() {
                String::new()
            } else {
                format!(" - {}", style(product).dim())
            }
        );
    }

    // Show auto-detection result
    if let Ok(auto_port) = auto_detect_port() {
        eprintln!(
            "\n{} Would auto-select {}",
            style("→").green().bold(),
            style(&auto_port.name).cyan().bold()
        );
    }
}
