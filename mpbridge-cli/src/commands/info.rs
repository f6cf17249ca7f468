//! Device information command implementation.

use anyhow::Result;
use console::style;

use crate::Cli;
use crate::config::Config;

use super::files::with_device_fs;

/// Show device identity and filesystem usage.
pub(crate) fn cmd_info(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let (device, stats) = with_device_fs(cli, config, |dev| {
        let device = dev.device_info()?;
        let stats = dev.fs_stats("/")?;
        Ok((device, stats))
    })?;

    if json {
        let info = serde_json::json!({
            "device": device,
            "fs": stats,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&info).unwrap_or_default()
        );
        return Ok(());
    }

    eprintln!("\n{}", style("Device").bold().underlined());
    eprintln!("  Machine: {}", device.machine);
    eprintln!("  Release: {}", device.release);
    eprintln!("  Version: {}", device.version);
    eprintln!("  Bytecode ABI: {}", device.mpy);
    eprintln!("  Module path: {}", device.sys_path.join(":"));

    eprintln!("\n{}", style("Filesystem").bold().underlined());
    eprintln!("  Total: {} bytes", stats.total);
    eprintln!("  Used:  {} bytes", stats.used);
    eprintln!("  Free:  {} bytes", stats.free);

    Ok(())
}
