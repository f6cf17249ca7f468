//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod exec;
pub(crate) mod files;
pub(crate) mod info;
pub(crate) mod ports;
pub(crate) mod repl;
pub(crate) mod upload;

use anyhow::{Context, Result};
use console::style;
use mpbridge::{NativePort, Transport};

use crate::config::Config;
use crate::{Cli, CliError, was_interrupted};

pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Select a port and open a transport over it at the CLI's baud rate.
pub(crate) fn open_transport(cli: &Cli, config: &mut Config) -> Result<Transport<NativePort>> {
    let port_name = crate::get_port(cli, config)?;
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&port_name).green(),
            cli.baud
        );
    }

    let port = mpbridge::host::open_port(&port_name, cli.baud)
        .with_context(|| format!("Failed to open port {port_name}"))?;
    Ok(Transport::new(port))
}
