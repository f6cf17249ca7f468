//! One-shot code execution command implementations.

use anyhow::{Context, Result};
use console::style;
use mpbridge::protocol::raw_repl::RawSession;
use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::time::Duration;

use crate::Cli;
use crate::config::Config;

use super::{ensure_not_interrupted, open_transport};

/// How long a single exec may run before the session gives up on it.
const EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Execute a snippet of Python on the board and print its output.
pub(crate) fn cmd_exec(cli: &Cli, config: &mut Config, code: &str) -> Result<()> {
    run_code(cli, config, code)
}

/// Run a local Python file on the board without saving it there.
pub(crate) fn cmd_run(cli: &Cli, config: &mut Config, file: &Path) -> Result<()> {
    let code = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    run_code(cli, config, &code)
}

fn run_code(cli: &Cli, config: &mut Config, code: &str) -> Result<()> {
    let mut transport = open_transport(cli, config)?;
    ensure_not_interrupted()?;

    let mut session = RawSession::begin(&mut transport, false)?;
    let outcome = session.exec(code, EXEC_TIMEOUT);
    let end_result = session.end();
    let close_result = transport.close();

    match outcome {
        Ok(output) => {
            let mut stdout = std::io::stdout();
            stdout.write_all(output.as_bytes())?;
            stdout.flush()?;
            end_result?;
            close_result?;
            Ok(())
        },
        Err(mpbridge::Error::Remote { traceback, stdout }) => {
            // Whatever the program printed before raising still belongs
            // on stdout; the traceback goes to stderr.
            if !stdout.is_empty() {
                let mut out = std::io::stdout();
                out.write_all(stdout.as_bytes())?;
                out.flush()?;
            }
            for line in traceback.lines() {
                eprintln!("{}", style(line).red());
            }
            anyhow::bail!("the code raised an exception on the device")
        },
        Err(err) => Err(err.into()),
    }
}
