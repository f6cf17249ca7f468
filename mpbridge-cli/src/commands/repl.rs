//! Interactive REPL console command implementation.
//!
//! Single-threaded loop over the library's friendly-mode console runner:
//! keystrokes are collected into a line (crossterm raw mode), sent on
//! Enter, and whatever the board prints is drained between keys and
//! coloured by the output/error heuristic.
//!
//! Key bindings:
//! - Enter: send the current line
//! - Ctrl-C: interrupt the running program; twice within a second exits
//! - Ctrl-D: soft-reset the board (sent at the friendly prompt)

use anyhow::{Context, Result};
use console::style;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal;
use mpbridge::{ConsoleOutput, ConsoleRunner};
use std::io::{self, Write as _};
use std::time::{Duration, Instant};

use crate::Cli;
use crate::config::Config;
use crate::{clear_interrupted_flag, was_interrupted};

use super::open_transport;

const PROMPT: &str = ">>> ";

/// How long between Ctrl-C presses still counts as "press twice to exit".
const EXIT_CHORD_WINDOW: Duration = Duration::from_secs(1);

/// Settle window for collecting board output after a sent line.
const RESPONSE_SETTLE: Duration = Duration::from_millis(150);

/// Settle window for the idle poll between keystrokes.
const IDLE_SETTLE: Duration = Duration::from_millis(10);

/// Run the interactive console.
pub(crate) fn cmd_repl(cli: &Cli, config: &mut Config) -> Result<()> {
    let mut transport = open_transport(cli, config)?;

    if !cli.quiet {
        eprintln!(
            "{} Connected. {}",
            style("📡").cyan(),
            style("Ctrl-C interrupts the program (twice to exit), Ctrl-D soft-resets").dim()
        );
    }

    let mut console = ConsoleRunner::connect(&mut transport)?;

    terminal::enable_raw_mode().context("Failed to enable raw terminal mode")?;
    // Restore the terminal on every exit path, including panics.
    let _raw_guard = RawModeGuard;

    let mut line = String::new();
    let mut last_ctrl_c: Option<Instant> = None;
    print_prompt(&line)?;

    loop {
        if was_interrupted() {
            break;
        }

        // Pump anything the board printed on its own (timers, running
        // programs) before blocking on the keyboard again.
        let idle = console.drain(IDLE_SETTLE)?;
        if !idle.is_empty() {
            print_board_output(&idle)?;
            print_prompt(&line)?;
        }

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event::read()?
        else {
            continue;
        };

        match (code, modifiers) {
            // Ctrl-C: interrupt; twice in quick succession exits.
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => {
                let now = Instant::now();
                if last_ctrl_c.is_some_and(|prev| now.duration_since(prev) < EXIT_CHORD_WINDOW) {
                    break;
                }
                last_ctrl_c = Some(now);
                console.interrupt()?;
                line.clear();
                let reaction = console.drain(RESPONSE_SETTLE)?;
                print_board_output(&reaction)?;
                print_prompt(&line)?;
            },
            // Ctrl-D: soft reset at the friendly prompt.
            (KeyCode::Char('d'), KeyModifiers::CONTROL) => {
                console.soft_reset()?;
                line.clear();
                let reaction = console.drain(RESPONSE_SETTLE)?;
                print_board_output(&reaction)?;
                print_prompt(&line)?;
            },
            (KeyCode::Enter, _) => {
                print!("\r\n");
                io::stdout().flush()?;
                console.send_line(&line)?;
                line.clear();
                let response = console.drain(RESPONSE_SETTLE)?;
                print_board_output(&response)?;
                print_prompt(&line)?;
            },
            (KeyCode::Backspace, _) => {
                if line.pop().is_some() {
                    print!("\u{8} \u{8}");
                    io::stdout().flush()?;
                }
            },
            (KeyCode::Char(c), KeyModifiers::NONE | KeyModifiers::SHIFT) => {
                line.push(c);
                print!("{c}");
                io::stdout().flush()?;
            },
            _ => {},
        }
    }

    console.disconnect();
    drop(_raw_guard);
    transport.close()?;
    clear_interrupted_flag();

    if !cli.quiet {
        eprintln!("\n{} Console closed", style("👋").cyan());
    }
    Ok(())
}

/// Print the local prompt and any partially typed line.
fn print_prompt(line: &str) -> Result<()> {
    print!("{PROMPT}{line}");
    io::stdout().flush()?;
    Ok(())
}

/// Print classified board output, error lines in red.
///
/// Echo lines are skipped: the typed line is already on screen locally,
/// and the board's own prompt is replaced by ours.
fn print_board_output(output: &ConsoleOutput) -> Result<()> {
    let mut stdout = io::stdout();
    for line in output.output.iter().filter(|l| !is_echo_line(l)) {
        write!(stdout, "{line}\r\n")?;
    }
    for line in &output.errors {
        write!(stdout, "{}\r\n", style(line).red())?;
    }
    stdout.flush()?;
    Ok(())
}

/// Whether a line is the board echoing our own input back.
fn is_echo_line(line: &str) -> bool {
    line.starts_with(">>>") || line.starts_with("...")
}

/// RAII guard to restore terminal mode on drop.
struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_lines_are_detected() {
        assert!(is_echo_line(">>> print(1)"));
        assert!(is_echo_line("... pass"));
        assert!(!is_echo_line("1"));
        assert!(!is_echo_line("hello >>> there"));
    }

    #[test]
    fn test_exit_chord_window_is_short() {
        // Two presses a day apart must not exit.
        assert!(EXIT_CHORD_WINDOW < Duration::from_secs(5));
    }
}
