//! mpbridge CLI - Command-line tool for programming MicroPython boards.
//!
//! ## Features
//!
//! - Upload a program as main.py and soft-reset to run it
//! - Copy files to and from the board's filesystem
//! - Browse the device filesystem (ls, tree, cat)
//! - One-shot code execution over the raw REPL
//! - Interactive REPL console
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set when the user presses Ctrl-C outside of raw-mode commands.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed since the last [`clear_interrupted_flag`].
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

pub(crate) fn clear_interrupted_flag() {
    INTERRUPTED.store(false, Ordering::Relaxed);
}

mod commands;
mod config;
mod help;
mod serial;

use config::Config;
use help::CliError;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// mpbridge - program MicroPython boards over their serial REPL.
///
/// Environment variables:
///   MPBRIDGE_PORT              - Default serial port
///   MPBRIDGE_BAUD              - Default baud rate (default: 115200)
///   MPBRIDGE_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "mpbridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "For more information, visit: https://github.com/mpbridge/mpbridge")]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "MPBRIDGE_PORT")]
    port: Option<String>,

    /// Baud rate for the serial connection.
    #[arg(
        short,
        long,
        global = true,
        default_value = "115200",
        env = "MPBRIDGE_BAUD"
    )]
    baud: u32,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "MPBRIDGE_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload a Python file as main.py and soft-reset to run it.
    Upload {
        /// Local Python file to upload.
        file: PathBuf,
    },

    /// Copy a local file to the board.
    Put {
        /// Local file to copy.
        local: PathBuf,

        /// Destination path on the board (defaults to the local file name).
        remote: Option<String>,

        /// Skip the temp-file commit (faster, not crash-safe).
        #[arg(long)]
        direct: bool,

        /// Bytes per write chunk.
        #[arg(long, value_name = "BYTES")]
        chunk_size: Option<usize>,
    },

    /// Copy a file from the board to the local filesystem.
    Get {
        /// Path on the board.
        remote: String,

        /// Local destination (defaults to the remote file name).
        local: Option<PathBuf>,
    },

    /// Print a board file to stdout.
    Cat {
        /// Path on the board.
        remote: String,
    },

    /// Remove a file (or, with --dir, an empty directory) on the board.
    Rm {
        /// Path on the board.
        path: String,

        /// Remove a directory instead of a file.
        #[arg(long)]
        dir: bool,
    },

    /// Create a directory (and missing parents) on the board.
    Mkdir {
        /// Path on the board.
        path: String,
    },

    /// Create an empty file on the board if it does not exist.
    Touch {
        /// Path on the board.
        path: String,
    },

    /// List a directory on the board.
    Ls {
        /// Directory to list (default: /).
        path: Option<String>,
    },

    /// Print the board's filesystem as a tree.
    Tree,

    /// Show device and filesystem information.
    Info {
        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Execute a Python expression or statement on the board.
    Exec {
        /// Python code to run.
        code: String,
    },

    /// Run a local Python file on the board without saving it.
    Run {
        /// Local Python file to run.
        file: PathBuf,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Open an interactive REPL console on the board.
    Repl,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "mpbridge v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // Ctrl-C sets a flag; long-running library loops poll it and bail out
    // at the next safe point instead of dying mid-transaction.
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("could not install Ctrl-C handler: {e}");
    }
    mpbridge::set_interrupt_checker(was_interrupted);

    // Load configuration
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    if let Err(err) = run(&cli, &mut config) {
        std::process::exit(help::report(&err));
    }
}

fn run(cli: &Cli, config: &mut Config) -> Result<()> {
    match &cli.command {
        Commands::Upload { file } => commands::upload::cmd_upload(cli, config, file),
        Commands::Put {
            local,
            remote,
            direct,
            chunk_size,
        } => commands::files::cmd_put(cli, config, local, remote.as_deref(), *direct, *chunk_size),
        Commands::Get { remote, local } => {
            commands::files::cmd_get(cli, config, remote, local.as_deref())
        },
        Commands::Cat { remote } => commands::files::cmd_cat(cli, config, remote),
        Commands::Rm { path, dir } => commands::files::cmd_rm(cli, config, path, *dir),
        Commands::Mkdir { path } => commands::files::cmd_mkdir(cli, config, path),
        Commands::Touch { path } => commands::files::cmd_touch(cli, config, path),
        Commands::Ls { path } => commands::files::cmd_ls(cli, config, path.as_deref()),
        Commands::Tree => commands::files::cmd_tree(cli, config),
        Commands::Info { json } => commands::info::cmd_info(cli, config, *json),
        Commands::Exec { code } => commands::exec::cmd_exec(cli, config, code),
        Commands::Run { file } => commands::exec::cmd_run(cli, config, file),
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(*json);
            Ok(())
        },
        Commands::Repl => commands::repl::cmd_repl(cli, config),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(format!(
                        "specify a shell type, e.g.: mpbridge completions bash\n  Or use {} to auto-install completions.",
                        style("mpbridge completions --install").cyan()
                    ))
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

/// Get serial port from CLI args or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    // Ask to remember if not a known device and interactive mode
    if !selected.is_known && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    // ---- clap validation ----

    #[test]
    fn test_cli_command_is_valid() {
        // Verifies that all derive macros produce a valid clap Command
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_upload() {
        let cli = Cli::try_parse_from([
            "mpbridge",
            "--port",
            "/dev/ttyACM0",
            "--baud",
            "460800",
            "upload",
            "blink.py",
        ]);
        assert!(cli.is_ok());
        let cli = cli.unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.baud, 460800);
        assert!(matches!(cli.command, Commands::Upload { .. }));
    }

    #[test]
    fn test_cli_parse_put_with_all_options() {
        let cli = Cli::try_parse_from([
            "mpbridge",
            "put",
            "lib/util.py",
            "/lib/util.py",
            "--direct",
            "--chunk-size",
            "256",
        ])
        .unwrap();
        if let Commands::Put {
            local,
            remote,
            direct,
            chunk_size,
        } = cli.command
        {
            assert_eq!(local.to_str().unwrap(), "lib/util.py");
            assert_eq!(remote.as_deref(), Some("/lib/util.py"));
            assert!(direct);
            assert_eq!(chunk_size, Some(256));
        } else {
            panic!("Expected Put command");
        }
    }

    #[test]
    fn test_cli_parse_put_defaults() {
        let cli = Cli::try_parse_from(["mpbridge", "put", "main.py"]).unwrap();
        if let Commands::Put {
            remote,
            direct,
            chunk_size,
            ..
        } = cli.command
        {
            assert!(remote.is_none());
            assert!(!direct);
            assert!(chunk_size.is_none());
        } else {
            panic!("Expected Put command");
        }
    }

    #[test]
    fn test_cli_parse_get() {
        let cli = Cli::try_parse_from(["mpbridge", "get", "/boot.py", "boot.py"]).unwrap();
        if let Commands::Get { remote, local } = cli.command {
            assert_eq!(remote, "/boot.py");
            assert_eq!(local.unwrap().to_str().unwrap(), "boot.py");
        } else {
            panic!("Expected Get command");
        }
    }

    #[test]
    fn test_cli_parse_rm_dir() {
        let cli = Cli::try_parse_from(["mpbridge", "rm", "/lib", "--dir"]).unwrap();
        if let Commands::Rm { path, dir } = cli.command {
            assert_eq!(path, "/lib");
            assert!(dir);
        } else {
            panic!("Expected Rm command");
        }
    }

    #[test]
    fn test_cli_parse_ls_default_path() {
        let cli = Cli::try_parse_from(["mpbridge", "ls"]).unwrap();
        if let Commands::Ls { path } = cli.command {
            assert!(path.is_none());
        } else {
            panic!("Expected Ls command");
        }
    }

    #[test]
    fn test_cli_parse_info_json() {
        let cli = Cli::try_parse_from(["mpbridge", "info", "--json"]).unwrap();
        if let Commands::Info { json } = cli.command {
            assert!(json);
        } else {
            panic!("Expected Info command");
        }
    }

    #[test]
    fn test_cli_parse_exec() {
        let cli = Cli::try_parse_from(["mpbridge", "exec", "print(1+1)"]).unwrap();
        if let Commands::Exec { code } = cli.command {
            assert_eq!(code, "print(1+1)");
        } else {
            panic!("Expected Exec command");
        }
    }

    #[test]
    fn test_cli_parse_list_ports_json() {
        let cli = Cli::try_parse_from(["mpbridge", "list-ports", "--json"]).unwrap();
        if let Commands::ListPorts { json } = cli.command {
            assert!(json);
        } else {
            panic!("Expected ListPorts command");
        }
    }

    #[test]
    fn test_cli_parse_repl() {
        let cli = Cli::try_parse_from(["mpbridge", "repl"]).unwrap();
        assert!(matches!(cli.command, Commands::Repl));
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["mpbridge", "completions", "bash"]).unwrap();
        assert!(matches!(cli.command, Commands::Completions { .. }));
    }

    #[test]
    fn test_cli_default_values() {
        let cli = Cli::try_parse_from(["mpbridge", "list-ports"]).unwrap();
        assert_eq!(cli.baud, 115_200);
        assert!(!cli.quiet);
        assert!(!cli.non_interactive);
        assert!(!cli.confirm_port);
        assert!(!cli.list_all_ports);
        assert!(cli.port.is_none());
        assert!(cli.config_path.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "mpbridge",
            "--port",
            "COM3",
            "--baud",
            "921600",
            "-vv",
            "--quiet",
            "--non-interactive",
            "--confirm-port",
            "--list-all-ports",
            "--config",
            "/tmp/config.toml",
            "list-ports",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM3"));
        assert_eq!(cli.baud, 921600);
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(cli.non_interactive);
        assert!(cli.confirm_port);
        assert!(cli.list_all_ports);
    }

    #[test]
    fn test_cli_missing_subcommand() {
        let result = Cli::try_parse_from(["mpbridge"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_unknown_command() {
        let result = Cli::try_parse_from(["mpbridge", "frobnicate"]);
        assert!(result.is_err());
    }
}
