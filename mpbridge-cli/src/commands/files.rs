//! File-transfer and filesystem command implementations.

use anyhow::{Context, Result};
use console::style;
use mpbridge::protocol::raw_repl::RawSession;
use mpbridge::{DeviceFs, FsNode, FsNodeKind, NativePort, WriteOptions};
use std::fs;
use std::io::Write as _;
use std::path::Path;

use crate::config::Config;
use crate::{Cli, CliError};

use super::{ensure_not_interrupted, open_transport};

/// Run one filesystem operation inside a fresh raw-REPL session.
///
/// The session is ended and the port closed even when the operation
/// fails, so the board is left at the friendly prompt.
pub(super) fn with_device_fs<T>(
    cli: &Cli,
    config: &mut Config,
    op: impl FnOnce(&mut DeviceFs<'_, '_, NativePort>) -> mpbridge::Result<T>,
) -> Result<T> {
    let mut transport = open_transport(cli, config)?;
    ensure_not_interrupted()?;

    let mut session = RawSession::begin(&mut transport, false)?;
    let outcome = {
        let mut dev = DeviceFs::new(&mut session);
        op(&mut dev)
    };
    let end_result = session.end();
    let close_result = transport.close();

    let value = outcome?;
    end_result?;
    close_result?;
    Ok(value)
}

/// Copy a local file to the board.
pub(crate) fn cmd_put(
    cli: &Cli,
    config: &mut Config,
    local: &Path,
    remote: Option<&str>,
    direct: bool,
    chunk_size: Option<usize>,
) -> Result<()> {
    let data = fs::read(local)
        .with_context(|| format!("Failed to read {}", local.display()))?;
    let remote = remote_or_file_name(local, remote)?;

    let defaults = WriteOptions::default();
    let options = WriteOptions {
        chunk_size: chunk_size
            .or(config.transfer.chunk_size)
            .unwrap_or(defaults.chunk_size),
        direct: direct || config.transfer.direct,
    };

    if !cli.quiet {
        eprintln!(
            "{} Writing {} ({} bytes) to {}",
            style("📦").cyan(),
            local.display(),
            data.len(),
            style(&remote).bold()
        );
    }

    with_device_fs(cli, config, |dev| dev.write_file(&remote, &data, &options))?;

    if !cli.quiet {
        eprintln!("{} Wrote {remote}", style("✓").green());
    }
    Ok(())
}

/// Copy a file from the board to the local filesystem.
pub(crate) fn cmd_get(
    cli: &Cli,
    config: &mut Config,
    remote: &str,
    local: Option<&Path>,
) -> Result<()> {
    let local = match local {
        Some(path) => path.to_path_buf(),
        None => {
            let name = remote.rsplit('/').next().filter(|n| !n.is_empty());
            let name = name.ok_or_else(|| {
                CliError::Usage(format!("cannot derive a local file name from '{remote}'"))
            })?;
            Path::new(name).to_path_buf()
        },
    };

    let data = with_device_fs(cli, config, |dev| dev.read_file(remote))?;

    fs::write(&local, &data)
        .with_context(|| format!("Failed to write {}", local.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Copied {} ({} bytes) to {}",
            style("✓").green(),
            remote,
            data.len(),
            local.display()
        );
    }
    Ok(())
}

/// Print a board file to stdout.
pub(crate) fn cmd_cat(cli: &Cli, config: &mut Config, remote: &str) -> Result<()> {
    let data = with_device_fs(cli, config, |dev| dev.read_file(remote))?;
    std::io::stdout().write_all(&data)?;
    Ok(())
}

/// Remove a file or empty directory on the board.
pub(crate) fn cmd_rm(cli: &Cli, config: &mut Config, path: &str, dir: bool) -> Result<()> {
    with_device_fs(cli, config, |dev| {
        if dir {
            dev.remove_dir(path)
        } else {
            dev.remove_file(path)
        }
    })?;

    if !cli.quiet {
        eprintln!("{} Removed {path}", style("✓").green());
    }
    Ok(())
}

/// Create a directory (and missing parents) on the board.
pub(crate) fn cmd_mkdir(cli: &Cli, config: &mut Config, path: &str) -> Result<()> {
    with_device_fs(cli, config, |dev| dev.make_path(path))?;

    if !cli.quiet {
        eprintln!("{} Created {path}", style("✓").green());
    }
    Ok(())
}

/// Create an empty file on the board if it does not exist.
pub(crate) fn cmd_touch(cli: &Cli, config: &mut Config, path: &str) -> Result<()> {
    with_device_fs(cli, config, |dev| dev.touch_file(path))?;

    if !cli.quiet {
        eprintln!("{} Touched {path}", style("✓").green());
    }
    Ok(())
}

/// List one directory of the board's filesystem.
pub(crate) fn cmd_ls(cli: &Cli, config: &mut Config, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or("/");
    let root = with_device_fs(cli, config, |dev| dev.walk())?;

    let node = find_node(&root, path)
        .ok_or_else(|| CliError::Usage(format!("no such path on device: {path}")))?;

    match node.kind {
        FsNodeKind::File => println!("{:>8}  {}", node.size, node.path),
        FsNodeKind::Dir => {
            for child in &node.children {
                match child.kind {
                    FsNodeKind::Dir => {
                        println!("{:>8}  {}/", "-", style(&child.name).blue().bold());
                    },
                    FsNodeKind::File => println!("{:>8}  {}", child.size, child.name),
                }
            }
        },
    }
    Ok(())
}

/// Print the board's filesystem as a tree.
pub(crate) fn cmd_tree(cli: &Cli, config: &mut Config) -> Result<()> {
    let root = with_device_fs(cli, config, |dev| dev.walk())?;
    print!("{}", render_tree(&root));
    Ok(())
}

/// Derive the remote path for `put` when none is given.
fn remote_or_file_name(local: &Path, remote: Option<&str>) -> Result<String> {
    if let Some(remote) = remote {
        return Ok(remote.to_string());
    }
    local
        .file_name()
        .and_then(|n| n.to_str())
        .map(ToString::to_string)
        .ok_or_else(|| {
            CliError::Usage(format!(
                "cannot derive a remote file name from '{}'",
                local.display()
            ))
            .into()
        })
}

/// Walk a snapshot down to `path`, treating "/" as the root itself.
fn find_node<'a>(root: &'a FsNode, path: &str) -> Option<&'a FsNode> {
    let mut node = root;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        node = node.child(segment)?;
    }
    Some(node)
}

/// Render a filesystem snapshot with box-drawing connectors.
fn render_tree(root: &FsNode) -> String {
    fn visit(node: &FsNode, prefix: &str, out: &mut String) {
        let count = node.children.len();
        for (i, child) in node.children.iter().enumerate() {
            let last = i + 1 == count;
            let connector = if last { "└── " } else { "├── " };
            out.push_str(prefix);
            out.push_str(connector);
            out.push_str(&child.name);
            match child.kind {
                FsNodeKind::Dir => out.push('/'),
                FsNodeKind::File => {
                    out.push_str(&format!(" ({} bytes)", child.size));
                },
            }
            out.push('\n');
            let deeper = if last { "    " } else { "│   " };
            visit(child, &format!("{prefix}{deeper}"), out);
        }
    }

    let mut out = String::from("/\n");
    visit(root, "", &mut out);
    out
}
