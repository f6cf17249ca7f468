//! Upload command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::{Cli, use_fancy_output};

use super::{ensure_not_interrupted, open_transport};

/// Upload a local file as main.py and soft-reset the board to run it.
pub(crate) fn cmd_upload(cli: &Cli, config: &mut Config, file: &Path) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading {}",
            style("📦").cyan(),
            style(file.display()).bold()
        );
    }

    let code = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let transport = open_transport(cli, config)?;
    ensure_not_interrupted()?;

    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let mut uploader = mpbridge::Uploader::new();
    uploader.attach(transport);

    let result = uploader.upload_as_main(&code, &mut |stage: &str, pct: u8| {
        pb.set_message(stage.to_string());
        pb.set_position(u64::from(pct));
    });
    uploader.detach();

    match result {
        Ok(()) => {
            pb.finish_with_message("done");
            if !cli.quiet {
                eprintln!(
                    "\n{} Uploaded {} as main.py and reset the board",
                    style("🎉").green().bold(),
                    file.display()
                );
            }
            Ok(())
        },
        Err(err) => {
            pb.abandon();
            Err(err.into())
        },
    }
}
